//! Concurrent worker dispatch
//!
//! Every role in a round receives the same immutable payload (one shared
//! `Arc`, never copied per worker) and runs in its own task with its own
//! timeout. A worker that times out is dropped, so a late answer can never be
//! merged. The dispatcher returns once every task has answered or expired.

use crate::roster::WorkerRoleSpec;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Input every worker in a round sees
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerPayload {
    pub subject: String,
    pub content: String,
}

impl WorkerPayload {
    pub fn new(subject: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            content: content.into(),
        }
    }

    /// blake3 over the exact bytes handed to workers
    pub fn digest(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.subject.as_bytes());
        hasher.update(&[0]);
        hasher.update(self.content.as_bytes());
        hasher.finalize().to_hex().to_string()
    }
}

/// One invocation of one worker
#[derive(Debug, Clone)]
pub struct WorkerRequest {
    pub role_id: String,
    pub token_budget: u32,
    pub payload: Arc<WorkerPayload>,
}

/// A black-box judge: takes a request and returns a structured verdict
#[async_trait]
pub trait Worker: Send + Sync {
    async fn invoke(&self, request: &WorkerRequest) -> anyhow::Result<Value>;
}

/// Raw result of one invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum DispatchOutcome {
    Output(Value),
    Timeout,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchResult {
    pub worker_id: String,
    pub outcome: DispatchOutcome,
    pub elapsed_ms: u64,
    /// Digest of the payload this worker received
    pub payload_digest: String,
}

/// Registered worker implementations keyed by role id
#[derive(Clone, Default)]
pub struct WorkerPool {
    workers: HashMap<String, Arc<dyn Worker>>,
}

impl WorkerPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, role_id: impl Into<String>, worker: Arc<dyn Worker>) {
        self.workers.insert(role_id.into(), worker);
    }

    pub fn with_worker(mut self, role_id: impl Into<String>, worker: Arc<dyn Worker>) -> Self {
        self.register(role_id, worker);
        self
    }

    pub fn get(&self, role_id: &str) -> Option<Arc<dyn Worker>> {
        self.workers.get(role_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut roles: Vec<&String> = self.workers.keys().collect();
        roles.sort();
        f.debug_struct("WorkerPool").field("roles", &roles).finish()
    }
}

/// Fans a payload out to a set of roles
#[derive(Debug, Clone)]
pub struct Dispatcher {
    pool: WorkerPool,
    default_timeout: Duration,
}

impl Dispatcher {
    pub fn new(pool: WorkerPool, default_timeout: Duration) -> Self {
        Self {
            pool,
            default_timeout,
        }
    }

    /// Invoke every role concurrently and wait for all of them
    ///
    /// Results come back in role order.
    pub async fn dispatch(
        &self,
        roles: &[&WorkerRoleSpec],
        payload: &Arc<WorkerPayload>,
    ) -> Vec<DispatchResult> {
        let mut handles = Vec::with_capacity(roles.len());

        for role in roles {
            let timeout = role.timeout.unwrap_or(self.default_timeout);
            let request = WorkerRequest {
                role_id: role.id.clone(),
                token_budget: role.token_budget,
                payload: Arc::clone(payload),
            };

            let Some(worker) = self.pool.get(&role.id) else {
                tracing::warn!(role = %role.id, "No worker registered for role");
                handles.push((role.id.clone(), payload.digest(), None));
                continue;
            };

            tracing::debug!(role = %role.id, ?timeout, "Dispatching worker");
            let handle = tokio::spawn(async move {
                let started = Instant::now();
                let digest = request.payload.digest();
                let outcome = match tokio::time::timeout(timeout, worker.invoke(&request)).await {
                    Ok(Ok(output)) => DispatchOutcome::Output(output),
                    Ok(Err(e)) => DispatchOutcome::Failed(e.to_string()),
                    Err(_) => DispatchOutcome::Timeout,
                };
                (outcome, started.elapsed(), digest)
            });
            handles.push((role.id.clone(), payload.digest(), Some(handle)));
        }

        let settled = futures::future::join_all(handles.into_iter().map(
            |(worker_id, sent_digest, handle)| async move {
                let (outcome, elapsed, payload_digest) = match handle {
                    None => (
                        DispatchOutcome::Failed("no worker registered for role".to_string()),
                        Duration::ZERO,
                        sent_digest,
                    ),
                    Some(handle) => match handle.await {
                        Ok(result) => result,
                        Err(e) => {
                            tracing::error!(worker = %worker_id, "Worker task panicked: {}", e);
                            (
                                DispatchOutcome::Failed(format!("worker task failed: {}", e)),
                                Duration::ZERO,
                                sent_digest,
                            )
                        }
                    },
                };
                (worker_id, outcome, elapsed, payload_digest)
            },
        ))
        .await;

        let mut results = Vec::with_capacity(settled.len());
        for (worker_id, outcome, elapsed, payload_digest) in settled {
            match &outcome {
                DispatchOutcome::Output(_) => {
                    tracing::debug!(worker = %worker_id, ?elapsed, "Worker responded")
                }
                DispatchOutcome::Timeout => {
                    tracing::warn!(worker = %worker_id, ?elapsed, "Worker timed out")
                }
                DispatchOutcome::Failed(reason) => {
                    tracing::warn!(worker = %worker_id, "Worker failed: {}", reason)
                }
            }

            results.push(DispatchResult {
                worker_id,
                outcome,
                elapsed_ms: elapsed.as_millis() as u64,
                payload_digest,
            });
        }
        results
    }
}
