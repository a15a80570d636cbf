//! Scripted workers for offline reviews
//!
//! A responses file maps role ids to canned outputs:
//!
//! ```json
//! {
//!   "technical": {"response": {"score": 4, "category": "PASS", "findings": []}},
//!   "completeness": {"response": {"score": 3, "category": "CONDITIONAL", "findings": []}, "delay_ms": 200},
//!   "practicality": {"error": "model unavailable"}
//! }
//! ```

use anyhow::Context;
use arbiter_core::{Worker, WorkerPool, WorkerRequest};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Canned behaviour for one role
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScriptedResponse {
    #[serde(default)]
    pub response: Value,
    #[serde(default)]
    pub delay_ms: u64,
    /// Fail the invocation with this message instead of answering
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug)]
pub struct ScriptedWorker {
    script: ScriptedResponse,
}

impl ScriptedWorker {
    pub fn new(script: ScriptedResponse) -> Self {
        Self { script }
    }
}

#[async_trait]
impl Worker for ScriptedWorker {
    async fn invoke(&self, request: &WorkerRequest) -> anyhow::Result<Value> {
        tracing::debug!(role = %request.role_id, delay_ms = self.script.delay_ms, "Scripted worker invoked");
        if self.script.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.script.delay_ms)).await;
        }
        if let Some(error) = &self.script.error {
            anyhow::bail!("{}", error);
        }
        Ok(self.script.response.clone())
    }
}

/// Parse a responses document into a worker pool
pub fn pool_from_str(source: &str) -> anyhow::Result<WorkerPool> {
    let scripts: BTreeMap<String, ScriptedResponse> =
        serde_json::from_str(source).context("Responses must be a JSON object keyed by role id")?;

    let mut pool = WorkerPool::new();
    for (role, script) in scripts {
        pool.register(role, Arc::new(ScriptedWorker::new(script)));
    }
    Ok(pool)
}

pub fn load_pool(path: &Path) -> anyhow::Result<WorkerPool> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read responses {}", path.display()))?;
    pool_from_str(&source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbiter_core::dispatch::WorkerPayload;
    use serde_json::json;

    fn request(role: &str) -> WorkerRequest {
        WorkerRequest {
            role_id: role.to_string(),
            token_budget: 100,
            payload: Arc::new(WorkerPayload::new("s", "c")),
        }
    }

    #[tokio::test]
    async fn test_scripted_responses() {
        let pool = pool_from_str(
            r#"{
                "technical": {"response": {"score": 4, "category": "PASS", "findings": []}},
                "practicality": {"error": "model unavailable"}
            }"#,
        )
        .unwrap();
        assert_eq!(pool.len(), 2);

        let technical = pool.get("technical").unwrap();
        let output = technical.invoke(&request("technical")).await.unwrap();
        assert_eq!(output["category"], json!("PASS"));

        let practicality = pool.get("practicality").unwrap();
        let err = practicality.invoke(&request("practicality")).await.unwrap_err();
        assert!(err.to_string().contains("model unavailable"));
    }

    #[test]
    fn test_rejects_non_object() {
        assert!(pool_from_str("[1, 2]").is_err());
    }

    #[test]
    fn test_load_pool_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("responses.json");
        std::fs::write(&path, r#"{"risk": {"response": null, "delay_ms": 5}}"#).unwrap();
        assert!(load_pool(&path).unwrap().get("risk").is_some());
        assert!(load_pool(&dir.path().join("missing.json")).is_err());
    }
}
