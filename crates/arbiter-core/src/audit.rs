//! Audit records and sinks
//!
//! Every request emits exactly one [`AuditRecord`]. Sinks are best effort: the
//! engine logs a failing sink and still returns the report.

use crate::aggregate::PanelReport;
use crate::error::Result;
use crate::risk::ScoreBreakdown;
use crate::types::{Consensus, Decision};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// The artifact handed to an audit sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub task_id: Uuid,
    pub panel_size: u8,
    pub score: u8,
    pub score_breakdown: ScoreBreakdown,
    pub override_attempted: bool,
    pub override_applied: bool,
    pub timestamp: DateTime<Utc>,
    pub decision: Decision,
    pub consensus: Consensus,
    pub cache_hit: bool,
    pub rounds_used: u32,
    pub calls_used: u32,
    pub escalated: bool,
}

impl AuditRecord {
    pub fn from_report(
        task_id: Uuid,
        report: &PanelReport,
        cache_hit: bool,
        calls_used: u32,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            task_id,
            panel_size: report.plan.size,
            score: report.plan.score,
            score_breakdown: report.plan.breakdown,
            override_attempted: report.plan.override_requested.is_some(),
            override_applied: report.plan.override_applied,
            timestamp,
            decision: report.decision,
            consensus: report.consensus,
            cache_hit,
            rounds_used: if cache_hit { 0 } else { report.rounds },
            calls_used,
            escalated: report.is_escalated(),
        }
    }
}

/// Destination for audit records
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, record: &AuditRecord) -> Result<()>;
}

/// In-process sink
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, record: &AuditRecord) -> Result<()> {
        self.records.lock().push(record.clone());
        Ok(())
    }
}

/// Appends one JSON object per line
#[derive(Debug, Clone)]
pub struct JsonlAuditSink {
    path: PathBuf,
}

impl JsonlAuditSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read back every well-formed record
    pub async fn read_all(&self) -> Result<Vec<AuditRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let content = tokio::fs::read_to_string(&self.path).await?;
        let mut records = Vec::new();
        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<AuditRecord>(line) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!("Skipping malformed audit line: {}", e),
            }
        }
        Ok(records)
    }
}

#[async_trait]
impl AuditSink for JsonlAuditSink {
    async fn record(&self, record: &AuditRecord) -> Result<()> {
        use tokio::io::AsyncWriteExt;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}
