//! JSONL transcript of the agent calls made for one task.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

use crate::domain::paths::agent_log_path;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry<'a> {
    pub timestamp: String,
    pub provider: &'a str,
    pub event: &'a str,
    pub payload: Value,
}

/// Appends entries to `.claude/logs/{workflow}-task-{task}-{seq}.jsonl`.
#[derive(Debug, Clone)]
pub struct AgentLog {
    path: PathBuf,
}

impl AgentLog {
    pub fn new(package_root: &Path, workflow_id: &str, task_id: &str, seq: u32) -> Self {
        Self {
            path: agent_log_path(package_root, workflow_id, task_id, seq),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(&self, provider: &str, event: &str, payload: Value) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let entry = LogEntry {
            timestamp: Utc::now().to_rfc3339(),
            provider,
            event,
            payload,
        };
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("Failed to open {}", self.path.display()))?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Like [`append`](Self::append), but a failure only logs a warning.
    pub async fn record(&self, provider: &str, event: &str, payload: Value) {
        if let Err(e) = self.append(provider, event, payload).await {
            tracing::warn!(path = %self.path.display(), "Failed to write agent log: {:#}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_appends_one_line_per_entry() {
        let dir = TempDir::new().unwrap();
        let log = AgentLog::new(dir.path(), "wf", "3", 1);
        log.append("claude-cli", "request", json!({"prompt": "hi"})).await.unwrap();
        log.record("claude-cli", "response", json!({"result": "ok"})).await;

        assert!(log.path().ends_with(".claude/logs/wf-task-3-1.jsonl"));
        let content = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event"], "request");
        assert_eq!(lines[1]["payload"]["result"], "ok");
    }
}
