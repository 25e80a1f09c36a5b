//! # Generation State
//!
//! Orchestration progress for one package session, persisted as JSON at
//! `.generation-state/{sessionId}.json` so a restarted workflow can resume.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::domain::paths::generation_state_path;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GenerationState {
    pub session_id: String,
    #[serde(default)]
    pub package_name: Option<String>,
    #[serde(default)]
    pub completed_steps: Vec<String>,
    #[serde(default)]
    pub files_written: Vec<String>,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl GenerationState {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            package_name: None,
            completed_steps: Vec::new(),
            files_written: Vec::new(),
            attempts: 0,
            last_error: None,
            updated_at: Utc::now(),
        }
    }

    /// Loads the session state, or starts a fresh one if none was saved yet.
    pub async fn load(package_root: &Path, session_id: &str) -> Result<Self> {
        let path = generation_state_path(package_root, session_id);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => serde_json::from_str(&content)
                .with_context(|| format!("Corrupt generation state at {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::new(session_id)),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    /// Persists the state, creating `.generation-state/` when needed.
    pub async fn save(&mut self, package_root: &Path) -> Result<PathBuf> {
        self.updated_at = Utc::now();
        let path = generation_state_path(package_root, &self.session_id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        tokio::fs::write(&path, json)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }

    pub fn record_step(&mut self, step: impl Into<String>) {
        let step = step.into();
        if !self.completed_steps.contains(&step) {
            self.completed_steps.push(step);
        }
        self.last_error = None;
    }

    /// Adds paths to `files_written`, keeping first-seen order.
    pub fn record_files<I, S>(&mut self, files: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for file in files {
            let file = file.into();
            if !self.files_written.contains(&file) {
                self.files_written.push(file);
            }
        }
    }

    pub fn record_error(&mut self, error: impl Into<String>) {
        self.attempts += 1;
        self.last_error = Some(error.into());
    }

    pub fn is_step_done(&self, step: &str) -> bool {
        self.completed_steps.iter().any(|s| s == step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_load_missing_returns_fresh_state() {
        let dir = TempDir::new().unwrap();
        let state = GenerationState::load(dir.path(), "s1").await.unwrap();
        assert_eq!(state.session_id, "s1");
        assert!(state.completed_steps.is_empty());
    }

    #[tokio::test]
    async fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let mut state = GenerationState::new("s2");
        state.package_name = Some("@acme/ui".into());
        state.record_step("scaffold");
        state.record_step("scaffold");
        state.record_files(["src/index.ts", "package.json", "src/index.ts"]);
        state.record_error("lint failed");

        let path = state.save(dir.path()).await.unwrap();
        assert!(path.ends_with(".generation-state/s2.json"));

        let loaded = GenerationState::load(dir.path(), "s2").await.unwrap();
        assert_eq!(loaded.completed_steps, vec!["scaffold"]);
        assert_eq!(loaded.files_written, vec!["src/index.ts", "package.json"]);
        assert_eq!(loaded.attempts, 1);
        assert_eq!(loaded.last_error.as_deref(), Some("lint failed"));
        assert!(loaded.is_step_done("scaffold"));
    }

    #[tokio::test]
    async fn test_corrupt_state_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = generation_state_path(dir.path(), "bad");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{not json").unwrap();
        assert!(GenerationState::load(dir.path(), "bad").await.is_err());
    }
}
