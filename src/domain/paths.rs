//! # Artifact Paths
//!
//! Centralized definitions for the files this crate writes next to a package.
//! Acts as the single source of truth so the orchestrator can find them again.

use std::path::{Path, PathBuf};

pub const GENERATION_STATE_DIR: &str = ".generation-state";
pub const AGENT_LOG_DIR: &str = ".claude/logs";
pub const VALIDATION_ERRORS_DIR: &str = ".claude/validation-errors";
pub const PACKAGE_MANIFEST: &str = "package.json";

/// Relative path of the persisted orchestration state (e.g. ".generation-state/abc.json")
pub fn generation_state_rel(session_id: &str) -> String {
    format!("{}/{}.json", GENERATION_STATE_DIR, session_id)
}

/// Relative path of a JSONL transcript for one agent call
pub fn agent_log_rel(workflow_id: &str, task_id: &str, seq: u32) -> String {
    format!("{}/{}-task-{}-{}.jsonl", AGENT_LOG_DIR, workflow_id, task_id, seq)
}

/// Relative path of the classified validation errors for a task
pub fn validation_errors_rel(workflow_id: &str, task_id: &str) -> String {
    format!("{}/{}-task-{}-errors.json", VALIDATION_ERRORS_DIR, workflow_id, task_id)
}

pub fn generation_state_path(root: &Path, session_id: &str) -> PathBuf {
    root.join(generation_state_rel(session_id))
}

pub fn agent_log_path(root: &Path, workflow_id: &str, task_id: &str, seq: u32) -> PathBuf {
    root.join(agent_log_rel(workflow_id, task_id, seq))
}

pub fn validation_errors_path(root: &Path, workflow_id: &str, task_id: &str) -> PathBuf {
    root.join(validation_errors_rel(workflow_id, task_id))
}

pub fn package_manifest_path(root: &Path) -> PathBuf {
    root.join(PACKAGE_MANIFEST)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_paths_are_deterministic() {
        assert_eq!(generation_state_rel("s-1"), ".generation-state/s-1.json");
        assert_eq!(agent_log_rel("wf", "7", 2), ".claude/logs/wf-task-7-2.jsonl");
        assert_eq!(
            validation_errors_rel("wf", "7"),
            ".claude/validation-errors/wf-task-7-errors.json"
        );
        assert_eq!(
            agent_log_path(Path::new("/pkg"), "wf", "7", 0),
            PathBuf::from("/pkg/.claude/logs/wf-task-7-0.jsonl")
        );
    }
}
