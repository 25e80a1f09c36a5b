//! # Domain Types
//!
//! Data structures exchanged between the parser, the file applier and the
//! orchestration caller.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Raw file bodies keyed by their `##---Content-Break-N---##` index.
pub type ContentBlocks = BTreeMap<u32, String>;

/// Kind of mutation a file operation requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileAction {
    #[serde(
        rename = "CREATE_OR_OVERWRITE",
        alias = "CREATE",
        alias = "create",
        alias = "create_or_overwrite"
    )]
    Create,
    #[serde(
        rename = "OVERWRITE",
        alias = "overwrite",
        alias = "UPDATE",
        alias = "update"
    )]
    Overwrite,
    #[serde(rename = "DELETE", alias = "delete")]
    Delete,
    #[serde(rename = "INSERT_AT", alias = "insert_at")]
    InsertAt,
    #[serde(rename = "REPLACE_LINES", alias = "replace_lines")]
    ReplaceLines,
}

impl FileAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileAction::Create => "create",
            FileAction::Overwrite => "overwrite",
            FileAction::Delete => "delete",
            FileAction::InsertAt => "insert_at",
            FileAction::ReplaceLines => "replace_lines",
        }
    }

    /// Whether the action needs a content body.
    pub fn needs_content(&self) -> bool {
        !matches!(self, FileAction::Delete)
    }
}

impl std::fmt::Display for FileAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One file mutation as declared in the JSON header of a hybrid response.
/// `path` is relative to the package root and is never trusted without validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileOperation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
    pub path: String,
    #[serde(alias = "operation")]
    pub action: FileAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_line: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_line: Option<usize>,
}

/// A resolved operation: the declared mutation plus its body, ready for the applier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileChange {
    pub path: String,
    #[serde(alias = "operation")]
    pub action: FileAction,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub line: Option<usize>,
    #[serde(default)]
    pub start_line: Option<usize>,
    #[serde(default)]
    pub end_line: Option<usize>,
}

impl FileChange {
    pub fn write(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            action: FileAction::Create,
            content: Some(content.into()),
            line: None,
            start_line: None,
            end_line: None,
        }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            action: FileAction::Delete,
            content: None,
            line: None,
            start_line: None,
            end_line: None,
        }
    }

    pub fn from_operation(op: &FileOperation, content: Option<String>) -> Self {
        Self {
            path: op.path.clone(),
            action: op.action,
            content,
            line: op.line,
            start_line: op.start_line,
            end_line: op.end_line,
        }
    }
}

/// A single operation that could not be applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedOperation {
    pub path: String,
    pub operation: String,
    pub error: String,
}

impl FailedOperation {
    pub fn new(path: impl Into<String>, operation: FileAction, error: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            operation: operation.as_str().to_string(),
            error: error.into(),
        }
    }
}

/// Aggregated outcome of a batch of file operations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyResult {
    pub files_modified: Vec<String>,
    pub files_deleted: Vec<String>,
    pub warnings: Vec<String>,
    pub failed_operations: Vec<FailedOperation>,
}

impl ApplyResult {
    /// Paths that were written or removed.
    pub fn succeeded(&self) -> impl Iterator<Item = &str> {
        self.files_modified
            .iter()
            .chain(self.files_deleted.iter())
            .map(String::as_str)
    }

    pub fn failed_paths(&self) -> Vec<&str> {
        self.failed_operations.iter().map(|f| f.path.as_str()).collect()
    }

    pub fn is_clean(&self) -> bool {
        self.failed_operations.is_empty()
    }
}

/// The next step requested by the LLM, keyed by the `command` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentCommand {
    ApplyCodeChanges {
        #[serde(default)]
        files: Vec<FileOperation>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        summary: Option<String>,
    },
    RunLintCheck,
    RunUnitTests,
    RunBuild,
    PublishPackage,
    AwaitDependency {
        #[serde(rename = "packageName", alias = "package_name")]
        package_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    RequestHumanIntervention {
        reason: String,
    },
    TaskComplete {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        summary: Option<String>,
    },
}

impl AgentCommand {
    /// Wire names of every recognised command.
    pub const NAMES: &'static [&'static str] = &[
        "APPLY_CODE_CHANGES",
        "RUN_LINT_CHECK",
        "RUN_UNIT_TESTS",
        "RUN_BUILD",
        "PUBLISH_PACKAGE",
        "AWAIT_DEPENDENCY",
        "REQUEST_HUMAN_INTERVENTION",
        "TASK_COMPLETE",
    ];

    pub fn name(&self) -> &'static str {
        match self {
            AgentCommand::ApplyCodeChanges { .. } => "APPLY_CODE_CHANGES",
            AgentCommand::RunLintCheck => "RUN_LINT_CHECK",
            AgentCommand::RunUnitTests => "RUN_UNIT_TESTS",
            AgentCommand::RunBuild => "RUN_BUILD",
            AgentCommand::PublishPackage => "PUBLISH_PACKAGE",
            AgentCommand::AwaitDependency { .. } => "AWAIT_DEPENDENCY",
            AgentCommand::RequestHumanIntervention { .. } => "REQUEST_HUMAN_INTERVENTION",
            AgentCommand::TaskComplete { .. } => "TASK_COMPLETE",
        }
    }

    pub fn file_operations(&self) -> &[FileOperation] {
        match self {
            AgentCommand::ApplyCodeChanges { files, .. } => files,
            _ => &[],
        }
    }
}

/// Output of the hybrid protocol parser.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedResponse {
    pub command: AgentCommand,
    pub content_blocks: ContentBlocks,
    pub warnings: Vec<String>,
}
