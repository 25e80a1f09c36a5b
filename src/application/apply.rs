//! # File Applier
//!
//! Applies resolved file changes inside a package root. Each operation stands
//! alone: a failure is recorded against its path and the batch moves on.

use anyhow::{Context, Result};
use std::borrow::Borrow;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::application::parsing::resolve_operation;
use crate::application::path_safety::{is_protected_path, validate_relative_path};
use crate::domain::types::{ApplyResult, FailedOperation, FileAction, FileChange, ParsedResponse};

/// Applies file changes relative to a single package directory.
#[derive(Debug, Clone)]
pub struct FileApplier {
    root: PathBuf,
    normalize: bool,
}

impl FileApplier {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            normalize: false,
        }
    }

    /// Run written content through [`normalize_content`] first.
    pub fn with_normalization(mut self, enabled: bool) -> Self {
        self.normalize = enabled;
        self
    }

    /// Applies `changes` in order. Only a missing or uncreatable package root is an error.
    pub async fn apply(&self, changes: &[FileChange]) -> Result<ApplyResult> {
        self.apply_in_order(changes.iter().map(Ok::<_, FailedOperation>)).await
    }

    /// Resolves the content blocks of a parsed response and applies its file operations.
    /// Failures, resolution or write alike, are reported in declaration order.
    pub async fn apply_parsed(&self, parsed: &ParsedResponse) -> Result<ApplyResult> {
        let resolved = parsed
            .command
            .file_operations()
            .iter()
            .map(|op| resolve_operation(op, &parsed.content_blocks));

        let mut result = self.apply_in_order(resolved).await?;
        result.warnings.extend(parsed.warnings.iter().cloned());
        Ok(result)
    }

    async fn apply_in_order<C, I>(&self, items: I) -> Result<ApplyResult>
    where
        C: Borrow<FileChange>,
        I: IntoIterator<Item = Result<C, FailedOperation>>,
    {
        tokio::fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("Failed to create package directory {}", self.root.display()))?;

        let mut result = ApplyResult::default();

        for item in items {
            let failure = match item {
                Ok(change) => {
                    let change = change.borrow();
                    match self.apply_one(change, &mut result).await {
                        Ok(()) => continue,
                        Err(error) => FailedOperation::new(&change.path, change.action, error),
                    }
                }
                Err(failure) => failure,
            };
            tracing::warn!(
                path = %failure.path,
                operation = %failure.operation,
                error = %failure.error,
                "File operation failed"
            );
            result.failed_operations.push(failure);
        }

        tracing::info!(
            modified = result.files_modified.len(),
            deleted = result.files_deleted.len(),
            failed = result.failed_operations.len(),
            "Applied file changes"
        );
        Ok(result)
    }

    async fn apply_one(&self, change: &FileChange, result: &mut ApplyResult) -> Result<(), String> {
        let target = validate_relative_path(&self.root, &change.path).map_err(|e| e.to_string())?;

        if is_protected_path(&change.path) {
            return Err("refusing to modify protected file".to_string());
        }

        match change.action {
            FileAction::Create | FileAction::Overwrite => {
                let content = self.content_of(change)?;
                write_file(&target, &content).await?;
                result.files_modified.push(change.path.clone());
            }
            FileAction::Delete => match tokio::fs::remove_file(&target).await {
                Ok(()) => result.files_deleted.push(change.path.clone()),
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    result
                        .warnings
                        .push(format!("{} was already absent", change.path));
                    result.files_deleted.push(change.path.clone());
                }
                Err(e) => return Err(format!("failed to delete: {}", e)),
            },
            FileAction::InsertAt => {
                let line = change.line.ok_or("insert_at requires 'line'")?;
                let content = self.content_of(change)?;
                let existing = read_existing(&target).await?;
                let updated = insert_at(&existing, line, &content)?;
                write_file(&target, &updated).await?;
                result.files_modified.push(change.path.clone());
            }
            FileAction::ReplaceLines => {
                let start = change.start_line.ok_or("replace_lines requires 'startLine'")?;
                let end = change.end_line.ok_or("replace_lines requires 'endLine'")?;
                let content = self.content_of(change)?;
                let existing = read_existing(&target).await?;
                let updated = replace_lines(&existing, start, end, &content)?;
                write_file(&target, &updated).await?;
                result.files_modified.push(change.path.clone());
            }
        }

        Ok(())
    }

    fn content_of(&self, change: &FileChange) -> Result<String, String> {
        let content = change
            .content
            .as_deref()
            .ok_or_else(|| format!("{} requires content", change.action))?;
        Ok(if self.normalize {
            normalize_content(content)
        } else {
            content.to_string()
        })
    }
}

async fn write_file(target: &Path, content: &str) -> Result<(), String> {
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| format!("failed to create parent directory: {}", e))?;
    }
    tokio::fs::write(target, content.as_bytes())
        .await
        .map_err(|e| format!("failed to write: {}", e))
}

async fn read_existing(target: &Path) -> Result<String, String> {
    tokio::fs::read_to_string(target)
        .await
        .map_err(|e| format!("failed to read existing file: {}", e))
}

/// Inserts `content` before 1-based `line`; `line == count + 1` appends.
fn insert_at(existing: &str, line: usize, content: &str) -> Result<String, String> {
    let mut lines: Vec<&str> = existing.lines().collect();
    if line == 0 || line > lines.len() + 1 {
        return Err(format!(
            "line {} out of range (file has {} lines)",
            line,
            lines.len()
        ));
    }
    let inserted: Vec<&str> = content.lines().collect();
    lines.splice(line - 1..line - 1, inserted);
    Ok(join_lines(&lines, existing))
}

/// Replaces the inclusive 1-based range `start..=end` with `content`.
fn replace_lines(existing: &str, start: usize, end: usize, content: &str) -> Result<String, String> {
    let mut lines: Vec<&str> = existing.lines().collect();
    if start == 0 || start > end || end > lines.len() {
        return Err(format!(
            "line range {}-{} out of range (file has {} lines)",
            start,
            end,
            lines.len()
        ));
    }
    let replacement: Vec<&str> = content.lines().collect();
    lines.splice(start - 1..end, replacement);
    Ok(join_lines(&lines, existing))
}

/// Rejoins with the original file's line ending and trailing-newline state.
fn join_lines(lines: &[&str], original: &str) -> String {
    let eol = if original.contains("\r\n") { "\r\n" } else { "\n" };
    let mut joined = lines.join(eol);
    if original.ends_with('\n') && !joined.is_empty() {
        joined.push_str(eol);
    }
    joined
}

/// Converts CRLF/CR line endings to LF and ends non-empty text with exactly one newline.
pub fn normalize_content(text: &str) -> String {
    let unified = text.replace("\r\n", "\n").replace('\r', "\n");
    let body = unified.trim_end_matches('\n');
    if body.is_empty() {
        return String::new();
    }
    format!("{}\n", body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::parsing::parse_hybrid_response;
    use std::fs;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_create_and_overwrite() {
        let dir = TempDir::new().unwrap();
        let applier = FileApplier::new(dir.path());

        let result = applier
            .apply(&[
                FileChange::write("src/deep/nested/index.ts", "export {};"),
                FileChange::write("README.md", "# pkg"),
            ])
            .await
            .unwrap();

        assert_eq!(result.files_modified, vec!["src/deep/nested/index.ts", "README.md"]);
        assert!(result.is_clean());
        assert_eq!(
            fs::read_to_string(dir.path().join("src/deep/nested/index.ts")).unwrap(),
            "export {};"
        );

        applier
            .apply(&[FileChange::write("README.md", "# renamed\r\n")])
            .await
            .unwrap();
        // Verbatim without normalization
        assert_eq!(fs::read_to_string(dir.path().join("README.md")).unwrap(), "# renamed\r\n");
    }

    #[tokio::test]
    async fn test_traversal_is_a_single_failure() {
        let dir = TempDir::new().unwrap();
        let changes: Vec<FileChange> =
            serde_json::from_str(r#"[{"operation":"create","path":"../../etc/passwd","content":"x"}]"#)
                .unwrap();

        let result = FileApplier::new(dir.path()).apply(&changes).await.unwrap();

        assert!(result.files_modified.is_empty());
        assert_eq!(result.failed_operations.len(), 1);
        assert_eq!(result.failed_operations[0].path, "../../etc/passwd");
        assert!(result.failed_operations[0].error.contains("traversal"));
    }

    #[tokio::test]
    async fn test_one_failure_does_not_abort_batch() {
        let dir = TempDir::new().unwrap();
        // A regular file where a directory is needed makes the write fail
        fs::write(dir.path().join("blocker"), "not a dir").unwrap();

        let changes = vec![
            FileChange::write("a.ts", "a"),
            FileChange::write("blocker/child.ts", "b"),
            FileChange::write("c.ts", "c"),
            FileChange::delete("a-missing.ts"),
        ];
        let result = FileApplier::new(dir.path()).apply(&changes).await.unwrap();

        assert_eq!(result.files_modified, vec!["a.ts", "c.ts"]);
        assert_eq!(result.failed_operations.len(), 1);
        assert_eq!(result.failed_operations[0].path, "blocker/child.ts");
        assert!(dir.path().join("c.ts").exists());
    }

    #[tokio::test]
    async fn test_delete_missing_is_success() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("old.ts"), "x").unwrap();

        let result = FileApplier::new(dir.path())
            .apply(&[FileChange::delete("old.ts"), FileChange::delete("never-existed.ts")])
            .await
            .unwrap();

        assert_eq!(result.files_deleted, vec!["old.ts", "never-existed.ts"]);
        assert!(result.failed_operations.is_empty());
        assert!(!dir.path().join("old.ts").exists());
    }

    #[tokio::test]
    async fn test_protected_file_refused() {
        let dir = TempDir::new().unwrap();
        let result = FileApplier::new(dir.path())
            .apply(&[
                FileChange::write("package-lock.json", "{}"),
                FileChange::write(".generation-state/wf.json", "{}"),
            ])
            .await
            .unwrap();
        assert_eq!(
            result.failed_paths(),
            vec!["package-lock.json", ".generation-state/wf.json"]
        );
        assert!(!dir.path().join("package-lock.json").exists());
        assert!(!dir.path().join(".generation-state").exists());
    }

    #[tokio::test]
    async fn test_line_operations() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("f.ts"), "one\ntwo\nthree\n").unwrap();
        let applier = FileApplier::new(dir.path());

        let insert = FileChange {
            line: Some(2),
            ..FileChange {
                action: FileAction::InsertAt,
                ..FileChange::write("f.ts", "one-and-half")
            }
        };
        applier.apply(&[insert]).await.unwrap();
        assert_eq!(
            fs::read_to_string(dir.path().join("f.ts")).unwrap(),
            "one\none-and-half\ntwo\nthree\n"
        );

        let replace = FileChange {
            start_line: Some(2),
            end_line: Some(3),
            ..FileChange {
                action: FileAction::ReplaceLines,
                ..FileChange::write("f.ts", "TWO")
            }
        };
        applier.apply(&[replace]).await.unwrap();
        assert_eq!(
            fs::read_to_string(dir.path().join("f.ts")).unwrap(),
            "one\nTWO\nthree\n"
        );

        let out_of_range = FileChange {
            start_line: Some(5),
            end_line: Some(9),
            ..FileChange {
                action: FileAction::ReplaceLines,
                ..FileChange::write("f.ts", "x")
            }
        };
        let result = applier.apply(&[out_of_range]).await.unwrap();
        assert!(result.failed_operations[0].error.contains("out of range"));
    }

    #[tokio::test]
    async fn test_line_operations_keep_crlf() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("win.ts"), "one\r\ntwo\r\nthree\r\n").unwrap();
        let applier = FileApplier::new(dir.path());

        let insert = FileChange {
            line: Some(2),
            ..FileChange {
                action: FileAction::InsertAt,
                ..FileChange::write("win.ts", "inserted")
            }
        };
        let replace = FileChange {
            start_line: Some(4),
            end_line: Some(4),
            ..FileChange {
                action: FileAction::ReplaceLines,
                ..FileChange::write("win.ts", "THREE\nFOUR")
            }
        };
        let result = applier.apply(&[insert, replace]).await.unwrap();
        assert!(result.is_clean());
        assert_eq!(
            fs::read_to_string(dir.path().join("win.ts")).unwrap(),
            "one\r\ninserted\r\ntwo\r\nTHREE\r\nFOUR\r\n"
        );
    }

    #[tokio::test]
    async fn test_apply_parsed_reports_failures_in_declared_order() {
        let dir = TempDir::new().unwrap();
        let parsed = parse_hybrid_response(
            "{\"command\":\"APPLY_CODE_CHANGES\",\"files\":[{\"index\":0,\"path\":\"src/missing.ts\",\"action\":\"CREATE_OR_OVERWRITE\"},{\"index\":1,\"path\":\"../escape.ts\",\"action\":\"CREATE_OR_OVERWRITE\"},{\"index\":2,\"path\":\"src/gone.ts\",\"action\":\"OVERWRITE\"},{\"index\":3,\"path\":\"src/ok.ts\",\"action\":\"CREATE_OR_OVERWRITE\"}]}\n##---Content-Break-1---##\nx\n##---Content-Break-3---##\ny",
        )
        .unwrap();

        let result = FileApplier::new(dir.path()).apply_parsed(&parsed).await.unwrap();
        assert_eq!(result.files_modified, vec!["src/ok.ts"]);
        assert_eq!(
            result.failed_paths(),
            vec!["src/missing.ts", "../escape.ts", "src/gone.ts"]
        );
    }

    #[tokio::test]
    async fn test_apply_parsed_response() {
        let dir = TempDir::new().unwrap();
        let parsed = parse_hybrid_response(
            "{\"command\":\"APPLY_CODE_CHANGES\",\"files\":[{\"index\":0,\"path\":\"src/index.ts\",\"action\":\"CREATE_OR_OVERWRITE\"},{\"index\":1,\"path\":\"src/missing.ts\",\"action\":\"CREATE_OR_OVERWRITE\"}]}\n##---Content-Break-0---##\nexport const x=1;",
        )
        .unwrap();

        let result = FileApplier::new(dir.path())
            .with_normalization(true)
            .apply_parsed(&parsed)
            .await
            .unwrap();

        assert_eq!(result.files_modified, vec!["src/index.ts"]);
        assert_eq!(result.failed_paths(), vec!["src/missing.ts"]);
        assert_eq!(
            fs::read_to_string(dir.path().join("src/index.ts")).unwrap(),
            "export const x=1;\n"
        );
    }

    #[test]
    fn test_normalize_content_idempotent() {
        for input in ["a\r\nb\r\n\r\n", "a\rb", "no newline", "", "\n\n", "x\n"] {
            let once = normalize_content(input);
            assert_eq!(normalize_content(&once), once, "{input:?}");
        }
        assert_eq!(normalize_content("a\r\nb"), "a\nb\n");
        assert_eq!(normalize_content("a\n\n\n"), "a\n");
        assert_eq!(normalize_content("\n\n"), "");
    }
}
