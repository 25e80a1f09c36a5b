//! # Process Executor
//!
//! Runs external programs (LLM CLIs, npm scripts) in a package directory with
//! a hard timeout. The child is killed when the timeout elapses.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Captured result of one finished process.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub success: bool,
}

impl ProcessOutput {
    /// Stdout and stderr in one string, stderr under a separator.
    pub fn combined(&self) -> String {
        let mut result = String::new();
        if !self.stdout.is_empty() {
            result.push_str(&self.stdout);
        }
        if !self.stderr.is_empty() {
            if !result.is_empty() {
                result.push_str("\n--- STDERR ---\n");
            }
            result.push_str(&self.stderr);
        }
        if !self.success {
            if !result.is_empty() {
                result.push('\n');
            }
            match self.exit_code {
                Some(code) => result.push_str(&format!("[Exit Code: {}]", code)),
                None => result.push_str("[Terminated by signal]"),
            }
        }
        result
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{program}' timed out after {}s", timeout.as_secs())]
    TimedOut { program: String, timeout: Duration },

    #[error("I/O error while running '{program}': {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Runs `program args..` in `cwd`, optionally feeding `stdin`.
pub async fn run_process(
    program: &str,
    args: &[String],
    cwd: Option<&Path>,
    stdin: Option<&str>,
    timeout: Duration,
) -> Result<ProcessOutput, ProcessError> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .kill_on_drop(true);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    let mut child = cmd.spawn().map_err(|source| ProcessError::Spawn {
        program: program.to_string(),
        source,
    })?;

    let pipe = child.stdin.take();
    let feed = async move {
        let (Some(input), Some(mut pipe)) = (stdin, pipe) else {
            return Ok(());
        };
        let written = pipe.write_all(input.as_bytes()).await;
        // Close stdin so the child sees EOF
        drop(pipe);
        match written {
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
            other => other,
        }
    };

    tracing::debug!(program, timeout_secs = timeout.as_secs(), "Spawned process");

    // Feeding stdin and waiting share one deadline. Dropping the future on
    // timeout drops the child, which kills it.
    let (fed, waited) = tokio::time::timeout(timeout, async {
        tokio::join!(feed, child.wait_with_output())
    })
    .await
    .map_err(|_| ProcessError::TimedOut {
        program: program.to_string(),
        timeout,
    })?;

    let io_error = |source: std::io::Error| ProcessError::Io {
        program: program.to_string(),
        source,
    };
    let output = waited.map_err(io_error)?;
    fed.map_err(io_error)?;

    Ok(ProcessOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        exit_code: output.status.code(),
        success: output.status.success(),
    })
}

/// Runs a command line through the platform shell.
pub async fn run_shell(command: &str, cwd: &Path, timeout: Duration) -> Result<ProcessOutput> {
    let (shell, flag) = if cfg!(target_os = "windows") {
        ("cmd", "/C")
    } else {
        ("sh", "-c")
    };
    let args = vec![flag.to_string(), command.to_string()];
    run_process(shell, &args, Some(cwd), None, timeout)
        .await
        .with_context(|| format!("Command failed: {}", command))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_run_shell_captures_output() {
        let dir = TempDir::new().unwrap();
        let out = run_shell("echo hello; echo oops >&2; exit 3", dir.path(), Duration::from_secs(10))
            .await
            .unwrap();
        assert!(!out.success);
        assert_eq!(out.exit_code, Some(3));
        let combined = out.combined();
        assert!(combined.contains("hello"));
        assert!(combined.contains("--- STDERR ---\noops"));
        assert!(combined.ends_with("[Exit Code: 3]"));
    }

    #[tokio::test]
    async fn test_stdin_is_forwarded() {
        let out = run_process("cat", &[], None, Some("piped"), Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(out.stdout, "piped");
    }

    #[tokio::test]
    async fn test_timeout() {
        let args = vec!["-c".to_string(), "sleep 5".to_string()];
        let err = run_process("sh", &args, None, None, Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::TimedOut { .. }));
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_timeout_covers_unread_stdin() {
        // Far larger than a pipe buffer, and the child never reads it
        let input = "x".repeat(4 * 1024 * 1024);
        let args = vec!["-c".to_string(), "sleep 30".to_string()];
        let started = std::time::Instant::now();
        let err = run_process("sh", &args, None, Some(&input), Duration::from_millis(500))
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::TimedOut { .. }));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_child_ignoring_stdin_still_succeeds() {
        let input = "x".repeat(1024 * 1024);
        let args = vec!["-c".to_string(), "echo done".to_string()];
        let out = run_process("sh", &args, None, Some(&input), Duration::from_secs(10))
            .await
            .unwrap();
        assert!(out.success);
        assert_eq!(out.stdout.trim(), "done");
    }

    #[tokio::test]
    async fn test_missing_program() {
        let err = run_process("definitely-not-a-binary-xyz", &[], None, None, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::Spawn { .. }));
    }
}
