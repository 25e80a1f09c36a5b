//! # Path Safety
//!
//! Validates LLM-supplied relative paths before anything touches the disk.
//! Rules run in a fixed order and short-circuit; the first four are pure string
//! checks, the last resolves against the package root and is authoritative.

use std::path::{Component, Path, PathBuf};

use crate::domain::error::PathRejection;
use crate::domain::paths::{AGENT_LOG_DIR, GENERATION_STATE_DIR, VALIDATION_ERRORS_DIR};

/// Orchestrator-owned artifact directories, relative to the package root.
const ARTIFACT_DIRS: [&str; 3] = [GENERATION_STATE_DIR, AGENT_LOG_DIR, VALIDATION_ERRORS_DIR];

/// Validates `candidate` against `root` and returns the absolute target path.
pub fn validate_relative_path(root: &Path, candidate: &str) -> Result<PathBuf, PathRejection> {
    // 1. Empty
    if candidate.trim().is_empty() {
        return Err(PathRejection::Empty);
    }

    // 2. Null byte
    if candidate.contains('\0') {
        return Err(PathRejection::NullByte);
    }

    // 3. Absolute (unix root, UNC/backslash root, drive letter)
    if is_absolute_like(candidate) {
        return Err(PathRejection::Absolute);
    }

    // 4. Literal traversal segment
    if candidate.split(['/', '\\']).any(|segment| segment == "..") {
        return Err(PathRejection::Traversal);
    }

    // 5. Resolve and compare
    let normalized = candidate.replace('\\', "/");
    let root_abs = lexical_normalize(&absolutize(root));
    let target = lexical_normalize(&root_abs.join(&normalized));

    if !target.starts_with(&root_abs) {
        return Err(PathRejection::EscapesRoot);
    }

    // Symlinks inside the package may still point elsewhere; compare the
    // deepest existing ancestor with the canonical root.
    if let Ok(canonical_root) = root_abs.canonicalize() {
        if let Some(resolved) = canonicalize_existing_prefix(&target) {
            if !resolved.starts_with(&canonical_root) {
                return Err(PathRejection::EscapesRoot);
            }
        }
    }

    Ok(target)
}

/// Convenience wrapper for callers that only need a yes/no answer.
pub fn is_safe_path(root: &Path, candidate: &str) -> bool {
    validate_relative_path(root, candidate).is_ok()
}

/// Files the agent must never write even inside the package: lockfiles,
/// environment files, key material and the orchestrator's own artifacts.
pub fn is_protected_path(rel: &str) -> bool {
    let lower = rel.to_lowercase().replace('\\', "/");
    let file_name = lower.rsplit('/').next().unwrap_or(&lower);

    if let Some(top) = lower.split('/').find(|s| !s.is_empty() && *s != ".") {
        if ARTIFACT_DIRS
            .iter()
            .filter_map(|dir| dir.split('/').next())
            .any(|artifact_top| artifact_top == top)
        {
            return true;
        }
    }

    if file_name == ".env" || file_name.starts_with(".env.") {
        return true;
    }
    if lower.starts_with(".git/") || lower.contains("/.git/") {
        return true;
    }
    if lower.starts_with("secrets/") || lower.contains("/secrets/") {
        return true;
    }
    if file_name.contains("id_rsa") {
        return true;
    }

    const LOCKFILES: &[&str] = &[
        "package-lock.json",
        "yarn.lock",
        "pnpm-lock.yaml",
        "npm-shrinkwrap.json",
        "bun.lockb",
    ];
    if LOCKFILES.contains(&file_name) {
        return true;
    }

    [".pem", ".key", ".p12", ".pfx"]
        .iter()
        .any(|ext| file_name.ends_with(ext))
}

fn is_absolute_like(candidate: &str) -> bool {
    if candidate.starts_with('/') || candidate.starts_with('\\') {
        return true;
    }
    let bytes = candidate.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

/// Resolves `.` and `..` without touching the filesystem.
fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Canonicalizes the deepest ancestor of `path` that exists and re-appends the rest.
fn canonicalize_existing_prefix(path: &Path) -> Option<PathBuf> {
    let mut current = path.to_path_buf();
    let mut missing = Vec::new();

    loop {
        if current.exists() {
            let mut resolved = current.canonicalize().ok()?;
            for part in missing.iter().rev() {
                resolved.push(part);
            }
            return Some(resolved);
        }
        let name = current.file_name()?.to_owned();
        missing.push(name);
        current = current.parent()?.to_path_buf();
    }
}
