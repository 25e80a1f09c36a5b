//! # Validation Classification
//!
//! Scrapes compiler, linter and pre-commit output into issues, then splits
//! them into errors inside files the agent generated (the agent must fix them)
//! and errors elsewhere (verification may be bypassed).
//!
//! The patterns below are heuristics over tool output formats. If tsc, ESLint
//! or the hook runner change their output, these need updating.

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::OnceLock;

use crate::domain::paths::validation_errors_path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSource {
    Tsc,
    Eslint,
    Precommit,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationIssue {
    pub source: IssueSource,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub column: Option<u32>,
    /// TS error code or ESLint rule id
    pub code: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub agent_errors: Vec<ValidationIssue>,
    pub external_errors: Vec<ValidationIssue>,
}

impl ValidationReport {
    /// True when every remaining error is outside the agent's files.
    pub fn can_bypass_verification(&self) -> bool {
        self.agent_errors.is_empty() && !self.external_errors.is_empty()
    }

    pub fn is_clean(&self) -> bool {
        self.agent_errors.is_empty() && self.external_errors.is_empty()
    }
}

fn tsc_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(.+?)\((\d+),(\d+)\): error (TS\d+): (.+)$").unwrap())
}

fn colon_location_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*([\w./\\@-]+\.[A-Za-z0-9]+):(\d+)(?::(\d+))?:?\s*(.*)$").unwrap()
    })
}

fn paren_location_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*([\w./\\@-]+\.[A-Za-z0-9]+)\((\d+),(\d+)\):?\s*(.*)$").unwrap()
    })
}

/// `file(line,col): error TSxxxx: message` lines from `tsc --noEmit`.
pub fn parse_tsc_output(output: &str) -> Vec<ValidationIssue> {
    output
        .lines()
        .filter_map(|line| {
            let caps = tsc_regex().captures(line.trim_end())?;
            Some(ValidationIssue {
                source: IssueSource::Tsc,
                file: Some(caps[1].trim().to_string()),
                line: caps[2].parse().ok(),
                column: caps[3].parse().ok(),
                code: Some(caps[4].to_string()),
                message: caps[5].to_string(),
            })
        })
        .collect()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EslintFileResult {
    file_path: String,
    #[serde(default)]
    messages: Vec<EslintMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EslintMessage {
    #[serde(default)]
    line: Option<u32>,
    #[serde(default)]
    column: Option<u32>,
    rule_id: Option<String>,
    severity: u8,
    message: String,
}

/// Errors (severity 2) from `eslint --format json`. Warnings are ignored.
pub fn parse_eslint_json(output: &str) -> Result<Vec<ValidationIssue>> {
    // Runners sometimes print a banner before the JSON array
    let start = output.find('[').context("No ESLint JSON array in output")?;
    let files: Vec<EslintFileResult> =
        serde_json::from_str(&output[start..]).context("Invalid ESLint JSON output")?;

    Ok(files
        .into_iter()
        .flat_map(|file| {
            let path = file.file_path;
            file.messages
                .into_iter()
                .filter(|m| m.severity >= 2)
                .map(move |m| ValidationIssue {
                    source: IssueSource::Eslint,
                    file: Some(path.clone()),
                    line: m.line,
                    column: m.column,
                    code: m.rule_id,
                    message: m.message,
                })
        })
        .collect())
}

/// Scrapes `path:line[:col] message` and `path(line,col) message` locations
/// from free-form hook output. Lines without a location are dropped.
pub fn parse_precommit_output(output: &str) -> Vec<ValidationIssue> {
    output
        .lines()
        .filter_map(|line| {
            if let Some(caps) = tsc_regex().captures(line.trim_end()) {
                return Some(ValidationIssue {
                    source: IssueSource::Precommit,
                    file: Some(caps[1].trim().to_string()),
                    line: caps[2].parse().ok(),
                    column: caps[3].parse().ok(),
                    code: Some(caps[4].to_string()),
                    message: caps[5].to_string(),
                });
            }
            let caps = paren_location_regex()
                .captures(line)
                .or_else(|| colon_location_regex().captures(line))?;
            Some(ValidationIssue {
                source: IssueSource::Precommit,
                file: Some(caps[1].to_string()),
                line: caps.get(2).and_then(|m| m.as_str().parse().ok()),
                column: caps.get(3).and_then(|m| m.as_str().parse().ok()),
                code: None,
                message: caps.get(4).map(|m| m.as_str().trim().to_string()).unwrap_or_default(),
            })
        })
        .collect()
}

/// Which tool produced a block of validation output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Auto,
    Tsc,
    Eslint,
    Precommit,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "tsc" => Ok(Self::Tsc),
            "eslint" => Ok(Self::Eslint),
            "precommit" | "pre-commit" => Ok(Self::Precommit),
            other => Err(format!("unknown output format '{}'", other)),
        }
    }
}

/// Parses `output` as `format`. `Auto` tries ESLint JSON, then tsc, then the
/// generic location scraper.
pub fn parse_validation_output(output: &str, format: OutputFormat) -> Result<Vec<ValidationIssue>> {
    match format {
        OutputFormat::Tsc => Ok(parse_tsc_output(output)),
        OutputFormat::Eslint => parse_eslint_json(output),
        OutputFormat::Precommit => Ok(parse_precommit_output(output)),
        OutputFormat::Auto => {
            if output.contains("\"filePath\"") {
                if let Ok(issues) = parse_eslint_json(output) {
                    return Ok(issues);
                }
            }
            let tsc = parse_tsc_output(output);
            if !tsc.is_empty() {
                return Ok(tsc);
            }
            Ok(parse_precommit_output(output))
        }
    }
}

/// Splits issues by whether their file is one the agent generated.
///
/// Paths are compared relative to `package_root` with `/` separators. An issue
/// without a file cannot be attributed and counts against the agent.
pub fn classify_errors(
    issues: Vec<ValidationIssue>,
    generated_files: &[String],
    package_root: &Path,
) -> ValidationReport {
    let generated: HashSet<String> = generated_files
        .iter()
        .map(|f| relative_key(f, package_root))
        .collect();

    let mut report = ValidationReport::default();
    for issue in issues {
        let is_agent = match &issue.file {
            Some(file) => generated.contains(&relative_key(file, package_root)),
            None => true,
        };
        if is_agent {
            report.agent_errors.push(issue);
        } else {
            report.external_errors.push(issue);
        }
    }

    tracing::debug!(
        agent = report.agent_errors.len(),
        external = report.external_errors.len(),
        "Classified validation errors"
    );
    report
}

fn relative_key(file: &str, package_root: &Path) -> String {
    let unified = file.replace('\\', "/");
    let path = PathBuf::from(&unified);
    let relative = path
        .strip_prefix(package_root)
        .map(|p| p.to_string_lossy().replace('\\', "/"))
        .unwrap_or(unified);
    relative.trim_start_matches("./").to_string()
}

/// Writes the report to `.claude/validation-errors/{workflow}-task-{task}-errors.json`.
pub async fn persist_report(
    package_root: &Path,
    workflow_id: &str,
    task_id: &str,
    report: &ValidationReport,
) -> Result<PathBuf> {
    let path = validation_errors_path(package_root, workflow_id, task_id);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(report)?;
    tokio::fs::write(&path, json)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}
