//! # Hybrid Response Parsing
//!
//! Splits an LLM response into its leading JSON command and the raw file bodies
//! that follow `##---Content-Break-N---##` markers. File bodies never go through
//! JSON string escaping, which is the point of the format.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

use crate::domain::error::ResponseFormatError;
use crate::domain::types::{
    AgentCommand, ContentBlocks, FailedOperation, FileChange, FileOperation, ParsedResponse,
};

const SNIPPET_LEN: usize = 200;

fn delimiter_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"##---Content-Break-(\d+)---##").unwrap())
}

/// Renders the marker that introduces content block `index`.
pub fn content_break(index: u32) -> String {
    format!("##---Content-Break-{}---##", index)
}

/// Parses a raw LLM response into a command plus content blocks.
pub fn parse_hybrid_response(text: &str) -> Result<ParsedResponse, ResponseFormatError> {
    let mut warnings = Vec::new();

    let markers: Vec<(usize, usize, &str)> = delimiter_regex()
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let index = caps.get(1)?;
            Some((whole.start(), whole.end(), index.as_str()))
        })
        .collect();

    let json_part = markers.first().map_or(text, |(start, _, _)| &text[..*start]);

    let mut content_blocks = ContentBlocks::new();
    for (i, (_, body_start, raw_index)) in markers.iter().enumerate() {
        let body_end = markers.get(i + 1).map_or(text.len(), |next| next.0);
        let body = strip_marker_line_breaks(&text[*body_start..body_end]);

        let Ok(index) = raw_index.parse::<u32>() else {
            warnings.push(format!("Ignoring content block with invalid index '{}'", raw_index));
            continue;
        };

        if content_blocks.insert(index, body.to_string()).is_some() {
            tracing::warn!(index, "Duplicate content block index; keeping the last one");
            warnings.push(format!(
                "Duplicate content block {}: last occurrence wins",
                index
            ));
        }
    }

    let (value, repaired) = parse_command_json(json_part)?;
    if repaired {
        warnings.push("Command JSON was malformed and has been repaired".to_string());
    }
    let command = command_from_value(value)?;

    let referenced: Vec<u32> = command
        .file_operations()
        .iter()
        .filter_map(|op| op.index)
        .collect();
    for index in content_blocks.keys() {
        if !referenced.contains(index) {
            warnings.push(format!(
                "Content block {} is not referenced by any file operation",
                index
            ));
        }
    }

    Ok(ParsedResponse {
        command,
        content_blocks,
        warnings,
    })
}

/// Pairs each declared operation with its content block.
/// Non-delete operations without a resolvable block fail on their own.
pub fn resolve_operations(
    files: &[FileOperation],
    blocks: &ContentBlocks,
) -> (Vec<FileChange>, Vec<FailedOperation>) {
    let mut changes = Vec::with_capacity(files.len());
    let mut failures = Vec::new();
    for op in files {
        match resolve_operation(op, blocks) {
            Ok(change) => changes.push(change),
            Err(failure) => failures.push(failure),
        }
    }
    (changes, failures)
}

/// Resolves one operation against the response's content blocks.
pub fn resolve_operation(
    op: &FileOperation,
    blocks: &ContentBlocks,
) -> Result<FileChange, FailedOperation> {
    if !op.action.needs_content() {
        return Ok(FileChange::from_operation(op, None));
    }

    let Some(index) = op.index else {
        return Err(FailedOperation::new(
            &op.path,
            op.action,
            "operation has no content block index",
        ));
    };
    match blocks.get(&index) {
        Some(body) => Ok(FileChange::from_operation(op, Some(body.clone()))),
        None => Err(FailedOperation::new(
            &op.path,
            op.action,
            format!("content block {} not found in response", index),
        )),
    }
}

fn parse_command_json(candidate: &str) -> Result<(Value, bool), ResponseFormatError> {
    let sanitized = sanitize_json_response(candidate);
    let trimmed = sanitized.trim();
    if trimmed.is_empty() {
        return Err(ResponseFormatError::Empty);
    }

    match serde_json::from_str::<Value>(trimmed) {
        Ok(value) => Ok((value, false)),
        Err(original) => {
            let repaired = repair_json(trimmed).ok_or_else(|| ResponseFormatError::InvalidJson {
                message: original.to_string(),
                snippet: snippet(trimmed),
            })?;
            tracing::debug!("Repaired malformed command JSON");
            let value = serde_json::from_str::<Value>(&repaired).map_err(|e| {
                ResponseFormatError::InvalidJson {
                    message: e.to_string(),
                    snippet: snippet(trimmed),
                }
            })?;
            Ok((value, true))
        }
    }
}

fn command_from_value(value: Value) -> Result<AgentCommand, ResponseFormatError> {
    let Some(object) = value.as_object() else {
        return Err(ResponseFormatError::NotAnObject);
    };
    let Some(name) = object.get("command").and_then(Value::as_str) else {
        return Err(ResponseFormatError::MissingCommand);
    };
    if !AgentCommand::NAMES.contains(&name) {
        return Err(ResponseFormatError::UnrecognizedCommand(name.to_string()));
    }

    let name = name.to_string();
    serde_json::from_value::<AgentCommand>(value).map_err(|e| ResponseFormatError::InvalidPayload {
        command: name,
        message: e.to_string(),
    })
}

/// Drops the line break that belongs to the marker line itself and the one
/// that precedes the next marker. The body in between is kept verbatim.
fn strip_marker_line_breaks(body: &str) -> &str {
    let body = body
        .strip_prefix("\r\n")
        .or_else(|| body.strip_prefix('\n'))
        .unwrap_or(body);
    body.strip_suffix("\r\n")
        .or_else(|| body.strip_suffix('\n'))
        .unwrap_or(body)
}

fn snippet(text: &str) -> String {
    text.chars().take(SNIPPET_LEN).collect()
}

/// Removes one surrounding markdown code fence if what it wraps is valid JSON.
/// Always returns a string; falls back to the input unchanged.
pub fn sanitize_json_response(text: &str) -> String {
    match strip_code_fence(text) {
        Some(inner) if serde_json::from_str::<Value>(inner).is_ok() => inner.to_string(),
        _ => text.to_string(),
    }
}

fn strip_code_fence(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    let rest = trimmed.strip_prefix("```")?;
    // Skip the info string (e.g. "json")
    let body_start = rest.find('\n')?;
    let body = &rest[body_start + 1..];
    let body = body.trim_end();
    let body = body.strip_suffix("```").unwrap_or(body);
    Some(body.trim())
}

/// Best-effort healing of truncated or sloppy JSON objects.
///
/// Starts at the first `{`, drops trailing commas, closes an unterminated
/// string, balances brackets and discards anything after the top-level object.
/// Returns `None` unless the result parses.
pub fn repair_json(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let source = &text[start..];

    let mut out = String::with_capacity(source.len() + 8);
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for ch in source.chars() {
        if in_string {
            out.push(ch);
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        match ch {
            '"' => {
                in_string = true;
                out.push(ch);
            }
            '{' => {
                stack.push('}');
                out.push(ch);
            }
            '[' => {
                stack.push(']');
                out.push(ch);
            }
            '}' | ']' => {
                if !stack.contains(&ch) {
                    // Stray closer
                    continue;
                }
                while let Some(expected) = stack.pop() {
                    trim_dangling(&mut out);
                    out.push(expected);
                    if expected == ch {
                        break;
                    }
                }
                if stack.is_empty() {
                    break;
                }
            }
            _ => out.push(ch),
        }
    }

    if in_string {
        if escaped {
            out.pop();
        }
        out.push('"');
    }
    while let Some(closer) = stack.pop() {
        trim_dangling(&mut out);
        out.push(closer);
    }

    serde_json::from_str::<Value>(&out).ok().map(|_| out)
}

/// Cleans up what precedes a closer: trailing whitespace, a dangling comma,
/// or a key with no value.
fn trim_dangling(out: &mut String) {
    let trimmed_len = out.trim_end().len();
    out.truncate(trimmed_len);
    if out.ends_with(',') {
        out.pop();
    } else if out.ends_with(':') {
        out.push_str("null");
    }
}
