use crate::application::parsing::content_break;
use crate::domain::error::ResponseFormatError;
use crate::domain::types::FailedOperation;

/// A builder for rendering prompts with context.
pub struct PromptRenderer<'a> {
    template: &'a str,
    replacements: Vec<(&'a str, String)>,
}

impl<'a> PromptRenderer<'a> {
    pub fn new(template: &'a str) -> Self {
        Self {
            template,
            replacements: Vec::new(),
        }
    }

    pub fn set(mut self, key: &'a str, value: impl Into<String>) -> Self {
        self.replacements.push((key, value.into()));
        self
    }

    pub fn render(self) -> String {
        let mut result = self.template.to_string();
        for (key, value) in self.replacements {
            result = result.replace(key, &value);
        }

        if let Some(placeholder) = unreplaced_placeholders(&result).into_iter().next() {
            tracing::error!("Unreplaced placeholder in rendered prompt: {}", placeholder);
        }

        result
    }
}

pub const PROTOCOL_TEMPLATE: &str = include_str!("../../prompts/protocol.md");
pub const TASK_TEMPLATE: &str = include_str!("../../prompts/task.md");
pub const CORRECTION_TEMPLATE: &str = include_str!("../../prompts/correction.md");
pub const FILE_RETRY_TEMPLATE: &str = include_str!("../../prompts/file_retry.md");

pub const TASK_HEADING: &str = "## Task";
pub const RESPONSE_FORMAT_HEADING: &str = "## Response Format";

/// Characters of the previous response echoed back in a correction prompt.
const PREVIOUS_EXCERPT_LEN: usize = 500;

/// Describes the hybrid JSON + content-block response format.
pub fn hybrid_protocol_instructions() -> String {
    PromptRenderer::new(PROTOCOL_TEMPLATE)
        .set("{{MARKER}}", content_break(0).replace('0', "N"))
        .set("{{EXAMPLE_MARKER}}", content_break(1))
        .render()
}

pub fn build_task_prompt(
    package_name: &str,
    package_dir: &str,
    task: &str,
    context: &str,
    files_written: &[String],
) -> String {
    let files = if files_written.is_empty() {
        "(none yet)".to_string()
    } else {
        files_written
            .iter()
            .map(|f| format!("- {}", f))
            .collect::<Vec<_>>()
            .join("\n")
    };
    let context = if context.trim().is_empty() {
        "(no additional context)"
    } else {
        context
    };

    PromptRenderer::new(TASK_TEMPLATE)
        .set("{{PACKAGE_NAME}}", package_name)
        .set("{{PACKAGE_DIR}}", package_dir)
        .set("{{TASK}}", task.trim())
        .set("{{CONTEXT}}", context)
        .set("{{FILES}}", files)
        .set("{{PROTOCOL}}", hybrid_protocol_instructions())
        .render()
}

/// Re-prompt after a response that could not be parsed.
///
/// `task` repeats the original prompt for providers that cannot resume a session.
pub fn format_correction_prompt(
    error: &ResponseFormatError,
    previous: &str,
    task: Option<&str>,
) -> String {
    let excerpt: String = previous.chars().take(PREVIOUS_EXCERPT_LEN).collect();
    // Keep the echoed text from closing the fence early
    let excerpt = excerpt.replace("```", "'''");
    let task_section = match task {
        Some(task) => format!("\n## Original Task\n\n{}\n", task.trim()),
        None => String::new(),
    };

    PromptRenderer::new(CORRECTION_TEMPLATE)
        .set("{{ERROR}}", error.to_string())
        .set("{{HINT}}", error.correction_hint())
        .set("{{PREVIOUS}}", excerpt)
        .set("{{PROTOCOL}}", hybrid_protocol_instructions())
        // Last, so text inside the task is never substituted
        .set("{{TASK_SECTION}}", task_section)
        .render()
}

/// Asks the model to redo only the operations that failed to apply.
pub fn file_retry_prompt(failed: &[FailedOperation]) -> String {
    let failures = failed
        .iter()
        .map(|f| format!("- `{}` ({}): {}", f.path, f.operation, f.error))
        .collect::<Vec<_>>()
        .join("\n");

    PromptRenderer::new(FILE_RETRY_TEMPLATE)
        .set("{{FAILURES}}", failures)
        .set("{{PROTOCOL}}", hybrid_protocol_instructions())
        .render()
}

/// Structural problems in a task prompt. Empty means the prompt is usable.
pub fn validate_prompt(prompt: &str) -> Vec<String> {
    if prompt.trim().is_empty() {
        return vec!["prompt is empty".to_string()];
    }

    let mut issues = Vec::new();
    if !has_heading(prompt, TASK_HEADING) {
        issues.push(format!("missing '{}' section", TASK_HEADING));
    }
    if !has_heading(prompt, RESPONSE_FORMAT_HEADING) {
        issues.push(format!("missing '{}' section", RESPONSE_FORMAT_HEADING));
    }
    for placeholder in unreplaced_placeholders(prompt) {
        issues.push(format!("unreplaced placeholder {}", placeholder));
    }
    issues
}

fn has_heading(prompt: &str, heading: &str) -> bool {
    prompt.lines().any(|line| line.trim_end() == heading)
}

/// `{{UPPER_CASE}}` tokens still present in `text`.
fn unreplaced_placeholders(text: &str) -> Vec<&str> {
    let mut found = Vec::new();
    let mut rest = text;
    let mut offset = 0;
    while let Some(start) = rest.find("{{") {
        let Some(len) = rest[start + 2..].find("}}") else {
            break;
        };
        let name = &rest[start + 2..start + 2 + len];
        if !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
        {
            found.push(&text[offset + start..offset + start + len + 4]);
        }
        let advance = start + 2;
        offset += advance;
        rest = &rest[advance..];
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::FileAction;

    #[test]
    fn test_protocol_instructions_render_markers() {
        let text = hybrid_protocol_instructions();
        assert!(text.contains("##---Content-Break-N---##"));
        assert!(text.contains("##---Content-Break-1---##"));
        assert!(text.contains("APPLY_CODE_CHANGES"));
        assert!(text.contains("AWAIT_DEPENDENCY"));
        assert!(!text.contains("{{"));
    }

    #[test]
    fn test_task_prompt_is_valid() {
        let prompt = build_task_prompt(
            "@acme/ui",
            "/work/ui",
            "Create a Button component",
            "",
            &["package.json".to_string()],
        );
        assert!(prompt.contains("Create a Button component"));
        assert!(prompt.contains("- package.json"));
        assert!(validate_prompt(&prompt).is_empty(), "{:?}", validate_prompt(&prompt));
    }

    #[test]
    fn test_validate_prompt_issues() {
        assert_eq!(validate_prompt("   "), vec!["prompt is empty"]);

        let issues = validate_prompt("Do something with {{NAME}}");
        assert!(issues.iter().any(|i| i.contains("## Task")));
        assert!(issues.iter().any(|i| i.contains("## Response Format")));
        assert!(issues.iter().any(|i| i.contains("{{NAME}}")));

        // Lowercase braces are template-like code, not placeholders
        let ok = "## Task\nrender {{ value }}\n## Response Format\n";
        assert!(validate_prompt(ok).is_empty());
    }

    #[test]
    fn test_correction_prompt_includes_error_and_hint() {
        let err = ResponseFormatError::UnrecognizedCommand("WRITE_FILES".into());
        let prompt = format_correction_prompt(&err, "```json\n{\"command\":\"WRITE_FILES\"}\n```", None);
        assert!(prompt.contains("unrecognized command 'WRITE_FILES'"));
        assert!(prompt.contains("not a known command"));
        assert!(prompt.contains("'''json"));
        assert!(prompt.contains(RESPONSE_FORMAT_HEADING));
        assert!(!prompt.contains("## Original Task"));
        assert!(!prompt.contains("{{"));
    }

    #[test]
    fn test_correction_prompt_repeats_task_without_session() {
        let err = ResponseFormatError::Empty;
        let prompt = format_correction_prompt(&err, "sorry", Some("Create a Button component\n"));
        assert!(prompt.contains("## Original Task\n\nCreate a Button component"));
        assert!(!prompt.contains("{{"));
    }

    #[test]
    fn test_file_retry_prompt_lists_failures() {
        let failed = vec![FailedOperation::new(
            "../evil.ts",
            FileAction::Create,
            "path traversal detected",
        )];
        let prompt = file_retry_prompt(&failed);
        assert!(prompt.contains("`../evil.ts`"));
        assert!(prompt.contains("path traversal detected"));
    }
}
