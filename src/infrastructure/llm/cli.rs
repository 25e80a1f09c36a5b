//! Command-line agent providers (`claude`, `gemini`).
//!
//! The prompt goes to the child's stdin and the answer is read from its JSON
//! output. The timeout is enforced by the process executor; a timed out call
//! surfaces as [`ProviderError::Timeout`] and is never retried on another provider.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::{Duration, Instant};

use super::{CLAUDE_CLI, GEMINI_CLI};
use crate::domain::config::CliProviderConfig;
use crate::domain::error::ProviderError;
use crate::domain::traits::{AgentProvider, AgentRequest, AgentResponse, ProviderKind};
use crate::infrastructure::process::{ProcessError, ProcessOutput, run_process};

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Fields read from the output of one CLI invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct CliOutput {
    pub result: String,
    pub is_error: bool,
    pub session_id: Option<String>,
    pub cost_usd: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ClaudeJson {
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    is_error: bool,
    #[serde(default)]
    subtype: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default, alias = "cost_usd")]
    total_cost_usd: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct GeminiJson {
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    error: Option<GeminiJsonError>,
}

#[derive(Debug, Deserialize)]
struct GeminiJsonError {
    #[serde(default)]
    message: String,
}

/// Parses `claude -p --output-format json`. Non-JSON stdout is taken as the answer.
pub fn parse_claude_output(stdout: &str) -> CliOutput {
    match serde_json::from_str::<ClaudeJson>(stdout.trim()) {
        Ok(json) => {
            let is_error = json.is_error
                || json
                    .subtype
                    .as_deref()
                    .is_some_and(|s| s.starts_with("error"));
            CliOutput {
                result: json
                    .result
                    .unwrap_or_else(|| json.subtype.unwrap_or_default()),
                is_error,
                session_id: json.session_id,
                cost_usd: json.total_cost_usd,
            }
        }
        Err(_) => CliOutput {
            result: stdout.trim().to_string(),
            is_error: false,
            session_id: None,
            cost_usd: None,
        },
    }
}

/// Parses `gemini --output-format json`.
pub fn parse_gemini_output(stdout: &str) -> CliOutput {
    match serde_json::from_str::<GeminiJson>(stdout.trim()) {
        Ok(GeminiJson {
            error: Some(error), ..
        }) => CliOutput {
            result: error.message,
            is_error: true,
            session_id: None,
            cost_usd: None,
        },
        Ok(json) => CliOutput {
            result: json.response.unwrap_or_default(),
            is_error: false,
            session_id: None,
            cost_usd: None,
        },
        Err(_) => CliOutput {
            result: stdout.trim().to_string(),
            is_error: false,
            session_id: None,
            cost_usd: None,
        },
    }
}

fn process_error(provider: &str, error: ProcessError) -> ProviderError {
    match error {
        ProcessError::TimedOut { timeout, .. } => ProviderError::Timeout {
            provider: provider.to_string(),
            timeout,
        },
        other => ProviderError::execution(provider, other.to_string()),
    }
}

/// Turns a finished process into a response or an error carrying its output.
fn finish(
    provider: &str,
    output: ProcessOutput,
    parsed: CliOutput,
    started: Instant,
) -> Result<AgentResponse, ProviderError> {
    if !output.success || parsed.is_error {
        // Error text may be in stderr or in the JSON result
        let mut message = parsed.result;
        if !output.stderr.trim().is_empty() {
            if !message.is_empty() {
                message.push('\n');
            }
            message.push_str(output.stderr.trim());
        }
        if message.is_empty() {
            message = format!("exited with code {:?}", output.exit_code);
        }
        return Err(ProviderError::execution(provider, message));
    }

    Ok(AgentResponse {
        provider: provider.to_string(),
        success: true,
        result: parsed.result,
        cost_usd: parsed.cost_usd,
        duration: started.elapsed(),
        session_id: parsed.session_id,
    })
}

async fn probe(binary: &str) -> bool {
    match run_process(binary, &["--version".to_string()], None, None, PROBE_TIMEOUT).await {
        Ok(out) => out.success,
        Err(e) => {
            tracing::debug!(binary, "Availability probe failed: {}", e);
            false
        }
    }
}

fn effective_timeout(request: &AgentRequest, config: &CliProviderConfig) -> Duration {
    request.timeout.min(Duration::from_secs(config.timeout_secs))
}

/// Claude Code CLI in print mode.
#[derive(Debug, Clone)]
pub struct ClaudeCli {
    config: CliProviderConfig,
}

impl ClaudeCli {
    pub fn new(config: CliProviderConfig) -> Self {
        Self { config }
    }

    fn args(&self, request: &AgentRequest) -> Vec<String> {
        let mut args = vec![
            "-p".to_string(),
            "--output-format".to_string(),
            "json".to_string(),
        ];
        if let Some(model) = request.model.as_ref().or(self.config.model.as_ref()) {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        if let Some(session) = &request.session_id {
            args.push("--resume".to_string());
            args.push(session.clone());
        }
        args.extend(self.config.extra_args.iter().cloned());
        args
    }
}

#[async_trait]
impl AgentProvider for ClaudeCli {
    fn name(&self) -> &str {
        CLAUDE_CLI
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Cli
    }

    async fn is_available(&self) -> bool {
        probe(&self.config.binary).await
    }

    async fn execute(&self, request: &AgentRequest) -> Result<AgentResponse, ProviderError> {
        let started = Instant::now();
        let timeout = effective_timeout(request, &self.config);
        tracing::info!(provider = CLAUDE_CLI, timeout_secs = timeout.as_secs(), "Running agent");

        let output = run_process(
            &self.config.binary,
            &self.args(request),
            request.working_dir.as_deref(),
            Some(request.prompt.as_str()),
            timeout,
        )
        .await
        .map_err(|e| process_error(CLAUDE_CLI, e))?;

        let parsed = parse_claude_output(&output.stdout);
        finish(CLAUDE_CLI, output, parsed, started)
    }
}

/// Gemini CLI in non-interactive mode.
#[derive(Debug, Clone)]
pub struct GeminiCli {
    config: CliProviderConfig,
}

impl GeminiCli {
    pub fn new(config: CliProviderConfig) -> Self {
        Self { config }
    }

    fn args(&self, request: &AgentRequest) -> Vec<String> {
        let mut args = vec!["--output-format".to_string(), "json".to_string()];
        if let Some(model) = request.model.as_ref().or(self.config.model.as_ref()) {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        args.extend(self.config.extra_args.iter().cloned());
        args
    }
}

#[async_trait]
impl AgentProvider for GeminiCli {
    fn name(&self) -> &str {
        GEMINI_CLI
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Cli
    }

    async fn is_available(&self) -> bool {
        probe(&self.config.binary).await
    }

    async fn execute(&self, request: &AgentRequest) -> Result<AgentResponse, ProviderError> {
        let started = Instant::now();
        let timeout = effective_timeout(request, &self.config);
        tracing::info!(provider = GEMINI_CLI, timeout_secs = timeout.as_secs(), "Running agent");

        let output = run_process(
            &self.config.binary,
            &self.args(request),
            request.working_dir.as_deref(),
            Some(request.prompt.as_str()),
            timeout,
        )
        .await
        .map_err(|e| process_error(GEMINI_CLI, e))?;

        let parsed = parse_gemini_output(&output.stdout);
        finish(GEMINI_CLI, output, parsed, started)
    }
}
