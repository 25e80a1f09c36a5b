//! # Activities
//!
//! The operations an external workflow orchestrator invokes. Each call is
//! self-contained: it reads what it needs from disk, does one unit of work and
//! reports a serializable result. Retries across calls are the orchestrator's job.

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::application::agent_log::AgentLog;
use crate::application::apply::FileApplier;
use crate::application::fallback::FallbackExecutor;
use crate::application::parsing::parse_hybrid_response;
use crate::application::publish::{self, PackagePublishStatus};
use crate::application::state::GenerationState;
use crate::application::validation::{
    OutputFormat, ValidationIssue, ValidationReport, classify_errors, parse_validation_output,
    persist_report,
};
use crate::domain::config::AppConfig;
use crate::domain::traits::{AgentRequest, AgentResponse, RegistryClient};
use crate::domain::types::{AgentCommand, ApplyResult, FileChange, ParsedResponse};
use crate::infrastructure::process::run_shell;
use crate::strings::prompts::{format_correction_prompt, validate_prompt};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentTurnInput {
    pub package_dir: PathBuf,
    pub workflow_id: String,
    pub task_id: String,
    /// Sequence number of this call within the task, used in the log file name
    #[serde(default)]
    pub seq: u32,
    /// Generation-state session; defaults to the workflow id
    #[serde(default)]
    pub session_id: Option<String>,
    pub prompt: String,
    /// Pin a provider and disable fallback
    #[serde(default)]
    pub provider: Option<String>,
    /// Continue a provider conversation
    #[serde(default)]
    pub agent_session_id: Option<String>,
    #[serde(default = "default_true")]
    pub apply_changes: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentTurnOutput {
    pub provider: String,
    pub command: AgentCommand,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apply_result: Option<ApplyResult>,
    pub warnings: Vec<String>,
    /// A format-correction re-prompt was needed
    pub corrected: bool,
    pub cost_usd: Option<f64>,
    pub agent_session_id: Option<String>,
    pub log_path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckKind {
    Lint,
    Test,
    Build,
}

impl CheckKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckKind::Lint => "lint",
            CheckKind::Test => "test",
            CheckKind::Build => "build",
        }
    }
}

impl std::str::FromStr for CheckKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "lint" => Ok(CheckKind::Lint),
            "test" => Ok(CheckKind::Test),
            "build" => Ok(CheckKind::Build),
            other => Err(format!("unknown check '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckOutcome {
    pub kind: CheckKind,
    pub command: String,
    pub success: bool,
    pub exit_code: Option<i32>,
    pub output: String,
    pub issues: Vec<ValidationIssue>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifyInput {
    pub package_dir: PathBuf,
    pub workflow_id: String,
    pub task_id: String,
    pub output: String,
    #[serde(default)]
    pub format: OutputFormat,
    #[serde(default)]
    pub generated_files: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifyOutput {
    pub report: ValidationReport,
    pub can_bypass_verification: bool,
    pub report_path: PathBuf,
}

/// Built once at worker startup and shared by every activity call.
#[derive(Clone)]
pub struct Activities {
    config: AppConfig,
    executor: FallbackExecutor,
    registry: Arc<dyn RegistryClient>,
}

impl Activities {
    pub fn new(config: AppConfig, executor: FallbackExecutor, registry: Arc<dyn RegistryClient>) -> Self {
        Self {
            config,
            executor,
            registry,
        }
    }

    fn agent_timeout(&self) -> Duration {
        let providers = &self.config.providers;
        let secs = providers
            .claude_cli
            .timeout_secs
            .max(providers.gemini_cli.timeout_secs);
        Duration::from_secs(secs)
    }

    /// Prompts the agent, parses its answer (re-prompting once on a format
    /// error) and applies any file changes it asked for.
    pub async fn execute_agent_turn(&self, input: AgentTurnInput) -> Result<AgentTurnOutput> {
        let root = input.package_dir.as_path();
        let session = input
            .session_id
            .clone()
            .unwrap_or_else(|| input.workflow_id.clone());
        let mut state = GenerationState::load(root, &session).await?;
        let log = AgentLog::new(root, &input.workflow_id, &input.task_id, input.seq);

        let mut warnings: Vec<String> = validate_prompt(&input.prompt)
            .into_iter()
            .map(|issue| format!("Prompt check: {}", issue))
            .collect();
        for warning in &warnings {
            tracing::warn!(task = %input.task_id, "{}", warning);
        }

        let mut request = AgentRequest::new(&input.prompt)
            .in_dir(root)
            .with_timeout(self.agent_timeout());
        if let Some(id) = &input.agent_session_id {
            request = request.with_session(id.clone());
        }

        log.record("-", "request", json!({ "prompt": input.prompt, "pinned": input.provider }))
            .await;
        let response = match self.call(&request, input.provider.as_deref(), &log).await {
            Ok(response) => response,
            Err(e) => {
                state.record_error(format!("{:#}", e));
                state.save(root).await?;
                return Err(e);
            }
        };

        let (response, parsed, corrected) = match parse_hybrid_response(&response.result) {
            Ok(parsed) => (response, parsed, false),
            Err(format_error) => {
                tracing::warn!(
                    provider = %response.provider,
                    error = %format_error,
                    "Response format error, re-prompting with corrections"
                );
                log.record(&response.provider, "format_error", json!({ "error": format_error.to_string() }))
                    .await;

                // Same provider. Without a resumable session the task is repeated.
                let resume = response.session_id.clone();
                let correction = format_correction_prompt(
                    &format_error,
                    &response.result,
                    resume.is_none().then_some(input.prompt.as_str()),
                );
                let mut retry = AgentRequest::new(correction)
                    .in_dir(root)
                    .with_timeout(self.agent_timeout());
                if let Some(id) = resume {
                    retry = retry.with_session(id);
                }
                let second = match self.call(&retry, Some(response.provider.as_str()), &log).await {
                    Ok(r) => r,
                    Err(e) => {
                        state.record_error(format!("{:#}", e));
                        state.save(root).await?;
                        return Err(e);
                    }
                };
                match parse_hybrid_response(&second.result) {
                    Ok(parsed) => (second, parsed, true),
                    Err(e) => {
                        log.record(&second.provider, "format_error", json!({ "error": e.to_string() }))
                            .await;
                        state.record_error(format!("response format error after correction: {}", e));
                        state.save(root).await?;
                        return Err(anyhow!(e).context(format!(
                            "{} returned an unusable response twice",
                            second.provider
                        )));
                    }
                }
            }
        };

        warnings.extend(parsed.warnings.iter().cloned());
        let apply_result = self
            .apply_if_requested(root, &parsed, input.apply_changes, &mut state)
            .await?;
        if let AgentCommand::TaskComplete { .. } = parsed.command {
            state.record_step(format!("task-{}", input.task_id));
        }
        state.save(root).await?;

        tracing::info!(
            provider = %response.provider,
            command = parsed.command.name(),
            corrected,
            "Agent turn finished"
        );

        Ok(AgentTurnOutput {
            provider: response.provider,
            command: parsed.command,
            apply_result,
            warnings,
            corrected,
            cost_usd: response.cost_usd,
            agent_session_id: response.session_id,
            log_path: log.path().to_path_buf(),
        })
    }

    async fn call(
        &self,
        request: &AgentRequest,
        pinned: Option<&str>,
        log: &AgentLog,
    ) -> Result<AgentResponse> {
        match self.executor.execute(request, pinned).await {
            Ok(response) => {
                log.record(
                    &response.provider,
                    "response",
                    json!({
                        "result": response.result,
                        "costUsd": response.cost_usd,
                        "durationMs": response.duration.as_millis() as u64,
                        "sessionId": response.session_id,
                    }),
                )
                .await;
                Ok(response)
            }
            Err(e) => {
                log.record(pinned.unwrap_or("-"), "error", json!({ "error": e.to_string() }))
                    .await;
                Err(anyhow!(e))
            }
        }
    }

    async fn apply_if_requested(
        &self,
        root: &Path,
        parsed: &ParsedResponse,
        enabled: bool,
        state: &mut GenerationState,
    ) -> Result<Option<ApplyResult>> {
        if !enabled || !matches!(parsed.command, AgentCommand::ApplyCodeChanges { .. }) {
            return Ok(None);
        }

        let result = FileApplier::new(root).apply_parsed(parsed).await?;
        state.record_files(result.succeeded().map(str::to_string));
        if !result.failed_operations.is_empty() {
            state.record_error(format!(
                "{} file operation(s) failed: {}",
                result.failed_operations.len(),
                result.failed_paths().join(", ")
            ));
        }
        Ok(Some(result))
    }

    /// Applies already-resolved changes, for callers that parsed the response themselves.
    pub async fn apply_file_changes(&self, package_dir: &Path, changes: &[FileChange]) -> Result<ApplyResult> {
        FileApplier::new(package_dir).apply(changes).await
    }

    /// Runs the configured lint, test or build command in the package.
    pub async fn run_check(&self, package_dir: &Path, kind: CheckKind) -> Result<CheckOutcome> {
        let commands = &self.config.commands;
        let (command, timeout_secs) = match kind {
            CheckKind::Lint => (&commands.lint, commands.timeouts.default),
            CheckKind::Test => (&commands.test, commands.timeouts.long),
            CheckKind::Build => (&commands.build, commands.timeouts.long),
        };

        tracing::info!(check = kind.as_str(), command = %command, "Running check");
        let output = run_shell(command, package_dir, Duration::from_secs(timeout_secs))
            .await
            .with_context(|| format!("{} check could not run", kind.as_str()))?;

        let combined = output.combined();
        let issues = if output.success {
            Vec::new()
        } else {
            parse_validation_output(&combined, OutputFormat::Auto).unwrap_or_default()
        };

        Ok(CheckOutcome {
            kind,
            command: command.clone(),
            success: output.success,
            exit_code: output.exit_code,
            output: combined,
            issues,
        })
    }

    pub async fn check_publish_status(&self, package_dir: &Path, has_changes: bool) -> Result<PackagePublishStatus> {
        publish::check_publish_status(package_dir, self.registry.as_ref(), has_changes).await
    }

    /// Parses validation output, splits agent from external errors and
    /// persists the report next to the package.
    pub async fn classify_validation(&self, input: ClassifyInput) -> Result<ClassifyOutput> {
        let issues = parse_validation_output(&input.output, input.format)?;
        let report = classify_errors(issues, &input.generated_files, &input.package_dir);
        let report_path =
            persist_report(&input.package_dir, &input.workflow_id, &input.task_id, &report).await?;

        Ok(ClassifyOutput {
            can_bypass_verification: report.can_bypass_verification(),
            report,
            report_path,
        })
    }
}
