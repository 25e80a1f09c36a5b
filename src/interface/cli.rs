//! # Command Line
//!
//! Thin wrappers that expose each activity as a subcommand. Every command
//! prints its result as pretty JSON on stdout; logs go to stderr and the log file.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncReadExt;

use crate::application::activities::{Activities, AgentTurnInput, CheckKind, ClassifyInput};
use crate::application::apply::FileApplier;
use crate::application::fallback::FallbackExecutor;
use crate::application::parsing::parse_hybrid_response;
use crate::application::path_safety::{is_protected_path, validate_relative_path};
use crate::application::state::GenerationState;
use crate::application::validation::OutputFormat;
use crate::domain::config::AppConfig;
use crate::infrastructure::llm::build_registry;
use crate::infrastructure::registry::NpmRegistry;
use crate::strings::prompts::{build_task_prompt, validate_prompt};

#[derive(Debug, Parser)]
#[command(name = "scaffold")]
#[command(about = "LLM-driven package scaffolding activities")]
#[command(version)]
pub struct Cli {
    /// Config file (defaults to ./scaffold.yaml, then the user config dir)
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Parse a hybrid response (file or stdin) and print the command and blocks
    Parse {
        /// Response file; reads stdin when omitted
        file: Option<PathBuf>,
    },

    /// Parse a hybrid response and apply its file operations to a package
    Apply {
        /// Package root
        #[arg(long, short)]
        dir: PathBuf,
        /// Normalize line endings and trailing newlines before writing
        #[arg(long)]
        normalize: bool,
        /// Response file; reads stdin when omitted
        file: Option<PathBuf>,
    },

    /// Check candidate paths against a package root
    CheckPath {
        #[arg(long, short)]
        dir: PathBuf,
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Render the task prompt for a package
    Prompt {
        #[arg(long, short)]
        dir: PathBuf,
        #[arg(long)]
        package_name: String,
        /// Task description
        #[arg(long)]
        task: String,
        /// Extra context appended to the prompt
        #[arg(long, default_value = "")]
        context: String,
        /// Generation-state session used to list written files
        #[arg(long)]
        session: Option<String>,
    },

    /// Run one agent turn: prompt, parse, apply
    Run {
        #[arg(long, short)]
        dir: PathBuf,
        #[arg(long)]
        workflow: String,
        #[arg(long)]
        task: String,
        #[arg(long, default_value = "0")]
        seq: u32,
        #[arg(long)]
        session: Option<String>,
        /// Pin a provider and disable fallback
        #[arg(long)]
        provider: Option<String>,
        /// Parse only, do not touch files
        #[arg(long)]
        no_apply: bool,
        /// Prompt file; reads stdin when omitted
        prompt: Option<PathBuf>,
    },

    /// Run the configured lint, test or build command
    Check {
        #[arg(long, short)]
        dir: PathBuf,
        /// lint, test or build
        kind: CheckKind,
    },

    /// Compare the local package version with the registry
    PublishStatus {
        #[arg(long, short)]
        dir: PathBuf,
        /// Package has unpublished changes
        #[arg(long)]
        has_changes: bool,
    },

    /// Split validation output into agent and external errors
    Classify {
        #[arg(long, short)]
        dir: PathBuf,
        #[arg(long)]
        workflow: String,
        #[arg(long)]
        task: String,
        /// auto, tsc, eslint or precommit
        #[arg(long, default_value = "auto")]
        format: OutputFormat,
        /// Files the agent generated (repeatable)
        #[arg(long = "generated")]
        generated: Vec<String>,
        /// Output file; reads stdin when omitted
        file: Option<PathBuf>,
    },

    /// Probe which providers are available
    Providers,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PathCheck {
    path: String,
    safe: bool,
    protected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

#[derive(Debug, Serialize)]
struct ProviderStatus {
    name: String,
    available: bool,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn read_input(file: Option<&Path>) -> Result<String> {
    match file {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display())),
        None => {
            let mut buf = String::new();
            tokio::io::stdin()
                .read_to_string(&mut buf)
                .await
                .context("Failed to read stdin")?;
            Ok(buf)
        }
    }
}

fn activities(config: &AppConfig) -> Result<Activities> {
    let registry = build_registry(config).context("Invalid provider configuration")?;
    Ok(Activities::new(
        config.clone(),
        FallbackExecutor::new(registry),
        Arc::new(NpmRegistry::new(&config.registry)),
    ))
}

pub async fn run(cli: Cli, config: AppConfig) -> Result<()> {
    match cli.command {
        Command::Parse { file } => {
            let text = read_input(file.as_deref()).await?;
            let parsed = parse_hybrid_response(&text)?;
            print_json(&parsed)
        }

        Command::Apply {
            dir,
            normalize,
            file,
        } => {
            let text = read_input(file.as_deref()).await?;
            let parsed = parse_hybrid_response(&text)?;
            let result = FileApplier::new(&dir)
                .with_normalization(normalize)
                .apply_parsed(&parsed)
                .await?;
            print_json(&result)
        }

        Command::CheckPath { dir, paths } => {
            let checks: Vec<PathCheck> = paths
                .into_iter()
                .map(|path| {
                    let verdict = validate_relative_path(&dir, &path);
                    PathCheck {
                        safe: verdict.is_ok(),
                        protected: is_protected_path(&path),
                        reason: verdict.err().map(|e| e.to_string()),
                        path,
                    }
                })
                .collect();
            print_json(&checks)
        }

        Command::Prompt {
            dir,
            package_name,
            task,
            context,
            session,
        } => {
            let files = match session {
                Some(id) => GenerationState::load(&dir, &id).await?.files_written,
                None => Vec::new(),
            };
            let prompt = build_task_prompt(
                &package_name,
                &dir.display().to_string(),
                &task,
                &context,
                &files,
            );
            for issue in validate_prompt(&prompt) {
                tracing::warn!("Prompt check: {}", issue);
            }
            println!("{}", prompt);
            Ok(())
        }

        Command::Run {
            dir,
            workflow,
            task,
            seq,
            session,
            provider,
            no_apply,
            prompt,
        } => {
            let prompt = read_input(prompt.as_deref()).await?;
            let output = activities(&config)?
                .execute_agent_turn(AgentTurnInput {
                    package_dir: dir,
                    workflow_id: workflow,
                    task_id: task,
                    seq,
                    session_id: session,
                    prompt,
                    provider,
                    agent_session_id: None,
                    apply_changes: !no_apply,
                })
                .await?;
            print_json(&output)
        }

        Command::Check { dir, kind } => {
            let outcome = activities(&config)?.run_check(&dir, kind).await?;
            print_json(&outcome)
        }

        Command::PublishStatus { dir, has_changes } => {
            let status = activities(&config)?
                .check_publish_status(&dir, has_changes)
                .await?;
            print_json(&status)
        }

        Command::Classify {
            dir,
            workflow,
            task,
            format,
            generated,
            file,
        } => {
            let output = read_input(file.as_deref()).await?;
            let result = activities(&config)?
                .classify_validation(ClassifyInput {
                    package_dir: dir,
                    workflow_id: workflow,
                    task_id: task,
                    output,
                    format,
                    generated_files: generated,
                })
                .await?;
            print_json(&result)
        }

        Command::Providers => {
            let registry = build_registry(&config).context("Invalid provider configuration")?;
            let statuses: Vec<ProviderStatus> = registry
                .availability()
                .await
                .into_iter()
                .map(|(name, available)| ProviderStatus { name, available })
                .collect();
            print_json(&statuses)
        }
    }
}
