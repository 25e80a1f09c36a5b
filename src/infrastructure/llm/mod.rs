//! # LLM Providers
//!
//! Concrete [`AgentProvider`]s: the Claude and Gemini command-line agents, and
//! the Anthropic and Gemini HTTP APIs. [`build_registry`] turns the provider
//! section of the configuration into an ordered [`ProviderRegistry`].

pub mod anthropic;
pub mod api;
pub mod cli;
pub mod gemini;

use reqwest::Client;
use serde::Serialize;
use std::sync::{Arc, OnceLock};

use crate::application::fallback::ProviderRegistry;
use crate::application::retry::GeminiRetryPolicy;
use crate::domain::config::AppConfig;
use crate::domain::error::ConfigError;
use crate::domain::traits::AgentProvider;

pub const CLAUDE_CLI: &str = "claude-cli";
pub const GEMINI_CLI: &str = "gemini-cli";
pub const ANTHROPIC_API: &str = "anthropic";
pub const GEMINI_API: &str = "gemini";

/// HTTP client reused across requests. Timeouts are set per request.
pub(crate) fn http_client() -> &'static Client {
    static CLIENT: OnceLock<Client> = OnceLock::new();
    CLIENT.get_or_init(|| {
        Client::builder()
            .user_agent(concat!("scaffold/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| Client::new())
    })
}

/// Token accounting reported by the HTTP APIs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Text returned by one HTTP completion.
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub model: String,
    pub usage: TokenUsage,
}

/// Pulls `error.message` (and `error.type` / `error.status` when present) out of a JSON error body.
pub(crate) fn error_message(body: &str) -> String {
    let Ok(json) = serde_json::from_str::<serde_json::Value>(body) else {
        return body.trim().to_string();
    };
    let Some(error) = json.get("error") else {
        return body.trim().to_string();
    };
    let message = error
        .get("message")
        .and_then(|m| m.as_str())
        .unwrap_or_else(|| error.as_str().unwrap_or(""));
    let kind = error
        .get("type")
        .or_else(|| error.get("status"))
        .and_then(|t| t.as_str());
    match kind {
        Some(kind) if !message.is_empty() => format!("{}: {}", kind, message),
        _ if !message.is_empty() => message.to_string(),
        _ => body.trim().to_string(),
    }
}

/// Instantiates one provider by registry name.
pub fn build_provider(name: &str, config: &AppConfig) -> Result<Arc<dyn AgentProvider>, ConfigError> {
    let providers = &config.providers;
    let provider: Arc<dyn AgentProvider> = match name {
        CLAUDE_CLI => Arc::new(cli::ClaudeCli::new(providers.claude_cli.clone())),
        GEMINI_CLI => Arc::new(cli::GeminiCli::new(providers.gemini_cli.clone())),
        ANTHROPIC_API => Arc::new(api::ApiProvider::anthropic(
            anthropic::AnthropicClient::from_config(&providers.anthropic)?,
        )),
        GEMINI_API => Arc::new(api::ApiProvider::gemini(gemini::GeminiClient::from_config(
            &providers.gemini,
            GeminiRetryPolicy::from(&config.retry),
        )?)),
        other => return Err(ConfigError::UnknownProvider(other.to_string())),
    };
    Ok(provider)
}

/// Primary first, then the fallback if one is configured and differs.
pub fn build_registry(config: &AppConfig) -> Result<ProviderRegistry, ConfigError> {
    let primary = config.providers.primary.as_str();
    let mut registry = ProviderRegistry::new().register(build_provider(primary, config)?);

    if let Some(fallback) = config.providers.fallback.as_deref() {
        if fallback != primary {
            registry = registry.register(build_provider(fallback, config)?);
        }
    }

    tracing::debug!(providers = ?registry.names(), "Provider registry built");
    Ok(registry)
}
