//! # Configuration
//!
//! Manages loading of the application's configuration file (`scaffold.yaml`)
//! and the environment overrides layered on top of it.
//! Defines the structs for provider selection, retry tuning, check commands and logging.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "scaffold.yaml";

/// Main application configuration structure.
/// Matches the layout of `scaffold.yaml`; every section is optional.
#[derive(Debug, Default, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub commands: CommandsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
}

/// Which backends exist and in what order they are tried.
#[derive(Debug, Deserialize, Clone)]
pub struct ProvidersConfig {
    /// Name of the provider tried first (e.g. "claude-cli")
    #[serde(default = "default_primary")]
    pub primary: String,
    /// Name of the provider tried after a recoverable failure
    #[serde(default = "default_fallback")]
    pub fallback: Option<String>,
    #[serde(default = "default_claude_cli")]
    pub claude_cli: CliProviderConfig,
    #[serde(default = "default_gemini_cli")]
    pub gemini_cli: CliProviderConfig,
    #[serde(default)]
    pub anthropic: AnthropicConfig,
    #[serde(default)]
    pub gemini: GeminiConfig,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            primary: default_primary(),
            fallback: default_fallback(),
            claude_cli: default_claude_cli(),
            gemini_cli: default_gemini_cli(),
            anthropic: AnthropicConfig::default(),
            gemini: GeminiConfig::default(),
        }
    }
}

fn default_primary() -> String {
    "claude-cli".to_string()
}

fn default_fallback() -> Option<String> {
    Some("gemini-cli".to_string())
}

fn default_claude_cli() -> CliProviderConfig {
    CliProviderConfig {
        binary: "claude".to_string(),
        ..CliProviderConfig::default()
    }
}

fn default_gemini_cli() -> CliProviderConfig {
    CliProviderConfig {
        binary: "gemini".to_string(),
        ..CliProviderConfig::default()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CliProviderConfig {
    #[serde(default)]
    pub binary: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_cli_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub extra_args: Vec<String>,
}

impl Default for CliProviderConfig {
    fn default() -> Self {
        Self {
            binary: String::new(),
            model: None,
            timeout_secs: default_cli_timeout(),
            extra_args: Vec::new(),
        }
    }
}

fn default_cli_timeout() -> u64 {
    // LLM calls are minutes-scale
    600
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnthropicConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_anthropic_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_anthropic_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: default_anthropic_endpoint(),
            model: default_anthropic_model(),
            max_tokens: default_max_tokens(),
            temperature: None,
            timeout_secs: default_http_timeout(),
        }
    }
}

fn default_anthropic_endpoint() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_anthropic_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

fn default_max_tokens() -> u32 {
    8192
}

fn default_http_timeout() -> u64 {
    300
}

#[derive(Debug, Deserialize, Clone)]
pub struct GeminiConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_gemini_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_gemini_model")]
    pub model: String,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_output_tokens: Option<u32>,
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: default_gemini_endpoint(),
            model: default_gemini_model(),
            temperature: None,
            max_output_tokens: None,
            timeout_secs: default_http_timeout(),
        }
    }
}

fn default_gemini_endpoint() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}

fn default_gemini_model() -> String {
    "gemini-2.5-pro".to_string()
}

/// Rate-limit backoff tuning for Gemini.
#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_retry_delay")]
    pub default_delay_secs: u64,
    #[serde(default = "default_retry_buffer")]
    pub buffer_secs: u64,
    #[serde(default = "default_max_retry_delay")]
    pub max_delay_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            default_delay_secs: default_retry_delay(),
            buffer_secs: default_retry_buffer(),
            max_delay_secs: default_max_retry_delay(),
            max_attempts: default_max_attempts(),
        }
    }
}

fn default_retry_delay() -> u64 {
    35
}
fn default_retry_buffer() -> u64 {
    5
}
fn default_max_retry_delay() -> u64 {
    120
}
fn default_max_attempts() -> usize {
    3
}

/// Shell commands run by the check activities.
#[derive(Debug, Deserialize, Clone)]
pub struct CommandsConfig {
    #[serde(default = "default_lint")]
    pub lint: String,
    #[serde(default = "default_test")]
    pub test: String,
    #[serde(default = "default_build")]
    pub build: String,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            lint: default_lint(),
            test: default_test(),
            build: default_build(),
            timeouts: TimeoutConfig::default(),
        }
    }
}

fn default_lint() -> String {
    "npm run lint".to_string()
}
fn default_test() -> String {
    "npm test".to_string()
}
fn default_build() -> String {
    "npm run build".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct TimeoutConfig {
    #[serde(default = "default_timeout")]
    pub default: u64,
    #[serde(default = "default_long_timeout")]
    pub long: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            default: default_timeout(),
            long: default_long_timeout(),
        }
    }
}

fn default_timeout() -> u64 {
    120
}
fn default_long_timeout() -> u64 {
    600
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_dir")]
    pub dir: String,
    #[serde(default)]
    pub filter: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: default_log_dir(),
            filter: None,
        }
    }
}

fn default_log_dir() -> String {
    "data".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RegistryConfig {
    #[serde(default = "default_registry_url")]
    pub url: String,
    #[serde(default = "default_registry_timeout")]
    pub timeout_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            url: default_registry_url(),
            timeout_secs: default_registry_timeout(),
        }
    }
}

fn default_registry_url() -> String {
    "https://registry.npmjs.org".to_string()
}
fn default_registry_timeout() -> u64 {
    15
}

impl AppConfig {
    /// Loads configuration from `path`, or from the default locations when `None`.
    /// A missing file yields defaults; environment overrides are applied last.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let candidate = match path {
            Some(p) => Some(p.to_path_buf()),
            None => Self::default_location(),
        };

        let mut config = match candidate {
            Some(p) if p.exists() => Self::from_file(&p)?,
            Some(p) if path.is_some() => {
                anyhow::bail!("Config file not found: {}", p.display())
            }
            _ => Self::default(),
        };

        config.apply_env_with(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_yaml(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    fn default_location() -> Option<PathBuf> {
        let local = PathBuf::from(DEFAULT_CONFIG_FILE);
        if local.exists() {
            return Some(local);
        }
        dirs::config_dir()
            .map(|d| d.join("scaffold").join("config.yaml"))
            .filter(|p| p.exists())
    }

    /// Applies the documented environment variables using `lookup`.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("ANTHROPIC_API_KEY").filter(|k| !k.is_empty()) {
            self.providers.anthropic.api_key = Some(key);
        }
        if let Some(key) = lookup("GEMINI_API_KEY").filter(|k| !k.is_empty()) {
            self.providers.gemini.api_key = Some(key);
        }
        if let Some(model) = lookup("GEMINI_MODEL").filter(|m| !m.is_empty()) {
            self.providers.gemini.model = model;
        }
        if let Some(v) = lookup("GEMINI_DEFAULT_RETRY_DELAY_SEC") {
            self.retry.default_delay_secs = parse_secs("GEMINI_DEFAULT_RETRY_DELAY_SEC", &v)?;
        }
        if let Some(v) = lookup("GEMINI_RETRY_DELAY_BUFFER_SEC") {
            self.retry.buffer_secs = parse_secs("GEMINI_RETRY_DELAY_BUFFER_SEC", &v)?;
        }
        if let Some(v) = lookup("GEMINI_MAX_RETRY_DELAY_SEC") {
            self.retry.max_delay_secs = parse_secs("GEMINI_MAX_RETRY_DELAY_SEC", &v)?;
        }
        Ok(())
    }
}

fn parse_secs(name: &'static str, value: &str) -> Result<u64> {
    value.trim().parse::<u64>().map_err(|_| {
        crate::domain::error::ConfigError::InvalidValue {
            name,
            value: value.to_string(),
        }
        .into()
    })
}
