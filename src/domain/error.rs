//! # Error Types
//!
//! Typed errors for the seams callers branch on: configuration, provider
//! calls, response format and path safety. Application glue uses `anyhow`.

use std::time::Duration;
use thiserror::Error;

/// Fatal, non-retryable configuration problems.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing API key: set {0}")]
    MissingApiKey(&'static str),

    #[error("unknown provider '{0}'")]
    UnknownProvider(String),

    #[error("invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
}

/// Errors raised by an LLM provider call.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("[{provider}] authentication failed: {message}")]
    Authentication { provider: String, message: String },

    #[error("[{provider}] rate limit exceeded (retry in {}s): {message}", retry_after.as_secs())]
    RateLimited {
        provider: String,
        message: String,
        retry_after: Duration,
    },

    #[error("[{provider}] bad request: {message}")]
    BadRequest { provider: String, message: String },

    #[error("[{provider}] API error (status {status}): {message}")]
    Api {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("[{provider}] request timed out after {}s", timeout.as_secs())]
    Timeout { provider: String, timeout: Duration },

    #[error("[{provider}] {message}")]
    Execution { provider: String, message: String },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ProviderError {
    pub fn execution(provider: &str, message: impl Into<String>) -> Self {
        ProviderError::Execution {
            provider: provider.to_string(),
            message: message.into(),
        }
    }

    pub fn provider(&self) -> Option<&str> {
        match self {
            ProviderError::Authentication { provider, .. }
            | ProviderError::RateLimited { provider, .. }
            | ProviderError::BadRequest { provider, .. }
            | ProviderError::Api { provider, .. }
            | ProviderError::Timeout { provider, .. }
            | ProviderError::Execution { provider, .. } => Some(provider),
            ProviderError::Config(_) => None,
        }
    }

    pub fn is_rate_limit(&self) -> bool {
        matches!(self, ProviderError::RateLimited { .. })
    }
}

/// The LLM answered, but not in a usable shape. The caller may re-prompt.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResponseFormatError {
    #[error("response is empty")]
    Empty,

    #[error("invalid JSON ({message}) near: {snippet}")]
    InvalidJson { message: String, snippet: String },

    #[error("response JSON is not an object")]
    NotAnObject,

    #[error("response JSON has no string 'command' field")]
    MissingCommand,

    #[error("unrecognized command '{0}'")]
    UnrecognizedCommand(String),

    #[error("invalid payload for {command}: {message}")]
    InvalidPayload { command: String, message: String },
}

impl ResponseFormatError {
    /// One-line instruction telling the model what to fix.
    pub fn correction_hint(&self) -> String {
        match self {
            ResponseFormatError::Empty => {
                "Your response was empty. Reply with the command JSON first.".to_string()
            }
            ResponseFormatError::InvalidJson { .. } => {
                "The command JSON could not be parsed. Emit a single valid JSON object with no markdown fences before the first content break.".to_string()
            }
            ResponseFormatError::NotAnObject => {
                "The command must be a JSON object, not an array or scalar.".to_string()
            }
            ResponseFormatError::MissingCommand => {
                "The JSON object must contain a string \"command\" field.".to_string()
            }
            ResponseFormatError::UnrecognizedCommand(name) => format!(
                "\"{}\" is not a known command. Use exactly one of the listed commands.",
                name
            ),
            ResponseFormatError::InvalidPayload { command, message } => format!(
                "The fields for {} are invalid ({}). Check action names and required fields.",
                command, message
            ),
        }
    }
}

/// Why a candidate path was refused.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum PathRejection {
    #[error("empty path")]
    Empty,

    #[error("unsafe path: contains null byte")]
    NullByte,

    #[error("absolute paths not allowed")]
    Absolute,

    #[error("path traversal detected")]
    Traversal,

    #[error("path escapes package directory")]
    EscapesRoot,
}
