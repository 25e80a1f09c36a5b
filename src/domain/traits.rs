//! # Domain Traits
//!
//! Abstract interfaces for the external collaborators (LLM backends, package registry).
//! Allows for pluggable implementations in the Infrastructure layer and mocks in tests.

use async_trait::async_trait;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::domain::error::ProviderError;

/// One prompt sent to a provider.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub prompt: String,
    pub working_dir: Option<PathBuf>,
    /// Session to continue, for providers that support conversational follow-ups
    pub session_id: Option<String>,
    pub timeout: Duration,
    pub model: Option<String>,
}

impl AgentRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            working_dir: None,
            session_id: None,
            timeout: Duration::from_secs(600),
            model: None,
        }
    }

    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// What a provider returned for one request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentResponse {
    pub provider: String,
    pub success: bool,
    pub result: String,
    pub cost_usd: Option<f64>,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
    pub session_id: Option<String>,
}

mod duration_ms {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}

/// How a provider reaches its model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Cli,
    Api,
}

/// Abstract interface for an LLM backend (CLI or HTTP)
#[async_trait]
pub trait AgentProvider: Send + Sync {
    /// Registry name, e.g. "claude-cli" or "gemini"
    fn name(&self) -> &str;

    fn kind(&self) -> ProviderKind;

    /// Lightweight presence probe run before selection
    async fn is_available(&self) -> bool;

    /// Execute one prompt
    async fn execute(&self, request: &AgentRequest) -> Result<AgentResponse, ProviderError>;
}

/// Abstract interface for a package registry lookup
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Latest published version, or `None` if the package was never published
    async fn published_version(&self, package_name: &str) -> anyhow::Result<Option<String>>;
}
