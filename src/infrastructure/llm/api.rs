//! HTTP API clients exposed as [`AgentProvider`]s.

use async_trait::async_trait;
use std::time::Instant;

use super::anthropic::AnthropicClient;
use super::gemini::GeminiClient;
use super::{ANTHROPIC_API, Completion, GEMINI_API};
use crate::domain::error::ProviderError;
use crate::domain::traits::{AgentProvider, AgentRequest, AgentResponse, ProviderKind};

#[derive(Debug, Clone)]
enum Backend {
    Anthropic(AnthropicClient),
    Gemini(GeminiClient),
}

/// A configured HTTP client. Available whenever it could be constructed,
/// which already required an API key.
#[derive(Debug, Clone)]
pub struct ApiProvider {
    backend: Backend,
}

impl ApiProvider {
    pub fn anthropic(client: AnthropicClient) -> Self {
        Self {
            backend: Backend::Anthropic(client),
        }
    }

    pub fn gemini(client: GeminiClient) -> Self {
        Self {
            backend: Backend::Gemini(client),
        }
    }

    async fn complete(&self, request: &AgentRequest) -> Result<Completion, ProviderError> {
        let model = request.model.as_deref();
        let call = async {
            match &self.backend {
                Backend::Anthropic(client) => client.complete(&request.prompt, model).await,
                Backend::Gemini(client) => client.generate_with_retry(&request.prompt, model).await,
            }
        };

        tokio::time::timeout(request.timeout, call)
            .await
            .map_err(|_| ProviderError::Timeout {
                provider: self.name().to_string(),
                timeout: request.timeout,
            })?
    }
}

#[async_trait]
impl AgentProvider for ApiProvider {
    fn name(&self) -> &str {
        match self.backend {
            Backend::Anthropic(_) => ANTHROPIC_API,
            Backend::Gemini(_) => GEMINI_API,
        }
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Api
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn execute(&self, request: &AgentRequest) -> Result<AgentResponse, ProviderError> {
        let started = Instant::now();
        let completion = self.complete(request).await?;
        tracing::info!(
            provider = self.name(),
            model = %completion.model,
            tokens = completion.usage.total_tokens,
            "API completion finished"
        );

        Ok(AgentResponse {
            provider: self.name().to_string(),
            success: true,
            result: completion.text,
            cost_usd: None,
            duration: started.elapsed(),
            session_id: None,
        })
    }
}
