//! # Provider Fallback
//!
//! Selects an available provider, runs the request, and on a recoverable
//! failure (rate limit, quota, capacity, auth) retries once on the next
//! available provider. Interruptions such as timeouts never fall back.

use std::sync::Arc;
use thiserror::Error;

use crate::domain::error::ProviderError;
use crate::domain::traits::{AgentProvider, AgentRequest, AgentResponse};

/// Phrases that mark a failure as worth retrying on another provider.
const RECOVERABLE_PHRASES: &[&str] = &[
    "rate limit",
    "rate_limit",
    "ratelimit",
    "429",
    "too many requests",
    "quota",
    "resource_exhausted",
    "capacity",
    "overloaded",
    "authentication",
    "unauthorized",
    "401",
];

/// Phrases that mark an interruption. These take precedence over the list above.
const NON_RECOVERABLE_PHRASES: &[&str] = &[
    "timeout",
    "timed out",
    "killed",
    "cancelled",
    "canceled",
    "sigterm",
    "interrupted",
];

/// Heuristic: does this error message justify switching providers?
pub fn is_recoverable_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    if NON_RECOVERABLE_PHRASES.iter().any(|p| lower.contains(p)) {
        return false;
    }
    RECOVERABLE_PHRASES.iter().any(|p| lower.contains(p))
}

/// Terminal failures of a fallback-managed call.
#[derive(Debug, Error)]
pub enum FallbackError {
    #[error("no provider is available")]
    NoProviderAvailable,

    #[error("unknown provider '{0}'")]
    UnknownProvider(String),

    #[error("provider '{provider}' failed: {source}")]
    Pinned {
        provider: String,
        #[source]
        source: ProviderError,
    },

    #[error("provider '{provider}' is not available")]
    PinnedUnavailable { provider: String },

    #[error("provider '{provider}' failed (not recoverable): {source}")]
    NonRecoverable {
        provider: String,
        #[source]
        source: ProviderError,
    },

    #[error(
        "all providers failed: {primary}: {primary_error}; {}",
        fallback.as_ref().map(|f| format!("{}: {}", f, fallback_error.as_deref().unwrap_or("unknown error"))).unwrap_or_else(|| "no fallback available".to_string())
    )]
    Exhausted {
        primary: String,
        primary_error: String,
        fallback: Option<String>,
        fallback_error: Option<String>,
    },
}

/// Providers in priority order, built once at startup and passed to callers.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn AgentProvider>>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.names())
            .finish()
    }
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a provider; registration order is fallback order.
    pub fn register(mut self, provider: Arc<dyn AgentProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn AgentProvider>> {
        self.providers.iter().find(|p| p.name() == name).cloned()
    }

    /// First registered provider.
    pub fn primary(&self) -> Option<Arc<dyn AgentProvider>> {
        self.providers.first().cloned()
    }

    /// Provider registered right after `name`, if any.
    pub fn fallback_for(&self, name: &str) -> Option<Arc<dyn AgentProvider>> {
        let pos = self.providers.iter().position(|p| p.name() == name)?;
        self.providers.get(pos + 1).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_string()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Availability of every registered provider, in order.
    pub async fn availability(&self) -> Vec<(String, bool)> {
        let mut out = Vec::with_capacity(self.providers.len());
        for provider in &self.providers {
            out.push((provider.name().to_string(), provider.is_available().await));
        }
        out
    }

    async fn available_after(&self, skip: Option<&str>) -> Option<Arc<dyn AgentProvider>> {
        for provider in &self.providers {
            if Some(provider.name()) == skip {
                continue;
            }
            if provider.is_available().await {
                return Some(provider.clone());
            }
            tracing::debug!(provider = provider.name(), "Provider unavailable, skipping");
        }
        None
    }
}

/// Runs requests through the registry with at most one fallback attempt.
#[derive(Debug, Clone)]
pub struct FallbackExecutor {
    registry: ProviderRegistry,
}

impl FallbackExecutor {
    pub fn new(registry: ProviderRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Executes `request`. With `pinned` set, only that provider is used and
    /// fallback is disabled.
    pub async fn execute(
        &self,
        request: &AgentRequest,
        pinned: Option<&str>,
    ) -> Result<AgentResponse, FallbackError> {
        if let Some(name) = pinned {
            return self.execute_pinned(request, name).await;
        }

        let primary = self
            .registry
            .available_after(None)
            .await
            .ok_or(FallbackError::NoProviderAvailable)?;

        let primary_error = match primary.execute(request).await {
            Ok(response) => return Ok(response),
            Err(e) => e,
        };

        let message = primary_error.to_string();
        if !is_recoverable_error(&message) {
            tracing::error!(provider = primary.name(), error = %message, "Provider failed");
            return Err(FallbackError::NonRecoverable {
                provider: primary.name().to_string(),
                source: primary_error,
            });
        }

        let Some(fallback) = self.registry.available_after(Some(primary.name())).await else {
            return Err(FallbackError::Exhausted {
                primary: primary.name().to_string(),
                primary_error: message,
                fallback: None,
                fallback_error: None,
            });
        };

        tracing::warn!(
            from = primary.name(),
            to = fallback.name(),
            error = %message,
            "Recoverable provider failure, switching to fallback"
        );

        fallback
            .execute(request)
            .await
            .map_err(|fallback_error| FallbackError::Exhausted {
                primary: primary.name().to_string(),
                primary_error: message,
                fallback: Some(fallback.name().to_string()),
                fallback_error: Some(fallback_error.to_string()),
            })
    }

    async fn execute_pinned(
        &self,
        request: &AgentRequest,
        name: &str,
    ) -> Result<AgentResponse, FallbackError> {
        let provider = self
            .registry
            .get(name)
            .ok_or_else(|| FallbackError::UnknownProvider(name.to_string()))?;

        if !provider.is_available().await {
            return Err(FallbackError::PinnedUnavailable {
                provider: name.to_string(),
            });
        }

        provider
            .execute(request)
            .await
            .map_err(|source| FallbackError::Pinned {
                provider: name.to_string(),
                source,
            })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::domain::traits::ProviderKind;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Scripted provider for tests: pops one outcome per call.
    pub(crate) struct MockProvider {
        name: String,
        available: bool,
        outcomes: Mutex<Vec<Result<String, String>>>,
        session_id: Option<String>,
        pub calls: AtomicUsize,
        pub requests: Mutex<Vec<AgentRequest>>,
    }

    impl MockProvider {
        pub(crate) fn new(name: &str, available: bool, outcomes: Vec<Result<&str, &str>>) -> Arc<Self> {
            Self::build(name, available, outcomes, None)
        }

        /// Available provider that reports `session_id` on every response.
        pub(crate) fn with_session(name: &str, outcomes: Vec<Result<&str, &str>>, session_id: &str) -> Arc<Self> {
            Self::build(name, true, outcomes, Some(session_id.to_string()))
        }

        fn build(
            name: &str,
            available: bool,
            outcomes: Vec<Result<&str, &str>>,
            session_id: Option<String>,
        ) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                available,
                outcomes: Mutex::new(
                    outcomes
                        .into_iter()
                        .rev()
                        .map(|o| o.map(str::to_string).map_err(str::to_string))
                        .collect(),
                ),
                session_id,
                calls: AtomicUsize::new(0),
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl AgentProvider for MockProvider {
        fn name(&self) -> &str {
            &self.name
        }

        fn kind(&self) -> ProviderKind {
            ProviderKind::Cli
        }

        async fn is_available(&self) -> bool {
            self.available
        }

        async fn execute(&self, request: &AgentRequest) -> Result<AgentResponse, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.requests.lock().unwrap().push(request.clone());
            let outcome = self
                .outcomes
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err("no scripted outcome".to_string()));
            match outcome {
                Ok(result) => Ok(AgentResponse {
                    provider: self.name.clone(),
                    success: true,
                    result,
                    cost_usd: None,
                    duration: Duration::from_millis(1),
                    session_id: self.session_id.clone(),
                }),
                Err(message) => Err(ProviderError::execution(&self.name, message)),
            }
        }
    }

    fn registry(a: Arc<MockProvider>, b: Arc<MockProvider>) -> ProviderRegistry {
        ProviderRegistry::new().register(a).register(b)
    }

    #[test]
    fn test_registry_order() {
        let a = MockProvider::new("claude-cli", true, vec![]);
        let b = MockProvider::new("gemini-cli", true, vec![]);
        let reg = registry(a, b);
        assert_eq!(reg.primary().unwrap().name(), "claude-cli");
        assert_eq!(reg.fallback_for("claude-cli").unwrap().name(), "gemini-cli");
        assert!(reg.fallback_for("gemini-cli").is_none());
        assert!(reg.get("missing").is_none());
    }

    #[test]
    fn test_recoverable_phrases() {
        // Heuristic patterns; update alongside provider error formats.
        assert!(is_recoverable_error("Rate limit exceeded"));
        assert!(is_recoverable_error("HTTP 429 Too Many Requests"));
        assert!(is_recoverable_error("Quota exceeded for project"));
        assert!(is_recoverable_error("Model is at capacity"));
        assert!(is_recoverable_error("Authentication failed"));
        assert!(is_recoverable_error("401 Unauthorized"));
        assert!(!is_recoverable_error("SyntaxError in generated file"));
    }

    #[test]
    fn test_interruptions_take_precedence() {
        assert!(!is_recoverable_error("rate limit check timed out"));
        assert!(!is_recoverable_error("process killed while waiting on quota"));
        assert!(!is_recoverable_error("Request cancelled: 429"));
        assert!(!is_recoverable_error("Timeout"));
    }

    #[tokio::test]
    async fn test_primary_success_skips_fallback() {
        let a = MockProvider::new("claude-cli", true, vec![Ok("from a")]);
        let b = MockProvider::new("gemini-cli", true, vec![Ok("from b")]);
        let exec = FallbackExecutor::new(registry(a.clone(), b.clone()));

        let res = exec.execute(&AgentRequest::new("hi"), None).await.unwrap();
        assert_eq!(res.result, "from a");
        assert_eq!(b.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_recoverable_failure_falls_back_once() {
        let a = MockProvider::new("claude-cli", true, vec![Err("rate limit exceeded")]);
        let b = MockProvider::new("gemini-cli", true, vec![Ok("from b")]);
        let exec = FallbackExecutor::new(registry(a.clone(), b.clone()));

        let res = exec.execute(&AgentRequest::new("hi"), None).await.unwrap();
        assert_eq!(res.provider, "gemini-cli");
        assert_eq!(a.calls.load(Ordering::SeqCst), 1);
        assert_eq!(b.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_non_recoverable_does_not_fall_back() {
        let a = MockProvider::new("claude-cli", true, vec![Err("request timed out after 600s")]);
        let b = MockProvider::new("gemini-cli", true, vec![Ok("from b")]);
        let exec = FallbackExecutor::new(registry(a, b.clone()));

        let err = exec.execute(&AgentRequest::new("hi"), None).await.unwrap_err();
        assert!(matches!(err, FallbackError::NonRecoverable { ref provider, .. } if provider == "claude-cli"));
        assert_eq!(b.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_both_fail_reports_both() {
        let a = MockProvider::new("claude-cli", true, vec![Err("quota exceeded")]);
        let b = MockProvider::new("gemini-cli", true, vec![Err("overloaded")]);
        let exec = FallbackExecutor::new(registry(a, b.clone()));

        let err = exec.execute(&AgentRequest::new("hi"), None).await.unwrap_err();
        let text = err.to_string();
        assert!(text.contains("claude-cli"));
        assert!(text.contains("quota exceeded"));
        assert!(text.contains("gemini-cli"));
        assert!(text.contains("overloaded"));
        // Exactly two attempts in total
        assert_eq!(b.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unavailable_primary_is_skipped() {
        let a = MockProvider::new("claude-cli", false, vec![Ok("from a")]);
        let b = MockProvider::new("gemini-cli", true, vec![Ok("from b")]);
        let exec = FallbackExecutor::new(registry(a.clone(), b));

        let res = exec.execute(&AgentRequest::new("hi"), None).await.unwrap();
        assert_eq!(res.provider, "gemini-cli");
        assert_eq!(a.calls.load(Ordering::SeqCst), 0);

        let none = FallbackExecutor::new(ProviderRegistry::new());
        assert!(matches!(
            none.execute(&AgentRequest::new("hi"), None).await,
            Err(FallbackError::NoProviderAvailable)
        ));
    }

    #[tokio::test]
    async fn test_pinned_provider_disables_fallback() {
        let a = MockProvider::new("claude-cli", true, vec![Ok("from a")]);
        let b = MockProvider::new("gemini-cli", true, vec![Err("rate limit exceeded")]);
        let exec = FallbackExecutor::new(registry(a.clone(), b));

        let err = exec
            .execute(&AgentRequest::new("hi"), Some("gemini-cli"))
            .await
            .unwrap_err();
        assert!(matches!(err, FallbackError::Pinned { ref provider, .. } if provider == "gemini-cli"));
        assert_eq!(a.calls.load(Ordering::SeqCst), 0);

        assert!(matches!(
            exec.execute(&AgentRequest::new("hi"), Some("nope")).await,
            Err(FallbackError::UnknownProvider(_))
        ));
    }
}
