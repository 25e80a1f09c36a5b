//! Rate-limit backoff for provider calls
//!
//! This module provides:
//! - Extraction of the provider-suggested delay from Gemini rate-limit errors
//! - The delay computation (suggested or default delay, plus a buffer, capped)
//! - A retry wrapper that only retries rate-limit failures
//!
//! These are string heuristics over provider error bodies; if a provider
//! changes its error format the patterns here need updating.

use regex::Regex;
use std::future::Future;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::time::sleep;

use crate::domain::config::RetryConfig;
use crate::domain::error::ProviderError;

/// Delay settings for Gemini rate limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeminiRetryPolicy {
    pub default_delay_secs: u64,
    pub buffer_secs: u64,
    pub max_delay_secs: u64,
    pub max_attempts: usize,
}

impl Default for GeminiRetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for GeminiRetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            default_delay_secs: config.default_delay_secs,
            buffer_secs: config.buffer_secs,
            max_delay_secs: config.max_delay_secs,
            max_attempts: config.max_attempts.max(1),
        }
    }
}

fn retry_delay_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)"?retry_?delay"?\s*[:=]\s*"?(\d+(?:\.\d+)?)s"#).unwrap()
    })
}

fn retry_in_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)retry in (\d+(?:\.\d+)?)\s*s").unwrap())
}

/// Pulls the provider-suggested delay (in seconds) out of an error message.
pub fn extract_retry_delay(message: &str) -> Option<f64> {
    retry_delay_regex()
        .captures(message)
        .or_else(|| retry_in_regex().captures(message))
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
}

/// Suggested delay (or the default) plus the buffer, capped at the maximum.
pub fn gemini_retry_delay(message: &str, policy: &GeminiRetryPolicy) -> Duration {
    let base = extract_retry_delay(message)
        .map(|secs| secs.ceil() as u64)
        .unwrap_or(policy.default_delay_secs);
    let total = base.saturating_add(policy.buffer_secs).min(policy.max_delay_secs);
    Duration::from_secs(total)
}

/// Retries an operation while it fails with [`ProviderError::RateLimited`].
pub struct RateLimiter {
    max_attempts: usize,
}

impl RateLimiter {
    pub fn new(max_attempts: usize) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn from_policy(policy: &GeminiRetryPolicy) -> Self {
        Self::new(policy.max_attempts)
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Execute an operation, sleeping the error's suggested delay between rate-limited attempts.
    /// Any other error is returned immediately.
    pub async fn execute_with_retry<F, Fut, T>(
        &self,
        operation: F,
        provider_name: &str,
    ) -> Result<T, ProviderError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!(provider = provider_name, attempt, "Request succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(ProviderError::RateLimited {
                    provider,
                    message,
                    retry_after,
                }) if attempt < self.max_attempts => {
                    tracing::warn!(
                        provider = %provider,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_secs = retry_after.as_secs(),
                        "Rate limited: {}",
                        message
                    );
                    sleep(retry_after).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_delay_from_retry_delay_field() {
        let policy = GeminiRetryPolicy::default();
        let msg = r#"{"error":{"code":429,"details":[{"@type":"type.googleapis.com/google.rpc.RetryInfo","retryDelay":"31s"}]}}"#;
        assert_eq!(gemini_retry_delay(msg, &policy), Duration::from_secs(36));
    }

    #[test]
    fn test_delay_default_when_absent() {
        let policy = GeminiRetryPolicy::default();
        assert_eq!(
            gemini_retry_delay("429 RESOURCE_EXHAUSTED", &policy),
            Duration::from_secs(40)
        );
    }

    #[test]
    fn test_huge_delay_saturates_to_cap() {
        let policy = GeminiRetryPolicy::default();
        let huge = format!("\"retryDelay\": \"{}s\"", "9".repeat(40));
        assert_eq!(gemini_retry_delay(&huge, &policy), Duration::from_secs(120));
        assert_eq!(
            gemini_retry_delay("\"retryDelay\": \"18446744073709551615s\"", &policy),
            Duration::from_secs(120)
        );
    }

    #[test]
    fn test_delay_variants_and_cap() {
        assert_eq!(extract_retry_delay("retryDelay: 12.4s"), Some(12.4));
        assert_eq!(extract_retry_delay("Please retry in 7s."), Some(7.0));
        assert_eq!(extract_retry_delay("nothing here"), None);

        let policy = GeminiRetryPolicy {
            max_delay_secs: 60,
            ..GeminiRetryPolicy::default()
        };
        // Fractional seconds round up before the buffer is added
        assert_eq!(gemini_retry_delay("retryDelay: 12.4s", &policy), Duration::from_secs(18));
        assert_eq!(
            gemini_retry_delay(r#""retryDelay":"300s""#, &policy),
            Duration::from_secs(60)
        );
    }

    #[tokio::test]
    async fn test_retries_only_rate_limits() {
        let limiter = RateLimiter::new(3);
        let calls = AtomicUsize::new(0);

        let result = limiter
            .execute_with_retry(
                || async {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Err(ProviderError::RateLimited {
                            provider: "gemini".into(),
                            message: "quota".into(),
                            retry_after: Duration::from_millis(5),
                        })
                    } else {
                        Ok("done")
                    }
                },
                "gemini",
            )
            .await;
        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let calls = AtomicUsize::new(0);
        let result: Result<(), _> = limiter
            .execute_with_retry(
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(ProviderError::BadRequest {
                        provider: "gemini".into(),
                        message: "bad".into(),
                    })
                },
                "gemini",
            )
            .await;
        assert!(matches!(result, Err(ProviderError::BadRequest { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let limiter = RateLimiter::new(2);
        let calls = AtomicUsize::new(0);
        let result: Result<(), _> = limiter
            .execute_with_retry(
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(ProviderError::RateLimited {
                        provider: "gemini".into(),
                        message: "quota".into(),
                        retry_after: Duration::from_millis(5),
                    })
                },
                "gemini",
            )
            .await;
        assert!(result.unwrap_err().is_rate_limit());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
