//! Gemini `generateContent` client with rate-limit backoff.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{Completion, TokenUsage, error_message, http_client};
use crate::application::retry::{GeminiRetryPolicy, RateLimiter, gemini_retry_delay};
use crate::domain::config::GeminiConfig;
use crate::domain::error::{ConfigError, ProviderError};

const PROVIDER: &str = "gemini";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<RequestContent<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize)]
struct RequestContent<'a> {
    role: &'a str,
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
    #[serde(default)]
    total_token_count: u32,
}

#[derive(Debug, Clone)]
pub struct GeminiClient {
    api_key: String,
    endpoint: String,
    model: String,
    temperature: Option<f32>,
    max_output_tokens: Option<u32>,
    timeout: Duration,
    policy: GeminiRetryPolicy,
}

impl GeminiClient {
    pub fn from_config(config: &GeminiConfig, policy: GeminiRetryPolicy) -> Result<Self, ConfigError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or(ConfigError::MissingApiKey("GEMINI_API_KEY"))?;

        Ok(Self {
            api_key,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
            timeout: Duration::from_secs(config.timeout_secs),
            policy,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// One `generateContent` call. A 429 carries the computed backoff delay.
    pub async fn generate(&self, prompt: &str, model: Option<&str>) -> Result<Completion, ProviderError> {
        let model = model.unwrap_or(&self.model);
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.endpoint, model
        );
        let generation_config = if self.temperature.is_some() || self.max_output_tokens.is_some() {
            Some(GenerationConfig {
                temperature: self.temperature,
                max_output_tokens: self.max_output_tokens,
            })
        } else {
            None
        };
        let request = GenerateRequest {
            contents: vec![RequestContent {
                role: "user",
                parts: vec![RequestPart { text: prompt }],
            }],
            generation_config,
        };

        tracing::debug!(model, prompt_len = prompt.len(), "Calling Gemini API");

        let response = http_client()
            .post(&url)
            .header("Content-Type", "application/json")
            .header("x-goog-api-key", &self.api_key)
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(map_status(status, &body, &self.policy));
        }

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::execution(PROVIDER, format!("Failed to parse response: {}", e)))?;
        into_completion(body, model)
    }

    /// [`generate`](Self::generate), sleeping through rate limits up to the policy's attempt limit.
    pub async fn generate_with_retry(
        &self,
        prompt: &str,
        model: Option<&str>,
    ) -> Result<Completion, ProviderError> {
        RateLimiter::from_policy(&self.policy)
            .execute_with_retry(|| self.generate(prompt, model), PROVIDER)
            .await
    }

    fn transport_error(&self, e: reqwest::Error) -> ProviderError {
        if e.is_timeout() {
            ProviderError::Timeout {
                provider: PROVIDER.to_string(),
                timeout: self.timeout,
            }
        } else {
            ProviderError::execution(PROVIDER, format!("HTTP request failed: {}", e.without_url()))
        }
    }
}

fn map_status(status: u16, body: &str, policy: &GeminiRetryPolicy) -> ProviderError {
    let provider = PROVIDER.to_string();
    let message = error_message(body);
    match status {
        429 => ProviderError::RateLimited {
            provider,
            // Delay hint lives in the raw body (RetryInfo.retryDelay)
            retry_after: gemini_retry_delay(body, policy),
            message,
        },
        401 | 403 => ProviderError::Authentication { provider, message },
        // Gemini reports a bad key as a 400
        400 if body.contains("API_KEY_INVALID") => ProviderError::Authentication { provider, message },
        400 => ProviderError::BadRequest { provider, message },
        _ => ProviderError::Api {
            provider,
            status,
            message,
        },
    }
}

fn into_completion(response: GenerateResponse, model: &str) -> Result<Completion, ProviderError> {
    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::execution(PROVIDER, "No candidates in response"))?;

    let text = candidate
        .content
        .map(|c| {
            c.parts
                .into_iter()
                .filter_map(|p| p.text)
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default();

    let usage = response
        .usage_metadata
        .map(|u| TokenUsage {
            prompt_tokens: u.prompt_token_count,
            completion_tokens: u.candidates_token_count,
            total_tokens: u.total_token_count,
        })
        .unwrap_or_default();

    Ok(Completion {
        text,
        model: model.to_string(),
        usage,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_key() {
        assert!(matches!(
            GeminiClient::from_config(&GeminiConfig::default(), GeminiRetryPolicy::default()),
            Err(ConfigError::MissingApiKey("GEMINI_API_KEY"))
        ));
    }

    #[test]
    fn test_rate_limit_uses_retry_info() {
        let body = r#"{"error":{"code":429,"message":"Resource has been exhausted","status":"RESOURCE_EXHAUSTED",
            "details":[{"@type":"type.googleapis.com/google.rpc.RetryInfo","retryDelay":"31s"}]}}"#;
        match map_status(429, body, &GeminiRetryPolicy::default()) {
            ProviderError::RateLimited { retry_after, message, .. } => {
                assert_eq!(retry_after, Duration::from_secs(36));
                assert!(message.contains("RESOURCE_EXHAUSTED"));
            }
            other => panic!("unexpected {other:?}"),
        }

        match map_status(429, "{}", &GeminiRetryPolicy::default()) {
            ProviderError::RateLimited { retry_after, .. } => {
                assert_eq!(retry_after, Duration::from_secs(40))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_transport_error_does_not_expose_key() {
        let config = GeminiConfig {
            api_key: Some("SECRET-KEY-123".to_string()),
            endpoint: "http://127.0.0.1:1".to_string(),
            timeout_secs: 5,
            ..GeminiConfig::default()
        };
        let client = GeminiClient::from_config(&config, GeminiRetryPolicy::default()).unwrap();
        let err = client.generate("hi", None).await.unwrap_err();
        let text = err.to_string();
        assert!(text.contains("HTTP request failed"), "{text}");
        assert!(!text.contains("SECRET-KEY-123"), "{text}");
        assert!(!text.contains("127.0.0.1:1/"), "{text}");
    }

    #[test]
    fn test_bad_key_is_authentication() {
        let body = r#"{"error":{"code":400,"message":"API key not valid","status":"INVALID_ARGUMENT","details":[{"reason":"API_KEY_INVALID"}]}}"#;
        let policy = GeminiRetryPolicy::default();
        assert!(matches!(map_status(400, body, &policy), ProviderError::Authentication { .. }));
        assert!(matches!(map_status(400, "{}", &policy), ProviderError::BadRequest { .. }));
        assert!(matches!(map_status(503, "{}", &policy), ProviderError::Api { status: 503, .. }));
    }

    #[test]
    fn test_parts_joined() {
        let raw = r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"a"},{"text":"b"}]},"finishReason":"STOP"}],
            "usageMetadata":{"promptTokenCount":3,"candidatesTokenCount":2,"totalTokenCount":5}}"#;
        let response: GenerateResponse = serde_json::from_str(raw).unwrap();
        let completion = into_completion(response, "gemini-2.5-pro").unwrap();
        assert_eq!(completion.text, "a\nb");
        assert_eq!(completion.usage.total_tokens, 5);

        let empty: GenerateResponse = serde_json::from_str(r#"{"candidates":[]}"#).unwrap();
        assert!(into_completion(empty, "m").is_err());
    }
}
