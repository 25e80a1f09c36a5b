//! Anthropic Messages API client.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{Completion, TokenUsage, error_message, http_client};
use crate::domain::config::AnthropicConfig;
use crate::domain::error::{ConfigError, ProviderError};

const PROVIDER: &str = "anthropic";
const API_VERSION: &str = "2023-06-01";

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<RequestMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct RequestMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    model: String,
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct AnthropicClient {
    api_key: String,
    endpoint: String,
    model: String,
    max_tokens: u32,
    temperature: Option<f32>,
    timeout: Duration,
}

impl AnthropicClient {
    /// Fails with [`ConfigError::MissingApiKey`] when no key is configured.
    pub fn from_config(config: &AnthropicConfig) -> Result<Self, ConfigError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or(ConfigError::MissingApiKey("ANTHROPIC_API_KEY"))?;

        Ok(Self {
            api_key,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Sends a single user message and returns the joined text blocks.
    pub async fn complete(&self, prompt: &str, model: Option<&str>) -> Result<Completion, ProviderError> {
        let model = model.unwrap_or(&self.model);
        let url = format!("{}/v1/messages", self.endpoint);
        let request = MessagesRequest {
            model,
            max_tokens: self.max_tokens,
            messages: vec![RequestMessage {
                role: "user",
                content: prompt,
            }],
            temperature: self.temperature,
        };

        tracing::debug!(model, prompt_len = prompt.len(), "Calling Anthropic API");

        let response = http_client()
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("Content-Type", "application/json")
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
            return Err(map_status(status, &body));
        }

        let body: MessagesResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::execution(PROVIDER, format!("Failed to parse response: {}", e)))?;
        Ok(into_completion(body))
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

fn map_status(status: u16, body: &str) -> ProviderError {
    let message = error_message(body);
    let provider = PROVIDER.to_string();
    match status {
        401 | 403 => ProviderError::Authentication { provider, message },
        // 529 is "overloaded"; no retry hint in the body
        429 | 529 => ProviderError::RateLimited {
            provider,
            message,
            retry_after: Duration::from_secs(30),
        },
        400 => ProviderError::BadRequest { provider, message },
        _ => ProviderError::Api {
            provider,
            status,
            message,
        },
    }
}

fn into_completion(response: MessagesResponse) -> Completion {
    let text = response
        .content
        .into_iter()
        .filter(|block| block.kind == "text")
        .filter_map(|block| block.text)
        .collect::<Vec<_>>()
        .join("\n");
    let usage = response
        .usage
        .map(|u| TokenUsage {
            prompt_tokens: u.input_tokens,
            completion_tokens: u.output_tokens,
            total_tokens: u.input_tokens + u.output_tokens,
        })
        .unwrap_or_default();

    Completion {
        text,
        model: response.model,
        usage,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_key() {
        let config = AnthropicConfig::default();
        assert!(matches!(
            AnthropicClient::from_config(&config),
            Err(ConfigError::MissingApiKey("ANTHROPIC_API_KEY"))
        ));

        let config = AnthropicConfig {
            api_key: Some("  ".into()),
            ..AnthropicConfig::default()
        };
        assert!(AnthropicClient::from_config(&config).is_err());
    }

    #[test]
    fn test_status_mapping() {
        let body = r#"{"type":"error","error":{"type":"authentication_error","message":"invalid x-api-key"}}"#;
        assert!(matches!(map_status(401, body), ProviderError::Authentication { .. }));
        assert!(map_status(429, "{}").is_rate_limit());
        match map_status(400, r#"{"error":{"type":"invalid_request_error","message":"max_tokens too large"}}"#) {
            ProviderError::BadRequest { message, .. } => assert!(message.contains("max_tokens too large")),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(map_status(500, "boom"), ProviderError::Api { status: 500, .. }));
    }

    #[test]
    fn test_text_blocks_joined() {
        let raw = r#"{
            "id":"msg_1","model":"claude-sonnet-4-20250514","role":"assistant",
            "content":[
                {"type":"text","text":"{\"command\":\"RUN_BUILD\"}"},
                {"type":"tool_use","id":"t1","name":"x","input":{}},
                {"type":"text","text":"done"}
            ],
            "stop_reason":"end_turn",
            "usage":{"input_tokens":10,"output_tokens":5}
        }"#;
        let response: MessagesResponse = serde_json::from_str(raw).unwrap();
        let completion = into_completion(response);
        assert_eq!(completion.text, "{\"command\":\"RUN_BUILD\"}\ndone");
        assert_eq!(completion.usage.total_tokens, 15);
    }
}
