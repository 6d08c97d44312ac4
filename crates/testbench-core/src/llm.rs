//! Text generation capability.
//!
//! Every "ask the model" step goes through [`TextGenerator::complete`]. The
//! contract is deliberately lossy: any transport, status or decode failure
//! yields an empty string, and callers treat empty as "no answer".

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::LlmConfig;
use crate::domain::{Result, TestbenchError};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// A prompt-in, text-out model backend.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Complete `prompt` under an optional system prompt. Returns `""` on failure.
    async fn complete(&self, prompt: &str, system: Option<&str>) -> String;
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

/// Anthropic Messages API client.
#[derive(Debug, Clone)]
pub struct AnthropicClient {
    http: reqwest::Client,
    config: LlmConfig,
}

impl AnthropicClient {
    pub fn new(config: LlmConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| TestbenchError::Http(e.to_string()))?;
        debug!(model = %config.model, api_key = %config.redacted_key(), "text generation client ready");
        Ok(Self { http, config })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    async fn try_complete(
        &self,
        prompt: &str,
        system: Option<&str>,
    ) -> std::result::Result<String, String> {
        let request = MessagesRequest {
            model: &self.config.model,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            system,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
        };

        let url = format!("{}/v1/messages", self.config.base_url.trim_end_matches('/'));
        let response = self
            .http
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(format!("API error {status}: {text}"));
        }

        let body: MessagesResponse = response
            .json()
            .await
            .map_err(|e| format!("failed to decode response: {e}"))?;

        body.content
            .into_iter()
            .find(|block| block.kind == "text")
            .map(|block| block.text)
            .ok_or_else(|| "no text content in response".to_string())
    }
}

#[async_trait]
impl TextGenerator for AnthropicClient {
    async fn complete(&self, prompt: &str, system: Option<&str>) -> String {
        match self.try_complete(prompt, system).await {
            Ok(text) => text,
            Err(e) => {
                warn!(model = %self.config.model, error = %e, "text generation failed");
                String::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_omits_absent_system_prompt() {
        let request = MessagesRequest {
            model: "m",
            max_tokens: 10,
            temperature: 0.0,
            system: None,
            messages: vec![Message {
                role: "user",
                content: "hi",
            }],
        };
        let value = serde_json::to_value(&request).unwrap();
        assert!(value.get("system").is_none());
        assert_eq!(value["messages"][0]["role"], "user");
        assert_eq!(value["max_tokens"], 10);
    }

    #[test]
    fn response_text_block_decodes() {
        let body: MessagesResponse = serde_json::from_str(
            r#"{"content": [{"type": "text", "text": "hello"}], "stop_reason": "end_turn"}"#,
        )
        .unwrap();
        assert_eq!(body.content[0].text, "hello");
    }

    #[tokio::test]
    async fn unreachable_endpoint_yields_empty_string() {
        let client = AnthropicClient::new(LlmConfig {
            api_key: "test-key".to_string(),
            base_url: "http://127.0.0.1:9".to_string(),
            request_timeout: std::time::Duration::from_secs(2),
            ..LlmConfig::default()
        })
        .unwrap();
        assert_eq!(client.complete("hello", Some("system")).await, "");
    }
}
