// =====================================================================================
// File: core-llm/src/provider.rs
// Description: OpenAI-compatible chat completion provider
// =====================================================================================

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, instrument};

use crate::{LlmCompletion, LlmError, LlmProvider, LlmRequest, LlmResult, ResponseFormat};

/// Chat-completion provider for any OpenAI-compatible endpoint
pub struct ChatCompletionProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl ChatCompletionProvider {
    pub fn new(
        base_url: String,
        api_key: String,
        model: String,
        timeout_seconds: u64,
    ) -> LlmResult<Self> {
        if api_key.is_empty() {
            return Err(LlmError::AuthenticationFailed(
                "API key is empty".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .map_err(|e| LlmError::Upstream(e.to_string()))?;

        Ok(Self {
            client,
            api_key,
            base_url,
            model,
        })
    }
}

#[async_trait]
impl LlmProvider for ChatCompletionProvider {
    #[instrument(skip(self, request), fields(model = %self.model))]
    async fn complete(&self, request: &LlmRequest) -> LlmResult<LlmCompletion> {
        self.validate_request(request)?;

        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &request.system {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: system.clone(),
            });
        }
        messages.push(ChatMessage {
            role: "user".to_string(),
            content: request.prompt.clone(),
        });

        let chat_request = ChatRequest {
            model: self.model.clone(),
            messages,
            max_tokens: Some(request.max_output_tokens),
            temperature: Some(request.temperature as f32),
            response_format: match request.response_format {
                ResponseFormat::Json => Some(ChatResponseFormat {
                    format_type: "json_object".to_string(),
                }),
                ResponseFormat::Text => None,
            },
        };

        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&chat_request)
            .send()
            .await
            .map_err(|e| LlmError::Upstream(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("Chat completion error: {} - {}", status, error_text);

            return match status.as_u16() {
                401 => Err(LlmError::AuthenticationFailed("Invalid API key".to_string())),
                429 => Err(LlmError::RateLimited),
                _ => Err(LlmError::Upstream(format!("HTTP {}: {}", status, error_text))),
            };
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(format!("JSON parsing error: {}", e)))?;

        let content = chat_response
            .choices
            .first()
            .and_then(|choice| choice.message.content.as_ref())
            .ok_or_else(|| LlmError::InvalidResponse("No content in response".to_string()))?
            .clone();

        let usage = chat_response.usage.unwrap_or_default();

        Ok(LlmCompletion {
            content,
            model: chat_response.model.unwrap_or_else(|| self.model.clone()),
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
        })
    }

    fn name(&self) -> &str {
        "chat-completion"
    }
}

/// Chat request structure
#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ChatResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ChatResponseFormat {
    #[serde(rename = "type")]
    format_type: String,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

/// Chat response structure
#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
    #[allow(dead_code)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[allow(dead_code)]
    role: String,
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChatUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    #[allow(dead_code)]
    total_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_creation() {
        let provider = ChatCompletionProvider::new(
            "https://api.openai.com/v1".to_string(),
            "test-key".to_string(),
            "gpt-4o-mini".to_string(),
            60,
        );
        assert!(provider.is_ok());
        assert_eq!(provider.unwrap().name(), "chat-completion");
    }

    #[test]
    fn test_provider_empty_key_rejected() {
        let provider = ChatCompletionProvider::new(
            "https://api.openai.com/v1".to_string(),
            "".to_string(),
            "gpt-4o-mini".to_string(),
            60,
        );
        assert!(matches!(provider, Err(LlmError::AuthenticationFailed(_))));
    }

    #[test]
    fn test_json_mode_serialization() {
        let request = ChatRequest {
            model: "gpt-4o-mini".to_string(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: "hello".to_string(),
            }],
            max_tokens: Some(100),
            temperature: Some(0.0),
            response_format: Some(ChatResponseFormat {
                format_type: "json_object".to_string(),
            }),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["response_format"]["type"], "json_object");

        let text_request = ChatRequest {
            response_format: None,
            ..request
        };
        let json = serde_json::to_value(&text_request).unwrap();
        assert!(json.get("response_format").is_none());
    }
}
