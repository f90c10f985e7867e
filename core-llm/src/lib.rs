// =====================================================================================
// File: core-llm/src/lib.rs
// Description: Language model gateway core for the Sentinel platform
// =====================================================================================

//! # Core LLM Module
//!
//! Single request/response access to an external language model with strict
//! output discipline. The gateway owns the retry policy (exponential backoff
//! with jitter for transient failures, one re-prompt for malformed JSON) and
//! a process-wide semaphore bounding upstream concurrency. Providers are
//! pluggable behind [`LlmProvider`].

pub mod gateway;
pub mod provider;

pub use gateway::{GatewayConfig, LlmGateway};
pub use provider::ChatCompletionProvider;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for LLM operations
pub type LlmResult<T> = Result<T, LlmError>;

/// LLM gateway errors
#[derive(Error, Debug)]
pub enum LlmError {
    /// Credential rejected by the upstream
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Upstream rate limit; transient
    #[error("Rate limit exceeded")]
    RateLimited,

    /// Network failure or upstream 5xx; transient
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// The model returned output that fails shape validation
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Request rejected before dispatch
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The call was cancelled by the evaluation deadline
    #[error("Call cancelled")]
    Cancelled,
}

impl LlmError {
    /// Transient errors are retried with backoff; everything else surfaces
    pub fn is_transient(&self) -> bool {
        matches!(self, LlmError::RateLimited | LlmError::Upstream(_))
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        LlmError::Upstream(err.to_string())
    }
}

/// Requested output discipline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseFormat {
    Text,
    Json,
}

/// One model call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmRequest {
    pub system: Option<String>,
    pub prompt: String,
    pub response_format: ResponseFormat,
    pub max_output_tokens: u32,
    /// Sampling temperature in [0, 1]; evaluation stages pass 0.0
    pub temperature: f64,
}

impl LlmRequest {
    pub fn text(prompt: impl Into<String>) -> Self {
        Self {
            system: None,
            prompt: prompt.into(),
            response_format: ResponseFormat::Text,
            max_output_tokens: 1024,
            temperature: 0.0,
        }
    }

    pub fn json(prompt: impl Into<String>) -> Self {
        Self {
            response_format: ResponseFormat::Json,
            ..Self::text(prompt)
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_output_tokens(mut self, max_output_tokens: u32) -> Self {
        self.max_output_tokens = max_output_tokens;
        self
    }
}

/// Raw model output before gateway validation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmCompletion {
    pub content: String,
    pub model: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// A language model backend
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Execute one completion call
    async fn complete(&self, request: &LlmRequest) -> LlmResult<LlmCompletion>;

    /// Provider name for logging
    fn name(&self) -> &str;

    /// Validate a request before dispatch
    fn validate_request(&self, request: &LlmRequest) -> LlmResult<()> {
        if request.prompt.trim().is_empty() {
            return Err(LlmError::InvalidRequest("prompt cannot be empty".to_string()));
        }
        if !(0.0..=1.0).contains(&request.temperature) {
            return Err(LlmError::InvalidRequest(format!(
                "temperature {} outside [0, 1]",
                request.temperature
            )));
        }
        Ok(())
    }
}
