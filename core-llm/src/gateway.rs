// =====================================================================================
// File: core-llm/src/gateway.rs
// Description: LLM gateway with retry, re-prompt, and concurrency bounding
// =====================================================================================

use rand::Rng;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::{LlmError, LlmProvider, LlmRequest, LlmResult, ResponseFormat};

/// Terse suffix appended on the single re-prompt after malformed JSON
const REPROMPT_SUFFIX: &str =
    "\n\nReturn only valid JSON matching the requested shape. No prose, no markdown fences.";

/// Gateway retry policy
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Attempts for transient transport failures
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub backoff_multiplier: f64,
    /// Symmetric jitter fraction applied to each backoff
    pub jitter: f64,
    /// Process-wide concurrent call bound
    pub global_concurrency: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff_ms: 500,
            backoff_multiplier: 2.0,
            jitter: 0.2,
            global_concurrency: 64,
        }
    }
}

/// Gateway in front of a model provider. All pipeline stages call through
/// here; the semaphore bounds upstream concurrency process-wide, callers add
/// their own per-evaluation bound on top.
pub struct LlmGateway {
    provider: Arc<dyn LlmProvider>,
    semaphore: Arc<Semaphore>,
    config: GatewayConfig,
}

impl LlmGateway {
    pub fn new(provider: Arc<dyn LlmProvider>, config: GatewayConfig) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.global_concurrency.max(1)));
        Self {
            provider,
            semaphore,
            config,
        }
    }

    /// Text completion with transient-failure retry
    pub async fn complete_text(&self, request: &LlmRequest) -> LlmResult<String> {
        let completion = self.call_with_retry(request).await?;
        Ok(completion)
    }

    /// JSON completion: transient-failure retry plus shape validation with a
    /// single corrective re-prompt. The returned value is always a JSON
    /// object.
    pub async fn complete_json(&self, request: &LlmRequest) -> LlmResult<Value> {
        let mut request = request.clone();
        request.response_format = ResponseFormat::Json;

        let first = self.call_with_retry(&request).await?;
        match Self::parse_json_object(&first) {
            Ok(value) => Ok(value),
            Err(parse_err) => {
                warn!(error = %parse_err, "Malformed JSON from model; re-prompting once");
                let mut reprompt = request.clone();
                reprompt.prompt.push_str(REPROMPT_SUFFIX);
                let second = self.call_with_retry(&reprompt).await?;
                Self::parse_json_object(&second)
            }
        }
    }

    async fn call_with_retry(&self, request: &LlmRequest) -> LlmResult<String> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| LlmError::Cancelled)?;

        let mut backoff_ms = self.config.base_backoff_ms as f64;
        let mut last_err: Option<LlmError> = None;

        for attempt in 1..=self.config.max_attempts {
            match self.provider.complete(request).await {
                Ok(completion) => {
                    debug!(
                        provider = self.provider.name(),
                        attempt,
                        completion_tokens = completion.completion_tokens,
                        "LLM call completed"
                    );
                    return Ok(completion.content);
                }
                Err(e) if e.is_transient() && attempt < self.config.max_attempts => {
                    let jitter_factor = {
                        let mut rng = rand::thread_rng();
                        1.0 + rng.gen_range(-self.config.jitter..=self.config.jitter)
                    };
                    let delay = Duration::from_millis((backoff_ms * jitter_factor) as u64);
                    warn!(
                        provider = self.provider.name(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient LLM failure; backing off"
                    );
                    sleep(delay).await;
                    backoff_ms *= self.config.backoff_multiplier;
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err.unwrap_or_else(|| LlmError::Upstream("retries exhausted".to_string())))
    }

    /// Strip optional markdown fences and require a top-level JSON object
    fn parse_json_object(content: &str) -> LlmResult<Value> {
        let trimmed = content.trim();
        let stripped = trimmed
            .strip_prefix("```json")
            .or_else(|| trimmed.strip_prefix("```"))
            .map(|s| s.trim_end_matches("```").trim())
            .unwrap_or(trimmed);

        let value: Value = serde_json::from_str(stripped)
            .map_err(|e| LlmError::InvalidResponse(format!("unparseable JSON: {}", e)))?;

        if !value.is_object() {
            return Err(LlmError::InvalidResponse(
                "expected a top-level JSON object".to_string(),
            ));
        }
        Ok(value)
    }
}
