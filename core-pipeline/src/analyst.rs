// =====================================================================================
// File: core-pipeline/src/analyst.rs
// Description: Advisory analyst-summary stage
// =====================================================================================

use std::sync::Arc;
use tracing::warn;

use core_llm::{LlmGateway, LlmRequest};

use crate::state::EvaluationState;

/// Upper bound on the persisted narrative
const MAX_SUMMARY_BYTES: usize = 2048;

/// Sampling temperature for narrative generation; the only stage allowed
/// above zero
const ANALYST_TEMPERATURE: f64 = 0.3;

/// Produces the plain-text analyst narrative. This stage is advisory: any
/// failure leaves an empty summary and a warning, never a failed evaluation.
pub struct AnalystWriter {
    gateway: Arc<LlmGateway>,
}

impl AnalystWriter {
    pub fn new(gateway: Arc<LlmGateway>) -> Self {
        Self { gateway }
    }

    pub async fn run(&self, state: &mut EvaluationState) {
        let Some(assessment) = state.assessment else {
            state.warn("analyst summary skipped: no risk assessment available".to_string());
            return;
        };

        let rule_ids: Vec<&str> = state
            .applicable_rules
            .iter()
            .map(|a| a.retrieved.rule.rule_id.as_str())
            .collect();
        let failures: Vec<&str> = state
            .control_results
            .iter()
            .filter(|r| r.status == core_compliance::ControlStatus::Fail)
            .map(|r| r.rule_id.as_str())
            .collect();

        let prompt = format!(
            "Write a concise analyst summary (plain text, no markup) for a transaction \
             compliance evaluation. Cite rule ids verbatim.\n\n\
             TRANSACTION: {}\n\
             RISK SCORE: {:.1} ({})\n\
             APPLICABLE RULES: {}\n\
             FAILED CONTROLS: {}\n\
             DOMINANT PATTERN SCORE: {:.0}\n",
            state.transaction.summary_line(),
            assessment.score,
            assessment.band.as_str(),
            rule_ids.join(", "),
            failures.join(", "),
            state.pattern_scores.max(),
        );

        let request = LlmRequest::text(prompt)
            .with_temperature(ANALYST_TEMPERATURE)
            .with_max_output_tokens(700);

        match self.gateway.complete_text(&request).await {
            Ok(summary) => {
                state.analyst_summary = truncate_to_bytes(&summary, MAX_SUMMARY_BYTES);
            }
            Err(e) => {
                warn!(error = %e, "Analyst summary failed; continuing without narrative");
                state.warn(format!("analyst summary unavailable: {}", e));
                state.analyst_summary = String::new();
            }
        }
    }
}

/// Byte-bounded truncation that never splits a UTF-8 character
fn truncate_to_bytes(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_short_text_untouched() {
        assert_eq!(truncate_to_bytes("summary", 2048), "summary");
    }

    #[test]
    fn test_truncate_respects_bound() {
        let long = "a".repeat(5000);
        let truncated = truncate_to_bytes(&long, MAX_SUMMARY_BYTES);
        assert_eq!(truncated.len(), MAX_SUMMARY_BYTES);
    }

    #[test]
    fn test_truncate_keeps_char_boundary() {
        // Multi-byte characters straddling the cut point
        let text = "é".repeat(2000); // 2 bytes each
        let truncated = truncate_to_bytes(&text, 2001);
        assert!(truncated.len() <= 2001);
        assert!(truncated.chars().all(|c| c == 'é'));
    }
}
