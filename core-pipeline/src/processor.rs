// =====================================================================================
// File: core-pipeline/src/processor.rs
// Description: Queue-facing job processor spawning evaluations
// =====================================================================================

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

use core_queue::{Job, JobOutcome, JobProcessor, QueueError, QueueResult};

use crate::orchestrator::{EvaluationOutcome, PipelineOrchestrator};
use core_database::EvaluationStore;

/// Job type for transaction evaluations
pub const EVALUATE_TRANSACTION_JOB: &str = "evaluate-transaction";

/// Payload of an evaluation job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationJobPayload {
    pub transaction_ref: String,
}

/// Bridges the queue to the orchestrator: loads the referenced transaction
/// and runs one evaluation per delivery. Both terminal evaluation outcomes
/// (COMPLETED and the explicit FAILED transition) acknowledge the job; only
/// harness-level breakage leaves the delivery for redelivery.
pub struct EvaluationJobProcessor {
    orchestrator: Arc<PipelineOrchestrator>,
    store: Arc<dyn EvaluationStore>,
}

impl EvaluationJobProcessor {
    pub fn new(orchestrator: Arc<PipelineOrchestrator>, store: Arc<dyn EvaluationStore>) -> Self {
        Self {
            orchestrator,
            store,
        }
    }
}

#[async_trait]
impl JobProcessor for EvaluationJobProcessor {
    async fn process(&self, job: &Job) -> QueueResult<JobOutcome> {
        let payload: EvaluationJobPayload = serde_json::from_value(job.payload.clone())
            .map_err(|e| QueueError::Broker(format!("malformed job payload: {}", e)))?;

        let transaction = self
            .store
            .find_transaction_by_ref(&payload.transaction_ref)
            .await
            .map_err(|e| QueueError::Broker(format!("transaction lookup failed: {}", e)))?
            .ok_or_else(|| {
                // The submission path inserts before enqueueing, so absence
                // is a read anomaly worth a redelivery, not a terminal state.
                QueueError::Broker(format!(
                    "transaction {} not found for evaluation",
                    payload.transaction_ref
                ))
            })?;

        match self.orchestrator.evaluate(transaction).await {
            Ok(EvaluationOutcome::Completed { score, band }) => {
                info!(
                    transaction_ref = %payload.transaction_ref,
                    score,
                    band = band.as_str(),
                    "Evaluation job completed"
                );
                Ok(JobOutcome::Completed)
            }
            Ok(EvaluationOutcome::AlreadyCompleted) => {
                info!(
                    transaction_ref = %payload.transaction_ref,
                    "Evaluation job skipped: already completed"
                );
                Ok(JobOutcome::Completed)
            }
            Err(e) => {
                // The orchestrator already recorded the FAILED transition;
                // the job is handled and must be acknowledged.
                error!(
                    transaction_ref = %payload.transaction_ref,
                    error = %e,
                    "Evaluation job failed"
                );
                Ok(JobOutcome::Failed)
            }
        }
    }

    fn processor_name(&self) -> &str {
        "evaluation-processor"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_database::MemoryEvaluationStore;
    use core_compliance::testutil::transaction_fixture;
    use core_compliance::{RuleSource, Severity, TransactionStatus};
    use core_llm::{GatewayConfig, LlmCompletion, LlmGateway, LlmProvider, LlmRequest, LlmResult};
    use core_rulestore::InMemoryRuleStore;
    use serde_json::json;

    struct PassProvider;

    #[async_trait]
    impl LlmProvider for PassProvider {
        async fn complete(&self, request: &LlmRequest) -> LlmResult<LlmCompletion> {
            let content = if request.prompt.contains("\"applies\"") {
                r#"{"applies": true, "rationale": "in scope", "confidence": 0.95}"#.to_string()
            } else if request.prompt.contains("\"compliance_score\"") {
                r#"{"status": "pass", "severity": "high", "compliance_score": 88, "rationale": "ok"}"#
                    .to_string()
            } else {
                "Summary.".to_string()
            };
            Ok(LlmCompletion {
                content,
                model: "stub".to_string(),
                prompt_tokens: 1,
                completion_tokens: 1,
            })
        }

        fn name(&self) -> &str {
            "pass-stub"
        }
    }

    async fn processor_under_test() -> (EvaluationJobProcessor, Arc<MemoryEvaluationStore>) {
        let store = Arc::new(MemoryEvaluationStore::new());
        let rules = InMemoryRuleStore::new();
        rules
            .seed(vec![core_compliance::Rule {
                rule_id: "R-1".to_string(),
                version: 1,
                source: RuleSource::Internal,
                regulator: "MAS".to_string(),
                jurisdictions: vec!["SG".to_string()],
                title: "Wire monitoring".to_string(),
                body: "Cross-border wire transfers require monitoring".to_string(),
                applicability_conditions: Vec::new(),
                applicability_text: String::new(),
                expected_evidence: vec!["originator_name".to_string()],
                severity: Severity::High,
                effective_date: chrono::Utc::now() - chrono::Duration::days(30),
                sunset_date: None,
                is_active: true,
            }])
            .await
            .unwrap();

        let gateway = Arc::new(LlmGateway::new(
            Arc::new(PassProvider),
            GatewayConfig::default(),
        ));
        let orchestrator = Arc::new(PipelineOrchestrator::new(
            store.clone(),
            Arc::new(rules),
            gateway,
            core_config::PipelineConfig {
                evaluation_deadline_secs: 30,
                applicability_rule_cap: 10,
                retrieval_cap: 30,
                history_window_days: 30,
                high_risk_country_override: None,
            },
            10,
        ));
        (
            EvaluationJobProcessor::new(orchestrator, store.clone()),
            store,
        )
    }

    #[tokio::test]
    async fn test_process_completes_job() {
        let (processor, store) = processor_under_test().await;
        let tx = transaction_fixture();
        store.insert_pending(&tx).await.unwrap();

        let job = Job::new(
            EVALUATE_TRANSACTION_JOB,
            json!({ "transaction_ref": tx.transaction_ref }),
        );
        let outcome = processor.process(&job).await.unwrap();
        assert_eq!(outcome, JobOutcome::Completed);
        assert_eq!(
            store.transaction_status(tx.id).await,
            Some(TransactionStatus::Completed)
        );
    }

    #[tokio::test]
    async fn test_process_unknown_transaction_is_harness_error() {
        let (processor, _store) = processor_under_test().await;
        let job = Job::new(
            EVALUATE_TRANSACTION_JOB,
            json!({ "transaction_ref": "TXN-MISSING" }),
        );
        assert!(processor.process(&job).await.is_err());
    }

    #[tokio::test]
    async fn test_process_malformed_payload_is_harness_error() {
        let (processor, _store) = processor_under_test().await;
        let job = Job::new(EVALUATE_TRANSACTION_JOB, json!({ "nope": true }));
        assert!(processor.process(&job).await.is_err());
    }
}
