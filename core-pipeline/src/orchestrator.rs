// =====================================================================================
// File: core-pipeline/src/orchestrator.rs
// Description: The thirteen-stage evaluation orchestrator
// =====================================================================================

use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use core_compliance::{
    AlertClassifier, BayesianEngine, ClassifierInput, ComplianceAnalysis, FeatureEngine,
    HighRiskCountrySet, PatternEngine, RemediationOrchestrator, RetrievedRule, RiskBand,
    RiskFusion, Transaction,
};
use core_config::PipelineConfig;
use core_database::BeginOutcome;
use core_llm::LlmGateway;
use core_rulestore::RuleStore;

use crate::analyst::AnalystWriter;
use crate::context::ContextBuilder;
use crate::evaluator::RuleEvaluator;
use crate::persistor::Persistor;
use crate::state::EvaluationState;
use core_database::EvaluationStore;
use crate::{EvaluationError, PipelineResult};

/// Result of one evaluation as seen by the queue layer
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EvaluationOutcome {
    /// The pipeline ran and persisted an analysis
    Completed { score: f64, band: RiskBand },
    /// A prior run already completed this transaction; nothing to do
    AlreadyCompleted,
}

/// Drives one transaction through the fixed stage sequence, guaranteeing a
/// terminal state: either a persisted ComplianceAnalysis on a COMPLETED
/// transaction, or a FAILED transaction with no analysis. Stage order is
/// strictly topological; the two LLM fan-out stages parallelize internally
/// but never interleave with other stages.
pub struct PipelineOrchestrator {
    store: Arc<dyn EvaluationStore>,
    rule_store: Arc<dyn RuleStore>,
    context: ContextBuilder,
    evaluator: RuleEvaluator,
    analyst: AnalystWriter,
    feature_engine: FeatureEngine,
    pattern_engine: PatternEngine,
    bayesian_engine: BayesianEngine,
    fusion: RiskFusion,
    classifier: AlertClassifier,
    remediation: RemediationOrchestrator,
    persistor: Persistor,
    config: PipelineConfig,
}

impl PipelineOrchestrator {
    pub fn new(
        store: Arc<dyn EvaluationStore>,
        rule_store: Arc<dyn RuleStore>,
        gateway: Arc<LlmGateway>,
        config: PipelineConfig,
        fan_out: usize,
    ) -> Self {
        let high_risk = match &config.high_risk_country_override {
            Some(countries) => HighRiskCountrySet::from_override(countries),
            None => HighRiskCountrySet::builtin(),
        };

        Self {
            evaluator: RuleEvaluator::new(
                Arc::clone(&gateway),
                fan_out,
                config.applicability_rule_cap,
            ),
            analyst: AnalystWriter::new(gateway),
            persistor: Persistor::new(Arc::clone(&store)),
            feature_engine: FeatureEngine::new(high_risk),
            pattern_engine: PatternEngine::new(),
            bayesian_engine: BayesianEngine::new(),
            fusion: RiskFusion::new(),
            classifier: AlertClassifier::new(),
            remediation: RemediationOrchestrator::new(),
            context: ContextBuilder::new(),
            store,
            rule_store,
            config,
        }
    }

    /// Evaluate one transaction end to end. Tolerates re-entry after worker
    /// crashes: COMPLETED transactions are skipped, PROCESSING and FAILED
    /// ones re-run from scratch.
    #[instrument(skip(self, transaction), fields(transaction_ref = %transaction.transaction_ref))]
    pub async fn evaluate(&self, transaction: Transaction) -> PipelineResult<EvaluationOutcome> {
        let now = Utc::now();

        // Pre-stage contract: the transaction row exists and is ours before
        // any stage runs. A failure here aborts without a FAILED transition;
        // the database state is untouched.
        self.store
            .insert_pending(&transaction)
            .await
            .map_err(EvaluationError::from)?;

        match self
            .store
            .begin_processing(transaction.id, now)
            .await
            .map_err(EvaluationError::from)?
        {
            BeginOutcome::AlreadyCompleted => {
                info!("Transaction already evaluated; skipping");
                return Ok(EvaluationOutcome::AlreadyCompleted);
            }
            BeginOutcome::Started => {}
        }

        let deadline = Duration::from_secs(self.config.evaluation_deadline_secs);
        let transaction_id = transaction.id;

        let run = tokio::time::timeout(deadline, self.run_stages(transaction)).await;

        let analysis = match run {
            Err(_elapsed) => {
                warn!("Evaluation deadline exceeded; failing transaction");
                self.transition_failed(transaction_id).await;
                return Err(EvaluationError::Timeout);
            }
            Ok(Err(e)) => {
                error!(error = %e, "Evaluation failed");
                self.transition_failed(transaction_id).await;
                return Err(e);
            }
            Ok(Ok(analysis)) => analysis,
        };

        // Post-pipeline integrity check: second line of defense for the
        // completed-implies-analysis invariant.
        match self.store.analysis_exists(transaction_id).await {
            Ok(true) => Ok(EvaluationOutcome::Completed {
                score: analysis.compliance_score,
                band: analysis.risk_band,
            }),
            Ok(false) => {
                self.transition_failed(transaction_id).await;
                Err(EvaluationError::InvariantViolation(format!(
                    "post-pipeline check: analysis for {} not found",
                    transaction_id
                )))
            }
            Err(e) => {
                self.transition_failed(transaction_id).await;
                Err(EvaluationError::from(e))
            }
        }
    }

    async fn run_stages(&self, transaction: Transaction) -> PipelineResult<ComplianceAnalysis> {
        let started_at = Utc::now();
        let mut state = EvaluationState::new(transaction, started_at);

        // Stage 1: ContextBuilder
        state.query_strings = self.context.build_queries(&state.transaction);
        state.history = self
            .store
            .history_window(
                &state.transaction.customer_id,
                state.transaction.booking_datetime,
                self.config.history_window_days,
                state.transaction.id,
            )
            .await
            .map_err(|e| EvaluationError::stage("context", e.to_string()))?;

        // Stage 2: Retrieval. A failure here is fatal: evaluating without a
        // rule snapshot would leave the persistence semantics undefined.
        let filters = self.context.build_filters(&state.transaction);
        let internal = self
            .rule_store
            .search_internal(&state.query_strings, self.config.retrieval_cap, &filters)
            .await
            .map_err(|e| EvaluationError::stage("retrieval", e.to_string()))?;
        let external = self
            .rule_store
            .search_external(&state.query_strings, self.config.retrieval_cap, &filters)
            .await
            .map_err(|e| EvaluationError::stage("retrieval", e.to_string()))?;
        state.retrieved_rules = merge_retrieved(internal, external, self.config.retrieval_cap);
        if state.retrieved_rules.is_empty() {
            return Err(EvaluationError::stage(
                "retrieval",
                "no rules retrieved for evaluation",
            ));
        }

        // Stages 3-5: Applicability, EvidenceMapper, ControlTest
        self.evaluator.run_applicability(&mut state).await?;
        self.evaluator.run_evidence(&mut state);
        self.evaluator.run_controls(&mut state).await?;

        // Stage 6: FeatureEngine
        state.features = self
            .feature_engine
            .compute(&state.transaction, &state.history);

        // Stage 7: BayesianEngine
        let posterior = self.bayesian_engine.posterior(
            state.transaction.customer_risk_rating,
            &state.control_results,
            &state.features,
        );
        state.posterior = Some(posterior);

        // Stage 8: PatternEngine
        state.pattern_scores = self
            .pattern_engine
            .compute(&state.transaction, &state.history);

        // Stage 9: RiskFusion
        let assessment = self.fusion.fuse(
            &state.control_results,
            &posterior,
            &state.pattern_scores,
        );
        state.assessment = Some(assessment);

        // Stage 10: AnalystWriter (advisory; cannot fail the evaluation)
        self.analyst.run(&mut state).await;

        // Stage 11: AlertClassifier
        let classified_at = Utc::now();
        state.alerts = self.classifier.classify(
            &ClassifierInput {
                transaction: &state.transaction,
                features: &state.features,
                pattern_scores: &state.pattern_scores,
                control_results: &state.control_results,
                evidence_maps: &state.evidence_maps,
                assessment: &assessment,
            },
            classified_at,
        );

        // Stage 12: RemediationOrchestrator
        state.remediation_actions = self.remediation.derive(
            &state.transaction,
            &state.control_results,
            &state.evidence_maps,
            &state.pattern_scores,
            &assessment,
            &state.alerts,
        );

        if !state.warnings.is_empty() {
            warn!(
                transaction_ref = %state.transaction.transaction_ref,
                warnings = state.warnings.len(),
                "Evaluation completed with warnings"
            );
        }

        // Stage 13: Persistor
        self.persistor.persist(&state, Utc::now()).await
    }

    /// Terminal FAILED transition in a separate committed transaction. The
    /// original error always wins over any failure here.
    async fn transition_failed(&self, transaction_id: Uuid) {
        if let Err(e) = self.store.mark_failed(transaction_id, Utc::now()).await {
            error!(
                transaction_id = %transaction_id,
                error = %e,
                "Failed to record FAILED status"
            );
        }
    }
}

/// Merge internal and external retrievals: dedup by rule id keeping the
/// highest fused score, order by score descending (stable on id), truncate.
fn merge_retrieved(
    internal: Vec<RetrievedRule>,
    external: Vec<RetrievedRule>,
    cap: usize,
) -> Vec<RetrievedRule> {
    let mut merged: Vec<RetrievedRule> = internal.into_iter().chain(external).collect();
    merged.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.rule.rule_id.cmp(&b.rule.rule_id))
    });

    let mut seen: HashSet<String> = HashSet::new();
    merged.retain(|r| seen.insert(r.rule.rule_id.clone()));
    merged.truncate(cap);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_database::MemoryEvaluationStore;
    use async_trait::async_trait;
    use core_compliance::testutil::transaction_fixture;
    use core_compliance::{RuleSource, Severity, TransactionStatus};
    use core_llm::{GatewayConfig, LlmCompletion, LlmError, LlmProvider, LlmRequest, LlmResult};
    use core_rulestore::InMemoryRuleStore;

    /// Deterministic model stub: recognizes the stage by prompt shape
    struct StubProvider {
        control_status: &'static str,
        control_score: f64,
        fail_all: bool,
    }

    #[async_trait]
    impl LlmProvider for StubProvider {
        async fn complete(&self, request: &LlmRequest) -> LlmResult<LlmCompletion> {
            if self.fail_all {
                return Err(LlmError::Upstream("model unavailable".to_string()));
            }
            let content = if request.prompt.contains("\"applies\"") {
                r#"{"applies": true, "rationale": "obligation in scope", "confidence": 0.92}"#
                    .to_string()
            } else if request.prompt.contains("\"compliance_score\"") {
                format!(
                    r#"{{"status": "{}", "severity": "high", "compliance_score": {}, "rationale": "control tested"}}"#,
                    self.control_status, self.control_score
                )
            } else {
                "Evaluation reviewed; obligations assessed against cited rules.".to_string()
            };
            Ok(LlmCompletion {
                content,
                model: "stub".to_string(),
                prompt_tokens: 50,
                completion_tokens: 50,
            })
        }

        fn name(&self) -> &str {
            "stub"
        }
    }

    fn gateway(provider: StubProvider) -> Arc<LlmGateway> {
        Arc::new(LlmGateway::new(
            Arc::new(provider),
            GatewayConfig {
                max_attempts: 3,
                base_backoff_ms: 1,
                backoff_multiplier: 1.0,
                jitter: 0.0,
                global_concurrency: 16,
            },
        ))
    }

    fn rule(id: &str, severity: Severity) -> core_compliance::Rule {
        core_compliance::Rule {
            rule_id: id.to_string(),
            version: 1,
            source: RuleSource::Internal,
            regulator: "MAS".to_string(),
            jurisdictions: vec!["SG".to_string(), "HK".to_string()],
            title: "Cross-border transfer monitoring".to_string(),
            body: "Cross-border wire transfers require monitoring and complete party information"
                .to_string(),
            applicability_conditions: Vec::new(),
            applicability_text: "Applies to cross-border payments".to_string(),
            expected_evidence: vec![
                "originator_name".to_string(),
                "beneficiary_name".to_string(),
                "swift_purpose_code".to_string(),
            ],
            severity,
            effective_date: Utc::now() - chrono::Duration::days(90),
            sunset_date: None,
            is_active: true,
        }
    }

    async fn seeded_rule_store() -> Arc<InMemoryRuleStore> {
        let store = InMemoryRuleStore::new();
        store
            .seed(vec![
                rule("R-MONITOR", Severity::High),
                rule("R-TRAVEL", Severity::Critical),
            ])
            .await
            .unwrap();
        Arc::new(store)
    }

    fn pipeline_config() -> PipelineConfig {
        PipelineConfig {
            evaluation_deadline_secs: 30,
            applicability_rule_cap: 10,
            retrieval_cap: 30,
            history_window_days: 30,
            high_risk_country_override: None,
        }
    }

    fn orchestrator(
        store: Arc<MemoryEvaluationStore>,
        rules: Arc<InMemoryRuleStore>,
        provider: StubProvider,
        config: PipelineConfig,
    ) -> PipelineOrchestrator {
        PipelineOrchestrator::new(store, rules, gateway(provider), config, 10)
    }

    #[tokio::test]
    async fn test_happy_path_completes_and_persists() {
        let store = Arc::new(MemoryEvaluationStore::new());
        let rules = seeded_rule_store().await;
        let orch = orchestrator(
            store.clone(),
            rules,
            StubProvider {
                control_status: "pass",
                control_score: 90.0,
                fail_all: false,
            },
            pipeline_config(),
        );

        let tx = transaction_fixture();
        let outcome = orch.evaluate(tx.clone()).await.unwrap();

        assert!(matches!(outcome, EvaluationOutcome::Completed { .. }));
        assert_eq!(
            store.transaction_status(tx.id).await,
            Some(TransactionStatus::Completed)
        );
        assert_eq!(store.analysis_count().await, 1);

        let analysis = store.analysis_for(tx.id).await.unwrap();
        assert!(analysis.compliance_score >= 0.0 && analysis.compliance_score <= 100.0);
        assert_eq!(
            analysis.risk_band,
            RiskBand::from_score(analysis.compliance_score)
        );
        assert!(!analysis.control_results.is_empty());
        assert!(!analysis.analyst_summary.is_empty());
    }

    #[tokio::test]
    async fn test_llm_unavailable_fails_evaluation_without_analysis() {
        // S6: every applicability call exhausts its retries
        let store = Arc::new(MemoryEvaluationStore::new());
        let rules = seeded_rule_store().await;
        let orch = orchestrator(
            store.clone(),
            rules,
            StubProvider {
                control_status: "pass",
                control_score: 90.0,
                fail_all: true,
            },
            pipeline_config(),
        );

        let tx = transaction_fixture();
        let err = orch.evaluate(tx.clone()).await.unwrap_err();

        assert!(matches!(err, EvaluationError::StageFailure { .. }));
        assert_eq!(
            store.transaction_status(tx.id).await,
            Some(TransactionStatus::Failed)
        );
        // A FAILED transaction carries no analysis
        assert_eq!(store.analysis_count().await, 0);
    }

    #[tokio::test]
    async fn test_reentry_after_completion_is_noop() {
        let store = Arc::new(MemoryEvaluationStore::new());
        let rules = seeded_rule_store().await;
        let orch = orchestrator(
            store.clone(),
            rules,
            StubProvider {
                control_status: "pass",
                control_score: 85.0,
                fail_all: false,
            },
            pipeline_config(),
        );

        let tx = transaction_fixture();
        orch.evaluate(tx.clone()).await.unwrap();
        let second = orch.evaluate(tx.clone()).await.unwrap();

        assert_eq!(second, EvaluationOutcome::AlreadyCompleted);
        assert_eq!(store.analysis_count().await, 1);
    }

    #[tokio::test]
    async fn test_persist_failure_fails_transaction() {
        let store = Arc::new(MemoryEvaluationStore::new());
        store.inject_persist_failure();
        let rules = seeded_rule_store().await;
        let orch = orchestrator(
            store.clone(),
            rules,
            StubProvider {
                control_status: "pass",
                control_score: 85.0,
                fail_all: false,
            },
            pipeline_config(),
        );

        let tx = transaction_fixture();
        let err = orch.evaluate(tx.clone()).await.unwrap_err();

        assert!(matches!(err, EvaluationError::PersistenceFailure(_)));
        assert_eq!(
            store.transaction_status(tx.id).await,
            Some(TransactionStatus::Failed)
        );
    }

    #[tokio::test]
    async fn test_crash_recovery_between_insert_and_status_update() {
        // S5: a worker dies after the analysis insert but before the status
        // flip. The redelivered job observes the existing analysis and
        // completes the status update without duplicating artifacts.
        let store = Arc::new(MemoryEvaluationStore::new());
        let rules = seeded_rule_store().await;
        let orch = orchestrator(
            store.clone(),
            rules,
            StubProvider {
                control_status: "fail",
                control_score: 20.0,
                fail_all: false,
            },
            pipeline_config(),
        );

        let tx = transaction_fixture();

        // First delivery: crashes inside the persistor
        store.inject_crash_after_analysis_insert();
        let err = orch.evaluate(tx.clone()).await.unwrap_err();
        assert!(matches!(err, EvaluationError::PersistenceFailure(_)));
        assert_eq!(store.analysis_count().await, 1);

        // Redelivery: the second run reconciles
        let outcome = orch.evaluate(tx.clone()).await.unwrap();
        assert!(matches!(outcome, EvaluationOutcome::Completed { .. }));
        assert_eq!(
            store.transaction_status(tx.id).await,
            Some(TransactionStatus::Completed)
        );
        assert_eq!(store.analysis_count().await, 1);

        // Alert ids are deterministic per transaction: no duplicates
        let alerts = store.alerts_for(tx.id).await.unwrap();
        let mut ids: Vec<&str> = alerts.iter().map(|a| a.alert_id.as_str()).collect();
        let before = ids.len();
        ids.dedup();
        assert_eq!(ids.len(), before);
    }

    #[tokio::test]
    async fn test_deadline_exceeded_fails_transaction() {
        let store = Arc::new(MemoryEvaluationStore::new());
        let rules = seeded_rule_store().await;
        let mut config = pipeline_config();
        config.evaluation_deadline_secs = 0;
        let orch = orchestrator(
            store.clone(),
            rules,
            StubProvider {
                control_status: "pass",
                control_score: 85.0,
                fail_all: false,
            },
            config,
        );

        let tx = transaction_fixture();
        let err = orch.evaluate(tx.clone()).await.unwrap_err();

        assert!(matches!(err, EvaluationError::Timeout));
        assert_eq!(
            store.transaction_status(tx.id).await,
            Some(TransactionStatus::Failed)
        );
        assert_eq!(store.analysis_count().await, 0);
    }

    #[tokio::test]
    async fn test_failing_controls_raise_score_and_alerts() {
        let store = Arc::new(MemoryEvaluationStore::new());
        let rules = seeded_rule_store().await;
        let orch = orchestrator(
            store.clone(),
            rules,
            StubProvider {
                control_status: "fail",
                control_score: 15.0,
                fail_all: false,
            },
            pipeline_config(),
        );

        let mut tx = transaction_fixture();
        tx.customer_risk_rating = core_compliance::CustomerRiskRating::High;
        tx.amount = 250_000.0;
        let outcome = orch.evaluate(tx.clone()).await.unwrap();

        let EvaluationOutcome::Completed { score, .. } = outcome else {
            panic!("expected completion");
        };
        assert!(score >= 30.0, "score was {}", score);
        let alerts = store.alerts_for(tx.id).await.unwrap();
        assert!(!alerts.is_empty());
    }

    #[test]
    fn test_merge_retrieved_dedups_by_highest_score() {
        let make = |id: &str, score: f64| RetrievedRule {
            rule: rule(id, Severity::High),
            score,
            query: "q".to_string(),
        };
        let merged = merge_retrieved(
            vec![make("R-1", 0.4), make("R-2", 0.9)],
            vec![make("R-1", 0.8), make("R-3", 0.5)],
            30,
        );
        assert_eq!(merged.len(), 3);
        assert_eq!(merged[0].rule.rule_id, "R-2");
        assert_eq!(merged[1].rule.rule_id, "R-1");
        assert_eq!(merged[1].score, 0.8);
        assert_eq!(merged[2].rule.rule_id, "R-3");
    }

    #[test]
    fn test_merge_retrieved_truncates() {
        let make = |id: String, score: f64| RetrievedRule {
            rule: rule(&id, Severity::Low),
            score,
            query: "q".to_string(),
        };
        let many: Vec<RetrievedRule> = (0..40)
            .map(|i| make(format!("R-{:02}", i), 1.0 - i as f64 / 100.0))
            .collect();
        let merged = merge_retrieved(many, Vec::new(), 30);
        assert_eq!(merged.len(), 30);
    }
}
