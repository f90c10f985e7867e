// =====================================================================================
// File: core-pipeline/src/persistor.rs
// Description: Final persistence stage with read-back verification
// =====================================================================================

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use core_compliance::{CaseStatus, ComplianceAnalysis, ComplianceCase, ControlStatus, RiskBand};
use core_database::PersistOutcome;

use crate::state::EvaluationState;
use core_database::EvaluationStore;
use crate::{EvaluationError, PipelineResult};

/// Stage 13: assemble the ComplianceAnalysis from the evaluation state and
/// drive the verified write protocol. An analysis-uniqueness conflict means
/// a prior run already succeeded; the stage reconciles the status and
/// reports success. Absence of the analysis after commit is an invariant
/// violation and raises across every layer above.
pub struct Persistor {
    store: Arc<dyn EvaluationStore>,
}

impl Persistor {
    pub fn new(store: Arc<dyn EvaluationStore>) -> Self {
        Self { store }
    }

    pub async fn persist(
        &self,
        state: &EvaluationState,
        now: DateTime<Utc>,
    ) -> PipelineResult<ComplianceAnalysis> {
        let assessment = state.assessment.ok_or_else(|| {
            EvaluationError::stage("persistor", "risk assessment missing from evaluation state")
        })?;
        let posterior = state.posterior.ok_or_else(|| {
            EvaluationError::stage("persistor", "posterior missing from evaluation state")
        })?;

        let analysis = ComplianceAnalysis {
            id: Uuid::new_v4(),
            transaction_id: state.transaction.id,
            transaction_ref: state.transaction.transaction_ref.clone(),
            compliance_score: assessment.score,
            risk_band: assessment.band,
            risk_breakdown: assessment.breakdown,
            applicable_rules: state
                .control_results
                .iter()
                .map(|r| core_compliance::ScoredRuleRef {
                    rule_id: r.rule_id.clone(),
                    compliance_score: r.compliance_score,
                })
                .collect(),
            evidence_map: state.evidence_maps.clone(),
            control_results: state.control_results.clone(),
            pattern_scores: state.pattern_scores,
            bayesian_summary: posterior.expected_risk(),
            remediation_actions: state.remediation_actions.clone(),
            analyst_summary: state.analyst_summary.clone(),
            processing_time_seconds: (now - state.started_at).num_milliseconds() as f64 / 1000.0,
            created_at: now,
        };

        let case = self.build_case(state, &analysis, now);

        let outcome = self
            .store
            .persist_evaluation(&analysis, &state.alerts, case.as_ref(), now)
            .await
            .map_err(EvaluationError::from)?;

        match outcome {
            PersistOutcome::Inserted => {
                info!(
                    transaction_ref = %analysis.transaction_ref,
                    score = analysis.compliance_score,
                    band = analysis.risk_band.as_str(),
                    alerts = state.alerts.len(),
                    "Evaluation persisted"
                );
            }
            PersistOutcome::AlreadyExists => {
                info!(
                    transaction_ref = %analysis.transaction_ref,
                    "Prior evaluation already persisted; this run reconciled the status"
                );
            }
        }

        // Verification read: the one place where raising across layers is
        // the correct pattern. Absence here is an invariant violation.
        if !self
            .store
            .analysis_exists(analysis.transaction_id)
            .await
            .map_err(EvaluationError::from)?
        {
            error!(
                transaction_id = %analysis.transaction_id,
                "ComplianceAnalysis absent immediately after commit"
            );
            return Err(EvaluationError::InvariantViolation(format!(
                "compliance analysis for transaction {} absent after commit",
                analysis.transaction_id
            )));
        }

        Ok(analysis)
    }

    /// Critical-band evaluations open an investigation case linking every
    /// alert of the run.
    fn build_case(
        &self,
        state: &EvaluationState,
        analysis: &ComplianceAnalysis,
        now: DateTime<Utc>,
    ) -> Option<ComplianceCase> {
        if analysis.risk_band != RiskBand::Critical {
            return None;
        }

        let evidence_refs: Vec<String> = state
            .control_results
            .iter()
            .filter(|r| r.status == ControlStatus::Fail)
            .map(|r| format!("control:{}", r.rule_id))
            .collect();

        Some(ComplianceCase {
            id: Uuid::new_v4(),
            case_ref: format!("CASE-{}", state.transaction.transaction_ref),
            transaction_id: state.transaction.id,
            risk_score: analysis.compliance_score,
            linked_alert_ids: state.alerts.iter().map(|a| a.alert_id.clone()).collect(),
            evidence_refs,
            status: CaseStatus::Open,
            created_at: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_database::MemoryEvaluationStore;
    use core_compliance::testutil::transaction_fixture;
    use core_compliance::{
        PatternScores, Posterior, RiskAssessment, RiskBreakdown, TransactionStatus,
    };

    fn state_with_assessment(score: f64) -> EvaluationState {
        let tx = transaction_fixture();
        let mut state = EvaluationState::new(tx.clone(), tx.booking_datetime);
        state.assessment = Some(RiskAssessment {
            score,
            band: RiskBand::from_score(score),
            breakdown: RiskBreakdown::default(),
        });
        state.posterior = Some(Posterior {
            low: 0.25,
            medium: 0.25,
            high: 0.25,
            critical: 0.25,
        });
        state.pattern_scores = PatternScores::default();
        state
    }

    #[tokio::test]
    async fn test_persist_completes_transaction() {
        let store = Arc::new(MemoryEvaluationStore::new());
        let state = state_with_assessment(45.0);
        store.insert_pending(&state.transaction).await.unwrap();

        let persistor = Persistor::new(store.clone());
        let analysis = persistor.persist(&state, Utc::now()).await.unwrap();

        assert_eq!(analysis.risk_band, RiskBand::Medium);
        assert_eq!(store.analysis_count().await, 1);
        assert_eq!(
            store.transaction_status(state.transaction.id).await,
            Some(TransactionStatus::Completed)
        );
        // Medium band: no case
        assert_eq!(store.case_count().await, 0);
    }

    #[tokio::test]
    async fn test_persist_critical_band_opens_case() {
        let store = Arc::new(MemoryEvaluationStore::new());
        let state = state_with_assessment(85.0);
        store.insert_pending(&state.transaction).await.unwrap();

        let persistor = Persistor::new(store.clone());
        persistor.persist(&state, Utc::now()).await.unwrap();
        assert_eq!(store.case_count().await, 1);
    }

    #[tokio::test]
    async fn test_persist_missing_transaction_is_invariant_violation() {
        let store = Arc::new(MemoryEvaluationStore::new());
        let state = state_with_assessment(45.0);
        // Transaction never inserted

        let persistor = Persistor::new(store);
        let err = persistor.persist(&state, Utc::now()).await.unwrap_err();
        assert!(matches!(err, EvaluationError::InvariantViolation(_)));
    }

    #[tokio::test]
    async fn test_persist_twice_is_idempotent() {
        let store = Arc::new(MemoryEvaluationStore::new());
        let state = state_with_assessment(45.0);
        store.insert_pending(&state.transaction).await.unwrap();

        let persistor = Persistor::new(store.clone());
        persistor.persist(&state, Utc::now()).await.unwrap();
        persistor.persist(&state, Utc::now()).await.unwrap();

        assert_eq!(store.analysis_count().await, 1);
        assert_eq!(
            store.transaction_status(state.transaction.id).await,
            Some(TransactionStatus::Completed)
        );
    }

    #[tokio::test]
    async fn test_persist_without_assessment_fails() {
        let store = Arc::new(MemoryEvaluationStore::new());
        let tx = transaction_fixture();
        let state = EvaluationState::new(tx, Utc::now());

        let persistor = Persistor::new(store);
        let err = persistor.persist(&state, Utc::now()).await.unwrap_err();
        assert!(matches!(err, EvaluationError::StageFailure { .. }));
    }
}
