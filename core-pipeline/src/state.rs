// =====================================================================================
// File: core-pipeline/src/state.rs
// Description: Typed accumulating state for one evaluation
// =====================================================================================

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use core_compliance::{
    Alert, Applicability, ControlResult, EvidenceMap, FeatureVector, PatternScores, Posterior,
    RemediationAction, RetrievedRule, RiskAssessment, Transaction,
};

/// A retrieved rule the model judged applicable, with its judgment
#[derive(Debug, Clone)]
pub struct ApplicableRule {
    pub retrieved: RetrievedRule,
    pub applicability: Applicability,
}

/// The accumulating evaluation state owned by the orchestrator. Each stage
/// reads the fields written by its predecessors and writes its own; the
/// typed record is what catches stage/field mismatches at compile time
/// instead of at 2 a.m.
#[derive(Debug, Clone)]
pub struct EvaluationState {
    pub transaction: Transaction,
    pub started_at: DateTime<Utc>,

    // Stage 1: ContextBuilder
    pub query_strings: Vec<String>,
    pub history: Vec<Transaction>,

    // Stage 2: Retrieval
    pub retrieved_rules: Vec<RetrievedRule>,

    // Stage 3: Applicability
    pub applicable_rules: Vec<ApplicableRule>,

    // Stage 4: EvidenceMapper
    pub evidence_maps: HashMap<String, EvidenceMap>,

    // Stage 5: ControlTest
    pub control_results: Vec<ControlResult>,

    // Stage 6: FeatureEngine
    pub features: FeatureVector,

    // Stage 7: BayesianEngine
    pub posterior: Option<Posterior>,

    // Stage 8: PatternEngine
    pub pattern_scores: PatternScores,

    // Stage 9: RiskFusion
    pub assessment: Option<RiskAssessment>,

    // Stage 10: AnalystWriter (advisory)
    pub analyst_summary: String,

    // Stage 11: AlertClassifier
    pub alerts: Vec<Alert>,

    // Stage 12: RemediationOrchestrator
    pub remediation_actions: Vec<RemediationAction>,

    /// Non-fatal observations (dropped rules, advisory-stage failures)
    pub warnings: Vec<String>,
}

impl EvaluationState {
    pub fn new(transaction: Transaction, started_at: DateTime<Utc>) -> Self {
        Self {
            transaction,
            started_at,
            query_strings: Vec::new(),
            history: Vec::new(),
            retrieved_rules: Vec::new(),
            applicable_rules: Vec::new(),
            evidence_maps: HashMap::new(),
            control_results: Vec::new(),
            features: FeatureVector::default(),
            posterior: None,
            pattern_scores: PatternScores::default(),
            assessment: None,
            analyst_summary: String::new(),
            alerts: Vec::new(),
            remediation_actions: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_compliance::testutil::transaction_fixture;

    #[test]
    fn test_state_starts_empty() {
        let tx = transaction_fixture();
        let state = EvaluationState::new(tx.clone(), tx.booking_datetime);
        assert!(state.query_strings.is_empty());
        assert!(state.retrieved_rules.is_empty());
        assert!(state.posterior.is_none());
        assert!(state.assessment.is_none());
        assert!(state.warnings.is_empty());
    }
}
