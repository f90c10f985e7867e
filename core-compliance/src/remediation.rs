// =====================================================================================
// File: core-compliance/src/remediation.rs
// Description: Remediation action derivation from evaluation outcomes
// =====================================================================================

use serde_json::json;
use std::collections::HashMap;
use tracing::debug;

use crate::types::{
    Alert, AlertRole, ControlResult, ControlStatus, EvidenceMap, PatternScores, RemediationAction,
    RemediationType, RiskAssessment, RiskBand, Transaction,
};

/// Derives remediation action records from failed controls, the risk band,
/// and the generated alerts. Output is deduplicated by (type, owner).
pub struct RemediationOrchestrator;

impl RemediationOrchestrator {
    pub fn new() -> Self {
        Self
    }

    pub fn derive(
        &self,
        transaction: &Transaction,
        control_results: &[ControlResult],
        evidence_maps: &HashMap<String, EvidenceMap>,
        pattern_scores: &PatternScores,
        assessment: &RiskAssessment,
        alerts: &[Alert],
    ) -> Vec<RemediationAction> {
        let alert_ids: Vec<String> = alerts.iter().map(|a| a.alert_id.clone()).collect();
        let failures: Vec<&ControlResult> = control_results
            .iter()
            .filter(|r| r.status == ControlStatus::Fail)
            .collect();

        let mut actions: Vec<RemediationAction> = Vec::new();
        let mut push = |action: RemediationAction| {
            let exists = actions
                .iter()
                .any(|a| a.action_type == action.action_type && a.owner == action.owner);
            if !exists {
                actions.push(action);
            }
        };

        if assessment.band >= RiskBand::Medium && !failures.is_empty() {
            push(RemediationAction {
                action_type: RemediationType::Investigate,
                owner: AlertRole::Compliance,
                sla_hours: 24,
                linked_alert_ids: alert_ids.clone(),
                details: json!({
                    "failed_rules": failures.iter().map(|f| f.rule_id.as_str()).collect::<Vec<_>>(),
                    "risk_band": assessment.band.as_str(),
                }),
            });
        }

        if assessment.score >= 60.0 {
            push(RemediationAction {
                action_type: RemediationType::EnhancedDd,
                owner: AlertRole::Compliance,
                sla_hours: 48,
                linked_alert_ids: alert_ids.clone(),
                details: json!({
                    "customer_id": transaction.customer_id,
                    "risk_score": assessment.score,
                }),
            });
        }

        let referenced_fields = Self::missing_fields_in_rationales(&failures, evidence_maps);
        if !referenced_fields.is_empty() {
            push(RemediationAction {
                action_type: RemediationType::CollectDocuments,
                owner: AlertRole::Front,
                sla_hours: 48,
                linked_alert_ids: alert_ids.clone(),
                details: json!({ "fields": referenced_fields }),
            });
        }

        if assessment.score >= 80.0 {
            push(RemediationAction {
                action_type: RemediationType::FileSar,
                owner: AlertRole::Legal,
                sla_hours: 12,
                linked_alert_ids: alert_ids.clone(),
                details: Self::sar_draft(transaction, &failures, pattern_scores, assessment),
            });
        }

        let has_partial = control_results
            .iter()
            .any(|r| r.status == ControlStatus::Partial);
        if has_partial && assessment.band >= RiskBand::Medium {
            push(RemediationAction {
                action_type: RemediationType::Review,
                owner: AlertRole::Compliance,
                sla_hours: 72,
                linked_alert_ids: alert_ids,
                details: json!({
                    "partial_rules": control_results
                        .iter()
                        .filter(|r| r.status == ControlStatus::Partial)
                        .map(|r| r.rule_id.as_str())
                        .collect::<Vec<_>>(),
                }),
            });
        }

        debug!(
            transaction_ref = %transaction.transaction_ref,
            action_count = actions.len(),
            "Derived remediation actions"
        );

        actions
    }

    /// Missing evidence fields that failure rationales actually reference
    fn missing_fields_in_rationales(
        failures: &[&ControlResult],
        evidence_maps: &HashMap<String, EvidenceMap>,
    ) -> Vec<String> {
        let mut fields: Vec<String> = Vec::new();
        for failure in failures {
            let rationale = failure.rationale.to_lowercase();
            if let Some(map) = evidence_maps.get(&failure.rule_id) {
                for field in &map.missing {
                    if rationale.contains(&field.to_lowercase()) && !fields.contains(field) {
                        fields.push(field.clone());
                    }
                }
            }
        }
        fields.sort();
        fields
    }

    /// Structured SAR draft attached to FILE_SAR actions
    fn sar_draft(
        transaction: &Transaction,
        failures: &[&ControlResult],
        pattern_scores: &PatternScores,
        assessment: &RiskAssessment,
    ) -> serde_json::Value {
        let narrative = format!(
            "Suspicious activity identified on transaction {} for {:.2} {}: \
             risk score {:.1} ({} band), {} failed control(s), dominant pattern score {:.0}.",
            transaction.transaction_ref,
            transaction.amount,
            transaction.currency,
            assessment.score,
            assessment.band.as_str(),
            failures.len(),
            pattern_scores.max(),
        );
        json!({
            "narrative": narrative,
            "transaction_refs": [transaction.transaction_ref],
            "total_amount": transaction.amount,
            "currency": transaction.currency,
            "failed_rules": failures.iter().map(|f| f.rule_id.as_str()).collect::<Vec<_>>(),
            "pattern_scores": pattern_scores,
        })
    }
}

impl Default for RemediationOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}
