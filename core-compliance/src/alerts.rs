// =====================================================================================
// File: core-compliance/src/alerts.rs
// Description: Deterministic alert classification and remediation workflows
// =====================================================================================

//! The alert classifier is a decision table evaluated in priority order:
//! Legal, then Compliance, then Front. Within a class the first matching
//! condition wins; matches across classes produce one alert per class. Every
//! alert carries a fixed remediation workflow and an SLA deadline derived
//! from its severity.

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use std::collections::HashMap;
use tracing::debug;

use crate::types::{
    Alert, AlertRole, AlertStatus, AlertType, ControlResult, ControlStatus, EvidenceMap,
    FeatureVector, PatternScores, RiskAssessment, Severity, Transaction,
};

/// Minimum final score for alert generation; Legal-class conditions bypass it
const ALERT_SCORE_FLOOR: f64 = 30.0;

/// Inputs the decision table reads
pub struct ClassifierInput<'a> {
    pub transaction: &'a Transaction,
    pub features: &'a FeatureVector,
    pub pattern_scores: &'a PatternScores,
    pub control_results: &'a [ControlResult],
    pub evidence_maps: &'a HashMap<String, EvidenceMap>,
    pub assessment: &'a RiskAssessment,
}

/// Deterministic decision table mapping evaluation outputs to role-targeted
/// alerts.
pub struct AlertClassifier;

impl AlertClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Classify one evaluation. `now` is the alert creation instant; SLA
    /// deadlines are derived from it in UTC.
    pub fn classify(&self, input: &ClassifierInput<'_>, now: DateTime<Utc>) -> Vec<Alert> {
        let score = input.assessment.score;

        // Pattern scores may be absent (no history); fall back to feature
        // inference with halved trigger thresholds.
        let patterns = if input.pattern_scores.is_empty() {
            Self::infer_patterns_from_features(input.features)
        } else {
            *input.pattern_scores
        };

        let legal = self.legal_alert(input, score);

        if score < ALERT_SCORE_FLOOR && legal.is_none() {
            debug!(score, "Score below alert floor and no legal trigger; no alerts");
            return Vec::new();
        }

        let mut matched: Vec<(AlertRole, AlertType)> = Vec::new();
        if let Some(alert_type) = legal {
            matched.push((AlertRole::Legal, alert_type));
        }
        if let Some(alert_type) = self.compliance_alert(input, &patterns, score) {
            matched.push((AlertRole::Compliance, alert_type));
        }
        if let Some(alert_type) = self.front_alert(input, score) {
            matched.push((AlertRole::Front, alert_type));
        }

        matched
            .into_iter()
            .enumerate()
            .map(|(ordinal, (role, alert_type))| {
                self.build_alert(input, role, alert_type, ordinal, now)
            })
            .collect()
    }

    fn legal_alert(&self, input: &ClassifierInput<'_>, score: f64) -> Option<AlertType> {
        if input.transaction.sanctions_hit {
            return Some(AlertType::SanctionsBreach);
        }
        if input.transaction.pep_indicator && score >= 70.0 {
            return Some(AlertType::PepHighRisk);
        }
        let critical_failure = input.control_results.iter().any(|r| {
            r.status == ControlStatus::Fail && r.severity == Severity::Critical
        });
        if critical_failure && score >= 80.0 {
            return Some(AlertType::CriticalRuleBreach);
        }
        None
    }

    fn compliance_alert(
        &self,
        input: &ClassifierInput<'_>,
        patterns: &PatternScores,
        score: f64,
    ) -> Option<AlertType> {
        if patterns.structuring >= 70.0 {
            return Some(AlertType::StructuringPattern);
        }
        if patterns.layering >= 70.0 || patterns.rapid_movement >= 70.0 {
            return Some(AlertType::LayeringPattern);
        }
        if patterns.velocity_anomaly >= 70.0 {
            return Some(AlertType::VelocityAnomaly);
        }
        if input.features.is_high_risk_country && score >= 50.0 {
            return Some(AlertType::HighRiskJurisdiction);
        }
        let high_failures = input
            .control_results
            .iter()
            .filter(|r| r.status == ControlStatus::Fail && r.severity >= Severity::High)
            .count();
        if high_failures >= 2 && score >= 60.0 {
            return Some(AlertType::MultipleControlFailures);
        }
        if score >= 70.0 {
            return Some(AlertType::HighRiskTransaction);
        }
        if score >= 50.0 {
            return Some(AlertType::MediumRiskTransaction);
        }
        None
    }

    fn front_alert(&self, input: &ClassifierInput<'_>, score: f64) -> Option<AlertType> {
        let any_missing = input.evidence_maps.values().any(EvidenceMap::has_missing);
        if any_missing && score >= 30.0 {
            return Some(AlertType::MissingDocumentation);
        }
        if input.features.is_high_value && score < 50.0 {
            return Some(AlertType::HighValueTransaction);
        }
        if input.features.is_cross_border && score >= 40.0 {
            return Some(AlertType::CrossBorderTransaction);
        }
        if score >= 30.0 {
            return Some(AlertType::DocumentationReview);
        }
        Some(AlertType::RoutineMonitoring)
    }

    /// Behavioural inference when the pattern engine saw no history. The
    /// trigger thresholds of the pattern rules apply halved.
    fn infer_patterns_from_features(features: &FeatureVector) -> PatternScores {
        PatternScores {
            structuring: if features.potential_structuring { 70.0 } else { 0.0 },
            layering: if features.is_cross_border && features.count_24h > 2 {
                70.0
            } else {
                0.0
            },
            circular_transfer: 0.0,
            rapid_movement: 0.0,
            velocity_anomaly: if features.count_24h >= 5 { 80.0 } else { 0.0 },
        }
    }

    fn build_alert(
        &self,
        input: &ClassifierInput<'_>,
        role: AlertRole,
        alert_type: AlertType,
        ordinal: usize,
        now: DateTime<Utc>,
    ) -> Alert {
        let severity = alert_severity(alert_type, input.assessment.score);
        let sla_deadline = now + Duration::hours(severity.sla_hours());

        let failed_rules: Vec<&str> = input
            .control_results
            .iter()
            .filter(|r| r.status == ControlStatus::Fail)
            .map(|r| r.rule_id.as_str())
            .collect();

        let missing_fields: Vec<&str> = input
            .evidence_maps
            .values()
            .flat_map(|m| m.missing.iter().map(String::as_str))
            .collect();

        Alert {
            alert_id: format!("ALT-{}-{}", input.transaction.id, ordinal),
            transaction_id: input.transaction.id,
            role,
            alert_type,
            severity,
            title: alert_title(alert_type).to_string(),
            description: alert_description(alert_type, input),
            context: json!({
                "transaction_ref": input.transaction.transaction_ref,
                "amount": input.transaction.amount,
                "currency": input.transaction.currency,
                "risk_score": input.assessment.score,
                "risk_band": input.assessment.band.as_str(),
                "corridor": format!(
                    "{}->{}",
                    input.transaction.originator_country,
                    input.transaction.beneficiary_country
                ),
            }),
            evidence: json!({
                "failed_rules": failed_rules,
                "missing_evidence": missing_fields,
                "pattern_scores": input.pattern_scores,
                "breakdown": input.assessment.breakdown,
            }),
            remediation_workflow: remediation_workflow(alert_type),
            sla_deadline,
            status: AlertStatus::Pending,
            created_at: now,
        }
    }
}

impl Default for AlertClassifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixed alert-type to severity mapping. `missing_documentation` escalates
/// to High at risk score 60.
pub fn alert_severity(alert_type: AlertType, score: f64) -> Severity {
    match alert_type {
        AlertType::SanctionsBreach => Severity::Critical,
        AlertType::PepHighRisk
        | AlertType::CriticalRuleBreach
        | AlertType::LayeringPattern
        | AlertType::StructuringPattern
        | AlertType::HighRiskJurisdiction
        | AlertType::MultipleControlFailures
        | AlertType::VelocityAnomaly
        | AlertType::HighRiskTransaction => Severity::High,
        AlertType::MissingDocumentation => {
            if score >= 60.0 {
                Severity::High
            } else {
                Severity::Medium
            }
        }
        AlertType::CrossBorderTransaction
        | AlertType::MediumRiskTransaction
        | AlertType::HighValueTransaction => Severity::Medium,
        AlertType::DocumentationReview | AlertType::RoutineMonitoring => Severity::Low,
    }
}

fn alert_title(alert_type: AlertType) -> &'static str {
    match alert_type {
        AlertType::SanctionsBreach => "Sanctions screening hit",
        AlertType::PepHighRisk => "High-risk PEP transaction",
        AlertType::CriticalRuleBreach => "Critical compliance rule breach",
        AlertType::StructuringPattern => "Structuring pattern detected",
        AlertType::LayeringPattern => "Layering or rapid movement pattern",
        AlertType::VelocityAnomaly => "Transaction velocity anomaly",
        AlertType::HighRiskJurisdiction => "High-risk jurisdiction exposure",
        AlertType::MultipleControlFailures => "Multiple control failures",
        AlertType::HighRiskTransaction => "High risk transaction",
        AlertType::MediumRiskTransaction => "Medium risk transaction",
        AlertType::MissingDocumentation => "Missing transaction documentation",
        AlertType::HighValueTransaction => "High value transaction review",
        AlertType::CrossBorderTransaction => "Cross-border transaction review",
        AlertType::DocumentationReview => "Documentation review required",
        AlertType::RoutineMonitoring => "Routine monitoring entry",
    }
}

fn alert_description(alert_type: AlertType, input: &ClassifierInput<'_>) -> String {
    format!(
        "{} for transaction {} ({:.2} {}): risk score {:.1} ({}).",
        alert_title(alert_type),
        input.transaction.transaction_ref,
        input.transaction.amount,
        input.transaction.currency,
        input.assessment.score,
        input.assessment.band.as_str(),
    )
}

/// Fixed remediation workflow catalog, keyed by alert type. Each workflow is
/// a numbered list of 6-9 human-facing steps.
pub fn remediation_workflow(alert_type: AlertType) -> Vec<String> {
    let steps: &[&str] = match alert_type {
        AlertType::SanctionsBreach => &[
            "Freeze the transaction and block further processing",
            "Verify the screening hit against the current sanctions list versions",
            "Confirm the matched party identity with the relationship manager",
            "Notify the sanctions desk and the money laundering reporting officer",
            "Prepare the regulatory blocking report for the competent authority",
            "File the blocking report within the mandated deadline",
            "Record the decision trail in the case file",
        ],
        AlertType::PepHighRisk => &[
            "Confirm the politically exposed person designation and position held",
            "Obtain senior management approval for continuing the relationship",
            "Establish source of wealth and source of funds",
            "Apply enhanced due diligence to the transaction parties",
            "Review the expected account activity profile",
            "Document the approval decision and supporting evidence",
            "Schedule enhanced ongoing monitoring",
        ],
        AlertType::CriticalRuleBreach => &[
            "Identify the breached obligations and their regulatory source",
            "Suspend further transactions on the account pending review",
            "Gather the failing control evidence into the case file",
            "Escalate to the compliance committee",
            "Assess the reporting obligation to the regulator",
            "Prepare the remediation plan with owners and dates",
            "Track the remediation plan to closure",
        ],
        AlertType::StructuringPattern => &[
            "Aggregate all related transactions across the lookback window",
            "Compare the aggregate against the applicable reporting thresholds",
            "Analyze linked accounts for coordinated activity",
            "Review the customer profile for consistency with the activity",
            "Interview the relationship manager on the stated purpose",
            "Flag for SAR preparation if structuring intent is corroborated",
            "Prepare the suspicious activity narrative with transaction ids",
            "Submit the case for money laundering reporting officer review",
        ],
        AlertType::LayeringPattern => &[
            "Map the transaction chain across accounts and institutions",
            "Identify the origin and destination of the layered funds",
            "Check counterparties against internal watchlists",
            "Quantify the velocity and volume of the movement",
            "Request supporting documentation for the business purpose",
            "Flag for SAR preparation if no legitimate purpose is established",
            "Document the chain analysis in the case file",
        ],
        AlertType::VelocityAnomaly => &[
            "Compare the activity burst against the customer's baseline",
            "Verify whether a known business event explains the spike",
            "Review the counterparty set for new or unusual recipients",
            "Check for related alerts on the same customer",
            "Request an activity explanation through the relationship manager",
            "Decide on monitoring escalation or case closure",
        ],
        AlertType::HighRiskJurisdiction => &[
            "Confirm the jurisdiction classification against the current list revision",
            "Verify the transaction purpose and supporting contracts",
            "Screen the counterparty against sanctions and PEP lists",
            "Apply the enhanced due diligence checklist for the corridor",
            "Assess whether the corridor exposure requires limit changes",
            "Document the jurisdiction risk acceptance or rejection",
        ],
        AlertType::MultipleControlFailures => &[
            "List the failed controls and their regulatory obligations",
            "Determine whether the failures share a root cause",
            "Collect the missing or contradictory evidence per control",
            "Re-test the controls after evidence collection",
            "Escalate unresolved failures to the compliance committee",
            "Record the control remediation outcomes",
        ],
        AlertType::HighRiskTransaction => &[
            "Review the full risk assessment breakdown",
            "Validate the dominant risk signals against source data",
            "Obtain transaction purpose documentation",
            "Check the customer's recent alert history",
            "Decide on hold, release, or escalation",
            "Document the disposition with rationale",
        ],
        AlertType::MediumRiskTransaction => &[
            "Review the risk assessment summary",
            "Verify the transaction against the customer profile",
            "Spot-check the highest-weighted risk signal",
            "Confirm no pending alerts exist for the same parties",
            "Release or escalate per the desk procedure",
            "Record the review outcome",
        ],
        AlertType::MissingDocumentation => &[
            "List the missing evidence fields from the analysis",
            "Request the missing documents from the customer",
            "Set the documentation deadline per policy",
            "Verify received documents for completeness and authenticity",
            "Update the transaction record with the evidence references",
            "Close the request or escalate on deadline breach",
        ],
        AlertType::HighValueTransaction => &[
            "Confirm the amount and currency against the source instruction",
            "Verify the customer's transaction limit headroom",
            "Check the stated purpose against the account profile",
            "Confirm settlement instructions with the beneficiary bank",
            "Release the transaction or refer to compliance",
            "Record the review in the monitoring log",
        ],
        AlertType::CrossBorderTransaction => &[
            "Verify the corridor against the customer's declared activity",
            "Confirm travel rule data completeness for the transfer",
            "Check both jurisdictions for reporting obligations",
            "Validate the beneficiary bank relationship",
            "Release the transaction or refer to compliance",
            "Record the review in the monitoring log",
        ],
        AlertType::DocumentationReview => &[
            "Review the analysis summary for open documentation items",
            "Confirm the customer file holds current KYC documents",
            "Schedule collection of any expiring documents",
            "Update the customer file review date",
            "Close the review with a file note",
            "Record the outcome in the monitoring log",
        ],
        AlertType::RoutineMonitoring => &[
            "Log the transaction in the monitoring queue",
            "Confirm no related alerts are open for the customer",
            "Spot-check the feature vector for anomalies",
            "Verify the risk score against the band mapping",
            "Close the entry without further action",
            "Record the monitoring outcome",
        ],
    };

    steps
        .iter()
        .enumerate()
        .map(|(i, step)| format!("{}. {}", i + 1, step))
        .collect()
}
