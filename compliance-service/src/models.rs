// =====================================================================================
// File: compliance-service/src/models.rs
// Description: Request/response DTOs for the compliance service API
// =====================================================================================

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use core_compliance::{
    ComplianceAnalysis, CustomerRiskRating, Rule, RuleCondition, RuleSource, Severity,
    Transaction, TransactionStatus,
};

/// Inbound transaction submission
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SubmitTransactionRequest {
    #[validate(length(min = 1, max = 64))]
    pub transaction_ref: String,
    #[validate(range(min = 0.0))]
    pub amount: f64,
    #[validate(length(equal = 3))]
    pub currency: String,
    pub booking_datetime: DateTime<Utc>,
    pub value_date: NaiveDate,
    #[validate(length(min = 1))]
    pub originator_name: String,
    #[validate(length(min = 1))]
    pub originator_account: String,
    #[validate(length(equal = 2))]
    pub originator_country: String,
    #[validate(length(min = 1))]
    pub beneficiary_name: String,
    #[validate(length(min = 1))]
    pub beneficiary_account: String,
    #[validate(length(equal = 2))]
    pub beneficiary_country: String,
    #[validate(length(min = 1))]
    pub customer_id: String,
    pub customer_risk_rating: CustomerRiskRating,
    pub channel: Option<String>,
    pub product: Option<String>,
    pub swift_message_type: Option<String>,
    pub swift_purpose_code: Option<String>,
    pub swift_charges: Option<String>,
    #[serde(default)]
    pub travel_rule_complete: bool,
    #[serde(default)]
    pub is_fx: bool,
    #[serde(default)]
    pub pep_indicator: bool,
    #[serde(default)]
    pub sanctions_hit: bool,
}

impl SubmitTransactionRequest {
    /// Build the domain transaction, preserving the submitted payload
    /// verbatim.
    pub fn into_transaction(self, raw_payload: serde_json::Value, now: DateTime<Utc>) -> Transaction {
        Transaction {
            id: Uuid::new_v4(),
            transaction_ref: self.transaction_ref,
            amount: self.amount,
            currency: self.currency.to_uppercase(),
            booking_datetime: self.booking_datetime,
            value_date: self.value_date,
            originator_name: self.originator_name,
            originator_account: self.originator_account,
            originator_country: self.originator_country.to_uppercase(),
            beneficiary_name: self.beneficiary_name,
            beneficiary_account: self.beneficiary_account,
            beneficiary_country: self.beneficiary_country.to_uppercase(),
            customer_id: self.customer_id,
            customer_risk_rating: self.customer_risk_rating,
            channel: self.channel,
            product: self.product,
            swift_message_type: self.swift_message_type,
            swift_purpose_code: self.swift_purpose_code,
            swift_charges: self.swift_charges,
            travel_rule_complete: self.travel_rule_complete,
            is_fx: self.is_fx,
            pep_indicator: self.pep_indicator,
            sanctions_hit: self.sanctions_hit,
            status: TransactionStatus::Pending,
            created_at: now,
            processing_started_at: None,
            processing_completed_at: None,
            raw_payload,
        }
    }
}

/// 202 Accepted response for a submitted transaction
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitTransactionResponse {
    pub transaction_id: String,
    pub task_id: String,
    pub status: String,
}

/// Status projection for one transaction
#[derive(Debug, Serialize, Deserialize)]
pub struct TransactionStatusResponse {
    pub transaction_id: String,
    pub task_status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_band: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// ComplianceAnalysis projection returned by the API
#[derive(Debug, Serialize, Deserialize)]
pub struct ComplianceAnalysisResponse {
    pub transaction_id: String,
    pub compliance_score: f64,
    pub risk_band: String,
    pub risk_breakdown: core_compliance::RiskBreakdown,
    pub applicable_rules: Vec<core_compliance::ScoredRuleRef>,
    pub evidence_map: std::collections::HashMap<String, core_compliance::EvidenceMap>,
    pub control_results: Vec<core_compliance::ControlResult>,
    pub pattern_scores: core_compliance::PatternScores,
    pub bayesian_summary: f64,
    pub remediation_actions: Vec<core_compliance::RemediationAction>,
    pub analyst_summary: String,
    pub processing_time_seconds: f64,
}

impl From<ComplianceAnalysis> for ComplianceAnalysisResponse {
    fn from(analysis: ComplianceAnalysis) -> Self {
        Self {
            transaction_id: analysis.transaction_ref,
            compliance_score: analysis.compliance_score,
            risk_band: analysis.risk_band.as_str().to_string(),
            risk_breakdown: analysis.risk_breakdown,
            applicable_rules: analysis.applicable_rules,
            evidence_map: analysis.evidence_map,
            control_results: analysis.control_results,
            pattern_scores: analysis.pattern_scores,
            bayesian_summary: analysis.bayesian_summary,
            remediation_actions: analysis.remediation_actions,
            analyst_summary: analysis.analyst_summary,
            processing_time_seconds: analysis.processing_time_seconds,
        }
    }
}

/// Listing query parameters
#[derive(Debug, Deserialize)]
pub struct ListTransactionsQuery {
    pub status_filter: Option<String>,
    pub customer_id: Option<String>,
    #[serde(default)]
    pub skip: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    50
}

/// Listing row projection
#[derive(Debug, Serialize, Deserialize)]
pub struct TransactionSummary {
    pub transaction_id: String,
    pub amount: f64,
    pub currency: String,
    pub status: String,
    pub customer_id: String,
    pub booking_datetime: DateTime<Utc>,
}

impl From<Transaction> for TransactionSummary {
    fn from(tx: Transaction) -> Self {
        Self {
            transaction_id: tx.transaction_ref,
            amount: tx.amount,
            currency: tx.currency,
            status: tx.status.as_str().to_string(),
            customer_id: tx.customer_id,
            booking_datetime: tx.booking_datetime,
        }
    }
}

/// Inbound rule ingestion payload
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SubmitRuleRequest {
    #[validate(length(min = 1, max = 64))]
    pub rule_id: String,
    #[validate(range(min = 1))]
    pub version: u32,
    #[validate(length(min = 1))]
    pub regulator: String,
    #[validate(length(min = 1))]
    pub jurisdictions: Vec<String>,
    #[validate(length(min = 1))]
    pub title: String,
    #[validate(length(min = 1))]
    pub body: String,
    #[serde(default)]
    pub applicability_conditions: Vec<RuleCondition>,
    #[serde(default)]
    pub applicability_text: String,
    #[serde(default)]
    pub expected_evidence: Vec<String>,
    pub severity: Severity,
    pub effective_date: DateTime<Utc>,
    pub sunset_date: Option<DateTime<Utc>>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

impl From<SubmitRuleRequest> for Rule {
    fn from(req: SubmitRuleRequest) -> Self {
        Rule {
            rule_id: req.rule_id,
            version: req.version,
            source: RuleSource::Internal,
            regulator: req.regulator,
            jurisdictions: req.jurisdictions,
            title: req.title,
            body: req.body,
            applicability_conditions: req.applicability_conditions,
            applicability_text: req.applicability_text,
            expected_evidence: req.expected_evidence,
            severity: req.severity,
            effective_date: req.effective_date,
            sunset_date: req.sunset_date,
            is_active: req.is_active,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid_request() -> SubmitTransactionRequest {
        serde_json::from_value(json!({
            "transaction_ref": "TXN-1",
            "amount": 25000.0,
            "currency": "usd",
            "booking_datetime": "2025-06-02T12:00:00Z",
            "value_date": "2025-06-02",
            "originator_name": "Acme Pte Ltd",
            "originator_account": "ACC-1",
            "originator_country": "SG",
            "beneficiary_name": "Target Ltd",
            "beneficiary_account": "ACC-2",
            "beneficiary_country": "HK",
            "customer_id": "CUST-1",
            "customer_risk_rating": "medium"
        }))
        .unwrap()
    }

    #[test]
    fn test_submission_validation() {
        let request = valid_request();
        assert!(request.validate().is_ok());

        let mut bad = valid_request();
        bad.currency = "DOLLARS".to_string();
        assert!(bad.validate().is_err());

        let mut bad = valid_request();
        bad.amount = -5.0;
        assert!(bad.validate().is_err());

        let mut bad = valid_request();
        bad.originator_country = "SGP".to_string();
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_into_transaction_normalizes_and_defaults() {
        let request = valid_request();
        let raw = serde_json::to_value(&request).unwrap();
        let now = Utc::now();
        let tx = request.into_transaction(raw.clone(), now);

        assert_eq!(tx.currency, "USD");
        assert_eq!(tx.status, TransactionStatus::Pending);
        assert!(!tx.pep_indicator);
        assert!(!tx.sanctions_hit);
        assert_eq!(tx.raw_payload, raw);
        assert!(tx.processing_started_at.is_none());
    }

    #[test]
    fn test_rule_request_conversion() {
        let request: SubmitRuleRequest = serde_json::from_value(json!({
            "rule_id": "R-1",
            "version": 1,
            "regulator": "MAS",
            "jurisdictions": ["SG"],
            "title": "Travel rule",
            "body": "Complete originator information required",
            "severity": "high",
            "effective_date": "2025-01-01T00:00:00Z"
        }))
        .unwrap();
        assert!(request.validate().is_ok());

        let rule: Rule = request.into();
        assert_eq!(rule.source, RuleSource::Internal);
        assert!(rule.is_active);
        assert_eq!(rule.severity, Severity::High);
    }
}
