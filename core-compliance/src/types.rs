// =====================================================================================
// File: core-compliance/src/types.rs
// Description: Core types and enums for the transaction compliance domain
// =====================================================================================

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Transaction lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionStatus {
    /// Accepted and queued, evaluation not started
    Pending,
    /// An evaluation worker owns the transaction
    Processing,
    /// Evaluation finished and a ComplianceAnalysis is persisted
    Completed,
    /// Evaluation failed; no analysis exists
    Failed,
}

impl TransactionStatus {
    /// Terminal states never transition again
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionStatus::Completed | TransactionStatus::Failed)
    }

    /// Valid lifecycle edges: PENDING -> PROCESSING -> (COMPLETED | FAILED).
    /// A FAILED transaction may be re-queued and re-enter PROCESSING.
    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        match (self, next) {
            (TransactionStatus::Pending, TransactionStatus::Processing) => true,
            (TransactionStatus::Failed, TransactionStatus::Processing) => true,
            (TransactionStatus::Processing, TransactionStatus::Completed) => true,
            (TransactionStatus::Processing, TransactionStatus::Failed) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::Processing => "PROCESSING",
            TransactionStatus::Completed => "COMPLETED",
            TransactionStatus::Failed => "FAILED",
        }
    }
}

impl std::str::FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(TransactionStatus::Pending),
            "PROCESSING" => Ok(TransactionStatus::Processing),
            "COMPLETED" => Ok(TransactionStatus::Completed),
            "FAILED" => Ok(TransactionStatus::Failed),
            other => Err(format!("unknown transaction status: {}", other)),
        }
    }
}

/// Customer risk rating assigned by onboarding (ordered by risk)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CustomerRiskRating {
    Low = 1,
    Medium = 2,
    High = 3,
    Critical = 4,
}

impl CustomerRiskRating {
    pub fn as_str(&self) -> &'static str {
        match self {
            CustomerRiskRating::Low => "low",
            CustomerRiskRating::Medium => "medium",
            CustomerRiskRating::High => "high",
            CustomerRiskRating::Critical => "critical",
        }
    }
}

impl std::str::FromStr for CustomerRiskRating {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(CustomerRiskRating::Low),
            "medium" => Ok(CustomerRiskRating::Medium),
            "high" => Ok(CustomerRiskRating::High),
            "critical" => Ok(CustomerRiskRating::Critical),
            other => Err(format!("unknown customer risk rating: {}", other)),
        }
    }
}

/// Rule and alert severity (ordered by impact)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low = 1,
    Medium = 2,
    High = 3,
    Critical = 4,
}

impl Severity {
    /// Weight used by the rule-based risk aggregation
    pub fn weight(&self) -> f64 {
        match self {
            Severity::Critical => 1.0,
            Severity::High => 0.7,
            Severity::Medium => 0.4,
            Severity::Low => 0.2,
        }
    }

    /// SLA budget for alerts of this severity
    pub fn sla_hours(&self) -> i64 {
        match self {
            Severity::Critical => 12,
            Severity::High => 24,
            Severity::Medium => 48,
            Severity::Low => 72,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(format!("unknown severity: {}", other)),
        }
    }
}

/// An immutable transaction evaluation request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    /// Internal id
    pub id: Uuid,
    /// Business id, unique across the platform
    pub transaction_ref: String,
    pub amount: f64,
    pub currency: String,
    pub booking_datetime: DateTime<Utc>,
    pub value_date: NaiveDate,
    pub originator_name: String,
    pub originator_account: String,
    pub originator_country: String,
    pub beneficiary_name: String,
    pub beneficiary_account: String,
    pub beneficiary_country: String,
    pub customer_id: String,
    pub customer_risk_rating: CustomerRiskRating,
    pub channel: Option<String>,
    pub product: Option<String>,
    pub swift_message_type: Option<String>,
    pub swift_purpose_code: Option<String>,
    pub swift_charges: Option<String>,
    pub travel_rule_complete: bool,
    pub is_fx: bool,
    pub pep_indicator: bool,
    pub sanctions_hit: bool,
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub processing_completed_at: Option<DateTime<Utc>>,
    /// Submitted payload, preserved verbatim
    pub raw_payload: serde_json::Value,
}

impl Transaction {
    /// Look up a named evidence field on the transaction. Returns `None`
    /// for unknown field names; `Some(None)` for known-but-empty values.
    pub fn evidence_field(&self, field: &str) -> Option<Option<String>> {
        fn non_empty(value: &str) -> Option<String> {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }

        match field {
            "amount" => Some(Some(self.amount.to_string())),
            "currency" => Some(non_empty(&self.currency)),
            "originator_name" => Some(non_empty(&self.originator_name)),
            "originator_account" => Some(non_empty(&self.originator_account)),
            "originator_country" => Some(non_empty(&self.originator_country)),
            "beneficiary_name" => Some(non_empty(&self.beneficiary_name)),
            "beneficiary_account" => Some(non_empty(&self.beneficiary_account)),
            "beneficiary_country" => Some(non_empty(&self.beneficiary_country)),
            "customer_id" => Some(non_empty(&self.customer_id)),
            "channel" => Some(self.channel.as_deref().and_then(non_empty)),
            "product" => Some(self.product.as_deref().and_then(non_empty)),
            "swift_message_type" => Some(self.swift_message_type.as_deref().and_then(non_empty)),
            "swift_purpose_code" | "swift_f70_purpose" => {
                Some(self.swift_purpose_code.as_deref().and_then(non_empty))
            }
            "swift_charges" => Some(self.swift_charges.as_deref().and_then(non_empty)),
            "travel_rule_complete" => Some(Some(self.travel_rule_complete.to_string())),
            "pep_indicator" => Some(Some(self.pep_indicator.to_string())),
            "sanctions_screening" | "sanctions_hit" => Some(Some(self.sanctions_hit.to_string())),
            // Fields sourced from the raw payload (e.g. customer_kyc_date)
            other => match self.raw_payload.get(other) {
                Some(serde_json::Value::Null) => Some(None),
                Some(serde_json::Value::String(s)) => Some(non_empty(s)),
                Some(v) => Some(Some(v.to_string())),
                None => None,
            },
        }
    }

    /// Compact single-line rendering used in LLM prompts
    pub fn summary_line(&self) -> String {
        format!(
            "{} {:.2} {} booked {} | {} ({}) -> {} ({}) | customer {} rated {:?} | PEP={} sanctions_hit={} travel_rule={}",
            self.transaction_ref,
            self.amount,
            self.currency,
            self.booking_datetime.to_rfc3339(),
            self.originator_name,
            self.originator_country,
            self.beneficiary_name,
            self.beneficiary_country,
            self.customer_id,
            self.customer_risk_rating,
            self.pep_indicator,
            self.sanctions_hit,
            self.travel_rule_complete,
        )
    }
}

/// Origin corpus of a rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleSource {
    Internal,
    External,
}

/// A structured applicability constraint declared on a rule. The evidence
/// mapper marks a field contradictory when the transaction value violates it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleCondition {
    pub field: String,
    pub expected: serde_json::Value,
}

/// A compliance obligation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub rule_id: String,
    pub version: u32,
    pub source: RuleSource,
    pub regulator: String,
    pub jurisdictions: Vec<String>,
    pub title: String,
    pub body: String,
    pub applicability_conditions: Vec<RuleCondition>,
    pub applicability_text: String,
    pub expected_evidence: Vec<String>,
    pub severity: Severity,
    pub effective_date: DateTime<Utc>,
    pub sunset_date: Option<DateTime<Utc>>,
    pub is_active: bool,
}

impl Rule {
    /// A rule is retrievable iff active and inside its effective window
    pub fn in_effect_at(&self, at: DateTime<Utc>) -> bool {
        self.is_active
            && self.effective_date <= at
            && self.sunset_date.map_or(true, |sunset| at < sunset)
    }
}

/// A rule instance as returned by a search. Ephemeral: lives only within one
/// evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedRule {
    pub rule: Rule,
    /// Fused relevance score in [0, 1]
    pub score: f64,
    /// The query string that surfaced this rule
    pub query: String,
}

/// Per-rule applicability judgment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Applicability {
    pub applies: bool,
    pub rationale: String,
    pub confidence: f64,
}

/// Per-rule partition of expected evidence field names. The three sets are
/// disjoint by construction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvidenceMap {
    pub present: Vec<String>,
    pub missing: Vec<String>,
    pub contradictory: Vec<String>,
}

impl EvidenceMap {
    pub fn has_missing(&self) -> bool {
        !self.missing.is_empty()
    }

    pub fn has_contradictory(&self) -> bool {
        !self.contradictory.is_empty()
    }
}

/// Control test outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlStatus {
    Pass,
    Fail,
    Partial,
}

/// Result of testing one rule's control against one transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlResult {
    pub rule_id: String,
    pub status: ControlStatus,
    /// Severity copied from the rule; the model's opinion never overrides it
    pub severity: Severity,
    /// Compliance score in [0, 100]; passes score >= 70, fails <= 40
    pub compliance_score: f64,
    pub rationale: String,
}

/// Deterministic per-transaction features computed from the transaction and
/// its short customer history
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub amount: f64,
    pub is_high_value: bool,
    pub is_round_number: bool,
    pub is_cross_border: bool,
    pub is_high_risk_country: bool,
    pub potential_structuring: bool,
    pub count_24h: u32,
    pub count_7d: u32,
    pub count_30d: u32,
    pub same_day_count: u32,
    pub volume_24h: f64,
    pub volume_7d: f64,
    pub volume_30d: f64,
    pub average_7d: f64,
    pub average_30d: f64,
    pub max_amount_30d: f64,
    pub distinct_beneficiaries_30d: u32,
    pub days_since_last_transaction: Option<i64>,
}

/// The five AML pattern scores, each in [0, 100]
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PatternScores {
    pub structuring: f64,
    pub layering: f64,
    pub circular_transfer: f64,
    pub rapid_movement: f64,
    pub velocity_anomaly: f64,
}

impl PatternScores {
    pub fn max(&self) -> f64 {
        self.structuring
            .max(self.layering)
            .max(self.circular_transfer)
            .max(self.rapid_movement)
            .max(self.velocity_anomaly)
    }

    /// True when no pattern fired at all
    pub fn is_empty(&self) -> bool {
        self.max() <= 0.0
    }
}

/// Probability distribution over the four risk classes, summing to 1
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Posterior {
    pub low: f64,
    pub medium: f64,
    pub high: f64,
    pub critical: f64,
}

impl Posterior {
    pub fn sum(&self) -> f64 {
        self.low + self.medium + self.high + self.critical
    }

    /// Scalar expected risk in [0, 1] under the fusion class weights
    pub fn expected_risk(&self) -> f64 {
        0.1 * self.low + 0.4 * self.medium + 0.7 * self.high + 0.95 * self.critical
    }
}

/// Coarse risk bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RiskBand {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskBand {
    /// Fixed band mapping: [0,30) Low; [30,60) Medium; [60,80) High;
    /// [80,100] Critical.
    pub fn from_score(score: f64) -> Self {
        if score >= 80.0 {
            RiskBand::Critical
        } else if score >= 60.0 {
            RiskBand::High
        } else if score >= 30.0 {
            RiskBand::Medium
        } else {
            RiskBand::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskBand::Low => "Low",
            RiskBand::Medium => "Medium",
            RiskBand::High => "High",
            RiskBand::Critical => "Critical",
        }
    }
}

impl std::str::FromStr for RiskBand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Low" => Ok(RiskBand::Low),
            "Medium" => Ok(RiskBand::Medium),
            "High" => Ok(RiskBand::High),
            "Critical" => Ok(RiskBand::Critical),
            other => Err(format!("unknown risk band: {}", other)),
        }
    }
}

/// Per-signal breakdown persisted for transparency
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskBreakdown {
    pub rule_based: f64,
    pub ml_based: f64,
    pub pattern_based: f64,
}

/// Fused risk score and band
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub score: f64,
    pub band: RiskBand,
    pub breakdown: RiskBreakdown,
}

/// Rule id with the compliance score its control test produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredRuleRef {
    pub rule_id: String,
    pub compliance_score: f64,
}

/// Persisted evaluation result, 1:1 with Transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceAnalysis {
    pub id: Uuid,
    pub transaction_id: Uuid,
    pub transaction_ref: String,
    pub compliance_score: f64,
    pub risk_band: RiskBand,
    pub risk_breakdown: RiskBreakdown,
    pub applicable_rules: Vec<ScoredRuleRef>,
    /// Per-rule evidence partition, keyed by rule id
    pub evidence_map: HashMap<String, EvidenceMap>,
    pub control_results: Vec<ControlResult>,
    pub pattern_scores: PatternScores,
    /// Scalar expected risk from the Bayesian posterior
    pub bayesian_summary: f64,
    /// Remediation actions derived from the evaluation
    pub remediation_actions: Vec<RemediationAction>,
    /// Plain-text analyst narrative, truncated to 2 KB
    pub analyst_summary: String,
    pub processing_time_seconds: f64,
    pub created_at: DateTime<Utc>,
}

/// Human queue an alert is routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlertRole {
    Front,
    Compliance,
    Legal,
}

impl AlertRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertRole::Front => "Front",
            AlertRole::Compliance => "Compliance",
            AlertRole::Legal => "Legal",
        }
    }
}

impl std::str::FromStr for AlertRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Front" => Ok(AlertRole::Front),
            "Compliance" => Ok(AlertRole::Compliance),
            "Legal" => Ok(AlertRole::Legal),
            other => Err(format!("unknown alert role: {}", other)),
        }
    }
}

/// Closed catalog of alert types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    SanctionsBreach,
    PepHighRisk,
    CriticalRuleBreach,
    StructuringPattern,
    LayeringPattern,
    VelocityAnomaly,
    HighRiskJurisdiction,
    MultipleControlFailures,
    HighRiskTransaction,
    MediumRiskTransaction,
    MissingDocumentation,
    HighValueTransaction,
    CrossBorderTransaction,
    DocumentationReview,
    RoutineMonitoring,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::SanctionsBreach => "sanctions_breach",
            AlertType::PepHighRisk => "pep_high_risk",
            AlertType::CriticalRuleBreach => "critical_rule_breach",
            AlertType::StructuringPattern => "structuring_pattern",
            AlertType::LayeringPattern => "layering_pattern",
            AlertType::VelocityAnomaly => "velocity_anomaly",
            AlertType::HighRiskJurisdiction => "high_risk_jurisdiction",
            AlertType::MultipleControlFailures => "multiple_control_failures",
            AlertType::HighRiskTransaction => "high_risk_transaction",
            AlertType::MediumRiskTransaction => "medium_risk_transaction",
            AlertType::MissingDocumentation => "missing_documentation",
            AlertType::HighValueTransaction => "high_value_transaction",
            AlertType::CrossBorderTransaction => "cross_border_transaction",
            AlertType::DocumentationReview => "documentation_review",
            AlertType::RoutineMonitoring => "routine_monitoring",
        }
    }
}

impl std::str::FromStr for AlertType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sanctions_breach" => Ok(AlertType::SanctionsBreach),
            "pep_high_risk" => Ok(AlertType::PepHighRisk),
            "critical_rule_breach" => Ok(AlertType::CriticalRuleBreach),
            "structuring_pattern" => Ok(AlertType::StructuringPattern),
            "layering_pattern" => Ok(AlertType::LayeringPattern),
            "velocity_anomaly" => Ok(AlertType::VelocityAnomaly),
            "high_risk_jurisdiction" => Ok(AlertType::HighRiskJurisdiction),
            "multiple_control_failures" => Ok(AlertType::MultipleControlFailures),
            "high_risk_transaction" => Ok(AlertType::HighRiskTransaction),
            "medium_risk_transaction" => Ok(AlertType::MediumRiskTransaction),
            "missing_documentation" => Ok(AlertType::MissingDocumentation),
            "high_value_transaction" => Ok(AlertType::HighValueTransaction),
            "cross_border_transaction" => Ok(AlertType::CrossBorderTransaction),
            "documentation_review" => Ok(AlertType::DocumentationReview),
            "routine_monitoring" => Ok(AlertType::RoutineMonitoring),
            other => Err(format!("unknown alert type: {}", other)),
        }
    }
}

/// Alert workflow status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertStatus {
    Pending,
    Acknowledged,
    InProgress,
    Resolved,
    Escalated,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Pending => "PENDING",
            AlertStatus::Acknowledged => "ACKNOWLEDGED",
            AlertStatus::InProgress => "IN_PROGRESS",
            AlertStatus::Resolved => "RESOLVED",
            AlertStatus::Escalated => "ESCALATED",
        }
    }
}

/// A role-targeted alert with its remediation workflow and SLA
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    /// Deterministic id: ALT-{transaction uuid}-{ordinal}
    pub alert_id: String,
    pub transaction_id: Uuid,
    pub role: AlertRole,
    pub alert_type: AlertType,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    pub context: serde_json::Value,
    pub evidence: serde_json::Value,
    /// Numbered human workflow, 6-9 steps
    pub remediation_workflow: Vec<String>,
    pub sla_deadline: DateTime<Utc>,
    pub status: AlertStatus,
    pub created_at: DateTime<Utc>,
}

/// Case lifecycle status (independent of the pipeline)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CaseStatus {
    Open,
    UnderInvestigation,
    Closed,
}

impl std::str::FromStr for AlertStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(AlertStatus::Pending),
            "ACKNOWLEDGED" => Ok(AlertStatus::Acknowledged),
            "IN_PROGRESS" => Ok(AlertStatus::InProgress),
            "RESOLVED" => Ok(AlertStatus::Resolved),
            "ESCALATED" => Ok(AlertStatus::Escalated),
            other => Err(format!("unknown alert status: {}", other)),
        }
    }
}

impl CaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaseStatus::Open => "OPEN",
            CaseStatus::UnderInvestigation => "UNDER_INVESTIGATION",
            CaseStatus::Closed => "CLOSED",
        }
    }
}

impl std::str::FromStr for CaseStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OPEN" => Ok(CaseStatus::Open),
            "UNDER_INVESTIGATION" => Ok(CaseStatus::UnderInvestigation),
            "CLOSED" => Ok(CaseStatus::Closed),
            other => Err(format!("unknown case status: {}", other)),
        }
    }
}

/// Investigation case created for Critical-band evaluations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceCase {
    pub id: Uuid,
    pub case_ref: String,
    pub transaction_id: Uuid,
    pub risk_score: f64,
    pub linked_alert_ids: Vec<String>,
    pub evidence_refs: Vec<String>,
    pub status: CaseStatus,
    pub created_at: DateTime<Utc>,
}

/// Remediation action kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RemediationType {
    Investigate,
    EnhancedDd,
    CollectDocuments,
    FileSar,
    Review,
}

/// A derived remediation action persisted alongside alerts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemediationAction {
    pub action_type: RemediationType,
    pub owner: AlertRole,
    pub sla_hours: i64,
    pub linked_alert_ids: Vec<String>,
    pub details: serde_json::Value,
}
