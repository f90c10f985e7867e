// =====================================================================================
// File: core-rulestore/src/lib.rs
// Description: Rule corpus access with hybrid semantic + keyword retrieval
// =====================================================================================

//! # Core RuleStore Module
//!
//! Read-only access to the internal and external compliance rule corpora.
//! Retrieval is hybrid: every query runs a semantic and a keyword search,
//! result lists merge under reciprocal-rank fusion, and metadata filters
//! (jurisdiction, effective window, regulator, active flag) are applied
//! before deduplication and truncation. Writes happen only through the
//! ingestion path (`upsert_internal`), never during an evaluation.

pub mod remote;
pub mod search;
pub mod store;

pub use remote::RemoteRuleStore;
pub use search::{reciprocal_rank_fusion, RRF_K};
pub use store::InMemoryRuleStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use core_compliance::{RetrievedRule, Rule};

/// Result type alias for rule store operations
pub type RuleStoreResult<T> = Result<T, RuleStoreError>;

/// Errors raised by rule corpus access
#[derive(Error, Debug)]
pub enum RuleStoreError {
    /// Rule id/version not present in the corpus
    #[error("Rule not found: {rule_id} v{version}")]
    NotFound { rule_id: String, version: u32 },

    /// Transient upstream failure (network, 5xx, rate limit); retried
    #[error("Rule store upstream error: {message}")]
    Upstream { message: String },

    /// Upstream returned a payload the client cannot decode
    #[error("Rule store response error: {message}")]
    InvalidResponse { message: String },

    /// Rejected rule payload on ingestion
    #[error("Rule validation error: {field} - {message}")]
    Validation { field: String, message: String },
}

impl RuleStoreError {
    pub fn not_found<S: Into<String>>(rule_id: S, version: u32) -> Self {
        Self::NotFound {
            rule_id: rule_id.into(),
            version,
        }
    }

    pub fn upstream<S: Into<String>>(message: S) -> Self {
        Self::Upstream {
            message: message.into(),
        }
    }

    pub fn invalid_response<S: Into<String>>(message: S) -> Self {
        Self::InvalidResponse {
            message: message.into(),
        }
    }

    pub fn validation<S: Into<String>>(field: S, message: S) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Transient errors are worth a retry; the rest are not
    pub fn is_transient(&self) -> bool {
        matches!(self, RuleStoreError::Upstream { .. })
    }
}

/// Metadata filters recognized by the search operations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchFilters {
    /// Jurisdictions the transaction touches; a rule matches when its
    /// declared jurisdictions intersect this set (or declare GLOBAL reach)
    pub jurisdictions: Vec<String>,
    /// Rules must be in effect at this instant (typically the booking time)
    pub effective_at: Option<DateTime<Utc>>,
    /// Restrict to specific regulators
    pub regulators: Vec<String>,
    /// Only active rule versions (default true)
    pub active_only: bool,
}

impl Default for SearchFilters {
    fn default() -> Self {
        Self::new()
    }
}

impl SearchFilters {
    pub fn new() -> Self {
        Self {
            jurisdictions: Vec::new(),
            effective_at: None,
            regulators: Vec::new(),
            active_only: true,
        }
    }

    pub fn with_jurisdictions(mut self, jurisdictions: Vec<String>) -> Self {
        self.jurisdictions = jurisdictions;
        self
    }

    pub fn with_effective_at(mut self, at: DateTime<Utc>) -> Self {
        self.effective_at = Some(at);
        self
    }

    pub fn with_regulators(mut self, regulators: Vec<String>) -> Self {
        self.regulators = regulators;
        self
    }

    /// Whether a rule passes every filter
    pub fn matches(&self, rule: &Rule) -> bool {
        if self.active_only && !rule.is_active {
            return false;
        }

        if let Some(at) = self.effective_at {
            if !rule.in_effect_at(at) {
                return false;
            }
        }

        if !self.jurisdictions.is_empty() {
            let global = rule
                .jurisdictions
                .iter()
                .any(|j| j.eq_ignore_ascii_case("GLOBAL"));
            let intersects = rule.jurisdictions.iter().any(|j| {
                self.jurisdictions
                    .iter()
                    .any(|wanted| wanted.eq_ignore_ascii_case(j))
            });
            if !global && !intersects {
                return false;
            }
        }

        if !self.regulators.is_empty()
            && !self
                .regulators
                .iter()
                .any(|r| r.eq_ignore_ascii_case(&rule.regulator))
        {
            return false;
        }

        true
    }
}

/// Read access to a rule corpus with hybrid search
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// Hybrid search over the internal corpus
    async fn search_internal(
        &self,
        queries: &[String],
        top_k: usize,
        filters: &SearchFilters,
    ) -> RuleStoreResult<Vec<RetrievedRule>>;

    /// Hybrid search over the external regulatory corpus
    async fn search_external(
        &self,
        queries: &[String],
        top_k: usize,
        filters: &SearchFilters,
    ) -> RuleStoreResult<Vec<RetrievedRule>>;

    /// Exact lookup by id and version
    async fn get_rule(&self, rule_id: &str, version: u32) -> RuleStoreResult<Rule>;

    /// Idempotent ingestion write; not invoked by the evaluation path
    async fn upsert_internal(&self, rule: Rule) -> RuleStoreResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_compliance::{RuleSource, Severity};

    fn rule(id: &str, jurisdictions: &[&str], regulator: &str) -> Rule {
        Rule {
            rule_id: id.to_string(),
            version: 1,
            source: RuleSource::Internal,
            regulator: regulator.to_string(),
            jurisdictions: jurisdictions.iter().map(|s| s.to_string()).collect(),
            title: "test rule".to_string(),
            body: "test body".to_string(),
            applicability_conditions: Vec::new(),
            applicability_text: String::new(),
            expected_evidence: Vec::new(),
            severity: Severity::Medium,
            effective_date: Utc::now() - chrono::Duration::days(10),
            sunset_date: None,
            is_active: true,
        }
    }

    #[test]
    fn test_filters_jurisdiction_intersection() {
        let filters =
            SearchFilters::new().with_jurisdictions(vec!["SG".to_string(), "HK".to_string()]);
        assert!(filters.matches(&rule("R-1", &["SG"], "MAS")));
        assert!(filters.matches(&rule("R-2", &["US", "HK"], "FinCEN")));
        assert!(!filters.matches(&rule("R-3", &["US"], "FinCEN")));
        // GLOBAL rules always pass the jurisdiction filter
        assert!(filters.matches(&rule("R-4", &["GLOBAL"], "FATF")));
    }

    #[test]
    fn test_filters_effective_window() {
        let filters = SearchFilters::new().with_effective_at(Utc::now());
        let mut r = rule("R-1", &["SG"], "MAS");
        assert!(filters.matches(&r));

        r.effective_date = Utc::now() + chrono::Duration::days(5);
        assert!(!filters.matches(&r));
    }

    #[test]
    fn test_filters_active_only() {
        let filters = SearchFilters::new();
        let mut r = rule("R-1", &["SG"], "MAS");
        r.is_active = false;
        assert!(!filters.matches(&r));
    }

    #[test]
    fn test_filters_regulator() {
        let filters = SearchFilters::new().with_regulators(vec!["MAS".to_string()]);
        assert!(filters.matches(&rule("R-1", &["SG"], "MAS")));
        assert!(filters.matches(&rule("R-1", &["SG"], "mas")));
        assert!(!filters.matches(&rule("R-2", &["SG"], "HKMA")));
    }
}
