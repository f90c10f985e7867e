// =====================================================================================
// File: core-pipeline/src/context.rs
// Description: Query probe construction and history snapshotting
// =====================================================================================

use tracing::debug;

use core_compliance::{CustomerRiskRating, Transaction, HIGH_VALUE_THRESHOLD};
use core_rulestore::SearchFilters;

/// Builds the retrieval context for one evaluation: 3-8 natural-language
/// rule-shaped probes derived from the transaction, plus the search filters
/// the rule store applies.
pub struct ContextBuilder;

impl ContextBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Derive the query probes. The first three always exist; the rest are
    /// conditional on transaction attributes, capped at eight.
    pub fn build_queries(&self, transaction: &Transaction) -> Vec<String> {
        let bracket = Self::amount_bracket(transaction.amount);
        let mut queries = vec![
            format!(
                "anti-money-laundering obligations for {} {} {} transactions",
                bracket, transaction.currency, bracket_channel(transaction)
            ),
            format!(
                "transaction monitoring requirements in {} for {} risk customers",
                transaction.originator_country,
                transaction.customer_risk_rating.as_str()
            ),
            format!(
                "reporting thresholds and record keeping for {} payments",
                transaction.currency
            ),
        ];

        if transaction.originator_country != transaction.beneficiary_country {
            queries.push(format!(
                "cross-border transfer requirements for the {} to {} corridor",
                transaction.originator_country, transaction.beneficiary_country
            ));
            queries.push("travel rule originator and beneficiary information completeness".to_string());
        }

        if transaction.pep_indicator {
            queries.push(
                "politically exposed person transaction approval and enhanced due diligence"
                    .to_string(),
            );
        }

        if transaction.sanctions_hit {
            queries.push("sanctions screening match handling and blocking obligations".to_string());
        }

        if transaction.customer_risk_rating >= CustomerRiskRating::High {
            queries.push("enhanced monitoring obligations for high risk customer activity".to_string());
        }

        queries.truncate(8);
        debug!(
            transaction_ref = %transaction.transaction_ref,
            probes = queries.len(),
            "Built retrieval probes"
        );
        queries
    }

    /// Filters for the rule search: the corridor's jurisdictions, evaluated
    /// at the booking instant, active rules only.
    pub fn build_filters(&self, transaction: &Transaction) -> SearchFilters {
        let mut jurisdictions = vec![transaction.originator_country.clone()];
        if transaction.beneficiary_country != transaction.originator_country {
            jurisdictions.push(transaction.beneficiary_country.clone());
        }
        SearchFilters::new()
            .with_jurisdictions(jurisdictions)
            .with_effective_at(transaction.booking_datetime)
    }

    fn amount_bracket(amount: f64) -> &'static str {
        if amount > 100_000.0 {
            "institutional-size"
        } else if amount > HIGH_VALUE_THRESHOLD {
            "high-value"
        } else {
            "retail-size"
        }
    }
}

fn bracket_channel(transaction: &Transaction) -> &str {
    transaction.channel.as_deref().unwrap_or("payment")
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}
