// =====================================================================================
// File: core-compliance/src/features.rs
// Description: Deterministic per-transaction feature computation
// =====================================================================================

use chrono::Duration;
use tracing::debug;

use crate::{
    countries::HighRiskCountrySet,
    types::{FeatureVector, Transaction},
};

/// Reporting threshold above which a transaction counts as high-value,
/// in the transaction currency (no FX normalization).
pub const HIGH_VALUE_THRESHOLD: f64 = 10_000.0;

/// Amount bands just under the common reporting thresholds; amounts placed
/// here together with repeat activity flag potential structuring.
const STRUCTURING_BANDS: [(f64, f64); 2] = [(4_500.0, 5_000.0), (9_000.0, 10_000.0)];

/// Pure computation of deterministic features from a transaction and its
/// short customer history. Safe to recompute; never fails.
pub struct FeatureEngine {
    high_risk_countries: HighRiskCountrySet,
}

impl FeatureEngine {
    pub fn new(high_risk_countries: HighRiskCountrySet) -> Self {
        Self {
            high_risk_countries,
        }
    }

    /// Compute the feature vector. `history` holds the customer's prior
    /// transactions inside the snapshot window; the evaluated transaction
    /// itself is never part of it.
    pub fn compute(&self, transaction: &Transaction, history: &[Transaction]) -> FeatureVector {
        let at = transaction.booking_datetime;

        let in_window = |hours: i64| {
            history
                .iter()
                .filter(move |t| {
                    t.booking_datetime <= at && at - t.booking_datetime < Duration::hours(hours)
                })
        };

        let count_24h = in_window(24).count() as u32;
        let count_7d = in_window(24 * 7).count() as u32;
        let count_30d = in_window(24 * 30).count() as u32;

        let volume_24h: f64 = in_window(24).map(|t| t.amount).sum();
        let volume_7d: f64 = in_window(24 * 7).map(|t| t.amount).sum();
        let volume_30d: f64 = in_window(24 * 30).map(|t| t.amount).sum();

        let average_7d = if count_7d > 0 {
            volume_7d / count_7d as f64
        } else {
            0.0
        };
        let average_30d = if count_30d > 0 {
            volume_30d / count_30d as f64
        } else {
            0.0
        };

        let same_day_count = history
            .iter()
            .filter(|t| t.booking_datetime.date_naive() == at.date_naive())
            .count() as u32;

        let max_amount_30d = in_window(24 * 30)
            .map(|t| t.amount)
            .fold(0.0_f64, f64::max);

        let distinct_beneficiaries_30d = {
            let mut accounts: Vec<&str> = in_window(24 * 30)
                .map(|t| t.beneficiary_account.as_str())
                .collect();
            accounts.sort_unstable();
            accounts.dedup();
            accounts.len() as u32
        };

        let days_since_last_transaction = history
            .iter()
            .filter(|t| t.booking_datetime <= at)
            .map(|t| (at - t.booking_datetime).num_days())
            .min();

        let is_cross_border = transaction.originator_country != transaction.beneficiary_country;
        let is_high_risk_country = self
            .high_risk_countries
            .contains(&transaction.originator_country)
            || self
                .high_risk_countries
                .contains(&transaction.beneficiary_country);

        let in_structuring_band = STRUCTURING_BANDS
            .iter()
            .any(|(lo, hi)| transaction.amount >= *lo && transaction.amount <= *hi);
        let potential_structuring = in_structuring_band && count_24h >= 2;

        let features = FeatureVector {
            amount: transaction.amount,
            is_high_value: transaction.amount > HIGH_VALUE_THRESHOLD,
            is_round_number: transaction.amount % 1_000.0 == 0.0,
            is_cross_border,
            is_high_risk_country,
            potential_structuring,
            count_24h,
            count_7d,
            count_30d,
            same_day_count,
            volume_24h,
            volume_7d,
            volume_30d,
            average_7d,
            average_30d,
            max_amount_30d,
            distinct_beneficiaries_30d,
            days_since_last_transaction,
        };

        debug!(
            transaction_ref = %transaction.transaction_ref,
            count_24h,
            count_7d,
            high_value = features.is_high_value,
            structuring = features.potential_structuring,
            "Computed feature vector"
        );

        features
    }
}
