// =====================================================================================
// File: core-compliance/src/patterns.rs
// Description: AML pattern scoring over transaction and customer history
// =====================================================================================

use chrono::Duration;
use tracing::debug;

use crate::types::{PatternScores, Transaction};

/// Reporting thresholds whose undersides attract structuring activity
const STRUCTURING_THRESHOLDS: [f64; 2] = [5_000.0, 10_000.0];

/// Pure computation of the five AML pattern scores. Each score is capped at
/// 100 independently; where several triggers contribute to one pattern the
/// maximum wins, never the sum (structuring's additive bonuses excepted,
/// still capped).
pub struct PatternEngine;

impl PatternEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn compute(&self, transaction: &Transaction, history: &[Transaction]) -> PatternScores {
        // A transaction with no history carries no behavioural signal
        if history.is_empty() {
            return PatternScores::default();
        }

        let scores = PatternScores {
            structuring: self.structuring(transaction, history),
            layering: self.layering(transaction, history),
            circular_transfer: self.circular_transfer(transaction, history),
            rapid_movement: self.rapid_movement(transaction, history),
            velocity_anomaly: self.velocity_anomaly(transaction, history),
        };

        debug!(
            transaction_ref = %transaction.transaction_ref,
            structuring = scores.structuring,
            layering = scores.layering,
            circular = scores.circular_transfer,
            rapid = scores.rapid_movement,
            velocity = scores.velocity_anomaly,
            "Computed pattern scores"
        );

        scores
    }

    /// The sub-threshold band an amount falls into, if any: within 10%
    /// below a reporting threshold.
    fn threshold_band(amount: f64) -> Option<(f64, f64)> {
        STRUCTURING_THRESHOLDS
            .iter()
            .find(|&&t| amount >= t * 0.9 && amount < t)
            .map(|&t| (t * 0.9, t))
    }

    fn structuring(&self, transaction: &Transaction, history: &[Transaction]) -> f64 {
        let Some((lo, hi)) = Self::threshold_band(transaction.amount) else {
            return 0.0;
        };

        let mut score: f64 = 60.0;

        let count_24h_in_band = history
            .iter()
            .filter(|t| {
                t.booking_datetime <= transaction.booking_datetime
                    && transaction.booking_datetime - t.booking_datetime < Duration::hours(24)
                    && t.amount >= lo
                    && t.amount < hi
            })
            .count();
        if count_24h_in_band > 2 {
            score += 40.0;
        }

        score.min(100.0)
    }

    fn layering(&self, transaction: &Transaction, history: &[Transaction]) -> f64 {
        let cross_border = transaction.originator_country != transaction.beneficiary_country;
        if !cross_border {
            return 0.0;
        }

        let at = transaction.booking_datetime;
        let count_24h = history
            .iter()
            .filter(|t| t.booking_datetime <= at && at - t.booking_datetime < Duration::hours(24))
            .count();
        let count_7d = history
            .iter()
            .filter(|t| t.booking_datetime <= at && at - t.booking_datetime < Duration::days(7))
            .count();

        if count_7d > 20 {
            70.0
        } else if count_24h > 5 {
            50.0
        } else {
            0.0
        }
    }

    fn circular_transfer(&self, transaction: &Transaction, history: &[Transaction]) -> f64 {
        let at = transaction.booking_datetime;

        // Exact A -> B -> A chain within 7 days: funds previously moved from
        // today's beneficiary back to today's originator.
        let exact_chain = history.iter().any(|t| {
            t.originator_account == transaction.beneficiary_account
                && t.beneficiary_account == transaction.originator_account
                && t.booking_datetime <= at
                && at - t.booking_datetime < Duration::days(7)
        });
        if exact_chain {
            return 90.0;
        }

        let originator_was_beneficiary = history
            .iter()
            .any(|t| t.beneficiary_account == transaction.originator_account);
        if originator_was_beneficiary {
            60.0
        } else {
            0.0
        }
    }

    fn rapid_movement(&self, transaction: &Transaction, history: &[Transaction]) -> f64 {
        let same_day = history
            .iter()
            .filter(|t| t.booking_datetime.date_naive() == transaction.booking_datetime.date_naive())
            .count();

        if same_day >= 5 {
            70.0
        } else if same_day >= 3 {
            50.0
        } else {
            0.0
        }
    }

    fn velocity_anomaly(&self, transaction: &Transaction, history: &[Transaction]) -> f64 {
        let at = transaction.booking_datetime;
        let in_24h: Vec<&Transaction> = history
            .iter()
            .filter(|t| t.booking_datetime <= at && at - t.booking_datetime < Duration::hours(24))
            .collect();
        if in_24h.len() >= 10 {
            return 80.0;
        }

        let in_7d: Vec<&Transaction> = history
            .iter()
            .filter(|t| t.booking_datetime <= at && at - t.booking_datetime < Duration::days(7))
            .collect();
        if in_7d.is_empty() {
            return 0.0;
        }

        let volume_7d: f64 = in_7d.iter().map(|t| t.amount).sum();
        let average_7d = volume_7d / in_7d.len() as f64;
        let baseline = average_7d * 3.0;

        if volume_7d > baseline {
            (50.0 * (volume_7d / baseline.max(1.0))).clamp(0.0, 100.0)
        } else {
            0.0
        }
    }
}

impl Default for PatternEngine {
    fn default() -> Self {
        Self::new()
    }
}
