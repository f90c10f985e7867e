// =====================================================================================
// File: core-compliance/src/bayesian.rs
// Description: Bayesian posterior update over the four-class risk distribution
// =====================================================================================

use tracing::warn;

use crate::types::{
    ControlResult, ControlStatus, CustomerRiskRating, FeatureVector, Posterior, Severity,
};

/// Likelihood ratio applied per critical-severity control failure
const LR_CRITICAL_FAILURE: f64 = 5.0;
/// Likelihood ratio applied per high-severity control failure
const LR_HIGH_FAILURE: f64 = 3.0;
/// Likelihood ratio applied per medium-severity control failure
const LR_MEDIUM_FAILURE: f64 = 1.5;
/// Likelihood ratio for a high-value transaction
const LR_HIGH_VALUE: f64 = 1.5;
/// Likelihood ratio for a cross-border transaction
const LR_CROSS_BORDER: f64 = 1.3;
/// Likelihood ratio for a high-risk jurisdiction
const LR_HIGH_RISK_COUNTRY: f64 = 2.5;
/// Likelihood ratio for potential structuring
const LR_STRUCTURING: f64 = 4.0;

/// Clip bounds for the accumulated evidence product, per class
const LR_PRODUCT_MIN: f64 = 1e-3;
const LR_PRODUCT_MAX: f64 = 1e6;

/// Pure posterior update: prior by customer rating, multiplicative likelihood
/// ratios from control failures and features applied to the medium/high/
/// critical components, then renormalization.
pub struct BayesianEngine;

impl BayesianEngine {
    pub fn new() -> Self {
        Self
    }

    /// Prior distribution over (low, medium, high, critical) by customer
    /// risk rating.
    pub fn prior(rating: CustomerRiskRating) -> Posterior {
        let (low, medium, high, critical) = match rating {
            CustomerRiskRating::Low => (0.70, 0.20, 0.08, 0.02),
            CustomerRiskRating::Medium => (0.40, 0.35, 0.20, 0.05),
            CustomerRiskRating::High => (0.15, 0.30, 0.40, 0.15),
            CustomerRiskRating::Critical => (0.05, 0.15, 0.40, 0.40),
        };
        Posterior {
            low,
            medium,
            high,
            critical,
        }
    }

    pub fn posterior(
        &self,
        rating: CustomerRiskRating,
        control_results: &[ControlResult],
        features: &FeatureVector,
    ) -> Posterior {
        let prior = Self::prior(rating);

        let mut evidence_product = 1.0_f64;

        for result in control_results {
            if result.status != ControlStatus::Fail {
                continue;
            }
            evidence_product *= match result.severity {
                Severity::Critical => LR_CRITICAL_FAILURE,
                Severity::High => LR_HIGH_FAILURE,
                Severity::Medium => LR_MEDIUM_FAILURE,
                Severity::Low => 1.0,
            };
        }

        if features.is_high_value {
            evidence_product *= LR_HIGH_VALUE;
        }
        if features.is_cross_border {
            evidence_product *= LR_CROSS_BORDER;
        }
        if features.is_high_risk_country {
            evidence_product *= LR_HIGH_RISK_COUNTRY;
        }
        if features.potential_structuring {
            evidence_product *= LR_STRUCTURING;
        }

        let clipped = evidence_product.clamp(LR_PRODUCT_MIN, LR_PRODUCT_MAX);
        if clipped != evidence_product {
            warn!(
                product = evidence_product,
                "Evidence product clipped before renormalization"
            );
        }

        let unnormalized = Posterior {
            low: prior.low,
            medium: prior.medium * clipped,
            high: prior.high * clipped,
            critical: prior.critical * clipped,
        };

        Self::normalize(unnormalized)
    }

    fn normalize(p: Posterior) -> Posterior {
        let sum = p.sum();
        if sum <= 0.0 {
            // Unreachable with the fixed priors; defend anyway
            warn!("Degenerate posterior, falling back to uniform");
            return Posterior {
                low: 0.25,
                medium: 0.25,
                high: 0.25,
                critical: 0.25,
            };
        }
        Posterior {
            low: p.low / sum,
            medium: p.medium / sum,
            high: p.high / sum,
            critical: p.critical / sum,
        }
    }
}

impl Default for BayesianEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FeatureVector;

    fn failure(severity: Severity) -> ControlResult {
        ControlResult {
            rule_id: "R-TEST".to_string(),
            status: ControlStatus::Fail,
            severity,
            compliance_score: 20.0,
            rationale: "control failed".to_string(),
        }
    }

    fn passing() -> ControlResult {
        ControlResult {
            rule_id: "R-TEST".to_string(),
            status: ControlStatus::Pass,
            severity: Severity::Critical,
            compliance_score: 90.0,
            rationale: "control satisfied".to_string(),
        }
    }

    #[test]
    fn test_priors_sum_to_one() {
        for rating in [
            CustomerRiskRating::Low,
            CustomerRiskRating::Medium,
            CustomerRiskRating::High,
            CustomerRiskRating::Critical,
        ] {
            let prior = BayesianEngine::prior(rating);
            assert!((prior.sum() - 1.0).abs() < 1e-9, "{:?}", rating);
        }
    }

    #[test]
    fn test_no_evidence_returns_prior() {
        let engine = BayesianEngine::new();
        let posterior = engine.posterior(
            CustomerRiskRating::Medium,
            &[],
            &FeatureVector::default(),
        );
        let prior = BayesianEngine::prior(CustomerRiskRating::Medium);
        assert!((posterior.low - prior.low).abs() < 1e-9);
        assert!((posterior.critical - prior.critical).abs() < 1e-9);
    }

    #[test]
    fn test_posterior_sums_to_one() {
        let engine = BayesianEngine::new();
        let features = FeatureVector {
            is_high_value: true,
            is_cross_border: true,
            is_high_risk_country: true,
            potential_structuring: true,
            ..FeatureVector::default()
        };
        let controls = vec![
            failure(Severity::Critical),
            failure(Severity::High),
            failure(Severity::Medium),
        ];
        let posterior = engine.posterior(CustomerRiskRating::High, &controls, &features);
        assert!((posterior.sum() - 1.0).abs() < 1e-6);
        assert!(posterior.low >= 0.0 && posterior.critical >= 0.0);
    }

    #[test]
    fn test_failures_shift_mass_upward() {
        let engine = BayesianEngine::new();
        let baseline = engine.posterior(
            CustomerRiskRating::Low,
            &[],
            &FeatureVector::default(),
        );
        let shifted = engine.posterior(
            CustomerRiskRating::Low,
            &[failure(Severity::Critical)],
            &FeatureVector::default(),
        );
        assert!(shifted.low < baseline.low);
        assert!(shifted.critical > baseline.critical);
        assert!(shifted.expected_risk() > baseline.expected_risk());
    }

    #[test]
    fn test_passing_controls_carry_no_evidence() {
        let engine = BayesianEngine::new();
        let with_pass = engine.posterior(
            CustomerRiskRating::Medium,
            &[passing()],
            &FeatureVector::default(),
        );
        let without = engine.posterior(
            CustomerRiskRating::Medium,
            &[],
            &FeatureVector::default(),
        );
        assert!((with_pass.low - without.low).abs() < 1e-12);
    }

    #[test]
    fn test_high_value_multiplier() {
        let engine = BayesianEngine::new();
        let features = FeatureVector {
            is_high_value: true,
            ..FeatureVector::default()
        };
        // Medium prior (0.40, 0.35, 0.20, 0.05) with x1.5 on the upper classes:
        // unnormalized (0.40, 0.525, 0.30, 0.075), sum 1.30
        let posterior = engine.posterior(CustomerRiskRating::Medium, &[], &features);
        assert!((posterior.low - 0.40 / 1.30).abs() < 1e-9);
        assert!((posterior.medium - 0.525 / 1.30).abs() < 1e-9);
    }

    #[test]
    fn test_evidence_product_is_clipped() {
        let engine = BayesianEngine::new();
        // 12 critical failures would yield 5^12 ~ 2.4e8; clipped to 1e6
        let controls: Vec<ControlResult> =
            (0..12).map(|_| failure(Severity::Critical)).collect();
        let posterior = engine.posterior(
            CustomerRiskRating::Low,
            &controls,
            &FeatureVector::default(),
        );
        // With the clip at 1e6, low = 0.70 / (0.70 + 0.30e6)
        let expected_low = 0.70 / (0.70 + 0.30 * 1e6);
        assert!((posterior.low - expected_low).abs() < 1e-12);
        assert!((posterior.sum() - 1.0).abs() < 1e-6);
    }
}
