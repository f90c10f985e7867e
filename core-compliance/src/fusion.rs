// =====================================================================================
// File: core-compliance/src/fusion.rs
// Description: Fusion of rule, Bayesian, and pattern risk signals
// =====================================================================================

use tracing::debug;

use crate::types::{
    ControlResult, PatternScores, Posterior, RiskAssessment, RiskBand, RiskBreakdown,
};

/// Weight of the rule-based signal in the final score
const WEIGHT_RULE: f64 = 0.40;
/// Weight of the Bayesian (ML) signal
const WEIGHT_ML: f64 = 0.30;
/// Weight of the behavioural pattern signal
const WEIGHT_PATTERN: f64 = 0.30;

/// Combines control results, the Bayesian posterior, and pattern scores into
/// one score and band. Pure and order-insensitive over its inputs.
pub struct RiskFusion;

impl RiskFusion {
    pub fn new() -> Self {
        Self
    }

    pub fn fuse(
        &self,
        control_results: &[ControlResult],
        posterior: &Posterior,
        pattern_scores: &PatternScores,
    ) -> RiskAssessment {
        let rule_based = Self::rule_based_score(control_results);
        let ml_based = 100.0 * posterior.expected_risk();
        let pattern_based = pattern_scores.max();

        let score = (WEIGHT_RULE * rule_based
            + WEIGHT_ML * ml_based
            + WEIGHT_PATTERN * pattern_based)
            .clamp(0.0, 100.0);

        let band = RiskBand::from_score(score);

        debug!(
            rule_based,
            ml_based, pattern_based, score, band = band.as_str(),
            "Fused risk signals"
        );

        RiskAssessment {
            score,
            band,
            breakdown: RiskBreakdown {
                rule_based,
                ml_based,
                pattern_based,
            },
        }
    }

    /// Severity-weighted mean of control deficits. Empty input scores 0.
    fn rule_based_score(control_results: &[ControlResult]) -> f64 {
        let total_weight: f64 = control_results
            .iter()
            .map(|r| r.severity.weight())
            .sum();
        if total_weight <= 0.0 {
            return 0.0;
        }

        let weighted_deficit: f64 = control_results
            .iter()
            .map(|r| (100.0 - r.compliance_score) * r.severity.weight())
            .sum();

        weighted_deficit / total_weight
    }
}

impl Default for RiskFusion {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ControlStatus, Severity};

    fn control(rule_id: &str, severity: Severity, score: f64) -> ControlResult {
        ControlResult {
            rule_id: rule_id.to_string(),
            status: if score >= 70.0 {
                ControlStatus::Pass
            } else {
                ControlStatus::Fail
            },
            severity,
            compliance_score: score,
            rationale: String::new(),
        }
    }

    fn uniform_posterior() -> Posterior {
        Posterior {
            low: 0.25,
            medium: 0.25,
            high: 0.25,
            critical: 0.25,
        }
    }

    #[test]
    fn test_empty_rules_score_zero() {
        let fusion = RiskFusion::new();
        let assessment = fusion.fuse(&[], &uniform_posterior(), &PatternScores::default());
        assert_eq!(assessment.breakdown.rule_based, 0.0);
        // ML signal alone still contributes
        assert!(assessment.score > 0.0);
    }

    #[test]
    fn test_rule_based_weighting() {
        // One critical failure at 20 and one low pass at 90:
        // deficit = (80*1.0 + 10*0.2) / 1.2 = 82/1.2 = 68.33
        let controls = vec![
            control("R-1", Severity::Critical, 20.0),
            control("R-2", Severity::Low, 90.0),
        ];
        let score = RiskFusion::rule_based_score(&controls);
        assert!((score - 82.0 / 1.2).abs() < 1e-9);
    }

    #[test]
    fn test_rule_score_order_invariant() {
        let mut controls = vec![
            control("R-1", Severity::Critical, 15.0),
            control("R-2", Severity::High, 55.0),
            control("R-3", Severity::Medium, 75.0),
        ];
        let forward = RiskFusion::rule_based_score(&controls);
        controls.reverse();
        let reversed = RiskFusion::rule_based_score(&controls);
        assert_eq!(forward, reversed);
    }

    #[test]
    fn test_ml_score_from_posterior() {
        let fusion = RiskFusion::new();
        let certain_critical = Posterior {
            low: 0.0,
            medium: 0.0,
            high: 0.0,
            critical: 1.0,
        };
        let assessment = fusion.fuse(&[], &certain_critical, &PatternScores::default());
        assert!((assessment.breakdown.ml_based - 95.0).abs() < 1e-9);
    }

    #[test]
    fn test_pattern_score_is_max() {
        let fusion = RiskFusion::new();
        let patterns = PatternScores {
            structuring: 100.0,
            layering: 50.0,
            ..PatternScores::default()
        };
        let assessment = fusion.fuse(&[], &uniform_posterior(), &patterns);
        assert_eq!(assessment.breakdown.pattern_based, 100.0);
    }

    #[test]
    fn test_final_weighting_and_band() {
        let fusion = RiskFusion::new();
        // rule 100, ml 95, pattern 100 -> 0.4*100 + 0.3*95 + 0.3*100 = 98.5
        let controls = vec![control("R-1", Severity::Critical, 0.0)];
        let certain_critical = Posterior {
            low: 0.0,
            medium: 0.0,
            high: 0.0,
            critical: 1.0,
        };
        let patterns = PatternScores {
            velocity_anomaly: 100.0,
            ..PatternScores::default()
        };
        let assessment = fusion.fuse(&controls, &certain_critical, &patterns);
        assert!((assessment.score - 98.5).abs() < 1e-9);
        assert_eq!(assessment.band, RiskBand::Critical);
    }

    #[test]
    fn test_all_clear_is_low_band() {
        let fusion = RiskFusion::new();
        let low_posterior = Posterior {
            low: 0.95,
            medium: 0.04,
            high: 0.009,
            critical: 0.001,
        };
        let controls = vec![control("R-1", Severity::Medium, 95.0)];
        let assessment = fusion.fuse(&controls, &low_posterior, &PatternScores::default());
        assert_eq!(assessment.band, RiskBand::Low);
    }
}
