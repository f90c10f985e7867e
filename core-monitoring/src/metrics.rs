// =====================================================================================
// File: core-monitoring/src/metrics.rs
// Description: Business metrics registry for the evaluation pipeline
// =====================================================================================

use prometheus::{Histogram, HistogramOpts, IntCounter, Registry};
use tracing::warn;

/// Business metrics for the evaluation pipeline, backed by a dedicated
/// Prometheus registry.
pub struct BusinessMetrics {
    registry: Registry,
    pub evaluations_started: IntCounter,
    pub evaluations_completed: IntCounter,
    pub evaluations_failed: IntCounter,
    pub alerts_created: IntCounter,
    pub integrity_violations: IntCounter,
    pub evaluation_seconds: Histogram,
}

impl BusinessMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let evaluations_started =
            IntCounter::new("evaluations_started_total", "Evaluations started")
                .expect("valid metric definition");
        let evaluations_completed =
            IntCounter::new("evaluations_completed_total", "Evaluations completed")
                .expect("valid metric definition");
        let evaluations_failed =
            IntCounter::new("evaluations_failed_total", "Evaluations failed")
                .expect("valid metric definition");
        let alerts_created = IntCounter::new("alerts_created_total", "Alerts created")
            .expect("valid metric definition");
        let integrity_violations = IntCounter::new(
            "integrity_violations_total",
            "COMPLETED transactions found without an analysis",
        )
        .expect("valid metric definition");
        let evaluation_seconds = Histogram::with_opts(
            HistogramOpts::new("evaluation_seconds", "Evaluation wall-clock seconds")
                .buckets(vec![0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]),
        )
        .expect("valid metric definition");

        for metric in [
            registry.register(Box::new(evaluations_started.clone())),
            registry.register(Box::new(evaluations_completed.clone())),
            registry.register(Box::new(evaluations_failed.clone())),
            registry.register(Box::new(alerts_created.clone())),
            registry.register(Box::new(integrity_violations.clone())),
            registry.register(Box::new(evaluation_seconds.clone())),
        ] {
            if let Err(e) = metric {
                warn!(error = %e, "Metric registration failed");
            }
        }

        Self {
            registry,
            evaluations_started,
            evaluations_completed,
            evaluations_failed,
            alerts_created,
            integrity_violations,
            evaluation_seconds,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl Default for BusinessMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_register_and_count() {
        let metrics = BusinessMetrics::new();
        metrics.evaluations_started.inc();
        metrics.evaluations_completed.inc();
        metrics.evaluation_seconds.observe(2.0);

        assert_eq!(metrics.evaluations_started.get(), 1);
        assert_eq!(metrics.evaluations_completed.get(), 1);

        let families = metrics.registry().gather();
        assert!(families
            .iter()
            .any(|f| f.get_name() == "evaluations_started_total"));
        assert!(families.iter().any(|f| f.get_name() == "evaluation_seconds"));
    }
}
