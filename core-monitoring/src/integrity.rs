// =====================================================================================
// File: core-monitoring/src/integrity.rs
// Description: Scheduled scan for COMPLETED transactions without an analysis
// =====================================================================================

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use core_compliance::TransactionStatus;
use core_config::MonitoringConfig;
use core_database::{EvaluationStore, IntegrityViolation};

use crate::metrics::BusinessMetrics;
use crate::{MonitoringError, MonitoringResult};

/// Aggregate health of the persistence guarantee
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntegrityStatus {
    Healthy,
    Violations,
}

/// One scan's findings over the lookback window
#[derive(Debug, Clone, Serialize)]
pub struct IntegrityReport {
    pub status: IntegrityStatus,
    pub scanned_at: DateTime<Utc>,
    pub lookback_hours: i64,
    pub total_completed: i64,
    pub total_failed: i64,
    pub violations: usize,
    pub violation_details: Vec<IntegrityViolation>,
}

/// Periodically verifies that every COMPLETED transaction in the lookback
/// window has its ComplianceAnalysis. Default behaviour is report-only;
/// demotion to FAILED is opt-in through configuration.
pub struct IntegrityMonitor {
    store: Arc<dyn EvaluationStore>,
    metrics: Arc<BusinessMetrics>,
    config: MonitoringConfig,
}

impl IntegrityMonitor {
    pub fn new(
        store: Arc<dyn EvaluationStore>,
        metrics: Arc<BusinessMetrics>,
        config: MonitoringConfig,
    ) -> Self {
        Self {
            store,
            metrics,
            config,
        }
    }

    /// Run one scan over the configured lookback window
    pub async fn scan(&self) -> MonitoringResult<IntegrityReport> {
        self.scan_window(self.config.lookback_hours).await
    }

    /// Run one scan over an explicit lookback window
    pub async fn scan_window(&self, lookback_hours: i64) -> MonitoringResult<IntegrityReport> {
        let now = Utc::now();
        let since = now - Duration::hours(lookback_hours.max(1));

        let total_completed = self
            .store
            .count_with_status_since(TransactionStatus::Completed, since)
            .await?;
        let total_failed = self
            .store
            .count_with_status_since(TransactionStatus::Failed, since)
            .await?;
        let violation_details = self.store.completed_without_analysis(since).await?;

        if !violation_details.is_empty() {
            error!(
                violations = violation_details.len(),
                lookback_hours, "Persistence integrity violations detected"
            );
            self.metrics
                .integrity_violations
                .inc_by(violation_details.len() as u64);

            if self.config.demote_violations {
                for violation in &violation_details {
                    warn!(
                        transaction_ref = %violation.transaction_ref,
                        "Demoting COMPLETED transaction without analysis to FAILED"
                    );
                    self.store
                        .demote_to_failed(violation.transaction_id, now)
                        .await
                        .map_err(|e| MonitoringError::Scan(e.to_string()))?;
                }
            }
        }

        Ok(IntegrityReport {
            status: if violation_details.is_empty() {
                IntegrityStatus::Healthy
            } else {
                IntegrityStatus::Violations
            },
            scanned_at: now,
            lookback_hours,
            total_completed,
            total_failed,
            violations: violation_details.len(),
            violation_details,
        })
    }

    /// Verify one transaction's persistence state
    pub async fn verify_transaction(
        &self,
        transaction_ref: &str,
    ) -> MonitoringResult<Option<TransactionVerification>> {
        let Some(tx) = self.store.find_transaction_by_ref(transaction_ref).await? else {
            return Ok(None);
        };
        let analysis_exists = self.store.analysis_exists(tx.id).await?;
        let consistent = match tx.status {
            TransactionStatus::Completed => analysis_exists,
            // A FAILED or in-flight transaction is consistent only without
            // an analysis
            _ => !analysis_exists,
        };

        Ok(Some(TransactionVerification {
            transaction_ref: tx.transaction_ref,
            status: tx.status.as_str().to_string(),
            analysis_exists,
            consistent,
        }))
    }

    /// Spawn the scheduled scan loop. Returns the task handle and a stop
    /// signal sender.
    pub fn start_scheduled(self: Arc<Self>) -> (JoinHandle<()>, watch::Sender<bool>) {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let interval = std::time::Duration::from_secs(self.config.scan_interval_secs.max(1));

        let handle = tokio::spawn(async move {
            info!(
                interval_secs = interval.as_secs(),
                "Integrity monitor started"
            );
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        match self.scan().await {
                            Ok(report) if report.status == IntegrityStatus::Healthy => {
                                info!(
                                    total_completed = report.total_completed,
                                    "Integrity scan clean"
                                );
                            }
                            Ok(report) => {
                                error!(
                                    violations = report.violations,
                                    "Integrity scan found violations"
                                );
                            }
                            Err(e) => error!(error = %e, "Integrity scan failed"),
                        }
                    }
                    _ = stop_rx.changed() => {
                        info!("Integrity monitor stopping");
                        break;
                    }
                }
            }
        });

        (handle, stop_tx)
    }
}

/// Per-transaction verification result
#[derive(Debug, Clone, Serialize)]
pub struct TransactionVerification {
    pub transaction_ref: String,
    pub status: String,
    pub analysis_exists: bool,
    pub consistent: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_compliance::testutil::transaction_fixture;
    use core_database::MemoryEvaluationStore;

    fn config(demote: bool) -> MonitoringConfig {
        MonitoringConfig {
            lookback_hours: 24,
            scan_interval_secs: 300,
            demote_violations: demote,
        }
    }

    fn monitor(store: Arc<MemoryEvaluationStore>, demote: bool) -> IntegrityMonitor {
        IntegrityMonitor::new(store, Arc::new(BusinessMetrics::new()), config(demote))
    }

    #[tokio::test]
    async fn test_clean_scan() {
        let store = Arc::new(MemoryEvaluationStore::new());
        let monitor = monitor(store.clone(), false);

        let report = monitor.scan().await.unwrap();
        assert_eq!(report.status, IntegrityStatus::Healthy);
        assert_eq!(report.violations, 0);
        assert!(report.violation_details.is_empty());
    }

    #[tokio::test]
    async fn test_scan_detects_violation_report_only() {
        let store = Arc::new(MemoryEvaluationStore::new());
        let tx = transaction_fixture();
        store.insert_pending(&tx).await.unwrap();
        store.force_status(tx.id, TransactionStatus::Completed).await;

        let monitor = monitor(store.clone(), false);
        let report = monitor.scan().await.unwrap();

        assert_eq!(report.status, IntegrityStatus::Violations);
        assert_eq!(report.violations, 1);
        assert_eq!(report.violation_details[0].transaction_ref, tx.transaction_ref);

        // Report-only: the transaction stays COMPLETED
        assert_eq!(
            store.transaction_status(tx.id).await,
            Some(TransactionStatus::Completed)
        );
    }

    #[tokio::test]
    async fn test_scan_demotes_when_configured() {
        let store = Arc::new(MemoryEvaluationStore::new());
        let tx = transaction_fixture();
        store.insert_pending(&tx).await.unwrap();
        store.force_status(tx.id, TransactionStatus::Completed).await;

        let monitor = monitor(store.clone(), true);
        let report = monitor.scan().await.unwrap();
        assert_eq!(report.violations, 1);
        assert_eq!(
            store.transaction_status(tx.id).await,
            Some(TransactionStatus::Failed)
        );
    }

    #[tokio::test]
    async fn test_failed_transaction_without_analysis_is_consistent() {
        // S6 closing condition: FAILED with no analysis is not a violation
        let store = Arc::new(MemoryEvaluationStore::new());
        let tx = transaction_fixture();
        store.insert_pending(&tx).await.unwrap();
        store.force_status(tx.id, TransactionStatus::Failed).await;

        let monitor = monitor(store.clone(), false);
        let report = monitor.scan().await.unwrap();
        assert_eq!(report.violations, 0);
        assert_eq!(report.total_failed, 1);

        let verification = monitor
            .verify_transaction(&tx.transaction_ref)
            .await
            .unwrap()
            .unwrap();
        assert!(verification.consistent);
        assert!(!verification.analysis_exists);
    }

    #[tokio::test]
    async fn test_verify_unknown_transaction() {
        let store = Arc::new(MemoryEvaluationStore::new());
        let monitor = monitor(store, false);
        assert!(monitor
            .verify_transaction("TXN-NOPE")
            .await
            .unwrap()
            .is_none());
    }
}
