// =====================================================================================
// File: core-monitoring/src/lib.rs
// Description: Persistence integrity monitoring for the Sentinel platform
// =====================================================================================

//! # Core Monitoring Module
//!
//! The out-of-band integrity monitor and the business metrics registry. The
//! monitor's single responsibility is closing the loop on the pipeline's
//! central guarantee: every COMPLETED transaction has exactly one
//! ComplianceAnalysis. Violations are reported (and optionally demoted to
//! FAILED); they should never occur while the persistence protocol holds.

pub mod integrity;
pub mod metrics;

pub use integrity::{IntegrityMonitor, IntegrityReport, IntegrityStatus};
pub use metrics::BusinessMetrics;

use thiserror::Error;

/// Result type alias for monitoring operations
pub type MonitoringResult<T> = Result<T, MonitoringError>;

/// Monitoring errors
#[derive(Error, Debug)]
pub enum MonitoringError {
    #[error("Integrity scan error: {0}")]
    Scan(String),

    #[error("Metrics error: {0}")]
    Metrics(String),
}

impl From<core_database::DatabaseError> for MonitoringError {
    fn from(err: core_database::DatabaseError) -> Self {
        MonitoringError::Scan(err.to_string())
    }
}
