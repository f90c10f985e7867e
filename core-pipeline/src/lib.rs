// =====================================================================================
// File: core-pipeline/src/lib.rs
// Description: Transaction evaluation pipeline for the Sentinel platform
// =====================================================================================

//! # Core Pipeline Module
//!
//! The durable evaluation pipeline: one transaction moves through thirteen
//! ordered stages, from context building and hybrid rule retrieval through
//! per-rule LLM applicability and control testing, the pure risk engines,
//! alert classification, remediation derivation, and a verified persistence
//! protocol. The orchestrator guarantees that every evaluation ends with
//! either a persisted ComplianceAnalysis on a COMPLETED transaction or a
//! FAILED transaction with no analysis at all.

pub mod analyst;
pub mod context;
pub mod evaluator;
pub mod orchestrator;
pub mod persistor;
pub mod processor;
pub mod state;

pub use analyst::AnalystWriter;
pub use context::ContextBuilder;
pub use evaluator::RuleEvaluator;
pub use orchestrator::{EvaluationOutcome, PipelineOrchestrator};
pub use persistor::Persistor;
pub use processor::{EvaluationJobPayload, EvaluationJobProcessor, EVALUATE_TRANSACTION_JOB};
pub use state::{ApplicableRule, EvaluationState};

use thiserror::Error;

/// Result type alias for pipeline operations
pub type PipelineResult<T> = Result<T, EvaluationError>;

/// Fatal evaluation errors. Pure stages never raise; every variant here ends
/// the evaluation with a FAILED transition.
#[derive(Error, Debug)]
pub enum EvaluationError {
    /// A pipeline stage could not complete
    #[error("Stage failure in {stage}: {message}")]
    StageFailure { stage: String, message: String },

    /// Database error during the persistor or a status update
    #[error("Persistence failure: {0}")]
    PersistenceFailure(String),

    /// A protocol invariant broke: transaction missing at persist time, or
    /// the analysis absent after commit
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// The evaluation deadline elapsed
    #[error("Evaluation deadline exceeded")]
    Timeout,
}

impl EvaluationError {
    pub fn stage(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StageFailure {
            stage: stage.into(),
            message: message.into(),
        }
    }

    /// Short, non-sensitive label surfaced through the status API
    pub fn public_label(&self) -> &'static str {
        match self {
            EvaluationError::StageFailure { .. } => "evaluation stage failed",
            EvaluationError::PersistenceFailure(_) => "persistence failed",
            EvaluationError::InvariantViolation(_) => "integrity check failed",
            EvaluationError::Timeout => "evaluation deadline exceeded",
        }
    }
}

impl From<core_database::DatabaseError> for EvaluationError {
    fn from(err: core_database::DatabaseError) -> Self {
        match err {
            core_database::DatabaseError::NotFound(message) => {
                EvaluationError::InvariantViolation(message)
            }
            other => EvaluationError::PersistenceFailure(other.to_string()),
        }
    }
}
