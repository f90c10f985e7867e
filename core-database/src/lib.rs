// =====================================================================================
// File: core-database/src/lib.rs
// Description: PostgreSQL persistence layer for the Sentinel platform
// =====================================================================================

//! # Core Database Module
//!
//! Connection pooling, schema migration, and repository types over the four
//! persisted entities: transactions, compliance analyses, alerts, and cases.
//! The analysis table is 1:1 with transactions via a unique foreign key; the
//! persistence protocol exploits that uniqueness to stay idempotent under
//! job redelivery.

pub mod migrations;
pub mod postgres;
pub mod repository;
pub mod store;

pub use migrations::run_migrations;
pub use postgres::create_pool;
pub use repository::{
    BeginOutcome, IntegrityViolation, PersistOutcome, PersistenceRepository,
    TransactionListFilter, TransactionRepository,
};
pub use store::{EvaluationStore, MemoryEvaluationStore, PgEvaluationStore};

use thiserror::Error;

/// Result type alias for database operations
pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// Database layer errors
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database connection error: {0}")]
    Connection(String),

    #[error("Database migration error: {0}")]
    Migration(String),

    #[error("Database query error: {0}")]
    Query(String),

    #[error("Row decode error: {0}")]
    Decode(String),

    /// A write hit the analysis uniqueness key: a prior evaluation already
    /// persisted its result for this transaction
    #[error("Compliance analysis already exists for transaction {0}")]
    AnalysisExists(uuid::Uuid),

    /// An entity the protocol requires was not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// A lifecycle transition the status machine forbids
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
}

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DatabaseError::NotFound("row not found".to_string()),
            other => DatabaseError::Query(other.to_string()),
        }
    }
}
