// =====================================================================================
// File: compliance-service/src/lib.rs
// Description: HTTP service wiring for the Sentinel compliance platform
// =====================================================================================

//! # Compliance Service
//!
//! The HTTP surface of the Sentinel platform: transaction submission and
//! querying, internal rule ingestion, and the persistence monitoring
//! endpoints. Evaluations themselves run on the worker pool behind the job
//! queue; the handlers only enqueue and read.

pub mod handlers;
pub mod models;
pub mod monitoring;

use actix_web::web;
use std::sync::Arc;

use core_database::EvaluationStore;
use core_monitoring::IntegrityMonitor;
use core_queue::JobQueue;
use core_rulestore::RuleStore;

/// Shared application state injected into every handler
pub struct AppState {
    pub store: Arc<dyn EvaluationStore>,
    pub queue: Arc<dyn JobQueue>,
    pub rule_store: Arc<dyn RuleStore>,
    pub monitor: Arc<IntegrityMonitor>,
    pub queue_name: String,
}

/// Register every route of the service
pub fn configure_app(cfg: &mut web::ServiceConfig) {
    cfg.service(handlers::submit_transaction)
        .service(handlers::get_transaction_status)
        .service(handlers::get_transaction_compliance)
        .service(handlers::list_transactions)
        .service(handlers::upsert_internal_rule)
        .service(monitoring::persistence_integrity)
        .service(monitoring::persistence_health)
        .service(monitoring::verify_transaction);
}
