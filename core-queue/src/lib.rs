// =====================================================================================
// File: core-queue/src/lib.rs
// Description: At-least-once job queue contract for evaluation work
// =====================================================================================

//! # Core Queue Module
//!
//! The durable work queue feeding the evaluation worker pool. Delivery is
//! at-least-once: a job stays owned by its consumer until acknowledged, and
//! is redelivered when the visibility timeout lapses without an ack. Workers
//! heartbeat long evaluations to extend their ownership.

pub mod memory;
pub mod worker;

pub use memory::InMemoryJobQueue;
pub use worker::{JobOutcome, JobProcessor, WorkerPool, WorkerPoolConfig};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Result type alias for queue operations
pub type QueueResult<T> = Result<T, QueueError>;

/// Queue errors
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Queue not found: {0}")]
    QueueNotFound(String),

    #[error("Unknown delivery receipt: {0}")]
    UnknownReceipt(String),

    #[error("Queue broker error: {0}")]
    Broker(String),
}

/// A unit of evaluation work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub enqueued_at: DateTime<Utc>,
    /// Times this job has been handed to a consumer
    pub delivery_count: u32,
}

impl Job {
    pub fn new(job_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            job_type: job_type.into(),
            payload,
            enqueued_at: Utc::now(),
            delivery_count: 0,
        }
    }
}

/// A job handed to a consumer, with the receipt that acknowledges it
#[derive(Debug, Clone)]
pub struct DeliveredJob {
    pub job: Job,
    /// Receipt for ack/heartbeat; unique per delivery
    pub receipt: String,
    /// When the delivery becomes visible to other consumers again
    pub visible_again_at: DateTime<Utc>,
}

/// Aggregate queue statistics for the monitoring surface
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStats {
    pub queue_name: String,
    pub ready: u64,
    pub in_flight: u64,
    pub dead_lettered: u64,
    pub total_enqueued: u64,
    pub total_acknowledged: u64,
    pub total_redelivered: u64,
}

/// Durable at-least-once work queue
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue a job; returns its id
    async fn enqueue(&self, queue_name: &str, job: Job) -> QueueResult<String>;

    /// Pull up to `max_jobs` ready jobs, making them invisible for
    /// `visibility`. Expired in-flight jobs are redelivered first.
    async fn receive(
        &self,
        queue_name: &str,
        max_jobs: usize,
        visibility: Duration,
    ) -> QueueResult<Vec<DeliveredJob>>;

    /// Acknowledge a delivery; the job is gone for good
    async fn ack(&self, queue_name: &str, receipt: &str) -> QueueResult<()>;

    /// Return a delivery to the queue immediately for another consumer
    async fn nack(&self, queue_name: &str, receipt: &str) -> QueueResult<()>;

    /// Extend the visibility of an in-flight delivery (worker heartbeat)
    async fn extend_visibility(
        &self,
        queue_name: &str,
        receipt: &str,
        extension: Duration,
    ) -> QueueResult<()>;

    /// Queue statistics
    async fn stats(&self, queue_name: &str) -> QueueResult<QueueStats>;
}
