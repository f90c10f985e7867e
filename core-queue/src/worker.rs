// =====================================================================================
// File: core-queue/src/worker.rs
// Description: Worker pool consuming evaluation jobs from the queue
// =====================================================================================

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::{Job, JobQueue, QueueResult};

/// Terminal outcome of processing one job. Both variants acknowledge the
/// delivery: a FAILED evaluation is a handled outcome, not a reason to
/// redeliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Failed,
}

/// Handles one job. An `Err` means the processing harness itself broke
/// (not the evaluation); the delivery is left unacknowledged so the
/// visibility timeout redelivers it.
#[async_trait]
pub trait JobProcessor: Send + Sync {
    async fn process(&self, job: &Job) -> QueueResult<JobOutcome>;

    fn processor_name(&self) -> &str;
}

/// Worker pool configuration
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    pub queue_name: String,
    pub worker_count: usize,
    pub visibility_timeout: Duration,
    /// Idle wait between empty polls
    pub poll_interval: Duration,
}

impl WorkerPoolConfig {
    pub fn new(queue_name: impl Into<String>, worker_count: usize) -> Self {
        Self {
            queue_name: queue_name.into(),
            worker_count: worker_count.max(1),
            visibility_timeout: Duration::from_secs(180),
            poll_interval: Duration::from_millis(200),
        }
    }

    pub fn with_visibility_timeout(mut self, visibility: Duration) -> Self {
        self.visibility_timeout = visibility;
        self
    }
}

/// A pool of evaluation workers, one consumer task each. Every worker pulls
/// one job at a time, heartbeats it at half the visibility timeout, and
/// acknowledges only after the processor returns.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    shutdown_tx: watch::Sender<bool>,
}

impl WorkerPool {
    pub fn start(
        queue: Arc<dyn JobQueue>,
        processor: Arc<dyn JobProcessor>,
        config: WorkerPoolConfig,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handles = (0..config.worker_count)
            .map(|worker_id| {
                let queue = Arc::clone(&queue);
                let processor = Arc::clone(&processor);
                let config = config.clone();
                let mut shutdown = shutdown_rx.clone();

                tokio::spawn(async move {
                    info!(worker_id, queue_name = %config.queue_name, "Evaluation worker started");
                    loop {
                        if *shutdown.borrow() {
                            break;
                        }

                        let delivered = match queue
                            .receive(&config.queue_name, 1, config.visibility_timeout)
                            .await
                        {
                            Ok(delivered) => delivered,
                            Err(e) => {
                                error!(worker_id, error = %e, "Queue receive failed");
                                sleep(config.poll_interval).await;
                                continue;
                            }
                        };

                        if delivered.is_empty() {
                            tokio::select! {
                                _ = sleep(config.poll_interval) => {}
                                _ = shutdown.changed() => {}
                            }
                            continue;
                        }

                        for delivery in delivered {
                            Self::run_one(
                                worker_id,
                                &queue,
                                &processor,
                                &config,
                                delivery.job,
                                delivery.receipt,
                            )
                            .await;
                        }
                    }
                    info!(worker_id, "Evaluation worker stopped");
                })
            })
            .collect();

        Self {
            handles,
            shutdown_tx,
        }
    }

    async fn run_one(
        worker_id: usize,
        queue: &Arc<dyn JobQueue>,
        processor: &Arc<dyn JobProcessor>,
        config: &WorkerPoolConfig,
        job: Job,
        receipt: String,
    ) {
        // Heartbeat at half the visibility timeout for evaluations that
        // outlive their initial lease
        let heartbeat = {
            let queue = Arc::clone(queue);
            let queue_name = config.queue_name.clone();
            let receipt = receipt.clone();
            let visibility = config.visibility_timeout;
            tokio::spawn(async move {
                let interval = visibility / 2;
                loop {
                    sleep(interval).await;
                    if let Err(e) = queue
                        .extend_visibility(&queue_name, &receipt, visibility)
                        .await
                    {
                        warn!(error = %e, "Heartbeat failed; delivery may be redelivered");
                        break;
                    }
                }
            })
        };

        let job_id = job.id.clone();
        let result = processor.process(&job).await;
        heartbeat.abort();

        match result {
            Ok(outcome) => {
                info!(worker_id, job_id = %job_id, ?outcome, "Job processed");
                if let Err(e) = queue.ack(&config.queue_name, &receipt).await {
                    // Ack after visibility loss: another worker owns the job
                    // now; the idempotent pipeline makes the rerun harmless.
                    warn!(worker_id, job_id = %job_id, error = %e, "Ack failed");
                }
            }
            Err(e) => {
                error!(
                    worker_id,
                    job_id = %job_id,
                    processor = processor.processor_name(),
                    error = %e,
                    "Processing harness error; leaving delivery for redelivery"
                );
            }
        }
    }

    /// Signal all workers to stop and wait for them
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.handles {
            let _ = handle.await;
        }
    }

    pub fn worker_count(&self) -> usize {
        self.handles.len()
    }
}
