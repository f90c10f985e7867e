// =====================================================================================
// File: core-queue/src/memory.rs
// Description: In-process broker implementation of the job queue
// =====================================================================================

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{DeliveredJob, Job, JobQueue, QueueError, QueueResult, QueueStats};

/// Deliveries beyond this count are dead-lettered instead of redelivered
const DEFAULT_MAX_DELIVERIES: u32 = 3;

struct InFlight {
    job: Job,
    visible_again_at: DateTime<Utc>,
}

struct QueueData {
    ready: VecDeque<Job>,
    in_flight: HashMap<String, InFlight>,
    dead_letter: Vec<Job>,
    stats: QueueStats,
}

impl QueueData {
    fn new(queue_name: &str) -> Self {
        Self {
            ready: VecDeque::new(),
            in_flight: HashMap::new(),
            dead_letter: Vec::new(),
            stats: QueueStats {
                queue_name: queue_name.to_string(),
                ..QueueStats::default()
            },
        }
    }

    /// Move expired in-flight deliveries back to ready (or dead-letter)
    fn reap_expired(&mut self, now: DateTime<Utc>, max_deliveries: u32) {
        let expired: Vec<String> = self
            .in_flight
            .iter()
            .filter(|(_, f)| f.visible_again_at <= now)
            .map(|(receipt, _)| receipt.clone())
            .collect();

        for receipt in expired {
            if let Some(flight) = self.in_flight.remove(&receipt) {
                if flight.job.delivery_count >= max_deliveries {
                    warn!(
                        job_id = %flight.job.id,
                        deliveries = flight.job.delivery_count,
                        "Job exceeded max deliveries; dead-lettering"
                    );
                    self.stats.dead_lettered += 1;
                    self.dead_letter.push(flight.job);
                } else {
                    debug!(job_id = %flight.job.id, "Visibility expired; job redelivered");
                    self.stats.total_redelivered += 1;
                    self.ready.push_back(flight.job);
                }
            }
        }
    }
}

/// In-process at-least-once queue. Jobs survive consumer crashes through the
/// visibility-timeout reap; they do not survive process restarts, which the
/// pipeline compensates for with its idempotent re-entry protocol.
pub struct InMemoryJobQueue {
    queues: RwLock<HashMap<String, QueueData>>,
    max_deliveries: u32,
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self::with_max_deliveries(DEFAULT_MAX_DELIVERIES)
    }

    pub fn with_max_deliveries(max_deliveries: u32) -> Self {
        Self {
            queues: RwLock::new(HashMap::new()),
            max_deliveries: max_deliveries.max(1),
        }
    }

    pub async fn create_queue(&self, queue_name: &str) -> QueueResult<()> {
        let mut queues = self.queues.write().await;
        if !queues.contains_key(queue_name) {
            queues.insert(queue_name.to_string(), QueueData::new(queue_name));
            info!(queue_name, "Queue created");
        }
        Ok(())
    }
}

impl Default for InMemoryJobQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, queue_name: &str, job: Job) -> QueueResult<String> {
        let mut queues = self.queues.write().await;
        let queue = queues
            .entry(queue_name.to_string())
            .or_insert_with(|| QueueData::new(queue_name));

        let job_id = job.id.clone();
        queue.ready.push_back(job);
        queue.stats.total_enqueued += 1;

        debug!(queue_name, job_id = %job_id, "Job enqueued");
        Ok(job_id)
    }

    async fn receive(
        &self,
        queue_name: &str,
        max_jobs: usize,
        visibility: Duration,
    ) -> QueueResult<Vec<DeliveredJob>> {
        let mut queues = self.queues.write().await;
        let queue = queues
            .get_mut(queue_name)
            .ok_or_else(|| QueueError::QueueNotFound(queue_name.to_string()))?;

        let now = Utc::now();
        queue.reap_expired(now, self.max_deliveries);

        let visible_again_at = now
            + chrono::Duration::from_std(visibility)
                .map_err(|e| QueueError::Broker(e.to_string()))?;

        let mut delivered = Vec::new();
        while delivered.len() < max_jobs {
            let Some(mut job) = queue.ready.pop_front() else {
                break;
            };
            job.delivery_count += 1;
            let receipt = Uuid::new_v4().to_string();
            delivered.push(DeliveredJob {
                job: job.clone(),
                receipt: receipt.clone(),
                visible_again_at,
            });
            queue.in_flight.insert(
                receipt,
                InFlight {
                    job,
                    visible_again_at,
                },
            );
        }

        Ok(delivered)
    }

    async fn ack(&self, queue_name: &str, receipt: &str) -> QueueResult<()> {
        let mut queues = self.queues.write().await;
        let queue = queues
            .get_mut(queue_name)
            .ok_or_else(|| QueueError::QueueNotFound(queue_name.to_string()))?;

        match queue.in_flight.remove(receipt) {
            Some(flight) => {
                queue.stats.total_acknowledged += 1;
                debug!(queue_name, job_id = %flight.job.id, "Job acknowledged");
                Ok(())
            }
            // The delivery already expired and was redelivered; the other
            // consumer owns it now.
            None => Err(QueueError::UnknownReceipt(receipt.to_string())),
        }
    }

    async fn nack(&self, queue_name: &str, receipt: &str) -> QueueResult<()> {
        let mut queues = self.queues.write().await;
        let queue = queues
            .get_mut(queue_name)
            .ok_or_else(|| QueueError::QueueNotFound(queue_name.to_string()))?;

        match queue.in_flight.remove(receipt) {
            Some(flight) => {
                queue.stats.total_redelivered += 1;
                queue.ready.push_back(flight.job);
                Ok(())
            }
            None => Err(QueueError::UnknownReceipt(receipt.to_string())),
        }
    }

    async fn extend_visibility(
        &self,
        queue_name: &str,
        receipt: &str,
        extension: Duration,
    ) -> QueueResult<()> {
        let mut queues = self.queues.write().await;
        let queue = queues
            .get_mut(queue_name)
            .ok_or_else(|| QueueError::QueueNotFound(queue_name.to_string()))?;

        let flight = queue
            .in_flight
            .get_mut(receipt)
            .ok_or_else(|| QueueError::UnknownReceipt(receipt.to_string()))?;

        flight.visible_again_at = Utc::now()
            + chrono::Duration::from_std(extension)
                .map_err(|e| QueueError::Broker(e.to_string()))?;
        debug!(queue_name, job_id = %flight.job.id, "Visibility extended");
        Ok(())
    }

    async fn stats(&self, queue_name: &str) -> QueueResult<QueueStats> {
        let queues = self.queues.read().await;
        let queue = queues
            .get(queue_name)
            .ok_or_else(|| QueueError::QueueNotFound(queue_name.to_string()))?;

        let mut stats = queue.stats.clone();
        stats.ready = queue.ready.len() as u64;
        stats.in_flight = queue.in_flight.len() as u64;
        Ok(stats)
    }
}
