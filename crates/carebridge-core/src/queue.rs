//! # Queue Gateway Module
//!
//! Hands a claimed event off for asynchronous processing under a bounded
//! retry contract: 3 attempts total, exponential backoff with a 60-second
//! initial delay (60s, 120s between attempts), completed jobs pruned past a
//! cap, failed jobs retained until explicitly dead-lettered.
//!
//! When no backing queue is configured the gateway degrades to the
//! [`PlaceholderQueueGateway`], which logs metadata and reports success so
//! the request path stays operable. The degrade is transparent: same trait,
//! same success contract, callers never branch on the active mode.

use crate::{CorrelationId, Provider, Timestamp, Uuid};
use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

// ============================================================================
// Retry Policy
// ============================================================================

/// Exponential-backoff retry policy.
///
/// `max_attempts` counts total attempts, including the first. Delays grow as
/// `initial_delay * multiplier^(n-1)` after the n-th failure, capped at
/// `max_delay`. Jitter is available for policies shared by many producers
/// but is off for the webhook default so the schedule stays deterministic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts before a job is exhausted.
    pub max_attempts: u32,

    /// Delay after the first failure.
    pub initial_delay: Duration,

    /// Cap on any single delay.
    pub max_delay: Duration,

    /// Exponential growth factor (typically 2.0).
    pub backoff_multiplier: f64,

    /// Whether to add random jitter to delays.
    pub use_jitter: bool,

    /// Jitter range as a fraction (0.25 = ±25%).
    pub jitter_percent: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::webhook_default()
    }
}

impl RetryPolicy {
    /// The pipeline's standard policy: 3 attempts, 60s initial delay,
    /// doubling, no jitter.
    pub fn webhook_default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(240),
            backoff_multiplier: 2.0,
            use_jitter: false,
            jitter_percent: 0.25,
        }
    }

    /// Create a custom policy.
    pub fn new(
        max_attempts: u32,
        initial_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f64,
    ) -> Self {
        Self {
            max_attempts,
            initial_delay,
            max_delay,
            backoff_multiplier,
            use_jitter: false,
            jitter_percent: 0.25,
        }
    }

    /// Enable jitter at the given fraction (clamped to 0.0..=1.0).
    pub fn with_jitter(mut self, percent: f64) -> Self {
        self.use_jitter = true;
        self.jitter_percent = percent.clamp(0.0, 1.0);
        self
    }

    /// Delay to wait after `failed_attempts` attempts have failed, or `None`
    /// when the job is exhausted.
    ///
    /// With the webhook default: one failure → 60s, two failures → 120s,
    /// three failures → exhausted. Cumulative attempt offsets are therefore
    /// 0s, 60s, 180s.
    pub fn delay_after_failure(&self, failed_attempts: u32) -> Option<Duration> {
        if failed_attempts == 0 || failed_attempts >= self.max_attempts {
            return None;
        }

        let base_secs = self.initial_delay.as_secs_f64()
            * self.backoff_multiplier.powi(failed_attempts as i32 - 1);
        let capped_secs = base_secs.min(self.max_delay.as_secs_f64());

        let final_secs = if self.use_jitter {
            add_jitter(capped_secs, self.jitter_percent)
        } else {
            capped_secs
        };

        Some(Duration::from_secs_f64(final_secs))
    }
}

/// Apply random variation in `[delay * (1-jitter), delay * (1+jitter)]`.
fn add_jitter(delay_secs: f64, jitter_percent: f64) -> f64 {
    let jitter_range = delay_secs * jitter_percent;
    if jitter_range <= 0.0 {
        return delay_secs;
    }
    let jitter = rand::thread_rng().gen_range(-jitter_range..=jitter_range);
    (delay_secs + jitter).max(0.0)
}

// ============================================================================
// Job Types
// ============================================================================

/// The fixed payload contract the worker receives from a dequeued job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobPayload {
    pub provider: Provider,
    pub event_id: String,
    /// Echo of the delivered payload, parsed. The worker never re-verifies
    /// signatures, so a re-serialized form is acceptable here.
    pub raw_payload: Value,
    pub correlation_id: CorrelationId,
}

/// Per-job options, fixed at enqueue time.
#[derive(Debug, Clone)]
pub struct JobOptions {
    pub retry: RetryPolicy,
    /// Completed jobs retained before pruning.
    pub completed_retention: usize,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::webhook_default(),
            completed_retention: 100,
        }
    }
}

/// One queued processing job.
#[derive(Debug, Clone)]
pub struct QueueJob {
    pub id: Uuid,
    /// Logical job type; the provider name.
    pub name: String,
    pub payload: JobPayload,
    /// Attempts started so far (incremented at dequeue).
    pub attempts_made: u32,
    pub enqueued_at: Timestamp,
}

/// Acknowledgement returned by a successful enqueue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueReceipt {
    pub job_id: Uuid,
}

/// Outcome of reporting a job failure to the queue.
#[derive(Debug)]
pub enum FailOutcome {
    /// The job was rescheduled; it becomes visible again after the delay.
    Retried { next_attempt_in: Duration },
    /// Attempts are exhausted; the job is retained in the failed set and
    /// returned so the caller can dead-letter it.
    Exhausted { attempts: u32, job: QueueJob },
}

// ============================================================================
// Error Types
// ============================================================================

/// Errors from queue operations.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Queue backend operation failed: {message}")]
    Backend { message: String },

    #[error("Unknown job: {job_id}")]
    UnknownJob { job_id: Uuid },
}

// ============================================================================
// Gateway Trait
// ============================================================================

/// Producer-side seam the entrypoint enqueues through.
///
/// Implementations must return success only once the job is durably (for the
/// backend's durability level) accepted; the entrypoint acknowledges the
/// provider on the strength of this.
#[async_trait]
pub trait QueueGateway: Send + Sync {
    /// Enqueue a processing job for the payload's provider.
    async fn enqueue(&self, payload: JobPayload) -> Result<EnqueueReceipt, QueueError>;
}

// ============================================================================
// InMemoryQueueGateway
// ============================================================================

#[derive(Debug)]
struct ScheduledJob {
    job: QueueJob,
    not_before: Timestamp,
}

#[derive(Debug)]
struct FailedJob {
    job: QueueJob,
    #[allow(dead_code)] // inspected when draining the failed set
    error: String,
}

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<QueueJob>,
    scheduled: Vec<ScheduledJob>,
    in_flight: HashMap<Uuid, QueueJob>,
    completed: VecDeque<QueueJob>,
    failed: Vec<FailedJob>,
}

/// In-process queue backing the worker in single-node deployments and
/// tests.
///
/// FIFO for ready jobs; failed jobs are rescheduled with the policy's delay
/// and become visible once due. Completed jobs are pruned past the retention
/// cap; exhausted jobs are retained until dead-lettered.
#[derive(Debug)]
pub struct InMemoryQueueGateway {
    state: Mutex<QueueState>,
    options: JobOptions,
}

impl InMemoryQueueGateway {
    pub fn new(options: JobOptions) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            options,
        }
    }

    /// Retry policy jobs on this queue follow.
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.options.retry
    }

    /// Take the next visible job, marking it in flight and counting the
    /// attempt. Returns `None` when nothing is due.
    pub async fn dequeue(&self) -> Option<QueueJob> {
        let mut state = self.state.lock().await;

        // Promote scheduled jobs whose delay has elapsed.
        let now = Timestamp::now();
        let mut still_scheduled = Vec::with_capacity(state.scheduled.len());
        for scheduled in std::mem::take(&mut state.scheduled) {
            if scheduled.not_before <= now {
                state.ready.push_back(scheduled.job);
            } else {
                still_scheduled.push(scheduled);
            }
        }
        state.scheduled = still_scheduled;

        let mut job = state.ready.pop_front()?;
        job.attempts_made += 1;
        state.in_flight.insert(job.id, job.clone());
        Some(job)
    }

    /// Acknowledge successful processing.
    pub async fn complete(&self, job_id: Uuid) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        let job = state
            .in_flight
            .remove(&job_id)
            .ok_or(QueueError::UnknownJob { job_id })?;

        state.completed.push_back(job);
        let retention = self.options.completed_retention;
        while state.completed.len() > retention {
            state.completed.pop_front();
        }
        Ok(())
    }

    /// Report a failed attempt; reschedules or exhausts per the policy.
    pub async fn fail(&self, job_id: Uuid, error: &str) -> Result<FailOutcome, QueueError> {
        let mut state = self.state.lock().await;
        let job = state
            .in_flight
            .remove(&job_id)
            .ok_or(QueueError::UnknownJob { job_id })?;

        match self.options.retry.delay_after_failure(job.attempts_made) {
            Some(delay) => {
                let not_before = Timestamp::from_datetime(
                    Timestamp::now().as_datetime()
                        + ChronoDuration::from_std(delay).unwrap_or(ChronoDuration::zero()),
                );
                state.scheduled.push(ScheduledJob {
                    job,
                    not_before,
                });
                Ok(FailOutcome::Retried {
                    next_attempt_in: delay,
                })
            }
            None => {
                let attempts = job.attempts_made;
                state.failed.push(FailedJob {
                    job: job.clone(),
                    error: error.to_string(),
                });
                warn!(
                    job_id = %job_id,
                    attempts,
                    "Job exhausted its retry budget"
                );
                Ok(FailOutcome::Exhausted { attempts, job })
            }
        }
    }

    /// Number of jobs currently visible.
    pub async fn ready_depth(&self) -> usize {
        self.state.lock().await.ready.len()
    }

    /// Number of jobs waiting on a backoff delay.
    pub async fn scheduled_depth(&self) -> usize {
        self.state.lock().await.scheduled.len()
    }

    /// Number of exhausted jobs retained for dead-letter inspection.
    pub async fn failed_depth(&self) -> usize {
        self.state.lock().await.failed.len()
    }

    /// Number of retained completed jobs.
    pub async fn completed_depth(&self) -> usize {
        self.state.lock().await.completed.len()
    }
}

#[async_trait]
impl QueueGateway for InMemoryQueueGateway {
    #[instrument(skip(self, payload), fields(provider = %payload.provider, event_id = %payload.event_id, correlation_id = %payload.correlation_id))]
    async fn enqueue(&self, payload: JobPayload) -> Result<EnqueueReceipt, QueueError> {
        let job = QueueJob {
            id: Uuid::new_v4(),
            name: payload.provider.as_str().to_string(),
            payload,
            attempts_made: 0,
            enqueued_at: Timestamp::now(),
        };

        let job_id = job.id;
        let mut state = self.state.lock().await;
        state.ready.push_back(job);

        Ok(EnqueueReceipt { job_id })
    }
}

// ============================================================================
// PlaceholderQueueGateway
// ============================================================================

/// Logging no-op gateway for degraded/offline-queue environments.
///
/// Reports success so the request path keeps working; logs job metadata,
/// never payload content.
#[derive(Debug, Default)]
pub struct PlaceholderQueueGateway;

impl PlaceholderQueueGateway {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl QueueGateway for PlaceholderQueueGateway {
    async fn enqueue(&self, payload: JobPayload) -> Result<EnqueueReceipt, QueueError> {
        let receipt = EnqueueReceipt {
            job_id: Uuid::new_v4(),
        };

        info!(
            job_id = %receipt.job_id,
            job_name = %payload.provider.as_str(),
            event_id = %payload.event_id,
            provider = %payload.provider,
            correlation_id = %payload.correlation_id,
            "Queued event (no queue backend configured; placeholder acknowledgement)"
        );

        Ok(receipt)
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
