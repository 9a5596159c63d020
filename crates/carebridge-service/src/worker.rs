//! Background worker consuming queued webhook jobs.
//!
//! The loop dequeues, hands the job to an injected [`JobHandler`], and
//! records the outcome on the idempotency tracker. Failures go back to the
//! queue under its retry policy; exhausted jobs are dead-lettered with their
//! payload encrypted. Business processing itself lives behind the handler
//! seam and is not this crate's concern.

use async_trait::async_trait;
use carebridge_core::{
    dead_letter::DeadLetterService,
    idempotency::IdempotencyTracker,
    queue::{FailOutcome, InMemoryQueueGateway, QueueJob},
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

/// Pause between polls when the queue is empty.
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Downstream processing seam invoked once per job attempt.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &QueueJob) -> Result<(), anyhow::Error>;
}

/// Handler that logs and succeeds. Stands in until a real downstream
/// consumer is wired.
#[derive(Debug, Default)]
pub struct LoggingJobHandler;

#[async_trait]
impl JobHandler for LoggingJobHandler {
    async fn handle(&self, job: &QueueJob) -> Result<(), anyhow::Error> {
        info!(
            job_id = %job.id,
            event_id = %job.payload.event_id,
            provider = %job.payload.provider,
            correlation_id = %job.payload.correlation_id,
            "Processed webhook job (logging handler)"
        );
        Ok(())
    }
}

/// Queue consumer loop.
pub struct Worker {
    queue: Arc<InMemoryQueueGateway>,
    tracker: Arc<dyn IdempotencyTracker>,
    dead_letters: DeadLetterService,
    handler: Arc<dyn JobHandler>,
    shutdown: watch::Receiver<bool>,
}

impl Worker {
    pub fn new(
        queue: Arc<InMemoryQueueGateway>,
        tracker: Arc<dyn IdempotencyTracker>,
        dead_letters: DeadLetterService,
        handler: Arc<dyn JobHandler>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            queue,
            tracker,
            dead_letters,
            handler,
            shutdown,
        }
    }

    /// Run until the shutdown channel flips. The job in flight when the
    /// signal arrives finishes before the loop exits.
    pub async fn run(mut self) {
        info!("Webhook worker started");

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            match self.queue.dequeue().await {
                Some(job) => self.process(job).await,
                None => {
                    tokio::select! {
                        _ = tokio::time::sleep(IDLE_POLL_INTERVAL) => {}
                        _ = self.shutdown.changed() => {}
                    }
                }
            }
        }

        info!("Webhook worker stopped");
    }

    #[instrument(skip(self, job), fields(
        job_id = %job.id,
        event_id = %job.payload.event_id,
        provider = %job.payload.provider,
        correlation_id = %job.payload.correlation_id,
        attempt = job.attempts_made,
    ))]
    async fn process(&self, job: QueueJob) {
        match self.handler.handle(&job).await {
            Ok(()) => self.record_success(&job).await,
            Err(e) => self.record_failure(&job, &e.to_string()).await,
        }
    }

    async fn record_success(&self, job: &QueueJob) {
        if let Err(e) = self
            .tracker
            .mark_processed(&job.payload.event_id, job.payload.provider)
            .await
        {
            error!(error = %e, "Failed to mark event processed");
        }

        if let Err(e) = self.queue.complete(job.id).await {
            error!(error = %e, "Failed to complete job on queue");
        } else {
            debug!("Job completed");
        }
    }

    async fn record_failure(&self, job: &QueueJob, error_message: &str) {
        warn!(error = %error_message, "Job attempt failed");

        let retry_count = match self
            .tracker
            .mark_failed(&job.payload.event_id, job.payload.provider, error_message)
            .await
        {
            Ok(record) => record.retry_count,
            Err(e) => {
                error!(error = %e, "Failed to mark event failed");
                job.attempts_made
            }
        };

        match self.queue.fail(job.id, error_message).await {
            Ok(FailOutcome::Retried { next_attempt_in }) => {
                info!(
                    retry_in_seconds = next_attempt_in.as_secs(),
                    "Job scheduled for retry"
                );
            }
            Ok(FailOutcome::Exhausted { attempts, job }) => {
                warn!(attempts, "Job exhausted retries; dead-lettering");
                if let Err(e) = self
                    .dead_letters
                    .store(
                        &job.payload.event_id,
                        job.payload.provider,
                        &job.payload.raw_payload,
                        error_message,
                        retry_count,
                        &job.payload.correlation_id,
                    )
                    .await
                {
                    // The payload is unrecoverable at this point; the
                    // idempotency record still carries the failure.
                    error!(error = %e, "Failed to dead-letter exhausted job");
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to report job failure to queue");
            }
        }
    }
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;
