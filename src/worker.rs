//! # Worker pool
//!
//! Each worker polls the job store, claims the best available job and runs it
//! through the configured [`JobHandler`]. Jobs are drained one at a time until
//! the queue is empty, then the worker sleeps for the poll interval.
//!
//! Handler errors, timeouts and panics all become recorded failures; the retry
//! policy decides what happens next. Shutdown stops new claims but lets the job
//! currently in flight finish.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use metrics::{counter, histogram};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::error::JobStoreError;
use crate::fetch::{CrawlReport, ExecutionError, JobHandler};
use crate::repositories::{CrawlJobRepository, FailureOutcome, SuccessOutcome};

/// What happened to one claimed job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobRunOutcome {
    Succeeded(SuccessOutcome),
    Failed(FailureOutcome),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRun {
    pub job_id: Uuid,
    pub duration_ms: i64,
    pub outcome: JobRunOutcome,
}

pub struct CrawlWorker {
    id: usize,
    jobs: CrawlJobRepository,
    handler: Arc<dyn JobHandler>,
    poll_interval: Duration,
    max_run: Duration,
}

impl CrawlWorker {
    pub fn new(
        id: usize,
        jobs: CrawlJobRepository,
        handler: Arc<dyn JobHandler>,
        config: &WorkerConfig,
    ) -> Self {
        Self {
            id,
            jobs,
            handler,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            max_run: Duration::from_secs(config.max_run_seconds),
        }
    }

    /// Poll until `shutdown` fires.
    pub async fn run(self, shutdown: CancellationToken) {
        let span = info_span!("crawl_worker", worker_id = self.id);
        async move {
            info!(
                poll_interval_ms = self.poll_interval.as_millis() as u64,
                max_run_secs = self.max_run.as_secs(),
                "Starting crawl worker"
            );

            loop {
                let processed = self.drain(&shutdown).await;
                if processed > 0 {
                    debug!(processed, "Queue drained");
                }

                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("Crawl worker shutdown requested");
                        break;
                    }
                    _ = sleep(self.poll_interval) => {}
                }
            }

            info!("Crawl worker stopped");
        }
        .instrument(span)
        .await
    }

    /// Run jobs until none is claimable or shutdown is requested.
    pub async fn drain(&self, shutdown: &CancellationToken) -> usize {
        let mut processed = 0;
        while !shutdown.is_cancelled() {
            match self.run_next().await {
                Ok(Some(_)) => processed += 1,
                Ok(None) => break,
                Err(err) => {
                    error!(error = ?err, "Job store unavailable; backing off until next poll");
                    break;
                }
            }
        }
        processed
    }

    /// Claim and execute a single job. `Ok(None)` means nothing was claimable.
    pub async fn run_next(&self) -> Result<Option<JobRun>, JobStoreError> {
        let Some(job) = self.jobs.claim_next(Utc::now()).await? else {
            return Ok(None);
        };
        let Some(attempt_id) = job.attempt_id else {
            // Left running; the reclaimer returns it to the queue.
            error!(job_id = %job.id, "Claimed crawl job carries no attempt id");
            return Ok(None);
        };

        debug!(
            job_id = %job.id,
            subject_id = %job.subject_id,
            priority = job.priority,
            retry_count = job.retry_count,
            "Claimed crawl job"
        );

        let started = Instant::now();
        let result = self.execute(&job).await;
        let duration_ms = i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);
        histogram!("crawl_job_duration_ms").record(duration_ms as f64);

        let outcome = match result {
            Ok(report) => {
                counter!("crawl_job_executions_total", "outcome" => "success").increment(1);
                info!(
                    job_id = %job.id,
                    subject_id = %job.subject_id,
                    duration_ms,
                    requests = report.requests,
                    bytes = report.bytes,
                    "Crawl job succeeded"
                );
                JobRunOutcome::Succeeded(
                    self.jobs
                        .mark_success(job.id, attempt_id, duration_ms)
                        .await?,
                )
            }
            Err(err) => {
                counter!("crawl_job_executions_total", "outcome" => "failure").increment(1);
                let outcome = self
                    .jobs
                    .mark_failure(job.id, attempt_id, Some(duration_ms), &err.to_string())
                    .await?;
                match &outcome {
                    FailureOutcome::Requeued { retry_count, visible_at } => warn!(
                        job_id = %job.id,
                        subject_id = %job.subject_id,
                        error = %err,
                        retry_count,
                        visible_at = %visible_at,
                        "Crawl job failed; retry scheduled"
                    ),
                    FailureOutcome::Terminal => error!(
                        job_id = %job.id,
                        subject_id = %job.subject_id,
                        error = %err,
                        "Crawl job failed permanently"
                    ),
                    FailureOutcome::Superseded => warn!(
                        job_id = %job.id,
                        error = %err,
                        "Crawl job failed after being reassigned; result dropped"
                    ),
                }
                JobRunOutcome::Failed(outcome)
            }
        };

        Ok(Some(JobRun {
            job_id: job.id,
            duration_ms,
            outcome,
        }))
    }

    /// Run the handler on its own task so a panic or overrun cannot take the
    /// worker down with it.
    async fn execute(
        &self,
        job: &crate::models::crawl_job::Model,
    ) -> Result<CrawlReport, ExecutionError> {
        let handler = Arc::clone(&self.handler);
        let owned = job.clone();
        let mut task = tokio::spawn(async move { handler.execute(&owned).await });

        match timeout(self.max_run, &mut task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(ExecutionError::Panicked(join_err.to_string())),
            Err(_) => {
                task.abort();
                Err(ExecutionError::Timeout(self.max_run))
            }
        }
    }
}

/// Start `config.concurrency` workers sharing one handler.
pub fn spawn_workers(
    jobs: CrawlJobRepository,
    handler: Arc<dyn JobHandler>,
    config: &WorkerConfig,
    shutdown: CancellationToken,
) -> Vec<JoinHandle<()>> {
    (0..config.concurrency)
        .map(|id| {
            let worker = CrawlWorker::new(id, jobs.clone(), Arc::clone(&handler), config);
            tokio::spawn(worker.run(shutdown.clone()))
        })
        .collect()
}
