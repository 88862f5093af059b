//! # Scheduled Job Runner
//!
//! Background task that fires due recurrence rules. Each fire enqueues a crawl
//! job for the rule's subject (a duplicate is a silent no-op) and then advances
//! `last_run_at` / `next_run_at` with a compare-and-set, so several runner
//! instances may tick concurrently without double-advancing a rule.

use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::{counter, gauge, histogram};
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::SchedulerConfig;
use crate::cron::Recurrence;
use crate::error::JobStoreError;
use crate::models::scheduled_job::Model as ScheduledJobModel;
use crate::repositories::{
    CrawlJobRepository, EnqueueOutcome, EnqueueRequest, ScheduledJobRepository,
};

/// Provenance tag on crawl jobs created by the runner.
pub const SCHEDULER_ENQUEUED_BY: &str = "scheduler";

pub struct ScheduledJobRunner {
    jobs: CrawlJobRepository,
    schedules: ScheduledJobRepository,
    tick_interval: Duration,
    batch_size: u64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickStats {
    pub due: u64,
    pub enqueued: u64,
    pub duplicates: u64,
    /// Rules advanced by another runner between our read and our write
    pub lost_races: u64,
    pub errors: u64,
}

impl ScheduledJobRunner {
    pub fn new(
        jobs: CrawlJobRepository,
        schedules: ScheduledJobRepository,
        config: &SchedulerConfig,
    ) -> Self {
        Self {
            jobs,
            schedules,
            tick_interval: Duration::from_secs(config.tick_interval_seconds),
            batch_size: config.batch_size,
        }
    }

    /// Run the runner loop until the provided shutdown token fires.
    #[instrument(skip_all, name = "scheduled_job_runner")]
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            tick_interval_secs = self.tick_interval.as_secs(),
            "Starting scheduled job runner"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Scheduled job runner shutdown requested");
                    break;
                }
                _ = sleep(self.tick_interval) => {
                    let tick_started = Instant::now();
                    if let Err(err) = self.tick(Utc::now()).await {
                        error!(error = ?err, "Scheduled job runner tick failed");
                    }
                    histogram!("scheduled_job_runner_tick_duration_ms")
                        .record(tick_started.elapsed().as_secs_f64() * 1_000.0);
                }
            }
        }

        info!("Scheduled job runner stopped");
    }

    /// Fire every rule due at `now`.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickStats, JobStoreError> {
        let due = self.schedules.due(now, self.batch_size).await?;
        let mut stats = TickStats {
            due: due.len() as u64,
            ..Default::default()
        };

        for schedule in due {
            if let Err(err) = self.fire(&schedule, now, &mut stats).await {
                stats.errors += 1;
                error!(
                    error = ?err,
                    scheduled_job_id = %schedule.id,
                    name = %schedule.name,
                    "Failed to fire scheduled job"
                );
            }
        }

        gauge!("scheduled_job_runner_due_gauge").set(stats.due as f64);
        debug!(
            due = stats.due,
            enqueued = stats.enqueued,
            duplicates = stats.duplicates,
            lost_races = stats.lost_races,
            errors = stats.errors,
            "Scheduled job runner tick completed"
        );
        Ok(stats)
    }

    async fn fire(
        &self,
        schedule: &ScheduledJobModel,
        now: DateTime<Utc>,
        stats: &mut TickStats,
    ) -> Result<(), JobStoreError> {
        let recurrence = Recurrence::parse(&schedule.cron_expression)?;

        let request = EnqueueRequest::new(schedule.subject_id.clone(), SCHEDULER_ENQUEUED_BY)
            .with_priority(i64::from(schedule.priority));

        match self.jobs.enqueue(request).await? {
            EnqueueOutcome::Enqueued(job) => {
                stats.enqueued += 1;
                counter!("scheduled_jobs_fired_total").increment(1);
                info!(
                    scheduled_job_id = %schedule.id,
                    name = %schedule.name,
                    job_id = %job.id,
                    subject_id = %job.subject_id,
                    "Scheduled job fired"
                );
            }
            EnqueueOutcome::Duplicate => {
                stats.duplicates += 1;
                counter!("scheduled_jobs_fired_duplicate_total").increment(1);
                debug!(
                    scheduled_job_id = %schedule.id,
                    subject_id = %schedule.subject_id,
                    "Subject already pending; fire recorded without a new job"
                );
            }
        }

        let next_run_at = recurrence.next_after(now);
        let advanced = self
            .schedules
            .record_run(schedule.id, schedule.next_run_at, now, next_run_at)
            .await?;

        if !advanced {
            stats.lost_races += 1;
            warn!(
                scheduled_job_id = %schedule.id,
                "Scheduled job advanced concurrently; skipping"
            );
        }
        Ok(())
    }
}
