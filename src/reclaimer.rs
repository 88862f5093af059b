//! # Stuck Job Reclaimer
//!
//! Returns jobs left `running` by a crashed or hung worker to the queue. This is
//! liveness recovery, not a failure: the retry budget is untouched.

use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::MaintenanceConfig;
use crate::error::JobStoreError;
use crate::repositories::CrawlJobRepository;

pub struct StuckJobReclaimer {
    jobs: CrawlJobRepository,
    interval: Duration,
    threshold: Duration,
}

impl StuckJobReclaimer {
    pub fn new(jobs: CrawlJobRepository, config: &MaintenanceConfig) -> Self {
        Self {
            jobs,
            interval: Duration::from_secs(config.reclaim_interval_seconds),
            threshold: Duration::from_secs(config.stuck_threshold_seconds),
        }
    }

    #[instrument(skip_all, name = "stuck_job_reclaimer")]
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            threshold_secs = self.threshold.as_secs(),
            "Starting stuck job reclaimer"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Stuck job reclaimer shutdown requested");
                    break;
                }
                _ = sleep(self.interval) => {
                    let tick_started = Instant::now();
                    if let Err(err) = self.tick(Utc::now()).await {
                        error!(error = ?err, "Stuck job reclaim failed");
                    }
                    histogram!("stuck_job_reclaimer_tick_duration_ms")
                        .record(tick_started.elapsed().as_secs_f64() * 1_000.0);
                }
            }
        }

        info!("Stuck job reclaimer stopped");
    }

    pub async fn tick(&self, now: DateTime<Utc>) -> Result<u64, JobStoreError> {
        let reclaimed = self.jobs.reclaim_stuck(self.threshold, now).await?;

        if reclaimed > 0 {
            counter!("stuck_jobs_reclaimed_total").increment(reclaimed);
            warn!(
                reclaimed,
                threshold_secs = self.threshold.as_secs(),
                "Returned stuck running jobs to the queue"
            );
        } else {
            debug!("No stuck jobs found");
        }
        Ok(reclaimed)
    }
}
