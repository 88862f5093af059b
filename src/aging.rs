//! # Priority Aging
//!
//! Background task that raises the priority of crawl jobs that have been
//! waiting too long, so low-priority subjects are eventually served even under
//! sustained high-priority load.

use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use crate::config::MaintenanceConfig;
use crate::error::JobStoreError;
use crate::repositories::CrawlJobRepository;

pub struct AgingSweeper {
    jobs: CrawlJobRepository,
    interval: Duration,
    threshold: Duration,
    boost: i16,
}

impl AgingSweeper {
    pub fn new(jobs: CrawlJobRepository, config: &MaintenanceConfig) -> Self {
        Self {
            jobs,
            interval: Duration::from_secs(config.aging_interval_seconds),
            threshold: Duration::from_secs(config.aging_threshold_seconds),
            boost: config.aging_boost,
        }
    }

    /// Sweep every interval until `shutdown` fires.
    #[instrument(skip_all, name = "aging_sweeper")]
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            threshold_secs = self.threshold.as_secs(),
            boost = self.boost,
            "Starting priority aging sweeper"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Aging sweeper shutdown requested");
                    break;
                }
                _ = sleep(self.interval) => {
                    let tick_started = Instant::now();
                    if let Err(err) = self.tick(Utc::now()).await {
                        error!(error = ?err, "Aging sweep failed");
                    }
                    histogram!("aging_sweeper_tick_duration_ms")
                        .record(tick_started.elapsed().as_secs_f64() * 1_000.0);
                }
            }
        }

        info!("Aging sweeper stopped");
    }

    /// One sweep as of `now`; returns how many jobs were boosted.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<u64, JobStoreError> {
        let boosted = self.jobs.age_queued(self.threshold, self.boost, now).await?;

        if boosted > 0 {
            counter!("aging_sweeper_jobs_boosted_total").increment(boosted);
            info!(boosted, boost = self.boost, "Boosted priority of long-waiting jobs");
        } else {
            debug!("No queued jobs due for aging");
        }
        Ok(boosted)
    }
}
