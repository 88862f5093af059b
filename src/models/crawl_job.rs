//! CrawlJob entity model
//!
//! This module contains the SeaORM entity model for the crawl_jobs table,
//! one row per unit of crawl work targeting a single subject.

use std::fmt;
use std::str::FromStr;

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// CrawlJob entity representing a queued, running or finished crawl
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "crawl_jobs")]
pub struct Model {
    /// Unique identifier for the crawl job (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Subject being crawled (e.g. a subreddit name)
    pub subject_id: String,

    /// One of queued, running, success, failed
    pub status: String,

    /// Scheduling priority in [0, 100]; higher runs first
    pub priority: i16,

    /// Failures recorded so far
    pub retry_count: i32,

    /// Failures tolerated before the job becomes terminally failed
    pub max_retries: i32,

    /// The job is claimable only once this instant has passed
    pub visible_at: DateTimeWithTimeZone,

    /// Last computed retry target
    pub next_retry_at: Option<DateTimeWithTimeZone>,

    /// When the job was last claimed
    pub last_attempt_at: Option<DateTimeWithTimeZone>,

    /// Token of the current claim; results from any other claim are stale
    pub attempt_id: Option<Uuid>,

    /// Duration of the most recent execution attempt
    pub duration_ms: Option<i64>,

    /// Provenance tag (system, admin, scheduler)
    pub enqueued_by: String,

    /// Message of the most recent failure
    pub last_error: Option<String>,

    /// When the aging sweeper last boosted this job
    pub aged_at: Option<DateTimeWithTimeZone>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Parsed status; unknown strings are reported as `None`.
    pub fn job_status(&self) -> Option<JobStatus> {
        self.status.parse().ok()
    }

    /// Whether the job has reached `success` or exhausted `failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.job_status(),
            Some(JobStatus::Success) | Some(JobStatus::Failed)
        )
    }
}

/// Lifecycle states of a crawl job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Success,
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 4] = [
        JobStatus::Queued,
        JobStatus::Running,
        JobStatus::Success,
        JobStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Success => "success",
            JobStatus::Failed => "failed",
        }
    }

    /// Statuses covered by the one-pending-job-per-subject guard.
    pub fn non_terminal() -> [&'static str; 2] {
        [JobStatus::Queued.as_str(), JobStatus::Running.as_str()]
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "success" => Ok(JobStatus::Success),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status '{}'", other)),
        }
    }
}
