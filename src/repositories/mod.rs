//! # Repository Layer
//!
//! The job store: SeaORM access to `crawl_jobs` and `scheduled_jobs`. Nothing
//! else in the crate writes to those tables.

pub mod crawl_job;
pub mod scheduled_job;

pub use crawl_job::{
    CrawlJobRepository, EnqueueOutcome, EnqueueRequest, FailureOutcome, JobPage, JobStats,
    ListJobsFilter, SuccessOutcome,
};
pub use scheduled_job::{NewScheduledJob, ScheduledJobPatch, ScheduledJobRepository};

use crate::error::JobStoreError;
use crate::models::{MAX_PRIORITY, MIN_PRIORITY};

/// Accept an absolute priority only when it already lies in `[0, 100]`.
pub(crate) fn validate_priority(value: i64) -> Result<i16, JobStoreError> {
    if (i64::from(MIN_PRIORITY)..=i64::from(MAX_PRIORITY)).contains(&value) {
        Ok(value as i16)
    } else {
        Err(JobStoreError::InvalidPriority { value })
    }
}
