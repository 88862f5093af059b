//! # Data Models
//!
//! SeaORM entities owned by the job store plus small shared response types.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod crawl_job;
pub mod scheduled_job;

pub use crawl_job::{Entity as CrawlJob, JobStatus};
pub use scheduled_job::Entity as ScheduledJob;

/// Lowest priority a crawl job may carry.
pub const MIN_PRIORITY: i16 = 0;
/// Highest priority a crawl job may carry.
pub const MAX_PRIORITY: i16 = 100;

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "crawler-scheduler".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
