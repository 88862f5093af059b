//! Job execution seam.
//!
//! The worker pool hands every claimed crawl job to a [`JobHandler`] and only
//! looks at whether it succeeded. What a crawl actually fetches lives behind the
//! trait; [`http::HttpCrawlHandler`] is the bundled implementation.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::crawl_job::Model as CrawlJobModel;
use crate::rate_limiter::RateLimiterError;

pub mod http;

pub use http::HttpCrawlHandler;

/// What one execution did upstream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlReport {
    /// Outbound requests sent, retries included
    pub requests: u32,
    /// Response bytes received
    pub bytes: u64,
    /// Items found in the fetched listing
    pub items: u64,
    /// Whether the authenticated API served the crawl
    pub authenticated: bool,
}

/// Everything that can go wrong while executing a job. The worker turns each of
/// these into a recorded failure; none of them stop the worker.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("upstream returned {status} for {url}")]
    UpstreamStatus { status: u16, url: String },
    #[error("token exchange at {url} failed with {status}")]
    TokenExchange { status: u16, url: String },
    #[error("upstream still throttling after {attempts} attempts")]
    UpstreamThrottled {
        attempts: u32,
        retry_after: Option<Duration>,
    },
    #[error("job exceeded its {0:?} execution limit")]
    Timeout(Duration),
    #[error("rate limiter closed")]
    RateLimiterClosed,
    #[error("rate limiter unusable: {0}")]
    RateLimiter(RateLimiterError),
    #[error("invalid crawl subject '{0}'")]
    InvalidSubject(String),
    #[error("malformed upstream response: {0}")]
    Malformed(String),
    #[error("job handler panicked: {0}")]
    Panicked(String),
}

impl From<RateLimiterError> for ExecutionError {
    fn from(err: RateLimiterError) -> Self {
        match err {
            RateLimiterError::Closed => ExecutionError::RateLimiterClosed,
            other => ExecutionError::RateLimiter(other),
        }
    }
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Perform the work for one claimed job.
    async fn execute(&self, job: &CrawlJobModel) -> Result<CrawlReport, ExecutionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limiter_errors_keep_their_cause() {
        assert!(matches!(
            ExecutionError::from(RateLimiterError::Closed),
            ExecutionError::RateLimiterClosed
        ));
        let err = ExecutionError::from(RateLimiterError::ZeroInterval);
        assert!(matches!(
            err,
            ExecutionError::RateLimiter(RateLimiterError::ZeroInterval)
        ));
        assert!(err.to_string().contains("greater than zero"));
    }
}
