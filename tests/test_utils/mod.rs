//! Test utilities for job store testing.
//!
//! In-memory SQLite databases with migrations applied, plus small fixtures
//! shared by the integration tests.

#![allow(dead_code)]

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use crawler_scheduler::models::crawl_job::Model as CrawlJobModel;
use crawler_scheduler::repositories::{CrawlJobRepository, EnqueueOutcome, EnqueueRequest};
use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use std::path::Path;

/// Sets up an in-memory SQLite database with all migrations applied.
///
/// A single pooled connection keeps every query on the same in-memory database.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let mut opt = ConnectOptions::new("sqlite::memory:");
    opt.max_connections(1).min_connections(1).sqlx_logging(false);
    let db = Database::connect(opt).await?;
    Migrator::up(&db, None).await?;
    Ok(db)
}

/// File-backed SQLite with a real pool, so concurrent callers hold separate
/// connections and genuinely race each other.
pub async fn setup_file_db(path: &Path, max_connections: u32) -> Result<DatabaseConnection> {
    let mut opt = ConnectOptions::new(format!("sqlite://{}?mode=rwc", path.display()));
    opt.max_connections(max_connections)
        .min_connections(max_connections)
        .sqlx_logging(false);
    let db = Database::connect(opt).await?;
    Migrator::up(&db, None).await?;
    Ok(db)
}

/// Repository over a fresh in-memory store.
pub async fn setup_job_repository() -> Result<CrawlJobRepository> {
    Ok(CrawlJobRepository::new(setup_test_db().await?))
}

/// Enqueue and unwrap the new job, failing the test on a duplicate.
pub async fn enqueue(jobs: &CrawlJobRepository, subject: &str, priority: i64) -> CrawlJobModel {
    match jobs
        .enqueue(EnqueueRequest::new(subject, "test").with_priority(priority))
        .await
        .expect("enqueue failed")
    {
        EnqueueOutcome::Enqueued(job) => job,
        EnqueueOutcome::Duplicate => panic!("subject {} already pending", subject),
    }
}

/// Claim token stamped on a job returned by `claim_next`.
pub fn attempt(job: &CrawlJobModel) -> uuid::Uuid {
    job.attempt_id.expect("claimed job carries an attempt id")
}

/// A point far enough ahead that any retry backoff has elapsed.
pub fn after_any_backoff() -> DateTime<Utc> {
    Utc::now() + Duration::days(3)
}

/// A running job for `subject`, built in memory for handler tests.
pub fn running_job(subject: &str) -> CrawlJobModel {
    let now = Utc::now().fixed_offset();
    CrawlJobModel {
        id: uuid::Uuid::new_v4(),
        subject_id: subject.to_string(),
        status: "running".to_string(),
        priority: 50,
        retry_count: 0,
        max_retries: 3,
        visible_at: now,
        next_retry_at: None,
        last_attempt_at: Some(now),
        attempt_id: Some(uuid::Uuid::new_v4()),
        duration_ms: None,
        enqueued_by: "test".to_string(),
        last_error: None,
        aged_at: None,
        created_at: now,
        updated_at: now,
    }
}
