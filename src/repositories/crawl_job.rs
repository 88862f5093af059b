//! # CrawlJob Repository
//!
//! Every state change a crawl job goes through lives here. Each operation is a
//! single guarded statement (or one short transaction), so the worker pool, the
//! periodic services and admin calls may interleave freely.

use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use metrics::counter;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sea_orm::prelude::{DateTimeWithTimeZone, Expr};
use sea_orm::sea_query::{LockBehavior, LockType};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DatabaseBackend,
    DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Select,
    Set, TransactionTrait,
};
use serde::Serialize;
use tracing::{debug, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::{JobStoreError, is_unique_violation};
use crate::models::crawl_job::{ActiveModel, Column, Entity, Model};
use crate::models::{JobStatus, MAX_PRIORITY, MIN_PRIORITY};
use crate::retry::{RetryDecision, RetryPolicy};

use super::validate_priority;

/// Candidates tried per optimistic claim before reporting an empty queue.
const CLAIM_CANDIDATES: u64 = 8;

/// Default and maximum page sizes for [`CrawlJobRepository::list`].
pub const DEFAULT_PAGE_SIZE: u64 = 50;
pub const MAX_PAGE_SIZE: u64 = 100;

/// Stored longer than this and the message is cut.
const LAST_ERROR_MAX_CHARS: usize = 2000;

/// Parameters for a new crawl job.
#[derive(Debug, Clone)]
pub struct EnqueueRequest {
    pub subject_id: String,
    pub priority: i64,
    pub enqueued_by: String,
    /// Falls back to the repository default when absent
    pub max_retries: Option<i32>,
}

impl EnqueueRequest {
    pub fn new(subject_id: impl Into<String>, enqueued_by: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            priority: 0,
            enqueued_by: enqueued_by.into(),
            max_retries: None,
        }
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_retries(mut self, max_retries: i32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnqueueOutcome {
    Enqueued(Model),
    /// The subject already has a queued or running job; nothing was written.
    Duplicate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuccessOutcome {
    Completed,
    /// The job was no longer running (reclaimed or overridden meanwhile).
    Superseded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    Requeued {
        retry_count: i32,
        visible_at: DateTime<Utc>,
    },
    Terminal,
    /// The job was no longer running (reclaimed or overridden meanwhile).
    Superseded,
}

/// Counts by status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct JobStats {
    pub queued: u64,
    pub running: u64,
    pub success: u64,
    pub failed: u64,
    pub total: u64,
}

#[derive(Debug, Clone)]
pub struct ListJobsFilter {
    pub status: Option<JobStatus>,
    pub limit: u64,
    pub offset: u64,
}

impl Default for ListJobsFilter {
    fn default() -> Self {
        Self {
            status: None,
            limit: DEFAULT_PAGE_SIZE,
            offset: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct JobPage {
    pub jobs: Vec<Model>,
    pub total: u64,
}

/// Repository for the `crawl_jobs` table
#[derive(Clone)]
pub struct CrawlJobRepository {
    db: DatabaseConnection,
    retry_policy: RetryPolicy,
    default_max_retries: i32,
}

impl CrawlJobRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self {
            db,
            retry_policy: RetryPolicy::default(),
            default_max_retries: 3,
        }
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn with_default_max_retries(mut self, max_retries: i32) -> Self {
        self.default_max_retries = max_retries.max(0);
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    pub fn default_max_retries(&self) -> i32 {
        self.default_max_retries
    }

    /// Insert a queued job, visible immediately. A subject that already has a
    /// queued or running job yields [`EnqueueOutcome::Duplicate`].
    pub async fn enqueue(&self, request: EnqueueRequest) -> Result<EnqueueOutcome, JobStoreError> {
        let subject_id = request.subject_id.trim();
        if subject_id.is_empty() {
            return Err(JobStoreError::Validation(
                "subject_id must not be empty".to_string(),
            ));
        }
        let priority = validate_priority(request.priority)?;
        let max_retries = request.max_retries.unwrap_or(self.default_max_retries);
        if max_retries < 0 {
            return Err(JobStoreError::Validation(format!(
                "max_retries must be >= 0, got {}",
                max_retries
            )));
        }

        let now = db_now();
        let job = ActiveModel {
            id: Set(Uuid::new_v4()),
            subject_id: Set(subject_id.to_string()),
            status: Set(JobStatus::Queued.to_string()),
            priority: Set(priority),
            retry_count: Set(0),
            max_retries: Set(max_retries),
            visible_at: Set(now),
            next_retry_at: Set(None),
            last_attempt_at: Set(None),
            attempt_id: Set(None),
            duration_ms: Set(None),
            enqueued_by: Set(request.enqueued_by.clone()),
            last_error: Set(None),
            aged_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };

        match job.insert(&self.db).await {
            Ok(model) => {
                counter!("crawl_jobs_enqueued_total").increment(1);
                info!(
                    job_id = %model.id,
                    subject_id = %model.subject_id,
                    priority = model.priority,
                    enqueued_by = %model.enqueued_by,
                    "Crawl job enqueued"
                );
                Ok(EnqueueOutcome::Enqueued(model))
            }
            Err(err) if is_unique_violation(&err) => {
                counter!("crawl_jobs_enqueue_duplicates_total").increment(1);
                debug!(subject_id, "Subject already has a pending crawl job; enqueue skipped");
                Ok(EnqueueOutcome::Duplicate)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Atomically take the highest-priority visible job and mark it running.
    ///
    /// Every claim stamps a fresh `attempt_id`; results must quote it back to
    /// [`CrawlJobRepository::mark_success`] or [`CrawlJobRepository::mark_failure`].
    ///
    /// `Ok(None)` means either the queue is empty or every candidate was taken
    /// by a concurrent claimer; callers simply try again on their next poll.
    pub async fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<Model>, JobStoreError> {
        let now = now.fixed_offset();
        let claimed = match self.db.get_database_backend() {
            DatabaseBackend::Postgres => self.claim_locked(now).await?,
            _ => self.claim_optimistic(now).await?,
        };

        if let Some(job) = &claimed {
            counter!("crawl_jobs_claimed_total").increment(1);
            debug!(
                job_id = %job.id,
                subject_id = %job.subject_id,
                priority = job.priority,
                retry_count = job.retry_count,
                "Crawl job claimed"
            );
        }
        Ok(claimed)
    }

    /// Row lock with SKIP LOCKED: concurrent claimers never wait on each other.
    async fn claim_locked(&self, now: DateTimeWithTimeZone) -> Result<Option<Model>, JobStoreError> {
        let txn = self.db.begin().await?;

        let Some(job) = claimable(now)
            .lock_with_behavior(LockType::Update, LockBehavior::SkipLocked)
            .one(&txn)
            .await?
        else {
            txn.commit().await?;
            return Ok(None);
        };

        let mut active: ActiveModel = job.into();
        active.status = Set(JobStatus::Running.to_string());
        active.last_attempt_at = Set(Some(now));
        active.attempt_id = Set(Some(Uuid::new_v4()));
        active.updated_at = Set(now);
        let claimed = active.update(&txn).await?;

        txn.commit().await?;
        Ok(Some(claimed))
    }

    /// Compare-and-set on `status = 'queued'`; whoever flips the row owns it.
    async fn claim_optimistic(
        &self,
        now: DateTimeWithTimeZone,
    ) -> Result<Option<Model>, JobStoreError> {
        let candidates = claimable(now)
            .select_only()
            .column(Column::Id)
            .limit(CLAIM_CANDIDATES)
            .into_tuple::<Uuid>()
            .all(&self.db)
            .await?;

        for id in candidates {
            let result = Entity::update_many()
                .col_expr(Column::Status, Expr::value(JobStatus::Running.as_str()))
                .col_expr(Column::LastAttemptAt, Expr::value(now))
                .col_expr(Column::AttemptId, Expr::value(Some(Uuid::new_v4())))
                .col_expr(Column::UpdatedAt, Expr::value(now))
                .filter(Column::Id.eq(id))
                .filter(Column::Status.eq(JobStatus::Queued.as_str()))
                .filter(Column::VisibleAt.lte(now))
                .exec(&self.db)
                .await?;

            if result.rows_affected == 1 {
                return Ok(Entity::find_by_id(id).one(&self.db).await?);
            }
            counter!("crawl_jobs_claim_contention_total").increment(1);
        }

        Ok(None)
    }

    /// Record a successful run. Only the claim identified by `attempt_id`
    /// transitions the job; anything else is [`SuccessOutcome::Superseded`].
    pub async fn mark_success(
        &self,
        id: Uuid,
        attempt_id: Uuid,
        duration_ms: i64,
    ) -> Result<SuccessOutcome, JobStoreError> {
        let now = db_now();
        let result = Entity::update_many()
            .col_expr(Column::Status, Expr::value(JobStatus::Success.as_str()))
            .col_expr(Column::DurationMs, Expr::value(Some(duration_ms)))
            .col_expr(Column::LastError, Expr::value(Option::<String>::None))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::Id.eq(id))
            .filter(Column::Status.eq(JobStatus::Running.as_str()))
            .filter(Column::AttemptId.eq(attempt_id))
            .exec(&self.db)
            .await?;

        if result.rows_affected == 1 {
            counter!("crawl_jobs_succeeded_total").increment(1);
            return Ok(SuccessOutcome::Completed);
        }

        self.get(id).await?;
        counter!("crawl_jobs_stale_results_total").increment(1);
        warn!(job_id = %id, %attempt_id, "Success reported for a claim that no longer owns the job");
        Ok(SuccessOutcome::Superseded)
    }

    /// Record a failed run and let the retry policy decide between requeue and
    /// terminal failure.
    pub async fn mark_failure(
        &self,
        id: Uuid,
        attempt_id: Uuid,
        duration_ms: Option<i64>,
        error: &str,
    ) -> Result<FailureOutcome, JobStoreError> {
        let mut rng = StdRng::from_entropy();
        self.mark_failure_with_rng(id, attempt_id, duration_ms, error, Utc::now(), &mut rng)
            .await
    }

    /// [`CrawlJobRepository::mark_failure`] with an explicit clock and RNG.
    pub async fn mark_failure_with_rng<R: Rng + ?Sized>(
        &self,
        id: Uuid,
        attempt_id: Uuid,
        duration_ms: Option<i64>,
        error: &str,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> Result<FailureOutcome, JobStoreError> {
        let job = self.get(id).await?;
        if job.job_status() != Some(JobStatus::Running) || job.attempt_id != Some(attempt_id) {
            counter!("crawl_jobs_stale_results_total").increment(1);
            warn!(
                job_id = %id,
                %attempt_id,
                status = %job.status,
                "Failure reported for a claim that no longer owns the job"
            );
            return Ok(FailureOutcome::Superseded);
        }

        let decision = self
            .retry_policy
            .decide(job.retry_count, job.max_retries, now, rng);
        let db_time = now.fixed_offset();

        let mut update = Entity::update_many()
            .col_expr(Column::DurationMs, Expr::value(duration_ms))
            .col_expr(Column::LastError, Expr::value(Some(truncate_error(error))))
            .col_expr(Column::UpdatedAt, Expr::value(db_time));

        let outcome = match decision {
            RetryDecision::Retry {
                retry_count,
                visible_at,
                ..
            } => {
                let visible_at_db = visible_at.fixed_offset();
                update = update
                    .col_expr(Column::Status, Expr::value(JobStatus::Queued.as_str()))
                    .col_expr(Column::RetryCount, Expr::value(retry_count))
                    .col_expr(Column::VisibleAt, Expr::value(visible_at_db))
                    .col_expr(Column::NextRetryAt, Expr::value(Some(visible_at_db)));
                FailureOutcome::Requeued {
                    retry_count,
                    visible_at,
                }
            }
            RetryDecision::Exhausted => {
                update = update.col_expr(Column::Status, Expr::value(JobStatus::Failed.as_str()));
                FailureOutcome::Terminal
            }
        };

        let result = update
            .filter(Column::Id.eq(id))
            .filter(Column::Status.eq(JobStatus::Running.as_str()))
            .filter(Column::AttemptId.eq(attempt_id))
            .filter(Column::RetryCount.eq(job.retry_count))
            .exec(&self.db)
            .await?;

        if result.rows_affected == 0 {
            warn!(job_id = %id, "Crawl job changed while its failure was being recorded");
            return Ok(FailureOutcome::Superseded);
        }

        match outcome {
            FailureOutcome::Requeued {
                retry_count,
                visible_at,
            } => {
                counter!("crawl_jobs_requeued_total").increment(1);
                info!(
                    job_id = %id,
                    subject_id = %job.subject_id,
                    retry_count,
                    visible_at = %visible_at,
                    error,
                    "Crawl job failed; requeued with backoff"
                );
            }
            FailureOutcome::Terminal => {
                counter!("crawl_jobs_failed_total").increment(1);
                warn!(
                    job_id = %id,
                    subject_id = %job.subject_id,
                    retry_count = job.retry_count,
                    max_retries = job.max_retries,
                    error,
                    "Crawl job failed; retries exhausted"
                );
            }
            FailureOutcome::Superseded => {}
        }

        Ok(outcome)
    }

    pub async fn get(&self, id: Uuid) -> Result<Model, JobStoreError> {
        Entity::find_by_id(id)
            .one(&self.db)
            .await?
            .ok_or_else(|| JobStoreError::crawl_job_not_found(id))
    }

    /// One page in claim order (`priority DESC, created_at ASC, id ASC`).
    pub async fn list(&self, filter: ListJobsFilter) -> Result<JobPage, JobStoreError> {
        if !(1..=MAX_PAGE_SIZE).contains(&filter.limit) {
            return Err(JobStoreError::Validation(format!(
                "limit must be between 1 and {}, got {}",
                MAX_PAGE_SIZE, filter.limit
            )));
        }

        let mut query = Entity::find();
        if let Some(status) = filter.status {
            query = query.filter(Column::Status.eq(status.as_str()));
        }

        let total = query.clone().count(&self.db).await?;
        let jobs = in_claim_order(query)
            .offset(filter.offset)
            .limit(filter.limit)
            .all(&self.db)
            .await?;

        Ok(JobPage { jobs, total })
    }

    pub async fn stats(&self) -> Result<JobStats, JobStoreError> {
        let rows = Entity::find()
            .select_only()
            .column(Column::Status)
            .column_as(Column::Id.count(), "count")
            .group_by(Column::Status)
            .into_tuple::<(String, i64)>()
            .all(&self.db)
            .await?;

        let mut stats = JobStats::default();
        for (status, count) in rows {
            let count = count.max(0) as u64;
            match status.parse::<JobStatus>() {
                Ok(JobStatus::Queued) => stats.queued += count,
                Ok(JobStatus::Running) => stats.running += count,
                Ok(JobStatus::Success) => stats.success += count,
                Ok(JobStatus::Failed) => stats.failed += count,
                Err(_) => warn!(status = %status, count, "Unknown crawl job status in store"),
            }
            stats.total += count;
        }
        Ok(stats)
    }

    /// Set an absolute priority; values outside `[0, 100]` are rejected.
    pub async fn update_priority(&self, id: Uuid, value: i64) -> Result<Model, JobStoreError> {
        let priority = validate_priority(value)?;
        let result = Entity::update_many()
            .col_expr(Column::Priority, Expr::value(priority))
            .col_expr(Column::UpdatedAt, Expr::value(db_now()))
            .filter(Column::Id.eq(id))
            .exec(&self.db)
            .await?;

        if result.rows_affected == 0 {
            return Err(JobStoreError::crawl_job_not_found(id));
        }
        self.get(id).await
    }

    /// Add `delta` to the priority in place, clamped to `[0, 100]`.
    pub async fn boost_priority(&self, id: Uuid, delta: i64) -> Result<Model, JobStoreError> {
        if delta.abs() > i64::from(MAX_PRIORITY) {
            return Err(JobStoreError::InvalidPriority { value: delta });
        }

        let result = Entity::update_many()
            .col_expr(Column::Priority, clamped_priority_shift(delta))
            .col_expr(Column::UpdatedAt, Expr::value(db_now()))
            .filter(Column::Id.eq(id))
            .exec(&self.db)
            .await?;

        if result.rows_affected == 0 {
            return Err(JobStoreError::crawl_job_not_found(id));
        }
        self.get(id).await
    }

    /// Operator override to `queued` (visible now) or `failed`.
    pub async fn update_status(&self, id: Uuid, status: JobStatus) -> Result<Model, JobStoreError> {
        let now = db_now();
        let update = match status {
            JobStatus::Queued => Entity::update_many()
                .col_expr(Column::Status, Expr::value(JobStatus::Queued.as_str()))
                .col_expr(Column::VisibleAt, Expr::value(now)),
            JobStatus::Failed => Entity::update_many()
                .col_expr(Column::Status, Expr::value(JobStatus::Failed.as_str())),
            JobStatus::Running | JobStatus::Success => {
                return Err(JobStoreError::InvalidStatus {
                    value: status.to_string(),
                    reason: "only queued or failed may be set by an operator",
                });
            }
        };

        let result = update
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::Id.eq(id))
            .exec(&self.db)
            .await
            .map_err(|err| subject_conflict(err, id))?;

        if result.rows_affected == 0 {
            return Err(JobStoreError::crawl_job_not_found(id));
        }
        info!(job_id = %id, status = %status, "Crawl job status overridden");
        self.get(id).await
    }

    /// Requeue with a fresh retry budget, visible now.
    pub async fn force_retry(&self, id: Uuid) -> Result<Model, JobStoreError> {
        let now = db_now();
        let result = Entity::update_many()
            .col_expr(Column::Status, Expr::value(JobStatus::Queued.as_str()))
            .col_expr(Column::RetryCount, Expr::value(0))
            .col_expr(Column::VisibleAt, Expr::value(now))
            .col_expr(
                Column::NextRetryAt,
                Expr::value(Option::<DateTimeWithTimeZone>::None),
            )
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::Id.eq(id))
            .exec(&self.db)
            .await
            .map_err(|err| subject_conflict(err, id))?;

        if result.rows_affected == 0 {
            return Err(JobStoreError::crawl_job_not_found(id));
        }
        info!(job_id = %id, "Crawl job force-retried");
        self.get(id).await
    }

    /// [`CrawlJobRepository::update_status`] over many ids. Unknown ids and
    /// subject conflicts are skipped; returns the number of jobs changed.
    pub async fn bulk_update_status(
        &self,
        ids: &[Uuid],
        status: JobStatus,
    ) -> Result<u64, JobStoreError> {
        if !matches!(status, JobStatus::Queued | JobStatus::Failed) {
            return Err(JobStoreError::InvalidStatus {
                value: status.to_string(),
                reason: "only queued or failed may be set by an operator",
            });
        }

        let mut changed = 0;
        for id in ids {
            match self.update_status(*id, status).await {
                Ok(_) => changed += 1,
                Err(JobStoreError::NotFound { .. }) | Err(JobStoreError::Conflict(_)) => {
                    debug!(job_id = %id, "Skipping job in bulk status update");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(changed)
    }

    /// [`CrawlJobRepository::force_retry`] over many ids, with the same
    /// skipping rules as [`CrawlJobRepository::bulk_update_status`].
    pub async fn bulk_force_retry(&self, ids: &[Uuid]) -> Result<u64, JobStoreError> {
        let mut changed = 0;
        for id in ids {
            match self.force_retry(*id).await {
                Ok(_) => changed += 1,
                Err(JobStoreError::NotFound { .. }) | Err(JobStoreError::Conflict(_)) => {
                    debug!(job_id = %id, "Skipping job in bulk retry");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(changed)
    }

    /// Return running jobs whose last claim is older than `threshold` to the
    /// queue. `retry_count` is left alone.
    pub async fn reclaim_stuck(
        &self,
        threshold: Duration,
        now: DateTime<Utc>,
    ) -> Result<u64, JobStoreError> {
        let now_db = now.fixed_offset();
        let cutoff = cutoff(now, threshold);

        let result = Entity::update_many()
            .col_expr(Column::Status, Expr::value(JobStatus::Queued.as_str()))
            .col_expr(Column::VisibleAt, Expr::value(now_db))
            .col_expr(Column::UpdatedAt, Expr::value(now_db))
            .filter(Column::Status.eq(JobStatus::Running.as_str()))
            .filter(Column::LastAttemptAt.lte(cutoff))
            .exec(&self.db)
            .await?;

        Ok(result.rows_affected)
    }

    /// Boost every queued job that has waited at least `threshold` (and was not
    /// boosted within the last `threshold`) by `boost`, capped at 100.
    pub async fn age_queued(
        &self,
        threshold: Duration,
        boost: i16,
        now: DateTime<Utc>,
    ) -> Result<u64, JobStoreError> {
        let now_db = now.fixed_offset();
        let cutoff = cutoff(now, threshold);

        let result = Entity::update_many()
            .col_expr(Column::Priority, clamped_priority_shift(i64::from(boost)))
            .col_expr(Column::AgedAt, Expr::value(Some(now_db)))
            .col_expr(Column::UpdatedAt, Expr::value(now_db))
            .filter(Column::Status.eq(JobStatus::Queued.as_str()))
            .filter(Column::CreatedAt.lte(cutoff))
            .filter(Column::Priority.lt(MAX_PRIORITY))
            .filter(
                Condition::any()
                    .add(Column::AgedAt.is_null())
                    .add(Column::AgedAt.lte(cutoff)),
            )
            .exec(&self.db)
            .await?;

        Ok(result.rows_affected)
    }
}

/// Queued, visible jobs in claim order.
fn claimable(now: DateTimeWithTimeZone) -> Select<Entity> {
    in_claim_order(
        Entity::find()
            .filter(Column::Status.eq(JobStatus::Queued.as_str()))
            .filter(Column::VisibleAt.lte(now)),
    )
}

fn in_claim_order(query: Select<Entity>) -> Select<Entity> {
    query
        .order_by_desc(Column::Priority)
        .order_by_asc(Column::CreatedAt)
        .order_by_asc(Column::Id)
}

/// `priority + delta` clamped to the stored range, evaluated by the database.
fn clamped_priority_shift(delta: i64) -> sea_orm::sea_query::SimpleExpr {
    Expr::cust(format!(
        "CASE WHEN priority + ({delta}) > {max} THEN {max} \
         WHEN priority + ({delta}) < {min} THEN {min} \
         ELSE priority + ({delta}) END",
        delta = delta,
        max = MAX_PRIORITY,
        min = MIN_PRIORITY,
    ))
}

fn subject_conflict(err: sea_orm::DbErr, id: Uuid) -> JobStoreError {
    if is_unique_violation(&err) {
        JobStoreError::Conflict(format!(
            "crawl job {} cannot be requeued: its subject already has a pending job",
            id
        ))
    } else {
        err.into()
    }
}

fn cutoff(now: DateTime<Utc>, threshold: Duration) -> DateTimeWithTimeZone {
    let threshold = ChronoDuration::from_std(threshold).unwrap_or(ChronoDuration::MAX);
    now.checked_sub_signed(threshold)
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
        .fixed_offset()
}

fn truncate_error(error: &str) -> String {
    if error.chars().count() > LAST_ERROR_MAX_CHARS {
        let truncated: String = error.chars().take(LAST_ERROR_MAX_CHARS).collect();
        format!("{}...", truncated)
    } else {
        error.to_string()
    }
}

/// Current time in the representation every timestamp column uses.
pub(crate) fn db_now() -> DateTimeWithTimeZone {
    Utc::now().fixed_offset()
}
