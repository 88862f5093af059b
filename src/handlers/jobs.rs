//! # Jobs API Handlers
//!
//! Operator endpoints over the crawl job queue: stats, listing, enqueue and the
//! administrative overrides (status, priority, boost, force retry).

use axum::{
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::OperatorAuth;
use crate::error::{ApiError, validation_error};
use crate::models::JobStatus;
use crate::models::crawl_job;
use crate::repositories::crawl_job::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
use crate::repositories::{
    EnqueueOutcome, EnqueueRequest, JobStats, ListJobsFilter, validate_priority,
};
use crate::server::AppState;

/// Provenance tag on jobs enqueued through the admin API.
pub const ADMIN_ENQUEUED_BY: &str = "admin";

/// Largest id set accepted by the batch endpoints.
const MAX_BATCH_IDS: usize = 1000;

/// Query parameters for listing jobs
#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    /// Filter by job status (one of: queued, running, success, failed)
    pub status: Option<String>,
    /// Maximum number of jobs to return (default: 50, max: 100)
    pub limit: Option<u64>,
    /// Number of jobs to skip
    pub offset: Option<u64>,
}

/// Crawl job as returned by the API
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct JobInfo {
    #[schema(example = "550e8400-e29b-41d4-a716-446655440000")]
    pub id: String,
    /// Subject being crawled
    #[schema(example = "rust")]
    pub subject_id: String,
    #[schema(example = "queued")]
    pub status: String,
    /// Scheduling priority in [0, 100]; higher runs first
    #[schema(example = 50)]
    pub priority: i16,
    #[schema(example = 0)]
    pub retry_count: i32,
    #[schema(example = 3)]
    pub max_retries: i32,
    /// The job is not claimable before this instant
    #[schema(example = "2024-01-15T10:30:00Z")]
    pub visible_at: String,
    pub next_retry_at: Option<String>,
    pub last_attempt_at: Option<String>,
    pub duration_ms: Option<i64>,
    #[schema(example = "admin")]
    pub enqueued_by: String,
    pub last_error: Option<String>,
    #[schema(example = "2024-01-15T10:30:00Z")]
    pub created_at: String,
    #[schema(example = "2024-01-15T10:30:00Z")]
    pub updated_at: String,
}

impl From<crawl_job::Model> for JobInfo {
    fn from(model: crawl_job::Model) -> Self {
        Self {
            id: model.id.to_string(),
            subject_id: model.subject_id,
            status: model.status,
            priority: model.priority,
            retry_count: model.retry_count,
            max_retries: model.max_retries,
            visible_at: model.visible_at.to_rfc3339(),
            next_retry_at: model.next_retry_at.map(|dt| dt.to_rfc3339()),
            last_attempt_at: model.last_attempt_at.map(|dt| dt.to_rfc3339()),
            duration_ms: model.duration_ms,
            enqueued_by: model.enqueued_by,
            last_error: model.last_error,
            created_at: model.created_at.to_rfc3339(),
            updated_at: model.updated_at.to_rfc3339(),
        }
    }
}

/// Response payload for the jobs listing endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct JobsResponse {
    pub jobs: Vec<JobInfo>,
    /// Jobs matching the filter across all pages
    pub total: u64,
    pub limit: u64,
    pub offset: u64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct EnqueueJobRequest {
    #[schema(example = "rust")]
    pub subject_id: String,
    /// Defaults to 0
    #[schema(example = 50)]
    pub priority: Option<i64>,
    /// Defaults to the configured retry budget
    pub max_retries: Option<i32>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct EnqueueJobResponse {
    /// False when the subject already had a queued or running job
    pub enqueued: bool,
    pub job: Option<JobInfo>,
}

/// Partial override of a job
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UpdateJobRequest {
    /// `queued` or `failed`
    #[schema(example = "queued")]
    pub status: Option<String>,
    /// Absolute priority in [0, 100]
    pub priority: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct BoostJobRequest {
    /// Added to the current priority; the result is clamped to [0, 100]
    #[schema(example = 10)]
    pub delta: i64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct BatchJobIdsRequest {
    pub ids: Vec<Uuid>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct BulkStatusRequest {
    pub ids: Vec<Uuid>,
    /// `queued` or `failed`
    #[schema(example = "failed")]
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct BulkUpdateResponse {
    /// Jobs actually changed; unknown ids are skipped
    pub affected: u64,
}

/// Job counts by status
#[utoipa::path(
    get,
    path = "/jobs/stats",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Counts by status", body = JobStats),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError)
    ),
    tag = "jobs"
)]
pub async fn job_stats(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
) -> Result<Json<JobStats>, ApiError> {
    Ok(Json(state.jobs.stats().await?))
}

/// List jobs in claim order
#[utoipa::path(
    get,
    path = "/jobs",
    security(("bearer_auth" = [])),
    params(
        ("status" = Option<JobStatus>, Query, description = "Filter by job status"),
        ("limit" = Option<u64>, Query, description = "Maximum number of jobs to return (default 50, max 100)"),
        ("offset" = Option<u64>, Query, description = "Number of jobs to skip")
    ),
    responses(
        (status = 200, description = "Page of jobs", body = JobsResponse),
        (status = 400, description = "Invalid query parameters", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError)
    ),
    tag = "jobs"
)]
pub async fn list_jobs(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    query: Result<Query<ListJobsQuery>, QueryRejection>,
) -> Result<Json<JobsResponse>, ApiError> {
    let Query(params) = query?;

    let limit = match params.limit {
        Some(0) => {
            return Err(validation_error(
                "Invalid limit",
                serde_json::json!({ "limit": "Minimum allowed limit is 1" }),
            ));
        }
        Some(limit) if limit > MAX_PAGE_SIZE => {
            return Err(validation_error(
                "Invalid limit",
                serde_json::json!({ "limit": format!("Maximum allowed limit is {}", MAX_PAGE_SIZE) }),
            ));
        }
        Some(limit) => limit,
        None => DEFAULT_PAGE_SIZE,
    };
    let offset = params.offset.unwrap_or(0);
    let status = params.status.as_deref().map(parse_status).transpose()?;

    let page = state
        .jobs
        .list(ListJobsFilter {
            status,
            limit,
            offset,
        })
        .await?;

    Ok(Json(JobsResponse {
        jobs: page.jobs.into_iter().map(JobInfo::from).collect(),
        total: page.total,
        limit,
        offset,
    }))
}

/// Enqueue a crawl for a subject
#[utoipa::path(
    post,
    path = "/jobs",
    security(("bearer_auth" = [])),
    request_body = EnqueueJobRequest,
    responses(
        (status = 201, description = "Job enqueued", body = EnqueueJobResponse),
        (status = 200, description = "Subject already pending; nothing enqueued", body = EnqueueJobResponse),
        (status = 400, description = "Validation failed", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError)
    ),
    tag = "jobs"
)]
pub async fn enqueue_job(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    payload: Result<Json<EnqueueJobRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<EnqueueJobResponse>), ApiError> {
    let Json(request) = payload?;

    let mut enqueue = EnqueueRequest::new(request.subject_id, ADMIN_ENQUEUED_BY)
        .with_priority(request.priority.unwrap_or(0));
    if let Some(max_retries) = request.max_retries {
        if max_retries < 0 {
            return Err(validation_error(
                "Invalid max_retries",
                serde_json::json!({ "max_retries": "Must not be negative" }),
            ));
        }
        enqueue = enqueue.with_max_retries(max_retries);
    }

    match state.jobs.enqueue(enqueue).await? {
        EnqueueOutcome::Enqueued(job) => Ok((
            StatusCode::CREATED,
            Json(EnqueueJobResponse {
                enqueued: true,
                job: Some(job.into()),
            }),
        )),
        EnqueueOutcome::Duplicate => Ok((
            StatusCode::OK,
            Json(EnqueueJobResponse {
                enqueued: false,
                job: None,
            }),
        )),
    }
}

#[utoipa::path(
    get,
    path = "/jobs/{id}",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "Crawl job id")),
    responses(
        (status = 200, description = "The job", body = JobInfo),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "Unknown job", body = ApiError)
    ),
    tag = "jobs"
)]
pub async fn get_job(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(id): Path<Uuid>,
) -> Result<Json<JobInfo>, ApiError> {
    Ok(Json(state.jobs.get(id).await?.into()))
}

/// Override a job's priority and/or status
#[utoipa::path(
    patch,
    path = "/jobs/{id}",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "Crawl job id")),
    request_body = UpdateJobRequest,
    responses(
        (status = 200, description = "Updated job", body = JobInfo),
        (status = 400, description = "Validation failed", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "Unknown job", body = ApiError),
        (status = 409, description = "Subject already has a pending job", body = ApiError)
    ),
    tag = "jobs"
)]
pub async fn update_job(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(id): Path<Uuid>,
    payload: Result<Json<UpdateJobRequest>, JsonRejection>,
) -> Result<Json<JobInfo>, ApiError> {
    let Json(request) = payload?;

    if request.status.is_none() && request.priority.is_none() {
        return Err(validation_error(
            "Nothing to update",
            serde_json::json!({ "body": "Provide status and/or priority" }),
        ));
    }
    let status = request.status.as_deref().map(parse_status).transpose()?;
    if let Some(priority) = request.priority {
        validate_priority(priority)?;
    }

    // Status first: a rejected transition leaves the priority untouched.
    let mut job = None;
    if let Some(status) = status {
        job = Some(state.jobs.update_status(id, status).await?);
    }
    if let Some(priority) = request.priority {
        job = Some(state.jobs.update_priority(id, priority).await?);
    }

    match job {
        Some(job) => Ok(Json(job.into())),
        None => Ok(Json(state.jobs.get(id).await?.into())),
    }
}

/// Shift priority by a delta
#[utoipa::path(
    post,
    path = "/jobs/{id}/boost",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "Crawl job id")),
    request_body = BoostJobRequest,
    responses(
        (status = 200, description = "Updated job", body = JobInfo),
        (status = 400, description = "Validation failed", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "Unknown job", body = ApiError)
    ),
    tag = "jobs"
)]
pub async fn boost_job(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(id): Path<Uuid>,
    payload: Result<Json<BoostJobRequest>, JsonRejection>,
) -> Result<Json<JobInfo>, ApiError> {
    let Json(request) = payload?;
    Ok(Json(state.jobs.boost_priority(id, request.delta).await?.into()))
}

/// Requeue a job with a fresh retry budget
#[utoipa::path(
    post,
    path = "/jobs/{id}/retry",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "Crawl job id")),
    responses(
        (status = 200, description = "Requeued job", body = JobInfo),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "Unknown job", body = ApiError),
        (status = 409, description = "Subject already has a pending job", body = ApiError)
    ),
    tag = "jobs"
)]
pub async fn retry_job(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(id): Path<Uuid>,
) -> Result<Json<JobInfo>, ApiError> {
    Ok(Json(state.jobs.force_retry(id).await?.into()))
}

/// Force-retry a batch of jobs
#[utoipa::path(
    post,
    path = "/jobs/retry",
    security(("bearer_auth" = [])),
    request_body = BatchJobIdsRequest,
    responses(
        (status = 200, description = "Number of jobs requeued", body = BulkUpdateResponse),
        (status = 400, description = "Validation failed", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError)
    ),
    tag = "jobs"
)]
pub async fn bulk_retry_jobs(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    payload: Result<Json<BatchJobIdsRequest>, JsonRejection>,
) -> Result<Json<BulkUpdateResponse>, ApiError> {
    let Json(request) = payload?;
    validate_batch(&request.ids)?;

    let affected = state.jobs.bulk_force_retry(&request.ids).await?;
    Ok(Json(BulkUpdateResponse { affected }))
}

/// Set the status of a batch of jobs
#[utoipa::path(
    post,
    path = "/jobs/status",
    security(("bearer_auth" = [])),
    request_body = BulkStatusRequest,
    responses(
        (status = 200, description = "Number of jobs changed", body = BulkUpdateResponse),
        (status = 400, description = "Validation failed", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError)
    ),
    tag = "jobs"
)]
pub async fn bulk_update_status(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    payload: Result<Json<BulkStatusRequest>, JsonRejection>,
) -> Result<Json<BulkUpdateResponse>, ApiError> {
    let Json(request) = payload?;
    validate_batch(&request.ids)?;
    let status = parse_status(&request.status)?;

    let affected = state.jobs.bulk_update_status(&request.ids, status).await?;
    Ok(Json(BulkUpdateResponse { affected }))
}

fn parse_status(value: &str) -> Result<JobStatus, ApiError> {
    value.parse::<JobStatus>().map_err(|_| {
        validation_error(
            "Invalid status",
            serde_json::json!({ "status": "Must be one of: queued, running, success, failed" }),
        )
    })
}

fn validate_batch(ids: &[Uuid]) -> Result<(), ApiError> {
    if ids.is_empty() {
        return Err(validation_error(
            "Invalid ids",
            serde_json::json!({ "ids": "At least one id is required" }),
        ));
    }
    if ids.len() > MAX_BATCH_IDS {
        return Err(validation_error(
            "Invalid ids",
            serde_json::json!({ "ids": format!("At most {} ids per request", MAX_BATCH_IDS) }),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn job_info_renders_timestamps_as_rfc3339() {
        let now = Utc::now().fixed_offset();
        let model = crawl_job::Model {
            id: Uuid::nil(),
            subject_id: "rust".to_string(),
            status: "queued".to_string(),
            priority: 40,
            retry_count: 1,
            max_retries: 3,
            visible_at: now,
            next_retry_at: Some(now),
            last_attempt_at: None,
            attempt_id: None,
            duration_ms: Some(12),
            enqueued_by: "admin".to_string(),
            last_error: Some("boom".to_string()),
            aged_at: None,
            created_at: now,
            updated_at: now,
        };

        let info = JobInfo::from(model);
        assert_eq!(info.visible_at, now.to_rfc3339());
        assert_eq!(info.next_retry_at, Some(now.to_rfc3339()));
        assert_eq!(info.last_attempt_at, None);
        assert_eq!(info.priority, 40);
    }

    #[test]
    fn unknown_status_is_a_validation_error() {
        assert_eq!(parse_status("failed").unwrap(), JobStatus::Failed);
        let err = parse_status("succeeded").unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.code.as_ref(), "VALIDATION_FAILED");
    }

    #[test]
    fn batches_must_be_bounded() {
        assert!(validate_batch(&[]).is_err());
        assert!(validate_batch(&[Uuid::new_v4()]).is_ok());
        assert!(validate_batch(&vec![Uuid::nil(); MAX_BATCH_IDS + 1]).is_err());
    }
}
