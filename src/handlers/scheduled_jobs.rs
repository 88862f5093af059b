//! # Scheduled Jobs API Handlers
//!
//! CRUD and enable/disable toggle for recurring crawl rules.

use axum::{
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::OperatorAuth;
use crate::error::ApiError;
use crate::models::scheduled_job;
use crate::repositories::{NewScheduledJob, ScheduledJobPatch};
use crate::server::AppState;

/// Recorded as `created_by` for rules created through the admin API.
const ADMIN_CREATED_BY: &str = "admin";

/// Scheduled job as returned by the API
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ScheduledJobInfo {
    #[schema(example = "550e8400-e29b-41d4-a716-446655440000")]
    pub id: String,
    #[schema(example = "rust-hourly")]
    pub name: String,
    pub description: Option<String>,
    #[schema(example = "rust")]
    pub subject_id: String,
    /// Canonical recurrence expression
    #[schema(example = "@hourly")]
    pub cron_expression: String,
    pub enabled: bool,
    #[schema(example = 50)]
    pub priority: i16,
    pub last_run_at: Option<String>,
    #[schema(example = "2024-01-15T11:00:00Z")]
    pub next_run_at: String,
    pub created_by: String,
    pub created_at: String,
    pub updated_at: String,
}

impl From<scheduled_job::Model> for ScheduledJobInfo {
    fn from(model: scheduled_job::Model) -> Self {
        Self {
            id: model.id.to_string(),
            name: model.name,
            description: model.description,
            subject_id: model.subject_id,
            cron_expression: model.cron_expression,
            enabled: model.enabled,
            priority: model.priority,
            last_run_at: model.last_run_at.map(|dt| dt.to_rfc3339()),
            next_run_at: model.next_run_at.to_rfc3339(),
            created_by: model.created_by,
            created_at: model.created_at.to_rfc3339(),
            updated_at: model.updated_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ScheduledJobsResponse {
    pub scheduled_jobs: Vec<ScheduledJobInfo>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateScheduledJobRequest {
    #[schema(example = "rust-hourly")]
    pub name: String,
    pub description: Option<String>,
    #[schema(example = "rust")]
    pub subject_id: String,
    /// `@yearly`, `@monthly`, `@weekly`, `@daily`, `@hourly` or `@every <duration>`
    #[schema(example = "@every 30m")]
    pub cron_expression: String,
    /// Defaults to true
    pub enabled: Option<bool>,
    /// Defaults to 0
    pub priority: Option<i64>,
}

/// Partial update; omitted fields are left unchanged
#[derive(Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct UpdateScheduledJobRequest {
    pub name: Option<String>,
    /// Explicit `null` clears the description
    #[serde(default, deserialize_with = "deserialize_explicit_null")]
    #[schema(value_type = Option<String>)]
    pub description: Option<Option<String>>,
    pub subject_id: Option<String>,
    pub cron_expression: Option<String>,
    pub enabled: Option<bool>,
    pub priority: Option<i64>,
}

/// Distinguishes an absent field (`None`) from an explicit `null` (`Some(None)`).
fn deserialize_explicit_null<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

#[utoipa::path(
    get,
    path = "/scheduled-jobs",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "All scheduled jobs by name", body = ScheduledJobsResponse),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError)
    ),
    tag = "scheduled-jobs"
)]
pub async fn list_scheduled_jobs(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
) -> Result<Json<ScheduledJobsResponse>, ApiError> {
    let scheduled_jobs = state.schedules.list().await?;
    Ok(Json(ScheduledJobsResponse {
        scheduled_jobs: scheduled_jobs.into_iter().map(Into::into).collect(),
    }))
}

/// Create a recurring crawl rule
#[utoipa::path(
    post,
    path = "/scheduled-jobs",
    security(("bearer_auth" = [])),
    request_body = CreateScheduledJobRequest,
    responses(
        (status = 201, description = "Scheduled job created", body = ScheduledJobInfo),
        (status = 400, description = "Invalid recurrence, priority or fields", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 409, description = "Name already in use", body = ApiError)
    ),
    tag = "scheduled-jobs"
)]
pub async fn create_scheduled_job(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    payload: Result<Json<CreateScheduledJobRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ScheduledJobInfo>), ApiError> {
    let Json(request) = payload?;

    let created = state
        .schedules
        .create(NewScheduledJob {
            name: request.name,
            description: request.description,
            subject_id: request.subject_id,
            cron_expression: request.cron_expression,
            enabled: request.enabled.unwrap_or(true),
            priority: request.priority.unwrap_or(0),
            created_by: ADMIN_CREATED_BY.to_string(),
        })
        .await?;

    Ok((StatusCode::CREATED, Json(created.into())))
}

#[utoipa::path(
    get,
    path = "/scheduled-jobs/{id}",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "Scheduled job id")),
    responses(
        (status = 200, description = "The scheduled job", body = ScheduledJobInfo),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "Unknown scheduled job", body = ApiError)
    ),
    tag = "scheduled-jobs"
)]
pub async fn get_scheduled_job(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(id): Path<Uuid>,
) -> Result<Json<ScheduledJobInfo>, ApiError> {
    Ok(Json(state.schedules.get(id).await?.into()))
}

#[utoipa::path(
    put,
    path = "/scheduled-jobs/{id}",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "Scheduled job id")),
    request_body = UpdateScheduledJobRequest,
    responses(
        (status = 200, description = "Updated scheduled job", body = ScheduledJobInfo),
        (status = 400, description = "Invalid recurrence, priority or fields", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "Unknown scheduled job", body = ApiError),
        (status = 409, description = "Name already in use, or the job fired during a recurrence change", body = ApiError)
    ),
    tag = "scheduled-jobs"
)]
pub async fn update_scheduled_job(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(id): Path<Uuid>,
    payload: Result<Json<UpdateScheduledJobRequest>, JsonRejection>,
) -> Result<Json<ScheduledJobInfo>, ApiError> {
    let Json(request) = payload?;

    let updated = state
        .schedules
        .update(
            id,
            ScheduledJobPatch {
                name: request.name,
                description: request.description,
                subject_id: request.subject_id,
                cron_expression: request.cron_expression,
                enabled: request.enabled,
                priority: request.priority,
            },
        )
        .await?;

    Ok(Json(updated.into()))
}

#[utoipa::path(
    delete,
    path = "/scheduled-jobs/{id}",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "Scheduled job id")),
    responses(
        (status = 204, description = "Scheduled job deleted"),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "Unknown scheduled job", body = ApiError)
    ),
    tag = "scheduled-jobs"
)]
pub async fn delete_scheduled_job(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.schedules.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Flip `enabled`
#[utoipa::path(
    post,
    path = "/scheduled-jobs/{id}/toggle",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "Scheduled job id")),
    responses(
        (status = 200, description = "Scheduled job with its new enabled flag", body = ScheduledJobInfo),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "Unknown scheduled job", body = ApiError)
    ),
    tag = "scheduled-jobs"
)]
pub async fn toggle_scheduled_job(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(id): Path<Uuid>,
) -> Result<Json<ScheduledJobInfo>, ApiError> {
    Ok(Json(state.schedules.toggle(id).await?.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_and_null_description_differ() {
        let absent: UpdateScheduledJobRequest = serde_json::from_str(r#"{"enabled": false}"#).unwrap();
        assert_eq!(absent.description, None);
        assert_eq!(absent.enabled, Some(false));

        let cleared: UpdateScheduledJobRequest =
            serde_json::from_str(r#"{"description": null}"#).unwrap();
        assert_eq!(cleared.description, Some(None));

        let set: UpdateScheduledJobRequest =
            serde_json::from_str(r#"{"description": "nightly"}"#).unwrap();
        assert_eq!(set.description, Some(Some("nightly".to_string())));
    }
}
