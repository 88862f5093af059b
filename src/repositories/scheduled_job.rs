//! # ScheduledJob Repository
//!
//! Recurrence rules are validated before they are written, and `next_run_at` is
//! always stored alongside them.

use chrono::{DateTime, Utc};
use sea_orm::prelude::{DateTimeWithTimeZone, Expr};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use tracing::info;
use uuid::Uuid;

use crate::cron::Recurrence;
use crate::error::{JobStoreError, is_unique_violation};
use crate::models::scheduled_job::{ActiveModel, Column, Entity, Model};

use super::validate_priority;

#[derive(Debug, Clone)]
pub struct NewScheduledJob {
    pub name: String,
    pub description: Option<String>,
    pub subject_id: String,
    pub cron_expression: String,
    pub enabled: bool,
    pub priority: i64,
    pub created_by: String,
}

/// Partial update; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct ScheduledJobPatch {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub subject_id: Option<String>,
    pub cron_expression: Option<String>,
    pub enabled: Option<bool>,
    pub priority: Option<i64>,
}

/// Repository for the `scheduled_jobs` table
#[derive(Clone)]
pub struct ScheduledJobRepository {
    db: DatabaseConnection,
}

impl ScheduledJobRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn create(&self, new_job: NewScheduledJob) -> Result<Model, JobStoreError> {
        let name = non_empty("name", &new_job.name)?;
        let subject_id = non_empty("subject_id", &new_job.subject_id)?;
        let recurrence = Recurrence::parse(&new_job.cron_expression)?;
        let priority = validate_priority(new_job.priority)?;

        let now = Utc::now();
        let next_run_at = recurrence.next_after(now).fixed_offset();

        let model = ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name),
            description: Set(new_job.description),
            subject_id: Set(subject_id),
            cron_expression: Set(recurrence.to_string()),
            enabled: Set(new_job.enabled),
            priority: Set(priority),
            last_run_at: Set(None),
            next_run_at: Set(next_run_at),
            created_by: Set(new_job.created_by),
            created_at: Set(now.fixed_offset()),
            updated_at: Set(now.fixed_offset()),
        }
        .insert(&self.db)
        .await
        .map_err(name_conflict)?;

        info!(
            scheduled_job_id = %model.id,
            name = %model.name,
            cron_expression = %model.cron_expression,
            next_run_at = %model.next_run_at,
            "Scheduled job created"
        );
        Ok(model)
    }

    pub async fn get(&self, id: Uuid) -> Result<Model, JobStoreError> {
        Entity::find_by_id(id)
            .one(&self.db)
            .await?
            .ok_or_else(|| JobStoreError::scheduled_job_not_found(id))
    }

    pub async fn list(&self) -> Result<Vec<Model>, JobStoreError> {
        Ok(Entity::find()
            .order_by_asc(Column::Name)
            .all(&self.db)
            .await?)
    }

    /// Apply `patch`. A new recurrence recomputes `next_run_at` from the last
    /// run (or the creation time when the job never ran).
    pub async fn update(&self, id: Uuid, patch: ScheduledJobPatch) -> Result<Model, JobStoreError> {
        let existing = self.get(id).await?;
        self.update_from(&existing, patch).await
    }

    /// Apply `patch` to the row `snapshot` was read from. Only patched columns
    /// are written. A recurrence change is computed from the snapshot, so it is
    /// written only while the stored `next_run_at` still matches; a fire in
    /// between yields [`JobStoreError::Conflict`].
    pub async fn update_from(
        &self,
        snapshot: &Model,
        patch: ScheduledJobPatch,
    ) -> Result<Model, JobStoreError> {
        let id = snapshot.id;
        let mut update = Entity::update_many()
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now().fixed_offset()))
            .filter(Column::Id.eq(id));

        if let Some(name) = &patch.name {
            update = update.col_expr(Column::Name, Expr::value(non_empty("name", name)?));
        }
        if let Some(description) = patch.description {
            update = update.col_expr(Column::Description, Expr::value(description));
        }
        if let Some(subject_id) = &patch.subject_id {
            update = update.col_expr(
                Column::SubjectId,
                Expr::value(non_empty("subject_id", subject_id)?),
            );
        }
        if let Some(priority) = patch.priority {
            update = update.col_expr(Column::Priority, Expr::value(validate_priority(priority)?));
        }
        if let Some(enabled) = patch.enabled {
            update = update.col_expr(Column::Enabled, Expr::value(enabled));
        }
        if let Some(expression) = &patch.cron_expression {
            let recurrence = Recurrence::parse(expression)?;
            let reference = snapshot
                .last_run_at
                .unwrap_or(snapshot.created_at)
                .with_timezone(&Utc);
            update = update
                .col_expr(Column::CronExpression, Expr::value(recurrence.to_string()))
                .col_expr(
                    Column::NextRunAt,
                    Expr::value(recurrence.next_after(reference).fixed_offset()),
                )
                .filter(Column::NextRunAt.eq(snapshot.next_run_at));
        }

        let result = update.exec(&self.db).await.map_err(name_conflict)?;
        if result.rows_affected == 0 {
            self.get(id).await?;
            return Err(JobStoreError::Conflict(format!(
                "scheduled job {} fired while its recurrence was being changed",
                id
            )));
        }

        info!(scheduled_job_id = %id, "Scheduled job updated");
        self.get(id).await
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), JobStoreError> {
        let result = Entity::delete_by_id(id).exec(&self.db).await?;
        if result.rows_affected == 0 {
            return Err(JobStoreError::scheduled_job_not_found(id));
        }
        info!(scheduled_job_id = %id, "Scheduled job deleted");
        Ok(())
    }

    pub async fn set_enabled(&self, id: Uuid, enabled: bool) -> Result<Model, JobStoreError> {
        let result = Entity::update_many()
            .col_expr(Column::Enabled, Expr::value(enabled))
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now().fixed_offset()))
            .filter(Column::Id.eq(id))
            .exec(&self.db)
            .await?;

        if result.rows_affected == 0 {
            return Err(JobStoreError::scheduled_job_not_found(id));
        }
        self.get(id).await
    }

    /// Flip `enabled` in place.
    pub async fn toggle(&self, id: Uuid) -> Result<Model, JobStoreError> {
        let result = Entity::update_many()
            .col_expr(Column::Enabled, Expr::col(Column::Enabled).not())
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now().fixed_offset()))
            .filter(Column::Id.eq(id))
            .exec(&self.db)
            .await?;

        if result.rows_affected == 0 {
            return Err(JobStoreError::scheduled_job_not_found(id));
        }
        let model = self.get(id).await?;
        info!(scheduled_job_id = %id, enabled = model.enabled, "Scheduled job toggled");
        Ok(model)
    }

    /// Enabled jobs whose `next_run_at` has passed, oldest first.
    pub async fn due(&self, now: DateTime<Utc>, limit: u64) -> Result<Vec<Model>, JobStoreError> {
        Ok(Entity::find()
            .filter(Column::Enabled.eq(true))
            .filter(Column::NextRunAt.lte(now.fixed_offset()))
            .order_by_asc(Column::NextRunAt)
            .order_by_asc(Column::Id)
            .limit(limit)
            .all(&self.db)
            .await?)
    }

    /// Advance a fire: set `last_run_at = ran_at` and `next_run_at = next_run_at`
    /// only if the stored `next_run_at` still equals `expected_next_run_at`.
    /// Returns whether this caller won.
    pub async fn record_run(
        &self,
        id: Uuid,
        expected_next_run_at: DateTimeWithTimeZone,
        ran_at: DateTime<Utc>,
        next_run_at: DateTime<Utc>,
    ) -> Result<bool, JobStoreError> {
        let ran_at = ran_at.fixed_offset();
        let result = Entity::update_many()
            .col_expr(Column::LastRunAt, Expr::value(Some(ran_at)))
            .col_expr(Column::NextRunAt, Expr::value(next_run_at.fixed_offset()))
            .col_expr(Column::UpdatedAt, Expr::value(ran_at))
            .filter(Column::Id.eq(id))
            .filter(Column::NextRunAt.eq(expected_next_run_at))
            .exec(&self.db)
            .await?;

        Ok(result.rows_affected == 1)
    }
}

fn non_empty(field: &str, value: &str) -> Result<String, JobStoreError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(JobStoreError::Validation(format!(
            "{} must not be empty",
            field
        )));
    }
    Ok(trimmed.to_string())
}

fn name_conflict(err: sea_orm::DbErr) -> JobStoreError {
    if is_unique_violation(&err) {
        JobStoreError::Conflict("a scheduled job with this name already exists".to_string())
    } else {
        err.into()
    }
}
