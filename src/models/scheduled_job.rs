//! ScheduledJob entity model
//!
//! Recurrence rules that periodically enqueue crawl jobs for a subject.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "scheduled_jobs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Unique human readable name
    #[sea_orm(unique)]
    pub name: String,

    pub description: Option<String>,

    /// Subject the generated crawl jobs target
    pub subject_id: String,

    /// Recurrence expression, validated before it is persisted
    pub cron_expression: String,

    pub enabled: bool,

    /// Priority applied to generated crawl jobs
    pub priority: i16,

    pub last_run_at: Option<DateTimeWithTimeZone>,

    /// Next fire time; populated even while disabled
    pub next_run_at: DateTimeWithTimeZone,

    pub created_by: String,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
