//! Migration to create the scheduled_jobs table.
//!
//! Recurrence rules that generate crawl jobs. `next_run_at` is always populated,
//! including for disabled rules.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ScheduledJobs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ScheduledJobs::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ScheduledJobs::Name).text().not_null())
                    .col(ColumnDef::new(ScheduledJobs::Description).text().null())
                    .col(ColumnDef::new(ScheduledJobs::SubjectId).text().not_null())
                    .col(
                        ColumnDef::new(ScheduledJobs::CronExpression)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ScheduledJobs::Enabled)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(ScheduledJobs::Priority)
                            .small_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(ScheduledJobs::LastRunAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ScheduledJobs::NextRunAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ScheduledJobs::CreatedBy)
                            .text()
                            .not_null()
                            .default("admin"),
                    )
                    .col(
                        ColumnDef::new(ScheduledJobs::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(ScheduledJobs::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_scheduled_jobs_name")
                    .table(ScheduledJobs::Table)
                    .col(ScheduledJobs::Name)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_scheduled_jobs_enabled_next_run")
                    .table(ScheduledJobs::Table)
                    .col(ScheduledJobs::Enabled)
                    .col(ScheduledJobs::NextRunAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_scheduled_jobs_name").to_owned())
            .await?;

        manager
            .drop_index(
                Index::drop()
                    .name("idx_scheduled_jobs_enabled_next_run")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(ScheduledJobs::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ScheduledJobs {
    Table,
    Id,
    Name,
    Description,
    SubjectId,
    CronExpression,
    Enabled,
    Priority,
    LastRunAt,
    NextRunAt,
    CreatedBy,
    CreatedAt,
    UpdatedAt,
}
