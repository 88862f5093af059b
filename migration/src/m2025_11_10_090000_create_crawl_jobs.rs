//! Migration to create the crawl_jobs table.
//!
//! One row per unit of crawl work. Terminal rows are kept for audit; the claim
//! index serves `status = 'queued' AND visible_at <= now` ordered by priority.

use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_orm::Statement;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(CrawlJobs::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(CrawlJobs::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(CrawlJobs::SubjectId).text().not_null())
                    .col(
                        ColumnDef::new(CrawlJobs::Status)
                            .text()
                            .not_null()
                            .default("queued"),
                    )
                    .col(
                        ColumnDef::new(CrawlJobs::Priority)
                            .small_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(CrawlJobs::RetryCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(CrawlJobs::MaxRetries)
                            .integer()
                            .not_null()
                            .default(3),
                    )
                    .col(
                        ColumnDef::new(CrawlJobs::VisibleAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(CrawlJobs::NextRetryAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(CrawlJobs::LastAttemptAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(CrawlJobs::AttemptId).uuid().null())
                    .col(ColumnDef::new(CrawlJobs::DurationMs).big_integer().null())
                    .col(
                        ColumnDef::new(CrawlJobs::EnqueuedBy)
                            .text()
                            .not_null()
                            .default("system"),
                    )
                    .col(ColumnDef::new(CrawlJobs::LastError).text().null())
                    .col(
                        ColumnDef::new(CrawlJobs::AgedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(CrawlJobs::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(CrawlJobs::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Claim path: queued + visible, highest priority first, oldest first
        manager
            .get_connection()
            .execute(Statement::from_string(
                manager.get_database_backend(),
                "CREATE INDEX IF NOT EXISTS idx_crawl_jobs_claim ON crawl_jobs (status, visible_at, priority DESC, created_at)".to_string(),
            ))
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_crawl_jobs_status_last_attempt")
                    .table(CrawlJobs::Table)
                    .col(CrawlJobs::Status)
                    .col(CrawlJobs::LastAttemptAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_crawl_jobs_subject")
                    .table(CrawlJobs::Table)
                    .col(CrawlJobs::SubjectId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_crawl_jobs_claim").to_owned())
            .await?;

        manager
            .drop_index(
                Index::drop()
                    .name("idx_crawl_jobs_status_last_attempt")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_index(Index::drop().name("idx_crawl_jobs_subject").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(CrawlJobs::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum CrawlJobs {
    Table,
    Id,
    SubjectId,
    Status,
    Priority,
    RetryCount,
    MaxRetries,
    VisibleAt,
    NextRetryAt,
    LastAttemptAt,
    AttemptId,
    DurationMs,
    EnqueuedBy,
    LastError,
    AgedAt,
    CreatedAt,
    UpdatedAt,
}
