//! Database migrations for the crawl scheduler.
//!
//! This module contains all database migrations using SeaORM Migration.

pub use sea_orm_migration::prelude::*;

mod m2025_11_10_090000_create_crawl_jobs;
mod m2025_11_10_090100_create_scheduled_jobs;
mod m2025_11_10_090200_add_crawl_job_pending_subject_guard;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2025_11_10_090000_create_crawl_jobs::Migration),
            Box::new(m2025_11_10_090100_create_scheduled_jobs::Migration),
            Box::new(m2025_11_10_090200_add_crawl_job_pending_subject_guard::Migration),
        ]
    }
}
