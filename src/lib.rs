//! # Crawler Scheduler Library
//!
//! A persistent, prioritized crawl job queue: the job store with its atomic
//! claim, retry policy, periodic maintenance services, recurrence-driven
//! scheduling, the worker pool with its rate-limited HTTP crawl handler, and the
//! operator admin API.

pub mod aging;
pub mod auth;
pub mod config;
pub mod cron;
pub mod db;
pub mod error;
pub mod fetch;
pub mod handlers;
pub mod models;
pub mod rate_limiter;
pub mod reclaimer;
pub mod repositories;
pub mod retry;
pub mod scheduler;
pub mod server;
pub mod telemetry;
pub mod worker;
pub use migration;
