//! # Server Configuration
//!
//! Router, shared state and OpenAPI document for the admin API.

use std::sync::Arc;

use anyhow::Context;
use axum::{
    Router, middleware,
    routing::{get, post},
};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;
use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};
use utoipa_swagger_ui::SwaggerUi;

use crate::auth::auth_middleware;
use crate::config::AppConfig;
use crate::handlers;
use crate::repositories::{CrawlJobRepository, ScheduledJobRepository};
use crate::retry::RetryPolicy;
use crate::telemetry::trace_context_middleware;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: DatabaseConnection,
    pub jobs: CrawlJobRepository,
    pub schedules: ScheduledJobRepository,
}

impl AppState {
    /// Build the repositories with the configured retry policy.
    pub fn new(config: Arc<AppConfig>, db: DatabaseConnection) -> Self {
        let jobs = CrawlJobRepository::new(db.clone())
            .with_retry_policy(RetryPolicy::from(&config.retry_policy))
            .with_default_max_retries(config.retry_policy.default_max_retries);
        let schedules = ScheduledJobRepository::new(db.clone());

        Self {
            config,
            db,
            jobs,
            schedules,
        }
    }
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    let protected = Router::new()
        .route("/jobs", get(handlers::jobs::list_jobs).post(handlers::jobs::enqueue_job))
        .route("/jobs/stats", get(handlers::jobs::job_stats))
        .route("/jobs/retry", post(handlers::jobs::bulk_retry_jobs))
        .route("/jobs/status", post(handlers::jobs::bulk_update_status))
        .route(
            "/jobs/{id}",
            get(handlers::jobs::get_job).patch(handlers::jobs::update_job),
        )
        .route("/jobs/{id}/boost", post(handlers::jobs::boost_job))
        .route("/jobs/{id}/retry", post(handlers::jobs::retry_job))
        .route(
            "/scheduled-jobs",
            get(handlers::scheduled_jobs::list_scheduled_jobs)
                .post(handlers::scheduled_jobs::create_scheduled_job),
        )
        .route(
            "/scheduled-jobs/{id}",
            get(handlers::scheduled_jobs::get_scheduled_job)
                .put(handlers::scheduled_jobs::update_scheduled_job)
                .delete(handlers::scheduled_jobs::delete_scheduled_job),
        )
        .route(
            "/scheduled-jobs/{id}/toggle",
            post(handlers::scheduled_jobs::toggle_scheduled_job),
        )
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state.config),
            auth_middleware,
        ));

    Router::new()
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz))
        .merge(protected)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
        .layer(middleware::from_fn(trace_context_middleware))
        .layer(TraceLayer::new_for_http())
}

/// Serve the admin API until `shutdown` fires.
pub async fn run_server(state: AppState, shutdown: CancellationToken) -> anyhow::Result<()> {
    let addr = state
        .config
        .bind_addr()
        .with_context(|| format!("invalid bind address '{}'", state.config.api_bind_addr))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!(%addr, profile = %state.config.profile, "Admin API listening");

    let app = create_app(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("admin API server failed")?;

    info!("Admin API stopped");
    Ok(())
}

struct BearerAuthAddon;

impl Modify for BearerAuthAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
        );
    }
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::healthz,
        crate::handlers::jobs::job_stats,
        crate::handlers::jobs::list_jobs,
        crate::handlers::jobs::enqueue_job,
        crate::handlers::jobs::get_job,
        crate::handlers::jobs::update_job,
        crate::handlers::jobs::boost_job,
        crate::handlers::jobs::retry_job,
        crate::handlers::jobs::bulk_retry_jobs,
        crate::handlers::jobs::bulk_update_status,
        crate::handlers::scheduled_jobs::list_scheduled_jobs,
        crate::handlers::scheduled_jobs::create_scheduled_job,
        crate::handlers::scheduled_jobs::get_scheduled_job,
        crate::handlers::scheduled_jobs::update_scheduled_job,
        crate::handlers::scheduled_jobs::delete_scheduled_job,
        crate::handlers::scheduled_jobs::toggle_scheduled_job,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::handlers::HealthResponse,
            crate::error::ApiError,
            crate::repositories::JobStats,
            crate::handlers::jobs::JobInfo,
            crate::handlers::jobs::JobsResponse,
            crate::handlers::jobs::EnqueueJobRequest,
            crate::handlers::jobs::EnqueueJobResponse,
            crate::handlers::jobs::UpdateJobRequest,
            crate::handlers::jobs::BoostJobRequest,
            crate::handlers::jobs::BatchJobIdsRequest,
            crate::handlers::jobs::BulkStatusRequest,
            crate::handlers::jobs::BulkUpdateResponse,
            crate::handlers::scheduled_jobs::ScheduledJobInfo,
            crate::handlers::scheduled_jobs::ScheduledJobsResponse,
            crate::handlers::scheduled_jobs::CreateScheduledJobRequest,
            crate::handlers::scheduled_jobs::UpdateScheduledJobRequest,
        )
    ),
    modifiers(&BearerAuthAddon),
    tags(
        (name = "root", description = "Service information and health"),
        (name = "jobs", description = "Crawl job queue administration"),
        (name = "scheduled-jobs", description = "Recurring crawl rules"),
    ),
    info(
        title = "Crawler Scheduler Admin API",
        description = "Operator API for the prioritized crawl job queue",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
