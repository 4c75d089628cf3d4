//! HTTP API for the control service.
//!
//! Provides endpoints for:
//! - Job management (submit, query, list)
//! - Capacity inspection
//! - Health and readiness checks
//! - Prometheus metrics

mod jobs;

use std::fmt::Write as _;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use crate::admission::AdmissionController;
use crate::config::{PlatformConfig, ProviderConfig};
use crate::queue::JobQueue;
use crate::store::{JobFilter, JobStore};
use crate::types::JobStatus;

pub use jobs::{CreateJobRequest, CreateJobResponse, JobResponse, ListJobsQuery};

/// Shared application state for the control service.
#[derive(Clone)]
pub struct AppState {
    /// Queue for submitting jobs.
    pub queue: JobQueue,
    /// Job store for direct queries.
    pub store: Arc<dyn JobStore>,
    /// Admission controller for capacity queries.
    pub admission: AdmissionController,
    /// Provider defaults applied to submissions.
    pub provider_defaults: ProviderConfig,
    /// Platform defaults applied to submissions.
    pub platform_defaults: PlatformConfig,
}

/// Creates the API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        // Health endpoints
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        // Job management
        .route("/jobs", post(jobs::create_job))
        .route("/jobs", get(jobs::list_jobs))
        .route("/jobs/{id}", get(jobs::get_job))
        // Capacity
        .route("/capacity", get(jobs::get_capacity))
        // Metrics
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> axum::Json<HealthResponse> {
    axum::Json(HealthResponse { status: "healthy" })
}

/// Readiness check endpoint.
async fn readiness_check(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> (axum::http::StatusCode, axum::Json<ReadyResponse>) {
    match state.store.count_where(&JobFilter::active()).await {
        Ok(active) => (
            axum::http::StatusCode::OK,
            axum::Json(ReadyResponse {
                ready: true,
                active_machines: active,
            }),
        ),
        Err(_) => (
            axum::http::StatusCode::SERVICE_UNAVAILABLE,
            axum::Json(ReadyResponse {
                ready: false,
                active_machines: 0,
            }),
        ),
    }
}

/// Metrics endpoint.
async fn metrics(axum::extract::State(state): axum::extract::State<AppState>) -> String {
    let mut output = String::new();

    let statuses = [
        JobStatus::Pending,
        JobStatus::Processing,
        JobStatus::Completed,
        JobStatus::Failed,
    ];

    output.push_str("# HELP control_jobs_total Number of jobs by status\n");
    output.push_str("# TYPE control_jobs_total gauge\n");

    for status in statuses {
        let filter = JobFilter::new().with_status(status);
        let count = state.store.count_where(&filter).await.unwrap_or(0);
        let _ = writeln!(
            output,
            "control_jobs_total{{status=\"{}\"}} {count}",
            status.as_str()
        );
    }

    let active = state.admission.count_active().await.unwrap_or(0);
    output.push_str("# HELP control_active_machines Jobs currently holding a machine\n");
    output.push_str("# TYPE control_active_machines gauge\n");
    let _ = writeln!(output, "control_active_machines {active}");

    output.push_str("# HELP control_machine_limit Configured machine limit\n");
    output.push_str("# TYPE control_machine_limit gauge\n");
    let _ = writeln!(output, "control_machine_limit {}", state.admission.limit());

    output
}

/// Health response.
#[derive(serde::Serialize)]
struct HealthResponse {
    status: &'static str,
}

/// Readiness response.
#[derive(serde::Serialize)]
struct ReadyResponse {
    ready: bool,
    active_machines: u64,
}

#[cfg(test)]
pub(crate) fn test_app_state() -> AppState {
    use crate::config::PipelineConfig;
    use crate::pipeline::DeploymentPipeline;
    use crate::platform::MockPlatform;
    use crate::provider::MockProvider;
    use crate::store::MemoryStore;
    use tokio_util::sync::CancellationToken;

    let store: Arc<dyn JobStore> = Arc::new(MemoryStore::new());
    let admission = AdmissionController::new(Arc::clone(&store), 3);
    let config = PipelineConfig {
        max_active_machines: 3,
        readiness_interval_secs: 0,
        readiness_max_attempts: 12,
        stabilize_delay_secs: 0,
        deploy_initial_delay_secs: 0,
        status_interval_secs: 0,
        status_max_attempts: 12,
        max_concurrent_jobs: 10,
    };
    let pipeline = DeploymentPipeline::new(
        Arc::clone(&store),
        Arc::new(MockProvider::default()),
        Arc::new(MockPlatform::default()),
        admission.clone(),
        config,
    );
    let queue = JobQueue::start(
        Arc::clone(&store),
        admission.clone(),
        pipeline,
        10,
        CancellationToken::new(),
    );

    AppState {
        queue,
        store,
        admission,
        provider_defaults: ProviderConfig::default(),
        platform_defaults: PlatformConfig::default(),
    }
}
