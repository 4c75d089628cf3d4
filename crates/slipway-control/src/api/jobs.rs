//! Job management endpoints.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ControlError;
use crate::store::JobFilter;
use crate::types::{BuildPack, DeploySpec, JobId, JobRecord, JobStatus, MachineSpec};

use super::AppState;

/// Request to submit a new deployment job.
///
/// Machine and deployment fields left out fall back to the configured
/// defaults.
#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    /// Base name for the machine.
    pub name: String,
    /// Git repository URL to deploy.
    pub git_repository: String,
    /// Provider region slug.
    pub region: Option<String>,
    /// Provider size slug.
    pub size: Option<String>,
    /// Base image slug.
    pub image: Option<String>,
    /// Platform project to deploy into.
    pub project_id: Option<String>,
    /// Platform environment name.
    pub environment_name: Option<String>,
    /// Git branch to deploy.
    pub git_branch: Option<String>,
    /// Build pack to use.
    pub build_pack: Option<BuildPack>,
    /// Port(s) the application exposes.
    pub ports_exposed: Option<String>,
}

/// Query parameters for listing jobs.
#[derive(Debug, Default, Deserialize)]
pub struct ListJobsQuery {
    /// Filter by status.
    pub status: Option<String>,
    /// Maximum number of results.
    pub limit: Option<u32>,
    /// Offset for pagination.
    pub offset: Option<u32>,
}

/// Response for a job.
#[derive(Debug, Serialize)]
pub struct JobResponse {
    /// Job ID.
    pub id: String,
    /// Current status.
    pub status: String,
    /// Progress annotation or failure reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_detail: Option<String>,
    /// Provisioned machine ID.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub machine_id: Option<i64>,
    /// Platform target ID.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
    /// Machine parameters.
    pub machine_spec: MachineSpec,
    /// Deployment parameters.
    pub deploy_spec: DeploySpec,
    /// Creation timestamp.
    pub created_at: String,
    /// Last update timestamp.
    pub updated_at: String,
}

/// Response for submitting a job.
#[derive(Debug, Serialize)]
pub struct CreateJobResponse {
    /// The assigned job ID.
    pub id: String,
    /// Initial status.
    pub status: String,
}

/// Response for the capacity endpoint.
#[derive(Debug, Serialize)]
pub struct CapacityResponse {
    /// Jobs currently holding a machine.
    pub active: u64,
    /// Configured machine limit.
    pub limit: u32,
    /// Machines still available.
    pub remaining: u64,
}

/// Error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error message.
    pub error: String,
}

/// Submit a new deployment job.
pub async fn create_job(
    State(state): State<AppState>,
    Json(request): Json<CreateJobRequest>,
) -> Result<(StatusCode, Json<CreateJobResponse>), (StatusCode, Json<ErrorResponse>)> {
    let machine_spec = MachineSpec {
        name: request.name.clone(),
        region: request
            .region
            .unwrap_or_else(|| state.provider_defaults.default_region.clone()),
        size: request
            .size
            .unwrap_or_else(|| state.provider_defaults.default_size.clone()),
        image: request
            .image
            .unwrap_or_else(|| state.provider_defaults.default_image.clone()),
    };
    let deploy_spec = DeploySpec {
        project_id: request.project_id,
        environment_name: request
            .environment_name
            .unwrap_or_else(|| state.platform_defaults.default_environment.clone()),
        git_repository: request.git_repository,
        git_branch: request
            .git_branch
            .unwrap_or_else(|| state.platform_defaults.default_git_branch.clone()),
        build_pack: request.build_pack.unwrap_or_default(),
        ports_exposed: request
            .ports_exposed
            .unwrap_or_else(|| state.platform_defaults.default_ports_exposed.clone()),
    };

    info!(name = %request.name, "submitting job via API");

    match state.queue.submit(machine_spec, deploy_spec).await {
        Ok(record) => {
            info!(job_id = %record.data.id, "job submitted");
            Ok((
                StatusCode::ACCEPTED,
                Json(CreateJobResponse {
                    id: record.data.id.to_string(),
                    status: record.status.as_str().to_owned(),
                }),
            ))
        }
        Err(e) => {
            let status = error_to_status(&e);
            Err((
                status,
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            ))
        }
    }
}

/// Get a job by ID.
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobResponse>, (StatusCode, Json<ErrorResponse>)> {
    let job_id = JobId::new(&id);

    match state.store.get(&job_id).await {
        Ok(Some(record)) => Ok(Json(record_to_response(record))),
        Ok(None) => Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("job not found: {id}"),
            }),
        )),
        Err(e) => {
            let status = error_to_status(&e);
            Err((
                status,
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            ))
        }
    }
}

/// List jobs with optional filters.
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListJobsQuery>,
) -> Result<Json<Vec<JobResponse>>, (StatusCode, Json<ErrorResponse>)> {
    let mut filter = JobFilter::new();

    if let Some(status_str) = query.status {
        match status_str.parse::<JobStatus>() {
            Ok(status) => filter = filter.with_status(status),
            Err(_) => {
                return Err((
                    StatusCode::BAD_REQUEST,
                    Json(ErrorResponse {
                        error: format!("unknown status: {status_str}"),
                    }),
                ))
            }
        }
    }
    if let Some(limit) = query.limit {
        filter = filter.with_limit(limit);
    }
    if let Some(offset) = query.offset {
        filter = filter.with_offset(offset);
    }

    match state.store.list(&filter).await {
        Ok(records) => Ok(Json(records.into_iter().map(record_to_response).collect())),
        Err(e) => {
            let status = error_to_status(&e);
            Err((
                status,
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            ))
        }
    }
}

/// Report current machine usage against the limit.
pub async fn get_capacity(
    State(state): State<AppState>,
) -> Result<Json<CapacityResponse>, (StatusCode, Json<ErrorResponse>)> {
    match state.admission.count_active().await {
        Ok(active) => {
            let limit = state.admission.limit();
            Ok(Json(CapacityResponse {
                active,
                limit,
                remaining: u64::from(limit).saturating_sub(active),
            }))
        }
        Err(e) => {
            let status = error_to_status(&e);
            Err((
                status,
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            ))
        }
    }
}

fn record_to_response(record: JobRecord) -> JobResponse {
    JobResponse {
        id: record.data.id.to_string(),
        status: record.status.as_str().to_owned(),
        status_detail: record.data.status_detail,
        machine_id: record.data.machine_id.map(crate::types::MachineId::as_i64),
        target_id: record.data.target_id.map(|t| t.to_string()),
        machine_spec: record.data.machine_spec,
        deploy_spec: record.data.deploy_spec,
        created_at: record.data.created_at.to_rfc3339(),
        updated_at: record.data.updated_at.to_rfc3339(),
    }
}

const fn error_to_status(error: &ControlError) -> StatusCode {
    match error {
        ControlError::CapacityExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
        ControlError::JobNotFound(_) => StatusCode::NOT_FOUND,
        ControlError::InvalidStateTransition { .. } => StatusCode::CONFLICT,
        ControlError::Config(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_app_state;
    use crate::types::{JobData, MachineId};
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn submit_body() -> Body {
        Body::from(
            serde_json::json!({
                "name": "app",
                "git_repository": "https://example.com/app.git"
            })
            .to_string(),
        )
    }

    #[tokio::test]
    async fn create_job_accepted() {
        let app = crate::api::router(test_app_state());

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/jobs")
                    .header("content-type", "application/json")
                    .body(submit_body())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["status"], "pending");
        assert!(!parsed["id"].as_str().unwrap().is_empty());
    }

    #[tokio::test]
    async fn create_job_rejected_at_capacity() {
        let state = test_app_state();

        for i in 0..3_i64 {
            let mut record = JobRecord::new(JobData::new(
                MachineSpec {
                    name: format!("app-{i}"),
                    region: "nyc1".to_owned(),
                    size: "s-2vcpu-2gb".to_owned(),
                    image: "ubuntu-22-04-x64".to_owned(),
                },
                DeploySpec {
                    project_id: None,
                    environment_name: "production".to_owned(),
                    git_repository: "https://example.com/app.git".to_owned(),
                    git_branch: "main".to_owned(),
                    build_pack: BuildPack::Nixpacks,
                    ports_exposed: "3000".to_owned(),
                },
            ));
            record.data.machine_id = Some(MachineId::new(i));
            record.status = JobStatus::Completed;
            state.store.insert(&record).await.unwrap();
        }

        let app = crate::api::router(state);
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/jobs")
                    .header("content-type", "application/json")
                    .body(submit_body())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(parsed["error"]
            .as_str()
            .unwrap()
            .contains("machine capacity exceeded"));
    }

    #[tokio::test]
    async fn get_job_not_found() {
        let app = crate::api::router(test_app_state());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/jobs/nonexistent-id")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn list_jobs_empty() {
        let app = crate::api::router(test_app_state());

        let response = app
            .oneshot(Request::builder().uri("/jobs").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn list_jobs_rejects_unknown_status() {
        let app = crate::api::router(test_app_state());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/jobs?status=bogus")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn capacity_endpoint_reports_limit() {
        let app = crate::api::router(test_app_state());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/capacity")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["active"], 0);
        assert_eq!(parsed["limit"], 3);
        assert_eq!(parsed["remaining"], 3);
    }
}
