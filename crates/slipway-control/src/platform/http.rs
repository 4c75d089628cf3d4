//! HTTP client for the deployment platform API.

use std::time::Duration;

use reqwest::{Client, StatusCode};

use crate::config::PlatformConfig;
use crate::error::{ControlError, ControlResult};
use crate::types::{DeploySpec, TargetId};

use super::{Deploy, DeployPlatform, DeployStatus, Target};

#[derive(serde::Serialize)]
struct RegisterTargetRequest<'a> {
    address: &'a str,
}

#[derive(serde::Deserialize)]
struct RegisterTargetResponse {
    id: String,
}

#[derive(serde::Serialize)]
struct DeployRequest<'a> {
    project_id: Option<&'a str>,
    environment_name: &'a str,
    git_repository: &'a str,
    git_branch: &'a str,
    build_pack: &'a str,
    ports_exposed: &'a str,
}

#[derive(serde::Deserialize)]
struct DeployResponse {
    id: String,
}

#[derive(serde::Deserialize)]
struct DeployStatusResponse {
    status: String,
}

/// HTTP client for the deployment platform service.
#[derive(Debug, Clone)]
pub struct HttpPlatform {
    client: Client,
    base_url: String,
    token: String,
}

impl HttpPlatform {
    /// Create a new platform client from configuration.
    pub fn new(config: &PlatformConfig) -> ControlResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(ControlError::Http)?;

        Ok(Self {
            client,
            base_url: config.api_url.trim_end_matches('/').to_owned(),
            token: config.api_token.clone(),
        })
    }
}

#[async_trait::async_trait]
impl DeployPlatform for HttpPlatform {
    async fn register_target(&self, address: &str) -> ControlResult<Target> {
        let url = format!("{}/targets", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&RegisterTargetRequest { address })
            .send()
            .await
            .map_err(ControlError::Http)?;

        if !response.status().is_success() {
            return Err(ControlError::platform(format!(
                "failed to register target: {}",
                response.status()
            )));
        }

        let body: RegisterTargetResponse = response.json().await.map_err(ControlError::Http)?;
        Ok(Target {
            id: TargetId::new(body.id),
        })
    }

    async fn deploy(&self, target: &TargetId, spec: &DeploySpec) -> ControlResult<Deploy> {
        let url = format!("{}/targets/{}/deployments", self.base_url, target);
        let body = DeployRequest {
            project_id: spec.project_id.as_deref(),
            environment_name: &spec.environment_name,
            git_repository: &spec.git_repository,
            git_branch: &spec.git_branch,
            build_pack: spec.build_pack.as_str(),
            ports_exposed: &spec.ports_exposed,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(ControlError::Http)?;

        if !response.status().is_success() {
            return Err(ControlError::platform(format!(
                "failed to start deployment on target {target}: {}",
                response.status()
            )));
        }

        let body: DeployResponse = response.json().await.map_err(ControlError::Http)?;
        Ok(Deploy { id: body.id })
    }

    async fn deploy_status(&self, deploy_id: &str) -> ControlResult<DeployStatus> {
        let url = format!("{}/deployments/{}", self.base_url, deploy_id);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(ControlError::Http)?;

        if !response.status().is_success() {
            return Err(ControlError::platform(format!(
                "failed to get deployment {deploy_id}: {}",
                response.status()
            )));
        }

        let body: DeployStatusResponse = response.json().await.map_err(ControlError::Http)?;
        Ok(DeployStatus::parse(&body.status))
    }

    async fn unregister_target(&self, target: &TargetId) -> ControlResult<()> {
        let url = format!("{}/targets/{}", self.base_url, target);
        let response = self
            .client
            .delete(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(ControlError::Http)?;

        match response.status() {
            // A target already gone counts as removed.
            StatusCode::NO_CONTENT | StatusCode::OK | StatusCode::NOT_FOUND => Ok(()),
            status => Err(ControlError::platform(format!(
                "failed to unregister target {target}: {status}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BuildPack;

    #[test]
    fn client_creation() {
        let config = PlatformConfig::default();
        let client = HttpPlatform::new(&config);
        assert!(client.is_ok());
    }

    #[test]
    fn deploy_request_serialisation() {
        let spec = DeploySpec {
            project_id: None,
            environment_name: "production".to_owned(),
            git_repository: "https://example.com/app.git".to_owned(),
            git_branch: "main".to_owned(),
            build_pack: BuildPack::Nixpacks,
            ports_exposed: "3000".to_owned(),
        };
        let request = DeployRequest {
            project_id: spec.project_id.as_deref(),
            environment_name: &spec.environment_name,
            git_repository: &spec.git_repository,
            git_branch: &spec.git_branch,
            build_pack: spec.build_pack.as_str(),
            ports_exposed: &spec.ports_exposed,
        };

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["build_pack"], "nixpacks");
        assert_eq!(value["ports_exposed"], "3000");
    }

    #[test]
    fn status_response_parsing() {
        let body: DeployStatusResponse =
            serde_json::from_str(r#"{"status": "building"}"#).unwrap();
        assert_eq!(DeployStatus::parse(&body.status), DeployStatus::Building);
    }
}
