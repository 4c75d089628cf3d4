//! Deployment platform integration.
//!
//! The platform is the system that takes ownership of a provisioned
//! machine and runs application deployments on it. This module defines
//! the client trait, a REST implementation and a mock for testing.

mod http;

pub use http::HttpPlatform;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{PlatformConfig, PlatformType};
use crate::error::{ControlError, ControlResult};
use crate::types::{DeploySpec, TargetId};

/// A machine registered with the platform as a deployment target.
#[derive(Debug, Clone)]
pub struct Target {
    /// Platform-assigned target ID.
    pub id: TargetId,
}

/// A deployment started on the platform.
#[derive(Debug, Clone)]
pub struct Deploy {
    /// Platform-assigned deployment ID.
    pub id: String,
}

/// Status of a platform deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployStatus {
    /// Accepted but not yet started.
    Queued,
    /// Build in progress.
    Building,
    /// Application is up.
    Running,
    /// Build or start failed.
    Failed,
    /// A status this service does not recognise.
    Other(String),
}

impl DeployStatus {
    /// Parse a status string from the platform API.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "queued" => Self::Queued,
            "building" => Self::Building,
            "running" => Self::Running,
            "failed" => Self::Failed,
            other => Self::Other(other.to_owned()),
        }
    }

    /// Whether the deployment is still working towards a result.
    #[must_use]
    pub fn is_in_progress(&self) -> bool {
        matches!(self, Self::Queued | Self::Building)
    }
}

impl std::fmt::Display for DeployStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Building => write!(f, "building"),
            Self::Running => write!(f, "running"),
            Self::Failed => write!(f, "failed"),
            Self::Other(s) => write!(f, "{s}"),
        }
    }
}

/// Trait for deployment platform implementations.
#[async_trait]
pub trait DeployPlatform: Send + Sync {
    /// Register a machine address as a deployment target.
    async fn register_target(&self, address: &str) -> ControlResult<Target>;

    /// Start a deployment on a target.
    async fn deploy(&self, target: &TargetId, spec: &DeploySpec) -> ControlResult<Deploy>;

    /// Get the current status of a deployment.
    async fn deploy_status(&self, deploy_id: &str) -> ControlResult<DeployStatus>;

    /// Remove a target from the platform.
    ///
    /// Callers treat this as best-effort during cleanup.
    async fn unregister_target(&self, target: &TargetId) -> ControlResult<()>;
}

/// Create a platform client from configuration.
pub fn create_platform(config: &PlatformConfig) -> ControlResult<Arc<dyn DeployPlatform>> {
    match config.platform_type {
        PlatformType::Http => Ok(Arc::new(HttpPlatform::new(config)?)),
        PlatformType::Mock => Ok(Arc::new(MockPlatform::default())),
    }
}

#[derive(Default)]
struct MockPlatformState {
    next_target: u32,
    next_deploy: u32,
    registered: Vec<String>,
    deploys: Vec<(TargetId, DeploySpec)>,
    status_calls: usize,
    unregistered: Vec<TargetId>,
}

/// Mock platform for testing.
///
/// Deployment status follows a scripted sequence, one entry per status
/// call; the final entry repeats once the script is exhausted.
pub struct MockPlatform {
    state: std::sync::RwLock<MockPlatformState>,
    fail_register: bool,
    status_script: Vec<DeployStatus>,
}

impl Default for MockPlatform {
    fn default() -> Self {
        Self {
            state: std::sync::RwLock::new(MockPlatformState::default()),
            fail_register: false,
            status_script: vec![DeployStatus::Running],
        }
    }
}

impl MockPlatform {
    /// Fail every register call.
    #[must_use]
    pub const fn fail_register(mut self) -> Self {
        self.fail_register = true;
        self
    }

    /// Script the statuses returned by consecutive status calls.
    #[must_use]
    pub fn with_status_script(mut self, script: Vec<DeployStatus>) -> Self {
        self.status_script = script;
        self
    }

    /// Addresses registered so far, in order.
    pub fn registered(&self) -> Vec<String> {
        self.state
            .read()
            .map(|s| s.registered.clone())
            .unwrap_or_default()
    }

    /// Deploys started so far.
    pub fn deploys(&self) -> Vec<(TargetId, DeploySpec)> {
        self.state
            .read()
            .map(|s| s.deploys.clone())
            .unwrap_or_default()
    }

    /// Targets unregistered so far, in order.
    pub fn unregistered(&self) -> Vec<TargetId> {
        self.state
            .read()
            .map(|s| s.unregistered.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl DeployPlatform for MockPlatform {
    async fn register_target(&self, address: &str) -> ControlResult<Target> {
        let mut state = self
            .state
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        if self.fail_register {
            return Err(ControlError::platform("simulated register failure"));
        }

        state.next_target += 1;
        state.registered.push(address.to_owned());

        Ok(Target {
            id: TargetId::new(format!("t-{}", state.next_target)),
        })
    }

    async fn deploy(&self, target: &TargetId, spec: &DeploySpec) -> ControlResult<Deploy> {
        let mut state = self
            .state
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        state.next_deploy += 1;
        state.deploys.push((target.clone(), spec.clone()));

        Ok(Deploy {
            id: format!("d-{}", state.next_deploy),
        })
    }

    async fn deploy_status(&self, _deploy_id: &str) -> ControlResult<DeployStatus> {
        let mut state = self
            .state
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        if self.status_script.is_empty() {
            return Ok(DeployStatus::Running);
        }

        let index = state.status_calls.min(self.status_script.len() - 1);
        state.status_calls += 1;

        Ok(self.status_script[index].clone())
    }

    async fn unregister_target(&self, target: &TargetId) -> ControlResult<()> {
        let mut state = self
            .state
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        state.unregistered.push(target.clone());
        Ok(())
    }
}

impl std::fmt::Debug for MockPlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockPlatform")
            .field("fail_register", &self.fail_register)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BuildPack;

    fn test_spec() -> DeploySpec {
        DeploySpec {
            project_id: None,
            environment_name: "production".to_owned(),
            git_repository: "https://example.com/app.git".to_owned(),
            git_branch: "main".to_owned(),
            build_pack: BuildPack::Nixpacks,
            ports_exposed: "3000".to_owned(),
        }
    }

    #[test]
    fn deploy_status_parsing() {
        assert_eq!(DeployStatus::parse("queued"), DeployStatus::Queued);
        assert_eq!(DeployStatus::parse("building"), DeployStatus::Building);
        assert_eq!(DeployStatus::parse("running"), DeployStatus::Running);
        assert_eq!(DeployStatus::parse("failed"), DeployStatus::Failed);
        assert_eq!(
            DeployStatus::parse("cancelled"),
            DeployStatus::Other("cancelled".to_owned())
        );
    }

    #[test]
    fn in_progress_statuses() {
        assert!(DeployStatus::Queued.is_in_progress());
        assert!(DeployStatus::Building.is_in_progress());
        assert!(!DeployStatus::Running.is_in_progress());
        assert!(!DeployStatus::Failed.is_in_progress());
        assert!(!DeployStatus::Other("cancelled".to_owned()).is_in_progress());
    }

    #[tokio::test]
    async fn mock_register_and_deploy() {
        let platform = MockPlatform::default();

        let target = platform.register_target("203.0.113.7").await.unwrap();
        assert_eq!(target.id.as_str(), "t-1");
        assert_eq!(platform.registered(), vec!["203.0.113.7".to_owned()]);

        let deploy = platform.deploy(&target.id, &test_spec()).await.unwrap();
        assert_eq!(deploy.id, "d-1");
        assert_eq!(platform.deploys().len(), 1);

        let status = platform.deploy_status(&deploy.id).await.unwrap();
        assert_eq!(status, DeployStatus::Running);
    }

    #[tokio::test]
    async fn scripted_status_sequence() {
        let platform = MockPlatform::default().with_status_script(vec![
            DeployStatus::Building,
            DeployStatus::Building,
            DeployStatus::Running,
        ]);

        assert_eq!(
            platform.deploy_status("d-1").await.unwrap(),
            DeployStatus::Building
        );
        assert_eq!(
            platform.deploy_status("d-1").await.unwrap(),
            DeployStatus::Building
        );
        assert_eq!(
            platform.deploy_status("d-1").await.unwrap(),
            DeployStatus::Running
        );
        // Script exhausted; final entry repeats.
        assert_eq!(
            platform.deploy_status("d-1").await.unwrap(),
            DeployStatus::Running
        );
    }

    #[tokio::test]
    async fn failing_register() {
        let platform = MockPlatform::default().fail_register();
        let err = platform.register_target("203.0.113.7").await.unwrap_err();
        assert!(matches!(err, ControlError::Platform(_)));
    }

    #[tokio::test]
    async fn unregister_records_target() {
        let platform = MockPlatform::default();
        let target = platform.register_target("203.0.113.7").await.unwrap();

        platform.unregister_target(&target.id).await.unwrap();
        assert_eq!(platform.unregistered(), vec![target.id]);
    }
}
