//! Core types for slipway-control.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for a deployment job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Create a job ID from an existing string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a new unique job ID using ULID.
    #[must_use]
    pub fn generate() -> Self {
        Self(ulid::Ulid::new().to_string().to_lowercase())
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for JobId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Provider-side identifier of a provisioned machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MachineId(i64);

impl MachineId {
    /// Create a machine ID.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the raw numeric ID.
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        self.0
    }
}

impl fmt::Display for MachineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Platform-side identifier of a registered deploy target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetId(String);

impl TargetId {
    /// Create a target ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for TargetId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Parameters for the machine to provision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineSpec {
    /// Base name for the machine.
    pub name: String,
    /// Provider region slug.
    pub region: String,
    /// Provider size slug.
    pub size: String,
    /// Base image slug.
    pub image: String,
}

/// Build pack used by the platform to build the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildPack {
    /// Auto-detected build via nixpacks.
    #[default]
    Nixpacks,
    /// Build from a Dockerfile in the repository.
    Dockerfile,
}

impl BuildPack {
    /// Get the build pack name as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Nixpacks => "nixpacks",
            Self::Dockerfile => "dockerfile",
        }
    }
}

/// Parameters for the application deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploySpec {
    /// Platform project to deploy into, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    /// Platform environment name.
    pub environment_name: String,
    /// Git repository URL to deploy.
    pub git_repository: String,
    /// Git branch to deploy.
    pub git_branch: String,
    /// Build pack to use.
    pub build_pack: BuildPack,
    /// Port(s) the application exposes.
    pub ports_exposed: String,
}

/// Persisted job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Job accepted, waiting for a worker.
    Pending,
    /// Job picked up, pipeline running.
    Processing,
    /// Pipeline finished successfully.
    Completed,
    /// Pipeline failed; `status_detail` carries the error.
    Failed,
}

impl JobStatus {
    /// Get the status name as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Check whether this is a terminal status.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("unknown job status: {s}")),
        }
    }
}

/// Common data shared across all job states.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobData {
    /// Unique job identifier, assigned at submission.
    pub id: JobId,
    /// Parameters for the machine to provision.
    pub machine_spec: MachineSpec,
    /// Parameters for the application deployment.
    pub deploy_spec: DeploySpec,
    /// Provider machine ID, set once creation succeeds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub machine_id: Option<MachineId>,
    /// Platform target ID, set once registration succeeds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_id: Option<TargetId>,
    /// Free-text progress/error annotation, overwritten on every transition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_detail: Option<String>,
    /// When the job was submitted.
    pub created_at: DateTime<Utc>,
    /// When the record was last updated.
    pub updated_at: DateTime<Utc>,
}

impl JobData {
    /// Create new job data for a submission.
    #[must_use]
    pub fn new(machine_spec: MachineSpec, deploy_spec: DeploySpec) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::generate(),
            machine_spec,
            deploy_spec,
            machine_id: None,
            target_id: None,
            status_detail: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Deterministic provider-side machine name for this job.
    ///
    /// Derived from the job ID so that a redelivered job finds the machine
    /// it already created instead of provisioning a second one.
    #[must_use]
    pub fn machine_name(&self) -> String {
        format!("{}-{}", self.machine_spec.name, self.id)
    }
}

/// A job record as stored in the job store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    /// The job data.
    #[serde(flatten)]
    pub data: JobData,
    /// Current status.
    pub status: JobStatus,
}

impl JobRecord {
    /// Create a new record in the pending status.
    #[must_use]
    pub const fn new(data: JobData) -> Self {
        Self {
            data,
            status: JobStatus::Pending,
        }
    }
}
