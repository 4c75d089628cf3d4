//! Error types for slipway-control.

use crate::types::MachineId;

/// Result type alias using [`ControlError`].
pub type ControlResult<T> = Result<T, ControlError>;

/// Errors that can occur in the control service.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    /// Admission denied: the active machine limit is reached.
    #[error("machine capacity exceeded: {active} of {limit} machines in use")]
    CapacityExceeded {
        /// Machines currently counted as active.
        active: u64,
        /// Configured machine limit.
        limit: u32,
    },

    /// Cloud provider call failed.
    #[error("provider error: {0}")]
    Provider(String),

    /// Readiness polling exhausted without a network assignment.
    #[error("machine {id} not ready after {attempts} attempts")]
    ProvisioningTimeout {
        /// The machine that never became ready.
        id: MachineId,
        /// Attempts spent polling.
        attempts: u32,
    },

    /// Machine became ready but reported no public address.
    #[error("machine {0} has no public network address")]
    NoPublicAddress(MachineId),

    /// Deployment platform call failed.
    #[error("platform error: {0}")]
    Platform(String),

    /// Deployment status polling exhausted while still in progress.
    #[error("deployment {id} still in progress after {attempts} attempts")]
    DeploymentTimeout {
        /// Platform deployment identifier.
        id: String,
        /// Attempts spent polling.
        attempts: u32,
    },

    /// Deployment reached a terminal non-success status.
    #[error("deployment failed with status: {status}")]
    DeploymentFailed {
        /// Last observed platform status.
        status: String,
    },

    /// Job not found.
    #[error("job not found: {0}")]
    JobNotFound(String),

    /// Invalid state transition attempted.
    #[error("invalid state transition: cannot transition from {from} to {to}")]
    InvalidStateTransition {
        /// Current status.
        from: &'static str,
        /// Attempted target status.
        to: &'static str,
    },

    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// HTTP client error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ControlError {
    /// Create a provider error.
    #[must_use]
    pub fn provider(msg: impl Into<String>) -> Self {
        Self::Provider(msg.into())
    }

    /// Create a platform error.
    #[must_use]
    pub fn platform(msg: impl Into<String>) -> Self {
        Self::Platform(msg.into())
    }

    /// Create an internal error.
    #[must_use]
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Check whether this error was raised by the admission controller.
    #[must_use]
    pub const fn is_capacity(&self) -> bool {
        matches!(self, Self::CapacityExceeded { .. })
    }
}
