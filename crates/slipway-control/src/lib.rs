//! Slipway Control Plane
//!
//! This crate provides the orchestration layer for slipway deployments.
//! It takes a deployment job from submission through machine
//! provisioning, platform registration and application rollout.
//!
//! # Architecture
//!
//! The control plane is responsible for:
//!
//! - **Admission control**: Capping the number of concurrently active
//!   machines, with rejected submissions reported as `429` at the API
//! - **Job orchestration**: Driving each accepted job through the
//!   provision/register/deploy pipeline with bounded polling at every
//!   waiting stage
//! - **State management**: Persisting every observable job transition so
//!   status queries always reflect the latest stage
//! - **Cleanup**: Releasing the machine and platform target of a failed
//!   job so capacity is never leaked
//! - **API surface**: Providing HTTP endpoints for job submission and
//!   status queries
//!
//! # State Machine
//!
//! Jobs follow a strict state machine enforced at compile time using the
//! typestate pattern:
//!
//! ```text
//! Pending ──▶ Processing ──▶ Completed
//!     │            │
//!     ▼            ▼
//!   Failed       Failed
//! ```
//!
//! Invalid state transitions are caught at compile time, not runtime.
//!
//! # Example
//!
//! ```ignore
//! use slipway_control::{
//!     Job, Pending,
//!     types::{DeploySpec, JobData, MachineSpec},
//! };
//!
//! let data = JobData::new(machine_spec, deploy_spec);
//! let pending = Job::<Pending>::create(data);
//!
//! // State transitions are type-safe
//! let mut processing = pending.begin();
//! processing.set_machine(machine.id);
//! let completed = processing.complete();
//!
//! // This would not compile:
//! // let invalid = completed.begin(); // Error!
//! ```

#![forbid(unsafe_code)]

pub mod admission;
pub mod api;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod platform;
pub mod provider;
pub mod queue;
pub mod service;
pub mod state;
pub mod store;
pub mod types;

// Re-export commonly used types at the crate root
pub use admission::AdmissionController;
pub use config::ControlConfig;
pub use error::{ControlError, ControlResult};
pub use pipeline::DeploymentPipeline;
pub use platform::{DeployPlatform, DeployStatus, HttpPlatform, MockPlatform};
pub use provider::{HttpProvider, Machine, MachineProvider, MockProvider};
pub use queue::JobQueue;
pub use service::ControlService;
pub use state::{AnyJob, Completed, Failed, Job, JobState, Pending, Processing};
pub use store::{JobFilter, JobStore, JobUpdate, MemoryStore, PostgresStore};
pub use types::{
    BuildPack, DeploySpec, JobData, JobId, JobRecord, JobStatus, MachineId, MachineSpec, TargetId,
};
