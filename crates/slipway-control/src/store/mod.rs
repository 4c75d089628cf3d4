//! Job storage backends.
//!
//! This module provides traits and implementations for persisting job
//! records. The primary implementation uses PostgreSQL, but an in-memory
//! implementation is provided for testing and as a degraded fallback.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

use async_trait::async_trait;

use crate::error::ControlResult;
use crate::types::{JobId, JobRecord, JobStatus, MachineId, TargetId};

/// Filter criteria for listing and counting jobs.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    /// Match any of these statuses (empty means any status).
    pub statuses: Vec<JobStatus>,
    /// Require the machine ID to be set (or unset).
    pub has_machine: Option<bool>,
    /// Maximum number of results.
    pub limit: Option<u32>,
    /// Offset for pagination.
    pub offset: Option<u32>,
}

impl JobFilter {
    /// Create a new empty filter.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            statuses: Vec::new(),
            has_machine: None,
            limit: None,
            offset: None,
        }
    }

    /// The admission predicate: jobs holding a machine.
    ///
    /// A job counts against capacity when its status is pending,
    /// processing or completed AND a machine ID is recorded. Failed jobs
    /// never count; their machines were cleaned up.
    #[must_use]
    pub fn active() -> Self {
        Self::new()
            .with_status(JobStatus::Pending)
            .with_status(JobStatus::Processing)
            .with_status(JobStatus::Completed)
            .with_machine(true)
    }

    /// Add a status to match.
    #[must_use]
    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.statuses.push(status);
        self
    }

    /// Require the machine ID to be set (`true`) or unset (`false`).
    #[must_use]
    pub const fn with_machine(mut self, has_machine: bool) -> Self {
        self.has_machine = Some(has_machine);
        self
    }

    /// Set maximum results.
    #[must_use]
    pub const fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Set pagination offset.
    #[must_use]
    pub const fn with_offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }
}

/// Partial update applied to a job record.
///
/// Unset fields are left unchanged. `updated_at` is always bumped.
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    /// New status, if changing.
    pub status: Option<JobStatus>,
    /// Machine ID to record.
    pub machine_id: Option<MachineId>,
    /// Target ID to record.
    pub target_id: Option<TargetId>,
    /// New status detail; `Some(None)` clears it, `None` leaves it alone.
    pub status_detail: Option<Option<String>>,
}

impl JobUpdate {
    /// Create a new empty update.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            status: None,
            machine_id: None,
            target_id: None,
            status_detail: None,
        }
    }

    /// Set the status.
    #[must_use]
    pub const fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Record the machine ID.
    #[must_use]
    pub const fn with_machine(mut self, id: MachineId) -> Self {
        self.machine_id = Some(id);
        self
    }

    /// Record the target ID.
    #[must_use]
    pub fn with_target(mut self, id: TargetId) -> Self {
        self.target_id = Some(id);
        self
    }

    /// Overwrite the status detail.
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.status_detail = Some(Some(detail.into()));
        self
    }

    /// Clear the status detail.
    #[must_use]
    pub fn clear_detail(mut self) -> Self {
        self.status_detail = Some(None);
        self
    }
}

/// Backend for storing job records.
///
/// All writes to a given record are issued by the worker currently owning
/// that job; the admission count is the only cross-job read and is
/// allowed to be eventually consistent with in-flight writes.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job record.
    ///
    /// Returns an error if a job with the same ID already exists.
    async fn insert(&self, record: &JobRecord) -> ControlResult<()>;

    /// Get a job by ID.
    ///
    /// Returns `None` if the job does not exist.
    async fn get(&self, id: &JobId) -> ControlResult<Option<JobRecord>>;

    /// Apply a partial update and return the updated record.
    async fn update(&self, id: &JobId, update: JobUpdate) -> ControlResult<JobRecord>;

    /// List jobs matching the filter criteria.
    ///
    /// Results are ordered by `created_at` descending (newest first).
    async fn list(&self, filter: &JobFilter) -> ControlResult<Vec<JobRecord>>;

    /// Count jobs matching the filter criteria.
    async fn count_where(&self, filter: &JobFilter) -> ControlResult<u64>;

    /// Delete a job record.
    ///
    /// This is primarily for testing. In production, records are kept for
    /// status queries and audit.
    async fn delete(&self, id: &JobId) -> ControlResult<()>;
}

impl JobFilter {
    /// Check a record against this filter (shared by in-memory evaluation).
    #[must_use]
    pub fn matches(&self, record: &JobRecord) -> bool {
        if !self.statuses.is_empty() && !self.statuses.contains(&record.status) {
            return false;
        }
        if let Some(has_machine) = self.has_machine {
            if record.data.machine_id.is_some() != has_machine {
                return false;
            }
        }
        true
    }
}
