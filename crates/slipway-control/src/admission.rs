//! Admission control for concurrently active machines.
//!
//! The active count is always computed from the authoritative store via a
//! predicate query, never cached in memory: submission and execution are
//! decoupled in time, so a private counter would drift. The check-then-act
//! between `can_admit` and machine creation is not atomic; transient
//! over-admission under concurrent submissions is tolerated by design.

use std::sync::Arc;

use crate::error::{ControlError, ControlResult};
use crate::store::{JobFilter, JobStore};

/// Decides whether a new job may proceed given current machine usage.
#[derive(Clone)]
pub struct AdmissionController {
    store: Arc<dyn JobStore>,
    limit: u32,
}

impl AdmissionController {
    /// Create a new admission controller with the given machine limit.
    #[must_use]
    pub fn new(store: Arc<dyn JobStore>, limit: u32) -> Self {
        Self { store, limit }
    }

    /// The configured machine limit.
    #[must_use]
    pub const fn limit(&self) -> u32 {
        self.limit
    }

    /// Count jobs currently holding a machine.
    pub async fn count_active(&self) -> ControlResult<u64> {
        self.store.count_where(&JobFilter::active()).await
    }

    /// Check whether a new job may be admitted.
    pub async fn can_admit(&self) -> ControlResult<bool> {
        let active = self.count_active().await?;
        Ok(active < u64::from(self.limit))
    }

    /// Check capacity, returning a `CapacityExceeded` error when full.
    pub async fn ensure_capacity(&self) -> ControlResult<()> {
        let active = self.count_active().await?;
        if active < u64::from(self.limit) {
            Ok(())
        } else {
            Err(ControlError::CapacityExceeded {
                active,
                limit: self.limit,
            })
        }
    }
}

impl std::fmt::Debug for AdmissionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionController")
            .field("limit", &self.limit)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{JobUpdate, MemoryStore};
    use crate::types::{
        BuildPack, DeploySpec, JobData, JobRecord, JobStatus, MachineId, MachineSpec,
    };

    fn test_record() -> JobRecord {
        JobRecord::new(JobData::new(
            MachineSpec {
                name: "app".to_owned(),
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
        ))
    }

    async fn insert_active(store: &MemoryStore, status: JobStatus, machine: i64) {
        let record = test_record();
        let id = record.data.id.clone();
        store.insert(&record).await.expect("insert failed");
        store
            .update(
                &id,
                JobUpdate::new()
                    .with_status(status)
                    .with_machine(MachineId::new(machine)),
            )
            .await
            .expect("update failed");
    }

    #[tokio::test]
    async fn admits_below_limit() {
        let store = Arc::new(MemoryStore::new());
        let admission = AdmissionController::new(store.clone(), 3);

        insert_active(&store, JobStatus::Processing, 1).await;
        insert_active(&store, JobStatus::Completed, 2).await;

        assert_eq!(admission.count_active().await.unwrap(), 2);
        assert!(admission.can_admit().await.unwrap());
        admission.ensure_capacity().await.unwrap();
    }

    #[tokio::test]
    async fn rejects_at_limit() {
        let store = Arc::new(MemoryStore::new());
        let admission = AdmissionController::new(store.clone(), 3);

        insert_active(&store, JobStatus::Processing, 1).await;
        insert_active(&store, JobStatus::Completed, 2).await;
        insert_active(&store, JobStatus::Pending, 3).await;

        assert!(!admission.can_admit().await.unwrap());

        let err = admission.ensure_capacity().await.unwrap_err();
        assert!(err.is_capacity());
        assert_eq!(
            err.to_string(),
            "machine capacity exceeded: 3 of 3 machines in use"
        );
    }

    #[tokio::test]
    async fn failed_and_machineless_jobs_do_not_count() {
        let store = Arc::new(MemoryStore::new());
        let admission = AdmissionController::new(store.clone(), 3);

        // Pending without a machine.
        store.insert(&test_record()).await.expect("insert failed");
        // Failed, machine already cleaned up.
        insert_active(&store, JobStatus::Failed, 9).await;

        assert_eq!(admission.count_active().await.unwrap(), 0);
        assert!(admission.can_admit().await.unwrap());
    }
}
