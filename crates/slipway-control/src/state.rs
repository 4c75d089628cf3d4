//! Typestate pattern for the job state machine.
//!
//! Job states are encoded in the type system so that invalid transitions
//! are a compile-time error rather than a runtime check. The only legal
//! transitions are:
//!
//! ```text
//! Pending ──▶ Processing ──▶ Completed
//!     │            │
//!     ▼            ▼
//!   Failed       Failed
//! ```
//!
//! `Completed` and `Failed` are terminal. Mid-pipeline bookkeeping
//! (machine ID, target ID, progress annotations) is only available on
//! `Job<Processing>`, since those fields are only written while a worker
//! owns the job.

use std::marker::PhantomData;

use crate::error::{ControlError, ControlResult};
use crate::types::{JobData, JobId, JobStatus, MachineId, TargetId};

/// Marker trait for job states.
pub trait JobState: private::Sealed + Send + Sync {
    /// Get the persisted status representation.
    fn persisted() -> JobStatus;

    /// Get the state name for error messages.
    fn name() -> &'static str;
}

mod private {
    pub trait Sealed {}
}

/// Job accepted, waiting for a worker.
#[derive(Debug, Clone, Copy)]
pub struct Pending;

/// Job owned by a worker, pipeline running.
#[derive(Debug, Clone, Copy)]
pub struct Processing;

/// Pipeline finished successfully.
#[derive(Debug, Clone, Copy)]
pub struct Completed;

/// Pipeline failed.
#[derive(Debug, Clone, Copy)]
pub struct Failed;

impl private::Sealed for Pending {}
impl private::Sealed for Processing {}
impl private::Sealed for Completed {}
impl private::Sealed for Failed {}

impl JobState for Pending {
    fn persisted() -> JobStatus {
        JobStatus::Pending
    }
    fn name() -> &'static str {
        "pending"
    }
}

impl JobState for Processing {
    fn persisted() -> JobStatus {
        JobStatus::Processing
    }
    fn name() -> &'static str {
        "processing"
    }
}

impl JobState for Completed {
    fn persisted() -> JobStatus {
        JobStatus::Completed
    }
    fn name() -> &'static str {
        "completed"
    }
}

impl JobState for Failed {
    fn persisted() -> JobStatus {
        JobStatus::Failed
    }
    fn name() -> &'static str {
        "failed"
    }
}

/// A job in a specific state.
///
/// The state parameter `S` determines which transitions are available.
#[derive(Debug)]
pub struct Job<S: JobState> {
    /// The underlying job data.
    data: JobData,
    /// Zero-sized state marker.
    _state: PhantomData<S>,
}

impl<S: JobState> Job<S> {
    /// Get a reference to the job data.
    #[must_use]
    pub const fn data(&self) -> &JobData {
        &self.data
    }

    /// Get the job ID.
    #[must_use]
    pub const fn id(&self) -> &JobId {
        &self.data.id
    }

    /// Get the current state as a persisted status.
    #[must_use]
    pub fn status(&self) -> JobStatus {
        S::persisted()
    }

    /// Convert into the underlying data (consuming the job).
    #[must_use]
    pub fn into_data(self) -> JobData {
        self.data
    }

    /// Internal helper to transition to a new state.
    fn transition<T: JobState>(self) -> Job<T> {
        Job {
            data: self.data,
            _state: PhantomData,
        }
    }

    /// Internal helper to transition with data modification.
    fn transition_with<T: JobState>(mut self, f: impl FnOnce(&mut JobData)) -> Job<T> {
        f(&mut self.data);
        self.data.updated_at = chrono::Utc::now();
        Job {
            data: self.data,
            _state: PhantomData,
        }
    }
}

impl Job<Pending> {
    /// Create a new job in the pending state.
    #[must_use]
    pub const fn create(data: JobData) -> Self {
        Self {
            data,
            _state: PhantomData,
        }
    }

    /// Transition to the processing state.
    ///
    /// Called when a worker takes ownership of the job.
    #[must_use]
    pub fn begin(self) -> Job<Processing> {
        self.transition()
    }

    /// Transition directly to the failed state.
    ///
    /// Use this when the job fails before a worker picks it up.
    #[must_use]
    pub fn fail(self, error: String) -> Job<Failed> {
        self.transition_with(|data| {
            data.status_detail = Some(error);
        })
    }
}

impl Job<Processing> {
    /// Record the provisioned machine ID.
    pub fn set_machine(&mut self, id: MachineId) {
        self.data.machine_id = Some(id);
        self.data.updated_at = chrono::Utc::now();
    }

    /// Record the platform target ID.
    pub fn set_target(&mut self, id: TargetId) {
        self.data.target_id = Some(id);
        self.data.updated_at = chrono::Utc::now();
    }

    /// Overwrite the progress annotation.
    pub fn annotate(&mut self, detail: impl Into<String>) {
        self.data.status_detail = Some(detail.into());
        self.data.updated_at = chrono::Utc::now();
    }

    /// Transition to the completed state, clearing the progress annotation.
    #[must_use]
    pub fn complete(self) -> Job<Completed> {
        self.transition_with(|data| {
            data.status_detail = None;
        })
    }

    /// Transition to the failed state.
    #[must_use]
    pub fn fail(self, error: String) -> Job<Failed> {
        self.transition_with(|data| {
            data.status_detail = Some(error);
        })
    }
}

/// A type-erased job that can be in any state.
///
/// Used when loading from the store where the status is not known at
/// compile time.
#[derive(Debug)]
pub enum AnyJob {
    /// Job in the pending state.
    Pending(Job<Pending>),
    /// Job in the processing state.
    Processing(Job<Processing>),
    /// Job in the completed state.
    Completed(Job<Completed>),
    /// Job in the failed state.
    Failed(Job<Failed>),
}

impl AnyJob {
    /// Create an `AnyJob` from data and a persisted status.
    #[must_use]
    pub const fn from_persisted(data: JobData, status: JobStatus) -> Self {
        match status {
            JobStatus::Pending => Self::Pending(Job {
                data,
                _state: PhantomData,
            }),
            JobStatus::Processing => Self::Processing(Job {
                data,
                _state: PhantomData,
            }),
            JobStatus::Completed => Self::Completed(Job {
                data,
                _state: PhantomData,
            }),
            JobStatus::Failed => Self::Failed(Job {
                data,
                _state: PhantomData,
            }),
        }
    }

    /// Get a reference to the job data.
    #[must_use]
    pub const fn data(&self) -> &JobData {
        match self {
            Self::Pending(j) => j.data(),
            Self::Processing(j) => j.data(),
            Self::Completed(j) => j.data(),
            Self::Failed(j) => j.data(),
        }
    }

    /// Get the current status.
    #[must_use]
    pub const fn status(&self) -> JobStatus {
        match self {
            Self::Pending(_) => JobStatus::Pending,
            Self::Processing(_) => JobStatus::Processing,
            Self::Completed(_) => JobStatus::Completed,
            Self::Failed(_) => JobStatus::Failed,
        }
    }

    /// Check whether the job is in a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed(_) | Self::Failed(_))
    }

    /// Try to extract a pending job.
    ///
    /// Returns an error if the job is not in the pending state.
    pub fn try_into_pending(self) -> ControlResult<Job<Pending>> {
        match self {
            Self::Pending(j) => Ok(j),
            other => Err(ControlError::InvalidStateTransition {
                from: other.status().as_str(),
                to: "pending",
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BuildPack, DeploySpec, MachineSpec};

    fn test_data() -> JobData {
        JobData::new(
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
        )
    }

    #[test]
    fn happy_path_transitions() {
        let pending = Job::<Pending>::create(test_data());
        assert_eq!(pending.status(), JobStatus::Pending);

        let processing = pending.begin();
        assert_eq!(processing.status(), JobStatus::Processing);

        let completed = processing.complete();
        assert_eq!(completed.status(), JobStatus::Completed);
    }

    #[test]
    fn fail_from_pending() {
        let pending = Job::<Pending>::create(test_data());
        let failed = pending.fail("rejected before pickup".to_owned());
        assert_eq!(failed.status(), JobStatus::Failed);
        assert_eq!(
            failed.data().status_detail.as_deref(),
            Some("rejected before pickup")
        );
    }

    #[test]
    fn fail_from_processing() {
        let processing = Job::<Pending>::create(test_data()).begin();
        let failed = processing.fail("provider unavailable".to_owned());
        assert_eq!(failed.status(), JobStatus::Failed);
    }

    #[test]
    fn processing_records_ids_and_annotations() {
        let mut processing = Job::<Pending>::create(test_data()).begin();

        processing.set_machine(MachineId::new(42));
        processing.set_target(TargetId::new("t-1"));
        processing.annotate("initializing machine (attempt 1/12)");

        assert_eq!(processing.data().machine_id, Some(MachineId::new(42)));
        assert_eq!(
            processing.data().target_id.as_ref().map(TargetId::as_str),
            Some("t-1")
        );
        assert_eq!(
            processing.data().status_detail.as_deref(),
            Some("initializing machine (attempt 1/12)")
        );
    }

    #[test]
    fn completion_clears_annotation() {
        let mut processing = Job::<Pending>::create(test_data()).begin();
        processing.annotate("building application (attempt 1/12)");

        let completed = processing.complete();
        assert!(completed.data().status_detail.is_none());
    }

    #[test]
    fn any_job_roundtrip() {
        let data = test_data();
        let id = data.id.clone();

        let any = AnyJob::from_persisted(data, JobStatus::Pending);
        assert_eq!(any.status(), JobStatus::Pending);
        assert!(!any.is_terminal());

        let pending = any.try_into_pending().unwrap();
        assert_eq!(pending.id(), &id);
    }

    #[test]
    fn any_job_wrong_state() {
        let any = AnyJob::from_persisted(test_data(), JobStatus::Completed);
        assert!(any.is_terminal());
        assert!(any.try_into_pending().is_err());
    }
}
