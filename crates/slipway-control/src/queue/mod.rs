//! Asynchronous job queue.
//!
//! Submissions are admission-checked, persisted and handed to a
//! dispatcher task, which fans jobs out to worker tasks bounded by a
//! semaphore. The store is the source of truth: the channel only carries
//! job IDs, and a job observed in a terminal state is never re-run.

use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::admission::AdmissionController;
use crate::error::{ControlError, ControlResult};
use crate::pipeline::DeploymentPipeline;
use crate::state::AnyJob;
use crate::store::{JobFilter, JobStore, JobUpdate};
use crate::types::{DeploySpec, JobData, JobId, JobRecord, JobStatus, MachineSpec};

/// Handle for submitting deployment jobs.
#[derive(Clone)]
pub struct JobQueue {
    store: Arc<dyn JobStore>,
    admission: AdmissionController,
    tx: mpsc::UnboundedSender<JobId>,
}

impl JobQueue {
    /// Start the queue and its dispatcher task.
    ///
    /// The dispatcher runs until the token is cancelled or the queue
    /// handle is dropped.
    #[must_use]
    pub fn start(
        store: Arc<dyn JobStore>,
        admission: AdmissionController,
        pipeline: DeploymentPipeline,
        max_concurrent: usize,
        cancel: CancellationToken,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(dispatch_loop(
            rx,
            Arc::clone(&store),
            pipeline,
            Arc::new(Semaphore::new(max_concurrent.max(1))),
            cancel,
        ));

        Self {
            store,
            admission,
            tx,
        }
    }

    /// Submit a new deployment job.
    ///
    /// Capacity is checked before the job is persisted, so a rejected
    /// submission leaves no record behind.
    pub async fn submit(
        &self,
        machine_spec: MachineSpec,
        deploy_spec: DeploySpec,
    ) -> ControlResult<JobRecord> {
        self.admission.ensure_capacity().await?;

        let record = JobRecord::new(JobData::new(machine_spec, deploy_spec));
        self.store.insert(&record).await?;
        info!(job_id = %record.data.id, "job accepted");

        self.enqueue(record.data.id.clone())?;
        Ok(record)
    }

    /// Re-enqueue jobs that were in flight when the service last stopped.
    ///
    /// Jobs found processing are reset to pending; the deterministic
    /// machine name lets the pipeline re-attach to a machine the earlier
    /// run already created.
    pub async fn recover(&self) -> ControlResult<usize> {
        let filter = JobFilter::new()
            .with_status(JobStatus::Pending)
            .with_status(JobStatus::Processing);
        let records = self.store.list(&filter).await?;
        let count = records.len();

        for record in records {
            if record.status == JobStatus::Processing {
                self.store
                    .update(
                        &record.data.id,
                        JobUpdate::new().with_status(JobStatus::Pending),
                    )
                    .await?;
            }
            info!(job_id = %record.data.id, "recovered job");
            self.enqueue(record.data.id)?;
        }

        Ok(count)
    }

    fn enqueue(&self, id: JobId) -> ControlResult<()> {
        self.tx
            .send(id)
            .map_err(|_| ControlError::internal("job dispatcher is not running"))
    }
}

impl std::fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobQueue").finish_non_exhaustive()
    }
}

async fn dispatch_loop(
    mut rx: mpsc::UnboundedReceiver<JobId>,
    store: Arc<dyn JobStore>,
    pipeline: DeploymentPipeline,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
) {
    loop {
        let job_id = tokio::select! {
            () = cancel.cancelled() => break,
            received = rx.recv() => match received {
                Some(id) => id,
                None => break,
            },
        };

        let permit = match Arc::clone(&semaphore).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };

        let store = Arc::clone(&store);
        let pipeline = pipeline.clone();
        tokio::spawn(async move {
            process_job(&store, &pipeline, &job_id).await;
            drop(permit);
        });
    }

    info!("job dispatcher stopped");
}

async fn process_job(store: &Arc<dyn JobStore>, pipeline: &DeploymentPipeline, job_id: &JobId) {
    let record = match store.get(job_id).await {
        Ok(Some(record)) => record,
        Ok(None) => {
            warn!(job_id = %job_id, "dispatched job no longer exists");
            return;
        }
        Err(e) => {
            error!(job_id = %job_id, error = %e, "failed to load dispatched job");
            return;
        }
    };

    let job = AnyJob::from_persisted(record.data, record.status);
    if job.is_terminal() {
        warn!(job_id = %job_id, status = %job.status(), "skipping terminal job");
        return;
    }

    let pending = match job.try_into_pending() {
        Ok(pending) => pending,
        Err(e) => {
            warn!(job_id = %job_id, error = %e, "dispatched job not runnable");
            return;
        }
    };

    if let Err(error) = pipeline.run(pending).await {
        handle_failure(store, job_id, &error).await;
    }
}

/// Second write path for failures.
///
/// The pipeline persists the failed status itself, but that write can be
/// lost to a store hiccup; this keeps the record failed either way.
async fn handle_failure(store: &Arc<dyn JobStore>, job_id: &JobId, error: &ControlError) {
    error!(job_id = %job_id, error = %error, "job failed");

    let update = JobUpdate::new()
        .with_status(JobStatus::Failed)
        .with_detail(error.to_string());

    if let Err(e) = store.update(job_id, update).await {
        error!(job_id = %job_id, error = %e, "failed to record job failure");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::platform::MockPlatform;
    use crate::provider::MockProvider;
    use crate::store::MemoryStore;
    use crate::types::{BuildPack, MachineId};
    use std::time::Duration;

    fn instant_config() -> PipelineConfig {
        PipelineConfig {
            max_active_machines: 3,
            readiness_interval_secs: 0,
            readiness_max_attempts: 12,
            stabilize_delay_secs: 0,
            deploy_initial_delay_secs: 0,
            status_interval_secs: 0,
            status_max_attempts: 12,
            max_concurrent_jobs: 10,
        }
    }

    fn test_machine_spec() -> MachineSpec {
        MachineSpec {
            name: "app".to_owned(),
            region: "nyc1".to_owned(),
            size: "s-2vcpu-2gb".to_owned(),
            image: "ubuntu-22-04-x64".to_owned(),
        }
    }

    fn test_deploy_spec() -> DeploySpec {
        DeploySpec {
            project_id: None,
            environment_name: "production".to_owned(),
            git_repository: "https://example.com/app.git".to_owned(),
            git_branch: "main".to_owned(),
            build_pack: BuildPack::Nixpacks,
            ports_exposed: "3000".to_owned(),
        }
    }

    fn queue_with(
        provider: MockProvider,
        platform: MockPlatform,
    ) -> (JobQueue, Arc<MemoryStore>, CancellationToken) {
        let store = Arc::new(MemoryStore::new());
        let store_dyn: Arc<dyn JobStore> = store.clone();
        let admission = AdmissionController::new(store_dyn.clone(), 3);
        let pipeline = DeploymentPipeline::new(
            store_dyn.clone(),
            Arc::new(provider),
            Arc::new(platform),
            admission.clone(),
            instant_config(),
        );
        let cancel = CancellationToken::new();
        let queue = JobQueue::start(store_dyn, admission, pipeline, 10, cancel.clone());
        (queue, store, cancel)
    }

    async fn wait_for_status(store: &MemoryStore, id: &JobId, status: JobStatus) -> JobRecord {
        for _ in 0..200 {
            if let Some(record) = store.get(id).await.unwrap() {
                if record.status == status {
                    return record;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("job {id} never reached {status}");
    }

    #[tokio::test]
    async fn submitted_job_runs_to_completion() {
        let (queue, store, _cancel) =
            queue_with(MockProvider::default().with_first_id(42), MockPlatform::default());

        let record = queue
            .submit(test_machine_spec(), test_deploy_spec())
            .await
            .unwrap();
        assert_eq!(record.status, JobStatus::Pending);

        let done = wait_for_status(&store, &record.data.id, JobStatus::Completed).await;
        assert_eq!(done.data.machine_id, Some(MachineId::new(42)));
        assert!(done.data.status_detail.is_none());
    }

    #[tokio::test]
    async fn submission_rejected_at_capacity() {
        let (queue, store, _cancel) =
            queue_with(MockProvider::default(), MockPlatform::default());

        for i in 0..3_i64 {
            let mut record = JobRecord::new(JobData::new(test_machine_spec(), test_deploy_spec()));
            record.data.machine_id = Some(MachineId::new(i));
            record.status = JobStatus::Completed;
            store.insert(&record).await.unwrap();
        }

        let err = queue
            .submit(test_machine_spec(), test_deploy_spec())
            .await
            .unwrap_err();
        assert!(err.is_capacity());
        assert_eq!(
            err.to_string(),
            "machine capacity exceeded: 3 of 3 machines in use"
        );

        // Rejected submissions leave no record.
        let all = store.list(&JobFilter::new()).await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn failed_pipeline_marks_job_failed() {
        let (queue, store, _cancel) = queue_with(
            MockProvider::default(),
            MockPlatform::default().fail_register(),
        );

        let record = queue
            .submit(test_machine_spec(), test_deploy_spec())
            .await
            .unwrap();

        let failed = wait_for_status(&store, &record.data.id, JobStatus::Failed).await;
        assert!(failed
            .data
            .status_detail
            .as_deref()
            .unwrap()
            .contains("simulated register failure"));
    }

    #[tokio::test]
    async fn recover_requeues_interrupted_jobs() {
        let (queue, store, _cancel) =
            queue_with(MockProvider::default(), MockPlatform::default());

        let pending = JobRecord::new(JobData::new(test_machine_spec(), test_deploy_spec()));
        store.insert(&pending).await.unwrap();

        let mut interrupted = JobRecord::new(JobData::new(test_machine_spec(), test_deploy_spec()));
        interrupted.status = JobStatus::Processing;
        store.insert(&interrupted).await.unwrap();

        let mut done = JobRecord::new(JobData::new(test_machine_spec(), test_deploy_spec()));
        done.status = JobStatus::Completed;
        store.insert(&done).await.unwrap();

        let recovered = queue.recover().await.unwrap();
        assert_eq!(recovered, 2);

        wait_for_status(&store, &pending.data.id, JobStatus::Completed).await;
        wait_for_status(&store, &interrupted.data.id, JobStatus::Completed).await;
    }

    #[tokio::test]
    async fn cancelled_queue_rejects_submissions() {
        let (queue, _store, cancel) =
            queue_with(MockProvider::default(), MockPlatform::default());

        cancel.cancel();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let err = queue
            .submit(test_machine_spec(), test_deploy_spec())
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::Internal(_)));
    }
}
