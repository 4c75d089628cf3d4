//! The deployment pipeline.
//!
//! One pipeline run takes a pending job through machine provisioning,
//! platform registration and application deployment, persisting every
//! observable transition so `GET /jobs/{id}` always reflects the latest
//! stage. On any failure the run cleans up whatever it acquired, marks
//! the job failed and propagates the error.

mod poll;

pub use poll::{poll_until, PollOutcome, PollPolicy};

use std::sync::Arc;

use tracing::{info, warn};

use crate::admission::AdmissionController;
use crate::config::PipelineConfig;
use crate::error::{ControlError, ControlResult};
use crate::platform::{DeployPlatform, DeployStatus};
use crate::provider::{Machine, MachineProvider};
use crate::state::{Completed, Job, Pending, Processing};
use crate::store::{JobStore, JobUpdate};
use crate::types::{JobData, JobStatus, MachineSpec};

/// Runs deployment jobs end to end.
#[derive(Clone)]
pub struct DeploymentPipeline {
    store: Arc<dyn JobStore>,
    provider: Arc<dyn MachineProvider>,
    platform: Arc<dyn DeployPlatform>,
    admission: AdmissionController,
    config: PipelineConfig,
}

impl DeploymentPipeline {
    /// Create a new pipeline.
    #[must_use]
    pub fn new(
        store: Arc<dyn JobStore>,
        provider: Arc<dyn MachineProvider>,
        platform: Arc<dyn DeployPlatform>,
        admission: AdmissionController,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            provider,
            platform,
            admission,
            config,
        }
    }

    /// Run a pending job to completion.
    ///
    /// On failure the acquired machine and target are released
    /// best-effort, the job is persisted as failed with the error text as
    /// its detail, and the error is returned to the caller.
    pub async fn run(&self, job: Job<Pending>) -> ControlResult<Job<Completed>> {
        let job_id = job.id().clone();
        info!(job_id = %job_id, "starting deployment pipeline");

        let mut job = job.begin();
        self.store
            .update(&job_id, JobUpdate::new().with_status(JobStatus::Processing))
            .await?;

        match self.execute(&mut job).await {
            Ok(()) => {
                let completed = job.complete();
                self.store
                    .update(
                        &job_id,
                        JobUpdate::new()
                            .with_status(JobStatus::Completed)
                            .clear_detail(),
                    )
                    .await?;
                info!(
                    job_id = %job_id,
                    machine_id = ?completed.data().machine_id,
                    target_id = ?completed.data().target_id,
                    "deployment completed"
                );
                Ok(completed)
            }
            Err(error) => {
                let data = job.fail(error.to_string()).into_data();
                self.cleanup(&data, &error).await;

                if let Err(persist_err) = self
                    .store
                    .update(
                        &job_id,
                        JobUpdate::new()
                            .with_status(JobStatus::Failed)
                            .with_detail(error.to_string()),
                    )
                    .await
                {
                    warn!(
                        job_id = %job_id,
                        error = %persist_err,
                        "failed to persist failed status"
                    );
                }

                Err(error)
            }
        }
    }

    async fn execute(&self, job: &mut Job<Processing>) -> ControlResult<()> {
        // Capacity may have been consumed between submission and pickup;
        // recheck before acquiring a machine.
        self.admission.ensure_capacity().await?;

        let machine = self.acquire_machine(job).await?;
        let machine = self.await_machine_ready(job, machine).await?;

        let address = machine
            .public_address()
            .ok_or(ControlError::NoPublicAddress(machine.id))?
            .to_owned();

        job.annotate("machine ready, connecting to platform");
        self.store
            .update(
                job.id(),
                JobUpdate::new().with_detail("machine ready, connecting to platform"),
            )
            .await?;

        let target = self.platform.register_target(&address).await?;
        info!(job_id = %job.id(), target_id = %target.id, "target registered");

        job.set_target(target.id.clone());
        job.annotate("target connected, preparing deployment");
        self.store
            .update(
                job.id(),
                JobUpdate::new()
                    .with_target(target.id.clone())
                    .with_detail("target connected, preparing deployment"),
            )
            .await?;

        // Give the machine time to settle before handing it work.
        tokio::time::sleep(self.config.stabilize_delay()).await;

        job.annotate("deploying application");
        self.store
            .update(job.id(), JobUpdate::new().with_detail("deploying application"))
            .await?;

        let deploy = self
            .platform
            .deploy(&target.id, &job.data().deploy_spec)
            .await?;
        info!(job_id = %job.id(), deploy_id = %deploy.id, "deployment triggered");

        tokio::time::sleep(self.config.deploy_initial_delay()).await;

        self.await_deploy_finished(job, &deploy.id).await
    }

    /// Acquire the machine for this job, creating it if necessary.
    ///
    /// Machine names are deterministic per job, so a redelivered job
    /// re-attaches to the machine it already created instead of leaking a
    /// second one.
    async fn acquire_machine(&self, job: &mut Job<Processing>) -> ControlResult<Machine> {
        let name = job.data().machine_name();

        let machine = match self.provider.find_machine(&name).await? {
            Some(existing) => {
                info!(
                    job_id = %job.id(),
                    machine_id = %existing.id,
                    "reusing existing machine"
                );
                existing
            }
            None => {
                let spec = MachineSpec {
                    name,
                    ..job.data().machine_spec.clone()
                };
                let created = self.provider.create_machine(&spec).await?;
                info!(job_id = %job.id(), machine_id = %created.id, "machine created");
                created
            }
        };

        job.set_machine(machine.id);
        self.store
            .update(job.id(), JobUpdate::new().with_machine(machine.id))
            .await?;

        Ok(machine)
    }

    /// Poll the provider until the machine reports a network assignment.
    async fn await_machine_ready(
        &self,
        job: &Job<Processing>,
        machine: Machine,
    ) -> ControlResult<Machine> {
        if machine.has_network() {
            return Ok(machine);
        }

        let policy = PollPolicy {
            interval: self.config.readiness_interval(),
            max_attempts: self.config.readiness_max_attempts,
        };
        let max_attempts = policy.max_attempts;
        let machine_id = machine.id;
        let job_id = job.id().clone();

        let outcome = poll_until(policy, |attempt| {
            let store = Arc::clone(&self.store);
            let provider = Arc::clone(&self.provider);
            let job_id = job_id.clone();
            async move {
                store
                    .update(
                        &job_id,
                        JobUpdate::new().with_detail(format!(
                            "initializing machine (attempt {attempt}/{max_attempts})"
                        )),
                    )
                    .await?;

                let polled = provider.get_machine(machine_id).await?;
                Ok(polled.has_network().then_some(polled))
            }
        })
        .await?;

        match outcome {
            PollOutcome::Ready(machine) => Ok(machine),
            PollOutcome::TimedOut { attempts } => Err(ControlError::ProvisioningTimeout {
                id: machine_id,
                attempts,
            }),
        }
    }

    /// Poll the platform until the deployment leaves the in-progress
    /// statuses, requiring it to land on `running`.
    async fn await_deploy_finished(
        &self,
        job: &Job<Processing>,
        deploy_id: &str,
    ) -> ControlResult<()> {
        let policy = PollPolicy {
            interval: self.config.status_interval(),
            max_attempts: self.config.status_max_attempts,
        };
        let max_attempts = policy.max_attempts;
        let job_id = job.id().clone();

        let outcome = poll_until(policy, |attempt| {
            let store = Arc::clone(&self.store);
            let platform = Arc::clone(&self.platform);
            let job_id = job_id.clone();
            let deploy_id = deploy_id.to_owned();
            async move {
                store
                    .update(
                        &job_id,
                        JobUpdate::new().with_detail(format!(
                            "building application (attempt {attempt}/{max_attempts})"
                        )),
                    )
                    .await?;

                let status = platform.deploy_status(&deploy_id).await?;
                Ok((!status.is_in_progress()).then_some(status))
            }
        })
        .await?;

        match outcome {
            PollOutcome::Ready(DeployStatus::Running) => Ok(()),
            PollOutcome::Ready(status) => Err(ControlError::DeploymentFailed {
                status: status.to_string(),
            }),
            PollOutcome::TimedOut { attempts } => Err(ControlError::DeploymentTimeout {
                id: deploy_id.to_owned(),
                attempts,
            }),
        }
    }

    /// Release everything the failed run acquired.
    ///
    /// Failures here are logged and swallowed; the job is marked failed
    /// regardless.
    async fn cleanup(&self, data: &JobData, error: &ControlError) {
        warn!(job_id = %data.id, error = %error, "pipeline failed, cleaning up");

        if let Some(machine_id) = data.machine_id {
            match self.provider.delete_machine(machine_id).await {
                Ok(()) => info!(job_id = %data.id, machine_id = %machine_id, "machine deleted"),
                Err(e) => warn!(
                    job_id = %data.id,
                    machine_id = %machine_id,
                    error = %e,
                    "failed to delete machine during cleanup"
                ),
            }
        }

        if let Some(target_id) = &data.target_id {
            match self.platform.unregister_target(target_id).await {
                Ok(()) => info!(job_id = %data.id, target_id = %target_id, "target unregistered"),
                Err(e) => warn!(
                    job_id = %data.id,
                    target_id = %target_id,
                    error = %e,
                    "failed to unregister target during cleanup"
                ),
            }
        }
    }
}

impl std::fmt::Debug for DeploymentPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeploymentPipeline")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
