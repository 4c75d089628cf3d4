//! Service lifecycle management.
//!
//! Provides the main service runner with signal handling and graceful shutdown.

use std::sync::Arc;

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::admission::AdmissionController;
use crate::api;
use crate::config::ControlConfig;
use crate::error::{ControlError, ControlResult};
use crate::pipeline::DeploymentPipeline;
use crate::platform::create_platform;
use crate::provider::create_provider;
use crate::queue::JobQueue;
use crate::store::{JobStore, MemoryStore, PostgresStore};

/// The control service.
///
/// Manages the lifecycle of the control plane, including:
/// - Database connections
/// - Provider and platform clients
/// - Job queue and dispatcher
/// - HTTP API server
/// - Signal handling and graceful shutdown
pub struct ControlService {
    config: ControlConfig,
    cancel: CancellationToken,
}

impl ControlService {
    /// Create a new control service with the given configuration.
    #[must_use]
    pub fn new(config: ControlConfig) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Run the control service.
    ///
    /// This will:
    /// 1. Connect to the database (or use in-memory store as fallback)
    /// 2. Create the provider and platform clients
    /// 3. Start the job queue and re-enqueue interrupted jobs
    /// 4. Start the HTTP API server
    /// 5. Wait for shutdown signal
    pub async fn run(&self) -> ControlResult<()> {
        let store = self.create_store().await;

        let provider = create_provider(&self.config.provider)?;
        info!(
            provider_type = ?self.config.provider.provider_type,
            "machine provider configured"
        );

        let platform = create_platform(&self.config.platform)?;
        info!(
            platform_type = ?self.config.platform.platform_type,
            "deployment platform configured"
        );

        let admission = AdmissionController::new(
            Arc::clone(&store),
            self.config.pipeline.max_active_machines,
        );

        let pipeline = DeploymentPipeline::new(
            Arc::clone(&store),
            provider,
            platform,
            admission.clone(),
            self.config.pipeline.clone(),
        );

        let queue = JobQueue::start(
            Arc::clone(&store),
            admission.clone(),
            pipeline,
            self.config.pipeline.max_concurrent_jobs,
            self.cancel.clone(),
        );

        let recovered = queue.recover().await?;
        if recovered > 0 {
            info!(count = recovered, "re-enqueued interrupted jobs");
        }

        let state = api::AppState {
            queue,
            store: Arc::clone(&store),
            admission,
            provider_defaults: self.config.provider.clone(),
            platform_defaults: self.config.platform.clone(),
        };

        let app = api::router(state);

        info!(listen_addr = %self.config.server.listen_addr, "control service listening");

        let listener = tokio::net::TcpListener::bind(self.config.server.listen_addr)
            .await
            .map_err(|e| ControlError::Config(format!("failed to bind TCP: {e}")))?;
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(self.cancel.clone()))
            .await
            .map_err(|e| ControlError::Config(format!("server error: {e}")))?;

        info!("control service shutdown complete");
        Ok(())
    }

    /// Request graceful shutdown.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    async fn create_store(&self) -> Arc<dyn JobStore> {
        match PostgresStore::new(
            &self.config.database.url,
            self.config.database.max_connections,
        )
        .await
        {
            Ok(store) => {
                info!(url = %self.config.database.url, "connected to PostgreSQL");
                Arc::new(store)
            }
            Err(e) => {
                error!(
                    error = %e,
                    "failed to connect to PostgreSQL, using in-memory store"
                );
                Arc::new(MemoryStore::new())
            }
        }
    }
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            info!("received SIGTERM, initiating shutdown");
        }
        () = cancel.cancelled() => {
            info!("shutdown requested");
        }
    }
}
