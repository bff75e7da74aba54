use self::config::WorkerConfig;
use self::hearth_worker::HearthWorker;
use crate::services::containers::docker::DockerEngine;
use crate::services::containers::pool::PoolManager;
use crate::services::containers::Engine;
use crate::services::invocation::ExecutionDispatcher;
use crate::services::registration::RegistrationService;
use crate::services::telemetry::TelemetrySink;
use anyhow::Result;
use hearth_library::{bail_error, transaction::TransactionId};
use std::sync::Arc;

pub mod config;
pub mod hearth_worker;

/// Assemble a worker against the host's Docker daemon.
pub async fn create_worker(worker_config: WorkerConfig, tid: &TransactionId) -> Result<Arc<HearthWorker>> {
    if !DockerEngine::supported(tid).await {
        bail_error!(tid = tid, "Docker engine is not available on this host");
    }
    let engine: Engine = Arc::new(DockerEngine::new(tid)?);
    create_worker_with_engine(engine, worker_config, tid).await
}

/// Assemble a worker against any engine; the sim engine slots in here for tests.
pub async fn create_worker_with_engine(
    engine: Engine,
    worker_config: WorkerConfig,
    tid: &TransactionId,
) -> Result<Arc<HearthWorker>> {
    let telemetry = match TelemetrySink::new() {
        Ok(t) => t,
        Err(e) => bail_error!(tid=tid, error=%e, "Failed to build telemetry sink"),
    };
    let pools = match PoolManager::initialize(&engine, &worker_config.container_resources.pools, tid).await {
        Ok(p) => p,
        Err(e) => bail_error!(tid=tid, error=%e, "Failed to initialize warm container pools"),
    };
    let registration = RegistrationService::new(worker_config.limits.clone());
    let dispatcher = ExecutionDispatcher::new(
        engine,
        pools.clone(),
        telemetry.clone(),
        worker_config.container_resources.sandbox_root.clone(),
    );
    Ok(Arc::new(HearthWorker {
        config: worker_config,
        dispatcher,
        registration,
        telemetry,
        pools,
    }))
}
