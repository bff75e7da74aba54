use anyhow::Result;
use clap::Parser;
use hearth_library::tokio_utils::build_tokio_runtime;
use hearth_library::transaction::{TransactionId, CLEAN_TID, STARTUP_TID};
use hearth_library::{bail_error, logging::start_tracing, utils::wait_for_exit_signal};
use hearth_worker_library::http::create_http_server;
use hearth_worker_library::services::containers::docker::DockerEngine;
use hearth_worker_library::services::containers::{ContainerEngine, Engine};
use hearth_worker_library::worker_api::config::{Configuration, WorkerConfig};
use hearth_worker_library::worker_api::create_worker;
use std::sync::Arc;
use tracing::{debug, error, info};
use utils::Args;

pub mod utils;

async fn run(server_config: WorkerConfig, tid: &TransactionId) -> Result<()> {
    debug!(tid=tid.as_str(), config=?server_config, "loaded configuration");

    let worker = match create_worker(server_config.clone(), tid).await {
        Ok(w) => w,
        Err(e) => bail_error!(tid=tid, error=%e, "Error creating worker on startup"),
    };
    info!(tid=tid, pools=?worker.pools.active_keys(), "Worker ready");

    let http_server = match create_http_server(&server_config.address, server_config.port, worker).await {
        Ok(s) => s,
        Err(e) => bail_error!(tid=tid, error=%e, "Error creating HTTP server on startup"),
    };
    tokio::spawn(async move {
        if let Err(e) = http_server.run().await {
            error!("HTTP server error: {}", e);
        }
    });

    wait_for_exit_signal(tid).await?;
    Ok(())
}

async fn clean(server_config: WorkerConfig, tid: &TransactionId) -> Result<()> {
    debug!(tid=?tid, config=?server_config, "loaded configuration");

    let engine: Engine = Arc::new(DockerEngine::new(tid)?);
    engine.remove_owned_containers(tid).await?;
    info!(tid = tid, "Removed all owned containers");
    Ok(())
}

fn main() -> Result<()> {
    hearth_library::utils::file::ensure_temp_dir()?;
    let tid: &TransactionId = &STARTUP_TID;
    let cli = Args::parse();

    match cli.command {
        Some(utils::Commands::Clean) => {
            let server_config = Configuration::boxed(&cli.config.as_deref(), None)?;
            let _guard = start_tracing(&server_config.logging, &CLEAN_TID)?;
            let worker_rt = build_tokio_runtime(
                &server_config.tokio_event_interval,
                &server_config.tokio_queue_interval,
                &CLEAN_TID,
            )?;
            worker_rt.block_on(clean(server_config, &CLEAN_TID))?;
        },
        None => {
            let server_config = Configuration::boxed(&cli.config.as_deref(), None)?;
            let _guard = start_tracing(&server_config.logging, tid)?;
            let worker_rt = build_tokio_runtime(
                &server_config.tokio_event_interval,
                &server_config.tokio_queue_interval,
                tid,
            )?;
            worker_rt.block_on(run(server_config, tid))?;
        },
    }
    Ok(())
}
