pub mod file_utils;
pub use file_utils as file;

use crate::bail_error;
use crate::transaction::TransactionId;
use anyhow::Result;
use tokio::signal::unix::{signal, Signal, SignalKind};
use tracing::{error, info};

fn try_create_signal(tid: &TransactionId, kind: SignalKind) -> Result<Signal> {
    match signal(kind) {
        Ok(s) => Ok(s),
        Err(e) => bail_error!(tid=tid, error=%e, kind=?kind, "Failed to create signal listener"),
    }
}

/// Block until the process receives a termination-style signal.
pub async fn wait_for_exit_signal(tid: &TransactionId) -> Result<()> {
    let mut sig_int = try_create_signal(tid, SignalKind::interrupt())?;
    let mut sig_term = try_create_signal(tid, SignalKind::terminate())?;
    let mut sig_quit = try_create_signal(tid, SignalKind::quit())?;

    info!(tid = tid, "Waiting on exit signal");
    if tokio::select! {
      res = sig_int.recv() => res,
      res = sig_term.recv() => res,
      res = sig_quit.recv() => res,
    }
    .is_none()
    {
        error!(
            tid = tid,
            "Unknown failure waiting on exit signal. Stream broken. Exiting."
        );
    }
    Ok(())
}
