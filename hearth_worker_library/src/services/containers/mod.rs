use self::structs::{ContainerState, PoolKey};
use anyhow::Result;
use hearth_library::transaction::TransactionId;
use std::sync::Arc;

pub mod docker;
pub mod pool;
pub mod simulation;
pub mod structs;

#[derive(Debug, Clone, Default)]
/// Captured output of one command run inside a container.
/// stdout and stderr are never interleaved.
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
}

#[derive(Debug, Clone, Copy, Default)]
/// Point-in-time resource usage of one container.
pub struct ContainerStats {
    /// cumulative CPU usage reported by the engine
    pub cpu_total: f64,
    pub memory_bytes: f64,
}

/// The seam to the host's container runtime.
/// Both technologies are addressed through the same engine; they differ only
/// in the runtime requested at container creation.
#[async_trait::async_trait]
pub trait ContainerEngine: Send + Sync {
    async fn ping(&self, tid: &TransactionId) -> Result<()>;

    /// Create and start a keep-alive container for a pool slot.
    /// Returns the engine-assigned identifier.
    async fn create_container(&self, name: &str, image: &str, key: &PoolKey, tid: &TransactionId) -> Result<String>;

    /// Look up an existing container by name.
    /// Returns [None] when no such container exists, an error for engine failures.
    async fn get_container(&self, name: &str, tid: &TransactionId) -> Result<Option<String>>;

    /// Live lifecycle state as the engine reports it right now.
    async fn container_state(&self, container_id: &str, tid: &TransactionId) -> Result<ContainerState>;

    async fn start_container(&self, container_id: &str, tid: &TransactionId) -> Result<()>;

    /// Run a command to completion inside a running container.
    async fn exec(&self, container_id: &str, cmd: Vec<String>, tid: &TransactionId) -> Result<ExecOutput>;

    /// Unpack a tar archive into the container filesystem under `dest_path`.
    async fn copy_archive_in(
        &self,
        container_id: &str,
        dest_path: &str,
        archive: Vec<u8>,
        tid: &TransactionId,
    ) -> Result<()>;

    async fn container_stats(&self, container_id: &str, tid: &TransactionId) -> Result<ContainerStats>;

    /// Remove every container this worker owns, running or not.
    async fn remove_owned_containers(&self, tid: &TransactionId) -> Result<()>;
}

pub type Engine = Arc<dyn ContainerEngine>;
