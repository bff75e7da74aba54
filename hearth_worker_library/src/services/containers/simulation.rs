//! In-process engine backend for tests and simulation runs.
//! Mirrors the observable behavior of the Docker engine without a daemon:
//! containers are records in memory, exec results are scripted, and every
//! call is recorded so tests can assert on engine traffic.

use super::structs::{ContainerState, PoolKey};
use super::{ContainerEngine, ContainerStats, ExecOutput};
use anyhow::Result;
use dashmap::DashMap;
use hearth_library::transaction::TransactionId;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
/// Which engine operation the sim should fail on next.
pub enum SimFailure {
    Create,
    Get,
    Start,
    Workdir,
    Copy,
    Exec,
    Stats,
}

struct SimContainer {
    container_id: String,
    state: RwLock<ContainerState>,
}

pub struct SimEngine {
    /// name -> container record
    containers: DashMap<String, Arc<SimContainer>>,
    failures: DashMap<SimFailure, ()>,
    scripted_exec: Mutex<Option<ExecOutput>>,
    /// every exec call as (container_id, joined command)
    exec_log: Mutex<Vec<(String, String)>>,
    /// every staged archive as (dest path, bytes)
    staged: Mutex<Vec<(String, Vec<u8>)>>,
    create_calls: AtomicU32,
    start_calls: AtomicU32,
}

impl SimEngine {
    pub fn boxed() -> Arc<Self> {
        Arc::new(SimEngine {
            containers: DashMap::new(),
            failures: DashMap::new(),
            scripted_exec: Mutex::new(None),
            exec_log: Mutex::new(vec![]),
            staged: Mutex::new(vec![]),
            create_calls: AtomicU32::new(0),
            start_calls: AtomicU32::new(0),
        })
    }

    /// Make the next calls of this kind fail until cleared.
    pub fn fail_at(&self, failure: SimFailure) {
        self.failures.insert(failure, ());
    }
    pub fn clear_failures(&self) {
        self.failures.clear();
    }
    fn should_fail(&self, failure: SimFailure) -> bool {
        self.failures.contains_key(&failure)
    }

    /// Script the output returned for function run commands.
    pub fn set_exec_result(&self, output: ExecOutput) {
        *self.scripted_exec.lock() = Some(output);
    }

    /// Pre-seed a container as if it survived a previous worker run.
    pub fn seed_container(&self, name: &str, state: ContainerState) {
        self.containers.insert(
            name.to_owned(),
            Arc::new(SimContainer {
                container_id: format!("sim-{}", name),
                state: RwLock::new(state),
            }),
        );
    }

    /// Flip a container to the stopped state out-of-band.
    pub fn stop_container_by_name(&self, name: &str) {
        if let Some(c) = self.containers.get(name) {
            *c.state.write() = ContainerState::Stopped;
        }
    }

    pub fn create_count(&self) -> u32 {
        self.create_calls.load(Ordering::Relaxed)
    }
    pub fn start_count(&self) -> u32 {
        self.start_calls.load(Ordering::Relaxed)
    }
    pub fn exec_log(&self) -> Vec<(String, String)> {
        self.exec_log.lock().clone()
    }
    pub fn staged_archives(&self) -> Vec<(String, Vec<u8>)> {
        self.staged.lock().clone()
    }

    fn find_by_id(&self, container_id: &str) -> Result<Arc<SimContainer>> {
        for entry in self.containers.iter() {
            if entry.value().container_id == container_id {
                return Ok(entry.value().clone());
            }
        }
        anyhow::bail!("No simulated container with id '{}'", container_id)
    }
}

#[async_trait::async_trait]
impl ContainerEngine for SimEngine {
    async fn ping(&self, _tid: &TransactionId) -> Result<()> {
        Ok(())
    }

    async fn create_container(&self, name: &str, _image: &str, _key: &PoolKey, _tid: &TransactionId) -> Result<String> {
        self.create_calls.fetch_add(1, Ordering::Relaxed);
        if self.should_fail(SimFailure::Create) {
            anyhow::bail!("Simulated failure creating container '{}'", name);
        }
        let container_id = format!("sim-{}", name);
        self.containers.insert(
            name.to_owned(),
            Arc::new(SimContainer {
                container_id: container_id.clone(),
                state: RwLock::new(ContainerState::Running),
            }),
        );
        Ok(container_id)
    }

    async fn get_container(&self, name: &str, _tid: &TransactionId) -> Result<Option<String>> {
        if self.should_fail(SimFailure::Get) {
            anyhow::bail!("Simulated failure inspecting container '{}'", name);
        }
        Ok(self.containers.get(name).map(|c| c.container_id.clone()))
    }

    async fn container_state(&self, container_id: &str, _tid: &TransactionId) -> Result<ContainerState> {
        let c = self.find_by_id(container_id)?;
        let state = *c.state.read();
        Ok(state)
    }

    async fn start_container(&self, container_id: &str, _tid: &TransactionId) -> Result<()> {
        self.start_calls.fetch_add(1, Ordering::Relaxed);
        if self.should_fail(SimFailure::Start) {
            anyhow::bail!("Simulated failure starting container '{}'", container_id);
        }
        let c = self.find_by_id(container_id)?;
        *c.state.write() = ContainerState::Running;
        Ok(())
    }

    async fn exec(&self, container_id: &str, cmd: Vec<String>, _tid: &TransactionId) -> Result<ExecOutput> {
        let joined = cmd.join(" ");
        self.exec_log.lock().push((container_id.to_owned(), joined.clone()));
        if joined.contains("mkdir -p") {
            if self.should_fail(SimFailure::Workdir) {
                anyhow::bail!("Simulated failure creating invocation directory");
            }
            return Ok(ExecOutput::default());
        }
        if self.should_fail(SimFailure::Exec) {
            anyhow::bail!("Simulated failure running command in container '{}'", container_id);
        }
        Ok(self.scripted_exec.lock().clone().unwrap_or_default())
    }

    async fn copy_archive_in(
        &self,
        container_id: &str,
        dest_path: &str,
        archive: Vec<u8>,
        _tid: &TransactionId,
    ) -> Result<()> {
        if self.should_fail(SimFailure::Copy) {
            anyhow::bail!("Simulated failure uploading archive to container '{}'", container_id);
        }
        self.staged.lock().push((dest_path.to_owned(), archive));
        Ok(())
    }

    async fn container_stats(&self, container_id: &str, _tid: &TransactionId) -> Result<ContainerStats> {
        if self.should_fail(SimFailure::Stats) {
            anyhow::bail!("Simulated failure querying stats for container '{}'", container_id);
        }
        self.find_by_id(container_id)?;
        Ok(ContainerStats {
            cpu_total: 1000.0,
            memory_bytes: 64.0 * 1024.0 * 1024.0,
        })
    }

    async fn remove_owned_containers(&self, _tid: &TransactionId) -> Result<()> {
        self.containers.clear();
        Ok(())
    }
}
