use crate::services::containers::pool::PoolManager;
use crate::services::containers::structs::{Container, ContainerStartError, ContainerState, PoolKey};
use crate::services::containers::{Engine, ExecOutput};
use crate::services::registration::FunctionSpec;
use crate::services::telemetry::TelemetrySink;
use anyhow::Result;
use hearth_library::transaction::{gen_tid, TransactionId};
use hearth_library::types::{Language, Technology};
use hearth_library::utils::file::{ensure_dir, invocation_path, try_remove_dir};
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub mod packaging;

#[derive(Debug)]
/// The requested function declares a language outside the supported set.
pub struct UnsupportedLanguageError {
    pub language: String,
}
impl UnsupportedLanguageError {
    pub fn boxed(language: &str) -> anyhow::Error {
        anyhow::Error::new(UnsupportedLanguageError {
            language: language.to_owned(),
        })
    }
}
impl Display for UnsupportedLanguageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(f, "Language '{}' is not supported", self.language)?;
        Ok(())
    }
}
impl std::error::Error for UnsupportedLanguageError {}

#[derive(Debug)]
/// Building or injecting the invocation payload failed.
pub struct StagingError {
    pub message: String,
}
impl StagingError {
    pub fn boxed(message: impl Into<String>) -> anyhow::Error {
        anyhow::Error::new(StagingError {
            message: message.into(),
        })
    }
}
impl Display for StagingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(f, "Staging failed: {}", self.message)?;
        Ok(())
    }
}
impl std::error::Error for StagingError {}

#[derive(Debug)]
/// The run command itself could not be invoked.
/// Distinct from the function returning a non-zero exit, which is a normal result.
pub struct ExecutionError {
    pub message: String,
}
impl ExecutionError {
    pub fn boxed(message: impl Into<String>) -> anyhow::Error {
        anyhow::Error::new(ExecutionError {
            message: message.into(),
        })
    }
}
impl Display for ExecutionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(f, "Execution failed: {}", self.message)?;
        Ok(())
    }
}
impl std::error::Error for ExecutionError {}

#[derive(Debug)]
/// Everything about one completed invocation.
/// A non-zero exit code still produces one of these.
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
    /// wall-clock duration of the run command
    pub duration: Duration,
    /// name of the warm container that served the invocation
    pub container_name: String,
}

/// Ephemeral per-request state: the invocation identifier and the staging
/// paths derived from it. Host-side resources are released exactly once on
/// every exit path; [Drop] is the backstop for paths that skip cleanup.
struct InvocationContext {
    invocation_id: TransactionId,
    host_dir: PathBuf,
    container_dir: String,
    cleaned: bool,
}
impl InvocationContext {
    fn create(sandbox_root: &str, tid: &TransactionId) -> Result<Self> {
        let invocation_id = gen_tid();
        let host_dir = invocation_path(&invocation_id);
        ensure_dir(&host_dir)?;
        debug!(tid=tid, invocation_id=%invocation_id, host_dir=%host_dir.display(), "Created invocation staging dir");
        Ok(InvocationContext {
            container_dir: format!("{}/{}", sandbox_root, invocation_id),
            invocation_id,
            host_dir,
            cleaned: false,
        })
    }

    fn cleanup(&mut self, tid: &TransactionId) {
        if self.cleaned {
            return;
        }
        try_remove_dir(&self.host_dir, tid);
        self.cleaned = true;
    }
}
impl Drop for InvocationContext {
    fn drop(&mut self) {
        if !self.cleaned {
            try_remove_dir(&self.host_dir, &self.invocation_id);
        }
    }
}

/// The central orchestration routine: route an invocation to a warm
/// container, stage its code, run it bounded, collect output and telemetry.
pub struct ExecutionDispatcher {
    engine: Engine,
    pools: Arc<PoolManager>,
    telemetry: Arc<TelemetrySink>,
    /// shared in-container root under which invocation workdirs live
    sandbox_root: String,
}

impl ExecutionDispatcher {
    pub fn new(engine: Engine, pools: Arc<PoolManager>, telemetry: Arc<TelemetrySink>, sandbox_root: String) -> Arc<Self> {
        Arc::new(ExecutionDispatcher {
            engine,
            pools,
            telemetry,
            sandbox_root,
        })
    }

    /// Run `function` once under `technology`.
    /// A non-zero exit from the user's code is returned as a successful
    /// [ExecutionResult]; only system faults produce errors here.
    pub async fn execute(
        &self,
        function: &Arc<FunctionSpec>,
        technology: Technology,
        tid: &TransactionId,
    ) -> Result<ExecutionResult> {
        let language = match Language::from_str(&function.language) {
            Ok(l) => l,
            Err(_) => {
                warn!(tid=tid, function_id=function.id, language=%function.language, "Rejecting function with unsupported language");
                return Err(UnsupportedLanguageError::boxed(&function.language));
            },
        };
        self.telemetry.record_request(function, technology);
        let key = PoolKey::new(technology, language);
        let container = self.pools.acquire(&key, tid)?;
        let mut ctx = InvocationContext::create(&self.sandbox_root, tid)?;
        let outcome = self.run_staged(function, language, &container, &ctx, tid).await;
        // host temp resources go away no matter how the pipeline ended
        ctx.cleanup(tid);
        let (output, duration) = outcome?;
        let result = ExecutionResult {
            stdout: output.stdout,
            stderr: output.stderr,
            exit_code: output.exit_code,
            duration,
            container_name: container.name.clone(),
        };
        self.telemetry.record_duration(function, technology, duration.as_secs_f64());
        if result.exit_code != 0 {
            info!(tid=tid, function_id=function.id, exit_code=result.exit_code, container_id=%container.container_id, "Function exited non-zero");
            self.telemetry.record_error(function, technology);
        }
        self.report_stats(&container, tid).await;
        Ok(result)
    }

    /// Steps of the pipeline that run against the container.
    /// Split out so the caller can guarantee cleanup around it.
    async fn run_staged(
        &self,
        function: &Arc<FunctionSpec>,
        language: Language,
        container: &Container,
        ctx: &InvocationContext,
        tid: &TransactionId,
    ) -> Result<(ExecOutput, Duration)> {
        self.ensure_running(container, tid).await?;

        // the invocation-scoped dir is the isolation boundary between
        // concurrent invocations sharing this container
        let workdir_cmd = vec![
            "/bin/sh".to_owned(),
            "-c".to_owned(),
            format!("rm -rf {d} && mkdir -p {d}", d = ctx.container_dir),
        ];
        match self.engine.exec(&container.container_id, workdir_cmd, tid).await {
            Ok(out) if out.exit_code == 0 => (),
            Ok(out) => {
                warn!(tid=tid, container_id=%container.container_id, stderr=%out.stderr, "Creating invocation workdir failed");
                return Err(StagingError::boxed(format!(
                    "Creating invocation workdir exited with status {}",
                    out.exit_code
                )));
            },
            Err(e) => return Err(StagingError::boxed(format!("Creating invocation workdir failed: {}", e))),
        }

        let archive_path = format!("{}/{}", ctx.invocation_id, language.entrypoint());
        let archive = match packaging::package(&function.code, &ctx.host_dir, &archive_path, tid) {
            Ok(a) => a,
            Err(e) => return Err(StagingError::boxed(format!("Packaging function source failed: {}", e))),
        };
        if let Err(e) = self
            .engine
            .copy_archive_in(&container.container_id, &self.sandbox_root, archive, tid)
            .await
        {
            return Err(StagingError::boxed(format!("Copying archive into container failed: {}", e)));
        }

        // the in-command timeout is the sole bound on a runaway function; a
        // hung process would starve every future invocation routed here
        let run_cmd = vec![
            "/bin/sh".to_owned(),
            "-c".to_owned(),
            format!(
                "timeout {} {} {}/{}",
                function.timeout_sec,
                language.interpreter(),
                ctx.container_dir,
                language.entrypoint()
            ),
        ];
        let start = tokio::time::Instant::now();
        match self.engine.exec(&container.container_id, run_cmd, tid).await {
            Ok(output) => Ok((output, start.elapsed())),
            Err(e) => Err(ExecutionError::boxed(format!("Running function command failed: {}", e))),
        }
    }

    /// Recover containers that were stopped out-of-band.
    async fn ensure_running(&self, container: &Container, tid: &TransactionId) -> Result<()> {
        let state = match self.engine.container_state(&container.container_id, tid).await {
            Ok(s) => s,
            Err(e) => {
                warn!(tid=tid, container_id=%container.container_id, error=%e, "Failed to query live container state");
                ContainerState::Unknown
            },
        };
        container.set_state(state);
        if state == ContainerState::Running {
            return Ok(());
        }
        info!(tid=tid, container_id=%container.container_id, state=?state, "Warm container not running, starting it");
        match self.engine.start_container(&container.container_id, tid).await {
            Ok(_) => {
                container.set_state(ContainerState::Running);
                Ok(())
            },
            Err(e) => {
                container.set_state(ContainerState::Stopped);
                Err(ContainerStartError::boxed(format!("{}", e)))
            },
        }
    }

    /// Best-effort gauges; a failure here never fails the invocation.
    async fn report_stats(&self, container: &Container, tid: &TransactionId) {
        match self.engine.container_stats(&container.container_id, tid).await {
            Ok(stats) => self
                .telemetry
                .record_container_stats(&container.name, stats.cpu_total, stats.memory_bytes),
            Err(e) => {
                debug!(tid=tid, container_id=%container.container_id, error=%e, "Skipping container stats for this invocation")
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::containers::simulation::{SimEngine, SimFailure};
    use crate::services::containers::structs::PoolUnavailableError;
    use crate::worker_api::config::PoolConfig;
    use hearth_library::utils::file::invocation_path;

    fn function(name: &str, language: &str, code: &str, timeout_sec: u64) -> Arc<FunctionSpec> {
        Arc::new(FunctionSpec {
            id: 1,
            name: name.to_string(),
            language: language.to_string(),
            code: code.to_string(),
            timeout_sec,
        })
    }

    async fn dispatcher_with_pools(
        configs: &[PoolConfig],
    ) -> (Arc<SimEngine>, Arc<TelemetrySink>, Arc<ExecutionDispatcher>) {
        let sim = SimEngine::boxed();
        let engine: Engine = sim.clone();
        let pools = PoolManager::initialize(&engine, configs, &gen_tid()).await.unwrap();
        let telemetry = TelemetrySink::new().unwrap();
        let dispatcher = ExecutionDispatcher::new(engine, pools, telemetry.clone(), "/hearth".to_string());
        (sim, telemetry, dispatcher)
    }

    fn python_docker_pool(count: u32) -> Vec<PoolConfig> {
        vec![PoolConfig {
            technology: Technology::Docker,
            language: Language::Python,
            count,
            image: None,
        }]
    }

    /// Pull the invocation id back out of the recorded workdir command.
    fn staged_invocation_ids(sim: &SimEngine) -> Vec<String> {
        sim.exec_log()
            .iter()
            .filter(|(_, cmd)| cmd.contains("mkdir -p"))
            .map(|(_, cmd)| {
                let tail = cmd.split("mkdir -p /hearth/").nth(1).unwrap();
                tail.split_whitespace().next().unwrap().to_string()
            })
            .collect()
    }

    #[tokio::test]
    async fn hello_world_end_to_end() {
        let (sim, telemetry, dispatcher) = dispatcher_with_pools(&python_docker_pool(2)).await;
        sim.set_exec_result(ExecOutput {
            stdout: "hi\n".to_string(),
            stderr: String::new(),
            exit_code: 0,
        });
        let f = function("hello", "python", "print(\"hi\")", 5);
        let result = dispatcher.execute(&f, Technology::Docker, &gen_tid()).await.unwrap();
        assert_eq!(result.stdout, "hi\n");
        assert_eq!(result.stderr, "");
        assert_eq!(result.exit_code, 0);
        assert!(result.container_name.starts_with("python_docker_pool_"));
        assert_eq!(
            telemetry
                .requests
                .with_label_values(&["1", "hello", "python", "docker"])
                .get(),
            1
        );
        assert_eq!(
            telemetry
                .errors
                .with_label_values(&["1", "hello", "python", "docker"])
                .get(),
            0
        );
        assert_eq!(
            telemetry
                .duration
                .with_label_values(&["1", "hello", "python", "docker"])
                .get_sample_count(),
            1
        );
        // the run command carries the declared timeout
        let log = sim.exec_log();
        let run_cmd = &log.last().unwrap().1;
        assert!(run_cmd.contains("timeout 5 python3"));
        // host staging dir is gone
        for id in staged_invocation_ids(&sim) {
            assert!(!invocation_path(&id).exists());
        }
    }

    #[tokio::test]
    async fn failing_function_is_a_normal_result() {
        let (sim, telemetry, dispatcher) = dispatcher_with_pools(&python_docker_pool(1)).await;
        sim.set_exec_result(ExecOutput {
            stdout: String::new(),
            stderr: "Exception: boom\n".to_string(),
            exit_code: 1,
        });
        let f = function("boom", "python", "raise Exception(\"boom\")", 5);
        let result = dispatcher.execute(&f, Technology::Docker, &gen_tid()).await.unwrap();
        assert_eq!(result.exit_code, 1);
        assert_eq!(result.stderr, "Exception: boom\n");
        assert_eq!(
            telemetry
                .requests
                .with_label_values(&["1", "boom", "python", "docker"])
                .get(),
            1
        );
        assert_eq!(
            telemetry
                .errors
                .with_label_values(&["1", "boom", "python", "docker"])
                .get(),
            1
        );
    }

    #[tokio::test]
    async fn unsupported_language_is_rejected() {
        let (_sim, telemetry, dispatcher) = dispatcher_with_pools(&python_docker_pool(1)).await;
        let f = function("rb", "ruby", "puts 'hi'", 5);
        let err = dispatcher.execute(&f, Technology::Docker, &gen_tid()).await.unwrap_err();
        assert!(err.downcast_ref::<UnsupportedLanguageError>().is_some());
        assert_eq!(
            telemetry.requests.with_label_values(&["1", "rb", "ruby", "docker"]).get(),
            0
        );
    }

    #[tokio::test]
    async fn missing_gvisor_pool_fails_without_start_attempt() {
        let (sim, _telemetry, dispatcher) = dispatcher_with_pools(&python_docker_pool(1)).await;
        let f = function("hello", "python", "print(\"hi\")", 5);
        let err = dispatcher.execute(&f, Technology::Gvisor, &gen_tid()).await.unwrap_err();
        assert!(err.downcast_ref::<PoolUnavailableError>().is_some());
        assert_eq!(sim.start_count(), 0);
        assert!(sim.exec_log().is_empty());
    }

    #[tokio::test]
    async fn stopped_container_is_restarted() {
        let (sim, _telemetry, dispatcher) = dispatcher_with_pools(&python_docker_pool(1)).await;
        sim.stop_container_by_name("python_docker_pool_0");
        let f = function("hello", "python", "print(\"hi\")", 5);
        let result = dispatcher.execute(&f, Technology::Docker, &gen_tid()).await.unwrap();
        assert_eq!(result.exit_code, 0);
        assert_eq!(sim.start_count(), 1);
    }

    #[tokio::test]
    async fn start_rejection_maps_to_container_start_error() {
        let (sim, _telemetry, dispatcher) = dispatcher_with_pools(&python_docker_pool(1)).await;
        sim.stop_container_by_name("python_docker_pool_0");
        sim.fail_at(SimFailure::Start);
        let f = function("hello", "python", "print(\"hi\")", 5);
        let err = dispatcher.execute(&f, Technology::Docker, &gen_tid()).await.unwrap_err();
        assert!(err.downcast_ref::<ContainerStartError>().is_some());
    }

    #[tokio::test]
    async fn cleanup_happens_on_every_failure_path() {
        for (failure, expects_staging) in [
            (SimFailure::Workdir, true),
            (SimFailure::Copy, true),
            (SimFailure::Exec, false),
        ] {
            let (sim, _telemetry, dispatcher) = dispatcher_with_pools(&python_docker_pool(1)).await;
            sim.fail_at(failure);
            let f = function("hello", "python", "print(\"hi\")", 5);
            let err = dispatcher.execute(&f, Technology::Docker, &gen_tid()).await.unwrap_err();
            if expects_staging {
                assert!(
                    err.downcast_ref::<StagingError>().is_some(),
                    "{:?} should surface as StagingError",
                    failure
                );
            } else {
                assert!(
                    err.downcast_ref::<ExecutionError>().is_some(),
                    "{:?} should surface as ExecutionError",
                    failure
                );
            }
            for id in staged_invocation_ids(&sim) {
                assert!(
                    !invocation_path(&id).exists(),
                    "host staging dir for {} leaked after {:?}",
                    id,
                    failure
                );
            }
        }
    }

    #[tokio::test]
    async fn stats_failure_does_not_fail_invocation() {
        let (sim, telemetry, dispatcher) = dispatcher_with_pools(&python_docker_pool(1)).await;
        sim.fail_at(SimFailure::Stats);
        let f = function("hello", "python", "print(\"hi\")", 5);
        let result = dispatcher.execute(&f, Technology::Docker, &gen_tid()).await;
        assert!(result.is_ok());
        assert_eq!(
            telemetry
                .container_cpu
                .with_label_values(&["python_docker_pool_0"])
                .get(),
            0.0
        );
    }

    #[tokio::test]
    async fn gauges_record_container_usage() {
        let (_sim, telemetry, dispatcher) = dispatcher_with_pools(&python_docker_pool(1)).await;
        let f = function("hello", "python", "print(\"hi\")", 5);
        dispatcher.execute(&f, Technology::Docker, &gen_tid()).await.unwrap();
        assert!(
            telemetry
                .container_cpu
                .with_label_values(&["python_docker_pool_0"])
                .get()
                > 0.0
        );
        assert!(
            telemetry
                .container_memory
                .with_label_values(&["python_docker_pool_0"])
                .get()
                > 0.0
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_invocations_stage_disjoint_paths() {
        let (sim, _telemetry, dispatcher) = dispatcher_with_pools(&python_docker_pool(1)).await;
        let f = function("hello", "python", "print(\"hi\")", 5);
        let d1 = dispatcher.clone();
        let d2 = dispatcher.clone();
        let f1 = f.clone();
        let f2 = f.clone();
        let tid1 = gen_tid();
        let tid2 = gen_tid();
        let (r1, r2) = tokio::join!(
            d1.execute(&f1, Technology::Docker, &tid1),
            d2.execute(&f2, Technology::Docker, &tid2),
        );
        r1.unwrap();
        r2.unwrap();
        // same warm container, two distinct invocation-scoped archive paths
        let staged = sim.staged_archives();
        assert_eq!(staged.len(), 2);
        let p1 = packaging::read_single_entry(&staged[0].1).0;
        let p2 = packaging::read_single_entry(&staged[1].1).0;
        assert_ne!(p1, p2);
        assert!(p1.ends_with("/main.py"));
        assert!(p2.ends_with("/main.py"));
    }
}
