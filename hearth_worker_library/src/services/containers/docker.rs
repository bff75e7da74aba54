use super::structs::{ContainerState, PoolKey};
use super::{ContainerEngine, ContainerStats, ExecOutput};
use anyhow::Result;
use bollard::container::{
    InspectContainerOptions, ListContainersOptions, RemoveContainerOptions, StatsOptions, UploadToContainerOptions,
};
use bollard::container::{Config, CreateContainerOptions, LogOutput};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::models::HostConfig;
use bollard::Docker;
use futures::StreamExt;
use hearth_library::{bail_error, transaction::TransactionId};
use std::collections::HashMap;
use tracing::{debug, error, info, warn};

const OWNER_TAG: &str = "owner=hearth_worker";

/// Engine client over the local Docker daemon.
/// gVisor containers go through the same daemon with the `runsc` runtime
/// requested at creation time.
pub struct DockerEngine {
    docker_api: Docker,
}

impl DockerEngine {
    pub async fn supported(tid: &TransactionId) -> bool {
        let docker = match Docker::connect_with_socket_defaults() {
            Ok(d) => d,
            Err(e) => {
                warn!(tid=tid, error=%e, "Failed to connect to docker");
                return false;
            },
        };
        match docker.ping().await {
            Ok(_) => true,
            Err(e) => {
                warn!(tid=tid, error=?e, "Failed to query docker version");
                false
            },
        }
    }

    pub fn new(tid: &TransactionId) -> Result<Self> {
        let docker = match Docker::connect_with_socket_defaults() {
            Ok(d) => d,
            Err(e) => bail_error!(tid=tid, error=%e, "Failed to connect to docker"),
        };
        Ok(DockerEngine { docker_api: docker })
    }
}

#[async_trait::async_trait]
impl ContainerEngine for DockerEngine {
    async fn ping(&self, tid: &TransactionId) -> Result<()> {
        match self.docker_api.ping().await {
            Ok(_) => Ok(()),
            Err(e) => bail_error!(tid=tid, error=%e, "Failed to ping docker"),
        }
    }

    async fn create_container(&self, name: &str, image: &str, key: &PoolKey, tid: &TransactionId) -> Result<String> {
        let host_config = HostConfig {
            runtime: key.technology.runtime().map(|r| r.to_owned()),
            auto_remove: Some(false),
            ..Default::default()
        };
        let options = CreateContainerOptions { name, platform: None };
        let config: Config<String> = Config {
            labels: Some(HashMap::from([("owner".to_owned(), "hearth_worker".to_owned())])),
            image: Some(image.to_owned()),
            // keep-alive so the container idles between invocations
            cmd: Some(vec!["tail".to_owned(), "-f".to_owned(), "/dev/null".to_owned()]),
            host_config: Some(host_config),
            ..Default::default()
        };
        debug!(tid=tid, name=%name, image=%image, key=%key, "Creating pool container");
        let resp = match self.docker_api.create_container(Some(options), config).await {
            Ok(r) => r,
            Err(e) => bail_error!(tid=tid, error=%e, name=%name, "Error creating container"),
        };
        match self.docker_api.start_container::<String>(name, None).await {
            Ok(_) => (),
            Err(e) => bail_error!(tid=tid, error=%e, name=%name, "Error starting container"),
        };
        info!(tid=tid, name=%name, container_id=%resp.id, "Pool container created and started");
        Ok(resp.id)
    }

    async fn get_container(&self, name: &str, tid: &TransactionId) -> Result<Option<String>> {
        match self
            .docker_api
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
        {
            Ok(info) => Ok(info.id),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(None),
            Err(e) => bail_error!(tid=tid, error=%e, name=%name, "Failed to inspect container"),
        }
    }

    async fn container_state(&self, container_id: &str, tid: &TransactionId) -> Result<ContainerState> {
        let info = match self
            .docker_api
            .inspect_container(container_id, None::<InspectContainerOptions>)
            .await
        {
            Ok(i) => i,
            Err(e) => bail_error!(tid=tid, error=%e, container_id=%container_id, "Failed to inspect container state"),
        };
        Ok(match info.state.and_then(|s| s.running) {
            Some(true) => ContainerState::Running,
            Some(false) => ContainerState::Stopped,
            None => ContainerState::Unknown,
        })
    }

    async fn start_container(&self, container_id: &str, tid: &TransactionId) -> Result<()> {
        match self.docker_api.start_container::<String>(container_id, None).await {
            Ok(_) => Ok(()),
            Err(e) => bail_error!(tid=tid, error=%e, container_id=%container_id, "Error starting container"),
        }
    }

    async fn exec(&self, container_id: &str, cmd: Vec<String>, tid: &TransactionId) -> Result<ExecOutput> {
        let options = CreateExecOptions::<String> {
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            cmd: Some(cmd),
            ..Default::default()
        };
        let exec = match self.docker_api.create_exec(container_id, options).await {
            Ok(e) => e,
            Err(e) => bail_error!(tid=tid, error=%e, container_id=%container_id, "Error creating exec in container"),
        };
        let mut stdout = String::new();
        let mut stderr = String::new();
        match self.docker_api.start_exec(&exec.id, None).await {
            Ok(StartExecResults::Attached { mut output, .. }) => {
                while let Some(res) = output.next().await {
                    match res {
                        Ok(LogOutput::StdOut { message }) => stdout.push_str(&String::from_utf8_lossy(&message)),
                        Ok(LogOutput::StdErr { message }) => stderr.push_str(&String::from_utf8_lossy(&message)),
                        Ok(_) => (),
                        Err(e) => bail_error!(tid=tid, error=%e, container_id=%container_id, "Failed reading exec output stream"),
                    }
                }
            },
            Ok(StartExecResults::Detached) => (),
            Err(e) => bail_error!(tid=tid, error=%e, container_id=%container_id, "Error starting exec in container"),
        }
        let inspect = match self.docker_api.inspect_exec(&exec.id).await {
            Ok(i) => i,
            Err(e) => bail_error!(tid=tid, error=%e, container_id=%container_id, "Failed to inspect exec result"),
        };
        Ok(ExecOutput {
            stdout,
            stderr,
            exit_code: inspect.exit_code.unwrap_or(-1),
        })
    }

    async fn copy_archive_in(
        &self,
        container_id: &str,
        dest_path: &str,
        archive: Vec<u8>,
        tid: &TransactionId,
    ) -> Result<()> {
        let options = UploadToContainerOptions {
            path: dest_path.to_owned(),
            ..Default::default()
        };
        match self
            .docker_api
            .upload_to_container(container_id, Some(options), archive.into())
            .await
        {
            Ok(_) => Ok(()),
            Err(e) => bail_error!(tid=tid, error=%e, container_id=%container_id, "Failed to upload archive to container"),
        }
    }

    async fn container_stats(&self, container_id: &str, tid: &TransactionId) -> Result<ContainerStats> {
        let options = StatsOptions {
            stream: false,
            one_shot: true,
        };
        let mut stream = self.docker_api.stats(container_id, Some(options));
        while let Some(res) = stream.next().await {
            match res {
                Ok(stats) => {
                    return Ok(ContainerStats {
                        cpu_total: stats.cpu_stats.cpu_usage.total_usage as f64,
                        memory_bytes: stats.memory_stats.usage.unwrap_or(0) as f64,
                    });
                },
                Err(e) => bail_error!(tid=tid, error=%e, container_id=%container_id, "Failed to query stats"),
            }
        }
        anyhow::bail!("Stats stream for container '{}' returned no data", container_id)
    }

    async fn remove_owned_containers(&self, tid: &TransactionId) -> Result<()> {
        let options = ListContainersOptions {
            all: true,
            limit: None,
            size: false,
            filters: HashMap::from_iter(vec![("label", vec![OWNER_TAG])]),
        };
        let list = match self.docker_api.list_containers(Some(options)).await {
            Ok(l) => l,
            Err(e) => bail_error!(tid=tid, error=%e, "Failed to list owned containers"),
        };
        for container in list {
            if let Some(id) = container.id {
                let options = RemoveContainerOptions {
                    force: true,
                    v: true,
                    link: false,
                };
                match self.docker_api.remove_container(&id, Some(options)).await {
                    Ok(_) => debug!(tid=tid, container_id=%id, "Removed owned container"),
                    Err(e) => error!(tid=tid, error=%e, container_id=%id, "Failed to remove owned container"),
                }
            };
        }
        Ok(())
    }
}
