use hearth_library::types::{Language, Technology};
use parking_lot::RwLock;
use std::fmt::Display;
use std::sync::Arc;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
/// Identifies one warm container pool.
pub struct PoolKey {
    pub technology: Technology,
    pub language: Language,
}
impl PoolKey {
    pub fn new(technology: Technology, language: Language) -> Self {
        PoolKey { technology, language }
    }

    /// Deterministic name for the pool member at `index`, used to find
    /// containers again across worker restarts.
    pub fn container_name(&self, index: u32) -> String {
        format!("{}_{}_pool_{}", self.language, self.technology, index)
    }
}
impl Display for PoolKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.technology, self.language)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
/// Last observed lifecycle state of a warm container.
pub enum ContainerState {
    Unknown,
    Stopped,
    Running,
}

/// One long-lived warm container.
/// Owned by its pool for the process lifetime; invocations borrow it but never destroy it.
#[derive(Debug)]
pub struct ContainerHandle {
    /// engine-assigned identifier
    pub container_id: String,
    pub name: String,
    pub key: PoolKey,
    state: RwLock<ContainerState>,
}
impl ContainerHandle {
    pub fn new(container_id: String, name: String, key: PoolKey, state: ContainerState) -> Self {
        ContainerHandle {
            container_id,
            name,
            key,
            state: RwLock::new(state),
        }
    }

    pub fn state(&self) -> ContainerState {
        *self.state.read()
    }
    pub fn set_state(&self, state: ContainerState) {
        *self.state.write() = state;
    }
}

pub type Container = Arc<ContainerHandle>;

#[derive(Debug)]
/// No healthy pool exists for the requested (technology, language) pair.
/// A capacity condition, retryable against the other technology.
pub struct PoolUnavailableError {
    pub key: PoolKey,
}
impl PoolUnavailableError {
    pub fn boxed(key: PoolKey) -> anyhow::Error {
        anyhow::Error::new(PoolUnavailableError { key })
    }
}
impl Display for PoolUnavailableError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(f, "No warm container pool available for {}", self.key)?;
        Ok(())
    }
}
impl std::error::Error for PoolUnavailableError {}

#[derive(Debug)]
/// The engine rejected a start of a stopped warm container.
pub struct ContainerStartError {
    pub message: String,
}
impl ContainerStartError {
    pub fn boxed(message: impl Into<String>) -> anyhow::Error {
        anyhow::Error::new(ContainerStartError {
            message: message.into(),
        })
    }
}
impl Display for ContainerStartError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(f, "Container start failed: {}", self.message)?;
        Ok(())
    }
}
impl std::error::Error for ContainerStartError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_names_are_deterministic() {
        let key = PoolKey::new(Technology::Docker, Language::Python);
        assert_eq!(key.container_name(0), "python_docker_pool_0");
        assert_eq!(key.container_name(3), "python_docker_pool_3");
        let key = PoolKey::new(Technology::Gvisor, Language::Javascript);
        assert_eq!(key.container_name(1), "javascript_gvisor_pool_1");
    }

    #[test]
    fn handle_state_updates() {
        let key = PoolKey::new(Technology::Docker, Language::Python);
        let handle = ContainerHandle::new("cid".to_string(), key.container_name(0), key, ContainerState::Unknown);
        assert_eq!(handle.state(), ContainerState::Unknown);
        handle.set_state(ContainerState::Running);
        assert_eq!(handle.state(), ContainerState::Running);
    }
}
