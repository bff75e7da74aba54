use config::{Config, File};
use hearth_library::logging::LoggingConfig;
use hearth_library::types::{Language, Technology};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct Configuration {
    /// name for the server
    pub name: String,
    /// address to listen on
    pub address: String,
    /// port to listen on
    pub port: u16,
    /// request timeout length in seconds
    pub timeout_sec: u64,
    /// See documentation [here](https://docs.rs/tokio/latest/tokio/runtime/struct.Builder.html#method.event_interval) for details
    pub tokio_event_interval: Option<u32>,
    /// See documentation [here](https://docs.rs/tokio/latest/tokio/runtime/struct.Builder.html#method.global_queue_interval) for details
    pub tokio_queue_interval: Option<u32>,
    /// Restrictions on functions on registration
    pub limits: Arc<FunctionLimits>,
    pub logging: Arc<LoggingConfig>,
    pub container_resources: Arc<ContainerResourceConfig>,
}

#[derive(Debug, Deserialize)]
/// limits to place on an individual function
pub struct FunctionLimits {
    /// maximum declared timeout allowed at registration, in seconds
    pub timeout_sec: u64,
}

fn default_sandbox_root() -> String {
    "/hearth".to_string()
}

#[derive(Debug, Deserialize)]
/// The warm container fleet the worker maintains
pub struct ContainerResourceConfig {
    /// shared in-container root under which invocation workdirs are created
    #[serde(default = "default_sandbox_root")]
    pub sandbox_root: String,
    /// one entry per (technology, language) pool to keep warm
    pub pools: Vec<PoolConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PoolConfig {
    pub technology: Technology,
    pub language: Language,
    /// number of warm containers to maintain, fixed after startup
    pub count: u32,
    /// base image override; defaults per language
    pub image: Option<String>,
}
impl PoolConfig {
    pub fn image(&self) -> String {
        match &self.image {
            Some(i) => i.clone(),
            None => match self.language {
                Language::Python => "python:3.11-slim",
                Language::Javascript => "node:20-slim",
            }
            .to_string(),
        }
    }
}

/// A wrapper type for the loaded global worker configuration
pub type WorkerConfig = Arc<Configuration>;

impl Configuration {
    pub fn new(config_fpath: &Option<&str>, overrides: Option<Vec<(String, String)>>) -> anyhow::Result<Self> {
        let mut sources = vec!["hearth_worker/src/worker.json", "hearth_worker/src/worker.dev.json"];
        if let Some(config_fpath) = config_fpath {
            sources.push(config_fpath);
        }
        let mut s = Config::builder()
            .add_source(
                sources
                    .iter()
                    .filter(|path| std::path::Path::new(&path).exists())
                    .map(|path| File::with_name(path))
                    .collect::<Vec<_>>(),
            )
            .add_source(
                config::Environment::with_prefix("HEARTH_WORKER")
                    .try_parsing(true)
                    .separator("__"),
            );
        if let Some(overrides) = overrides {
            for (k, v) in overrides {
                s = match s.set_override(&k, v.clone()) {
                    Ok(s) => s,
                    Err(e) => {
                        anyhow::bail!("Failed to set override '{}' to '{}' because {}", k, v, e)
                    },
                };
            }
        }
        match s.build() {
            Ok(s) => match s.try_deserialize() {
                Ok(cfg) => Ok(cfg),
                Err(e) => anyhow::bail!("Failed to deserialize configuration because '{}'", e),
            },
            Err(e) => anyhow::bail!("Failed to build configuration because '{}'", e),
        }
    }

    pub fn boxed(config_fpath: &Option<&str>, overrides: Option<Vec<(String, String)>>) -> anyhow::Result<WorkerConfig> {
        Ok(Arc::new(Configuration::new(config_fpath, overrides)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    const SAMPLE: &str = r#"{
      "name": "test-worker",
      "address": "127.0.0.1",
      "port": 8070,
      "timeout_sec": 300,
      "limits": { "timeout_sec": 60 },
      "logging": { "level": "info", "directory": "", "basename": "worker", "stdout": true, "spanning": "NONE" },
      "container_resources": {
        "pools": [
          { "technology": "docker", "language": "python", "count": 2 },
          { "technology": "gvisor", "language": "javascript", "count": 1, "image": "node:18-slim" }
        ]
      }
    }"#;

    fn parse(json: &str) -> Configuration {
        Config::builder()
            .add_source(File::from_str(json, FileFormat::Json))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn sample_config_parses() {
        let cfg = parse(SAMPLE);
        assert_eq!(cfg.name, "test-worker");
        assert_eq!(cfg.container_resources.sandbox_root, "/hearth");
        assert_eq!(cfg.container_resources.pools.len(), 2);
        let p = &cfg.container_resources.pools[0];
        assert_eq!(p.technology, Technology::Docker);
        assert_eq!(p.language, Language::Python);
        assert_eq!(p.image(), "python:3.11-slim");
        let p = &cfg.container_resources.pools[1];
        assert_eq!(p.technology, Technology::Gvisor);
        assert_eq!(p.image(), "node:18-slim");
    }

    #[test]
    fn unknown_technology_is_rejected() {
        let bad = SAMPLE.replace("\"gvisor\"", "\"firecracker\"");
        let res: Result<Configuration, _> = Config::builder()
            .add_source(File::from_str(&bad, FileFormat::Json))
            .build()
            .unwrap()
            .try_deserialize();
        assert!(res.is_err());
    }
}
