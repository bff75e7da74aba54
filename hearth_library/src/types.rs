use anyhow::Error;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::str::FromStr;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
/// The container virtualization backend an invocation runs under.
pub enum Technology {
    Docker,
    Gvisor,
}
impl Technology {
    /// The engine-level runtime name to request at container creation.
    /// [None] means the engine default (runc).
    pub fn runtime(&self) -> Option<&'static str> {
        match self {
            Technology::Docker => None,
            Technology::Gvisor => Some("runsc"),
        }
    }

    /// Permissive parse for the execute API boundary: unknown or missing
    /// values fall back to [Technology::Docker].
    /// Everywhere else uses the strict [FromStr] impl.
    pub fn parse_lenient(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "gvisor" => Technology::Gvisor,
            _ => Technology::Docker,
        }
    }
}
impl FromStr for Technology {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "docker" => Ok(Technology::Docker),
            "gvisor" => Ok(Technology::Gvisor),
            _ => anyhow::bail!("Cannot parse {:?} for Technology", s),
        }
    }
}
impl Display for Technology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Technology::Docker => f.write_str("docker"),
            Technology::Gvisor => f.write_str("gvisor"),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
/// The language runtime a registered function is written for.
pub enum Language {
    Python,
    Javascript,
}
impl Language {
    /// File name the staged source is written under inside the container.
    pub fn entrypoint(&self) -> &'static str {
        match self {
            Language::Python => "main.py",
            Language::Javascript => "main.js",
        }
    }

    /// Interpreter binary expected inside the language's base image.
    pub fn interpreter(&self) -> &'static str {
        match self {
            Language::Python => "python3",
            Language::Javascript => "node",
        }
    }
}
impl FromStr for Language {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "python" => Ok(Language::Python),
            "javascript" => Ok(Language::Javascript),
            _ => anyhow::bail!("Cannot parse {:?} for Language", s),
        }
    }
}
impl Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Language::Python => f.write_str("python"),
            Language::Javascript => f.write_str("javascript"),
        }
    }
}
