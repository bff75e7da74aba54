use crate::transaction::TransactionId;
use anyhow::Result;
use std::path::{Path, PathBuf};
use tracing::warn;

pub const TEMP_DIR: &str = "/tmp/hearth";

/// Host-side staging directory for one invocation
pub fn invocation_path(invocation_id: &str) -> PathBuf {
    PathBuf::from(TEMP_DIR).join(invocation_id)
}

/// Tries to recursively remove the given directory.
/// Swallows any failure.
pub fn try_remove_dir<P: AsRef<Path>>(path: P, tid: &TransactionId) {
    let pth: &Path = path.as_ref();
    if !pth.exists() {
        return;
    }
    match std::fs::remove_dir_all(pth) {
        Ok(_) => {},
        Err(_) => warn!(tid=tid, path=%pth.display(), "Unable to remove directory"),
    };
}

pub fn ensure_dir<P: AsRef<Path>>(dir: P) -> Result<()> {
    match std::fs::create_dir_all(&dir) {
        Ok(_) => Ok(()),
        Err(e) => anyhow::bail!("Failed to create dir '{:?}' because '{}'", dir.as_ref().to_str(), e),
    }
}

/// Make sure the temp dir to use exists
pub fn ensure_temp_dir() -> Result<()> {
    ensure_dir(PathBuf::from(TEMP_DIR))
}
