use anyhow::Result;
use hearth_library::{bail_error, transaction::TransactionId};
use std::path::Path;

/// Wrap function source into a single-entry tar archive ready for injection
/// into a running container.
///
/// The source is written to a file under `host_dir` first, then archived
/// under `archive_path` (the invocation-scoped path fragment the container
/// will see under its sandbox root). Pure aside from the host temp file.
pub fn package(source: &str, host_dir: &Path, archive_path: &str, tid: &TransactionId) -> Result<Vec<u8>> {
    let file_name = match Path::new(archive_path).file_name() {
        Some(f) => f,
        None => anyhow::bail!("Archive path '{}' has no file name", archive_path),
    };
    let host_file = host_dir.join(file_name);
    if let Err(e) = std::fs::write(&host_file, source) {
        bail_error!(tid=tid, error=%e, path=%host_file.display(), "Failed to write function source to host file");
    }
    let mut builder = tar::Builder::new(Vec::new());
    if let Err(e) = builder.append_path_with_name(&host_file, archive_path) {
        bail_error!(tid=tid, error=%e, path=%host_file.display(), "Failed to add function source to archive");
    }
    match builder.into_inner() {
        Ok(bytes) => Ok(bytes),
        Err(e) => bail_error!(tid=tid, error=%e, "Failed to finalize function archive"),
    }
}

/// Unpack a single-entry archive into (path, contents). Test support.
#[cfg(test)]
pub(crate) fn read_single_entry(bytes: &[u8]) -> (String, String) {
    use std::io::Read;
    let mut archive = tar::Archive::new(std::io::Cursor::new(bytes));
    let mut entries = archive.entries().unwrap();
    let mut entry = entries.next().expect("archive should have one entry").unwrap();
    let path = entry.path().unwrap().to_string_lossy().to_string();
    let mut contents = String::new();
    entry.read_to_string(&mut contents).unwrap();
    assert!(entries.next().is_none(), "archive should have exactly one entry");
    (path, contents)
}
