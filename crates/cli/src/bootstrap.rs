//! Data directory preparation.

use std::path::{Path, PathBuf};

use {anyhow::Context, tracing::debug};

/// Layout of the data directory.
#[derive(Debug, Clone)]
pub struct DataDir {
    pub root: PathBuf,
    /// Stable id of this installation.
    pub instance: String,
}

/// Subdirectories created under the data directory.
const SUBDIRS: &[&str] = &["logs", "uploads", "certification"];

/// Create the directory tree, record the PID and load (or mint) the
/// instance UUID.
pub fn prepare(root: &Path) -> anyhow::Result<DataDir> {
    let dirs = std::iter::once(root.to_path_buf()).chain(SUBDIRS.iter().map(|d| root.join(d)));
    for dir in dirs {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }

    let pid = root.join("PID");
    std::fs::write(&pid, std::process::id().to_string())
        .with_context(|| format!("failed to write {}", pid.display()))?;

    let instance = instance_uuid(root)?;
    debug!(root = %root.display(), instance, "data directory ready");

    Ok(DataDir {
        root: root.to_path_buf(),
        instance,
    })
}

fn instance_uuid(root: &Path) -> anyhow::Result<String> {
    let path = root.join("UUID");
    if let Ok(existing) = std::fs::read_to_string(&path) {
        let existing = existing.trim();
        if uuid::Uuid::parse_str(existing).is_ok() {
            return Ok(existing.to_string());
        }
    }
    let fresh = uuid::Uuid::new_v4().to_string();
    std::fs::write(&path, &fresh).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(fresh)
}
