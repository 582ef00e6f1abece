use std::path::{Path, PathBuf};

use log::{info, warn};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Could not move {path} to {backup}: {error}")]
    Relocate {
        path: String,
        backup: String,
        error: std::io::Error,
    },
}

/// First `<path>_bak_<n>` (n = 1, 2, ...) that does not exist yet.
pub fn backup_path(path: &Path) -> PathBuf {
    let mut index = 1u32;
    loop {
        let mut candidate = path.as_os_str().to_owned();
        candidate.push(format!("_bak_{index}"));
        let candidate = PathBuf::from(candidate);
        // symlink_metadata so that a dangling link still counts as taken
        if candidate.symlink_metadata().is_err() {
            return candidate;
        }
        index += 1;
    }
}

/// Moves whatever lives at `path` to a fresh backup location and returns it.
///
/// A rename is used, so the move either happens completely or not at all.
/// Crossing filesystems is reported as an error instead of falling back to a copy.
pub fn relocate(path: &Path) -> Result<PathBuf, BackupError> {
    let backup = backup_path(path);
    info!("Moving {} to {}", path.display(), backup.display());
    std::fs::rename(path, &backup).map_err(|error| {
        warn!("Backup of {} failed: {}", path.display(), error);
        BackupError::Relocate {
            path: path.to_string_lossy().to_string(),
            backup: backup.to_string_lossy().to_string(),
            error,
        }
    })?;
    Ok(backup)
}
