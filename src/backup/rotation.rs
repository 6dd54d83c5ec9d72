// dbbackup/src/backup/rotation.rs
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::backup::archive::ARCHIVE_EXTENSION;
use crate::errors::BackupError;

/// What a rotation pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RotationReport {
    pub deleted: Vec<PathBuf>,
    pub kept: usize,
    pub failed: Vec<(PathBuf, String)>,
}

impl RotationReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    /// The warning to surface alongside a successful run, if any deletion failed.
    pub fn warning(&self) -> Option<BackupError> {
        (!self.is_clean()).then(|| BackupError::RotationPartialFailure {
            failed_files: self.failed.clone(),
        })
    }
}

/// Deletes `*.sql.gz` archives in `backup_dir` last modified more than `retention` before `now`.
///
/// Only regular files directly inside the directory are considered. Other files,
/// including in-flight `.partial` archives, are left alone. A file that cannot be
/// inspected or deleted is recorded in the report and the pass moves on.
pub fn rotate_archives(backup_dir: &Path, retention: Duration, now: SystemTime) -> RotationReport {
    rotate_archives_with(backup_dir, retention, now, |path| fs::remove_file(path))
}

/// [`rotate_archives`] with the per-file deletion supplied by the caller.
pub fn rotate_archives_with<F>(backup_dir: &Path, retention: Duration, now: SystemTime, mut remove: F) -> RotationReport
where
    F: FnMut(&Path) -> io::Result<()>,
{
    let mut report = RotationReport::default();
    let Some(cutoff) = now.checked_sub(retention) else {
        return report;
    };

    debug!(dir = %backup_dir.display(), retention_secs = retention.as_secs(), "Rotating archives");

    for entry in WalkDir::new(backup_dir).min_depth(1).max_depth(1) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let path = e.path().unwrap_or(backup_dir).to_path_buf();
                warn!(path = %path.display(), error = %e, "Failed to read backup directory entry");
                report.failed.push((path, e.to_string()));
                continue;
            }
        };

        let is_archive = entry.file_type().is_file()
            && entry.file_name().to_string_lossy().ends_with(ARCHIVE_EXTENSION);
        if !is_archive {
            continue;
        }

        let path = entry.path();
        let modified = match entry.metadata().map_err(|e| e.to_string()).and_then(|m| m.modified().map_err(|e| e.to_string())) {
            Ok(modified) => modified,
            Err(reason) => {
                warn!(path = %path.display(), error = %reason, "Failed to read archive modification time");
                report.failed.push((path.to_path_buf(), reason));
                continue;
            }
        };

        if modified >= cutoff {
            report.kept += 1;
            continue;
        }

        match remove(path) {
            Ok(()) => {
                info!(path = %path.display(), "🗑 Deleted expired archive");
                report.deleted.push(path.to_path_buf());
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to delete expired archive");
                report.failed.push((path.to_path_buf(), e.to_string()));
            }
        }
    }

    report
}
