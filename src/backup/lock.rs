// dbbackup/src/backup/lock.rs
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::errors::{BackupError, Result};

/// Lock file kept inside the backup directory. Hidden and without the archive
/// extension, so rotation never looks at it.
pub const LOCK_FILE_NAME: &str = ".dbbackup.lock";

/// Exclusive advisory lock on a backup directory.
///
/// Held for the whole backup-and-rotate cycle. It is keyed by the directory, not
/// by the service, so separate processes (a running scheduler and a manual
/// `backup`) exclude each other as well. Released when dropped.
#[derive(Debug)]
pub struct DirLock {
    _file: File,
    path: PathBuf,
}

impl DirLock {
    /// Takes the lock without waiting.
    ///
    /// Fails with [`BackupError::BackupInProgress`] if another holder has it.
    /// The directory must already exist.
    pub fn try_acquire(backup_dir: &Path) -> Result<Self> {
        let path = backup_dir.join(LOCK_FILE_NAME);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| BackupError::archive_write(&path, e))?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                debug!(lock = %path.display(), "Acquired backup directory lock");
                Ok(DirLock { _file: file, path })
            }
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => Err(BackupError::BackupInProgress {
                backup_dir: backup_dir.to_path_buf(),
            }),
            Err(e) => Err(BackupError::archive_write(&path, e)),
        }
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        // Closing the file releases the lock; the file itself stays for the next run.
        debug!(lock = %self.path.display(), "Released backup directory lock");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_holder_is_turned_away() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;

        let held = DirLock::try_acquire(dir.path())?;
        match DirLock::try_acquire(dir.path()) {
            Err(BackupError::BackupInProgress { backup_dir }) => assert_eq!(backup_dir, dir.path()),
            other => panic!("expected BackupInProgress, got {:?}", other),
        }

        drop(held);
        let _again = DirLock::try_acquire(dir.path())?;
        assert!(dir.path().join(LOCK_FILE_NAME).is_file());
        Ok(())
    }

    #[test]
    fn test_separate_directories_do_not_contend() -> anyhow::Result<()> {
        let first = tempfile::tempdir()?;
        let second = tempfile::tempdir()?;

        let _a = DirLock::try_acquire(first.path())?;
        let _b = DirLock::try_acquire(second.path())?;
        Ok(())
    }

    #[test]
    fn test_missing_directory_is_an_io_failure() {
        let err = DirLock::try_acquire(Path::new("/nonexistent/dbbackup/dir")).unwrap_err();
        assert!(matches!(err, BackupError::ArchiveWriteFailed { .. }));
    }
}
