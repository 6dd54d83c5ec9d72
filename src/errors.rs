use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::backup::RunOutcome;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Malformed connection locator: {locator}")]
    MalformedConnectionLocator { locator: String },

    #[error("Failed to spawn dump tool '{tool}': {source}")]
    DumpProcessSpawnFailed {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Dump tool exited with {}{}", describe_exit(.exit_code), describe_stderr(.stderr_tail))]
    DumpProcessFailed {
        exit_code: Option<i32>,
        stderr_tail: String,
    },

    #[error("Dump tool did not finish within {}s and was killed", .timeout.as_secs())]
    DumpTimedOut { timeout: Duration },

    #[error("Failed to write archive {}: {source}", .path.display())]
    ArchiveWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Archive already exists: {}", .path.display())]
    ArchiveAlreadyExists { path: PathBuf },

    #[error("Rotation could not delete {} file(s): {}", .failed_files.len(), describe_failed(.failed_files))]
    RotationPartialFailure { failed_files: Vec<(PathBuf, String)> },

    #[error("A backup is already in progress for {}", .backup_dir.display())]
    BackupInProgress { backup_dir: PathBuf },
}

impl BackupError {
    /// Outcome recorded on the run that ended with this error.
    pub fn outcome(&self) -> RunOutcome {
        match self {
            BackupError::MalformedConnectionLocator { .. }
            | BackupError::DumpProcessSpawnFailed { .. }
            | BackupError::DumpProcessFailed { .. }
            | BackupError::DumpTimedOut { .. } => RunOutcome::FailedProcess,
            BackupError::ArchiveWriteFailed { .. }
            | BackupError::ArchiveAlreadyExists { .. }
            | BackupError::RotationPartialFailure { .. } => RunOutcome::FailedIo,
            BackupError::BackupInProgress { .. } => RunOutcome::SkippedBusy,
        }
    }

    pub(crate) fn archive_write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BackupError::ArchiveWriteFailed {
            path: path.into(),
            source,
        }
    }
}

fn describe_exit(exit_code: &Option<i32>) -> String {
    match exit_code {
        Some(code) => format!("code {}", code),
        None => "no exit code (terminated by signal)".to_string(),
    }
}

fn describe_stderr(stderr_tail: &str) -> String {
    if stderr_tail.is_empty() {
        String::new()
    } else {
        format!("; stderr: {}", stderr_tail)
    }
}

fn describe_failed(failed_files: &[(PathBuf, String)]) -> String {
    failed_files
        .iter()
        .map(|(path, reason)| format!("{} ({})", path.display(), reason))
        .collect::<Vec<_>>()
        .join(", ")
}

pub type Result<T> = std::result::Result<T, BackupError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn process_failure_message_includes_exit_code_and_stderr() {
        let err = BackupError::DumpProcessFailed {
            exit_code: Some(2),
            stderr_tail: "Access denied for user 'root'".to_string(),
        };
        let message = err.to_string();
        assert!(message.contains("code 2"));
        assert!(message.contains("Access denied"));
        assert_eq!(err.outcome(), RunOutcome::FailedProcess);
    }

    #[test]
    fn signal_termination_has_no_exit_code() {
        let err = BackupError::DumpProcessFailed {
            exit_code: None,
            stderr_tail: String::new(),
        };
        assert!(err.to_string().contains("terminated by signal"));
        assert!(!err.to_string().contains("stderr"));
    }

    #[test]
    fn io_errors_map_to_failed_io() {
        let err = BackupError::ArchiveAlreadyExists {
            path: PathBuf::from("/backups/2024-01-01_00-00-00_library.sql.gz"),
        };
        assert_eq!(err.outcome(), RunOutcome::FailedIo);

        let err = BackupError::archive_write(
            "/backups/x.sql.gz",
            std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
        );
        assert_eq!(err.outcome(), RunOutcome::FailedIo);
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn rotation_failure_lists_every_file() {
        let err = BackupError::RotationPartialFailure {
            failed_files: vec![
                (PathBuf::from("a.sql.gz"), "permission denied".to_string()),
                (PathBuf::from("b.sql.gz"), "not found".to_string()),
            ],
        };
        let message = err.to_string();
        assert!(message.starts_with("Rotation could not delete 2 file(s)"));
        assert!(message.contains("a.sql.gz (permission denied)"));
        assert!(message.contains("b.sql.gz (not found)"));
    }
}
