mod logic;
pub(crate) mod archive;  // gzip streaming with temp-then-rename
pub(crate) mod db_dump;  // dump tool child process
pub(crate) mod lock;     // per-directory run lock
pub(crate) mod rotation; // retention pass over the backup directory
pub(crate) mod target;   // connection locator parsing

pub use logic::BackupService;

use chrono::{DateTime, Local};
use std::fmt;
use std::path::PathBuf;
use tracing::{error, info, warn};

use crate::backup::rotation::RotationReport;

/// Who started a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerSource {
    Scheduled,
    Manual,
}

impl fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerSource::Scheduled => f.write_str("scheduled"),
            TriggerSource::Manual => f.write_str("manual"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Success,
    FailedProcess,
    FailedIo,
    SkippedDisabled,
    /// Another run held the backup directory.
    SkippedBusy,
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RunOutcome::Success => "success",
            RunOutcome::FailedProcess => "failed-process",
            RunOutcome::FailedIo => "failed-io",
            RunOutcome::SkippedDisabled => "skipped-disabled",
            RunOutcome::SkippedBusy => "skipped-busy",
        };
        f.write_str(label)
    }
}

/// One backup-and-rotate cycle, as reported to whoever triggered it.
#[derive(Debug, Clone)]
pub struct BackupRun {
    pub trigger: TriggerSource,
    pub started_at: DateTime<Local>,
    pub archive_path: Option<PathBuf>,
    pub outcome: RunOutcome,
    pub rotation: Option<RotationReport>,
    /// Failure message for failed runs; rotation warning for successful ones.
    pub error: Option<String>,
}

impl BackupRun {
    pub(crate) fn skipped(trigger: TriggerSource, started_at: DateTime<Local>, outcome: RunOutcome) -> Self {
        BackupRun {
            trigger,
            started_at,
            archive_path: None,
            outcome,
            rotation: None,
            error: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == RunOutcome::Success
    }
}

/// Sink for finished scheduled runs.
pub trait RunReporter: Send + Sync {
    fn report(&self, run: &BackupRun);
}

/// Default reporter: one structured log line per run.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl RunReporter for TracingReporter {
    fn report(&self, run: &BackupRun) {
        let started_at = run.started_at.format("%Y-%m-%d %H:%M:%S").to_string();
        match run.outcome {
            RunOutcome::Success => {
                let path = run.archive_path.as_ref().map(|p| p.display().to_string()).unwrap_or_default();
                let deleted = run.rotation.as_ref().map_or(0, |r| r.deleted.len());
                info!(trigger = %run.trigger, started_at = %started_at, path = %path, deleted, "✅ Backup completed");
                if let Some(warning) = &run.error {
                    warn!(trigger = %run.trigger, started_at = %started_at, warning = %warning, "Backup completed with rotation warnings");
                }
            }
            RunOutcome::SkippedDisabled | RunOutcome::SkippedBusy => {
                info!(trigger = %run.trigger, started_at = %started_at, outcome = %run.outcome, "Backup skipped");
            }
            RunOutcome::FailedProcess | RunOutcome::FailedIo => {
                let message = run.error.as_deref().unwrap_or("unknown error");
                error!(trigger = %run.trigger, started_at = %started_at, outcome = %run.outcome, error = %message, "❌ Backup failed");
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::{BackupRun, RunReporter};
    use crate::config::{BackupConfig, DatabaseCredentials};
    use std::path::{Path, PathBuf};
    use std::time::Duration;
    use tokio::sync::mpsc;

    pub fn test_config(backup_dir: &Path, dump_tool: &str) -> BackupConfig {
        BackupConfig {
            enabled: true,
            backup_dir: backup_dir.to_path_buf(),
            retention: Duration::from_secs(14 * 24 * 60 * 60),
            dump_tool_path: dump_tool.to_string(),
            database_url: "jdbc:mysql://localhost:3306/library".to_string(),
            credentials: DatabaseCredentials {
                username: "root".to_string(),
                password: "secret".to_string(),
            },
            schedule: None,
            dump_timeout: None,
        }
    }

    /// Writes an executable `sh` script standing in for the dump tool.
    #[cfg(unix)]
    pub fn fake_tool(dir: &Path, body: &str) -> std::io::Result<PathBuf> {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("fake-mysqldump.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body))?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
        Ok(path)
    }

    pub struct ChannelReporter {
        tx: mpsc::UnboundedSender<BackupRun>,
    }

    impl ChannelReporter {
        pub fn new() -> (Self, mpsc::UnboundedReceiver<BackupRun>) {
            let (tx, rx) = mpsc::unbounded_channel();
            (ChannelReporter { tx }, rx)
        }
    }

    impl RunReporter for ChannelReporter {
        fn report(&self, run: &BackupRun) {
            let _ = self.tx.send(run.clone());
        }
    }
}
