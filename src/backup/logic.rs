// dbbackup/src/backup/logic.rs
use chrono::{DateTime, Local};
use std::path::PathBuf;
use std::time::SystemTime;
use tracing::{info, warn};

use crate::backup::archive::{PendingArchive, archive_file_name};
use crate::backup::db_dump::DumpProcess;
use crate::backup::lock::DirLock;
use crate::backup::rotation::{RotationReport, rotate_archives};
use crate::backup::target::ConnectionTarget;
use crate::backup::{BackupRun, RunOutcome, TriggerSource};
use crate::config::BackupConfig;
use crate::errors::{BackupError, Result};

/// Runs backup-and-rotate cycles for one backup directory.
///
/// Both triggers share [`BackupService::execute`]; they differ only in how a
/// failure reaches the caller. At most one cycle runs per backup directory, across
/// services and processes: a second one is turned away with
/// [`BackupError::BackupInProgress`].
pub struct BackupService {
    config: BackupConfig,
}

struct CompletedBackup {
    archive_path: PathBuf,
    rotation: RotationReport,
}

impl BackupService {
    pub fn new(config: BackupConfig) -> Self {
        BackupService { config }
    }

    /// Manual trigger ("run backup now"). Failures are returned to the caller.
    pub async fn run_now(&self) -> Result<BackupRun> {
        let started_at = Local::now();
        if !self.config.enabled {
            info!("Backups are disabled; manual run skipped");
            return Ok(BackupRun::skipped(TriggerSource::Manual, started_at, RunOutcome::SkippedDisabled));
        }

        let completed = self.execute(started_at).await?;
        Ok(completed.into_run(TriggerSource::Manual, started_at))
    }

    /// Scheduled trigger. Never fails: errors end up in the returned run.
    pub async fn run_scheduled(&self) -> BackupRun {
        let started_at = Local::now();
        if !self.config.enabled {
            return BackupRun::skipped(TriggerSource::Scheduled, started_at, RunOutcome::SkippedDisabled);
        }

        match self.execute(started_at).await {
            Ok(completed) => completed.into_run(TriggerSource::Scheduled, started_at),
            Err(e) => BackupRun {
                trigger: TriggerSource::Scheduled,
                started_at,
                archive_path: None,
                outcome: e.outcome(),
                rotation: None,
                error: Some(e.to_string()),
            },
        }
    }

    /// Retention pass on its own, off the async worker threads.
    pub async fn rotate(&self) -> RotationReport {
        let backup_dir = self.config.backup_dir.clone();
        let retention = self.config.retention;
        let task_dir = backup_dir.clone();

        tokio::task::spawn_blocking(move || rotate_archives(&task_dir, retention, SystemTime::now()))
            .await
            .unwrap_or_else(|e| RotationReport {
                failed: vec![(backup_dir, format!("rotation task failed: {}", e))],
                ..RotationReport::default()
            })
    }

    async fn execute(&self, started_at: DateTime<Local>) -> Result<CompletedBackup> {
        let backup_dir = &self.config.backup_dir;
        let target = ConnectionTarget::parse(&self.config.database_url)?;

        tokio::fs::create_dir_all(backup_dir)
            .await
            .map_err(|e| BackupError::archive_write(backup_dir, e))?;
        let _lock = DirLock::try_acquire(backup_dir)?;
        info!(target = %target, dir = %backup_dir.display(), "🚀 Starting backup");

        let file_name = archive_file_name(started_at, &target.database);
        let mut pending = PendingArchive::create(backup_dir, &file_name)?;
        let mut process = DumpProcess::spawn(&self.config.dump_tool_path, &target, &self.config.credentials)?;

        if let Err(e) = self.stream_dump(&mut process, &mut pending).await {
            if matches!(e, BackupError::ArchiveWriteFailed { .. } | BackupError::DumpTimedOut { .. }) {
                process.abort().await;
            }
            warn!(
                path = %pending.final_path().display(),
                bytes_in = pending.bytes_in(),
                error = %e,
                "Discarding partial archive"
            );
            return Err(e);
        }

        let archive_path = pending.commit()?;
        let rotation = self.rotate().await;
        info!(
            deleted = rotation.deleted.len(),
            kept = rotation.kept,
            failed = rotation.failed.len(),
            "Retention pass finished"
        );

        Ok(CompletedBackup { archive_path, rotation })
    }

    /// Drains the dump into the archive, then checks the exit status, under the
    /// optional deadline.
    async fn stream_dump(&self, process: &mut DumpProcess, pending: &mut PendingArchive) -> Result<()> {
        let work = async {
            pending.write_from(process.stdout()).await?;
            process.wait_success().await
        };

        match self.config.dump_timeout {
            Some(limit) => tokio::time::timeout(limit, work)
                .await
                .map_err(|_| BackupError::DumpTimedOut { timeout: limit })?,
            None => work.await,
        }
    }
}

impl CompletedBackup {
    fn into_run(self, trigger: TriggerSource, started_at: DateTime<Local>) -> BackupRun {
        let warning = self.rotation.warning().map(|w| w.to_string());
        BackupRun {
            trigger,
            started_at,
            archive_path: Some(self.archive_path),
            outcome: RunOutcome::Success,
            rotation: Some(self.rotation),
            error: warning,
        }
    }
}
