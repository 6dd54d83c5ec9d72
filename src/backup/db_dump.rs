// dbbackup/src/backup/db_dump.rs
use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backup::target::ConnectionTarget;
use crate::config::DatabaseCredentials;
use crate::errors::{BackupError, Result};
use crate::utils::resolve_executable;

// Lines of dump tool stderr kept for the failure report.
const STDERR_TAIL_LINES: usize = 20;

/// Builds the dump tool argument list.
///
/// The order is fixed: connection flags, the password glued to `-p`, export of
/// routines/triggers/events, a single-transaction snapshot, then the database.
pub fn build_dump_args(target: &ConnectionTarget, credentials: &DatabaseCredentials) -> Vec<String> {
    vec![
        "-h".to_string(),
        target.host.clone(),
        "-P".to_string(),
        target.port.to_string(),
        "-u".to_string(),
        credentials.username.clone(),
        format!("-p{}", credentials.password),
        "--routines".to_string(),
        "--triggers".to_string(),
        "--events".to_string(),
        "--single-transaction".to_string(),
        target.database.clone(),
    ]
}

/// A running dump tool whose stdout is streamed by the caller.
///
/// The exit status is only checked by [`DumpProcess::wait_success`], which must be
/// called after stdout has been drained: the child blocks on a full pipe otherwise.
pub struct DumpProcess {
    tool: PathBuf,
    child: Child,
    stdout: ChildStdout,
    stderr_task: Option<JoinHandle<String>>,
}

impl DumpProcess {
    pub fn spawn(
        tool: &str,
        target: &ConnectionTarget,
        credentials: &DatabaseCredentials,
    ) -> Result<Self> {
        let spawn_failed = |source: std::io::Error| BackupError::DumpProcessSpawnFailed {
            tool: tool.to_string(),
            source,
        };

        let tool_path = resolve_executable(tool).map_err(spawn_failed)?;
        info!(
            tool = %tool_path.display(),
            target = %target,
            user = %credentials.username,
            "Starting dump tool"
        );

        let mut child = Command::new(&tool_path)
            .args(build_dump_args(target, credentials))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_failed)?;

        let stdout = child.stdout.take().ok_or_else(|| {
            spawn_failed(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "dump tool stdout was not captured",
            ))
        })?;
        let stderr_task = child.stderr.take().map(|stderr| tokio::spawn(forward_stderr(stderr)));

        Ok(DumpProcess {
            tool: tool_path,
            child,
            stdout,
            stderr_task,
        })
    }

    /// The live dump byte stream.
    pub fn stdout(&mut self) -> &mut ChildStdout {
        &mut self.stdout
    }

    /// Waits for the child to exit and maps a non-zero status to
    /// [`BackupError::DumpProcessFailed`].
    pub async fn wait_success(&mut self) -> Result<()> {
        let status = self.child.wait().await;
        let stderr_tail = self.collect_stderr().await;

        let status = status.map_err(|e| BackupError::DumpProcessFailed {
            exit_code: None,
            stderr_tail: format!("failed to wait for dump tool: {}", e),
        })?;

        if status.success() {
            debug!(tool = %self.tool.display(), "Dump tool exited successfully");
            Ok(())
        } else {
            Err(BackupError::DumpProcessFailed {
                exit_code: status.code(),
                stderr_tail,
            })
        }
    }

    /// Kills the child and reaps it. Used when the stream is abandoned.
    pub async fn abort(&mut self) {
        if let Err(e) = self.child.kill().await {
            warn!(tool = %self.tool.display(), error = %e, "Failed to kill dump tool");
        }
        // Grandchildren may still hold the stderr pipe open.
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
    }

    async fn collect_stderr(&mut self) -> String {
        match self.stderr_task.take() {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        }
    }
}

/// Logs every stderr line and returns the last few for error reporting.
async fn forward_stderr(stderr: ChildStderr) -> String {
    let mut lines = BufReader::new(stderr).lines();
    let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                warn!(target: "dbbackup::dump_tool", "{}", line);
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            Ok(None) => break,
            Err(e) => {
                warn!(target: "dbbackup::dump_tool", error = %e, "Stopped reading dump tool stderr");
                break;
            }
        }
    }

    tail.into_iter().collect::<Vec<_>>().join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials() -> DatabaseCredentials {
        DatabaseCredentials {
            username: "backup".to_string(),
            password: "s3cret".to_string(),
        }
    }

    fn target() -> ConnectionTarget {
        ConnectionTarget {
            host: "db.internal".to_string(),
            port: 3307,
            database: "library".to_string(),
        }
    }

    #[test]
    fn test_argument_order_is_fixed() {
        let args = build_dump_args(&target(), &credentials());
        assert_eq!(
            args,
            vec![
                "-h",
                "db.internal",
                "-P",
                "3307",
                "-u",
                "backup",
                "-ps3cret",
                "--routines",
                "--triggers",
                "--events",
                "--single-transaction",
                "library",
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_tool_fails_to_spawn() {
        let result = DumpProcess::spawn("no-such-dump-tool-9b7e", &target(), &credentials());
        match result {
            Err(BackupError::DumpProcessSpawnFailed { tool, .. }) => {
                assert_eq!(tool, "no-such-dump-tool-9b7e");
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("spawn should fail"),
        }
    }

    #[cfg(unix)]
    mod unix {
        use super::*;
        use crate::backup::test_support::fake_tool;
        use tokio::io::AsyncReadExt;

        #[tokio::test]
        async fn test_stdout_streams_and_args_reach_the_tool() -> anyhow::Result<()> {
            let dir = tempfile::tempdir()?;
            let tool = fake_tool(dir.path(), "echo \"$@\"\necho 'diagnostic' >&2\nexit 0")?;

            let mut process = DumpProcess::spawn(tool.to_str().unwrap(), &target(), &credentials())?;
            let mut out = String::new();
            process.stdout().read_to_string(&mut out).await?;
            process.wait_success().await?;

            assert_eq!(
                out.trim_end(),
                "-h db.internal -P 3307 -u backup -ps3cret --routines --triggers --events --single-transaction library"
            );
            Ok(())
        }

        #[tokio::test]
        async fn test_non_zero_exit_reports_code_and_stderr() -> anyhow::Result<()> {
            let dir = tempfile::tempdir()?;
            let tool = fake_tool(dir.path(), "echo 'partial'\necho 'Got error: 1045' >&2\nexit 2")?;

            let mut process = DumpProcess::spawn(tool.to_str().unwrap(), &target(), &credentials())?;
            let mut sink = Vec::new();
            process.stdout().read_to_end(&mut sink).await?;

            match process.wait_success().await {
                Err(BackupError::DumpProcessFailed { exit_code, stderr_tail }) => {
                    assert_eq!(exit_code, Some(2));
                    assert_eq!(stderr_tail, "Got error: 1045");
                }
                other => panic!("expected process failure, got {:?}", other.err()),
            }
            Ok(())
        }

        #[tokio::test]
        async fn test_abort_kills_a_hung_tool() -> anyhow::Result<()> {
            let dir = tempfile::tempdir()?;
            let tool = fake_tool(dir.path(), "exec sleep 30")?;

            let mut process = DumpProcess::spawn(tool.to_str().unwrap(), &target(), &credentials())?;
            tokio::time::timeout(std::time::Duration::from_secs(5), process.abort()).await?;
            Ok(())
        }
    }
}
