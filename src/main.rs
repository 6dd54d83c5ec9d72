//! MySQL Backup Tool
//!
//! Dumps a MySQL database through `mysqldump` into timestamped `.sql.gz` archives,
//! on a cron schedule or on demand, and prunes archives past their retention period.

// dbbackup/src/main.rs
mod backup;
mod config;
mod errors;
mod scheduler;
mod utils;

use anyhow::{Context, Result};
use backup::target::ConnectionTarget;
use backup::{BackupService, TracingReporter};
use chrono::Local;
use config::BackupConfig;
use scheduler::{CronSchedule, Scheduler};
use std::env;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Main entry point for the backup tool
#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    utils::init_logging();

    match run_app().await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("❌ Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_app() -> Result<()> {
    let (config_override, command) = parse_args(env::args().skip(1).collect())?;

    let config_path = BackupConfig::resolve_path(config_override.as_deref());
    let config = BackupConfig::load_from_json(&config_path)
        .with_context(|| format!("Failed to load backup configuration from {}", config_path.display()))?;

    let choice = match command {
        Some(command) => command,
        None => prompt_choice()?,
    };

    match choice.as_str() {
        "1" | "backup" => run_backup_now(config).await,
        "2" | "schedule" => run_scheduler(config).await,
        "3" | "rotate" => run_rotation(config).await,
        "4" | "check" => check_config(&config),
        _ => {
            println!("❌ Invalid choice. Please enter '1' (backup), '2' (schedule), '3' (rotate) or '4' (check).");
            anyhow::bail!("Invalid operation choice");
        }
    }
}

/// Splits `[--config <path>] [command]`.
fn parse_args(args: Vec<String>) -> Result<(Option<String>, Option<String>)> {
    let mut config_path = None;
    let mut command = None;
    let mut iter = args.into_iter();

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                config_path = Some(iter.next().context("--config requires a path")?);
            }
            other if command.is_none() => command = Some(other.trim().to_string()),
            other => anyhow::bail!("Unexpected argument: {}", other),
        }
    }
    Ok((config_path, command))
}

async fn run_backup_now(config: BackupConfig) -> Result<()> {
    let service = BackupService::new(config);
    let run = service.run_now().await.context("Backup failed")?;

    match &run.archive_path {
        Some(path) if run.is_success() => {
            println!("✅ Backup created: {}", path.display());
            if let Some(warning) = &run.error {
                println!("⚠️ {}", warning);
            }
        }
        _ => println!("ℹ️ Backup not taken ({})", run.outcome),
    }
    Ok(())
}

async fn run_scheduler(config: BackupConfig) -> Result<()> {
    let expr = config
        .schedule
        .clone()
        .context("schedule must be set in config.json to run the scheduler")?;
    let schedule = CronSchedule::parse(&expr).with_context(|| format!("Invalid schedule '{}'", expr))?;
    if !config.enabled {
        info!("Backups are disabled; scheduled runs will be skipped");
    }

    let service = Arc::new(BackupService::new(config));
    let shutdown = CancellationToken::new();
    let handle = Scheduler::new(service, schedule, Arc::new(TracingReporter)).spawn(shutdown.clone());

    println!("⏰ Scheduler running ({}). Press Ctrl-C to stop.", expr);
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    shutdown.cancel();
    handle.await.context("Scheduler task panicked")?;
    Ok(())
}

async fn run_rotation(config: BackupConfig) -> Result<()> {
    let retention_days = config.retention_days();
    let service = BackupService::new(config);
    let report = service.rotate().await;

    println!(
        "🗑 Rotation finished: {} deleted, {} kept (retention {} days)",
        report.deleted.len(),
        report.kept,
        retention_days
    );
    match report.warning() {
        Some(warning) => Err(warning.into()),
        None => Ok(()),
    }
}

fn check_config(config: &BackupConfig) -> Result<()> {
    let target = ConnectionTarget::parse(&config.database_url)?;
    println!("✓ Configuration is valid");
    println!("  Target:     {} (user {})", target, config.credentials.username);
    println!("  Directory:  {}", config.backup_dir.display());
    println!("  Retention:  {} days", config.retention_days());
    println!("  Dump tool:  {}", config.dump_tool_path);
    println!("  Enabled:    {}", config.enabled);

    match &config.schedule {
        Some(expr) => {
            let schedule = CronSchedule::parse(expr)?;
            match schedule.next_after(Local::now()) {
                Some(next) => println!("  Next run:   {} ({})", next.format("%Y-%m-%d %H:%M:%S"), expr),
                None => println!("  Next run:   never ({})", expr),
            }
        }
        None => println!("  Schedule:   not configured"),
    }
    Ok(())
}

/// Prompts user to select an operation
///
/// Returns the user's choice as String
fn prompt_choice() -> Result<String> {
    use std::io::{Write, stdin, stdout};

    println!("Select an operation:");
    println!("1. Take Backup Now (or type 'backup')");
    println!("2. Run Scheduler (or type 'schedule')");
    println!("3. Rotate Old Backups (or type 'rotate')");
    println!("4. Check Configuration (or type 'check')");
    print!("Enter your choice: ");
    stdout().flush().context("Failed to flush stdout")?;

    let mut input = String::new();
    stdin().read_line(&mut input).context("Failed to read user input")?;
    Ok(input.trim().to_string())
}
