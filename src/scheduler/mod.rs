// dbbackup/src/scheduler/mod.rs
pub(crate) mod cron;

pub use cron::CronSchedule;

use chrono::{DateTime, Local};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::backup::{BackupService, RunReporter};

/// Fires the scheduled trigger of a [`BackupService`] on a cron schedule.
///
/// A failed run is handed to the reporter and the loop keeps going; only
/// cancellation or a schedule with no future firing ends it.
pub struct Scheduler {
    service: Arc<BackupService>,
    schedule: CronSchedule,
    reporter: Arc<dyn RunReporter>,
}

impl Scheduler {
    pub fn new(service: Arc<BackupService>, schedule: CronSchedule, reporter: Arc<dyn RunReporter>) -> Self {
        Scheduler {
            service,
            schedule,
            reporter,
        }
    }

    /// Runs the scheduler on its own task.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    pub async fn run(self, shutdown: CancellationToken) {
        info!(schedule = %self.schedule, "Backup scheduler started");

        let mut last_fired = None;
        loop {
            let now = Local::now();
            let Some(next) = next_firing(&self.schedule, now, last_fired) else {
                warn!(schedule = %self.schedule, "Schedule has no future firing; stopping scheduler");
                return;
            };
            let wait = (next - now).to_std().unwrap_or_default();
            info!(next_run = %next.format("%Y-%m-%d %H:%M:%S"), "Next scheduled backup");

            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Backup scheduler stopped");
                    return;
                }
                _ = tokio::time::sleep(wait) => {}
            }

            last_fired = Some(next);
            let run = self.service.run_scheduled().await;
            self.reporter.report(&run);
        }
    }
}

/// Next firing after `now`, and never at or before the one that already fired.
///
/// The sleep runs on the monotonic clock, so the wall clock can still read just
/// before `last_fired` when it wakes.
fn next_firing(
    schedule: &CronSchedule,
    now: DateTime<Local>,
    last_fired: Option<DateTime<Local>>,
) -> Option<DateTime<Local>> {
    let from = match last_fired {
        Some(last) if last > now => last,
        _ => now,
    };
    schedule.next_after(from)
}
