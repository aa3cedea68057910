//! Polling scheduler that triggers full backups on a daily cron slot.

use chrono::{Local, NaiveDateTime, Timelike};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::backup::{BackupEngine, BackupReport};
use crate::{Error, Result};

/// A `minute hour * * *` expression; either field may be `*`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CronSpec {
    minute: Option<u32>,
    hour: Option<u32>,
}

impl CronSpec {
    /// The slot `now` falls in, if the expression covers it.
    ///
    /// `window_minutes` widens a fixed minute so a late poll still fires.
    /// Slots are truncated to the hour for a fixed minute, to the minute
    /// otherwise.
    pub fn slot(&self, now: NaiveDateTime, window_minutes: u32) -> Option<NaiveDateTime> {
        if let Some(hour) = self.hour {
            if now.hour() != hour {
                return None;
            }
        }

        let truncated = now.with_second(0)?.with_nanosecond(0)?;
        match self.minute {
            Some(minute) => {
                let offset = now.minute().checked_sub(minute)?;
                if offset < window_minutes.max(1) {
                    truncated.with_minute(0)
                } else {
                    None
                }
            }
            None => Some(truncated),
        }
    }
}

impl FromStr for CronSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let fields: Vec<&str> = s.split_whitespace().collect();
        let invalid = || {
            Error::Config(format!(
                "unsupported cron expression {:?} (expected \"M H * * *\")",
                s
            ))
        };
        if fields.len() != 5 || fields[2..].iter().any(|f| *f != "*") {
            return Err(invalid());
        }

        let parse = |field: &str, max: u32| -> Result<Option<u32>> {
            if field == "*" {
                return Ok(None);
            }
            match field.parse::<u32>() {
                Ok(value) if value <= max => Ok(Some(value)),
                _ => Err(invalid()),
            }
        };

        Ok(Self {
            minute: parse(fields[0], 59)?,
            hour: parse(fields[1], 23)?,
        })
    }
}

/// Runs `full` backups whenever the configured cron slot comes round.
///
/// Uses [`BackupEngine::try_run`], so a poll that lands while a manual
/// backup is in flight skips that slot instead of queueing behind it.
pub struct Scheduler {
    engine: Arc<BackupEngine>,
    cron: CronSpec,
    poll_interval: Duration,
    shutdown_tx: broadcast::Sender<()>,
}

impl Scheduler {
    pub fn new(engine: Arc<BackupEngine>) -> Result<Self> {
        let schedule = &engine.config().backup.schedule;
        if !schedule.enabled {
            return Err(Error::Config(
                "backup.schedule.enabled is false".to_string(),
            ));
        }
        let cron = schedule.cron.parse()?;
        let poll_interval = Duration::from_secs(schedule.poll_interval_secs);
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            engine,
            cron,
            poll_interval,
            shutdown_tx,
        })
    }

    /// Signal shutdown
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Run the polling loop on a background task
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    /// Poll until [`Scheduler::shutdown`] is called
    pub async fn run(&self) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut last_slot: Option<NaiveDateTime> = None;

        info!(
            poll_interval_secs = self.poll_interval.as_secs(),
            "Scheduler started"
        );

        loop {
            self.tick(Local::now().naive_local(), &mut last_slot).await;

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = shutdown_rx.recv() => {
                    info!("Scheduler stopped");
                    break;
                }
            }
        }
    }

    /// Fire at most one backup for the slot `now` falls in
    pub async fn tick(
        &self,
        now: NaiveDateTime,
        last_slot: &mut Option<NaiveDateTime>,
    ) -> Option<Result<BackupReport>> {
        let window = u32::try_from(self.poll_interval.as_secs().div_ceil(60)).unwrap_or(u32::MAX);
        let slot = self.cron.slot(now, window)?;
        if *last_slot == Some(slot) {
            return None;
        }

        info!(slot = %slot, "Starting scheduled backup");
        let outcome = match self.engine.try_run("full").await {
            Ok(Some(report)) => {
                info!(artifact = %report.artifact.file_name, "Scheduled backup completed");
                Ok(report)
            }
            Ok(None) => {
                warn!(slot = %slot, "Backup already in progress, skipping scheduled run");
                *last_slot = Some(slot);
                return None;
            }
            Err(e) => {
                error!(error = %e, "Scheduled backup failed");
                Err(e)
            }
        };
        debug!(slot = %slot, "Marking schedule slot as handled");
        *last_slot = Some(slot);
        Some(outcome)
    }
}
