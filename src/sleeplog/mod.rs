//! Periodic sleep logger.
//!
//! Samples vitals and motion once per period. While the oximeter gives
//! valid readings, each sample is appended to the session log. A session
//! ends (its file is finalized) once no valid reading has been seen for the
//! idle threshold, and unconditionally on shutdown.
//!
//! Record format, one per line:
//!
//! ```text
//! <YYYY-MM-DD-HH-MM-SS> SPO2 BPM alarm motionDetected motionSustained
//! ```

pub mod file;

pub use file::{finalized_path, LogFile, IN_PROGRESS_SUFFIX, LOG_EXTENSION};

use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};

use crate::error::Result;
use crate::motion::MotionStatus;
use crate::vitals::VitalsSnapshot;

/// Timestamp format used for file names and record prefixes
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d-%H-%M-%S";

/// What a single tick did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// A record was appended
    Logged,
    /// The idle threshold passed and this file was finalized
    Finalized(PathBuf),
    /// Nothing to do
    Idle,
    /// Logging is off after an I/O failure
    Disabled,
}

pub struct SleepLogger {
    dir: PathBuf,
    idle_rotation: Duration,
    last_log_time: Option<DateTime<Local>>,
    file: Option<LogFile>,
    disabled: bool,
}

impl SleepLogger {
    pub fn new(dir: impl Into<PathBuf>, idle_rotation: Duration) -> Self {
        Self {
            dir: dir.into(),
            idle_rotation,
            last_log_time: None,
            file: None,
            disabled: false,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Path of the open session log, if any
    pub fn current_path(&self) -> Option<&Path> {
        self.file.as_ref().map(|f| f.path())
    }

    /// One sampling step at wall-clock time `now`.
    pub async fn tick_at(
        &mut self,
        now: DateTime<Local>,
        vitals: &VitalsSnapshot,
        motion: &MotionStatus,
    ) -> TickOutcome {
        if self.disabled {
            return TickOutcome::Disabled;
        }

        if vitals.is_valid() {
            let stamp = now.format(TIMESTAMP_FORMAT).to_string();
            let record = format_record(vitals, motion);
            tracing::info!("STATUS: {}", record);

            match self.append(&stamp, &record).await {
                Ok(()) => {
                    self.last_log_time = Some(now);
                    TickOutcome::Logged
                }
                Err(e) => {
                    self.disable(e).await;
                    TickOutcome::Disabled
                }
            }
        } else if self.idle_expired(now) {
            match self.close().await {
                Ok(Some(path)) => TickOutcome::Finalized(path),
                Ok(None) => TickOutcome::Idle,
                Err(e) => {
                    self.disable(e).await;
                    TickOutcome::Disabled
                }
            }
        } else {
            TickOutcome::Idle
        }
    }

    /// Finalize the open session log, if any.
    pub async fn close(&mut self) -> Result<Option<PathBuf>> {
        match self.file.take() {
            Some(file) => file.finalize().await.map(Some),
            None => Ok(None),
        }
    }

    /// Sample every `period` until `shutdown` flips, then finalize.
    pub async fn run(
        mut self,
        period: Duration,
        vitals: watch::Receiver<VitalsSnapshot>,
        motion: watch::Receiver<MotionStatus>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<Option<PathBuf>> {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(dir = %self.dir.display(), ?period, "Started logging");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let vitals_now = vitals.borrow().clone();
                    let motion_now = *motion.borrow();
                    self.tick_at(Local::now(), &vitals_now, &motion_now).await;
                }
                _ = shutdown.changed() => break,
            }
        }

        self.close().await
    }

    async fn append(&mut self, stamp: &str, record: &str) -> Result<()> {
        let file = match self.file.take() {
            Some(file) => file,
            None => LogFile::create(&self.dir, stamp).await?,
        };
        self.file
            .insert(file)
            .append_line(&format!("{} {}", stamp, record))
            .await
    }

    fn idle_expired(&self, now: DateTime<Local>) -> bool {
        match self.last_log_time {
            None => true,
            Some(last) => match now.signed_duration_since(last).to_std() {
                Ok(gap) => gap > self.idle_rotation,
                // Clock went backwards
                Err(_) => false,
            },
        }
    }

    async fn disable(&mut self, error: crate::error::MonitorError) {
        tracing::error!(error = %error, "Sleep logging disabled for this session");
        self.disabled = true;
        if let Err(e) = self.close().await {
            tracing::warn!(error = %e, "Could not finalize sleep log");
        }
    }
}

/// `SPO2 BPM alarm motionDetected motionSustained`
pub fn format_record(vitals: &VitalsSnapshot, motion: &MotionStatus) -> String {
    format!(
        "{} {} {} {} {}",
        vitals.spo2,
        vitals.bpm,
        u8::from(vitals.alarm),
        u8::from(motion.detected),
        u8::from(motion.sustained)
    )
}
