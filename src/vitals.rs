//! Vital-signs (pulse oximeter) snapshot.
//!
//! The oximeter itself is read by a helper process which prints one
//! whitespace-separated line per sample:
//!
//! ```text
//! SPO2 BPM alarm sustained [status text...]
//! ```
//!
//! `SPO2 == -1` means no valid reading (probe off, no finger, no device).

use chrono::{DateTime, Local};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::watch;

use crate::error::Result;

/// SPO2 value reported when there is no valid reading
pub const NO_READING: i32 = -1;

#[derive(Debug, Clone, PartialEq)]
pub struct VitalsSnapshot {
    pub spo2: i32,
    pub bpm: i32,
    pub alarm: bool,
    /// Vitals-side sustained alarm (e.g. BPM trend), fused after camera motion
    pub sustained: bool,
    pub read_time: DateTime<Local>,
    pub status: String,
}

impl VitalsSnapshot {
    /// Snapshot before any sample arrived
    pub fn no_reading() -> Self {
        Self {
            spo2: NO_READING,
            bpm: NO_READING,
            alarm: false,
            sustained: false,
            read_time: Local::now(),
            status: "Initializing".to_string(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.spo2 != NO_READING
    }
}

impl Default for VitalsSnapshot {
    fn default() -> Self {
        Self::no_reading()
    }
}

/// Parse one helper line; `None` for anything malformed.
pub fn parse_vitals_line(line: &str, read_time: DateTime<Local>) -> Option<VitalsSnapshot> {
    let mut fields = line.split_whitespace();
    let spo2 = fields.next()?.parse().ok()?;
    let bpm = fields.next()?.parse().ok()?;
    let alarm = parse_flag(fields.next()?)?;
    let sustained = parse_flag(fields.next()?)?;
    let status = fields.collect::<Vec<_>>().join(" ");

    Some(VitalsSnapshot {
        spo2,
        bpm,
        alarm,
        sustained,
        read_time,
        status,
    })
}

fn parse_flag(field: &str) -> Option<bool> {
    match field {
        "0" => Some(false),
        "1" => Some(true),
        _ => None,
    }
}

/// Publish a snapshot for every well-formed line until EOF or a read
/// error. Either way the channel is left holding a no-reading snapshot so
/// nothing downstream keeps logging a stale sample.
pub async fn run_vitals_reader<R>(stdout: R, tx: watch::Sender<VitalsSnapshot>) -> Result<u64>
where
    R: AsyncRead + Unpin,
{
    let mut samples = 0u64;
    let result = read_samples(BufReader::new(stdout), &tx, &mut samples).await;

    match &result {
        Ok(()) => tracing::warn!(samples, "Vitals reader closed its output"),
        Err(e) => tracing::error!(samples, error = %e, "Vitals reader failed"),
    }
    tx.send_replace(VitalsSnapshot {
        status: "Reader stopped".to_string(),
        ..VitalsSnapshot::no_reading()
    });
    result.map(|()| samples)
}

async fn read_samples<R>(
    mut reader: BufReader<R>,
    tx: &watch::Sender<VitalsSnapshot>,
    samples: &mut u64,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut raw = Vec::new();
    loop {
        raw.clear();
        if reader.read_until(b'\n', &mut raw).await? == 0 {
            return Ok(());
        }

        let line = String::from_utf8_lossy(&raw);
        match parse_vitals_line(line.trim_end(), Local::now()) {
            Some(snapshot) => {
                *samples += 1;
                tx.send_replace(snapshot);
            }
            None => {
                tracing::debug!(line = %line.trim_end(), "Ignoring malformed vitals line")
            }
        }
    }
}
