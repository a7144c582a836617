//! Motion detector status protocol.
//!
//! The detector prints `MOTION_DETECTOR_READY` once it is up, then one
//! `<detected> <sustained>` line (two digits) per evaluation. Input arrives
//! in arbitrary chunks; only the trailing partial line is kept between reads.

use regex::bytes::Regex;
use std::sync::OnceLock;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;

use crate::error::Result;

/// Line printed by the detector when it is ready for the video pipeline
pub const READY_MARKER: &[u8] = b"MOTION_DETECTOR_READY";

/// Command that re-arms the detector
pub const RESET_COMMAND: &[u8] = b"reset\n";

/// Longest unterminated tail kept before resynchronizing
pub const MAX_PENDING_LINE: usize = 4096;

const READ_SIZE: usize = 4096;

/// Latest motion state reported by the detector
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MotionStatus {
    pub detected: bool,
    pub sustained: bool,
    pub started: bool,
}

/// One-time side effect run when the detector first reports ready
pub type StartupHook = Box<dyn FnOnce() + Send>;

fn status_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^([0-9]) ([0-9])").expect("static pattern"))
}

pub struct StatusReader {
    buffer: Vec<u8>,
    status: MotionStatus,
    on_ready: Option<StartupHook>,
}

impl StatusReader {
    pub fn new(on_ready: StartupHook) -> Self {
        Self {
            buffer: Vec::new(),
            status: MotionStatus::default(),
            on_ready: Some(on_ready),
        }
    }

    pub fn status(&self) -> MotionStatus {
        self.status
    }

    /// Bytes of the unterminated line carried to the next read
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Consume one chunk of detector output. Returns true if the status
    /// changed (a status line matched or the detector became ready).
    pub fn feed(&mut self, chunk: &[u8]) -> bool {
        self.buffer.extend_from_slice(chunk);
        let mut changed = false;

        if !self.status.started && self.ready_seen() {
            self.mark_started();
            changed = true;
        }

        if let Some(end) = self.buffer.iter().rposition(|b| *b == b'\n') {
            // Only the last complete line of this read counts
            let start = self.buffer[..end]
                .iter()
                .rposition(|b| *b == b'\n')
                .map(|i| i + 1)
                .unwrap_or(0);

            if let Some((detected, sustained)) = parse_status_line(&self.buffer[start..end]) {
                changed |= self.status.detected != detected || self.status.sustained != sustained;
                self.status.detected = detected;
                self.status.sustained = sustained;
            }

            self.buffer.drain(..=end);
        }

        if self.buffer.len() > MAX_PENDING_LINE {
            tracing::warn!(
                pending = self.buffer.len(),
                "Motion detector line too long, resynchronizing"
            );
            self.buffer.clear();
        }

        changed
    }

    /// The marker counts at the very start of the buffer or at the start
    /// of any line in it, complete or not.
    fn ready_seen(&self) -> bool {
        self.buffer.starts_with(READY_MARKER)
            || self
                .buffer
                .split(|b| *b == b'\n')
                .any(|line| line.starts_with(READY_MARKER))
    }

    fn mark_started(&mut self) {
        self.status.started = true;
        if let Some(hook) = self.on_ready.take() {
            tracing::info!("Motion detector ready");
            hook();
        }
    }
}

/// Parse `<digit> <digit>` at the start of a line.
pub fn parse_status_line(line: &[u8]) -> Option<(bool, bool)> {
    let caps = status_pattern().captures(line)?;
    let detected = caps.get(1)?.as_bytes()[0] != b'0';
    let sustained = caps.get(2)?.as_bytes()[0] != b'0';
    Some((detected, sustained))
}

/// Read detector output until EOF, publishing every status change.
pub async fn run_status_reader<R>(
    mut stdout: R,
    mut reader: StatusReader,
    tx: watch::Sender<MotionStatus>,
) -> Result<MotionStatus>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_SIZE];
    loop {
        let n = stdout.read(&mut buf).await?;
        if n == 0 {
            tracing::warn!("Motion detector closed its output");
            return Ok(reader.status());
        }
        if reader.feed(&buf[..n]) {
            let status = reader.status();
            tracing::trace!(
                detected = status.detected,
                sustained = status.sustained,
                "Motion status"
            );
            tx.send_replace(status);
        }
    }
}

/// Write side of the detector pipe
pub struct DetectorControl<W> {
    stdin: W,
}

impl<W: AsyncWrite + Unpin> DetectorControl<W> {
    pub fn new(stdin: W) -> Self {
        Self { stdin }
    }

    /// Ask the detector to re-arm. The current status is left as is until
    /// the next status line arrives.
    pub async fn reset(&mut self) -> Result<()> {
        self.stdin.write_all(RESET_COMMAND).await?;
        self.stdin.flush().await?;
        tracing::info!("Motion detector reset requested");
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.stdin
    }
}
