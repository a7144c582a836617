//! Monitor configuration.
//!
//! Defaults match the appliance layout: raw MJPEG on 127.0.0.1:9999,
//! web on port 80 with a single fallback to 8080, logs in `../sleep_logs`.
//! A TOML file may override any field; CLI flags override the file.

use crate::error::{MonitorError, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default multipart boundary token used by the upstream encoder
pub const DEFAULT_BOUNDARY: &str = "spionisto";

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct MonitorConfig {
    /// Listener for the raw MJPEG source
    pub ingest_addr: String,

    /// Interface for the viewer-facing web server
    pub http_bind: String,

    /// Preferred web port
    pub http_port: u16,

    /// Port tried once if `http_port` cannot be bound
    pub http_fallback_port: u16,

    /// Multipart boundary token (without the leading `--`)
    pub boundary: String,

    /// Directory for per-session sleep logs
    pub log_dir: PathBuf,

    /// Sampling period of the periodic logger
    pub log_interval_ms: u64,

    /// Inactivity gap after which the open log file is finalized
    pub idle_rotation_secs: u64,

    /// Throttle between a resume request and the sink becoming active
    pub resume_delay_ms: u64,

    /// Frames a viewer connection may have queued before it counts as saturated
    pub sink_queue_frames: usize,

    /// Motion detector helper (program followed by arguments)
    pub motion_command: Vec<String>,

    /// Video pipeline started once the detector reports ready
    pub video_command: Vec<String>,

    /// Optional vitals helper printing `SPO2 BPM alarm sustained [status]` lines
    pub vitals_command: Option<Vec<String>>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            ingest_addr: "127.0.0.1:9999".to_string(),
            http_bind: "0.0.0.0".to_string(),
            http_port: 80,
            http_fallback_port: 8080,
            boundary: DEFAULT_BOUNDARY.to_string(),
            log_dir: PathBuf::from("../sleep_logs"),
            log_interval_ms: 1000,
            idle_rotation_secs: 2 * 60 * 60,
            resume_delay_ms: 1000,
            sink_queue_frames: 8,
            motion_command: vec!["python".to_string(), "MotionDetectionServer.py".to_string()],
            video_command: vec!["sh".to_string(), "gstream_video.sh".to_string()],
            vitals_command: None,
        }
    }
}

impl MonitorConfig {
    /// Load from a TOML file. Missing fields fall back to defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            MonitorError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let mut config: MonitorConfig =
            toml::from_str(text).map_err(|e| MonitorError::Config(e.to_string()))?;
        config.log_dir = expand_tilde(&config.log_dir);
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.boundary.is_empty() {
            return Err(MonitorError::Config("boundary token must not be empty".into()));
        }
        if self.log_interval_ms == 0 {
            return Err(MonitorError::Config("log_interval_ms must be positive".into()));
        }
        if self.sink_queue_frames == 0 {
            return Err(MonitorError::Config("sink_queue_frames must be positive".into()));
        }
        if self.motion_command.is_empty() {
            return Err(MonitorError::Config("motion_command must name a program".into()));
        }
        if self.video_command.is_empty() {
            return Err(MonitorError::Config("video_command must name a program".into()));
        }
        if matches!(&self.vitals_command, Some(cmd) if cmd.is_empty()) {
            return Err(MonitorError::Config("vitals_command must name a program".into()));
        }
        Ok(())
    }

    /// Full boundary marker as it appears on the wire: `--<token>\r\n`
    pub fn boundary_marker(&self) -> Vec<u8> {
        format!("--{}\r\n", self.boundary).into_bytes()
    }

    pub fn log_interval(&self) -> Duration {
        Duration::from_millis(self.log_interval_ms)
    }

    pub fn idle_rotation(&self) -> Duration {
        Duration::from_secs(self.idle_rotation_secs)
    }

    pub fn resume_delay(&self) -> Duration {
        Duration::from_millis(self.resume_delay_ms)
    }
}

/// Expand tilde (~) in paths to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();

    if path_str == "~" {
        dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
    } else if let Some(rest) = path_str.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            home.join(rest)
        } else {
            path.to_path_buf()
        }
    } else {
        path.to_path_buf()
    }
}
