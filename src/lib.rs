//! sleepmon - unattended sleep monitor.
//!
//! Re-multiplexes one camera MJPEG stream to any number of viewers, reads
//! the motion detector's status feed, fuses it with the pulse oximeter and
//! keeps a per-night log of the fused state.

pub mod app;
pub mod config;
pub mod error;
pub mod fusion;
pub mod motion;
pub mod process;
pub mod server;
pub mod sleeplog;
pub mod streaming;
pub mod vitals;

pub use app::AppContext;
pub use config::MonitorConfig;
pub use error::{MonitorError, Result};
