//! Motion detector integration.
//!
//! The detector runs as a helper process speaking a line protocol on its
//! stdout (see [`status`]). When it first reports ready, the video
//! pipeline is started against the camera device.

pub mod status;

pub use status::{
    parse_status_line, run_status_reader, DetectorControl, MotionStatus, StartupHook,
    StatusReader, READY_MARKER, RESET_COMMAND,
};

use crate::process::{HelperIo, HelperProcess};

/// Device used when the camera cannot be found in the V4L2 listing
pub const DEFAULT_VIDEO_DEVICE: &str = "/dev/video0";

/// Driver name of the Raspberry Pi camera in `v4l2-ctl --list-devices`
const PI_CAMERA_DRIVER: &str = "bcm2835";

/// Pick the camera device node from `v4l2-ctl --list-devices` output.
///
/// The listing prints a driver header line followed by indented device
/// nodes. Several headers mention the driver (codec, ISP, camera); the
/// camera is listed last, so the node after the last matching header wins.
pub fn find_camera_device(listing: &str) -> Option<String> {
    let lines: Vec<&str> = listing.lines().collect();
    lines
        .iter()
        .rposition(|line| line.contains(PI_CAMERA_DRIVER))
        .and_then(|idx| lines.get(idx + 1))
        .map(|next| next.trim().to_string())
        .filter(|dev| !dev.is_empty())
}

/// Probe V4L2 for the camera device, falling back to the default node.
pub async fn probe_video_device() -> String {
    let output = tokio::process::Command::new("v4l2-ctl")
        .arg("--list-devices")
        .output()
        .await;

    match output {
        // v4l2-ctl exits non-zero when some devices fail, but still lists the rest
        Ok(out) => find_camera_device(&String::from_utf8_lossy(&out.stdout))
            .unwrap_or_else(|| DEFAULT_VIDEO_DEVICE.to_string()),
        Err(e) => {
            tracing::warn!(error = %e, "v4l2-ctl unavailable, using default video device");
            DEFAULT_VIDEO_DEVICE.to_string()
        }
    }
}

/// Startup hook that launches the video pipeline with the probed camera
/// device appended to `command`.
pub fn video_pipeline_hook(command: Vec<String>) -> StartupHook {
    Box::new(move || {
        tokio::spawn(async move {
            let device = probe_video_device().await;
            let mut command = command;
            command.push(device.clone());

            match HelperProcess::spawn("video", &command, HelperIo::NONE) {
                Ok(helper) => {
                    tracing::info!(device = %device, "Started video pipeline");
                    helper.watch_exit();
                }
                Err(e) => tracing::error!(error = %e, "Failed to start video pipeline"),
            }
        });
    })
}
