//! Alarm fusion of camera motion and vitals.
//!
//! Camera motion always wins over the vitals-side sustained alarm.

use serde::Serialize;

use crate::motion::MotionStatus;
use crate::vitals::VitalsSnapshot;

/// Why the fused alarm is raised
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlarmReason {
    None,
    Camera,
    Vitals,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FusedAlarm {
    pub motion: bool,
    pub reason: AlarmReason,
}

pub fn fuse(motion: &MotionStatus, vitals: &VitalsSnapshot) -> FusedAlarm {
    if motion.sustained {
        FusedAlarm {
            motion: true,
            reason: AlarmReason::Camera,
        }
    } else if vitals.sustained {
        FusedAlarm {
            motion: true,
            reason: AlarmReason::Vitals,
        }
    } else {
        FusedAlarm {
            motion: false,
            reason: AlarmReason::None,
        }
    }
}

/// Body of `GET /status`
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    #[serde(rename = "SPO2")]
    pub spo2: i32,
    #[serde(rename = "BPM")]
    pub bpm: i32,
    pub alarm: bool,
    pub motion: u8,
    #[serde(rename = "motionReason")]
    pub motion_reason: AlarmReason,
    #[serde(rename = "readTime")]
    pub read_time: String,
    #[serde(rename = "oximeterStatus")]
    pub oximeter_status: String,
}

impl StatusReport {
    pub fn new(motion: &MotionStatus, vitals: &VitalsSnapshot) -> Self {
        let fused = fuse(motion, vitals);
        Self {
            spo2: vitals.spo2,
            bpm: vitals.bpm,
            alarm: vitals.alarm,
            motion: u8::from(fused.motion),
            motion_reason: fused.reason,
            read_time: vitals.read_time.to_rfc3339(),
            oximeter_status: vitals.status.clone(),
        }
    }
}
