//! Shared data structures for the driver safety monitor
//!
//! This module defines the core types flowing through one monitor tick:
//! - Sensor input: `SensorSample`, `FrameReading`, `SensorFault`
//! - Detector output: `Channel`, `DetectionSignal`
//! - Escalation: `AlertClass`, `AlertStage`, `AlertCase`, `AlertTransition`
//! - Location: `LocationFix`, `Location`
//! - Operator input: `Command`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Sensor Input
// ============================================================================

/// Per-frame eye/mouth geometry produced by the face-landmark capability.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameGeometry {
    /// Eye Aspect Ratio (mean of both eyes)
    pub ear: f64,
    /// Mouth Aspect Ratio (outer lips)
    pub mar: f64,
}

/// Outcome of one frame capture.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum FrameReading {
    Face(FrameGeometry),
    /// Not a fault: the frame was captured but nobody is in view.
    NoFaceDetected,
}

/// Vehicle orientation in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Orientation {
    pub pitch: f64,
    pub roll: f64,
}

impl Orientation {
    /// Derive pitch/roll from a 3-axis g-vector (upright: x=0, y=0, z=+1).
    pub fn from_acceleration(x: f64, y: f64, z: f64) -> Self {
        let pitch = x.atan2(y.hypot(z)).to_degrees();
        let roll = y.atan2(z).to_degrees();
        Self { pitch, roll }
    }
}

/// A single GPS fix decoded from a positioning sentence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpsFix {
    pub lat: f64,
    pub lon: f64,
    pub valid: bool,
    pub timestamp: DateTime<Utc>,
    /// GGA fix quality (0 = none, 1 = GPS, 2 = DGPS, ...). `None` for RMC.
    pub quality: Option<u8>,
    pub satellites: Option<u8>,
    pub altitude_m: Option<f64>,
}

/// Tagged union over every reading the detectors consume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SensorSample {
    EyeGeometry { ear: f64 },
    MouthGeometry { mar: f64 },
    GasLevel { voltage: f64 },
    Orientation(Orientation),
    GpsFix(GpsFix),
}

/// Transient read failure from a sensor capability.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("sensor fault: {0}")]
pub struct SensorFault(pub String);

impl SensorFault {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// What a detector sees on a tick: a sample, an empty frame, or a fault.
#[derive(Debug, Clone, PartialEq)]
pub enum Observation {
    Sample(SensorSample),
    NoFace,
    Fault(SensorFault),
}

// ============================================================================
// Detection Signals
// ============================================================================

/// Detector channel.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Channel {
    Drowsy,
    Yawn,
    Intoxicated,
    Impact,
}

impl Channel {
    pub const ALL: [Channel; 4] = [
        Channel::Drowsy,
        Channel::Yawn,
        Channel::Intoxicated,
        Channel::Impact,
    ];

    /// Alert class this channel feeds.
    pub fn alert_class(self) -> AlertClass {
        match self {
            Channel::Drowsy | Channel::Yawn => AlertClass::Drowsiness,
            Channel::Intoxicated => AlertClass::Sobriety,
            Channel::Impact => AlertClass::Accident,
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Channel::Drowsy => write!(f, "DROWSY"),
            Channel::Yawn => write!(f, "YAWN"),
            Channel::Intoxicated => write!(f, "INTOXICATED"),
            Channel::Impact => write!(f, "IMPACT"),
        }
    }
}

/// Debounced output of one detector for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectionSignal {
    pub channel: Channel,
    pub active: bool,
    /// Consecutive samples satisfying the channel's condition.
    pub consecutive_count: u32,
    /// Channel-specific magnitude: ratio to threshold or baseline, or the
    /// tilt angle in degrees for `Impact`.
    pub strength: f64,
    /// Set when the last read failed and the previous signal is being held.
    pub stale: bool,
}

impl DetectionSignal {
    pub fn inactive(channel: Channel) -> Self {
        Self {
            channel,
            active: false,
            consecutive_count: 0,
            strength: 0.0,
            stale: false,
        }
    }
}

// ============================================================================
// Alert Escalation
// ============================================================================

/// Alert class; one live case per class at a time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AlertClass {
    Drowsiness,
    Accident,
    Sobriety,
}

impl AlertClass {
    pub const ALL: [AlertClass; 3] = [
        AlertClass::Drowsiness,
        AlertClass::Accident,
        AlertClass::Sobriety,
    ];
}

impl std::fmt::Display for AlertClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertClass::Drowsiness => write!(f, "DROWSINESS"),
            AlertClass::Accident => write!(f, "ACCIDENT"),
            AlertClass::Sobriety => write!(f, "SOBRIETY"),
        }
    }
}

/// Escalation ladder stage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum AlertStage {
    #[default]
    Idle,
    Warned,
    Escalated,
    Notified,
    Resolved,
}

impl std::fmt::Display for AlertStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertStage::Idle => write!(f, "IDLE"),
            AlertStage::Warned => write!(f, "WARNED"),
            AlertStage::Escalated => write!(f, "ESCALATED"),
            AlertStage::Notified => write!(f, "NOTIFIED"),
            AlertStage::Resolved => write!(f, "RESOLVED"),
        }
    }
}

/// Delivery state of the single emergency notification a case may send.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum DispatchStatus {
    #[default]
    NotRequested,
    InFlight { attempt: u8 },
    Delivered,
    /// First attempt failed; the retry goes out on the next tick boundary.
    RetryScheduled,
    /// Retry failed too. Terminal.
    GaveUp,
}

/// A live alert for one class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertCase {
    /// Monotonic per-machine id; used to discard results from reset cases.
    pub id: u64,
    pub class: AlertClass,
    pub stage: AlertStage,
    pub opened_at: DateTime<Utc>,
    pub last_escalated_at: DateTime<Utc>,
    /// Human-readable trigger detail carried into the notification.
    pub detail: Option<String>,
    pub dispatch: DispatchStatus,
    /// Notification could not be delivered after the single retry.
    pub notified_with_warning: bool,
}

/// Why a case changed stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransitionReason {
    SignalActive,
    WarningWindowElapsed,
    GracePeriodElapsed,
    ImmediateEscalation,
    VerificationFailed(String),
    VerificationPassed,
    SignalCleared,
    ManualReset,
}

impl std::fmt::Display for TransitionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransitionReason::SignalActive => write!(f, "signal active"),
            TransitionReason::WarningWindowElapsed => write!(f, "warning window elapsed"),
            TransitionReason::GracePeriodElapsed => write!(f, "grace period elapsed"),
            TransitionReason::ImmediateEscalation => write!(f, "immediate escalation"),
            TransitionReason::VerificationFailed(why) => write!(f, "verification failed: {}", why),
            TransitionReason::VerificationPassed => write!(f, "verification passed"),
            TransitionReason::SignalCleared => write!(f, "signal cleared"),
            TransitionReason::ManualReset => write!(f, "manual reset"),
        }
    }
}

/// One stage change of one case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertTransition {
    pub class: AlertClass,
    pub case_id: u64,
    pub from: AlertStage,
    pub to: AlertStage,
    pub at: DateTime<Utc>,
    pub reason: TransitionReason,
}

// ============================================================================
// Location
// ============================================================================

/// Most recent valid fix with its age at the time it was read.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationFix {
    pub lat: f64,
    pub lon: f64,
    pub age_seconds: f64,
}

/// Location attached to a notification.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Location {
    Fix(LocationFix),
    Unavailable,
}

impl Location {
    pub fn fix(&self) -> Option<&LocationFix> {
        match self {
            Location::Fix(f) => Some(f),
            Location::Unavailable => None,
        }
    }
}

// ============================================================================
// Operator Commands
// ============================================================================

/// Manual commands, applied at the next tick boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    Quit,
    ManualAlcoholTest,
    StartVerification,
    ResetAlerts,
}

impl std::str::FromStr for Command {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "q" | "quit" => Ok(Command::Quit),
            "a" | "alcohol" | "manual-alcohol-test" => Ok(Command::ManualAlcoholTest),
            "s" | "speak" | "start-verification" => Ok(Command::StartVerification),
            "r" | "reset" | "reset-alerts" => Ok(Command::ResetAlerts),
            other => Err(format!("unknown command '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_class_mapping() {
        assert_eq!(Channel::Drowsy.alert_class(), AlertClass::Drowsiness);
        assert_eq!(Channel::Yawn.alert_class(), AlertClass::Drowsiness);
        assert_eq!(Channel::Intoxicated.alert_class(), AlertClass::Sobriety);
        assert_eq!(Channel::Impact.alert_class(), AlertClass::Accident);
    }

    #[test]
    fn test_command_parsing_accepts_keys_and_words() {
        assert_eq!("q".parse::<Command>(), Ok(Command::Quit));
        assert_eq!(" R ".parse::<Command>(), Ok(Command::ResetAlerts));
        assert_eq!("start-verification".parse::<Command>(), Ok(Command::StartVerification));
        assert_eq!("a".parse::<Command>(), Ok(Command::ManualAlcoholTest));
        assert!("x".parse::<Command>().is_err());
    }

    #[test]
    fn test_orientation_from_upright_acceleration_is_level() {
        let o = Orientation::from_acceleration(0.0, 0.0, 1.0);
        assert!(o.pitch.abs() < 1e-9);
        assert!(o.roll.abs() < 1e-9);
    }

    #[test]
    fn test_orientation_from_side_acceleration_rolls_90() {
        let o = Orientation::from_acceleration(0.0, 1.0, 0.0);
        assert!((o.roll - 90.0).abs() < 1e-9);
    }
}
