//! Capability contracts between the monitor core and the hardware layer.
//!
//! The core never touches a camera, ADC, serial port or microphone. It
//! consumes these traits; the binary wires them to scenario replay, and a
//! vehicle build wires them to real drivers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::types::{FrameReading, Orientation, SensorFault};

/// Per-tick sensor reads. Every method must return promptly; a read that
/// cannot complete reports `SensorFault` instead of blocking the frame.
pub trait SensorSuite: Send {
    /// Face-landmark geometry for the current video frame.
    fn capture_frame(&mut self) -> Result<FrameReading, SensorFault>;

    /// Calibrated gas-sensor output in volts.
    fn read_gas_voltage(&mut self) -> Result<f64, SensorFault>;

    fn read_orientation(&mut self) -> Result<Orientation, SensorFault>;

    /// One raw line from the GPS serial stream, `None` when no data is buffered.
    fn read_gps_line(&mut self) -> Option<String>;

    /// Finite sources (recordings) report the end of the stream here.
    fn is_exhausted(&self) -> bool {
        false
    }

    /// Capture time of the most recent frame. Live hardware returns `None`
    /// and the loop uses the wall clock; recordings return scenario time.
    fn timestamp(&self) -> Option<DateTime<Utc>> {
        None
    }

    /// Human-readable name for logging (e.g. "scenario", "vehicle").
    fn source_name(&self) -> &str;
}

/// Local side-effect emitters (speaker and buzzer/LED).
pub trait Annunciator: Send {
    fn sound_audible_warning(&mut self, duration_secs: f64);

    fn silence_audible_warning(&mut self);

    fn activate_physical_alarm(&mut self, on: bool);
}

/// Speech capture errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SpeechError {
    #[error("No speech captured within {0:?}")]
    Timeout(Duration),

    #[error("Audio capture fault: {0}")]
    CaptureFault(String),
}

/// Speech-to-text: the one long-latency capability.
///
/// Runs on a spawned task; dropping the returned future must release the
/// microphone.
#[async_trait]
pub trait SpeechCapability: Send + Sync + 'static {
    async fn transcribe(&self, timeout: Duration) -> Result<String, SpeechError>;
}

// ============================================================================
// Log Annunciator
// ============================================================================

/// Annunciator that reports every side-effect change through tracing.
/// Used when no speaker/buzzer hardware is attached.
#[derive(Debug, Default)]
pub struct LogAnnunciator {
    buzzer_on: bool,
}

impl Annunciator for LogAnnunciator {
    fn sound_audible_warning(&mut self, duration_secs: f64) {
        info!(duration_secs, "🔊 Audible warning");
    }

    fn silence_audible_warning(&mut self) {
        info!("🔇 Audible warning silenced");
    }

    fn activate_physical_alarm(&mut self, on: bool) {
        if on && !self.buzzer_on {
            warn!("🚨 Physical alarm ON");
        } else if !on && self.buzzer_on {
            info!("Physical alarm off");
        }
        self.buzzer_on = on;
    }
}
