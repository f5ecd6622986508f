//! Channel Detectors - Debounced per-channel signals
//!
//! Four independent stateful detectors turn raw readings into one
//! `DetectionSignal` per tick:
//!
//! - `DrowsinessDetector`: EAR below threshold for K consecutive frames
//! - `YawnDetector`: MAR above a multiple of the learned neutral baseline
//! - `IntoxicationDetector`: gas voltage above the calibrated threshold, or
//!   the operator's manual test latch
//! - `ImpactDetector`: tilt from level above the threshold, single sample
//!
//! ## Fault Handling
//!
//! A `SensorFault` never reaches the escalation layer as an error. The
//! detector re-emits its previous signal with `stale = true`; the next good
//! sample clears the flag. `NoFace` is not a fault: the face channels go
//! inactive for that tick.
//!
//! ## Usage
//!
//! ```ignore
//! let mut detectors = ChannelDetector::all(&config, store.clone());
//! for det in detectors.iter_mut() {
//!     let signal = det.ingest(&observation_for(det.channel()), now);
//! }
//! ```

mod drowsiness;
mod impact;
mod intoxication;
mod yawn;

pub use drowsiness::DrowsinessDetector;
pub use impact::{tilt_degrees, ImpactDetector};
pub use intoxication::IntoxicationDetector;
pub use yawn::YawnDetector;

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::calibration::CalibrationStore;
use crate::config::MonitorConfig;
use crate::types::{Channel, DetectionSignal, Observation};

/// Shared tick interface of every channel detector.
pub trait Detector {
    fn channel(&self) -> Channel;

    /// Consume one observation and return this tick's signal.
    /// Called at most once per tick.
    fn ingest(&mut self, observation: &Observation, now: DateTime<Utc>) -> DetectionSignal;

    /// Clear debounce state (explicit reset command). Baselines are kept.
    fn reset(&mut self);

    /// Signal emitted by the most recent `ingest`.
    fn last_signal(&self) -> DetectionSignal;
}

/// Tagged variants over the four detectors.
#[derive(Debug)]
pub enum ChannelDetector {
    Drowsiness(DrowsinessDetector),
    Yawn(YawnDetector),
    Intoxication(IntoxicationDetector),
    Impact(ImpactDetector),
}

impl ChannelDetector {
    /// Build one detector per channel, in `Channel::ALL` order.
    pub fn all(config: &MonitorConfig, store: Arc<CalibrationStore>) -> Vec<Self> {
        vec![
            ChannelDetector::Drowsiness(DrowsinessDetector::new(&config.drowsiness)),
            ChannelDetector::Yawn(YawnDetector::new(&config.yawn, store.clone())),
            ChannelDetector::Intoxication(IntoxicationDetector::new(
                &config.intoxication,
                store.clone(),
            )),
            ChannelDetector::Impact(ImpactDetector::new(&config.impact, store)),
        ]
    }

    fn inner(&self) -> &dyn Detector {
        match self {
            ChannelDetector::Drowsiness(d) => d,
            ChannelDetector::Yawn(d) => d,
            ChannelDetector::Intoxication(d) => d,
            ChannelDetector::Impact(d) => d,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Detector {
        match self {
            ChannelDetector::Drowsiness(d) => d,
            ChannelDetector::Yawn(d) => d,
            ChannelDetector::Intoxication(d) => d,
            ChannelDetector::Impact(d) => d,
        }
    }
}

impl Detector for ChannelDetector {
    fn channel(&self) -> Channel {
        self.inner().channel()
    }

    fn ingest(&mut self, observation: &Observation, now: DateTime<Utc>) -> DetectionSignal {
        self.inner_mut().ingest(observation, now)
    }

    fn reset(&mut self) {
        self.inner_mut().reset();
    }

    fn last_signal(&self) -> DetectionSignal {
        self.inner().last_signal()
    }
}

/// Re-emit the previous signal marked stale.
pub(crate) fn hold_stale(last: &mut DetectionSignal) -> DetectionSignal {
    last.stale = true;
    *last
}

/// Advance a consecutive counter: +1 while the condition holds, else 0.
pub(crate) fn step_count(count: u32, condition: bool) -> u32 {
    if condition {
        count.saturating_add(1)
    } else {
        0
    }
}
