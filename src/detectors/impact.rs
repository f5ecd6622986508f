//! Tilt / rollover detector.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, warn};

use super::{hold_stale, step_count, Detector};
use crate::calibration::{CalibrationStore, TiltAccumulator};
use crate::config::ImpactConfig;
use crate::types::{Channel, DetectionSignal, Observation, Orientation, SensorSample};

/// Angle between the vehicle's up axis and vertical, in degrees.
///
/// `acos(cos(pitch) * cos(roll))`, so pure pitch or pure roll map to
/// themselves and combined tilt is never under-counted.
pub fn tilt_degrees(pitch: f64, roll: f64) -> f64 {
    let c = pitch.to_radians().cos() * roll.to_radians().cos();
    c.clamp(-1.0, 1.0).acos().to_degrees()
}

/// Active on any single sample whose tilt from the zero reference exceeds
/// the threshold. No debounce.
#[derive(Debug)]
pub struct ImpactDetector {
    threshold_degrees: f64,
    zero: TiltAccumulator,
    reference: Orientation,
    reference_frozen: bool,
    store: Arc<CalibrationStore>,
    last: DetectionSignal,
}

impl ImpactDetector {
    pub fn new(config: &ImpactConfig, store: Arc<CalibrationStore>) -> Self {
        let existing = store.tilt_reference();
        let reference = existing
            .as_ref()
            .map(|r| Orientation { pitch: r.pitch, roll: r.roll })
            .unwrap_or_default();
        Self {
            threshold_degrees: config.tilt_threshold_degrees,
            zero: TiltAccumulator::new(config.zero_reference_samples),
            reference,
            reference_frozen: existing.is_some(),
            store,
            last: DetectionSignal::inactive(Channel::Impact),
        }
    }

    /// Tilt of `orientation` relative to the current zero reference.
    pub fn relative_tilt(&self, orientation: &Orientation) -> f64 {
        tilt_degrees(
            orientation.pitch - self.reference.pitch,
            orientation.roll - self.reference.roll,
        )
    }

    fn accumulate_reference(&mut self, orientation: &Orientation, now: DateTime<Utc>) {
        self.zero.add_sample(orientation.pitch, orientation.roll);
        if !self.zero.is_ready() {
            return;
        }
        self.reference_frozen = true;
        match self.zero.freeze(now) {
            Ok(frozen) => {
                self.reference = Orientation {
                    pitch: frozen.pitch,
                    roll: frozen.roll,
                };
                if let Err(e) = self.store.publish_tilt_reference(frozen) {
                    warn!(error = %e, "Tilt zero reference not published");
                }
            }
            Err(e) => warn!(error = %e, "Tilt zero reference freeze failed"),
        }
    }
}

impl Detector for ImpactDetector {
    fn channel(&self) -> Channel {
        Channel::Impact
    }

    fn ingest(&mut self, observation: &Observation, now: DateTime<Utc>) -> DetectionSignal {
        match observation {
            Observation::Sample(SensorSample::Orientation(o))
                if o.pitch.is_finite() && o.roll.is_finite() =>
            {
                let tilt = self.relative_tilt(o);
                let tilted = tilt > self.threshold_degrees;

                // Over-threshold samples never become part of "level"
                if !self.reference_frozen && !tilted {
                    self.accumulate_reference(o, now);
                }

                self.last = DetectionSignal {
                    channel: Channel::Impact,
                    active: tilted,
                    consecutive_count: step_count(self.last.consecutive_count, tilted),
                    strength: tilt,
                    stale: false,
                };
            }
            Observation::Fault(_) => return hold_stale(&mut self.last),
            Observation::Sample(SensorSample::Orientation(o)) => {
                debug!(pitch = o.pitch, roll = o.roll, "Non-finite orientation, holding last signal");
                return hold_stale(&mut self.last);
            }
            Observation::NoFace => {}
            Observation::Sample(other) => {
                debug!(?other, "Impact detector ignoring sample");
            }
        }
        self.last
    }

    fn reset(&mut self) {
        self.last = DetectionSignal::inactive(Channel::Impact);
    }

    fn last_signal(&self) -> DetectionSignal {
        self.last
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn orient(pitch: f64, roll: f64) -> Observation {
        Observation::Sample(SensorSample::Orientation(Orientation { pitch, roll }))
    }

    fn detector() -> ImpactDetector {
        ImpactDetector::new(&ImpactConfig::default(), Arc::new(CalibrationStore::new()))
    }

    #[test]
    fn test_tilt_degrees_pure_axes() {
        assert!((tilt_degrees(30.0, 0.0) - 30.0).abs() < 1e-9);
        assert!((tilt_degrees(0.0, -50.0) - 50.0).abs() < 1e-9);
        assert!(tilt_degrees(0.0, 0.0).abs() < 1e-9);
    }

    #[test]
    fn test_combined_tilt_exceeds_either_axis() {
        let t = tilt_degrees(35.0, 35.0);
        assert!(t > 45.0, "35/35 should combine past 45°, got {t}");
    }

    #[test]
    fn test_single_sample_triggers_then_clears() {
        let mut det = detector();
        let s = det.ingest(&orient(50.0, 0.0), Utc::now());
        assert!(s.active);
        assert!((s.strength - 50.0).abs() < 1e-9);
        assert!(!det.ingest(&orient(10.0, 0.0), Utc::now()).active);
    }

    #[test]
    fn test_zero_reference_excludes_tilted_samples() {
        let store = Arc::new(CalibrationStore::new());
        let config = ImpactConfig {
            tilt_threshold_degrees: 45.0,
            zero_reference_samples: 3,
        };
        let mut det = ImpactDetector::new(&config, store.clone());
        det.ingest(&orient(4.0, 0.0), Utc::now());
        det.ingest(&orient(80.0, 0.0), Utc::now());
        det.ingest(&orient(4.0, 2.0), Utc::now());
        assert!(store.tilt_reference().is_none());
        det.ingest(&orient(4.0, 1.0), Utc::now());

        let reference = store.tilt_reference().expect("frozen");
        assert!((reference.pitch - 4.0).abs() < 1e-9);
        assert!((reference.roll - 1.0).abs() < 1e-9);
        // Mounting offset is subtracted from subsequent readings
        assert!(det.relative_tilt(&Orientation { pitch: 4.0, roll: 1.0 }) < 1e-9);
    }

    #[test]
    fn test_non_finite_orientation_holds_signal_as_stale() {
        let mut det = detector();
        assert!(det.ingest(&orient(60.0, 0.0), Utc::now()).active);
        let held = det.ingest(&orient(f64::NAN, 0.0), Utc::now());
        assert!(held.active);
        assert!(held.stale);
        assert!(det.ingest(&orient(0.0, f64::INFINITY), Utc::now()).stale);
        assert!(!det.ingest(&orient(0.0, 0.0), Utc::now()).stale);
    }
}
