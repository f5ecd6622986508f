//! Gas-sensor alcohol detector with the operator manual-test latch.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{hold_stale, step_count, Detector};
use crate::calibration::{CalibrationStore, MeanAccumulator};
use crate::config::IntoxicationConfig;
use crate::types::{Channel, DetectionSignal, Observation, SensorSample};

/// Active while voltage exceeds the calibrated constant threshold, or while
/// the manual-test latch is set. The latch clears only on `reset()`.
///
/// The clean-air ambient mean is learned from the first samples for
/// reporting; it does not move the threshold.
#[derive(Debug)]
pub struct IntoxicationDetector {
    threshold_volts: f64,
    ambient: MeanAccumulator,
    ambient_published: bool,
    manual_latch: bool,
    store: Arc<CalibrationStore>,
    last: DetectionSignal,
}

impl IntoxicationDetector {
    pub fn new(config: &IntoxicationConfig, store: Arc<CalibrationStore>) -> Self {
        Self {
            threshold_volts: config.alcohol_threshold_volts,
            ambient: MeanAccumulator::new(config.ambient_warmup_samples),
            ambient_published: store.alcohol_ambient().is_some(),
            manual_latch: false,
            store,
            last: DetectionSignal::inactive(Channel::Intoxicated),
        }
    }

    /// Force the signal active regardless of voltage (operator test).
    pub fn trigger_manual_test(&mut self) {
        if !self.manual_latch {
            info!("Manual alcohol test triggered");
        }
        self.manual_latch = true;
    }

    pub fn manual_latch(&self) -> bool {
        self.manual_latch
    }

    fn accumulate_ambient(&mut self, voltage: f64, now: DateTime<Utc>) {
        if self.ambient_published {
            return;
        }
        self.ambient.add_sample(voltage);
        if !self.ambient.is_ready() {
            return;
        }
        self.ambient_published = true;
        match self.ambient.freeze(now) {
            Ok(frozen) => {
                if let Err(e) = self.store.publish_alcohol_ambient(frozen) {
                    warn!(error = %e, "Alcohol ambient baseline not published");
                }
            }
            Err(e) => warn!(error = %e, "Alcohol ambient freeze failed"),
        }
    }
}

impl Detector for IntoxicationDetector {
    fn channel(&self) -> Channel {
        Channel::Intoxicated
    }

    fn ingest(&mut self, observation: &Observation, now: DateTime<Utc>) -> DetectionSignal {
        match observation {
            Observation::Sample(SensorSample::GasLevel { voltage }) if voltage.is_finite() => {
                let voltage = *voltage;
                self.accumulate_ambient(voltage, now);

                let over = voltage > self.threshold_volts;
                let active = over || self.manual_latch;
                self.last = DetectionSignal {
                    channel: Channel::Intoxicated,
                    active,
                    consecutive_count: step_count(self.last.consecutive_count, active),
                    strength: voltage / self.threshold_volts,
                    stale: false,
                };
            }
            Observation::Fault(_) | Observation::Sample(SensorSample::GasLevel { .. }) => {
                // The latch is operator state, not sensor state
                self.last.active |= self.manual_latch;
                return hold_stale(&mut self.last);
            }
            Observation::NoFace => {}
            Observation::Sample(other) => {
                debug!(?other, "Intoxication detector ignoring sample");
            }
        }
        self.last
    }

    fn reset(&mut self) {
        self.manual_latch = false;
        self.last = DetectionSignal::inactive(Channel::Intoxicated);
    }

    fn last_signal(&self) -> DetectionSignal {
        self.last
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SensorFault;

    fn gas(voltage: f64) -> Observation {
        Observation::Sample(SensorSample::GasLevel { voltage })
    }

    fn detector(threshold: f64) -> IntoxicationDetector {
        let config = IntoxicationConfig {
            alcohol_threshold_volts: threshold,
            ambient_warmup_samples: 2,
        };
        IntoxicationDetector::new(&config, Arc::new(CalibrationStore::new()))
    }

    #[test]
    fn test_active_from_third_sample() {
        let mut det = detector(0.5);
        let active: Vec<bool> = [0.1, 0.1, 0.9, 0.9, 0.9]
            .iter()
            .map(|v| det.ingest(&gas(*v), Utc::now()).active)
            .collect();
        assert_eq!(active, vec![false, false, true, true, true]);
        assert_eq!(det.last_signal().consecutive_count, 3);
    }

    #[test]
    fn test_manual_latch_forces_active_until_reset() {
        let mut det = detector(0.5);
        det.trigger_manual_test();
        assert!(det.ingest(&gas(0.1), Utc::now()).active);
        assert!(det.ingest(&gas(0.1), Utc::now()).active);
        det.reset();
        assert!(!det.manual_latch());
        assert!(!det.ingest(&gas(0.1), Utc::now()).active);
    }

    #[test]
    fn test_manual_latch_survives_fault() {
        let mut det = detector(0.5);
        det.trigger_manual_test();
        let held = det.ingest(&Observation::Fault(SensorFault::new("adc")), Utc::now());
        assert!(held.active);
        assert!(held.stale);
    }

    #[test]
    fn test_ambient_baseline_published_once() {
        let store = Arc::new(CalibrationStore::new());
        let config = IntoxicationConfig {
            alcohol_threshold_volts: 0.5,
            ambient_warmup_samples: 2,
        };
        let mut det = IntoxicationDetector::new(&config, store.clone());
        det.ingest(&gas(0.1), Utc::now());
        det.ingest(&gas(0.3), Utc::now());
        det.ingest(&gas(0.9), Utc::now());
        let ambient = store.alcohol_ambient().expect("published");
        assert!((ambient.mean - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_non_finite_voltage_holds_signal_as_stale() {
        let mut det = detector(0.5);
        assert!(det.ingest(&gas(0.9), Utc::now()).active);
        let held = det.ingest(&gas(f64::NAN), Utc::now());
        assert!(held.active);
        assert!(held.stale);
        assert!(det.ingest(&gas(f64::NEG_INFINITY), Utc::now()).stale);
    }
}
