//! Yawn detector with a learned neutral-mouth baseline.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{hold_stale, step_count, Detector};
use crate::calibration::{CalibrationStore, MeanAccumulator};
use crate::config::YawnConfig;
use crate::types::{Channel, DetectionSignal, Observation, SensorSample};

/// MAR moving average feeds the baseline; the current sample is compared
/// against `baseline * mar_multiplier`. Never active before the baseline
/// is frozen.
#[derive(Debug)]
pub struct YawnDetector {
    mar_multiplier: f64,
    smoothing_window: usize,
    history: VecDeque<f64>,
    warmup: MeanAccumulator,
    baseline: Option<f64>,
    store: Arc<CalibrationStore>,
    last: DetectionSignal,
}

impl YawnDetector {
    pub fn new(config: &YawnConfig, store: Arc<CalibrationStore>) -> Self {
        // A baseline already in the store (restart) skips warm-up
        let baseline = store.yawn_baseline().map(|b| b.mean);
        Self {
            mar_multiplier: config.mar_multiplier,
            smoothing_window: config.smoothing_window.max(1),
            history: VecDeque::with_capacity(config.smoothing_window.max(1)),
            warmup: MeanAccumulator::new(config.calibration_frames),
            baseline,
            store,
            last: DetectionSignal::inactive(Channel::Yawn),
        }
    }

    pub fn is_calibrated(&self) -> bool {
        self.baseline.is_some()
    }

    /// Mean of the last `smoothing_window` MAR values.
    pub fn smoothed_mar(&self) -> Option<f64> {
        if self.history.is_empty() {
            None
        } else {
            Some(self.history.iter().sum::<f64>() / self.history.len() as f64)
        }
    }

    fn push_history(&mut self, mar: f64) {
        if self.history.len() == self.smoothing_window {
            self.history.pop_front();
        }
        self.history.push_back(mar);
    }

    fn accumulate_baseline(&mut self, smoothed: f64, now: DateTime<Utc>) {
        self.warmup.add_sample(smoothed);
        if !self.warmup.is_ready() {
            return;
        }
        match self.warmup.freeze(now) {
            Ok(frozen) => {
                self.baseline = Some(frozen.mean);
                if let Err(e) = self.store.publish_yawn_baseline(frozen) {
                    warn!(error = %e, "Yawn baseline not published");
                }
            }
            Err(e) => warn!(error = %e, "Yawn baseline freeze failed"),
        }
    }
}

impl Detector for YawnDetector {
    fn channel(&self) -> Channel {
        Channel::Yawn
    }

    fn ingest(&mut self, observation: &Observation, now: DateTime<Utc>) -> DetectionSignal {
        match observation {
            Observation::Sample(SensorSample::MouthGeometry { mar }) if mar.is_finite() => {
                let mar = *mar;
                self.push_history(mar);
                let smoothed = self.smoothed_mar().unwrap_or(mar);

                match self.baseline {
                    None => {
                        self.accumulate_baseline(smoothed, now);
                        self.last = DetectionSignal::inactive(Channel::Yawn);
                    }
                    Some(baseline) => {
                        let yawning = mar > baseline * self.mar_multiplier;
                        self.last = DetectionSignal {
                            channel: Channel::Yawn,
                            active: yawning,
                            consecutive_count: step_count(self.last.consecutive_count, yawning),
                            strength: if baseline > 0.0 { mar / baseline } else { 0.0 },
                            stale: false,
                        };
                    }
                }
            }
            Observation::NoFace => {
                self.last = DetectionSignal::inactive(Channel::Yawn);
            }
            Observation::Fault(_) => return hold_stale(&mut self.last),
            Observation::Sample(SensorSample::MouthGeometry { mar }) => {
                debug!(mar, "Non-finite MAR, holding last signal");
                return hold_stale(&mut self.last);
            }
            Observation::Sample(other) => {
                debug!(?other, "Yawn detector ignoring sample");
            }
        }
        self.last
    }

    fn reset(&mut self) {
        self.last = DetectionSignal::inactive(Channel::Yawn);
    }

    fn last_signal(&self) -> DetectionSignal {
        self.last
    }
}
