//! Eye-closure detector.

use chrono::{DateTime, Utc};
use tracing::debug;

use super::{hold_stale, step_count, Detector};
use crate::config::DrowsinessConfig;
use crate::types::{Channel, DetectionSignal, Observation, SensorSample};

/// Active once EAR stays below threshold for `consecutive_frames` samples.
/// A single open-eye frame deactivates immediately (no hysteresis).
#[derive(Debug, Clone)]
pub struct DrowsinessDetector {
    ear_threshold: f64,
    consecutive_frames: u32,
    last: DetectionSignal,
}

impl DrowsinessDetector {
    pub fn new(config: &DrowsinessConfig) -> Self {
        Self {
            ear_threshold: config.ear_threshold,
            consecutive_frames: config.consecutive_frames.max(1),
            last: DetectionSignal::inactive(Channel::Drowsy),
        }
    }
}

impl Detector for DrowsinessDetector {
    fn channel(&self) -> Channel {
        Channel::Drowsy
    }

    fn ingest(&mut self, observation: &Observation, _now: DateTime<Utc>) -> DetectionSignal {
        match observation {
            Observation::Sample(SensorSample::EyeGeometry { ear }) if ear.is_finite() => {
                let closed = *ear < self.ear_threshold;
                let count = step_count(self.last.consecutive_count, closed);
                self.last = DetectionSignal {
                    channel: Channel::Drowsy,
                    active: count >= self.consecutive_frames,
                    consecutive_count: count,
                    // Closure depth: 0 at threshold, 1 fully shut
                    strength: if closed {
                        (self.ear_threshold - ear) / self.ear_threshold
                    } else {
                        0.0
                    },
                    stale: false,
                };
            }
            Observation::NoFace => {
                self.last = DetectionSignal::inactive(Channel::Drowsy);
            }
            Observation::Fault(_) => return hold_stale(&mut self.last),
            Observation::Sample(SensorSample::EyeGeometry { ear }) => {
                debug!(ear, "Non-finite EAR, holding last signal");
                return hold_stale(&mut self.last);
            }
            Observation::Sample(other) => {
                debug!(?other, "Drowsiness detector ignoring non-eye sample");
            }
        }
        self.last
    }

    fn reset(&mut self) {
        self.last = DetectionSignal::inactive(Channel::Drowsy);
    }

    fn last_signal(&self) -> DetectionSignal {
        self.last
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SensorFault;

    fn eye(ear: f64) -> Observation {
        Observation::Sample(SensorSample::EyeGeometry { ear })
    }

    #[test]
    fn test_activates_on_kth_closed_frame() {
        let mut det = DrowsinessDetector::new(&DrowsinessConfig::default());
        for i in 1..20 {
            let s = det.ingest(&eye(0.1), Utc::now());
            assert!(!s.active, "frame {} must not activate yet", i);
            assert_eq!(s.consecutive_count, i);
        }
        assert!(det.ingest(&eye(0.1), Utc::now()).active);
    }

    #[test]
    fn test_single_open_frame_deactivates() {
        let mut det = DrowsinessDetector::new(&DrowsinessConfig::default());
        for _ in 0..25 {
            det.ingest(&eye(0.1), Utc::now());
        }
        let s = det.ingest(&eye(0.32), Utc::now());
        assert!(!s.active);
        assert_eq!(s.consecutive_count, 0);
    }

    #[test]
    fn test_no_face_resets_counter() {
        let mut det = DrowsinessDetector::new(&DrowsinessConfig::default());
        for _ in 0..15 {
            det.ingest(&eye(0.1), Utc::now());
        }
        assert!(!det.ingest(&Observation::NoFace, Utc::now()).active);
        let s = det.ingest(&eye(0.1), Utc::now());
        assert_eq!(s.consecutive_count, 1);
    }

    #[test]
    fn test_fault_keeps_count() {
        let mut det = DrowsinessDetector::new(&DrowsinessConfig::default());
        for _ in 0..5 {
            det.ingest(&eye(0.1), Utc::now());
        }
        let held = det.ingest(&Observation::Fault(SensorFault::new("camera")), Utc::now());
        assert!(held.stale);
        assert_eq!(held.consecutive_count, 5);
        let next = det.ingest(&eye(0.1), Utc::now());
        assert_eq!(next.consecutive_count, 6);
        assert!(!next.stale);
    }

    #[test]
    fn test_non_finite_ear_holds_signal_as_stale() {
        let mut det = DrowsinessDetector::new(&DrowsinessConfig::default());
        for _ in 0..20 {
            det.ingest(&eye(0.1), Utc::now());
        }
        let held = det.ingest(&eye(f64::NAN), Utc::now());
        assert!(held.active, "NaN must not read as open eyes");
        assert!(held.stale);
        assert_eq!(held.consecutive_count, 20);
        assert!(det.ingest(&eye(f64::INFINITY), Utc::now()).stale);
    }
}
