//! Calibration Store - Warm-up Baselines with Atomic Publish
//!
//! Each channel learns its reference during a warm-up window and then
//! freezes it. The frozen value is published into the process-wide
//! `CalibrationStore`, where any number of readers (detectors, the
//! notification formatter, progress logging) can load it without locking.
//!
//! ## Architecture
//!
//! - `MeanAccumulator`: Welford running mean/variance over a fixed sample budget
//! - `TiltAccumulator`: paired pitch/roll accumulators for the zero reference
//! - `CalibrationStore`: `ArcSwapOption` slots, one writer per channel
//! - `recommend_alcohol_threshold`: offline threshold recommendation from
//!   clean-air and exposed voltage captures
//!
//! ## Usage
//!
//! ```ignore
//! let store = Arc::new(CalibrationStore::new());
//! let mut acc = MeanAccumulator::new(30);
//! for mar in warmup { acc.add_sample(mar); }
//! store.publish_yawn_baseline(acc.freeze(Utc::now())?)?;
//! let baseline = store.yawn_baseline(); // Option<Arc<Baseline>>
//! ```

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::config::defaults::{
    ALCOHOL_BALANCED_FRACTION, ALCOHOL_SENSITIVE_FRACTION, ALCOHOL_STRICT_FRACTION,
};

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("Baseline already frozen for channel: {0}")]
    AlreadyFrozen(&'static str),

    #[error("Insufficient samples for {0}: have {1}, need {2}")]
    InsufficientSamples(String, usize, usize),

    #[error("Exposed mean {exposed:.3} V is not above clean-air mean {clean:.3} V")]
    NoSeparation { clean: f64, exposed: f64 },

    #[error("Calibration file I/O error ({0:?}): {1}")]
    Io(PathBuf, std::io::Error),
}

// ============================================================================
// Frozen Baselines
// ============================================================================

/// A frozen scalar baseline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub mean: f64,
    pub std_dev: f64,
    pub samples: usize,
    pub frozen_at: DateTime<Utc>,
}

/// Frozen orientation of the vehicle at rest.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TiltReference {
    pub pitch: f64,
    pub roll: f64,
    pub samples: usize,
    pub frozen_at: DateTime<Utc>,
}

// ============================================================================
// Accumulators
// ============================================================================

/// Running mean over the first `target` finite samples.
#[derive(Debug, Clone)]
pub struct MeanAccumulator {
    target: usize,
    count: usize,
    mean: f64,
    m2: f64,
}

impl MeanAccumulator {
    pub fn new(target: usize) -> Self {
        Self {
            target: target.max(1),
            count: 0,
            mean: 0.0,
            m2: 0.0,
        }
    }

    /// Add a sample (Welford). Returns false if the sample was rejected:
    /// non-finite, or the budget is already full.
    pub fn add_sample(&mut self, value: f64) -> bool {
        if !value.is_finite() || self.is_ready() {
            return false;
        }
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
        true
    }

    pub fn is_ready(&self) -> bool {
        self.count >= self.target
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn target(&self) -> usize {
        self.target
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    fn std_dev(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            (self.m2 / (self.count - 1) as f64).sqrt()
        }
    }

    /// Freeze into a `Baseline`. Fails until the sample budget is reached.
    pub fn freeze(&self, at: DateTime<Utc>) -> Result<Baseline, CalibrationError> {
        if !self.is_ready() {
            return Err(CalibrationError::InsufficientSamples(
                "baseline".to_string(),
                self.count,
                self.target,
            ));
        }
        Ok(Baseline {
            mean: self.mean,
            std_dev: self.std_dev(),
            samples: self.count,
            frozen_at: at,
        })
    }
}

/// Pitch/roll accumulator for the tilt zero reference.
#[derive(Debug, Clone)]
pub struct TiltAccumulator {
    pitch: MeanAccumulator,
    roll: MeanAccumulator,
}

impl TiltAccumulator {
    pub fn new(target: usize) -> Self {
        Self {
            pitch: MeanAccumulator::new(target),
            roll: MeanAccumulator::new(target),
        }
    }

    pub fn add_sample(&mut self, pitch: f64, roll: f64) -> bool {
        if !pitch.is_finite() || !roll.is_finite() || self.is_ready() {
            return false;
        }
        self.pitch.add_sample(pitch) && self.roll.add_sample(roll)
    }

    pub fn is_ready(&self) -> bool {
        self.pitch.is_ready() && self.roll.is_ready()
    }

    pub fn freeze(&self, at: DateTime<Utc>) -> Result<TiltReference, CalibrationError> {
        if !self.is_ready() {
            return Err(CalibrationError::InsufficientSamples(
                "tilt".to_string(),
                self.pitch.count(),
                self.pitch.target(),
            ));
        }
        Ok(TiltReference {
            pitch: self.pitch.mean(),
            roll: self.roll.mean(),
            samples: self.pitch.count(),
            frozen_at: at,
        })
    }
}

// ============================================================================
// Calibration Store
// ============================================================================

/// Process-wide frozen baselines. Each slot is written once by its owning
/// detector; readers always see either nothing or a complete value.
#[derive(Debug)]
pub struct CalibrationStore {
    yawn_mar: ArcSwapOption<Baseline>,
    alcohol_ambient: ArcSwapOption<Baseline>,
    tilt_zero: ArcSwapOption<TiltReference>,
}

impl Default for CalibrationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CalibrationStore {
    pub fn new() -> Self {
        Self {
            yawn_mar: ArcSwapOption::empty(),
            alcohol_ambient: ArcSwapOption::empty(),
            tilt_zero: ArcSwapOption::empty(),
        }
    }

    pub fn yawn_baseline(&self) -> Option<Arc<Baseline>> {
        self.yawn_mar.load_full()
    }

    pub fn alcohol_ambient(&self) -> Option<Arc<Baseline>> {
        self.alcohol_ambient.load_full()
    }

    pub fn tilt_reference(&self) -> Option<Arc<TiltReference>> {
        self.tilt_zero.load_full()
    }

    pub fn publish_yawn_baseline(&self, baseline: Baseline) -> Result<(), CalibrationError> {
        Self::publish_once(&self.yawn_mar, baseline, "yawn")?;
        info!(
            mean_mar = baseline.mean,
            samples = baseline.samples,
            "Yawn baseline frozen"
        );
        Ok(())
    }

    pub fn publish_alcohol_ambient(&self, baseline: Baseline) -> Result<(), CalibrationError> {
        Self::publish_once(&self.alcohol_ambient, baseline, "alcohol")?;
        info!(
            ambient_volts = baseline.mean,
            samples = baseline.samples,
            "Alcohol ambient baseline frozen"
        );
        Ok(())
    }

    pub fn publish_tilt_reference(&self, reference: TiltReference) -> Result<(), CalibrationError> {
        Self::publish_once(&self.tilt_zero, reference, "tilt")?;
        info!(
            pitch = reference.pitch,
            roll = reference.roll,
            samples = reference.samples,
            "Tilt zero reference frozen"
        );
        Ok(())
    }

    /// True once every channel has frozen its baseline.
    pub fn is_complete(&self) -> bool {
        self.yawn_mar.load().is_some()
            && self.alcohol_ambient.load().is_some()
            && self.tilt_zero.load().is_some()
    }

    fn publish_once<T>(
        slot: &ArcSwapOption<T>,
        value: T,
        channel: &'static str,
    ) -> Result<(), CalibrationError> {
        // Swap only into an empty slot; a lost race leaves the first value
        let previous = slot.compare_and_swap(&None::<Arc<T>>, Some(Arc::new(value)));
        if previous.is_some() {
            return Err(CalibrationError::AlreadyFrozen(channel));
        }
        Ok(())
    }
}

// ============================================================================
// Offline Alcohol Threshold Recommendation
// ============================================================================

/// Summary statistics of one voltage capture.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VoltageSummary {
    pub samples: usize,
    pub mean: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
}

impl VoltageSummary {
    fn from_samples(name: &str, samples: &[f64]) -> Result<Self, CalibrationError> {
        if samples.len() < 2 {
            return Err(CalibrationError::InsufficientSamples(
                name.to_string(),
                samples.len(),
                2,
            ));
        }
        Ok(Self {
            samples: samples.len(),
            mean: samples.iter().mean(),
            std_dev: samples.iter().std_dev(),
            min: Statistics::min(samples.iter()),
            max: Statistics::max(samples.iter()),
        })
    }
}

/// Thresholds recommended for `intoxication.alcohol_threshold_volts`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AlcoholRecommendation {
    pub clean: VoltageSummary,
    pub exposed: VoltageSummary,
    /// Midpoint of the clean→exposed gap
    pub balanced: f64,
    /// Triggers earlier, more false alarms
    pub sensitive: f64,
    /// Triggers later, fewer false alarms
    pub strict: f64,
}

/// Recommend alcohol thresholds from clean-air and exposed voltage captures.
pub fn recommend_alcohol_threshold(
    clean: &[f64],
    exposed: &[f64],
) -> Result<AlcoholRecommendation, CalibrationError> {
    let clean = VoltageSummary::from_samples("clean-air samples", clean)?;
    let exposed = VoltageSummary::from_samples("exposed samples", exposed)?;

    let gap = exposed.mean - clean.mean;
    if gap <= 0.0 {
        return Err(CalibrationError::NoSeparation {
            clean: clean.mean,
            exposed: exposed.mean,
        });
    }

    Ok(AlcoholRecommendation {
        clean,
        exposed,
        balanced: clean.mean + ALCOHOL_BALANCED_FRACTION * gap,
        sensitive: clean.mean + ALCOHOL_SENSITIVE_FRACTION * gap,
        strict: clean.mean + ALCOHOL_STRICT_FRACTION * gap,
    })
}

/// Read voltage samples from a capture file.
///
/// One reading per line; for CSV rows the last column is used. Lines that
/// do not parse as a number (headers, comments) are skipped.
pub fn load_voltage_samples(path: &Path) -> Result<Vec<f64>, CalibrationError> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| CalibrationError::Io(path.to_path_buf(), e))?;
    Ok(parse_voltage_samples(&contents))
}

fn parse_voltage_samples(contents: &str) -> Vec<f64> {
    contents
        .lines()
        .filter_map(|line| line.rsplit(',').next())
        .filter_map(|field| field.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .collect()
}

// ============================================================================
// Tests
// ============================================================================
