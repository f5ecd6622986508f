//! Monitor Configuration - All detection and escalation tunables as TOML values
//!
//! Each struct implements `Default` with the values the system was tuned
//! with, so running without a config file gives the reference behaviour.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

use super::defaults::{
    CONFIG_ENV_VAR, LOCAL_CONFIG_FILE, MAX_FRAME_RATE_HZ, MAX_WINDOW_SECS, MIN_FRAME_RATE_HZ,
};

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for one vehicle deployment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Vehicle / driver identification
    #[serde(default)]
    pub vehicle: VehicleInfo,

    #[serde(default)]
    pub drowsiness: DrowsinessConfig,

    #[serde(default)]
    pub yawn: YawnConfig,

    #[serde(default)]
    pub intoxication: IntoxicationConfig,

    #[serde(default)]
    pub impact: ImpactConfig,

    /// Escalation ladder timing
    #[serde(default)]
    pub escalation: EscalationConfig,

    /// Sobriety challenge
    #[serde(default)]
    pub verification: VerificationConfig,

    #[serde(default)]
    pub location: LocationConfig,

    /// Emergency notification transport
    #[serde(default)]
    pub notification: NotificationConfig,

    /// Frame loop cadence
    #[serde(default)]
    pub capture: CaptureConfig,
}

impl MonitorConfig {
    /// Load configuration using the standard search order:
    /// 1. `explicit` path, if given
    /// 2. `$CABINWATCH_CONFIG`
    /// 3. `./cabinwatch.toml`
    /// 4. Built-in defaults
    pub fn load(explicit: Option<&Path>) -> Self {
        if let Some(p) = explicit {
            match Self::load_from_file(p) {
                Ok(config) => {
                    info!(path = %p.display(), vehicle = %config.vehicle.name, "Loaded monitor config");
                    return config;
                }
                Err(e) => {
                    warn!(path = %p.display(), error = %e, "Failed to load config from --config, falling back");
                }
            }
        }

        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), vehicle = %config.vehicle.name, "Loaded monitor config from {}", CONFIG_ENV_VAR);
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from {}, falling back", CONFIG_ENV_VAR);
                    }
                }
            } else {
                warn!(path = %path, "{} points to non-existent file, falling back", CONFIG_ENV_VAR);
            }
        }

        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!(vehicle = %config.vehicle.name, "Loaded monitor config from ./{}", LOCAL_CONFIG_FILE);
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./{}, using defaults", LOCAL_CONFIG_FILE);
                }
            }
        }

        info!("No {} found — using built-in defaults", LOCAL_CONFIG_FILE);
        Self::default()
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::from_toml_str(&contents).map_err(|e| match e {
            ConfigError::Parse(_, inner) => ConfigError::Parse(path.to_path_buf(), inner),
            other => other,
        })
    }

    /// Parse and validate a TOML document. Unknown keys only warn.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        for w in super::validation::validate_unknown_keys(contents) {
            warn!("{}", w);
        }

        let config: Self = toml::from_str(contents)
            .map_err(|e| ConfigError::Parse(PathBuf::from("<inline>"), e))?;
        config.validate()?;

        let (range_errors, range_warnings) = super::validation::validate_physical_ranges(&config);
        for w in &range_warnings {
            warn!("{}", w);
        }
        if !range_errors.is_empty() {
            return Err(ConfigError::Validation(range_errors));
        }
        Ok(config)
    }

    /// Serialize the config to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Validate all tunables for internal consistency.
    ///
    /// Rules:
    /// - Windows, timeouts and frame rates must be positive and finite
    /// - Windows, timeouts and cooldowns are capped at `MAX_WINDOW_SECS`
    /// - The yawn multiplier must be > 1 (otherwise a neutral mouth triggers)
    /// - The word match ratio must be in (0, 1]
    /// - A prompt cannot ask for more words than the word bank holds
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();

        Self::check_positive(self.drowsiness.ear_threshold, "drowsiness.ear_threshold", &mut errors);
        if self.drowsiness.consecutive_frames == 0 {
            errors.push("drowsiness.consecutive_frames must be > 0".to_string());
        }

        if !self.yawn.mar_multiplier.is_finite() || self.yawn.mar_multiplier <= 1.0 {
            errors.push(format!(
                "yawn.mar_multiplier must be > 1.0 (got {})",
                self.yawn.mar_multiplier
            ));
        }
        if self.yawn.calibration_frames == 0 {
            errors.push("yawn.calibration_frames must be > 0".to_string());
        }
        if self.yawn.smoothing_window == 0 {
            errors.push("yawn.smoothing_window must be > 0".to_string());
        }

        Self::check_positive(
            self.intoxication.alcohol_threshold_volts,
            "intoxication.alcohol_threshold_volts",
            &mut errors,
        );
        Self::check_positive(
            self.impact.tilt_threshold_degrees,
            "impact.tilt_threshold_degrees",
            &mut errors,
        );
        if self.impact.tilt_threshold_degrees >= 180.0 {
            errors.push(format!(
                "impact.tilt_threshold_degrees must be < 180 (got {})",
                self.impact.tilt_threshold_degrees
            ));
        }

        let e = &self.escalation;
        Self::check_window(e.warning_window_secs, "escalation.warning_window_secs", &mut errors);
        Self::check_non_negative(e.notify_grace_secs, "escalation.notify_grace_secs", &mut errors);
        Self::check_non_negative(e.drowsiness_rearm_secs, "escalation.drowsiness_rearm_secs", &mut errors);
        Self::check_non_negative(e.accident_rearm_secs, "escalation.accident_rearm_secs", &mut errors);
        Self::check_non_negative(e.sobriety_rearm_secs, "escalation.sobriety_rearm_secs", &mut errors);

        let v = &self.verification;
        Self::check_window(v.response_window_secs, "verification.response_window_secs", &mut errors);
        Self::check_window(v.listen_timeout_secs, "verification.listen_timeout_secs", &mut errors);
        if !(v.min_word_match_ratio > 0.0 && v.min_word_match_ratio <= 1.0) {
            errors.push(format!(
                "verification.min_word_match_ratio must be in (0, 1] (got {})",
                v.min_word_match_ratio
            ));
        }
        if v.prompt_words == 0 {
            errors.push("verification.prompt_words must be > 0".to_string());
        }
        if v.prompt_words > v.word_bank.len() {
            errors.push(format!(
                "verification.prompt_words ({}) exceeds word_bank size ({})",
                v.prompt_words,
                v.word_bank.len()
            ));
        }

        Self::check_window(self.location.stale_after_secs, "location.stale_after_secs", &mut errors);
        Self::check_window(
            self.notification.dispatch_timeout_secs,
            "notification.dispatch_timeout_secs",
            &mut errors,
        );
        let fps = self.capture.frame_rate_hz;
        if !(MIN_FRAME_RATE_HZ..=MAX_FRAME_RATE_HZ).contains(&fps) {
            errors.push(format!(
                "capture.frame_rate_hz must be in [{MIN_FRAME_RATE_HZ}, {MAX_FRAME_RATE_HZ}] (got {fps})"
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    fn check_positive(value: f64, name: &str, errors: &mut Vec<String>) {
        // NaN comparisons silently pass, catch them explicitly
        if !value.is_finite() || value <= 0.0 {
            errors.push(format!("{name} must be a positive finite number (got {value})"));
        }
    }

    /// Positive duration no longer than `MAX_WINDOW_SECS`.
    fn check_window(value: f64, name: &str, errors: &mut Vec<String>) {
        if !value.is_finite() || value <= 0.0 || value > MAX_WINDOW_SECS {
            errors.push(format!("{name} must be in (0, {MAX_WINDOW_SECS}] seconds (got {value})"));
        }
    }

    fn check_non_negative(value: f64, name: &str, errors: &mut Vec<String>) {
        if !value.is_finite() || value < 0.0 || value > MAX_WINDOW_SECS {
            errors.push(format!("{name} must be in [0, {MAX_WINDOW_SECS}] seconds (got {value})"));
        }
    }
}

// ============================================================================
// Config Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config I/O error ({0:?}): {1}")]
    Io(PathBuf, std::io::Error),

    #[error("Config parse error ({0:?}): {1}")]
    Parse(PathBuf, toml::de::Error),

    #[error("Config serialization error: {0}")]
    Serialize(toml::ser::Error),

    #[error("Config validation failed:\n  - {}", .0.join("\n  - "))]
    Validation(Vec<String>),
}

// ============================================================================
// Vehicle Info
// ============================================================================

/// Identification metadata. Not used for logic, but appears in notifications.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VehicleInfo {
    #[serde(default = "default_vehicle_name")]
    pub name: String,

    #[serde(default)]
    pub driver: String,
}

fn default_vehicle_name() -> String {
    "DEFAULT".to_string()
}

impl Default for VehicleInfo {
    fn default() -> Self {
        Self {
            name: default_vehicle_name(),
            driver: String::new(),
        }
    }
}

// ============================================================================
// Channel Detectors
// ============================================================================

/// Eye-closure detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrowsinessConfig {
    /// EAR below this counts as a closed-eye frame.
    #[serde(default = "default_ear_threshold")]
    pub ear_threshold: f64,

    /// Closed-eye frames required before the signal activates.
    /// 20 frames at 10 fps ≈ 2 seconds.
    #[serde(default = "default_consecutive_frames")]
    pub consecutive_frames: u32,
}

fn default_ear_threshold() -> f64 { 0.25 }
fn default_consecutive_frames() -> u32 { 20 }

impl Default for DrowsinessConfig {
    fn default() -> Self {
        Self {
            ear_threshold: default_ear_threshold(),
            consecutive_frames: default_consecutive_frames(),
        }
    }
}

/// Yawn detection against a learned neutral-mouth baseline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YawnConfig {
    /// Smoothed MAR above `baseline * mar_multiplier` is a yawn.
    #[serde(default = "default_mar_multiplier")]
    pub mar_multiplier: f64,

    /// Face frames averaged into the neutral baseline.
    #[serde(default = "default_calibration_frames")]
    pub calibration_frames: usize,

    /// Moving-average window applied to raw MAR.
    #[serde(default = "default_smoothing_window")]
    pub smoothing_window: usize,
}

fn default_mar_multiplier() -> f64 { 1.7 }
fn default_calibration_frames() -> usize { 30 }
fn default_smoothing_window() -> usize { 10 }

impl Default for YawnConfig {
    fn default() -> Self {
        Self {
            mar_multiplier: default_mar_multiplier(),
            calibration_frames: default_calibration_frames(),
            smoothing_window: default_smoothing_window(),
        }
    }
}

/// Gas sensor alcohol detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntoxicationConfig {
    /// Calibrated constant (see `cabinwatch calibrate-alcohol`).
    /// 1.6 V ≈ 500 counts of a 10-bit ADC at 3.3 V reference.
    #[serde(default = "default_alcohol_threshold")]
    pub alcohol_threshold_volts: f64,

    /// Readings averaged into the clean-air reference.
    #[serde(default = "default_ambient_warmup")]
    pub ambient_warmup_samples: usize,
}

fn default_alcohol_threshold() -> f64 { 1.6 }
fn default_ambient_warmup() -> usize { 100 }

impl Default for IntoxicationConfig {
    fn default() -> Self {
        Self {
            alcohol_threshold_volts: default_alcohol_threshold(),
            ambient_warmup_samples: default_ambient_warmup(),
        }
    }
}

/// Tilt / rollover detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImpactConfig {
    #[serde(default = "default_tilt_threshold")]
    pub tilt_threshold_degrees: f64,

    /// Orientation samples averaged into the zero reference.
    #[serde(default = "default_zero_reference_samples")]
    pub zero_reference_samples: usize,
}

fn default_tilt_threshold() -> f64 { 45.0 }
fn default_zero_reference_samples() -> usize { 50 }

impl Default for ImpactConfig {
    fn default() -> Self {
        Self {
            tilt_threshold_degrees: default_tilt_threshold(),
            zero_reference_samples: default_zero_reference_samples(),
        }
    }
}

// ============================================================================
// Escalation
// ============================================================================

/// Escalation ladder timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationConfig {
    /// Audible warning duration before the physical alarm (seconds).
    #[serde(default = "default_warning_window")]
    pub warning_window_secs: f64,

    /// Escalated → Notified grace for sustained classes (seconds).
    #[serde(default = "default_notify_grace")]
    pub notify_grace_secs: f64,

    /// Activations ignored after a reset/resolution, per class (seconds).
    #[serde(default)]
    pub drowsiness_rearm_secs: f64,

    #[serde(default = "default_accident_rearm")]
    pub accident_rearm_secs: f64,

    #[serde(default = "default_sobriety_rearm")]
    pub sobriety_rearm_secs: f64,
}

fn default_warning_window() -> f64 { 6.0 }
fn default_notify_grace() -> f64 { 6.0 }
fn default_accident_rearm() -> f64 { 30.0 }
fn default_sobriety_rearm() -> f64 { 60.0 }

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            warning_window_secs: default_warning_window(),
            notify_grace_secs: default_notify_grace(),
            drowsiness_rearm_secs: 0.0,
            accident_rearm_secs: default_accident_rearm(),
            sobriety_rearm_secs: default_sobriety_rearm(),
        }
    }
}

// ============================================================================
// Verification
// ============================================================================

/// Spoken sobriety challenge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationConfig {
    /// Time the operator has to start answering (seconds).
    #[serde(default = "default_response_window")]
    pub response_window_secs: f64,

    /// Speech capture budget once listening starts (seconds).
    #[serde(default = "default_listen_timeout")]
    pub listen_timeout_secs: f64,

    /// Fraction of prompt words that must be heard.
    #[serde(default = "default_min_word_match_ratio")]
    pub min_word_match_ratio: f64,

    #[serde(default = "default_prompt_words")]
    pub prompt_words: usize,

    #[serde(default = "default_word_bank")]
    pub word_bank: Vec<String>,
}

fn default_response_window() -> f64 { 6.0 }
fn default_listen_timeout() -> f64 { 15.0 }
fn default_min_word_match_ratio() -> f64 { 0.75 }
fn default_prompt_words() -> usize { 4 }
fn default_word_bank() -> Vec<String> {
    [
        "apple", "banana", "computer", "elephant", "freedom",
        "guitar", "hospital", "internet", "jacket", "kitchen",
    ]
    .iter()
    .map(|w| (*w).to_string())
    .collect()
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            response_window_secs: default_response_window(),
            listen_timeout_secs: default_listen_timeout(),
            min_word_match_ratio: default_min_word_match_ratio(),
            prompt_words: default_prompt_words(),
            word_bank: default_word_bank(),
        }
    }
}

// ============================================================================
// Location / Notification / Capture
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationConfig {
    /// Fixes older than this are flagged stale in notifications (seconds).
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: f64,
}

fn default_stale_after() -> f64 { 30.0 }

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: default_stale_after(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Emergency contact shown in the message.
    #[serde(default = "default_recipient")]
    pub recipient: String,

    /// POST target for the webhook transport. Empty = log-only transport.
    #[serde(default)]
    pub webhook_url: String,

    #[serde(default = "default_dispatch_timeout")]
    pub dispatch_timeout_secs: f64,
}

fn default_recipient() -> String {
    "emergency_contact@example.com".to_string()
}
fn default_dispatch_timeout() -> f64 { 10.0 }

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            recipient: default_recipient(),
            webhook_url: String::new(),
            dispatch_timeout_secs: default_dispatch_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Frame loop cadence; every frame is one tick.
    #[serde(default = "default_frame_rate")]
    pub frame_rate_hz: f64,
}

fn default_frame_rate() -> f64 { 10.0 }

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            frame_rate_hz: default_frame_rate(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        let config = MonitorConfig::default();
        assert!(config.validate().is_ok(), "Default config must always validate");
    }

    #[test]
    fn test_empty_toml_produces_defaults() {
        let config: MonitorConfig = toml::from_str("").expect("empty TOML should parse");
        assert_eq!(config.drowsiness.ear_threshold, 0.25);
        assert_eq!(config.drowsiness.consecutive_frames, 20);
        assert_eq!(config.yawn.mar_multiplier, 1.7);
        assert_eq!(config.impact.tilt_threshold_degrees, 45.0);
        assert_eq!(config.escalation.warning_window_secs, 6.0);
        assert_eq!(config.verification.word_bank.len(), 10);
    }

    #[test]
    fn test_partial_toml_override() {
        let toml_str = r#"
[vehicle]
name = "Van-12"

[intoxication]
alcohol_threshold_volts = 0.5
"#;
        let config = MonitorConfig::from_toml_str(toml_str).expect("partial TOML should parse");
        assert_eq!(config.vehicle.name, "Van-12");
        assert_eq!(config.intoxication.alcohol_threshold_volts, 0.5);
        // Non-overridden values retain defaults
        assert_eq!(config.intoxication.ambient_warmup_samples, 100);
        assert_eq!(config.yawn.calibration_frames, 30);
    }

    #[test]
    fn test_validation_rejects_non_amplifying_multiplier() {
        let mut config = MonitorConfig::default();
        config.yawn.mar_multiplier = 1.0;
        let result = config.validate();
        assert!(result.is_err());
        if let Err(ConfigError::Validation(errors)) = result {
            assert!(errors.iter().any(|e| e.contains("mar_multiplier")));
        }
    }

    #[test]
    fn test_validation_rejects_oversized_prompt() {
        let mut config = MonitorConfig::default();
        config.verification.prompt_words = 11;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_catches_nan_window() {
        let mut config = MonitorConfig::default();
        config.escalation.warning_window_secs = f64::NAN;
        assert!(config.validate().is_err(), "NaN must not pass validation");
    }

    #[test]
    fn test_validation_caps_windows_and_cooldowns() {
        let mut config = MonitorConfig::default();
        config.notification.dispatch_timeout_secs = 1e300;
        config.escalation.accident_rearm_secs = 1e18;
        config.verification.listen_timeout_secs = MAX_WINDOW_SECS + 1.0;
        match config.validate() {
            Err(ConfigError::Validation(errors)) => {
                assert!(errors.iter().any(|e| e.contains("notification.dispatch_timeout_secs")));
                assert!(errors.iter().any(|e| e.contains("escalation.accident_rearm_secs")));
                assert!(errors.iter().any(|e| e.contains("verification.listen_timeout_secs")));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_validation_accepts_day_long_window() {
        let mut config = MonitorConfig::default();
        config.escalation.sobriety_rearm_secs = MAX_WINDOW_SECS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_bounds_frame_rate() {
        let mut config = MonitorConfig::default();
        config.capture.frame_rate_hz = 1e-12;
        assert!(config.validate().is_err(), "frame interval would overflow");
        config.capture.frame_rate_hz = 5_000.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_roundtrip_through_toml_string() {
        let config = MonitorConfig::default();
        let text = config.to_toml().expect("serialize");
        let back = MonitorConfig::from_toml_str(&text).expect("reparse");
        assert_eq!(back.escalation.sobriety_rearm_secs, 60.0);
    }
}
