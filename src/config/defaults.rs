//! System-wide default constants.
//!
//! Centralises magic numbers that are not operator-tunable.
//! Grouped by subsystem for easy discovery.

// ============================================================================
// Configuration Discovery
// ============================================================================

/// Environment variable holding the config file path.
pub const CONFIG_ENV_VAR: &str = "CABINWATCH_CONFIG";

/// Config file looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "cabinwatch.toml";

// ============================================================================
// Validation Limits
// ============================================================================

/// Longest accepted window, timeout or cooldown (seconds).
pub const MAX_WINDOW_SECS: f64 = 86_400.0;

/// Accepted camera frame rate range (Hz).
pub const MIN_FRAME_RATE_HZ: f64 = 0.1;
pub const MAX_FRAME_RATE_HZ: f64 = 1_000.0;

/// Latest accepted scenario frame offset (seconds).
pub const MAX_SCENARIO_OFFSET_SECS: f64 = 7.0 * MAX_WINDOW_SECS;

// ============================================================================
// Pipeline
// ============================================================================

/// Progress log interval (ticks). 600 ticks = 1 minute at 10 fps.
pub const PROGRESS_LOG_INTERVAL_TICKS: u64 = 600;

/// Maximum GPS lines drained from the receiver per tick.
pub const MAX_GPS_LINES_PER_TICK: usize = 10;

/// Capacity of the manual command channel.
pub const COMMAND_CHANNEL_CAPACITY: usize = 32;

// ============================================================================
// Location
// ============================================================================

/// Map link template prefix used in notification bodies.
pub const MAP_LINK_PREFIX: &str = "https://www.google.com/maps?q=";

// ============================================================================
// Calibration Tool
// ============================================================================

/// Fraction of the clean→exposed gap used for the balanced threshold.
pub const ALCOHOL_BALANCED_FRACTION: f64 = 0.5;

/// Fraction used for the more sensitive threshold.
pub const ALCOHOL_SENSITIVE_FRACTION: f64 = 0.3;

/// Fraction used for the threshold with fewer false alarms.
pub const ALCOHOL_STRICT_FRACTION: f64 = 0.7;

// ============================================================================
// Scenario Replay
// ============================================================================

/// Delay before a scripted transcript is returned (ms).
pub const SCRIPTED_SPEECH_LATENCY_MS: u64 = 250;
