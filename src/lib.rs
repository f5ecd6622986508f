//! Cabinwatch: In-Vehicle Driver Safety Monitor
//!
//! Fuses facial video geometry, gas-sensor voltage, vehicle orientation and
//! GPS into one escalating alert pipeline.
//!
//! ## Architecture
//!
//! - **Channel Detectors**: debounced drowsy / yawn / intoxicated / impact signals
//! - **Calibration Store**: frozen warm-up baselines, published atomically
//! - **Alert Machines**: per-class Idle → Warned → Escalated → Notified ladder
//! - **Verification**: spoken sobriety challenge on a cancellable task
//! - **Location Resolver**: latest valid NMEA fix with its age
//! - **Notification Dispatcher**: fire-and-forget emergency send with one retry

pub mod acquisition;
pub mod calibration;
pub mod config;
pub mod detectors;
pub mod escalation;
pub mod location;
pub mod notify;
pub mod pipeline;
pub mod types;
pub mod verification;

// Re-export configuration
pub use config::MonitorConfig;

// Re-export commonly used types
pub use types::{
    AlertCase, AlertClass, AlertStage, AlertTransition, Channel, Command, DetectionSignal,
    Location, LocationFix, SensorFault,
};

// Re-export the monitor core
pub use pipeline::{Monitor, MonitorStats, ProcessingLoop, TickInput, TickReport};
