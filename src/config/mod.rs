//! Monitor Configuration Module
//!
//! Provides the monitor configuration loaded from TOML files, replacing all
//! hardcoded detection thresholds and escalation timings with operator-tunable
//! values.
//!
//! ## Loading Order
//!
//! 1. Explicit path (the `--config` CLI flag)
//! 2. `CABINWATCH_CONFIG` environment variable (path to TOML file)
//! 3. `cabinwatch.toml` in the current working directory
//! 4. Built-in defaults
//!
//! ## Usage
//!
//! The configuration is an immutable value handed to each component at
//! construction time:
//!
//! ```ignore
//! let config = MonitorConfig::load(args.config.as_deref());
//! let monitor = Monitor::new(&config, annunciator, speech, notifier);
//! ```

mod monitor_config;
pub mod defaults;
pub mod validation;

pub use monitor_config::*;
