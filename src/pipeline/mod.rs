//! Monitoring Pipeline Module
//!
//! ## Tick Architecture
//!
//! ```text
//! STEP 1: Manual commands (queued since the last tick)
//! STEP 2: Async results (sobriety transcript, dispatch outcomes)
//! STEP 3: GPS lines -> Location Resolver
//! STEP 4: Channel detectors (drowsy, yawn, intoxicated, impact)
//! STEP 5: Alert machines (drowsiness, accident, sobriety)
//! STEP 6: Local side effects (audible warning, physical alarm)
//! STEP 7: Emergency dispatch (first send or the single retry)
//! ```
//!
//! CRITICAL GUARANTEE: a fault on one channel never blocks the others, and
//! no step waits on speech capture or a notification send.

mod commands;
mod monitor;
mod processing_loop;

pub use commands::read_commands;
pub use monitor::{
    DispatchRequest, Monitor, MonitorStats, SideEffect, TickInput, TickReport,
};
pub use processing_loop::ProcessingLoop;
