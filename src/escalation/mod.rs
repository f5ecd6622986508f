//! Alert Escalation - Per-class state machines
//!
//! One `AlertMachine` per `AlertClass`. Machines are independent: Drowsiness
//! and Accident can be open at the same time and each notifies on its own.
//!
//! ## Ladders
//!
//! ```text
//! Drowsiness: Idle ─► Warned ─(warning window)─► Escalated ─(grace)─► Notified
//!                       └────── signal clears ─────┴──► Idle (self-heal)
//! Accident:   Idle ─► Escalated ─► Notified            (same tick, no self-heal)
//! Sobriety:   Idle ─► Warned ─(challenge fails)─► Escalated ─► Notified
//!                       └─(challenge passes)─► Resolved ─► Idle
//! ```
//!
//! Notified is sticky until a manual reset. A reset or a resolution starts
//! the class re-arm cooldown. During it, a condition that has stayed active
//! since the close cannot reopen a case; the first inactive sample re-arms
//! the class immediately.

mod machine;

pub use machine::{AlertMachine, DispatchFollowUp};

use chrono::Duration;

use crate::config::EscalationConfig;
use crate::types::AlertClass;

/// Timing rules for one class.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EscalationPolicy {
    pub class: AlertClass,
    /// Warned → Escalated delay while the signal persists
    pub warning_window: Duration,
    /// Escalated → Notified delay while the signal persists
    pub notify_grace: Duration,
    /// Activations ignored for this long after reset / resolution
    pub rearm: Duration,
}

impl EscalationPolicy {
    pub fn for_class(class: AlertClass, config: &EscalationConfig) -> Self {
        let rearm = match class {
            AlertClass::Drowsiness => config.drowsiness_rearm_secs,
            AlertClass::Accident => config.accident_rearm_secs,
            AlertClass::Sobriety => config.sobriety_rearm_secs,
        };
        Self {
            class,
            warning_window: seconds(config.warning_window_secs),
            notify_grace: seconds(config.notify_grace_secs),
            rearm: seconds(rearm),
        }
    }

    /// Drowsiness is the only class that self-heals when its signal clears.
    pub fn self_heals(&self) -> bool {
        self.class == AlertClass::Drowsiness
    }
}

pub(crate) fn seconds(value: f64) -> Duration {
    Duration::milliseconds((value * 1000.0).round() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_rearm_per_class() {
        let config = EscalationConfig::default();
        assert_eq!(EscalationPolicy::for_class(AlertClass::Drowsiness, &config).rearm, Duration::zero());
        assert_eq!(EscalationPolicy::for_class(AlertClass::Accident, &config).rearm, Duration::seconds(30));
        assert_eq!(EscalationPolicy::for_class(AlertClass::Sobriety, &config).rearm, Duration::seconds(60));
    }

    #[test]
    fn test_only_drowsiness_self_heals() {
        let config = EscalationConfig::default();
        let heals: Vec<bool> = AlertClass::ALL
            .iter()
            .map(|c| EscalationPolicy::for_class(*c, &config).self_heals())
            .collect();
        assert_eq!(heals, vec![true, false, false]);
    }
}
