//! Alert state machine for a single class.

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use super::EscalationPolicy;
use crate::types::{
    AlertCase, AlertClass, AlertStage, AlertTransition, DispatchStatus, TransitionReason,
};

/// What the caller should do after a dispatch result was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchFollowUp {
    Delivered,
    /// First failure: send again at this tick boundary
    Retry,
    /// Retry failed too; case marked notified-with-warning
    GaveUp,
    /// Result belongs to a case that no longer exists
    Ignored,
}

/// Escalation ladder for one alert class.
#[derive(Debug, Clone)]
pub struct AlertMachine {
    policy: EscalationPolicy,
    case: Option<AlertCase>,
    next_case_id: u64,
    rearm_until: Option<DateTime<Utc>>,
}

impl AlertMachine {
    pub fn new(policy: EscalationPolicy) -> Self {
        Self {
            policy,
            case: None,
            next_case_id: 1,
            rearm_until: None,
        }
    }

    pub fn class(&self) -> AlertClass {
        self.policy.class
    }

    pub fn stage(&self) -> AlertStage {
        self.case.as_ref().map(|c| c.stage).unwrap_or_default()
    }

    pub fn case(&self) -> Option<&AlertCase> {
        self.case.as_ref()
    }

    /// True while a condition still active since the last close is held
    /// back. Any inactive sample ends the hold early.
    pub fn is_cooling_down(&self, now: DateTime<Utc>) -> bool {
        self.rearm_until.is_some_and(|until| now < until)
    }

    /// Drop the re-arm hold so the next active sample opens a case.
    pub fn rearm(&mut self) {
        if self.rearm_until.take().is_some() {
            info!(class = %self.policy.class, "Re-arm hold cleared");
        }
    }

    // ========================================================================
    // Signal-driven transitions
    // ========================================================================

    /// Advance one tick with the class signal. `detail` describes the
    /// trigger and is kept on the case when it opens.
    pub fn step(
        &mut self,
        active: bool,
        detail: Option<String>,
        now: DateTime<Utc>,
    ) -> Vec<AlertTransition> {
        let mut transitions = Vec::new();

        if self.case.is_none() {
            if !active {
                // The hold only covers a condition that never cleared
                self.rearm_until = None;
                return transitions;
            }
            if self.is_cooling_down(now) {
                return transitions;
            }
            self.open_case(detail, now, &mut transitions);
        } else if let Some(detail) = detail.filter(|_| active) {
            // Keep the freshest description while the condition persists
            if let Some(case) = self.case.as_mut() {
                if case.stage != AlertStage::Notified {
                    case.detail = Some(detail);
                }
            }
        }

        match self.policy.class {
            AlertClass::Drowsiness => self.advance_sustained(active, now, &mut transitions),
            // Accident notifies on open; Sobriety waits for the challenge
            AlertClass::Accident | AlertClass::Sobriety => {}
        }
        transitions
    }

    fn open_case(
        &mut self,
        detail: Option<String>,
        now: DateTime<Utc>,
        transitions: &mut Vec<AlertTransition>,
    ) {
        let id = self.next_case_id;
        self.next_case_id += 1;
        self.rearm_until = None;
        self.case = Some(AlertCase {
            id,
            class: self.policy.class,
            stage: AlertStage::Idle,
            opened_at: now,
            last_escalated_at: now,
            detail,
            dispatch: DispatchStatus::NotRequested,
            notified_with_warning: false,
        });

        match self.policy.class {
            AlertClass::Drowsiness | AlertClass::Sobriety => {
                self.transition(AlertStage::Warned, TransitionReason::SignalActive, now, transitions);
            }
            AlertClass::Accident => {
                self.transition(AlertStage::Escalated, TransitionReason::ImmediateEscalation, now, transitions);
                self.transition(AlertStage::Notified, TransitionReason::ImmediateEscalation, now, transitions);
            }
        }
    }

    /// Drowsiness ladder: both windows must elapse with the signal held.
    fn advance_sustained(
        &mut self,
        active: bool,
        now: DateTime<Utc>,
        transitions: &mut Vec<AlertTransition>,
    ) {
        let Some(case) = self.case.as_ref() else {
            return;
        };
        let (stage, opened_at, escalated_at) = (case.stage, case.opened_at, case.last_escalated_at);

        if !active && self.policy.self_heals() && matches!(stage, AlertStage::Warned | AlertStage::Escalated) {
            self.transition(AlertStage::Idle, TransitionReason::SignalCleared, now, transitions);
            self.case = None;
            return;
        }
        if !active {
            return;
        }

        if stage == AlertStage::Warned && now - opened_at >= self.policy.warning_window {
            self.transition(AlertStage::Escalated, TransitionReason::WarningWindowElapsed, now, transitions);
            if self.policy.notify_grace <= chrono::Duration::zero() {
                self.transition(AlertStage::Notified, TransitionReason::GracePeriodElapsed, now, transitions);
            }
        } else if stage == AlertStage::Escalated && now - escalated_at >= self.policy.notify_grace {
            self.transition(AlertStage::Notified, TransitionReason::GracePeriodElapsed, now, transitions);
        }
    }

    // ========================================================================
    // Verification-driven transitions (Sobriety)
    // ========================================================================

    /// Challenge ended without a pass: Warned → Escalated → Notified.
    pub fn verification_failed(&mut self, case_id: u64, why: String, now: DateTime<Utc>) -> Vec<AlertTransition> {
        let mut transitions = Vec::new();
        if !self.owns_case(case_id) {
            return transitions;
        }
        let reason = TransitionReason::VerificationFailed(why.clone());
        if let Some(case) = self.case.as_mut() {
            case.detail = Some(why);
        }
        if self.stage() == AlertStage::Warned {
            self.transition(AlertStage::Escalated, reason.clone(), now, &mut transitions);
        }
        if self.stage() == AlertStage::Escalated {
            self.transition(AlertStage::Notified, reason, now, &mut transitions);
        }
        transitions
    }

    /// Challenge passed: Resolved → Idle, re-arm cooldown starts.
    pub fn verification_passed(&mut self, case_id: u64, now: DateTime<Utc>) -> Vec<AlertTransition> {
        let mut transitions = Vec::new();
        if !self.owns_case(case_id) || !matches!(self.stage(), AlertStage::Warned | AlertStage::Escalated) {
            return transitions;
        }
        self.transition(AlertStage::Resolved, TransitionReason::VerificationPassed, now, &mut transitions);
        self.transition(AlertStage::Idle, TransitionReason::VerificationPassed, now, &mut transitions);
        self.close_with_cooldown(now);
        transitions
    }

    /// Manual reset from any stage.
    pub fn reset(&mut self, now: DateTime<Utc>) -> Vec<AlertTransition> {
        let mut transitions = Vec::new();
        if self.case.is_none() {
            return transitions;
        }
        self.transition(AlertStage::Idle, TransitionReason::ManualReset, now, &mut transitions);
        self.close_with_cooldown(now);
        transitions
    }

    fn owns_case(&self, case_id: u64) -> bool {
        self.case.as_ref().is_some_and(|c| c.id == case_id)
    }

    fn close_with_cooldown(&mut self, now: DateTime<Utc>) {
        self.case = None;
        if self.policy.rearm > chrono::Duration::zero() {
            self.rearm_until = Some(now + self.policy.rearm);
        }
    }

    fn transition(
        &mut self,
        to: AlertStage,
        reason: TransitionReason,
        now: DateTime<Utc>,
        transitions: &mut Vec<AlertTransition>,
    ) {
        let Some(case) = self.case.as_mut() else {
            return;
        };
        let from = case.stage;
        case.stage = to;
        if to == AlertStage::Escalated {
            case.last_escalated_at = now;
        }

        match to {
            AlertStage::Escalated | AlertStage::Notified => {
                warn!(class = %case.class, case_id = case.id, from = %from, to = %to, reason = %reason, "Alert escalated");
            }
            _ => {
                info!(class = %case.class, case_id = case.id, from = %from, to = %to, reason = %reason, "Alert transition");
            }
        }

        transitions.push(AlertTransition {
            class: case.class,
            case_id: case.id,
            from,
            to,
            at: now,
            reason,
        });
    }

    // ========================================================================
    // Dispatch bookkeeping
    // ========================================================================

    /// A Notified case waiting for a send, with the attempt number to use.
    pub fn pending_dispatch(&self) -> Option<(&AlertCase, u8)> {
        let case = self.case.as_ref().filter(|c| c.stage == AlertStage::Notified)?;
        match case.dispatch {
            DispatchStatus::NotRequested => Some((case, 1)),
            DispatchStatus::RetryScheduled => Some((case, 2)),
            _ => None,
        }
    }

    pub fn mark_dispatch_in_flight(&mut self, attempt: u8) {
        if let Some(case) = self.case.as_mut() {
            case.dispatch = DispatchStatus::InFlight { attempt };
        }
    }

    /// Record the outcome of a send for `case_id`. One retry, then give up.
    pub fn record_dispatch_result(&mut self, case_id: u64, delivered: bool) -> DispatchFollowUp {
        let Some(case) = self.case.as_mut().filter(|c| c.id == case_id) else {
            return DispatchFollowUp::Ignored;
        };
        let attempt = match case.dispatch {
            DispatchStatus::InFlight { attempt } => attempt,
            _ => return DispatchFollowUp::Ignored,
        };

        if delivered {
            case.dispatch = DispatchStatus::Delivered;
            return DispatchFollowUp::Delivered;
        }

        if attempt < 2 {
            case.dispatch = DispatchStatus::RetryScheduled;
            DispatchFollowUp::Retry
        } else {
            case.dispatch = DispatchStatus::GaveUp;
            case.notified_with_warning = true;
            DispatchFollowUp::GaveUp
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EscalationConfig;
    use chrono::Duration;

    fn machine(class: AlertClass) -> AlertMachine {
        AlertMachine::new(EscalationPolicy::for_class(class, &EscalationConfig::default()))
    }

    fn stages(transitions: &[AlertTransition]) -> Vec<AlertStage> {
        transitions.iter().map(|t| t.to).collect()
    }

    #[test]
    fn test_drowsiness_full_ladder() {
        let mut m = machine(AlertClass::Drowsiness);
        let t0 = Utc::now();
        assert_eq!(stages(&m.step(true, None, t0)), vec![AlertStage::Warned]);
        assert!(m.step(true, None, t0 + Duration::seconds(5)).is_empty());
        assert_eq!(
            stages(&m.step(true, None, t0 + Duration::seconds(6))),
            vec![AlertStage::Escalated]
        );
        assert!(m.step(true, None, t0 + Duration::seconds(11)).is_empty());
        assert_eq!(
            stages(&m.step(true, None, t0 + Duration::seconds(12))),
            vec![AlertStage::Notified]
        );
        assert_eq!(m.pending_dispatch().map(|(_, attempt)| attempt), Some(1));
    }

    #[test]
    fn test_drowsiness_self_heals_before_notified() {
        let mut m = machine(AlertClass::Drowsiness);
        let t0 = Utc::now();
        m.step(true, None, t0);
        m.step(true, None, t0 + Duration::seconds(7));
        assert_eq!(m.stage(), AlertStage::Escalated);
        let t = m.step(false, None, t0 + Duration::seconds(8));
        assert_eq!(stages(&t), vec![AlertStage::Idle]);
        assert_eq!(t[0].reason, TransitionReason::SignalCleared);
        assert!(m.case().is_none());
    }

    #[test]
    fn test_notified_is_sticky() {
        let mut m = machine(AlertClass::Drowsiness);
        let t0 = Utc::now();
        m.step(true, None, t0);
        m.step(true, None, t0 + Duration::seconds(6));
        m.step(true, None, t0 + Duration::seconds(12));
        assert!(m.step(false, None, t0 + Duration::seconds(13)).is_empty());
        assert_eq!(m.stage(), AlertStage::Notified);
    }

    #[test]
    fn test_accident_notifies_on_first_sample() {
        let mut m = machine(AlertClass::Accident);
        let t0 = Utc::now();
        let t = m.step(true, Some("Vehicle Tilted 50.0°".into()), t0);
        assert_eq!(stages(&t), vec![AlertStage::Escalated, AlertStage::Notified]);
        assert!(m.step(false, None, t0 + Duration::milliseconds(100)).is_empty());
        assert_eq!(m.stage(), AlertStage::Notified);
        assert_eq!(m.case().and_then(|c| c.detail.clone()).as_deref(), Some("Vehicle Tilted 50.0°"));
    }

    #[test]
    fn test_sobriety_waits_for_verification() {
        let mut m = machine(AlertClass::Sobriety);
        let t0 = Utc::now();
        assert_eq!(stages(&m.step(true, None, t0)), vec![AlertStage::Warned]);
        // No self-heal and no timed escalation
        assert!(m.step(false, None, t0 + Duration::seconds(60)).is_empty());
        assert_eq!(m.stage(), AlertStage::Warned);

        let id = m.case().map(|c| c.id).expect("case open");
        let t = m.verification_failed(id, "no response".into(), t0 + Duration::seconds(61));
        assert_eq!(stages(&t), vec![AlertStage::Escalated, AlertStage::Notified]);
    }

    #[test]
    fn test_sobriety_pass_resolves_and_cools_down() {
        let mut m = machine(AlertClass::Sobriety);
        let t0 = Utc::now();
        m.step(true, None, t0);
        let id = m.case().map(|c| c.id).expect("case open");
        let t = m.verification_passed(id, t0 + Duration::seconds(3));
        assert_eq!(stages(&t), vec![AlertStage::Resolved, AlertStage::Idle]);
        assert!(m.step(true, None, t0 + Duration::seconds(10)).is_empty(), "cooldown");
        assert_eq!(stages(&m.step(true, None, t0 + Duration::seconds(64))), vec![AlertStage::Warned]);
    }

    #[test]
    fn test_inactive_sample_ends_rearm_hold() {
        let mut m = machine(AlertClass::Accident);
        let t0 = Utc::now();
        m.step(true, None, t0);
        m.reset(t0 + Duration::seconds(1));
        assert!(m.step(true, None, t0 + Duration::seconds(2)).is_empty(), "still tilted");
        assert!(m.step(false, None, t0 + Duration::seconds(3)).is_empty());
        assert!(!m.is_cooling_down(t0 + Duration::seconds(3)));
        let t = m.step(true, None, t0 + Duration::seconds(4));
        assert_eq!(stages(&t), vec![AlertStage::Escalated, AlertStage::Notified]);
    }

    #[test]
    fn test_rearm_clears_hold() {
        let mut m = machine(AlertClass::Sobriety);
        let t0 = Utc::now();
        m.step(true, None, t0);
        let id = m.case().map(|c| c.id).expect("case open");
        m.verification_passed(id, t0 + Duration::seconds(1));
        assert!(m.is_cooling_down(t0 + Duration::seconds(2)));
        m.rearm();
        assert_eq!(stages(&m.step(true, None, t0 + Duration::seconds(2))), vec![AlertStage::Warned]);
    }

    #[test]
    fn test_reset_from_every_stage_of_every_class() {
        for class in AlertClass::ALL {
            let mut m = machine(class);
            let t0 = Utc::now();
            m.step(true, None, t0);
            assert_ne!(m.stage(), AlertStage::Idle, "{class} should be open");
            let t = m.reset(t0 + Duration::seconds(1));
            assert_eq!(stages(&t), vec![AlertStage::Idle]);
            assert_eq!(t[0].reason, TransitionReason::ManualReset);
            assert!(m.case().is_none());
        }
    }

    #[test]
    fn test_new_case_gets_new_id() {
        let mut m = machine(AlertClass::Drowsiness);
        let t0 = Utc::now();
        m.step(true, None, t0);
        let first = m.case().map(|c| c.id);
        m.step(false, None, t0);
        m.step(true, None, t0);
        assert_ne!(m.case().map(|c| c.id), first);
    }

    #[test]
    fn test_dispatch_retry_then_give_up() {
        let mut m = machine(AlertClass::Accident);
        m.step(true, None, Utc::now());
        let id = m.case().map(|c| c.id).expect("case open");

        m.mark_dispatch_in_flight(1);
        assert!(m.pending_dispatch().is_none(), "in flight is not pending");
        assert_eq!(m.record_dispatch_result(id, false), DispatchFollowUp::Retry);
        assert_eq!(m.pending_dispatch().map(|(_, a)| a), Some(2));

        m.mark_dispatch_in_flight(2);
        assert_eq!(m.record_dispatch_result(id, false), DispatchFollowUp::GaveUp);
        assert!(m.pending_dispatch().is_none());
        assert!(m.case().is_some_and(|c| c.notified_with_warning));
    }

    #[test]
    fn test_dispatch_result_for_reset_case_ignored() {
        let mut m = machine(AlertClass::Accident);
        let t0 = Utc::now();
        m.step(true, None, t0);
        let id = m.case().map(|c| c.id).expect("case open");
        m.mark_dispatch_in_flight(1);
        m.reset(t0);
        assert_eq!(m.record_dispatch_result(id, true), DispatchFollowUp::Ignored);
    }
}
