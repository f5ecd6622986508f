//! Monitor - one logical tick of the safety core
//!
//! `Monitor::tick` advances every detector and every alert machine by
//! exactly one step. Within a tick the order is fixed:
//!
//! 1. Manual commands queued since the last tick
//! 2. Async results: verification transcript, dispatch outcomes
//! 3. GPS lines into the location resolver
//! 4. Detectors (all four, independently)
//! 5. Alert machines (one per class), opening the sobriety challenge
//! 6. Local side effects, reconciled against the machine stages
//! 7. Pending dispatches and retries
//!
//! Detectors always run before the machines read their signals, so a
//! machine never sees a half-updated tick. Nothing in here blocks: speech
//! capture and notification sends run on spawned tasks and report back
//! through channels drained at step 2.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::acquisition::{Annunciator, SensorSuite, SpeechCapability};
use crate::calibration::CalibrationStore;
use crate::config::defaults::{COMMAND_CHANNEL_CAPACITY, MAX_GPS_LINES_PER_TICK};
use crate::config::MonitorConfig;
use crate::detectors::{ChannelDetector, Detector};
use crate::escalation::{AlertMachine, DispatchFollowUp, EscalationPolicy};
use crate::location::LocationResolver;
use crate::notify::{DispatchOutcome, Dispatcher, MessageComposer, Notifier};
use crate::types::{
    AlertCase, AlertClass, AlertStage, AlertTransition, Channel, Command, DetectionSignal,
    DispatchStatus, FrameGeometry, FrameReading, Observation, Orientation, SensorFault,
    SensorSample,
};
use crate::verification::{VerificationFlow, VerificationOutcome};

// ============================================================================
// Tick Input
// ============================================================================

/// Everything read from the sensor capabilities for one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct TickInput {
    pub frame: Result<FrameReading, SensorFault>,
    pub gas: Result<f64, SensorFault>,
    pub orientation: Result<Orientation, SensorFault>,
    pub gps_lines: Vec<String>,
}

impl TickInput {
    /// Read every capability once. GPS is drained up to a per-tick cap.
    pub fn poll(sensors: &mut dyn SensorSuite) -> Self {
        let frame = sensors.capture_frame();
        let gas = sensors.read_gas_voltage();
        let orientation = sensors.read_orientation();
        let mut gps_lines = Vec::new();
        while gps_lines.len() < MAX_GPS_LINES_PER_TICK {
            match sensors.read_gps_line() {
                Some(line) => gps_lines.push(line),
                None => break,
            }
        }
        Self {
            frame,
            gas,
            orientation,
            gps_lines,
        }
    }

    /// Open eyes, neutral mouth, clean air, level vehicle, no GPS.
    pub fn quiet() -> Self {
        Self {
            frame: Ok(FrameReading::Face(FrameGeometry { ear: 0.32, mar: 0.30 })),
            gas: Ok(0.1),
            orientation: Ok(Orientation::default()),
            gps_lines: Vec::new(),
        }
    }

    pub fn with_face(mut self, ear: f64, mar: f64) -> Self {
        self.frame = Ok(FrameReading::Face(FrameGeometry { ear, mar }));
        self
    }

    pub fn with_eyes(self, ear: f64) -> Self {
        let mar = self.geometry().map_or(0.30, |g| g.mar);
        self.with_face(ear, mar)
    }

    pub fn with_mouth(self, mar: f64) -> Self {
        let ear = self.geometry().map_or(0.32, |g| g.ear);
        self.with_face(ear, mar)
    }

    pub fn with_no_face(mut self) -> Self {
        self.frame = Ok(FrameReading::NoFaceDetected);
        self
    }

    pub fn with_gas(mut self, voltage: f64) -> Self {
        self.gas = Ok(voltage);
        self
    }

    pub fn with_orientation(mut self, pitch: f64, roll: f64) -> Self {
        self.orientation = Ok(Orientation { pitch, roll });
        self
    }

    pub fn with_gps(mut self, line: &str) -> Self {
        self.gps_lines.push(line.to_string());
        self
    }

    pub fn with_camera_fault(mut self, reason: &str) -> Self {
        self.frame = Err(SensorFault::new(reason));
        self
    }

    pub fn with_gas_fault(mut self, reason: &str) -> Self {
        self.gas = Err(SensorFault::new(reason));
        self
    }

    pub fn with_orientation_fault(mut self, reason: &str) -> Self {
        self.orientation = Err(SensorFault::new(reason));
        self
    }

    fn geometry(&self) -> Option<FrameGeometry> {
        match self.frame {
            Ok(FrameReading::Face(g)) => Some(g),
            _ => None,
        }
    }

    /// What the detector for `channel` observes this tick.
    fn observation(&self, channel: Channel) -> Observation {
        match channel {
            Channel::Drowsy | Channel::Yawn => match &self.frame {
                Ok(FrameReading::Face(g)) => Observation::Sample(if channel == Channel::Drowsy {
                    SensorSample::EyeGeometry { ear: g.ear }
                } else {
                    SensorSample::MouthGeometry { mar: g.mar }
                }),
                Ok(FrameReading::NoFaceDetected) => Observation::NoFace,
                Err(fault) => Observation::Fault(fault.clone()),
            },
            Channel::Intoxicated => match &self.gas {
                Ok(voltage) => Observation::Sample(SensorSample::GasLevel { voltage: *voltage }),
                Err(fault) => Observation::Fault(fault.clone()),
            },
            Channel::Impact => match &self.orientation {
                Ok(o) => Observation::Sample(SensorSample::Orientation(*o)),
                Err(fault) => Observation::Fault(fault.clone()),
            },
        }
    }
}

// ============================================================================
// Tick Report
// ============================================================================

/// A change in the aggregated local side effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SideEffect {
    AudibleWarning { on: bool },
    PhysicalAlarm { on: bool },
}

/// One notification send started this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DispatchRequest {
    pub class: AlertClass,
    pub case_id: u64,
    pub attempt: u8,
}

/// What happened during one tick.
#[derive(Debug, Clone)]
pub struct TickReport {
    pub tick: u64,
    pub at: DateTime<Utc>,
    pub signals: Vec<DetectionSignal>,
    pub transitions: Vec<AlertTransition>,
    pub side_effects: Vec<SideEffect>,
    pub dispatched: Vec<DispatchRequest>,
    pub dispatch_results: Vec<DispatchOutcome>,
    pub verification: Option<VerificationOutcome>,
    /// Channels currently holding a stale signal after a sensor fault
    pub stale_channels: Vec<Channel>,
    /// The operator asked to quit. The caller decides what to do with it.
    pub quit_requested: bool,
}

impl TickReport {
    fn new(tick: u64, at: DateTime<Utc>) -> Self {
        Self {
            tick,
            at,
            signals: Vec::new(),
            transitions: Vec::new(),
            side_effects: Vec::new(),
            dispatched: Vec::new(),
            dispatch_results: Vec::new(),
            verification: None,
            stale_channels: Vec::new(),
            quit_requested: false,
        }
    }

    pub fn signal(&self, channel: Channel) -> Option<&DetectionSignal> {
        self.signals.iter().find(|s| s.channel == channel)
    }

    /// Transitions of `class` reaching `stage` during this tick.
    pub fn reached(&self, class: AlertClass, stage: AlertStage) -> bool {
        self.transitions
            .iter()
            .any(|t| t.class == class && t.to == stage)
    }
}

/// Running counters over the monitor's lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MonitorStats {
    pub ticks: u64,
    pub drowsiness_cases: u64,
    pub accident_cases: u64,
    pub sobriety_cases: u64,
    pub notifications_sent: u64,
    pub notifications_delivered: u64,
    /// Individual failed attempts, retries included
    pub dispatch_failures: u64,
    /// Cases marked notified-with-warning
    pub notifications_undelivered: u64,
    pub verifications_passed: u64,
    pub verifications_failed: u64,
    pub sensor_faults: u64,
    pub resets: u64,
}

impl MonitorStats {
    fn count_case_opened(&mut self, class: AlertClass) {
        match class {
            AlertClass::Drowsiness => self.drowsiness_cases += 1,
            AlertClass::Accident => self.accident_cases += 1,
            AlertClass::Sobriety => self.sobriety_cases += 1,
        }
    }
}

// ============================================================================
// Monitor
// ============================================================================

/// Aggregated side-effect state, so emitters are only called on change.
#[derive(Debug, Default, Clone, Copy)]
struct LocalAlarms {
    audible: bool,
    physical: bool,
}

/// The fusion and escalation core.
pub struct Monitor {
    calibration: Arc<CalibrationStore>,
    detectors: Vec<ChannelDetector>,
    /// One per class, in `AlertClass::ALL` order
    machines: Vec<AlertMachine>,
    verification: VerificationFlow,
    location: Arc<LocationResolver>,
    composer: MessageComposer,
    dispatcher: Dispatcher,
    annunciator: Box<dyn Annunciator>,
    speech: Arc<dyn SpeechCapability>,
    commands_tx: mpsc::Sender<Command>,
    commands_rx: mpsc::Receiver<Command>,
    alarms: LocalAlarms,
    /// Operator test applied this tick; survives a same-tick challenge pass
    manual_test_pending: bool,
    stale: BTreeSet<Channel>,
    warning_window_secs: f64,
    tick: u64,
    stats: MonitorStats,
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("tick", &self.tick)
            .field("machines", &self.machines)
            .field("dispatcher", &self.dispatcher)
            .field("stale", &self.stale)
            .finish_non_exhaustive()
    }
}

impl Monitor {
    pub fn new(
        config: &MonitorConfig,
        annunciator: Box<dyn Annunciator>,
        speech: Arc<dyn SpeechCapability>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self::build(config, annunciator, speech, notifier, VerificationFlow::new(&config.verification))
    }

    /// Same as `new` with deterministic challenge prompts.
    pub fn with_verification_seed(
        config: &MonitorConfig,
        annunciator: Box<dyn Annunciator>,
        speech: Arc<dyn SpeechCapability>,
        notifier: Arc<dyn Notifier>,
        seed: u64,
    ) -> Self {
        let verification = VerificationFlow::with_seed(&config.verification, seed);
        Self::build(config, annunciator, speech, notifier, verification)
    }

    fn build(
        config: &MonitorConfig,
        annunciator: Box<dyn Annunciator>,
        speech: Arc<dyn SpeechCapability>,
        notifier: Arc<dyn Notifier>,
        verification: VerificationFlow,
    ) -> Self {
        let calibration = Arc::new(CalibrationStore::new());
        let detectors = ChannelDetector::all(config, calibration.clone());
        let machines = AlertClass::ALL
            .iter()
            .map(|&class| AlertMachine::new(EscalationPolicy::for_class(class, &config.escalation)))
            .collect();
        let dispatcher = Dispatcher::new(
            notifier,
            std::time::Duration::from_secs_f64(config.notification.dispatch_timeout_secs),
        );
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);

        info!(
            vehicle = %config.vehicle.name,
            transport = dispatcher.notifier_name(),
            "✓ Monitor initialized"
        );

        Self {
            calibration,
            detectors,
            machines,
            verification,
            location: Arc::new(LocationResolver::new(config.location.stale_after_secs)),
            composer: MessageComposer::new(&config.vehicle, &config.notification),
            dispatcher,
            annunciator,
            speech,
            commands_tx,
            commands_rx,
            alarms: LocalAlarms::default(),
            manual_test_pending: false,
            stale: BTreeSet::new(),
            warning_window_secs: config.escalation.warning_window_secs,
            tick: 0,
            stats: MonitorStats::default(),
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Handle for injecting manual commands; applied at the next tick.
    pub fn command_sender(&self) -> mpsc::Sender<Command> {
        self.commands_tx.clone()
    }

    pub fn stats(&self) -> &MonitorStats {
        &self.stats
    }

    pub fn calibration(&self) -> &Arc<CalibrationStore> {
        &self.calibration
    }

    pub fn location(&self) -> &Arc<LocationResolver> {
        &self.location
    }

    pub fn verification(&self) -> &VerificationFlow {
        &self.verification
    }

    pub fn detectors(&self) -> &[ChannelDetector] {
        &self.detectors
    }

    pub fn machine(&self, class: AlertClass) -> Option<&AlertMachine> {
        self.machines.iter().find(|m| m.class() == class)
    }

    pub fn stage(&self, class: AlertClass) -> AlertStage {
        self.machine(class).map(AlertMachine::stage).unwrap_or_default()
    }

    pub fn case(&self, class: AlertClass) -> Option<&AlertCase> {
        self.machine(class).and_then(AlertMachine::case)
    }

    /// A send is in flight or a retry is still owed.
    pub fn has_pending_dispatch(&self) -> bool {
        self.machines.iter().filter_map(AlertMachine::case).any(|c| {
            matches!(
                c.dispatch,
                DispatchStatus::InFlight { .. } | DispatchStatus::RetryScheduled
            )
        })
    }

    // ========================================================================
    // Tick
    // ========================================================================

    pub fn tick(&mut self, input: &TickInput, now: DateTime<Utc>) -> TickReport {
        self.tick += 1;
        self.stats.ticks += 1;
        let mut report = TickReport::new(self.tick, now);

        // 1. Commands
        self.apply_commands(now, &mut report);

        // 2. Async results
        self.poll_verification(now, &mut report);
        self.drain_dispatch_results(&mut report);

        // 3. GPS
        for line in &input.gps_lines {
            self.location.ingest_line(line, now);
        }

        // 4. Detectors
        for detector in self.detectors.iter_mut() {
            let observation = input.observation(detector.channel());
            if matches!(observation, Observation::Fault(_)) {
                self.stats.sensor_faults += 1;
            }
            report.signals.push(detector.ingest(&observation, now));
        }
        self.track_staleness(&report.signals);
        report.stale_channels = self.stale.iter().copied().collect();

        // 5. Machines
        self.step_machines(&report.signals, now, &mut report.transitions);

        // 6. Side effects
        self.reconcile_side_effects(&mut report);

        // 7. Dispatch
        self.dispatch_pending(now, &mut report);

        self.manual_test_pending = false;
        report
    }

    /// Drain outstanding dispatch results and send owed retries without
    /// sampling sensors. Used after the input stream ends.
    pub fn service_dispatch(&mut self, now: DateTime<Utc>) -> TickReport {
        let mut report = TickReport::new(self.tick, now);
        self.drain_dispatch_results(&mut report);
        self.dispatch_pending(now, &mut report);
        report
    }

    fn apply_commands(&mut self, now: DateTime<Utc>, report: &mut TickReport) {
        while let Ok(command) = self.commands_rx.try_recv() {
            debug!(?command, "Applying command");
            match command {
                Command::Quit => report.quit_requested = true,
                Command::ManualAlcoholTest => {
                    for detector in self.detectors.iter_mut() {
                        if let ChannelDetector::Intoxication(d) = detector {
                            d.trigger_manual_test();
                        }
                    }
                    // An operator test always opens a case
                    if let Some(machine) = self.machines.iter_mut().find(|m| m.class() == AlertClass::Sobriety) {
                        machine.rearm();
                    }
                    self.manual_test_pending = true;
                }
                Command::StartVerification => {
                    self.verification.start_listening(self.speech.clone(), now);
                }
                Command::ResetAlerts => self.reset_all(now, &mut report.transitions),
            }
        }
    }

    /// Manual reset: every class back to Idle, challenge cancelled,
    /// detector debounce (and the manual-test latch) cleared.
    fn reset_all(&mut self, now: DateTime<Utc>, transitions: &mut Vec<AlertTransition>) {
        self.stats.resets += 1;
        for machine in self.machines.iter_mut() {
            transitions.extend(machine.reset(now));
        }
        self.verification.cancel();
        for detector in self.detectors.iter_mut() {
            detector.reset();
        }
        info!("🔄 Alerts reset by operator");
    }

    fn poll_verification(&mut self, now: DateTime<Utc>, report: &mut TickReport) {
        let Some(outcome) = self.verification.poll(now) else {
            return;
        };
        let Some(machine) = self.machines.iter_mut().find(|m| m.class() == AlertClass::Sobriety) else {
            return;
        };

        match &outcome {
            VerificationOutcome::Passed { case_id, transcript } => {
                self.stats.verifications_passed += 1;
                info!(case_id, transcript = %transcript, "✓ Sobriety challenge passed");
                let resolved = machine.verification_passed(*case_id, now);
                if !resolved.is_empty() {
                    let retrigger = self.manual_test_pending;
                    for detector in self.detectors.iter_mut() {
                        if let ChannelDetector::Intoxication(d) = detector {
                            d.reset();
                            if retrigger {
                                d.trigger_manual_test();
                            }
                        }
                    }
                    if retrigger {
                        machine.rearm();
                    }
                }
                report.transitions.extend(resolved);
            }
            VerificationOutcome::Failed { case_id, reason } => {
                self.stats.verifications_failed += 1;
                warn!(case_id, reason = %reason, "Sobriety challenge failed");
                report
                    .transitions
                    .extend(machine.verification_failed(*case_id, reason.to_string(), now));
            }
        }
        report.verification = Some(outcome);
    }

    fn drain_dispatch_results(&mut self, report: &mut TickReport) {
        for outcome in self.dispatcher.drain() {
            let Some(machine) = self.machines.iter_mut().find(|m| m.class() == outcome.class) else {
                continue;
            };
            let follow_up = machine.record_dispatch_result(outcome.case_id, outcome.result.is_ok());
            match (&outcome.result, follow_up) {
                (_, DispatchFollowUp::Delivered) => {
                    self.stats.notifications_delivered += 1;
                    info!(class = %outcome.class, case_id = outcome.case_id, attempt = outcome.attempt, "✓ Emergency notification delivered");
                }
                (Err(e), DispatchFollowUp::Retry) => {
                    self.stats.dispatch_failures += 1;
                    warn!(class = %outcome.class, case_id = outcome.case_id, error = %e, "Emergency notification failed, retrying once");
                }
                (Err(e), DispatchFollowUp::GaveUp) => {
                    self.stats.dispatch_failures += 1;
                    self.stats.notifications_undelivered += 1;
                    error!(class = %outcome.class, case_id = outcome.case_id, error = %e, "Emergency notification failed after retry, case marked notified-with-warning");
                }
                (_, DispatchFollowUp::Ignored) => {
                    debug!(class = %outcome.class, case_id = outcome.case_id, "Dispatch result for a closed case ignored");
                }
                (Ok(()), _) => {}
            }
            report.dispatch_results.push(outcome);
        }
    }

    fn track_staleness(&mut self, signals: &[DetectionSignal]) {
        for signal in signals {
            if signal.stale {
                if self.stale.insert(signal.channel) {
                    warn!(channel = %signal.channel, "⚠️ Sensor fault, holding last signal");
                }
            } else if self.stale.remove(&signal.channel) {
                info!(channel = %signal.channel, "Sensor recovered");
            }
        }
    }

    fn step_machines(
        &mut self,
        signals: &[DetectionSignal],
        now: DateTime<Utc>,
        transitions: &mut Vec<AlertTransition>,
    ) {
        let manual_latch = self.detectors.iter().any(|d| match d {
            ChannelDetector::Intoxication(det) => det.manual_latch(),
            _ => false,
        });

        for machine in self.machines.iter_mut() {
            let class = machine.class();
            let class_signals: Vec<&DetectionSignal> = signals
                .iter()
                .filter(|s| s.channel.alert_class() == class)
                .collect();
            let active = class_signals.iter().any(|s| s.active);
            let detail = active.then(|| trigger_detail(class, &class_signals, manual_latch));

            let stepped = machine.step(active, detail, now);
            for t in &stepped {
                if t.from == AlertStage::Idle && t.to != AlertStage::Idle {
                    self.stats.count_case_opened(class);
                }
            }
            transitions.extend(stepped);

            if class == AlertClass::Sobriety && machine.stage() == AlertStage::Warned && !self.verification.is_open() {
                if let Some(case) = machine.case() {
                    self.verification.open(case.id, now);
                }
            }
        }
    }

    fn reconcile_side_effects(&mut self, report: &mut TickReport) {
        let mut wanted = LocalAlarms::default();
        for machine in &self.machines {
            let stage = machine.stage();
            if matches!(stage, AlertStage::Escalated | AlertStage::Notified) {
                wanted.physical = true;
            }
            if machine.class() != AlertClass::Accident
                && matches!(stage, AlertStage::Warned | AlertStage::Escalated | AlertStage::Notified)
            {
                wanted.audible = true;
            }
        }

        if wanted.audible != self.alarms.audible {
            if wanted.audible {
                self.annunciator.sound_audible_warning(self.warning_window_secs);
            } else {
                self.annunciator.silence_audible_warning();
            }
            report.side_effects.push(SideEffect::AudibleWarning { on: wanted.audible });
        }
        if wanted.physical != self.alarms.physical {
            self.annunciator.activate_physical_alarm(wanted.physical);
            report.side_effects.push(SideEffect::PhysicalAlarm { on: wanted.physical });
        }
        self.alarms = wanted;
    }

    fn dispatch_pending(&mut self, now: DateTime<Utc>, report: &mut TickReport) {
        for machine in self.machines.iter_mut() {
            let Some((case, attempt)) = machine.pending_dispatch() else {
                continue;
            };
            let location = self.location.current(now);
            let stale = self.location.is_stale(&location);
            let notification = self.composer.compose(case, attempt, location, stale, now);
            let request = DispatchRequest {
                class: case.class,
                case_id: case.id,
                attempt,
            };

            machine.mark_dispatch_in_flight(attempt);
            self.dispatcher.dispatch(notification);
            self.stats.notifications_sent += 1;
            info!(
                class = %request.class,
                case_id = request.case_id,
                attempt,
                location_available = location.fix().is_some(),
                "📧 Dispatching emergency notification"
            );
            report.dispatched.push(request);
        }
    }
}

/// Human-readable trigger description carried on the case.
fn trigger_detail(class: AlertClass, signals: &[&DetectionSignal], manual_latch: bool) -> String {
    let active = |channel: Channel| signals.iter().find(|s| s.channel == channel && s.active);
    match class {
        AlertClass::Drowsiness => match (active(Channel::Drowsy), active(Channel::Yawn)) {
            (Some(eyes), _) => format!("Eyes closed for {} frames", eyes.consecutive_count),
            (None, Some(yawn)) => format!("Yawning detected ({:.1}x baseline)", yawn.strength),
            (None, None) => "Drowsiness detected".to_string(),
        },
        AlertClass::Accident => active(Channel::Impact)
            .map(|s| format!("Vehicle Tilted {:.1}°", s.strength))
            .unwrap_or_else(|| "Vehicle Tilted".to_string()),
        AlertClass::Sobriety => {
            if manual_latch {
                "Manual alcohol test".to_string()
            } else {
                active(Channel::Intoxicated)
                    .map(|s| format!("Alcohol sensor at {:.0}% of threshold", s.strength * 100.0))
                    .unwrap_or_else(|| "Alcohol detected".to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::{LogAnnunciator, SpeechError};
    use crate::notify::{EmergencyNotification, NotifyError};
    use async_trait::async_trait;
    use std::time::Duration;

    struct Silent;

    #[async_trait]
    impl SpeechCapability for Silent {
        async fn transcribe(&self, timeout: Duration) -> Result<String, SpeechError> {
            Err(SpeechError::Timeout(timeout))
        }
    }

    struct Accepting;

    #[async_trait]
    impl Notifier for Accepting {
        async fn send(&self, _n: &EmergencyNotification) -> Result<(), NotifyError> {
            Ok(())
        }
        fn name(&self) -> &str {
            "accepting"
        }
    }

    fn monitor() -> Monitor {
        let mut config = MonitorConfig::default();
        config.drowsiness.consecutive_frames = 3;
        Monitor::with_verification_seed(
            &config,
            Box::new(LogAnnunciator::default()),
            Arc::new(Silent),
            Arc::new(Accepting),
            7,
        )
    }

    #[test]
    fn test_observation_routing() {
        let input = TickInput::quiet().with_face(0.1, 0.9).with_gas_fault("adc");
        assert_eq!(
            input.observation(Channel::Drowsy),
            Observation::Sample(SensorSample::EyeGeometry { ear: 0.1 })
        );
        assert_eq!(
            input.observation(Channel::Yawn),
            Observation::Sample(SensorSample::MouthGeometry { mar: 0.9 })
        );
        assert!(matches!(input.observation(Channel::Intoxicated), Observation::Fault(_)));
        assert_eq!(TickInput::quiet().with_no_face().observation(Channel::Yawn), Observation::NoFace);
    }

    #[test]
    fn test_quiet_ticks_stay_idle() {
        let mut m = monitor();
        let t0 = Utc::now();
        for i in 0..5 {
            let report = m.tick(&TickInput::quiet(), t0 + chrono::Duration::milliseconds(100 * i));
            assert!(report.transitions.is_empty());
            assert!(report.side_effects.is_empty());
            assert_eq!(report.signals.len(), 4);
        }
        assert_eq!(m.stats().ticks, 5);
    }

    #[test]
    fn test_drowsiness_warning_sounds_audible_once() {
        let mut m = monitor();
        let t0 = Utc::now();
        let closed = TickInput::quiet().with_eyes(0.1);
        let mut effects = Vec::new();
        for i in 0..5 {
            let report = m.tick(&closed, t0 + chrono::Duration::milliseconds(100 * i));
            effects.extend(report.side_effects);
        }
        assert_eq!(m.stage(AlertClass::Drowsiness), AlertStage::Warned);
        assert_eq!(effects, vec![SideEffect::AudibleWarning { on: true }]);
        assert_eq!(
            m.case(AlertClass::Drowsiness).and_then(|c| c.detail.clone()).as_deref(),
            Some("Eyes closed for 5 frames")
        );
    }

    #[test]
    fn test_stale_channel_reported_and_cleared() {
        let mut m = monitor();
        let t0 = Utc::now();
        let report = m.tick(&TickInput::quiet().with_orientation_fault("i2c"), t0);
        assert_eq!(report.stale_channels, vec![Channel::Impact]);
        let report = m.tick(&TickInput::quiet(), t0 + chrono::Duration::milliseconds(100));
        assert!(report.stale_channels.is_empty());
        assert_eq!(m.stats().sensor_faults, 1);
    }

    #[test]
    fn test_quit_is_reported_not_acted_on() {
        let mut m = monitor();
        m.command_sender().try_send(Command::Quit).expect("queue has room");
        let report = m.tick(&TickInput::quiet(), Utc::now());
        assert!(report.quit_requested);
    }

    #[test]
    fn test_manual_alcohol_test_opens_sobriety_case_and_challenge() {
        let mut m = monitor();
        m.command_sender()
            .try_send(Command::ManualAlcoholTest)
            .expect("queue has room");
        let report = m.tick(&TickInput::quiet(), Utc::now());
        assert!(report.reached(AlertClass::Sobriety, AlertStage::Warned));
        assert!(m.verification().is_open());
        assert_eq!(
            m.case(AlertClass::Sobriety).and_then(|c| c.detail.clone()).as_deref(),
            Some("Manual alcohol test")
        );
    }

    #[test]
    fn test_trigger_detail_for_tilt_uses_degrees() {
        let mut signal = DetectionSignal::inactive(Channel::Impact);
        signal.active = true;
        signal.strength = 50.0;
        assert_eq!(
            trigger_detail(AlertClass::Accident, &[&signal], false),
            "Vehicle Tilted 50.0°"
        );
    }
}
