//! Frame-driven processing loop.
//!
//! One iteration per video frame: poll the sensor suite, run one
//! `Monitor::tick`, log anything notable. The loop yields to the runtime
//! between frames so speech capture and dispatch tasks make progress.

use chrono::Utc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::monitor::{Monitor, MonitorStats, TickInput, TickReport};
use crate::acquisition::SensorSuite;
use crate::config::defaults::PROGRESS_LOG_INTERVAL_TICKS;
use crate::types::AlertClass;

/// Poll cadence while waiting for in-flight sends after the input ends.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Owns the monitor for the lifetime of one run.
///
/// Built with [`new()`](ProcessingLoop::new), then consumed by
/// [`run()`](ProcessingLoop::run).
pub struct ProcessingLoop {
    monitor: Monitor,
    cancel_token: CancellationToken,
    frame_interval: Duration,
    drain_timeout: Duration,
}

impl ProcessingLoop {
    pub fn new(monitor: Monitor, cancel_token: CancellationToken, frame_interval: Duration) -> Self {
        Self {
            monitor,
            cancel_token,
            frame_interval,
            drain_timeout: Duration::from_secs(30),
        }
    }

    /// How long to keep servicing dispatch after the source is exhausted.
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Run until the source is exhausted, the operator quits, or cancellation.
    ///
    /// Returns final monitor statistics.
    pub async fn run<S: SensorSuite>(mut self, sensors: &mut S) -> MonitorStats {
        info!("📊 Monitoring driver from {}...", sensors.source_name());
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

        let mut frames = tokio::time::interval(self.frame_interval.max(Duration::from_millis(1)));
        frames.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!("[Monitor] Shutdown signal received");
                    break;
                }
                _ = frames.tick() => {}
            }

            if sensors.is_exhausted() {
                info!(
                    "[Monitor] Source reached end ({} frames processed)",
                    self.monitor.stats().ticks
                );
                break;
            }

            let input = TickInput::poll(sensors);
            let now = sensors.timestamp().unwrap_or_else(Utc::now);
            let report = self.monitor.tick(&input, now);
            log_report(&report);

            if report.quit_requested {
                info!("[Monitor] Quit requested by operator");
                break;
            }

            if report.tick % PROGRESS_LOG_INTERVAL_TICKS == 0 {
                self.log_progress(report.tick);
            }
        }

        self.drain_dispatch().await;

        let stats = self.monitor.stats().clone();
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        info!("📊 Session complete:");
        info!("   Frames processed: {}", stats.ticks);
        info!(
            "   Cases opened: drowsiness {} | accident {} | sobriety {}",
            stats.drowsiness_cases, stats.accident_cases, stats.sobriety_cases
        );
        info!(
            "   Notifications: {} sent, {} delivered, {} undelivered",
            stats.notifications_sent, stats.notifications_delivered, stats.notifications_undelivered
        );
        info!(
            "   Sobriety challenges: {} passed, {} failed",
            stats.verifications_passed, stats.verifications_failed
        );
        info!("   Sensor faults: {}", stats.sensor_faults);
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        stats
    }

    /// Keep collecting dispatch outcomes (and sending the owed retry) so an
    /// emergency raised on the last frame is not dropped at exit.
    async fn drain_dispatch(&mut self) {
        if !self.monitor.has_pending_dispatch() {
            return;
        }
        info!("[Monitor] Waiting for in-flight emergency notifications");
        let deadline = tokio::time::Instant::now() + self.drain_timeout;
        while self.monitor.has_pending_dispatch() {
            if tokio::time::Instant::now() >= deadline || self.cancel_token.is_cancelled() {
                warn!("[Monitor] Exiting with emergency notifications still in flight");
                return;
            }
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
            self.monitor.service_dispatch(Utc::now());
        }
    }

    fn log_progress(&self, tick: u64) {
        let stages: Vec<String> = AlertClass::ALL
            .iter()
            .map(|&class| format!("{}={}", class, self.monitor.stage(class)))
            .collect();
        info!(
            tick,
            calibrated = self.monitor.calibration().is_complete(),
            "📈 {}",
            stages.join(" ")
        );
    }
}

fn log_report(report: &TickReport) {
    if let Some(outcome) = &report.verification {
        info!(case_id = outcome.case_id(), "Verification finished at tick {}", report.tick);
    }
    for request in &report.dispatched {
        if request.attempt > 1 {
            warn!(class = %request.class, case_id = request.case_id, "Retry dispatched");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::{LogAnnunciator, SpeechCapability, SpeechError};
    use crate::config::MonitorConfig;
    use crate::notify::{EmergencyNotification, Notifier, NotifyError};
    use crate::types::{FrameGeometry, FrameReading, Orientation, SensorFault};
    use async_trait::async_trait;
    use std::sync::Arc;

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

    /// Level vehicle, rolled over after `tilt_from` frames, ends after `frames`.
    struct Rollover {
        frames: usize,
        tilt_from: usize,
        served: usize,
    }

    impl SensorSuite for Rollover {
        fn capture_frame(&mut self) -> Result<FrameReading, SensorFault> {
            self.served += 1;
            Ok(FrameReading::Face(FrameGeometry { ear: 0.3, mar: 0.3 }))
        }
        fn read_gas_voltage(&mut self) -> Result<f64, SensorFault> {
            Ok(0.1)
        }
        fn read_orientation(&mut self) -> Result<Orientation, SensorFault> {
            let roll = if self.served > self.tilt_from { 80.0 } else { 0.0 };
            Ok(Orientation { pitch: 0.0, roll })
        }
        fn read_gps_line(&mut self) -> Option<String> {
            None
        }
        fn is_exhausted(&self) -> bool {
            self.served >= self.frames
        }
        fn source_name(&self) -> &str {
            "rollover"
        }
    }

    fn monitor() -> Monitor {
        Monitor::new(
            &MonitorConfig::default(),
            Box::new(LogAnnunciator::default()),
            Arc::new(Silent),
            Arc::new(Accepting),
        )
    }

    #[tokio::test]
    async fn test_runs_until_source_exhausted() {
        let mut sensors = Rollover { frames: 12, tilt_from: 100, served: 0 };
        let stats = ProcessingLoop::new(monitor(), CancellationToken::new(), Duration::from_millis(1))
            .run(&mut sensors)
            .await;
        assert_eq!(stats.ticks, 12);
        assert_eq!(stats.notifications_sent, 0);
    }

    #[tokio::test]
    async fn test_last_frame_emergency_is_delivered_before_exit() {
        let mut sensors = Rollover { frames: 5, tilt_from: 4, served: 0 };
        let stats = ProcessingLoop::new(monitor(), CancellationToken::new(), Duration::from_millis(1))
            .run(&mut sensors)
            .await;
        assert_eq!(stats.accident_cases, 1);
        assert_eq!(stats.notifications_sent, 1);
        assert_eq!(stats.notifications_delivered, 1);
    }

    #[tokio::test]
    async fn test_cancellation_stops_loop() {
        let token = CancellationToken::new();
        token.cancel();
        let mut sensors = Rollover { frames: 1_000_000, tilt_from: usize::MAX, served: 0 };
        let stats = ProcessingLoop::new(monitor(), token, Duration::from_millis(1))
            .run(&mut sensors)
            .await;
        assert!(stats.ticks < 1_000_000);
    }
}
