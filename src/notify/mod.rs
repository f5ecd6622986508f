//! Notification Dispatcher
//!
//! Hands a composed `EmergencyNotification` to the external transport
//! without blocking the tick. Each dispatch runs on its own task; the
//! outcome (delivered, failed, timed out, panicked) comes back over a
//! channel that the monitor drains at the next tick boundary.
//!
//! The dispatcher never retries on its own. Retry policy belongs to the
//! alert machine (one retry, then notified-with-warning).
//!
//! ## Transports
//!
//! - `WebhookNotifier`: JSON POST to `notification.webhook_url`
//! - `LogNotifier`: writes the message to the log (no webhook configured)

mod message;
mod webhook;

pub use message::{incident_text, map_link, EmergencyNotification, MessageComposer};
pub use webhook::{LogNotifier, WebhookNotifier};

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

use crate::types::AlertClass;

/// Notification transport errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NotifyError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Recipient endpoint rejected message with status {0}")]
    Rejected(u16),

    #[error("Dispatch timed out after {0:?}")]
    Timeout(Duration),

    #[error("Dispatch task failed: {0}")]
    TaskFailed(String),
}

/// External emergency transport.
#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    /// Send exactly one outbound message.
    async fn send(&self, notification: &EmergencyNotification) -> Result<(), NotifyError>;

    /// Human-readable name for logging.
    fn name(&self) -> &str;
}

/// Result of one dispatch attempt, keyed back to its case.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchOutcome {
    pub class: AlertClass,
    pub case_id: u64,
    pub attempt: u8,
    pub result: Result<(), NotifyError>,
}

/// Fire-and-forget dispatch with a results channel.
pub struct Dispatcher {
    notifier: Arc<dyn Notifier>,
    timeout: Duration,
    results_tx: mpsc::UnboundedSender<DispatchOutcome>,
    results_rx: mpsc::UnboundedReceiver<DispatchOutcome>,
    sent: u64,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("notifier", &self.notifier.name())
            .field("timeout", &self.timeout)
            .field("sent", &self.sent)
            .finish()
    }
}

impl Dispatcher {
    pub fn new(notifier: Arc<dyn Notifier>, timeout: Duration) -> Self {
        let (results_tx, results_rx) = mpsc::unbounded_channel();
        Self {
            notifier,
            timeout,
            results_tx,
            results_rx,
            sent: 0,
        }
    }

    pub fn notifier_name(&self) -> &str {
        self.notifier.name()
    }

    /// Number of dispatch calls issued.
    pub fn sent(&self) -> u64 {
        self.sent
    }

    /// Start one send. Returns immediately; the outcome arrives via `drain`.
    pub fn dispatch(&mut self, notification: EmergencyNotification) {
        self.sent += 1;
        let results_tx = self.results_tx.clone();
        let key = (notification.class, notification.case_id, notification.attempt);

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                let _ = results_tx.send(DispatchOutcome {
                    class: key.0,
                    case_id: key.1,
                    attempt: key.2,
                    result: Err(NotifyError::TaskFailed(format!("no async runtime: {e}"))),
                });
                return;
            }
        };

        let notifier = self.notifier.clone();
        let timeout = self.timeout;
        runtime.spawn(async move {
            // Inner task isolates transport panics from the outcome report
            let send = tokio::spawn(async move { notifier.send(&notification).await });
            let result = match tokio::time::timeout(timeout, send).await {
                Ok(Ok(result)) => result,
                Ok(Err(join_err)) => Err(NotifyError::TaskFailed(join_err.to_string())),
                Err(_) => Err(NotifyError::Timeout(timeout)),
            };
            debug!(class = %key.0, case_id = key.1, attempt = key.2, ok = result.is_ok(), "Dispatch finished");
            let _ = results_tx.send(DispatchOutcome {
                class: key.0,
                case_id: key.1,
                attempt: key.2,
                result,
            });
        });
    }

    /// Every outcome that has arrived since the last call.
    pub fn drain(&mut self) -> Vec<DispatchOutcome> {
        let mut outcomes = Vec::new();
        while let Ok(outcome) = self.results_rx.try_recv() {
            outcomes.push(outcome);
        }
        outcomes
    }
}
