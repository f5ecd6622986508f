//! Emergency transports: HTTP webhook and log-only.

use async_trait::async_trait;
use std::time::Duration;
use tracing::{error, info};

use super::{EmergencyNotification, Notifier, NotifyError};

/// POSTs the notification as JSON. Any non-2xx status is a failure.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    http: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, NotifyError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotifyError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            url: url.trim().to_string(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, notification: &EmergencyNotification) -> Result<(), NotifyError> {
        let resp = self
            .http
            .post(&self.url)
            .header("X-Alert-Class", notification.class.to_string())
            .json(notification)
            .send()
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            info!(
                class = %notification.class,
                case_id = notification.case_id,
                status = status.as_u16(),
                "📧 Emergency notification delivered"
            );
            Ok(())
        } else {
            Err(NotifyError::Rejected(status.as_u16()))
        }
    }

    fn name(&self) -> &str {
        "webhook"
    }
}

/// Writes the full message to the log. Always succeeds.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: &EmergencyNotification) -> Result<(), NotifyError> {
        error!(
            class = %notification.class,
            case_id = notification.case_id,
            recipient = %notification.recipient,
            "📧 {}",
            notification.subject
        );
        for line in notification.body.lines().filter(|l| !l.is_empty()) {
            info!("   {}", line);
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AlertClass, Location};
    use chrono::Utc;

    fn notification() -> EmergencyNotification {
        EmergencyNotification {
            class: AlertClass::Drowsiness,
            case_id: 2,
            attempt: 1,
            recipient: "ops@example.com".into(),
            subject: "EMERGENCY ALERT - DROWSINESS - Driver Not Responding".into(),
            body: "line one\n\nline two".into(),
            opened_at: Utc::now(),
            sent_at: Utc::now(),
            location: Location::Unavailable,
            location_stale: false,
            map_link: None,
        }
    }

    #[tokio::test]
    async fn test_log_notifier_always_succeeds() {
        assert_eq!(LogNotifier.send(&notification()).await, Ok(()));
    }

    #[tokio::test]
    async fn test_webhook_unreachable_is_transport_error() {
        // Port 9 (discard) on loopback: connection refused
        let notifier = WebhookNotifier::new("http://127.0.0.1:9/alert", Duration::from_secs(2))
            .expect("client builds");
        let result = notifier.send(&notification()).await;
        assert!(matches!(result, Err(NotifyError::Transport(_))));
    }

    #[test]
    fn test_notification_serializes_for_webhook() {
        let json = serde_json::to_value(notification()).expect("serializable");
        assert_eq!(json["class"], "Drowsiness");
        assert_eq!(json["location"], "Unavailable");
    }
}
