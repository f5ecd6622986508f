//! Emergency message composition.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::defaults::MAP_LINK_PREFIX;
use crate::config::{NotificationConfig, VehicleInfo};
use crate::types::{AlertCase, AlertClass, Location};

/// One outbound emergency message, ready for any transport.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmergencyNotification {
    pub class: AlertClass,
    pub case_id: u64,
    /// 1 for the first send, 2 for the retry
    pub attempt: u8,
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub opened_at: DateTime<Utc>,
    pub sent_at: DateTime<Utc>,
    pub location: Location,
    pub location_stale: bool,
    pub map_link: Option<String>,
}

/// Incident line for the subject.
pub fn incident_text(class: AlertClass, detail: Option<&str>) -> String {
    match class {
        AlertClass::Drowsiness => "DROWSINESS - Driver Not Responding".to_string(),
        AlertClass::Accident => match detail {
            Some(d) if d.starts_with("Vehicle Tilted") => format!("ACCIDENT - {d}"),
            _ => "ACCIDENT - Vehicle Tilted".to_string(),
        },
        AlertClass::Sobriety => "ALCOHOL DETECTED - Failed Sobriety Test".to_string(),
    }
}

pub fn map_link(lat: f64, lon: f64) -> String {
    format!("{MAP_LINK_PREFIX}{lat:.6},{lon:.6}")
}

/// Builds messages with the vehicle identity and recipient baked in.
#[derive(Debug, Clone)]
pub struct MessageComposer {
    vehicle: VehicleInfo,
    recipient: String,
}

impl MessageComposer {
    pub fn new(vehicle: &VehicleInfo, notification: &NotificationConfig) -> Self {
        Self {
            vehicle: vehicle.clone(),
            recipient: notification.recipient.clone(),
        }
    }

    pub fn compose(
        &self,
        case: &AlertCase,
        attempt: u8,
        location: Location,
        location_stale: bool,
        now: DateTime<Utc>,
    ) -> EmergencyNotification {
        let incident = incident_text(case.class, case.detail.as_deref());
        let subject = format!("EMERGENCY ALERT - {incident}");

        let mut body = String::new();
        body.push_str("EMERGENCY ALERT\n\n");
        body.push_str(&format!("Incident: {incident}\n"));
        body.push_str(&format!("Vehicle: {}\n", self.vehicle.name));
        if !self.vehicle.driver.is_empty() {
            body.push_str(&format!("Driver: {}\n", self.vehicle.driver));
        }
        if let Some(detail) = case.detail.as_deref() {
            body.push_str(&format!("Detail: {detail}\n"));
        }
        body.push_str(&format!("Opened: {}\n", case.opened_at.format("%Y-%m-%d %H:%M:%S UTC")));
        body.push_str(&format!("Sent: {}\n\n", now.format("%Y-%m-%d %H:%M:%S UTC")));

        let link = match location {
            Location::Fix(fix) => {
                body.push_str("GPS Coordinates:\n");
                body.push_str(&format!("- Latitude: {:.6}\n", fix.lat));
                body.push_str(&format!("- Longitude: {:.6}\n", fix.lon));
                body.push_str(&format!("- Fix age: {:.0}s", fix.age_seconds));
                body.push_str(if location_stale { " (stale)\n" } else { "\n" });
                let link = map_link(fix.lat, fix.lon);
                body.push_str(&format!("\nMap: {link}\n"));
                Some(link)
            }
            Location::Unavailable => {
                body.push_str("GPS Coordinates: location unavailable\n");
                None
            }
        };

        if attempt > 1 {
            body.push_str(&format!("\n(delivery attempt {attempt})\n"));
        }

        EmergencyNotification {
            class: case.class,
            case_id: case.id,
            attempt,
            recipient: self.recipient.clone(),
            subject,
            body,
            opened_at: case.opened_at,
            sent_at: now,
            location,
            location_stale,
            map_link: link,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AlertStage, DispatchStatus, LocationFix};

    fn case(class: AlertClass, detail: Option<&str>) -> AlertCase {
        AlertCase {
            id: 9,
            class,
            stage: AlertStage::Notified,
            opened_at: Utc::now(),
            last_escalated_at: Utc::now(),
            detail: detail.map(str::to_string),
            dispatch: DispatchStatus::NotRequested,
            notified_with_warning: false,
        }
    }

    fn composer() -> MessageComposer {
        MessageComposer::new(&VehicleInfo::default(), &NotificationConfig::default())
    }

    #[test]
    fn test_subjects_per_class() {
        let c = composer();
        let now = Utc::now();
        let subjects: Vec<String> = [
            case(AlertClass::Drowsiness, None),
            case(AlertClass::Accident, Some("Vehicle Tilted 50.0°")),
            case(AlertClass::Sobriety, Some("no response before deadline")),
        ]
        .iter()
        .map(|k| c.compose(k, 1, Location::Unavailable, false, now).subject)
        .collect();
        assert_eq!(
            subjects,
            vec![
                "EMERGENCY ALERT - DROWSINESS - Driver Not Responding",
                "EMERGENCY ALERT - ACCIDENT - Vehicle Tilted 50.0°",
                "EMERGENCY ALERT - ALCOHOL DETECTED - Failed Sobriety Test",
            ]
        );
    }

    #[test]
    fn test_unavailable_location_marked() {
        let n = composer().compose(&case(AlertClass::Accident, None), 1, Location::Unavailable, false, Utc::now());
        assert!(n.body.contains("location unavailable"));
        assert!(n.map_link.is_none());
    }

    #[test]
    fn test_fix_produces_map_link() {
        let location = Location::Fix(LocationFix { lat: 48.1173, lon: 11.5167, age_seconds: 3.0 });
        let n = composer().compose(&case(AlertClass::Drowsiness, None), 1, location, false, Utc::now());
        assert_eq!(
            n.map_link.as_deref(),
            Some("https://www.google.com/maps?q=48.117300,11.516700")
        );
        assert!(n.body.contains("Latitude: 48.117300"));
        assert!(!n.body.contains("(stale)"));
    }
}
