//! Location Resolver - latest valid GPS fix
//!
//! Raw NMEA lines go in; the most recent valid fix comes out, aged against
//! the caller's clock. A fix is only ever replaced by a newer valid fix,
//! never cleared. The slot is published atomically so the notification
//! formatter can read it from a dispatch task.

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info};

use crate::acquisition::nmea_parser::{parse_sentence, NmeaError};
use crate::types::{GpsFix, Location, LocationFix};

#[derive(Debug)]
pub struct LocationResolver {
    latest: ArcSwapOption<GpsFix>,
    stale_after_secs: f64,
}

impl LocationResolver {
    pub fn new(stale_after_secs: f64) -> Self {
        Self {
            latest: ArcSwapOption::empty(),
            stale_after_secs,
        }
    }

    /// Feed one raw line. Returns the fix when the line carried a valid one.
    pub fn ingest_line(&self, line: &str, now: DateTime<Utc>) -> Option<GpsFix> {
        match parse_sentence(line, now) {
            Ok(fix) => {
                self.update(fix.clone());
                Some(fix)
            }
            Err(NmeaError::UnsupportedSentence(_)) => None,
            Err(e) => {
                debug!(error = %e, "GPS line rejected");
                None
            }
        }
    }

    /// Replace the cached fix. Invalid fixes are ignored.
    pub fn update(&self, fix: GpsFix) {
        if !fix.valid {
            return;
        }
        if self.latest.load().is_none() {
            info!(lat = fix.lat, lon = fix.lon, "📍 First GPS fix acquired");
        }
        self.latest.store(Some(Arc::new(fix)));
    }

    pub fn latest_fix(&self) -> Option<Arc<GpsFix>> {
        self.latest.load_full()
    }

    /// Current location with its age, or `Unavailable` if no fix was ever seen.
    pub fn current(&self, now: DateTime<Utc>) -> Location {
        match self.latest.load_full() {
            Some(fix) => {
                let age = (now - fix.timestamp).num_milliseconds().max(0) as f64 / 1000.0;
                Location::Fix(LocationFix {
                    lat: fix.lat,
                    lon: fix.lon,
                    age_seconds: age,
                })
            }
            None => Location::Unavailable,
        }
    }

    /// True when `location` is a fix older than the staleness limit.
    pub fn is_stale(&self, location: &Location) -> bool {
        location
            .fix()
            .is_some_and(|f| f.age_seconds > self.stale_after_secs)
    }
}
