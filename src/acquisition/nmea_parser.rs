//! NMEA 0183 Sentence Parser
//!
//! Decodes the two positioning sentences a GPS receiver emits every second:
//!
//! - `$xxGGA` (fix data): time, lat, lon, fix quality, satellites, altitude
//! - `$xxRMC` (recommended minimum): time, status (A/V), lat, lon, date
//!
//! Any two-letter talker is accepted (GP, GN, GL, GA). Sentence layout:
//! `$TTSSS,field,field,...*hh` where `hh` is the XOR of every byte between
//! `$` and `*`. The checksum is optional on the wire; when present it must
//! match.
//!
//! Coordinates are `ddmm.mmmm` (latitude) and `dddmm.mmmm` (longitude),
//! followed by a hemisphere letter.

use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

use crate::types::GpsFix;

/// NMEA decoding errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NmeaError {
    #[error("Not an NMEA sentence: {0}")]
    InvalidEnvelope(String),

    #[error("Checksum mismatch: sentence says {expected:02X}, computed {computed:02X}")]
    ChecksumMismatch { expected: u8, computed: u8 },

    #[error("Unsupported sentence type: {0}")]
    UnsupportedSentence(String),

    #[error("{0} sentence carries no valid fix")]
    NoFix(String),

    #[error("Missing or malformed field {field} in {sentence}")]
    MalformedField { sentence: String, field: &'static str },
}

const ENVELOPE_PATTERN: &str =
    r"^\$(?P<talker>[A-Z]{2})(?P<kind>[A-Z]{3}),(?P<body>[^*]*)(?:\*(?P<checksum>[0-9A-Fa-f]{2}))?$";

fn envelope_re() -> Result<&'static Regex, NmeaError> {
    static RE: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(ENVELOPE_PATTERN))
        .as_ref()
        .map_err(|e| NmeaError::InvalidEnvelope(e.to_string()))
}

/// XOR of all bytes in `payload` (the text between `$` and `*`).
pub fn checksum(payload: &str) -> u8 {
    payload.bytes().fold(0u8, |acc, b| acc ^ b)
}

/// Parse one raw line into a valid fix.
///
/// `received_at` stamps the fix; GGA carries no date, so receipt time is
/// what the location resolver ages against.
pub fn parse_sentence(line: &str, received_at: DateTime<Utc>) -> Result<GpsFix, NmeaError> {
    let line = line.trim();
    let caps = envelope_re()?
        .captures(line)
        .ok_or_else(|| NmeaError::InvalidEnvelope(truncate(line)))?;

    if let Some(expected) = caps.name("checksum") {
        let expected = u8::from_str_radix(expected.as_str(), 16)
            .map_err(|_| NmeaError::InvalidEnvelope(truncate(line)))?;
        let payload_end = line.find('*').unwrap_or(line.len());
        let computed = checksum(&line[1..payload_end]);
        if computed != expected {
            return Err(NmeaError::ChecksumMismatch { expected, computed });
        }
    }

    let kind = caps.name("kind").map(|m| m.as_str()).unwrap_or_default();
    let body = caps.name("body").map(|m| m.as_str()).unwrap_or_default();
    let fields: Vec<&str> = body.split(',').collect();

    match kind {
        "GGA" => parse_gga(&fields, received_at),
        "RMC" => parse_rmc(&fields, received_at),
        other => Err(NmeaError::UnsupportedSentence(other.to_string())),
    }
}

// GGA: 0 time, 1 lat, 2 N/S, 3 lon, 4 E/W, 5 quality, 6 sats, 7 hdop, 8 alt, 9 M
fn parse_gga(fields: &[&str], received_at: DateTime<Utc>) -> Result<GpsFix, NmeaError> {
    let quality: u8 = field(fields, 5)
        .and_then(|q| q.parse().ok())
        .ok_or_else(|| malformed("GGA", "quality"))?;
    if quality == 0 {
        return Err(NmeaError::NoFix("GGA".to_string()));
    }

    let lat = parse_coordinate(fields, 1, 2, 2, "GGA", "latitude")?;
    let lon = parse_coordinate(fields, 3, 4, 3, "GGA", "longitude")?;

    Ok(GpsFix {
        lat,
        lon,
        valid: true,
        timestamp: received_at,
        quality: Some(quality),
        satellites: field(fields, 6).and_then(|s| s.parse().ok()),
        altitude_m: field(fields, 8).and_then(|a| a.parse().ok()),
    })
}

// RMC: 0 time, 1 status, 2 lat, 3 N/S, 4 lon, 5 E/W, 6 speed, 7 course, 8 date
fn parse_rmc(fields: &[&str], received_at: DateTime<Utc>) -> Result<GpsFix, NmeaError> {
    match field(fields, 1) {
        Some("A") => {}
        Some(_) => return Err(NmeaError::NoFix("RMC".to_string())),
        None => return Err(malformed("RMC", "status")),
    }

    let lat = parse_coordinate(fields, 2, 3, 2, "RMC", "latitude")?;
    let lon = parse_coordinate(fields, 4, 5, 3, "RMC", "longitude")?;

    Ok(GpsFix {
        lat,
        lon,
        valid: true,
        timestamp: received_at,
        quality: None,
        satellites: None,
        altitude_m: None,
    })
}

/// Decode `d{deg_digits}mm.mmmm` plus hemisphere into signed decimal degrees.
fn parse_coordinate(
    fields: &[&str],
    value_idx: usize,
    hemi_idx: usize,
    deg_digits: usize,
    sentence: &str,
    name: &'static str,
) -> Result<f64, NmeaError> {
    let raw = field(fields, value_idx).ok_or_else(|| malformed(sentence, name))?;
    if raw.len() <= deg_digits || !raw.is_char_boundary(deg_digits) {
        return Err(malformed(sentence, name));
    }
    let (deg, min) = raw.split_at(deg_digits);
    let deg: f64 = deg.parse().map_err(|_| malformed(sentence, name))?;
    let min: f64 = min.parse().map_err(|_| malformed(sentence, name))?;
    if !(0.0..60.0).contains(&min) {
        return Err(malformed(sentence, name));
    }
    let value = deg + min / 60.0;

    let limit = if deg_digits == 2 { 90.0 } else { 180.0 };
    if value > limit {
        return Err(malformed(sentence, name));
    }

    match field(fields, hemi_idx) {
        Some("N") | Some("E") => Ok(value),
        Some("S") | Some("W") => Ok(-value),
        _ => Err(malformed(sentence, "hemisphere")),
    }
}

fn field<'a>(fields: &[&'a str], idx: usize) -> Option<&'a str> {
    fields.get(idx).copied().filter(|f| !f.is_empty())
}

fn malformed(sentence: &str, field: &'static str) -> NmeaError {
    NmeaError::MalformedField {
        sentence: sentence.to_string(),
        field,
    }
}

fn truncate(line: &str) -> String {
    line.chars().take(40).collect()
}
