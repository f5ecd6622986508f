//! Sensor data acquisition module
//!
//! Capability contracts for the hardware layer, NMEA decoding for the GPS
//! stream, and JSONL scenario replay standing in for live sensors.

mod capabilities;
pub mod nmea_parser;
pub mod replay;

pub use capabilities::{Annunciator, LogAnnunciator, SensorSuite, SpeechCapability, SpeechError};
pub use nmea_parser::{parse_sentence, NmeaError};
pub use replay::{load_scenario, ReplaySensors, ScenarioError, ScenarioFrame, ScriptedTranscriber};
