//! Scenario Replay - recorded sensor streams for the frame loop
//!
//! A scenario is a JSONL file, one object per video frame. Every field is
//! optional; face, gas and orientation values persist until a later frame
//! changes them, so a scenario only has to spell out what moves.
//!
//! ```text
//! {"t": 0.0, "ear": 0.31, "mar": 0.30, "gas": 0.1, "pitch": 0.0, "roll": 0.0}
//! {"t": 0.1, "gps": ["$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47"]}
//! {"t": 0.2, "ear": 0.12}
//! {"t": 5.0, "gas": 2.1, "command": "s", "speech": "apple guitar jacket kitchen"}
//! {"t": 9.0, "accel": [0.0, 0.98, 0.2], "fault": ["camera"]}
//! ```
//!
//! - `t`: seconds since scenario start (default: frame index / frame rate)
//! - `no_face`: nobody in view this frame
//! - `accel`: 3-axis g-vector, converted to pitch/roll
//! - `fault`: per-frame read failures (`camera`, `gas`, `orientation`)
//! - `command`: operator key injected before the frame is processed
//! - `speech`: what the driver says when the microphone is next opened

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::capabilities::{SensorSuite, SpeechCapability, SpeechError};
use crate::config::defaults::{MAX_SCENARIO_OFFSET_SECS, SCRIPTED_SPEECH_LATENCY_MS};
use crate::types::{Command, FrameGeometry, FrameReading, Orientation, SensorFault};

const FAULT_NAMES: [&str; 3] = ["camera", "gas", "orientation"];

/// Scenario loading errors
#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("Scenario I/O error ({0:?}): {1}")]
    Io(PathBuf, std::io::Error),

    #[error("Scenario line {line}: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("Scenario line {line}: unknown fault '{name}' (expected camera, gas or orientation)")]
    UnknownFault { line: usize, name: String },

    #[error("Scenario line {line}: frame time {t} is outside [0, {max}] seconds")]
    BadOffset { line: usize, t: f64, max: f64 },

    #[error("Scenario {0:?} contains no frames")]
    Empty(PathBuf),
}

/// One recorded frame.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScenarioFrame {
    #[serde(default)]
    pub t: Option<f64>,
    #[serde(default)]
    pub ear: Option<f64>,
    #[serde(default)]
    pub mar: Option<f64>,
    #[serde(default)]
    pub no_face: bool,
    #[serde(default)]
    pub gas: Option<f64>,
    #[serde(default)]
    pub pitch: Option<f64>,
    #[serde(default)]
    pub roll: Option<f64>,
    #[serde(default)]
    pub accel: Option<[f64; 3]>,
    #[serde(default)]
    pub gps: Vec<String>,
    #[serde(default)]
    pub fault: Vec<String>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub speech: Option<String>,
}

/// Read a JSONL scenario. Blank lines and `#` comments are skipped.
pub fn load_scenario(path: &Path) -> Result<Vec<ScenarioFrame>, ScenarioError> {
    let contents =
        std::fs::read_to_string(path).map_err(|e| ScenarioError::Io(path.to_path_buf(), e))?;
    let frames = parse_scenario(&contents)?;
    if frames.is_empty() {
        return Err(ScenarioError::Empty(path.to_path_buf()));
    }
    info!(path = %path.display(), frames = frames.len(), "📂 Loaded scenario");
    Ok(frames)
}

pub fn parse_scenario(contents: &str) -> Result<Vec<ScenarioFrame>, ScenarioError> {
    let mut frames = Vec::new();
    for (idx, raw) in contents.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let frame: ScenarioFrame = serde_json::from_str(line)
            .map_err(|source| ScenarioError::Parse { line: idx + 1, source })?;
        if let Some(t) = frame.t.filter(|t| !(0.0..=MAX_SCENARIO_OFFSET_SECS).contains(t)) {
            return Err(ScenarioError::BadOffset {
                line: idx + 1,
                t,
                max: MAX_SCENARIO_OFFSET_SECS,
            });
        }
        if let Some(name) = frame.fault.iter().find(|f| !FAULT_NAMES.contains(&f.as_str())) {
            return Err(ScenarioError::UnknownFault {
                line: idx + 1,
                name: name.clone(),
            });
        }
        frames.push(frame);
    }
    Ok(frames)
}

// ============================================================================
// Replay Sensor Suite
// ============================================================================

/// Serves a scenario frame by frame through the `SensorSuite` contract.
///
/// `capture_frame` advances to the next frame; the other reads return that
/// frame's values until the next capture.
#[derive(Debug)]
pub struct ReplaySensors {
    frames: Vec<ScenarioFrame>,
    served: usize,
    start: DateTime<Utc>,
    frame_secs: f64,
    now: Option<DateTime<Utc>>,
    geometry: FrameGeometry,
    gas: f64,
    orientation: Orientation,
    faults: Vec<String>,
    gps: VecDeque<String>,
    commands: Option<mpsc::Sender<Command>>,
    transcriber: Option<Arc<ScriptedTranscriber>>,
}

impl ReplaySensors {
    pub fn new(frames: Vec<ScenarioFrame>, start: DateTime<Utc>, frame_rate_hz: f64) -> Self {
        Self {
            frames,
            served: 0,
            start,
            frame_secs: 1.0 / frame_rate_hz,
            now: None,
            geometry: FrameGeometry { ear: 0.32, mar: 0.30 },
            gas: 0.1,
            orientation: Orientation::default(),
            faults: Vec::new(),
            gps: VecDeque::new(),
            commands: None,
            transcriber: None,
        }
    }

    /// Forward each frame's `command` into the monitor's queue.
    pub fn with_commands(mut self, commands: mpsc::Sender<Command>) -> Self {
        self.commands = Some(commands);
        self
    }

    /// Feed each frame's `speech` into the scripted transcriber.
    pub fn with_transcriber(mut self, transcriber: Arc<ScriptedTranscriber>) -> Self {
        self.transcriber = Some(transcriber);
        self
    }

    pub fn frames_served(&self) -> usize {
        self.served
    }

    fn has_fault(&self, name: &str) -> bool {
        self.faults.iter().any(|f| f == name)
    }

    fn advance(&mut self) -> Option<bool> {
        let frame = self.frames.get(self.served)?.clone();
        let index = self.served;
        self.served += 1;

        let t = frame.t.unwrap_or(index as f64 * self.frame_secs);
        self.now = Some(self.start + crate::escalation::seconds(t));

        if let Some(ear) = frame.ear {
            self.geometry.ear = ear;
        }
        if let Some(mar) = frame.mar {
            self.geometry.mar = mar;
        }
        if let Some(gas) = frame.gas {
            self.gas = gas;
        }
        if let Some(pitch) = frame.pitch {
            self.orientation.pitch = pitch;
        }
        if let Some(roll) = frame.roll {
            self.orientation.roll = roll;
        }
        if let Some([x, y, z]) = frame.accel {
            self.orientation = Orientation::from_acceleration(x, y, z);
        }
        self.faults = frame.fault;
        self.gps.extend(frame.gps);

        if let Some(key) = frame.command.as_deref() {
            self.inject_command(key);
        }
        if let (Some(speech), Some(transcriber)) = (frame.speech, self.transcriber.as_ref()) {
            transcriber.push(speech);
        }
        Some(frame.no_face)
    }

    fn inject_command(&self, key: &str) {
        let Some(commands) = self.commands.as_ref() else {
            debug!(key, "Scenario command ignored: no command channel");
            return;
        };
        match key.parse::<Command>() {
            Ok(command) => {
                if let Err(e) = commands.try_send(command) {
                    warn!(error = %e, "Scenario command dropped");
                }
            }
            Err(e) => warn!("[Replay] {}", e),
        }
    }
}

impl SensorSuite for ReplaySensors {
    fn capture_frame(&mut self) -> Result<FrameReading, SensorFault> {
        let Some(no_face) = self.advance() else {
            return Err(SensorFault::new("end of scenario"));
        };
        if self.has_fault("camera") {
            Err(SensorFault::new("camera read failed"))
        } else if no_face {
            Ok(FrameReading::NoFaceDetected)
        } else {
            Ok(FrameReading::Face(self.geometry))
        }
    }

    fn read_gas_voltage(&mut self) -> Result<f64, SensorFault> {
        if self.has_fault("gas") {
            return Err(SensorFault::new("gas ADC read failed"));
        }
        Ok(self.gas)
    }

    fn read_orientation(&mut self) -> Result<Orientation, SensorFault> {
        if self.has_fault("orientation") {
            return Err(SensorFault::new("accelerometer read failed"));
        }
        Ok(self.orientation)
    }

    fn read_gps_line(&mut self) -> Option<String> {
        self.gps.pop_front()
    }

    fn is_exhausted(&self) -> bool {
        self.served >= self.frames.len()
    }

    fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.now
    }

    fn source_name(&self) -> &str {
        "scenario"
    }
}

// ============================================================================
// Scripted Transcriber
// ============================================================================

/// Speech capability that returns queued transcripts in order.
/// An empty queue behaves like a driver who says nothing.
#[derive(Debug)]
pub struct ScriptedTranscriber {
    queue: Mutex<VecDeque<String>>,
    latency: Duration,
}

impl ScriptedTranscriber {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            latency: Duration::from_millis(SCRIPTED_SPEECH_LATENCY_MS),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn push(&self, transcript: impl Into<String>) {
        let mut queue = self.queue.lock().unwrap_or_else(|p| p.into_inner());
        queue.push_back(transcript.into());
    }

    fn pop(&self) -> Option<String> {
        let mut queue = self.queue.lock().unwrap_or_else(|p| p.into_inner());
        queue.pop_front()
    }
}

impl Default for ScriptedTranscriber {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SpeechCapability for ScriptedTranscriber {
    async fn transcribe(&self, timeout: Duration) -> Result<String, SpeechError> {
        tokio::time::sleep(self.latency.min(timeout)).await;
        self.pop().ok_or(SpeechError::Timeout(timeout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENARIO: &str = r#"
# warm-up
{"t": 0.0, "ear": 0.3, "gas": 0.2}
{"t": 0.1, "no_face": true, "gps": ["$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47"]}
{"t": 0.2, "fault": ["gas"], "command": "a"}
{"t": 0.3, "accel": [0.0, 1.0, 0.0], "speech": "apple banana"}
"#;

    #[test]
    fn test_parse_skips_comments_and_blank_lines() {
        let frames = parse_scenario(SCENARIO).expect("valid scenario");
        assert_eq!(frames.len(), 4);
        assert!(frames[1].no_face);
        assert_eq!(frames[3].accel, Some([0.0, 1.0, 0.0]));
    }

    #[test]
    fn test_unknown_fault_rejected_with_line() {
        let err = parse_scenario("{}\n{\"fault\": [\"lidar\"]}").unwrap_err();
        assert!(matches!(err, ScenarioError::UnknownFault { line: 2, .. }));
    }

    #[test]
    fn test_out_of_range_frame_time_rejected() {
        let err = parse_scenario("{\"t\": 0.0}\n{\"t\": 1e300}").unwrap_err();
        assert!(matches!(err, ScenarioError::BadOffset { line: 2, .. }));
        assert!(matches!(
            parse_scenario("{\"t\": -1.0}").unwrap_err(),
            ScenarioError::BadOffset { line: 1, .. }
        ));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = parse_scenario("{\"eer\": 0.1}").unwrap_err();
        assert!(matches!(err, ScenarioError::Parse { line: 1, .. }));
    }

    #[test]
    fn test_values_persist_and_faults_are_per_frame() {
        let start = Utc::now();
        let (tx, mut rx) = mpsc::channel(4);
        let transcriber = Arc::new(ScriptedTranscriber::new());
        let mut sensors = ReplaySensors::new(parse_scenario(SCENARIO).expect("valid"), start, 10.0)
            .with_commands(tx)
            .with_transcriber(transcriber.clone());

        assert!(matches!(sensors.capture_frame(), Ok(FrameReading::Face(g)) if g.ear == 0.3));
        assert_eq!(sensors.read_gas_voltage(), Ok(0.2));
        assert_eq!(sensors.timestamp(), Some(start));

        assert_eq!(sensors.capture_frame(), Ok(FrameReading::NoFaceDetected));
        assert!(sensors.read_gps_line().is_some());
        assert!(sensors.read_gps_line().is_none());

        assert!(sensors.capture_frame().is_ok());
        assert!(sensors.read_gas_voltage().is_err());
        assert_eq!(rx.try_recv().ok(), Some(Command::ManualAlcoholTest));

        sensors.capture_frame().expect("frame 4");
        assert_eq!(sensors.read_gas_voltage(), Ok(0.2), "gas value persists after the fault frame");
        let o = sensors.read_orientation().expect("orientation");
        assert!((o.roll - 90.0).abs() < 1e-9);
        assert_eq!(transcriber.pop().as_deref(), Some("apple banana"));

        assert!(sensors.is_exhausted());
        assert!(sensors.capture_frame().is_err());
    }

    #[tokio::test]
    async fn test_scripted_transcriber_times_out_when_empty() {
        let transcriber = ScriptedTranscriber::new().with_latency(Duration::from_millis(1));
        transcriber.push("apple");
        assert_eq!(transcriber.transcribe(Duration::from_secs(1)).await, Ok("apple".to_string()));
        assert_eq!(
            transcriber.transcribe(Duration::from_secs(1)).await,
            Err(SpeechError::Timeout(Duration::from_secs(1)))
        );
    }
}
