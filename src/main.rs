//! Cabinwatch - In-Vehicle Driver Safety Monitor
//!
//! Drives the monitor core from a recorded scenario, and hosts the offline
//! calibration and GPS diagnostic tools.
//!
//! # Usage
//!
//! ```bash
//! # Replay a recorded drive in real time, operator keys from stdin (q/a/s/r)
//! cargo run --release -- run --scenario drives/rollover.jsonl
//!
//! # Replay ten times faster with a specific config
//! cabinwatch --config van12.toml run --scenario drive.jsonl --speed 10
//!
//! # Recommend an alcohol threshold from two voltage captures
//! cabinwatch calibrate-alcohol --clean clean.csv --exposed exposed.csv
//!
//! # Summarise a captured NMEA log
//! cabinwatch gps-check --input gps.log
//! ```
//!
//! # Environment Variables
//!
//! - `CABINWATCH_CONFIG`: Path to the monitor config TOML
//! - `RUST_LOG`: Logging level (default: info)

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use cabinwatch::acquisition::{
    load_scenario, parse_sentence, LogAnnunciator, NmeaError, ReplaySensors, ScriptedTranscriber,
};
use cabinwatch::calibration::{load_voltage_samples, recommend_alcohol_threshold};
use cabinwatch::config::MonitorConfig;
use cabinwatch::notify::{map_link, LogNotifier, Notifier, WebhookNotifier};
use cabinwatch::pipeline::{read_commands, Monitor, ProcessingLoop};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "cabinwatch")]
#[command(about = "Cabinwatch In-Vehicle Driver Safety Monitor")]
#[command(version)]
struct CliArgs {
    /// Path to the monitor config TOML (overrides CABINWATCH_CONFIG)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: SubCommand,
}

#[derive(clap::Subcommand, Debug)]
enum SubCommand {
    /// Replay a JSONL scenario through the monitor
    Run {
        /// Scenario file, one JSON object per frame
        #[arg(long)]
        scenario: PathBuf,

        /// Speed multiplier (1 = real time, 10 = 10x faster, 0 = no delay)
        #[arg(long, default_value = "1")]
        speed: f64,

        /// Do not read operator commands from stdin
        #[arg(long)]
        no_stdin: bool,

        /// Fixed seed for sobriety prompts (reproducible replays)
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Recommend an alcohol threshold from clean-air and exposed captures
    CalibrateAlcohol {
        /// Voltage capture in clean air (one reading per line or CSV, last column)
        #[arg(long)]
        clean: PathBuf,
        /// Voltage capture with alcohol vapour present
        #[arg(long)]
        exposed: PathBuf,
    },

    /// Parse a captured NMEA log and summarise the fixes it contains
    GpsCheck {
        #[arg(long)]
        input: PathBuf,
    },
}

// ============================================================================
// Task Names for Supervisor Logging
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskName {
    Monitor,
    CommandReader,
}

impl std::fmt::Display for TaskName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskName::Monitor => write!(f, "Monitor"),
            TaskName::CommandReader => write!(f, "CommandReader"),
        }
    }
}

/// Run the supervisor loop: monitor tasks, cancel on failure.
///
/// The monitor finishing (end of scenario or quit) ends the session.
async fn run_supervisor(
    task_set: &mut JoinSet<Result<TaskName>>,
    cancel_token: CancellationToken,
) -> Result<()> {
    info!("🔒 Supervisor: All tasks spawned, monitoring...");

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                info!("🛑 Supervisor: Shutdown signal received");
                break;
            }
            result = task_set.join_next() => {
                match result {
                    Some(Ok(Ok(task_name))) => {
                        info!("🔒 Supervisor: Task {} completed normally", task_name);
                        if task_name == TaskName::Monitor {
                            cancel_token.cancel();
                        }
                    }
                    Some(Ok(Err(e))) => {
                        error!("🔒 Supervisor: Task failed with error: {}", e);
                        cancel_token.cancel();
                        return Err(e);
                    }
                    Some(Err(e)) => {
                        error!("🔒 Supervisor: Task panicked: {}", e);
                        cancel_token.cancel();
                        return Err(anyhow::anyhow!("Task panicked: {}", e));
                    }
                    None => {
                        info!("🔒 Supervisor: All tasks completed");
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}

// ============================================================================
// Scenario Run
// ============================================================================

fn build_notifier(config: &MonitorConfig) -> Result<Arc<dyn Notifier>> {
    let url = config.notification.webhook_url.trim();
    if url.is_empty() {
        info!("📧 Transport: log only (notification.webhook_url not set)");
        return Ok(Arc::new(LogNotifier));
    }
    let timeout = Duration::from_secs_f64(config.notification.dispatch_timeout_secs);
    let notifier = WebhookNotifier::new(url, timeout).context("Failed to build webhook client")?;
    info!("📧 Transport: webhook {}", notifier.url());
    Ok(Arc::new(notifier))
}

async fn run_scenario(
    config: MonitorConfig,
    scenario: &Path,
    speed: f64,
    read_stdin: bool,
    seed: Option<u64>,
    cancel_token: CancellationToken,
) -> Result<()> {
    let frames = load_scenario(scenario)
        .with_context(|| format!("Failed to load scenario {}", scenario.display()))?;

    let notifier = build_notifier(&config)?;
    let transcriber = Arc::new(ScriptedTranscriber::new());
    let annunciator = Box::new(LogAnnunciator::default());
    let monitor = match seed {
        Some(seed) => Monitor::with_verification_seed(&config, annunciator, transcriber.clone(), notifier, seed),
        None => Monitor::new(&config, annunciator, transcriber.clone(), notifier),
    };
    let commands = monitor.command_sender();

    let fps = config.capture.frame_rate_hz;
    anyhow::ensure!(speed.is_finite() && speed >= 0.0, "--speed must be a finite number >= 0 (got {speed})");
    let frame_interval = if speed > 0.0 {
        Duration::try_from_secs_f64(1.0 / (fps * speed))
            .with_context(|| format!("--speed {speed} gives an invalid frame interval"))?
    } else {
        Duration::ZERO
    };
    info!(
        "⏱️  Speed: {}x ({:.1}ms between frames at {} fps)",
        speed,
        frame_interval.as_secs_f64() * 1000.0,
        fps
    );

    let mut sensors = ReplaySensors::new(frames, Utc::now(), fps)
        .with_commands(commands.clone())
        .with_transcriber(transcriber);

    info!("🔒 Supervisor: Initializing task monitoring");
    let mut task_set: JoinSet<Result<TaskName>> = JoinSet::new();

    // Task 1: Monitor (frame loop)
    let loop_cancel = cancel_token.clone();
    let drain_timeout = Duration::from_secs_f64(config.notification.dispatch_timeout_secs * 3.0);
    task_set.spawn(async move {
        info!("[Monitor] Task starting");
        let processing_loop = ProcessingLoop::new(monitor, loop_cancel, frame_interval)
            .with_drain_timeout(drain_timeout);
        let _stats = processing_loop.run(&mut sensors).await;
        Ok(TaskName::Monitor)
    });

    // Task 2: Operator commands from stdin
    if read_stdin {
        let reader_cancel = cancel_token.clone();
        task_set.spawn(async move {
            info!("[CommandReader] Task starting (keys: q=quit a=alcohol test s=speak r=reset)");
            let reader = BufReader::new(tokio::io::stdin());
            let queued = read_commands(reader, commands, reader_cancel).await?;
            info!("[CommandReader] Input closed after {} commands", queued);
            Ok(TaskName::CommandReader)
        });
    }

    run_supervisor(&mut task_set, cancel_token).await
}

// ============================================================================
// Offline Tools
// ============================================================================

fn calibrate_alcohol(clean: &Path, exposed: &Path) -> Result<()> {
    let clean_samples = load_voltage_samples(clean)?;
    let exposed_samples = load_voltage_samples(exposed)?;
    let rec = recommend_alcohol_threshold(&clean_samples, &exposed_samples)
        .context("Cannot recommend a threshold from these captures")?;

    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("  Alcohol Sensor Calibration");
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    for (label, s) in [("Clean air", rec.clean), ("Exposed", rec.exposed)] {
        info!(
            "  {:<10} n={:<5} mean={:.3}V std={:.3}V min={:.3}V max={:.3}V",
            label, s.samples, s.mean, s.std_dev, s.min, s.max
        );
    }
    info!("");
    info!("  Recommended [intoxication] alcohol_threshold_volts:");
    info!("    balanced:        {:.3}", rec.balanced);
    info!("    more sensitive:  {:.3}", rec.sensitive);
    info!("    fewer false alarms: {:.3}", rec.strict);
    if rec.exposed.min <= rec.clean.max {
        warn!("  Clean and exposed captures overlap; expect false alarms near the threshold");
    }
    Ok(())
}

fn gps_check(input: &Path) -> Result<()> {
    let contents = std::fs::read_to_string(input)
        .with_context(|| format!("Failed to read NMEA log {}", input.display()))?;

    let now = Utc::now();
    let (mut valid, mut no_fix, mut bad_checksum, mut malformed, mut skipped) = (0u64, 0u64, 0u64, 0u64, 0u64);
    let mut last = None;

    for line in contents.lines().map(str::trim).filter(|l| !l.is_empty()) {
        match parse_sentence(line, now) {
            Ok(fix) => {
                valid += 1;
                last = Some(fix);
            }
            Err(NmeaError::NoFix(_)) => no_fix += 1,
            Err(NmeaError::ChecksumMismatch { .. }) => bad_checksum += 1,
            Err(NmeaError::UnsupportedSentence(_)) => skipped += 1,
            Err(NmeaError::InvalidEnvelope(_) | NmeaError::MalformedField { .. }) => malformed += 1,
        }
    }

    info!("📍 GPS log: {}", input.display());
    info!("   Valid fixes: {}", valid);
    info!("   No fix: {} | Bad checksum: {} | Malformed: {} | Other sentences: {}", no_fix, bad_checksum, malformed, skipped);
    match last {
        Some(fix) => {
            info!(
                "   Last fix: {:.6}, {:.6} (quality {:?}, satellites {:?}, altitude {:?} m)",
                fix.lat, fix.lon, fix.quality, fix.satellites, fix.altitude_m
            );
            info!("   Map: {}", map_link(fix.lat, fix.lon));
        }
        None => warn!("   No valid fix in log: notifications would report location unavailable"),
    }
    Ok(())
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_json);

    let (scenario, speed, no_stdin, seed) = match args.command {
        SubCommand::CalibrateAlcohol { clean, exposed } => return calibrate_alcohol(&clean, &exposed),
        SubCommand::GpsCheck { input } => return gps_check(&input),
        SubCommand::Run { scenario, speed, no_stdin, seed } => (scenario, speed, no_stdin, seed),
    };

    let config = match args.config.as_deref() {
        Some(path) => MonitorConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => MonitorConfig::load(None),
    };

    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("  Cabinwatch - In-Vehicle Driver Safety Monitor");
    info!(
        "  Vehicle: {} | Driver: {}",
        config.vehicle.name,
        if config.vehicle.driver.is_empty() { "unset" } else { &config.vehicle.driver }
    );
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("");

    // Graceful shutdown via Ctrl+C
    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("🛑 Received Ctrl+C, initiating shutdown...");
        shutdown_token.cancel();
    });

    let read_stdin = !no_stdin;
    let result = run_scenario(config, &scenario, speed, read_stdin, seed, cancel_token).await;

    if read_stdin {
        // A pending stdin read holds a blocking thread that would stall runtime shutdown
        if let Err(e) = &result {
            error!("{:#}", e);
            std::process::exit(1);
        }
        std::process::exit(0);
    }
    result
}
