//! Seed Slicer replay tool
//!
//! Replays a session from a seed and an optional input tape and prints the
//! terminal result as JSON, so anyone can check a published score. Without a
//! tape the built-in autopilot plays. `--demo` first acquires a seed from the
//! in-memory scripted oracle.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;

use seed_slicer::config::Config;
use seed_slicer::protocol::testing::{GENESIS_BLOCK, ScriptedLedger};
use seed_slicer::protocol::{Account, SeedAcquisition};
use seed_slicer::sim::{Seed, SessionResult, TickInput, replay};
use seed_slicer::telemetry::TelemetryBus;

/// Ten minutes of play
const DEFAULT_MAX_TICKS: u64 = 60 * 60 * 10;
/// Correlation id the scripted ledger assigns to its first request
const DEMO_CORRELATION_ID: u64 = 1001;

#[derive(Serialize)]
struct Report {
    #[serde(flatten)]
    result: SessionResult,
    final_score: u64,
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let mut seed: Option<Seed> = None;
    let mut tape_path: Option<PathBuf> = None;
    let mut config_path: Option<PathBuf> = None;
    let mut max_ticks = DEFAULT_MAX_TICKS;
    let mut demo = false;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--tape" => tape_path = args.next().map(PathBuf::from),
            "--config" => config_path = args.next().map(PathBuf::from),
            "--max-ticks" => {
                max_ticks = args
                    .next()
                    .and_then(|s| s.parse::<u64>().ok())
                    .unwrap_or_else(|| usage("--max-ticks needs a number"));
            }
            "--demo" => demo = true,
            "-h" | "--help" => usage(""),
            other if other.starts_with("--") => usage(&format!("unknown option {other}")),
            other => seed = Some(Seed::new(other)),
        }
    }

    let config = match &config_path {
        Some(path) => Config::load(path).unwrap_or_else(|e| fatal(&e.to_string())),
        None => Config::default(),
    };

    let seed = match (seed, demo) {
        (Some(seed), _) => seed,
        (None, true) => demo_seed(&config).await,
        (None, false) => usage("missing <seed>"),
    };

    let tape: Vec<TickInput> = match &tape_path {
        Some(path) => {
            let json = std::fs::read_to_string(path).unwrap_or_else(|e| fatal(&e.to_string()));
            serde_json::from_str(&json).unwrap_or_else(|e| fatal(&format!("tape: {e}")))
        }
        None => Vec::new(),
    };
    let fallback = if tape_path.is_some() {
        TickInput::default()
    } else {
        TickInput::autopilot()
    };

    log::info!(
        "Replaying seed {} ({} taped ticks, limit {})",
        seed,
        tape.len(),
        max_ticks
    );
    let result = replay(seed, config.sim, &tape, fallback, max_ticks);
    let report = Report {
        final_score: result.final_score(),
        result,
    };
    match serde_json::to_string_pretty(&report) {
        Ok(json) => println!("{json}"),
        Err(e) => fatal(&e.to_string()),
    }
}

/// Acquire a seed from the scripted oracle, printing the protocol log
async fn demo_seed(config: &Config) -> Seed {
    let ledger = Arc::new(ScriptedLedger::new());
    let payload = chrono::Utc::now().timestamp_micros().unsigned_abs().to_string();
    ledger.emit_result(DEMO_CORRELATION_ID, payload, GENESIS_BLOCK + 1);

    let telemetry = TelemetryBus::new();
    let _echo = telemetry.subscribe("stderr", |event| eprintln!("{event}"));
    let mut acquisition = SeedAcquisition::new(
        ledger,
        Account("demo".into()),
        config.protocol.clone(),
        telemetry,
    );
    if let Err(e) = acquisition.acquire().await {
        fatal(&format!("seed acquisition: {e}"));
    }
    acquisition
        .take_seed()
        .unwrap_or_else(|| fatal("seed acquisition finished without a seed"))
}

fn usage(msg: &str) -> ! {
    if !msg.is_empty() {
        eprintln!("{msg}");
    }
    eprintln!("usage: seed-slicer <seed> [--tape <file>] [--config <file>] [--max-ticks N]");
    eprintln!("       seed-slicer --demo [--config <file>]");
    std::process::exit(1);
}

fn fatal(msg: &str) -> ! {
    eprintln!("{msg}");
    std::process::exit(1);
}
