//! Meterlight - meter-driven stage lighting
//!
//! Listens to a digital mixer's per-channel meter feed over OSC, detects
//! beats, recognizes songs against stored reference signatures, and emits
//! DMX lighting frames over Art-Net. The binary wires configuration,
//! logging and a small stdin operator prompt around the engine.

#![warn(missing_docs)]

mod logging_setup;

use std::fs;
use std::io::BufRead;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use serde::Deserialize;
use tracing::{info, warn};

use meterlight_control::{CueLibrary, CueProgram, Engine, EngineConfig, EngineHandle};
use meterlight_core::mapping::ChannelMapping;
use meterlight_core::mode::Mode;
use meterlight_core::signature::ReferenceSignature;
use meterlight_core::store::MemoryStore;

#[derive(Parser)]
#[command(name = "meterlight", version, about = "Meter-driven stage lighting")]
struct Cli {
    /// Engine configuration file (TOML); defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Session file (JSON) with reference signatures and channel mappings
    #[arg(short, long)]
    session: Option<PathBuf>,

    /// Cue program file (JSON)
    #[arg(long)]
    cues: Option<PathBuf>,

    /// Initial operating mode
    #[arg(short, long, value_enum, default_value_t = ModeArg::Maintenance)]
    mode: ModeArg,

    /// Log level when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Maintenance,
    Probe,
    Show,
}

impl From<ModeArg> for Mode {
    fn from(arg: ModeArg) -> Self {
        match arg {
            ModeArg::Maintenance => Mode::Maintenance,
            ModeArg::Probe => Mode::Probe,
            ModeArg::Show => Mode::Show,
        }
    }
}

/// On-disk session: the reference library plus the rig's channel mapping.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SessionFile {
    signatures: Vec<ReferenceSignature>,
    mappings: Vec<ChannelMapping>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging_setup::init(&cli.log_level)?;

    let config = match &cli.config {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("cannot read config {}", path.display()))?;
            toml::from_str::<EngineConfig>(&raw)
                .with_context(|| format!("cannot parse config {}", path.display()))?
        }
        None => EngineConfig::default(),
    };

    let session = match &cli.session {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("cannot read session {}", path.display()))?;
            serde_json::from_str::<SessionFile>(&raw)
                .with_context(|| format!("cannot parse session {}", path.display()))?
        }
        None => SessionFile::default(),
    };
    info!(
        signatures = session.signatures.len(),
        mappings = session.mappings.len(),
        "session loaded"
    );

    let cues = match &cli.cues {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("cannot read cues {}", path.display()))?;
            let programs: Vec<CueProgram> = serde_json::from_str(&raw)
                .with_context(|| format!("cannot parse cues {}", path.display()))?;
            CueLibrary::new(programs)
        }
        None => CueLibrary::default(),
    };

    let store = MemoryStore::with_content(session.signatures, session.mappings);
    let engine = Engine::new(config, cli.mode.into(), Box::new(store), cues)
        .context("engine startup failed")?;
    let handle = engine.handle();

    std::thread::Builder::new()
        .name("operator".into())
        .spawn(move || operator_loop(handle))
        .context("cannot spawn operator thread")?;

    engine.run().context("engine failed")?;
    Ok(())
}

const PROMPT_HELP: &str = "commands: mode <maintenance|probe|show> | capture <id> <name> | status | quit";

/// Tiny stdin prompt for the operator: mode switches, signature capture,
/// status dumps. Lives on its own thread; the engine exiting just leaves
/// this loop reading a closed channel's errors until stdin ends.
fn operator_loop(handle: EngineHandle) {
    println!("{PROMPT_HELP}");
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        let mut parts = line.split_whitespace();
        let result = match parts.next() {
            Some("mode") => match parts.next().map(parse_mode) {
                Some(Some(mode)) => handle.set_mode(mode),
                _ => {
                    println!("usage: mode <maintenance|probe|show>");
                    continue;
                }
            },
            Some("capture") => {
                let id = parts.next().and_then(|s| s.parse().ok());
                let name: String = parts.collect::<Vec<_>>().join(" ");
                match id {
                    Some(id) if !name.is_empty() => handle.capture_signature(id, name),
                    _ => {
                        println!("usage: capture <id> <name>");
                        continue;
                    }
                }
            }
            Some("status") => {
                match serde_json::to_string_pretty(handle.snapshot().as_ref()) {
                    Ok(json) => println!("{json}"),
                    Err(e) => warn!(%e, "cannot serialize snapshot"),
                }
                continue;
            }
            Some("quit") | Some("exit") => {
                let _ = handle.shutdown();
                break;
            }
            Some(_) => {
                println!("{PROMPT_HELP}");
                continue;
            }
            None => continue,
        };
        if result.is_err() {
            // Engine already stopped; nothing left to control.
            break;
        }
    }
}

fn parse_mode(s: &str) -> Option<Mode> {
    match s {
        "maintenance" => Some(Mode::Maintenance),
        "probe" => Some(Mode::Probe),
        "show" => Some(Mode::Show),
        _ => None,
    }
}
