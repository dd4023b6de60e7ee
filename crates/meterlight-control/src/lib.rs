//! Meterlight Control - network boundary and lighting scheduler
//!
//! This crate owns everything that touches a socket or a clock:
//! - **OSC**: UDP listener decoding the mixer's `/meters/{index}` feed
//! - **DMX**: Art-Net OpDmx output, one frame per universe per tick
//! - **Cues**: pre-authored lighting programs over a song's timeline
//! - **Scheduler**: cue / reactive / hold-last frame resolution
//! - **Engine**: the event loop wiring ingestion, analysis and output
//!
//! Analysis itself (beat detection, song recognition, modes) lives in
//! `meterlight-core` and is driven synchronously from the engine loop.

#![warn(missing_docs)]

/// Cue programs and libraries
pub mod cue;
/// DMX frames and Art-Net output
pub mod dmx;
/// The engine event loop
pub mod engine;
/// Error types
pub mod error;
/// OSC meter ingestion
pub mod osc;
/// The lighting scheduler
pub mod scheduler;

pub use cue::{CueEffect, CueLibrary, CueProgram, CueSegment, CueStep};
pub use dmx::{ArtNetSender, LightingFrame};
pub use engine::{Engine, EngineCommand, EngineConfig, EngineHandle, ShowSnapshot};
pub use error::{ControlError, Result};
pub use osc::{DecodeStats, MeterListener, DEFAULT_METER_PORT};
pub use scheduler::{LightingScheduler, SchedulerConfig, TickContext};
