//! Meterlight Core - Domain Model and Signal Pipeline
//!
//! This crate contains the real-time signal-to-light pipeline for Meterlight:
//! - Meter samples and per-channel link watchdog
//! - Beat/onset detection with tempo estimation
//! - Reference signatures and the store adapter
//! - Song recognition against the signature library
//! - Channel/fixture mappings
//! - The Maintenance/Probe/Show mode coordinator
//!
//! Network I/O and the lighting scheduler live in `meterlight-control`;
//! this crate never touches a socket.

#![warn(missing_docs)]

use thiserror::Error;

pub mod beat;
pub mod config;
pub mod mapping;
pub mod mode;
pub mod recognize;
pub mod sample;
pub mod signature;
pub mod store;

pub use beat::{BeatDetector, BeatEvent, BeatSource};
pub use config::{BeatConfig, CoreConfig, RecognizerConfig};
pub use mapping::{ChannelMapping, FixtureBinding, Instrument};
pub use mode::{Mode, ModeCoordinator};
pub use recognize::{Recognized, RecognitionState, SongRecognizer};
pub use sample::{LinkState, LinkWatchdog, MeterSample};
pub use signature::{FeatureFrame, ReferenceSignature, SongId};
pub use store::{MemoryStore, ReferenceStore, StoreView};

/// Core pipeline errors
#[derive(Error, Debug)]
pub enum CoreError {
    /// A reference store write was attempted in a mode that forbids it
    #[error("reference store write refused in {mode} mode")]
    WriteRefused {
        /// The mode that refused the write
        mode: Mode,
    },

    /// Two fixture bindings claim the same (universe, address) slot
    #[error("DMX binding conflict: universe {universe} address {address} bound twice")]
    MappingConflict {
        /// Conflicting universe
        universe: u16,
        /// Conflicting DMX address (1-512)
        address: u16,
    },

    /// A fixture binding is structurally invalid
    #[error("invalid fixture binding: {0}")]
    InvalidBinding(String),

    /// A configuration value is out of its valid range
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Reference store backend failure
    #[error("reference store error: {0}")]
    Store(String),
}

/// Result type for core operations
pub type Result<T> = std::result::Result<T, CoreError>;
