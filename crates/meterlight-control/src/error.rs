//! Error types for the I/O and scheduling layer
use thiserror::Error;

/// Control layer errors
#[derive(Error, Debug)]
pub enum ControlError {
    /// OSC decode or address error
    #[error("OSC error: {0}")]
    OscError(String),

    /// DMX output error
    #[error("DMX error: {0}")]
    DmxError(String),

    /// I/O error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Error bubbled up from the analysis core
    #[error(transparent)]
    Core(#[from] meterlight_core::CoreError),

    /// Invalid engine or scheduler configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The engine's command channel is gone
    #[error("engine is not running")]
    EngineStopped,
}

/// Result type for control operations
pub type Result<T> = std::result::Result<T, ControlError>;
