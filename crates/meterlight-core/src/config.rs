//! Core pipeline configuration
//!
//! All product-tuning parameters (thresholds, windows, intervals) live here
//! so they can be loaded from the TOML config file instead of being
//! hard-coded. Validation happens once, at startup or mode entry.

use serde::{Deserialize, Serialize};

use crate::{CoreError, Result};

/// One channel watched by the beat detector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BeatChannel {
    /// Mixer channel index
    pub channel: u16,
    /// Contribution to the composite beat strength (weights should sum to ~1)
    pub weight: f32,
}

/// Beat detector tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeatConfig {
    /// Channels that carry the rhythm signal
    pub channels: Vec<BeatChannel>,
    /// Onset when level exceeds the trailing moving average times this factor
    pub threshold_factor: f32,
    /// Absolute floor below which no onset fires (rejects noise in silence)
    pub min_level: f32,
    /// Minimum spacing between onsets on one channel, seconds
    pub refractory_secs: f64,
    /// Cross-channel onsets within this window merge into one composite event
    pub coincidence_secs: f64,
    /// Length of the trailing envelope, in samples
    pub envelope_len: usize,
    /// Number of recent beats kept for the tempo estimate
    pub tempo_window: usize,
}

impl Default for BeatConfig {
    fn default() -> Self {
        Self {
            // Bass drum dominates, snare and bass guitar stabilize.
            channels: vec![
                BeatChannel {
                    channel: 0,
                    weight: 0.5,
                },
                BeatChannel {
                    channel: 1,
                    weight: 0.3,
                },
                BeatChannel {
                    channel: 2,
                    weight: 0.2,
                },
            ],
            threshold_factor: 1.5,
            min_level: 0.1,
            refractory_secs: 0.2,
            coincidence_secs: 0.03,
            envelope_len: 32,
            tempo_window: 16,
        }
    }
}

/// Song recognizer tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognizerConfig {
    /// Rolling comparison window, seconds
    pub window_secs: f64,
    /// Feature frame length, seconds
    pub frame_secs: f64,
    /// How often the library is re-scored, seconds
    pub rescore_secs: f64,
    /// Minimum best-candidate similarity to recognize
    pub threshold: f32,
    /// Minimum lead over the runner-up
    pub margin: f32,
    /// How long a candidate must hold threshold+margin before we switch
    pub hold_secs: f64,
    /// Without a qualifying match for this long, state returns to unknown
    pub unknown_timeout_secs: f64,
    /// At most this many candidates are scored per pass
    pub top_k: usize,
    /// Highest channel index carried in feature frames
    pub max_channels: usize,
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            window_secs: 4.0,
            frame_secs: 0.25,
            rescore_secs: 0.5,
            threshold: 0.85,
            margin: 0.05,
            hold_secs: 1.5,
            unknown_timeout_secs: 10.0,
            top_k: 32,
            max_channels: 18,
        }
    }
}

/// Top-level core pipeline configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Beat detector tuning
    pub beat: BeatConfig,
    /// Song recognizer tuning
    pub recognizer: RecognizerConfig,
    /// Meter link watchdog timeout, seconds
    pub watchdog_secs: f64,
}

impl CoreConfig {
    /// Validate all tuning values. Called at startup and on mode entry;
    /// a bad value here is fatal before a show, never during one.
    pub fn validate(&self) -> Result<()> {
        if self.beat.channels.is_empty() {
            return Err(CoreError::InvalidConfig(
                "beat detector needs at least one channel".into(),
            ));
        }
        if self.beat.threshold_factor <= 1.0 {
            return Err(CoreError::InvalidConfig(
                "beat threshold_factor must be > 1.0".into(),
            ));
        }
        if self.beat.refractory_secs <= 0.0 {
            return Err(CoreError::InvalidConfig(
                "beat refractory_secs must be positive".into(),
            ));
        }
        if self.beat.envelope_len < 2 {
            return Err(CoreError::InvalidConfig(
                "beat envelope_len must be at least 2".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.recognizer.threshold) {
            return Err(CoreError::InvalidConfig(
                "recognizer threshold must be within 0.0-1.0".into(),
            ));
        }
        if self.recognizer.frame_secs <= 0.0
            || self.recognizer.window_secs < self.recognizer.frame_secs
        {
            return Err(CoreError::InvalidConfig(
                "recognizer window must span at least one frame".into(),
            ));
        }
        if self.recognizer.top_k == 0 {
            return Err(CoreError::InvalidConfig(
                "recognizer top_k must be at least 1".into(),
            ));
        }
        // The accessor maps 0 (unset) to the default, so only a negative
        // raw value is actually bad.
        if self.watchdog_secs < 0.0 {
            return Err(CoreError::InvalidConfig(
                "watchdog_secs must not be negative".into(),
            ));
        }
        Ok(())
    }

    /// Watchdog timeout with the default applied when the field is unset (0).
    pub fn watchdog_secs(&self) -> f64 {
        if self.watchdog_secs > 0.0 {
            self.watchdog_secs
        } else {
            2.0
        }
    }
}
