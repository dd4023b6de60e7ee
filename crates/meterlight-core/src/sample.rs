//! Meter samples and the per-channel link watchdog
//!
//! Timestamps are monotonic seconds since engine start (f64, sub-millisecond
//! resolution). They come from one clock owned by the ingestion path, so
//! per-channel timestamps are non-decreasing as received.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// One decoded meter level update for a single mixer channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeterSample {
    /// Mixer channel index
    pub channel: u16,
    /// Normalized level (0.0 - 1.0)
    pub level: f32,
    /// Monotonic timestamp in seconds
    pub timestamp: f64,
    /// True if this sample arrived with a timestamp not newer than the
    /// last accepted sample for its channel. Consumers may ignore it.
    pub stale: bool,
}

impl MeterSample {
    /// Create a fresh (non-stale) sample with the level clamped to 0.0-1.0
    /// and non-finite input treated as silence.
    pub fn new(channel: u16, level: f32, timestamp: f64) -> Self {
        let level = if level.is_finite() {
            level.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            channel,
            level,
            timestamp,
            stale: false,
        }
    }
}

/// Meter link health as seen by the watchdog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkState {
    /// Samples are arriving within the configured interval
    Up,
    /// No samples on any watched channel for longer than the interval
    Degraded,
}

/// Tracks per-channel "last seen" times to detect mixer/link loss.
///
/// The watchdog never errors: a silent link degrades the state and the
/// pipeline falls back; it recovers on the next sample.
#[derive(Debug)]
pub struct LinkWatchdog {
    timeout_secs: f64,
    last_seen: HashMap<u16, f64>,
    last_any: Option<f64>,
    stale_count: u64,
}

impl LinkWatchdog {
    /// Create a watchdog that reports `Degraded` after `timeout_secs` of silence.
    pub fn new(timeout_secs: f64) -> Self {
        Self {
            timeout_secs,
            last_seen: HashMap::new(),
            last_any: None,
            stale_count: 0,
        }
    }

    /// Record an incoming sample, returning it with its stale flag resolved.
    pub fn observe(&mut self, sample: MeterSample) -> MeterSample {
        let stale = match self.last_seen.get(&sample.channel) {
            Some(&last) => sample.timestamp <= last,
            None => false,
        };
        if stale {
            self.stale_count += 1;
        } else {
            self.last_seen.insert(sample.channel, sample.timestamp);
        }
        self.last_any = Some(match self.last_any {
            Some(t) => t.max(sample.timestamp),
            None => sample.timestamp,
        });
        MeterSample { stale, ..sample }
    }

    /// Current link state at time `now`.
    pub fn link_state(&self, now: f64) -> LinkState {
        match self.last_any {
            Some(last) if now - last <= self.timeout_secs => LinkState::Up,
            Some(_) => LinkState::Degraded,
            // Nothing received yet: treat as degraded until the mixer speaks.
            None => LinkState::Degraded,
        }
    }

    /// True if the link just crossed into silence; callers reset their
    /// rolling buffers when this fires.
    pub fn expired(&self, now: f64) -> bool {
        matches!(self.last_any, Some(last) if now - last > self.timeout_secs)
    }

    /// Number of stale samples seen so far.
    pub fn stale_count(&self) -> u64 {
        self.stale_count
    }

    /// Channels with no sample for longer than the timeout at `now`.
    pub fn silent_channels(&self, now: f64) -> Vec<u16> {
        let mut silent: Vec<u16> = self
            .last_seen
            .iter()
            .filter(|(_, &last)| now - last > self.timeout_secs)
            .map(|(&ch, _)| ch)
            .collect();
        silent.sort_unstable();
        silent
    }

    /// Forget all history (mode transition or link recovery).
    pub fn reset(&mut self) {
        self.last_seen.clear();
        self.last_any = None;
        debug!("link watchdog reset");
    }
}
