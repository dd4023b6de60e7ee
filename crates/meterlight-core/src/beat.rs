//! Beat/onset detection from per-channel meter levels
//!
//! Each designated percussion/bass channel keeps a short trailing energy
//! envelope. An onset fires when the level jumps past the envelope average
//! by a configurable factor and the channel's refractory interval has
//! elapsed. Onsets on different channels within a small coincidence window
//! collapse into one composite event, so the rhythm signal survives a noisy
//! or silent instrument channel.
//!
//! The detector never errors: no detectable beat simply yields no event.

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::config::BeatConfig;
use crate::sample::MeterSample;

/// Where a beat event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BeatSource {
    /// A single designated channel
    Channel(u16),
    /// Coincident onsets on several channels merged into one
    Composite,
}

/// One detected rhythmic pulse.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BeatEvent {
    /// Originating channel(s)
    pub source: BeatSource,
    /// Monotonic timestamp in seconds
    pub timestamp: f64,
    /// Aggregated weighted strength (0.0 - 1.0)
    pub strength: f32,
    /// Advisory tempo estimate; `None` while intervals are irregular
    pub tempo_bpm: Option<f32>,
}

#[derive(Debug)]
struct ChannelEnvelope {
    weight: f32,
    history: VecDeque<f32>,
    last_level: f32,
    last_onset: f64,
}

impl ChannelEnvelope {
    fn new(weight: f32) -> Self {
        Self {
            weight,
            history: VecDeque::new(),
            last_level: 0.0,
            last_onset: f64::NEG_INFINITY,
        }
    }

    fn trailing_average(&self) -> f32 {
        if self.history.is_empty() {
            return 0.0;
        }
        self.history.iter().sum::<f32>() / self.history.len() as f32
    }
}

/// Detects onsets across the designated rhythm channels.
#[derive(Debug)]
pub struct BeatDetector {
    config: BeatConfig,
    envelopes: HashMap<u16, ChannelEnvelope>,
    last_event: f64,
    beat_times: VecDeque<f64>,
    tempo_bpm: Option<f32>,
}

impl BeatDetector {
    /// Create a detector for the channels named in `config`.
    pub fn new(config: BeatConfig) -> Self {
        let envelopes = config
            .channels
            .iter()
            .map(|c| (c.channel, ChannelEnvelope::new(c.weight)))
            .collect();
        Self {
            config,
            envelopes,
            last_event: f64::NEG_INFINITY,
            beat_times: VecDeque::new(),
            tempo_bpm: None,
        }
    }

    /// Feed one meter sample. Returns a composite event when this sample
    /// completes a beat; samples for channels outside the designated set
    /// are ignored. Stale samples never trigger onsets.
    pub fn process(&mut self, sample: &MeterSample) -> Option<BeatEvent> {
        let refractory = self.config.refractory_secs;
        let envelope_len = self.config.envelope_len;
        let threshold_factor = self.config.threshold_factor;
        let min_level = self.config.min_level;

        let envelope = self.envelopes.get_mut(&sample.channel)?;
        if sample.stale {
            return None;
        }

        let average = envelope.trailing_average();
        envelope.history.push_back(sample.level);
        if envelope.history.len() > envelope_len {
            envelope.history.pop_front();
        }
        envelope.last_level = sample.level;

        let is_onset = sample.level >= min_level
            && sample.level > average * threshold_factor
            && sample.timestamp - envelope.last_onset >= refractory;
        if !is_onset {
            return None;
        }
        envelope.last_onset = sample.timestamp;
        trace!(
            channel = sample.channel,
            level = sample.level,
            average,
            "onset"
        );

        // Coincident with an event already emitted: absorbed, not re-emitted.
        if sample.timestamp - self.last_event < self.config.coincidence_secs {
            return None;
        }
        // Composite events honor the refractory interval as well, so a
        // snare hit right after a kick does not double-trigger the rhythm.
        if sample.timestamp - self.last_event < refractory {
            return None;
        }

        let strength = self.composite_strength();
        self.last_event = sample.timestamp;
        self.beat_times.push_back(sample.timestamp);
        while self.beat_times.len() > self.config.tempo_window {
            self.beat_times.pop_front();
        }
        self.tempo_bpm = self.estimate_tempo();

        let source = if self.config.channels.len() == 1 {
            BeatSource::Channel(sample.channel)
        } else {
            BeatSource::Composite
        };
        debug!(?source, strength, tempo = ?self.tempo_bpm, "beat");
        Some(BeatEvent {
            source,
            timestamp: sample.timestamp,
            strength,
            tempo_bpm: self.tempo_bpm,
        })
    }

    /// Weighted sum of the latest levels across all designated channels.
    fn composite_strength(&self) -> f32 {
        self.envelopes
            .values()
            .map(|e| e.last_level * e.weight)
            .sum::<f32>()
            .clamp(0.0, 1.0)
    }

    /// Tempo from inter-onset intervals: implausible intervals are dropped,
    /// the rest is trimmed of outliers and averaged, and octave errors are
    /// folded back into the 60-200 BPM range.
    fn estimate_tempo(&self) -> Option<f32> {
        if self.beat_times.len() < 3 {
            return None;
        }
        let mut intervals: Vec<f64> = self
            .beat_times
            .iter()
            .zip(self.beat_times.iter().skip(1))
            .map(|(a, b)| b - a)
            .filter(|i| (0.2..2.0).contains(i))
            .collect();
        if intervals.len() < 2 {
            return None;
        }
        intervals.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        // Keep roughly the middle half once there is enough to trim.
        let trimmed = if intervals.len() >= 4 {
            let cut = intervals.len() / 4;
            &intervals[cut..intervals.len() - cut]
        } else {
            &intervals[..]
        };
        let avg = trimmed.iter().sum::<f64>() / trimmed.len() as f64;
        if avg <= 0.001 {
            return None;
        }

        let bpm = (60.0 / avg) as f32;
        let bpm = if (60.0..=200.0).contains(&bpm) {
            bpm
        } else if (200.0..=400.0).contains(&bpm) {
            bpm / 2.0
        } else if (30.0..60.0).contains(&bpm) {
            bpm * 2.0
        } else {
            return None;
        };
        Some((bpm * 10.0).round() / 10.0)
    }

    /// Current tempo estimate, if any.
    pub fn tempo_bpm(&self) -> Option<f32> {
        self.tempo_bpm
    }

    /// Clear all rolling state (mode transition or watchdog expiry).
    pub fn reset(&mut self) {
        for envelope in self.envelopes.values_mut() {
            envelope.history.clear();
            envelope.last_level = 0.0;
            envelope.last_onset = f64::NEG_INFINITY;
        }
        self.last_event = f64::NEG_INFINITY;
        self.beat_times.clear();
        self.tempo_bpm = None;
        debug!("beat detector reset");
    }
}
