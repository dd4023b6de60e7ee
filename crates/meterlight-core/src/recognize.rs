//! Song recognition against the reference signature library
//!
//! A rolling window of live meter levels is summarized into feature frames
//! (same shape as the stored signatures) and scored against each candidate
//! by cosine similarity at the best-aligned offset. Recognition uses
//! hysteresis: the best candidate must beat the threshold AND lead the
//! runner-up by a margin AND hold both for a sustained duration before the
//! recognized state switches. This keeps two similar songs from flapping.
//!
//! Position in the recognized song comes from the best-matching alignment
//! offset and advances with wall-clock time between re-alignments, so
//! position-dependent cues survive live tempo drift.

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

use crate::beat::BeatEvent;
use crate::config::RecognizerConfig;
use crate::sample::MeterSample;
use crate::signature::{FeatureFrame, ReferenceSignature, SongId};

/// What the recognizer currently believes is playing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Recognized {
    /// No song has qualified
    Unknown,
    /// A song qualified and is being tracked
    Song {
        /// Library id of the recognized song
        id: SongId,
        /// Similarity score at the last re-alignment
        confidence: f32,
        /// Elapsed position within the song, seconds
        position_secs: f64,
    },
}

/// Process-wide recognition state; single writer (the recognizer), read by
/// the scheduler and the mode coordinator as a consistent snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecognitionState {
    /// Current belief
    pub current: Recognized,
    /// When the belief last changed
    pub last_transition: f64,
}

impl RecognitionState {
    /// Unknown state timestamped at `now`.
    pub fn unknown(now: f64) -> Self {
        Self {
            current: Recognized::Unknown,
            last_transition: now,
        }
    }
}

#[derive(Debug, Default)]
struct FrameAccumulator {
    start: Option<f64>,
    sums: Vec<f32>,
    counts: Vec<u32>,
    beats: u32,
}

impl FrameAccumulator {
    fn with_channels(max_channels: usize) -> Self {
        Self {
            start: None,
            sums: vec![0.0; max_channels],
            counts: vec![0; max_channels],
            beats: 0,
        }
    }

    fn add(&mut self, sample: &MeterSample) {
        let index = sample.channel as usize;
        if index >= self.sums.len() {
            return;
        }
        if self.start.is_none() {
            self.start = Some(sample.timestamp);
        }
        self.sums[index] += sample.level;
        self.counts[index] += 1;
    }

    fn close(&mut self, frame_secs: f64) -> FeatureFrame {
        let levels = self
            .sums
            .iter()
            .zip(&self.counts)
            .map(|(&sum, &count)| if count > 0 { sum / count as f32 } else { 0.0 })
            .collect();
        let frame = FeatureFrame {
            levels,
            beat_density: self.beats as f32 / frame_secs as f32,
        };
        self.sums.fill(0.0);
        self.counts.fill(0);
        self.beats = 0;
        self.start = None;
        frame
    }
}

/// Matches the live meter stream against reference signatures.
#[derive(Debug)]
pub struct SongRecognizer {
    config: RecognizerConfig,
    live_frames: VecDeque<FeatureFrame>,
    accumulator: FrameAccumulator,
    state: RecognitionState,
    /// Candidate waiting out the hysteresis hold: (song, qualifying since)
    pending: Option<(SongId, f64)>,
    /// Last time the current song met threshold and margin
    last_qualified: f64,
    last_rescore: f64,
    /// Wall-clock anchor of the last alignment: (time, position)
    alignment: Option<(f64, f64)>,
    /// Last time each candidate was scored competitively (for top-K capping)
    activity: HashMap<SongId, f64>,
}

impl SongRecognizer {
    /// Create a recognizer with the given tuning.
    pub fn new(config: RecognizerConfig) -> Self {
        let max_channels = config.max_channels;
        Self {
            config,
            live_frames: VecDeque::new(),
            accumulator: FrameAccumulator::with_channels(max_channels),
            state: RecognitionState::unknown(0.0),
            pending: None,
            last_qualified: f64::NEG_INFINITY,
            last_rescore: f64::NEG_INFINITY,
            alignment: None,
            activity: HashMap::new(),
        }
    }

    /// Feed one live meter sample into the rolling window.
    pub fn observe_sample(&mut self, sample: &MeterSample) {
        if sample.stale {
            return;
        }
        if let Some(start) = self.accumulator.start {
            if sample.timestamp >= start + self.config.frame_secs {
                let frame = self.accumulator.close(self.config.frame_secs);
                self.push_frame(frame);
            }
        }
        self.accumulator.add(sample);
    }

    /// Feed a detected beat (drives the beat-density feature).
    pub fn observe_beat(&mut self, _beat: &BeatEvent) {
        self.accumulator.beats += 1;
    }

    fn push_frame(&mut self, frame: FeatureFrame) {
        let capacity = (self.config.window_secs / self.config.frame_secs).round() as usize;
        self.live_frames.push_back(frame);
        while self.live_frames.len() > capacity.max(1) {
            self.live_frames.pop_front();
        }
    }

    /// Number of frames currently in the rolling window.
    pub fn window_len(&self) -> usize {
        self.live_frames.len()
    }

    /// Re-score the candidate library against the live window.
    ///
    /// Throttled internally to the configured interval; calling it every
    /// sample is fine. At most `top_k` candidates are scored per pass,
    /// most recently active first, so an oversized library degrades
    /// gracefully instead of blowing the tick budget.
    pub fn rescore(&mut self, now: f64, candidates: &[ReferenceSignature]) -> RecognitionState {
        if now - self.last_rescore < self.config.rescore_secs {
            return self.snapshot(now);
        }
        self.last_rescore = now;

        if self.live_frames.len() >= 2 && !candidates.is_empty() {
            self.score_pass(now, candidates);
        }

        // No qualifying match for too long: back to unknown.
        if let Recognized::Song { id, .. } = self.state.current {
            if now - self.last_qualified > self.config.unknown_timeout_secs {
                info!(song_id = id, "recognition timed out, back to unknown");
                self.state = RecognitionState::unknown(now);
                self.alignment = None;
                self.pending = None;
            }
        }

        self.snapshot(now)
    }

    fn score_pass(&mut self, now: f64, candidates: &[ReferenceSignature]) {
        let live: Vec<&FeatureFrame> = self.live_frames.iter().collect();

        // Cap the scoring budget: most recently active candidates first.
        let mut order: Vec<usize> = (0..candidates.len()).collect();
        if candidates.len() > self.config.top_k {
            order.sort_by(|&a, &b| {
                let ta = self
                    .activity
                    .get(&candidates[a].song_id)
                    .copied()
                    .unwrap_or(f64::NEG_INFINITY);
                let tb = self
                    .activity
                    .get(&candidates[b].song_id)
                    .copied()
                    .unwrap_or(f64::NEG_INFINITY);
                tb.partial_cmp(&ta).unwrap_or(std::cmp::Ordering::Equal)
            });
            order.truncate(self.config.top_k);
        }

        let mut best: Option<(SongId, f32, usize)> = None;
        let mut runner_up: f32 = 0.0;
        for index in order {
            let candidate = &candidates[index];
            let (similarity, offset) = score_signature(&live, candidate);
            trace!(song_id = candidate.song_id, similarity, offset, "scored");
            if similarity > self.config.threshold / 2.0 {
                self.activity.insert(candidate.song_id, now);
            }
            match best {
                Some((_, best_sim, _)) if similarity <= best_sim => {
                    runner_up = runner_up.max(similarity);
                }
                _ => {
                    if let Some((_, prev, _)) = best {
                        runner_up = runner_up.max(prev);
                    }
                    best = Some((candidate.song_id, similarity, offset));
                }
            }
        }

        let Some((best_id, best_sim, best_offset)) = best else {
            return;
        };
        let qualifies =
            best_sim >= self.config.threshold && best_sim - runner_up >= self.config.margin;
        if !qualifies {
            // Margin or threshold lost: hysteresis starts over.
            self.pending = None;
            return;
        }

        let position = (best_offset + live.len()) as f64 * self.config.frame_secs;
        match self.state.current {
            Recognized::Song { id, .. } if id == best_id => {
                // Same song: refresh confidence and re-align position.
                self.state.current = Recognized::Song {
                    id,
                    confidence: best_sim,
                    position_secs: position,
                };
                self.alignment = Some((now, position));
                self.last_qualified = now;
                self.pending = None;
            }
            _ => match self.pending {
                Some((pending_id, since)) if pending_id == best_id => {
                    if now - since >= self.config.hold_secs {
                        info!(
                            song_id = best_id,
                            confidence = best_sim,
                            position,
                            "song recognized"
                        );
                        self.state = RecognitionState {
                            current: Recognized::Song {
                                id: best_id,
                                confidence: best_sim,
                                position_secs: position,
                            },
                            last_transition: now,
                        };
                        self.alignment = Some((now, position));
                        self.last_qualified = now;
                        self.pending = None;
                    }
                }
                _ => {
                    debug!(song_id = best_id, confidence = best_sim, "candidate pending");
                    self.pending = Some((best_id, now));
                }
            },
        }
    }

    /// Consistent snapshot with the position advanced to `now`.
    pub fn snapshot(&self, now: f64) -> RecognitionState {
        let mut state = self.state;
        if let (Recognized::Song { id, confidence, .. }, Some((at, position))) =
            (state.current, self.alignment)
        {
            state.current = Recognized::Song {
                id,
                confidence,
                position_secs: position + (now - at).max(0.0),
            };
        }
        state
    }

    /// Capture the current live window as a provisional signature
    /// (explicit Probe-mode operation; the caller writes it through a
    /// mode-gated store view).
    pub fn capture_window(&self, song_id: SongId, name: &str) -> ReferenceSignature {
        ReferenceSignature {
            song_id,
            name: name.to_string(),
            tempo_bpm: None,
            frame_secs: self.config.frame_secs,
            frames: self.live_frames.iter().cloned().collect(),
            provisional: true,
        }
    }

    /// Drop all rolling state (mode transition or watchdog expiry).
    pub fn reset(&mut self, now: f64) {
        self.live_frames.clear();
        self.accumulator = FrameAccumulator::with_channels(self.config.max_channels);
        self.state = RecognitionState::unknown(now);
        self.pending = None;
        self.last_qualified = f64::NEG_INFINITY;
        self.last_rescore = f64::NEG_INFINITY;
        self.alignment = None;
        self.activity.clear();
        debug!("song recognizer reset");
    }
}

/// Best cosine similarity of the live window against `signature` over all
/// alignment offsets, and the offset (in frames) where it occurs.
fn score_signature(live: &[&FeatureFrame], signature: &ReferenceSignature) -> (f32, usize) {
    if live.is_empty() || signature.frames.is_empty() {
        return (0.0, 0);
    }
    let window = live.len().min(signature.frames.len());
    let live = &live[live.len() - window..];
    let last_offset = signature.frames.len() - window;

    let mut best = (0.0f32, 0usize);
    for offset in 0..=last_offset {
        let mut dot = 0.0f64;
        let mut live_norm = 0.0f64;
        let mut sig_norm = 0.0f64;
        for (live_frame, sig_frame) in live.iter().zip(&signature.frames[offset..offset + window]) {
            let channels = live_frame.levels.len().max(sig_frame.levels.len());
            for i in 0..channels {
                let a = f64::from(live_frame.levels.get(i).copied().unwrap_or(0.0));
                let b = f64::from(sig_frame.levels.get(i).copied().unwrap_or(0.0));
                dot += a * b;
                live_norm += a * a;
                sig_norm += b * b;
            }
            let a = f64::from(live_frame.beat_density);
            let b = f64::from(sig_frame.beat_density);
            dot += a * b;
            live_norm += a * a;
            sig_norm += b * b;
        }
        let similarity = if live_norm > 0.0 && sig_norm > 0.0 {
            (dot / (live_norm.sqrt() * sig_norm.sqrt())) as f32
        } else {
            0.0
        };
        if similarity > best.0 {
            best = (similarity, offset);
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(levels: &[f32], density: f32) -> FeatureFrame {
        FeatureFrame {
            levels: levels.to_vec(),
            beat_density: density,
        }
    }

    fn signature(song_id: SongId, frames: Vec<FeatureFrame>) -> ReferenceSignature {
        ReferenceSignature {
            song_id,
            name: format!("song {song_id}"),
            tempo_bpm: None,
            frame_secs: 0.25,
            frames,
            provisional: false,
        }
    }

    #[test]
    fn test_identical_window_scores_one() {
        let frames = vec![frame(&[0.8, 0.1], 2.0), frame(&[0.2, 0.9], 1.0)];
        let sig = signature(1, frames.clone());
        let live: Vec<&FeatureFrame> = frames.iter().collect();
        let (similarity, offset) = score_signature(&live, &sig);
        assert!((similarity - 1.0).abs() < 1e-6);
        assert_eq!(offset, 0);
    }

    #[test]
    fn test_alignment_offset_found() {
        let noise = frame(&[0.05, 0.05], 0.0);
        let a = frame(&[0.9, 0.1], 2.0);
        let b = frame(&[0.1, 0.9], 1.0);
        let sig = signature(1, vec![noise.clone(), noise.clone(), a.clone(), b.clone()]);
        let live_frames = [a, b];
        let live: Vec<&FeatureFrame> = live_frames.iter().collect();
        let (similarity, offset) = score_signature(&live, &sig);
        assert!(similarity > 0.99);
        assert_eq!(offset, 2);
    }

    #[test]
    fn test_mismatched_channel_counts_tolerated() {
        let sig = signature(1, vec![frame(&[0.5], 0.0)]);
        let live_frame = frame(&[0.5, 0.0, 0.0], 0.0);
        let live = [&live_frame];
        let (similarity, _) = score_signature(&live, &sig);
        assert!((similarity - 1.0).abs() < 1e-6);
    }
}
