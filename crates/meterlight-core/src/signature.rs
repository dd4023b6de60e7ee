//! Reference signatures: stored time-series fingerprints of a song's
//! multi-channel meter behavior, used for live recognition.

use serde::{Deserialize, Serialize};

/// Identifier of a song in the reference library.
pub type SongId = u32;

/// One summarized slice of a signature: per-channel mean level over the
/// frame plus the onset density observed in it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureFrame {
    /// Mean level per channel, indexed by channel
    pub levels: Vec<f32>,
    /// Beats per second within the frame
    pub beat_density: f32,
}

/// A stored fingerprint spanning a song's duration.
///
/// Immutable once committed: updates replace the whole signature atomically
/// through [`crate::store::StoreView::put_signature`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceSignature {
    /// Library id
    pub song_id: SongId,
    /// Display name
    pub name: String,
    /// Reference tempo, if known
    pub tempo_bpm: Option<f32>,
    /// Length of each frame, seconds
    pub frame_secs: f64,
    /// Ordered feature frames spanning the song
    pub frames: Vec<FeatureFrame>,
    /// True while the signature is a Probe-mode capture that has not been
    /// committed in Maintenance mode
    pub provisional: bool,
}

impl ReferenceSignature {
    /// Song duration covered by the frames, seconds.
    pub fn duration_secs(&self) -> f64 {
        self.frames.len() as f64 * self.frame_secs
    }

    /// Append captured frames (Probe-mode provisional capture).
    pub fn extend_frames(&mut self, frames: impl IntoIterator<Item = FeatureFrame>) {
        self.frames.extend(frames);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration() {
        let sig = ReferenceSignature {
            song_id: 1,
            name: "Intro".into(),
            tempo_bpm: Some(120.0),
            frame_secs: 0.25,
            frames: vec![
                FeatureFrame {
                    levels: vec![0.1, 0.2],
                    beat_density: 2.0,
                };
                8
            ],
            provisional: false,
        };
        assert!((sig.duration_secs() - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_extend_frames_appends_in_order() {
        let mut sig = ReferenceSignature {
            song_id: 1,
            name: "Intro".into(),
            tempo_bpm: None,
            frame_secs: 0.25,
            frames: vec![FeatureFrame {
                levels: vec![0.1],
                beat_density: 0.0,
            }],
            provisional: true,
        };
        sig.extend_frames(vec![FeatureFrame {
            levels: vec![0.9],
            beat_density: 4.0,
        }]);
        assert_eq!(sig.frames.len(), 2);
        assert_eq!(sig.frames[1].levels, vec![0.9]);
    }
}
