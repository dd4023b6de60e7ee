//! End-to-end recognition tests: live sample stream against a small
//! signature library, exercising threshold, margin and hysteresis.

use meterlight_core::config::RecognizerConfig;
use meterlight_core::recognize::{Recognized, SongRecognizer};
use meterlight_core::sample::MeterSample;
use meterlight_core::signature::{FeatureFrame, ReferenceSignature, SongId};

fn frame(levels: &[f32], density: f32) -> FeatureFrame {
    FeatureFrame {
        levels: levels.to_vec(),
        beat_density: density,
    }
}

/// Alternating two-channel pattern, 0.25s per frame: the shape the live
/// feeder below reproduces exactly.
fn alternating_signature(song_id: SongId, frames: usize) -> ReferenceSignature {
    let frames = (0..frames)
        .map(|k| {
            if k % 2 == 0 {
                frame(&[0.8, 0.1], 0.0)
            } else {
                frame(&[0.1, 0.8], 0.0)
            }
        })
        .collect();
    ReferenceSignature {
        song_id,
        name: format!("song {song_id}"),
        tempo_bpm: None,
        frame_secs: 0.25,
        frames,
        provisional: false,
    }
}

fn flat_signature(song_id: SongId, frames: usize) -> ReferenceSignature {
    ReferenceSignature {
        song_id,
        name: format!("song {song_id}"),
        tempo_bpm: None,
        frame_secs: 0.25,
        frames: vec![frame(&[0.5, 0.5], 2.0); frames],
        provisional: false,
    }
}

/// Feed the alternating pattern at 100 samples/s per channel up to `until`.
fn feed_alternating(recognizer: &mut SongRecognizer, from: f64, until: f64) {
    let mut t = from;
    while t < until {
        let phase = (t / 0.25).floor() as usize % 2;
        let (ch0, ch1) = if phase == 0 { (0.8, 0.1) } else { (0.1, 0.8) };
        recognizer.observe_sample(&MeterSample::new(0, ch0, t));
        recognizer.observe_sample(&MeterSample::new(1, ch1, t));
        t += 0.01;
    }
}

fn config() -> RecognizerConfig {
    RecognizerConfig {
        max_channels: 2,
        ..RecognizerConfig::default()
    }
}

#[test]
fn recognizes_matching_song_within_hold_duration() {
    let mut recognizer = SongRecognizer::new(config());
    let library = vec![alternating_signature(1, 32), flat_signature(2, 32)];

    feed_alternating(&mut recognizer, 0.0, 4.01);
    assert!(recognizer.window_len() >= 14);

    // First qualifying pass arms the hysteresis, it does not switch yet.
    let state = recognizer.rescore(4.0, &library);
    assert_eq!(state.current, Recognized::Unknown);

    // Keep matching through the hold duration.
    for step in 1..=3 {
        let now = 4.0 + step as f64 * 0.5;
        feed_alternating(&mut recognizer, 4.01 + (step - 1) as f64 * 0.5, now + 0.01);
        recognizer.rescore(now, &library);
    }

    let state = recognizer.snapshot(5.5);
    match state.current {
        Recognized::Song {
            id, confidence, ..
        } => {
            assert_eq!(id, 1);
            assert!(confidence >= 0.85, "confidence was {confidence}");
        }
        other => panic!("expected recognition, got {other:?}"),
    }
}

#[test]
fn ambiguous_candidates_never_recognized() {
    // Two near-identical signatures: best never leads by the margin,
    // so the recognizer must hold Unknown instead of flapping.
    let mut recognizer = SongRecognizer::new(config());
    let twin = {
        let mut sig = alternating_signature(2, 32);
        for f in &mut sig.frames {
            for level in &mut f.levels {
                *level *= 0.99;
            }
        }
        sig
    };
    let library = vec![alternating_signature(1, 32), twin];

    feed_alternating(&mut recognizer, 0.0, 4.01);
    for step in 0..12 {
        let now = 4.0 + step as f64 * 0.5;
        feed_alternating(&mut recognizer, (4.01 + (step as f64 - 1.0) * 0.5).max(4.01), now + 0.01);
        let state = recognizer.rescore(now, &library);
        assert_eq!(
            state.current,
            Recognized::Unknown,
            "must not pick between margin-tied candidates"
        );
    }
}

#[test]
fn position_advances_with_wall_clock_between_alignments() {
    let mut recognizer = SongRecognizer::new(config());
    let library = vec![alternating_signature(1, 64)];

    feed_alternating(&mut recognizer, 0.0, 6.01);
    for step in 0..4 {
        recognizer.rescore(4.0 + step as f64 * 0.5, &library);
    }
    let at_recognition = recognizer.snapshot(5.5);
    let pos0 = match at_recognition.current {
        Recognized::Song { position_secs, .. } => position_secs,
        other => panic!("expected recognition, got {other:?}"),
    };

    // No rescore in between: position still advances with the clock.
    let later = recognizer.snapshot(7.5);
    match later.current {
        Recognized::Song { position_secs, .. } => {
            assert!((position_secs - pos0 - 2.0).abs() < 1e-6);
        }
        other => panic!("expected recognition, got {other:?}"),
    }
}

#[test]
fn reset_returns_to_unknown() {
    let mut recognizer = SongRecognizer::new(config());
    let library = vec![alternating_signature(1, 32)];

    feed_alternating(&mut recognizer, 0.0, 6.01);
    for step in 0..4 {
        recognizer.rescore(4.0 + step as f64 * 0.5, &library);
    }
    assert!(matches!(
        recognizer.snapshot(5.5).current,
        Recognized::Song { .. }
    ));

    recognizer.reset(6.0);
    assert_eq!(recognizer.snapshot(6.0).current, Recognized::Unknown);
    assert_eq!(recognizer.window_len(), 0);
}

#[test]
fn capture_window_produces_provisional_signature() {
    let mut recognizer = SongRecognizer::new(config());
    feed_alternating(&mut recognizer, 0.0, 2.01);

    let captured = recognizer.capture_window(9, "new song");
    assert!(captured.provisional);
    assert_eq!(captured.song_id, 9);
    assert!(!captured.frames.is_empty());
    // Captured frames carry the alternating shape
    assert!(captured.frames[0].levels[0] > captured.frames[0].levels[1]);
}
