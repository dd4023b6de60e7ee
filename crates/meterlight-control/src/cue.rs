//! Cue programs: pre-authored lighting over a recognized song's timeline
//!
//! A program is a sorted list of segments keyed by song position. The
//! scheduler picks the active segment from the recognizer's position
//! estimate and evaluates each step into DMX levels. Authoring tools are
//! out of scope; programs arrive as data.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use meterlight_core::mapping::Instrument;
use meterlight_core::signature::SongId;

/// How one instrument's fixtures behave during a segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CueEffect {
    /// Constant level
    Static {
        /// DMX level
        level: u8,
    },
    /// Slow sine swell between two levels
    Pulse {
        /// Low point
        floor: u8,
        /// High point
        peak: u8,
        /// Full cycle duration, seconds
        period_secs: f64,
    },
    /// Level follows the instrument's live meter energy
    Reactive {
        /// Multiplier applied to the 0-1 meter level
        gain: f32,
    },
}

impl CueEffect {
    /// Level at `position_secs` into the song, given the instrument's
    /// current meter `energy` (0-1).
    pub fn level_at(&self, position_secs: f64, energy: f32) -> u8 {
        match self {
            CueEffect::Static { level } => *level,
            CueEffect::Pulse {
                floor,
                peak,
                period_secs,
            } => {
                if *period_secs <= 0.0 {
                    return *peak;
                }
                let phase = (position_secs / period_secs) * std::f64::consts::TAU;
                let wave = 0.5 - 0.5 * phase.cos();
                let span = f64::from(*peak) - f64::from(*floor);
                (f64::from(*floor) + span * wave).round() as u8
            }
            CueEffect::Reactive { gain } => {
                let energy = if energy.is_finite() { energy } else { 0.0 };
                ((energy * gain).clamp(0.0, 1.0) * 255.0).round() as u8
            }
        }
    }
}

/// One instrument's behavior within a segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CueStep {
    /// Which instrument's fixtures this drives
    pub instrument: Instrument,
    /// The effect applied to those fixtures
    pub effect: CueEffect,
    /// May beat flashes layer on top of this step?
    #[serde(default)]
    pub flash: bool,
}

/// A span of the song with a fixed set of steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CueSegment {
    /// Song position where this segment takes over, seconds
    pub start_secs: f64,
    /// Steps active during the segment
    pub steps: Vec<CueStep>,
}

/// Full lighting program for one song.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CueProgram {
    /// Song this program belongs to
    pub song_id: SongId,
    /// Human-readable program name
    pub name: String,
    /// Segments sorted by `start_secs`
    pub segments: Vec<CueSegment>,
}

impl CueProgram {
    /// The segment covering `position_secs`, i.e. the last segment whose
    /// start is at or before the position. `None` before the first
    /// segment starts.
    pub fn segment_at(&self, position_secs: f64) -> Option<&CueSegment> {
        self.segments
            .iter()
            .take_while(|s| s.start_secs <= position_secs)
            .last()
    }
}

/// Program lookup by song, as loaded from the session's cue file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CueLibrary {
    programs: Vec<CueProgram>,
}

impl CueLibrary {
    /// Library from a list of programs; segments are sorted on ingest so
    /// [`CueProgram::segment_at`] can rely on ordering.
    pub fn new(mut programs: Vec<CueProgram>) -> Self {
        for program in &mut programs {
            program
                .segments
                .sort_by(|a, b| a.start_secs.total_cmp(&b.start_secs));
        }
        Self { programs }
    }

    /// The program for `song_id`, if one was authored.
    pub fn program_for(&self, song_id: SongId) -> Option<&CueProgram> {
        self.programs.iter().find(|p| p.song_id == song_id)
    }

    /// Programs by song id, for listings.
    pub fn song_ids(&self) -> impl Iterator<Item = SongId> + '_ {
        self.programs.iter().map(|p| p.song_id)
    }
}

/// Latest meter level per mixer channel, as the scheduler sees it.
pub type ChannelLevels = HashMap<u16, f32>;

#[cfg(test)]
mod tests {
    use super::*;

    fn program() -> CueProgram {
        CueProgram {
            song_id: 1,
            name: "opener".into(),
            segments: vec![
                CueSegment {
                    start_secs: 0.0,
                    steps: vec![CueStep {
                        instrument: Instrument::Keys,
                        effect: CueEffect::Static { level: 40 },
                        flash: false,
                    }],
                },
                CueSegment {
                    start_secs: 30.0,
                    steps: vec![CueStep {
                        instrument: Instrument::BassDrum,
                        effect: CueEffect::Reactive { gain: 1.0 },
                        flash: true,
                    }],
                },
            ],
        }
    }

    #[test]
    fn test_segment_lookup() {
        let program = program();
        assert_eq!(program.segment_at(0.0).unwrap().start_secs, 0.0);
        assert_eq!(program.segment_at(29.9).unwrap().start_secs, 0.0);
        assert_eq!(program.segment_at(30.0).unwrap().start_secs, 30.0);
        assert_eq!(program.segment_at(500.0).unwrap().start_secs, 30.0);
        assert!(program.segment_at(-1.0).is_none());
    }

    #[test]
    fn test_library_sorts_segments() {
        let mut unsorted = program();
        unsorted.segments.reverse();
        let library = CueLibrary::new(vec![unsorted]);
        let segments = &library.program_for(1).unwrap().segments;
        assert!(segments[0].start_secs < segments[1].start_secs);
    }

    #[test]
    fn test_static_and_pulse_levels() {
        let effect = CueEffect::Static { level: 128 };
        assert_eq!(effect.level_at(12.0, 0.9), 128);

        let pulse = CueEffect::Pulse {
            floor: 10,
            peak: 210,
            period_secs: 2.0,
        };
        assert_eq!(pulse.level_at(0.0, 0.0), 10);
        assert_eq!(pulse.level_at(1.0, 0.0), 210);
    }

    #[test]
    fn test_reactive_clamps() {
        let effect = CueEffect::Reactive { gain: 2.0 };
        assert_eq!(effect.level_at(0.0, 0.9), 255);
        assert_eq!(effect.level_at(0.0, f32::NAN), 0);
    }
}
