//! Lighting scheduler: one DMX frame per universe per tick
//!
//! Resolution order each tick: the recognized song's cue program at the
//! current position, else the generic reactive mapping (instrument energy
//! drives fixture intensity), else hold the last commanded frame. Beat
//! flashes layer on top for a single tick and are never committed, so a
//! flash decays by itself on the next tick.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use meterlight_core::beat::BeatEvent;
use meterlight_core::mapping::ChannelMapping;
use meterlight_core::mode::Mode;
use meterlight_core::recognize::Recognized;

use crate::cue::{ChannelLevels, CueLibrary};
use crate::dmx::LightingFrame;
use crate::{error::ControlError, Result};

/// Scheduler tuning. Validated once at engine startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Frame rate, ticks per second
    pub tick_hz: u32,
    /// Universes to emit every tick, in output order
    pub universes: Vec<u16>,
    /// Upper bound on beat-flash rate
    pub max_flash_hz: f64,
    /// In Show mode with no cue program, fall back to the reactive
    /// mapping instead of holding the last frame
    pub reactive_fallback: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_hz: 40,
            universes: vec![0],
            max_flash_hz: 10.0,
            reactive_fallback: true,
        }
    }
}

/// Art-Net nodes commonly cap out near 44 fps; below 30 the output
/// visibly judders.
const TICK_HZ_RANGE: std::ops::RangeInclusive<u32> = 30..=44;

/// Hard cap on configured universes.
pub const MAX_UNIVERSES: usize = 20;

impl SchedulerConfig {
    /// Check the config before the engine starts; bad values are fatal
    /// here and nowhere else.
    pub fn validate(&self) -> Result<()> {
        if !TICK_HZ_RANGE.contains(&self.tick_hz) {
            return Err(ControlError::InvalidConfig(format!(
                "tick_hz {} outside {}..={}",
                self.tick_hz,
                TICK_HZ_RANGE.start(),
                TICK_HZ_RANGE.end()
            )));
        }
        if self.universes.is_empty() || self.universes.len() > MAX_UNIVERSES {
            return Err(ControlError::InvalidConfig(format!(
                "need 1..={MAX_UNIVERSES} universes, got {}",
                self.universes.len()
            )));
        }
        let unique: HashSet<u16> = self.universes.iter().copied().collect();
        if unique.len() != self.universes.len() {
            return Err(ControlError::InvalidConfig(
                "duplicate universe in output list".into(),
            ));
        }
        if !(self.max_flash_hz > 0.0) {
            return Err(ControlError::InvalidConfig(
                "max_flash_hz must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Duration of one tick.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.tick_hz))
    }
}

/// Everything the scheduler reads for one tick.
pub struct TickContext<'a> {
    /// Monotonic now, seconds
    pub now: f64,
    /// Current operating mode
    pub mode: Mode,
    /// Recognizer belief at this tick
    pub recognition: Recognized,
    /// Latest level per mixer channel
    pub levels: &'a ChannelLevels,
    /// Beat emitted since the previous tick, if any
    pub beat: Option<&'a BeatEvent>,
}

/// Per-universe channel buffers keyed by universe id.
type UniverseBuffers = HashMap<u16, [u8; 512]>;

/// Computes the outgoing frames each tick.
pub struct LightingScheduler {
    config: SchedulerConfig,
    mappings: Vec<ChannelMapping>,
    cues: CueLibrary,
    committed: UniverseBuffers,
    sequences: HashMap<u16, u8>,
    last_flash: f64,
    started: bool,
}

impl LightingScheduler {
    /// Build a scheduler over a validated config.
    pub fn new(
        config: SchedulerConfig,
        mappings: Vec<ChannelMapping>,
        cues: CueLibrary,
    ) -> Result<Self> {
        config.validate()?;
        let committed = config.universes.iter().map(|&u| (u, [0u8; 512])).collect();
        Ok(Self {
            config,
            mappings,
            cues,
            committed,
            sequences: HashMap::new(),
            last_flash: f64::NEG_INFINITY,
            started: false,
        })
    }

    /// Universes this scheduler emits, for the shutdown blackout.
    pub fn universes(&self) -> &[u16] {
        &self.config.universes
    }

    /// Replace the mapping set on a mode transition.
    pub fn set_mappings(&mut self, mappings: Vec<ChannelMapping>) {
        self.mappings = mappings;
    }

    /// Produce exactly one frame per configured universe.
    pub fn tick(&mut self, ctx: &TickContext<'_>) -> Vec<LightingFrame> {
        if !self.started {
            self.started = true;
            debug!("first tick: explicit blackout on all universes");
            return self.emit(None);
        }

        let mut flash_targets: HashSet<(u16, u16)> = HashSet::new();
        let base = self.resolve(ctx, &mut flash_targets);
        if let Some(buffers) = base {
            self.committed = buffers;
        }

        let mut overlay = None;
        if let Some(beat) = ctx.beat {
            if ctx.now - self.last_flash >= 1.0 / self.config.max_flash_hz {
                self.last_flash = ctx.now;
                overlay = Some(self.flash_overlay(beat, &flash_targets));
                trace!(strength = beat.strength, "beat flash layered");
            }
        }

        self.emit(overlay)
    }

    /// Pick this tick's base buffers, or `None` to hold the last frame.
    fn resolve(
        &self,
        ctx: &TickContext<'_>,
        flash_targets: &mut HashSet<(u16, u16)>,
    ) -> Option<UniverseBuffers> {
        if ctx.mode.cue_driven() {
            if let Recognized::Song {
                id, position_secs, ..
            } = ctx.recognition
            {
                if let Some(program) = self.cues.program_for(id) {
                    return Some(self.cue_buffers(
                        program,
                        position_secs,
                        ctx.levels,
                        flash_targets,
                    ));
                }
            }
            if !self.config.reactive_fallback {
                return None;
            }
        }
        if ctx.mode.beat_driven() {
            return Some(self.reactive_buffers(ctx.levels, flash_targets));
        }
        // Maintenance: nothing drives the rig, hold whatever was last
        // commanded (dark until something else commands otherwise).
        None
    }

    fn empty_buffers(&self) -> UniverseBuffers {
        self.config
            .universes
            .iter()
            .map(|&u| (u, [0u8; 512]))
            .collect()
    }

    /// Instrument energy straight onto the instrument's fixtures.
    fn reactive_buffers(
        &self,
        levels: &ChannelLevels,
        flash_targets: &mut HashSet<(u16, u16)>,
    ) -> UniverseBuffers {
        let mut buffers = self.empty_buffers();
        for mapping in &self.mappings {
            let value = level_to_dmx(levels.get(&mapping.channel).copied().unwrap_or(0.0));
            for binding in &mapping.fixtures {
                let Some(buffer) = buffers.get_mut(&binding.universe) else {
                    continue;
                };
                for address in binding.addresses() {
                    buffer[usize::from(address) - 1] = value;
                    flash_targets.insert((binding.universe, address));
                }
            }
        }
        buffers
    }

    /// Evaluate the active cue segment into channel buffers.
    fn cue_buffers(
        &self,
        program: &crate::cue::CueProgram,
        position_secs: f64,
        levels: &ChannelLevels,
        flash_targets: &mut HashSet<(u16, u16)>,
    ) -> UniverseBuffers {
        let mut buffers = self.empty_buffers();
        let Some(segment) = program.segment_at(position_secs) else {
            return buffers;
        };
        for step in &segment.steps {
            for mapping in self
                .mappings
                .iter()
                .filter(|m| m.instrument == step.instrument)
            {
                let energy = levels.get(&mapping.channel).copied().unwrap_or(0.0);
                let value = step.effect.level_at(position_secs, energy);
                for binding in &mapping.fixtures {
                    let Some(buffer) = buffers.get_mut(&binding.universe) else {
                        continue;
                    };
                    for address in binding.addresses() {
                        buffer[usize::from(address) - 1] = value;
                        if step.flash {
                            flash_targets.insert((binding.universe, address));
                        }
                    }
                }
            }
        }
        buffers
    }

    /// One-tick flash layer: flash-capable addresses jump to at least the
    /// beat's strength.
    fn flash_overlay(
        &self,
        beat: &BeatEvent,
        flash_targets: &HashSet<(u16, u16)>,
    ) -> UniverseBuffers {
        let flash_value = level_to_dmx(beat.strength);
        let mut overlay = self.committed.clone();
        for &(universe, address) in flash_targets {
            if let Some(buffer) = overlay.get_mut(&universe) {
                let slot = &mut buffer[usize::from(address) - 1];
                *slot = (*slot).max(flash_value);
            }
        }
        overlay
    }

    /// Turn the committed (or overlaid) buffers into frames, advancing
    /// each universe's sequence counter.
    fn emit(&mut self, overlay: Option<UniverseBuffers>) -> Vec<LightingFrame> {
        let source = overlay.as_ref().unwrap_or(&self.committed);
        self.config
            .universes
            .iter()
            .map(|&universe| {
                let sequence = self.sequences.entry(universe).or_insert(0);
                let frame = LightingFrame {
                    universe,
                    channels: source.get(&universe).copied().unwrap_or([0; 512]),
                    sequence: *sequence,
                };
                *sequence = sequence.wrapping_add(1);
                frame
            })
            .collect()
    }
}

/// Sanitize and scale a meter level into a DMX byte.
fn level_to_dmx(level: f32) -> u8 {
    let level = if level.is_finite() { level } else { 0.0 };
    (level.clamp(0.0, 1.0) * 255.0).round() as u8
}
