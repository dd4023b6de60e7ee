//! Operating modes and the mode coordinator
//!
//! Three modes with distinct reference-store write permissions:
//!
//! | Mode        | Detector  | Store reads | Store writes       | Scheduler        |
//! |-------------|-----------|-------------|--------------------|------------------|
//! | Maintenance | optional  | yes         | full overwrite     | manual/test      |
//! | Probe       | active    | yes         | provisional append | reactive preview |
//! | Show        | active    | yes         | forbidden          | full cue-driven  |
//!
//! Transitions are explicit user actions, never inferred, and every
//! transition hands back a clean-slate marker so callers reset all rolling
//! recognition/detection state.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::mapping::{validate_mappings, ChannelMapping};
use crate::Result;

/// Operating mode of the whole system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    /// Reference data upkeep and testing; full store write access
    Maintenance,
    /// Rehearsal: recognition plus provisional signature capture
    Probe,
    /// Live show: store strictly read-only, full cue-driven lighting
    Show,
}

impl Mode {
    /// May signatures be overwritten wholesale?
    pub fn allows_overwrite(self) -> bool {
        matches!(self, Mode::Maintenance)
    }

    /// May provisional signatures be appended?
    pub fn allows_provisional(self) -> bool {
        matches!(self, Mode::Maintenance | Mode::Probe)
    }

    /// Is the beat detector's output consumed by the scheduler?
    pub fn beat_driven(self) -> bool {
        matches!(self, Mode::Probe | Mode::Show)
    }

    /// Does the scheduler run its full cue-driven program?
    pub fn cue_driven(self) -> bool {
        matches!(self, Mode::Show)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Maintenance => write!(f, "maintenance"),
            Mode::Probe => write!(f, "probe"),
            Mode::Show => write!(f, "show"),
        }
    }
}

/// Record of a completed transition. Holding one obliges the caller to
/// reset detector and recognizer state before processing more samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeChange {
    /// Mode left behind
    pub from: Mode,
    /// Mode entered
    pub to: Mode,
}

/// Serializes mode transitions and gates what each subsystem may do.
#[derive(Debug)]
pub struct ModeCoordinator {
    mode: Mode,
}

impl ModeCoordinator {
    /// Start in the explicitly selected mode. Never inferred.
    pub fn new(initial: Mode) -> Self {
        info!(mode = %initial, "mode coordinator started");
        Self { mode: initial }
    }

    /// Current mode.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Switch modes. The channel mapping is re-validated on entry so a
    /// configuration error surfaces here, before the new mode runs, and
    /// the transition is refused. A no-op transition returns `None`.
    pub fn transition(
        &mut self,
        to: Mode,
        mappings: &[ChannelMapping],
    ) -> Result<Option<ModeChange>> {
        if to == self.mode {
            return Ok(None);
        }
        validate_mappings(mappings)?;
        let change = ModeChange {
            from: self.mode,
            to,
        };
        self.mode = to;
        info!(from = %change.from, to = %change.to, "mode changed");
        Ok(Some(change))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{FixtureBinding, Instrument};

    #[test]
    fn test_permission_table() {
        assert!(Mode::Maintenance.allows_overwrite());
        assert!(Mode::Maintenance.allows_provisional());
        assert!(!Mode::Probe.allows_overwrite());
        assert!(Mode::Probe.allows_provisional());
        assert!(!Mode::Show.allows_overwrite());
        assert!(!Mode::Show.allows_provisional());
        assert!(Mode::Show.beat_driven());
        assert!(!Mode::Maintenance.beat_driven());
    }

    #[test]
    fn test_transition_validates_mappings() {
        let mut coordinator = ModeCoordinator::new(Mode::Maintenance);
        let conflicting = vec![
            ChannelMapping {
                instrument: Instrument::BassDrum,
                channel: 0,
                fixtures: vec![FixtureBinding {
                    universe: 0,
                    address: 1,
                    width: 1,
                }],
            },
            ChannelMapping {
                instrument: Instrument::Snare,
                channel: 1,
                fixtures: vec![FixtureBinding {
                    universe: 0,
                    address: 1,
                    width: 1,
                }],
            },
        ];
        assert!(coordinator.transition(Mode::Show, &conflicting).is_err());
        // Refused transition leaves the mode unchanged
        assert_eq!(coordinator.mode(), Mode::Maintenance);
    }

    #[test]
    fn test_transition_reports_change() {
        let mut coordinator = ModeCoordinator::new(Mode::Maintenance);
        let change = coordinator.transition(Mode::Probe, &[]).unwrap().unwrap();
        assert_eq!(change.from, Mode::Maintenance);
        assert_eq!(change.to, Mode::Probe);
        assert_eq!(coordinator.mode(), Mode::Probe);
    }

    #[test]
    fn test_noop_transition() {
        let mut coordinator = ModeCoordinator::new(Mode::Show);
        assert!(coordinator.transition(Mode::Show, &[]).unwrap().is_none());
    }
}
