//! Instrument-to-fixture channel mappings
//!
//! A mapping ties one mixer channel (one instrument) to the DMX addresses
//! its energy drives. Mappings are static per session and re-validated on
//! every mode entry; overlapping bindings are a configuration error, never
//! resolved at runtime.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{CoreError, Result};

/// Closed instrument identifier set, plus an escape hatch for anything the
/// band brings that we did not anticipate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Instrument {
    /// Kick drum
    BassDrum,
    /// Snare drum
    Snare,
    /// Bass guitar
    BassGuitar,
    /// Electric/acoustic guitar
    Guitar,
    /// Keys/synth
    Keys,
    /// Lead or backing vocals
    Vocals,
    /// Anything else, by name
    Other(String),
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instrument::BassDrum => write!(f, "bass drum"),
            Instrument::Snare => write!(f, "snare"),
            Instrument::BassGuitar => write!(f, "bass guitar"),
            Instrument::Guitar => write!(f, "guitar"),
            Instrument::Keys => write!(f, "keys"),
            Instrument::Vocals => write!(f, "vocals"),
            Instrument::Other(name) => write!(f, "{name}"),
        }
    }
}

/// One block of DMX addresses driven by an instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixtureBinding {
    /// Target universe
    pub universe: u16,
    /// First DMX address (1-512)
    pub address: u16,
    /// Number of consecutive addresses
    pub width: u16,
}

impl FixtureBinding {
    /// Addresses covered by this binding.
    pub fn addresses(&self) -> impl Iterator<Item = u16> {
        self.address..self.address + self.width
    }
}

/// Binds one instrument's mixer channel to its fixtures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelMapping {
    /// Which instrument this is
    pub instrument: Instrument,
    /// Source mixer channel index
    pub channel: u16,
    /// DMX addresses the instrument's energy affects
    pub fixtures: Vec<FixtureBinding>,
}

/// Validate a mapping set at mode entry.
///
/// Checks address ranges and rejects any (universe, address) slot claimed
/// twice across the whole set.
pub fn validate_mappings(mappings: &[ChannelMapping]) -> Result<()> {
    let mut claimed: HashSet<(u16, u16)> = HashSet::new();
    for mapping in mappings {
        for binding in &mapping.fixtures {
            if binding.address == 0 || binding.width == 0 {
                return Err(CoreError::InvalidBinding(format!(
                    "{}: DMX addresses are 1-based and width must be nonzero",
                    mapping.instrument
                )));
            }
            if u32::from(binding.address) + u32::from(binding.width) - 1 > 512 {
                return Err(CoreError::InvalidBinding(format!(
                    "{}: binding at {}..{} exceeds 512 channels",
                    mapping.instrument,
                    binding.address,
                    binding.address + binding.width
                )));
            }
            for address in binding.addresses() {
                if !claimed.insert((binding.universe, address)) {
                    return Err(CoreError::MappingConflict {
                        universe: binding.universe,
                        address,
                    });
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(instrument: Instrument, channel: u16, bindings: Vec<FixtureBinding>) -> ChannelMapping {
        ChannelMapping {
            instrument,
            channel,
            fixtures: bindings,
        }
    }

    #[test]
    fn test_valid_mapping_set() {
        let mappings = vec![
            mapping(
                Instrument::BassDrum,
                0,
                vec![FixtureBinding {
                    universe: 0,
                    address: 1,
                    width: 3,
                }],
            ),
            mapping(
                Instrument::Snare,
                1,
                vec![FixtureBinding {
                    universe: 0,
                    address: 4,
                    width: 3,
                }],
            ),
        ];
        assert!(validate_mappings(&mappings).is_ok());
    }

    #[test]
    fn test_overlap_within_universe_rejected() {
        let mappings = vec![
            mapping(
                Instrument::BassDrum,
                0,
                vec![FixtureBinding {
                    universe: 0,
                    address: 1,
                    width: 4,
                }],
            ),
            mapping(
                Instrument::Vocals,
                5,
                vec![FixtureBinding {
                    universe: 0,
                    address: 4,
                    width: 1,
                }],
            ),
        ];
        match validate_mappings(&mappings) {
            Err(CoreError::MappingConflict { universe, address }) => {
                assert_eq!(universe, 0);
                assert_eq!(address, 4);
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn test_same_address_in_other_universe_ok() {
        let mappings = vec![
            mapping(
                Instrument::BassDrum,
                0,
                vec![FixtureBinding {
                    universe: 0,
                    address: 1,
                    width: 1,
                }],
            ),
            mapping(
                Instrument::Snare,
                1,
                vec![FixtureBinding {
                    universe: 1,
                    address: 1,
                    width: 1,
                }],
            ),
        ];
        assert!(validate_mappings(&mappings).is_ok());
    }

    #[test]
    fn test_zero_address_rejected() {
        let mappings = vec![mapping(
            Instrument::Keys,
            3,
            vec![FixtureBinding {
                universe: 0,
                address: 0,
                width: 1,
            }],
        )];
        assert!(validate_mappings(&mappings).is_err());
    }

    #[test]
    fn test_binding_past_512_rejected() {
        let mappings = vec![mapping(
            Instrument::Guitar,
            4,
            vec![FixtureBinding {
                universe: 0,
                address: 510,
                width: 4,
            }],
        )];
        assert!(validate_mappings(&mappings).is_err());
    }

    #[test]
    fn test_binding_ending_at_512_ok() {
        let mappings = vec![mapping(
            Instrument::Guitar,
            4,
            vec![FixtureBinding {
                universe: 0,
                address: 510,
                width: 3,
            }],
        )];
        assert!(validate_mappings(&mappings).is_ok());
    }
}
