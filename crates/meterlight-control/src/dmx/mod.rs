//! DMX output types and Art-Net transport

pub mod artnet;

pub use artnet::ArtNetSender;

/// One universe's worth of channel values for one scheduler tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LightingFrame {
    /// Target Art-Net universe (port-address)
    pub universe: u16,
    /// Full DMX channel block; index 0 is DMX address 1
    pub channels: [u8; 512],
    /// Per-universe wrapping sequence number
    pub sequence: u8,
}

impl LightingFrame {
    /// All-zero frame for a universe.
    pub fn blackout(universe: u16) -> Self {
        Self {
            universe,
            channels: [0; 512],
            sequence: 0,
        }
    }

    /// Value at 1-based DMX `address`.
    pub fn get(&self, address: u16) -> u8 {
        debug_assert!((1..=512).contains(&address));
        self.channels[usize::from(address) - 1]
    }

    /// Set the value at 1-based DMX `address`.
    pub fn set(&mut self, address: u16, value: u8) {
        debug_assert!((1..=512).contains(&address));
        self.channels[usize::from(address) - 1] = value;
    }

    /// Is every channel dark?
    pub fn is_dark(&self) -> bool {
        self.channels.iter().all(|&v| v == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_indexing_is_one_based() {
        let mut frame = LightingFrame::blackout(0);
        frame.set(1, 255);
        frame.set(512, 7);
        assert_eq!(frame.channels[0], 255);
        assert_eq!(frame.channels[511], 7);
        assert_eq!(frame.get(1), 255);
        assert_eq!(frame.get(512), 7);
    }

    #[test]
    fn test_blackout_is_dark() {
        let mut frame = LightingFrame::blackout(3);
        assert!(frame.is_dark());
        frame.set(10, 1);
        assert!(!frame.is_dark());
    }
}
