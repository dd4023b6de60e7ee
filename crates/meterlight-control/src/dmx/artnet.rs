//! Art-Net protocol implementation (Art-Net 4, OpDmx only)
//!
//! Art-Net is a UDP-based protocol for transmitting DMX512 over Ethernet.
//! One sender serves every universe; the scheduler owns the per-universe
//! sequence numbers and hands over complete [`LightingFrame`]s.

use std::net::{SocketAddr, UdpSocket};

use crate::{error::ControlError, Result};

use super::LightingFrame;

/// Default Art-Net broadcast target.
pub const DEFAULT_ARTNET_TARGET: &str = "255.255.255.255:6454";

/// Art-Net sender for outputting DMX data
pub struct ArtNetSender {
    socket: UdpSocket,
    target: SocketAddr,
    frames_sent: u64,
    send_errors: u64,
}

impl ArtNetSender {
    /// Create a new Art-Net sender
    ///
    /// # Arguments
    /// * `target` - Broadcast address (typically "255.255.255.255:6454")
    pub fn new(target: &str) -> Result<Self> {
        let target: SocketAddr = target
            .parse()
            .map_err(|e| ControlError::DmxError(format!("Invalid Art-Net target address: {e}")))?;

        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.set_broadcast(true)?;
        // The tick loop must never stall on the socket.
        socket.set_nonblocking(true)?;

        tracing::info!(%target, "Art-Net sender created");

        Ok(Self {
            socket,
            target,
            frames_sent: 0,
            send_errors: 0,
        })
    }

    /// Send one frame via Art-Net.
    ///
    /// Send failures never propagate: a dropped lighting link is degraded
    /// output, counted and logged, and recovers by itself when the link
    /// returns. The next tick carries fresh data anyway.
    pub fn send_frame(&mut self, frame: &LightingFrame) {
        let packet = build_artnet_packet(frame);
        match self.socket.send_to(&packet, self.target) {
            Ok(_) => {
                self.frames_sent += 1;
                tracing::trace!(universe = frame.universe, seq = frame.sequence, "sent OpDmx");
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                self.send_errors += 1;
            }
            Err(e) => {
                self.send_errors += 1;
                tracing::warn!(%e, universe = frame.universe, "Art-Net send failed");
            }
        }
    }

    /// Send an all-zero frame to each listed universe.
    pub fn blackout(&mut self, universes: impl IntoIterator<Item = u16>) {
        for universe in universes {
            self.send_frame(&LightingFrame::blackout(universe));
        }
        tracing::info!("blackout sent");
    }

    /// Frames successfully handed to the socket.
    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    /// Frames lost to socket errors or backpressure.
    pub fn send_errors(&self) -> u64 {
        self.send_errors
    }
}

/// Build an Art-Net DMX packet (OpDmx)
fn build_artnet_packet(frame: &LightingFrame) -> Vec<u8> {
    let mut packet = vec![0u8; 18 + 512];

    // Header: "Art-Net\0"
    packet[0..8].copy_from_slice(b"Art-Net\0");

    // OpCode: OpDmx (0x5000)
    packet[8..10].copy_from_slice(&0x5000u16.to_le_bytes());

    // Protocol version (14)
    packet[10..12].copy_from_slice(&14u16.to_be_bytes());

    // Sequence
    packet[12] = frame.sequence;

    // Physical (0)
    packet[13] = 0;

    // Universe (Port-Address)
    packet[14..16].copy_from_slice(&frame.universe.to_le_bytes());

    // Length (512 channels, big-endian)
    packet[16..18].copy_from_slice(&512u16.to_be_bytes());

    // DMX data
    packet[18..].copy_from_slice(&frame.channels);

    packet
}
