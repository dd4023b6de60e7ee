//! OSC meter ingestion
//!
//! The mixer pushes per-channel meter levels as OSC messages over UDP,
//! one message per channel at roughly 100 Hz: address `/meters/{index}`
//! with a single float argument in `[0, 1]`. This module decodes those
//! datagrams into [`MeterSample`]s and runs the background listener
//! thread that feeds them to the engine.
//!
//! Anything that is not a meter message is counted and dropped; the
//! feed must survive a mixer that also broadcasts other OSC traffic.

use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Sender, TrySendError};
use parking_lot::Mutex;
use rosc::{OscMessage, OscPacket, OscType};
use tracing::{debug, info, trace, warn};

use meterlight_core::sample::MeterSample;

use crate::{error::ControlError, Result};

/// Default mixer meter port.
pub const DEFAULT_METER_PORT: u16 = 10024;

/// Address prefix carrying meter levels.
pub const METER_ADDRESS_PREFIX: &str = "/meters/";

/// Counters for the ingestion path. Shared with the listener thread.
#[derive(Debug, Default, Clone)]
pub struct DecodeStats {
    /// Meter samples successfully decoded
    pub decoded: u64,
    /// OSC messages with a non-meter address
    pub unknown_address: u64,
    /// Datagrams or messages that failed to decode
    pub malformed: u64,
    /// Samples dropped because the engine channel was full
    pub dropped: u64,
}

/// Parse a `/meters/{index}` address into its channel index.
pub fn parse_meter_address(address: &str) -> Option<u16> {
    address
        .strip_prefix(METER_ADDRESS_PREFIX)
        .and_then(|idx| idx.parse::<u16>().ok())
}

fn meter_level(args: &[OscType]) -> Option<f32> {
    match args.first()? {
        OscType::Float(f) => Some(*f),
        OscType::Double(d) => Some(*d as f32),
        OscType::Int(i) => Some(*i as f32),
        _ => None,
    }
}

fn decode_message(
    message: &OscMessage,
    timestamp: f64,
    out: &mut Vec<MeterSample>,
    stats: &mut DecodeStats,
) {
    let Some(channel) = parse_meter_address(&message.addr) else {
        trace!(addr = %message.addr, "ignoring non-meter OSC message");
        stats.unknown_address += 1;
        return;
    };
    let Some(level) = meter_level(&message.args) else {
        stats.malformed += 1;
        return;
    };
    stats.decoded += 1;
    out.push(MeterSample::new(channel, level, timestamp));
}

fn decode_packet(
    packet: &OscPacket,
    timestamp: f64,
    out: &mut Vec<MeterSample>,
    stats: &mut DecodeStats,
) {
    match packet {
        OscPacket::Message(message) => decode_message(message, timestamp, out, stats),
        OscPacket::Bundle(bundle) => {
            for inner in &bundle.content {
                decode_packet(inner, timestamp, out, stats);
            }
        }
    }
}

/// Decode one UDP datagram into meter samples.
///
/// Bundles are flattened; every non-meter or malformed message is
/// counted in `stats` and skipped.
pub fn decode_meter_datagram(
    buf: &[u8],
    timestamp: f64,
    stats: &mut DecodeStats,
) -> Vec<MeterSample> {
    let mut out = Vec::new();
    match rosc::decoder::decode_udp(buf) {
        Ok((_rest, packet)) => decode_packet(&packet, timestamp, &mut out, stats),
        Err(err) => {
            debug!(%err, "undecodable datagram on meter port");
            stats.malformed += 1;
        }
    }
    out
}

/// Background UDP listener for the mixer meter feed.
///
/// Runs until dropped or [`stop`](MeterListener::stop) is called. Samples
/// go out through a bounded channel; if the engine falls behind, the
/// newest samples are dropped and counted rather than blocking the
/// socket loop.
pub struct MeterListener {
    stop: Arc<AtomicBool>,
    stats: Arc<Mutex<DecodeStats>>,
    local_addr: std::net::SocketAddr,
    handle: Option<JoinHandle<()>>,
}

impl MeterListener {
    /// Bind `addr` (e.g. `0.0.0.0:10024`) and start the listener thread.
    ///
    /// Timestamps are seconds elapsed since `epoch`, the same monotonic
    /// clock the rest of the engine runs on.
    pub fn spawn(addr: &str, epoch: Instant, tx: Sender<MeterSample>) -> Result<Self> {
        let socket = UdpSocket::bind(addr)
            .map_err(|e| ControlError::OscError(format!("cannot bind meter port {addr}: {e}")))?;
        socket.set_read_timeout(Some(Duration::from_millis(250)))?;
        let local_addr = socket.local_addr()?;
        info!(%local_addr, "meter listener started");

        let stop = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(Mutex::new(DecodeStats::default()));

        let thread_stop = Arc::clone(&stop);
        let thread_stats = Arc::clone(&stats);
        let handle = thread::Builder::new()
            .name("meter-listener".into())
            .spawn(move || {
                listener_loop(socket, epoch, tx, thread_stop, thread_stats);
            })?;

        Ok(Self {
            stop,
            stats,
            local_addr,
            handle: Some(handle),
        })
    }

    /// Address the listener actually bound (useful with port 0).
    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.local_addr
    }

    /// Snapshot of the ingestion counters.
    pub fn stats(&self) -> DecodeStats {
        self.stats.lock().clone()
    }

    /// Ask the thread to exit and wait for it.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for MeterListener {
    fn drop(&mut self) {
        self.stop();
    }
}

fn listener_loop(
    socket: UdpSocket,
    epoch: Instant,
    tx: Sender<MeterSample>,
    stop: Arc<AtomicBool>,
    stats: Arc<Mutex<DecodeStats>>,
) {
    // Meter datagrams are small; 1500 covers any sane bundle.
    let mut buf = [0u8; 1536];
    while !stop.load(Ordering::Relaxed) {
        let len = match socket.recv_from(&mut buf) {
            Ok((len, _from)) => len,
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(e) => {
                warn!(%e, "meter socket receive failed");
                continue;
            }
        };

        let timestamp = epoch.elapsed().as_secs_f64();
        let mut local = stats.lock();
        for sample in decode_meter_datagram(&buf[..len], timestamp, &mut local) {
            match tx.try_send(sample) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => local.dropped += 1,
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
    }
    debug!("meter listener stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use rosc::{encoder, OscBundle, OscTime};

    fn encode_meter(channel: u16, level: f32) -> Vec<u8> {
        encoder::encode(&OscPacket::Message(OscMessage {
            addr: format!("/meters/{channel}"),
            args: vec![OscType::Float(level)],
        }))
        .unwrap()
    }

    #[test]
    fn test_parse_meter_address() {
        assert_eq!(parse_meter_address("/meters/0"), Some(0));
        assert_eq!(parse_meter_address("/meters/17"), Some(17));
        assert_eq!(parse_meter_address("/meters/"), None);
        assert_eq!(parse_meter_address("/meters/kick"), None);
        assert_eq!(parse_meter_address("/xremote"), None);
    }

    #[test]
    fn test_decode_single_meter_message() {
        let buf = encode_meter(3, 0.42);
        let mut stats = DecodeStats::default();
        let samples = decode_meter_datagram(&buf, 1.5, &mut stats);
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].channel, 3);
        assert!((samples[0].level - 0.42).abs() < 1e-6);
        assert_eq!(samples[0].timestamp, 1.5);
        assert_eq!(stats.decoded, 1);
        assert_eq!(stats.malformed, 0);
    }

    #[test]
    fn test_unknown_address_counted_not_fatal() {
        let buf = encoder::encode(&OscPacket::Message(OscMessage {
            addr: "/status/battery".into(),
            args: vec![OscType::Float(0.9)],
        }))
        .unwrap();
        let mut stats = DecodeStats::default();
        let samples = decode_meter_datagram(&buf, 0.0, &mut stats);
        assert!(samples.is_empty());
        assert_eq!(stats.unknown_address, 1);
    }

    #[test]
    fn test_wrong_argument_type_is_malformed() {
        let buf = encoder::encode(&OscPacket::Message(OscMessage {
            addr: "/meters/2".into(),
            args: vec![OscType::String("loud".into())],
        }))
        .unwrap();
        let mut stats = DecodeStats::default();
        assert!(decode_meter_datagram(&buf, 0.0, &mut stats).is_empty());
        assert_eq!(stats.malformed, 1);
    }

    #[test]
    fn test_garbage_datagram_is_malformed() {
        let mut stats = DecodeStats::default();
        assert!(decode_meter_datagram(&[0xde, 0xad, 0xbe, 0xef], 0.0, &mut stats).is_empty());
        assert_eq!(stats.malformed, 1);
    }

    #[test]
    fn test_bundle_is_flattened() {
        let bundle = OscPacket::Bundle(OscBundle {
            timetag: OscTime {
                seconds: 0,
                fractional: 0,
            },
            content: vec![
                OscPacket::Message(OscMessage {
                    addr: "/meters/0".into(),
                    args: vec![OscType::Float(0.1)],
                }),
                OscPacket::Message(OscMessage {
                    addr: "/meters/1".into(),
                    args: vec![OscType::Float(0.2)],
                }),
            ],
        });
        let buf = encoder::encode(&bundle).unwrap();
        let mut stats = DecodeStats::default();
        let samples = decode_meter_datagram(&buf, 0.0, &mut stats);
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[1].channel, 1);
    }

    #[test]
    fn test_level_clamped_on_decode() {
        let buf = encode_meter(0, 3.5);
        let mut stats = DecodeStats::default();
        let samples = decode_meter_datagram(&buf, 0.0, &mut stats);
        assert_eq!(samples[0].level, 1.0);
    }

    #[test]
    fn test_listener_end_to_end() {
        let (tx, rx) = crossbeam_channel::bounded(64);
        let mut listener = MeterListener::spawn("127.0.0.1:0", Instant::now(), tx).unwrap();

        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        sender
            .send_to(&encode_meter(5, 0.75), listener.local_addr())
            .unwrap();

        let sample = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(sample.channel, 5);
        assert!((sample.level - 0.75).abs() < 1e-6);

        listener.stop();
        assert_eq!(listener.stats().decoded, 1);
    }
}
