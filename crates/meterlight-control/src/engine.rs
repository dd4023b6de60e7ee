//! Engine: wires ingestion, analysis, scheduling and output together
//!
//! Single event loop over three channels: decoded meter samples from the
//! listener thread, the tick timer, and external commands. Analysis is
//! synchronous inside the loop (no I/O on the sample path); the outside
//! world reads a consistent [`ShowSnapshot`] through `ArcSwap`.

use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwap;
use crossbeam_channel::{bounded, select, Receiver, Sender};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use meterlight_core::beat::{BeatDetector, BeatEvent};
use meterlight_core::config::CoreConfig;
use meterlight_core::mapping::{validate_mappings, ChannelMapping};
use meterlight_core::mode::{Mode, ModeCoordinator};
use meterlight_core::recognize::{RecognitionState, SongRecognizer};
use meterlight_core::sample::{LinkState, LinkWatchdog, MeterSample};
use meterlight_core::signature::{ReferenceSignature, SongId};
use meterlight_core::store::{ReferenceStore, StoreView};

use crate::cue::{ChannelLevels, CueLibrary};
use crate::dmx::ArtNetSender;
use crate::osc::MeterListener;
use crate::scheduler::{LightingScheduler, SchedulerConfig, TickContext};
use crate::{error::ControlError, Result};

/// Everything the engine needs to start.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// UDP address the meter listener binds
    pub osc_listen: String,
    /// Art-Net destination
    pub artnet_target: String,
    /// Analysis tuning
    pub core: CoreConfig,
    /// Output tuning
    pub scheduler: SchedulerConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            osc_listen: format!("0.0.0.0:{}", crate::osc::DEFAULT_METER_PORT),
            artnet_target: crate::dmx::artnet::DEFAULT_ARTNET_TARGET.to_string(),
            core: CoreConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

/// Commands accepted while the engine runs.
#[derive(Debug, Clone)]
pub enum EngineCommand {
    /// Switch operating mode
    SetMode(Mode),
    /// Capture the current live window as a signature (Probe/Maintenance)
    CaptureSignature {
        /// Id to store it under
        song_id: SongId,
        /// Display name
        name: String,
    },
    /// Stop the loop; a blackout goes out before sockets close
    Shutdown,
}

/// Read-only view of the running show for UIs and logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShowSnapshot {
    /// Current operating mode
    pub mode: Mode,
    /// Recognizer belief
    pub recognition: RecognitionState,
    /// Most recent beat, if any
    pub last_beat: Option<BeatEvent>,
    /// Meter link health
    pub link: LinkState,
    /// Scheduler ticks completed
    pub ticks: u64,
    /// Frames handed to the Art-Net socket
    pub frames_sent: u64,
    /// Meter samples processed
    pub samples_seen: u64,
}

/// Cloneable handle for controlling a running engine.
#[derive(Clone)]
pub struct EngineHandle {
    commands: Sender<EngineCommand>,
    snapshot: Arc<ArcSwap<ShowSnapshot>>,
}

impl EngineHandle {
    /// Latest published snapshot.
    pub fn snapshot(&self) -> Arc<ShowSnapshot> {
        self.snapshot.load_full()
    }

    fn send(&self, command: EngineCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| ControlError::EngineStopped)
    }

    /// Request a mode transition.
    pub fn set_mode(&self, mode: Mode) -> Result<()> {
        self.send(EngineCommand::SetMode(mode))
    }

    /// Request a signature capture of the current live window.
    pub fn capture_signature(&self, song_id: SongId, name: impl Into<String>) -> Result<()> {
        self.send(EngineCommand::CaptureSignature {
            song_id,
            name: name.into(),
        })
    }

    /// Stop the engine.
    pub fn shutdown(&self) -> Result<()> {
        self.send(EngineCommand::Shutdown)
    }
}

/// The assembled system. Construct, take a handle, then [`run`](Engine::run).
pub struct Engine {
    config: EngineConfig,
    store: Box<dyn ReferenceStore>,
    coordinator: ModeCoordinator,
    watchdog: LinkWatchdog,
    detector: BeatDetector,
    recognizer: SongRecognizer,
    scheduler: LightingScheduler,
    sender: ArtNetSender,
    candidates: Vec<ReferenceSignature>,
    mappings: Vec<ChannelMapping>,
    levels: ChannelLevels,
    last_beat: Option<BeatEvent>,
    beat_for_tick: Option<BeatEvent>,
    link: LinkState,
    epoch: Instant,
    ticks: u64,
    samples_seen: u64,
    snapshot: Arc<ArcSwap<ShowSnapshot>>,
    commands_tx: Sender<EngineCommand>,
    commands_rx: Receiver<EngineCommand>,
}

impl Engine {
    /// Build the engine. Configuration and the mapping set are validated
    /// here; errors at this point are fatal by design, before any light
    /// turns on.
    pub fn new(
        config: EngineConfig,
        initial_mode: Mode,
        mut store: Box<dyn ReferenceStore>,
        cues: CueLibrary,
    ) -> Result<Self> {
        config.core.validate()?;
        config.scheduler.validate()?;

        let mappings = store.get_channel_mapping()?;
        validate_mappings(&mappings)?;
        let candidates = load_candidates(store.as_mut())?;
        info!(
            signatures = candidates.len(),
            mappings = mappings.len(),
            mode = %initial_mode,
            "engine assembled"
        );

        let scheduler =
            LightingScheduler::new(config.scheduler.clone(), mappings.clone(), cues)?;
        let sender = ArtNetSender::new(&config.artnet_target)?;

        let watchdog = LinkWatchdog::new(config.core.watchdog_secs());
        let detector = BeatDetector::new(config.core.beat.clone());
        let recognizer = SongRecognizer::new(config.core.recognizer.clone());

        let initial = ShowSnapshot {
            mode: initial_mode,
            recognition: RecognitionState::unknown(0.0),
            last_beat: None,
            link: LinkState::Degraded,
            ticks: 0,
            frames_sent: 0,
            samples_seen: 0,
        };
        let (commands_tx, commands_rx) = bounded(16);

        Ok(Self {
            config,
            store,
            coordinator: ModeCoordinator::new(initial_mode),
            watchdog,
            detector,
            recognizer,
            scheduler,
            sender,
            candidates,
            mappings,
            levels: ChannelLevels::new(),
            last_beat: None,
            beat_for_tick: None,
            link: LinkState::Degraded,
            epoch: Instant::now(),
            ticks: 0,
            samples_seen: 0,
            snapshot: Arc::new(ArcSwap::from_pointee(initial)),
            commands_tx,
            commands_rx,
        })
    }

    /// Handle for commands and snapshots; clone freely.
    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            commands: self.commands_tx.clone(),
            snapshot: Arc::clone(&self.snapshot),
        }
    }

    fn now(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    /// Run until shutdown. Blocks the calling thread; the meter listener
    /// runs on its own thread feeding the sample channel.
    pub fn run(mut self) -> Result<()> {
        let (meter_tx, meter_rx) = bounded::<MeterSample>(1024);
        let mut listener = MeterListener::spawn(&self.config.osc_listen, self.epoch, meter_tx)?;
        let ticker = crossbeam_channel::tick(self.config.scheduler.tick_interval());
        let commands_rx = self.commands_rx.clone();
        info!(listen = %listener.local_addr(), "engine running");

        loop {
            select! {
                recv(meter_rx) -> sample => match sample {
                    Ok(sample) => self.on_sample(sample),
                    Err(_) => {
                        warn!("meter channel closed");
                        break;
                    }
                },
                recv(ticker) -> _ => self.on_tick(),
                recv(commands_rx) -> command => match command {
                    Ok(EngineCommand::Shutdown) | Err(_) => break,
                    Ok(command) => {
                        if let Err(e) = self.on_command(command) {
                            warn!(%e, "command failed");
                        }
                    }
                },
            }
        }

        listener.stop();
        let stats = listener.stats();
        self.sender
            .blackout(self.scheduler.universes().iter().copied());
        info!(
            decoded = stats.decoded,
            dropped = stats.dropped,
            frames = self.sender.frames_sent(),
            "engine stopped, blackout sent"
        );
        Ok(())
    }

    fn on_sample(&mut self, sample: MeterSample) {
        self.samples_seen += 1;
        let resolved = self.watchdog.observe(sample);
        if !resolved.stale {
            self.levels.insert(resolved.channel, resolved.level);
        }
        self.recognizer.observe_sample(&resolved);
        if let Some(event) = self.detector.process(&resolved) {
            self.recognizer.observe_beat(&event);
            self.last_beat = Some(event);
            self.beat_for_tick = Some(event);
        }
    }

    fn on_tick(&mut self) {
        let now = self.now();

        // Link loss invalidates everything the rolling analysis believes.
        let link = self.watchdog.link_state(now);
        if link == LinkState::Degraded && self.link == LinkState::Up {
            warn!("meter link lost, resetting analysis state");
            self.reset_analysis(now);
        }
        self.link = link;

        let recognition = self.recognizer.rescore(now, &self.candidates);

        let beat = self.beat_for_tick.take();
        let ctx = TickContext {
            now,
            mode: self.coordinator.mode(),
            recognition: recognition.current,
            levels: &self.levels,
            beat: beat.as_ref(),
        };
        for frame in self.scheduler.tick(&ctx) {
            self.sender.send_frame(&frame);
        }
        self.ticks += 1;

        self.snapshot.store(Arc::new(ShowSnapshot {
            mode: self.coordinator.mode(),
            recognition,
            last_beat: self.last_beat,
            link: self.link,
            ticks: self.ticks,
            frames_sent: self.sender.frames_sent(),
            samples_seen: self.samples_seen,
        }));
    }

    fn on_command(&mut self, command: EngineCommand) -> Result<()> {
        match command {
            EngineCommand::SetMode(mode) => self.set_mode(mode),
            EngineCommand::CaptureSignature { song_id, name } => {
                self.capture_signature(song_id, &name)
            }
            EngineCommand::Shutdown => unreachable!("handled in run loop"),
        }
    }

    fn set_mode(&mut self, mode: Mode) -> Result<()> {
        let mappings = self.store.get_channel_mapping()?;
        if let Some(change) = self.coordinator.transition(mode, &mappings)? {
            // Fresh slate: nothing recognized in the old mode carries over.
            self.reset_analysis(self.now());
            self.mappings = mappings.clone();
            self.scheduler.set_mappings(mappings);
            self.candidates = load_candidates(self.store.as_mut())?;
            debug!(from = %change.from, to = %change.to, "mode transition applied");
        }
        Ok(())
    }

    fn capture_signature(&mut self, song_id: SongId, name: &str) -> Result<()> {
        let mode = self.coordinator.mode();
        let mut signature = self.recognizer.capture_window(song_id, name);
        // Maintenance commits; Probe stays provisional per the mode table.
        signature.provisional = !mode.allows_overwrite();

        let mut view = StoreView::new(self.store.as_mut(), mode);
        view.put_signature(signature)?;
        self.candidates = load_candidates(self.store.as_mut())?;
        info!(song_id, %mode, "signature captured");
        Ok(())
    }

    fn reset_analysis(&mut self, now: f64) {
        self.detector.reset();
        self.recognizer.reset(now);
        self.watchdog.reset();
        self.levels.clear();
        self.beat_for_tick = None;
    }
}

fn load_candidates(store: &mut dyn ReferenceStore) -> Result<Vec<ReferenceSignature>> {
    let mut candidates = Vec::new();
    for song_id in store.list_signatures()? {
        if let Some(signature) = store.get_signature(song_id)? {
            candidates.push(signature);
        }
    }
    Ok(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use meterlight_core::store::MemoryStore;

    fn test_config() -> EngineConfig {
        EngineConfig {
            osc_listen: "127.0.0.1:0".into(),
            artnet_target: "127.0.0.1:6454".into(),
            ..EngineConfig::default()
        }
    }

    #[test]
    fn test_engine_assembles_with_empty_store() {
        let engine = Engine::new(
            test_config(),
            Mode::Maintenance,
            Box::new(MemoryStore::new()),
            CueLibrary::default(),
        );
        assert!(engine.is_ok());
    }

    #[test]
    fn test_invalid_scheduler_config_is_fatal() {
        let config = EngineConfig {
            scheduler: SchedulerConfig {
                tick_hz: 100,
                ..SchedulerConfig::default()
            },
            ..test_config()
        };
        let engine = Engine::new(
            config,
            Mode::Maintenance,
            Box::new(MemoryStore::new()),
            CueLibrary::default(),
        );
        assert!(matches!(engine, Err(ControlError::InvalidConfig(_))));
    }

    #[test]
    fn test_handle_reports_stopped_engine() {
        let engine = Engine::new(
            test_config(),
            Mode::Maintenance,
            Box::new(MemoryStore::new()),
            CueLibrary::default(),
        )
        .unwrap();
        let handle = engine.handle();
        drop(engine);
        assert!(matches!(
            handle.set_mode(Mode::Probe),
            Err(ControlError::EngineStopped)
        ));
    }

    #[test]
    fn test_run_survives_dead_lighting_link() {
        // IPv6 target on the IPv4 socket: every Art-Net send fails at the
        // OS level, like a dropped WLAN. The engine must keep ticking and
        // shut down cleanly instead of erroring out mid-show.
        let config = EngineConfig {
            artnet_target: "[::1]:6454".into(),
            ..test_config()
        };
        let engine = Engine::new(
            config,
            Mode::Show,
            Box::new(MemoryStore::new()),
            CueLibrary::default(),
        )
        .unwrap();
        let handle = engine.handle();
        let runner = std::thread::spawn(move || engine.run());
        std::thread::sleep(std::time::Duration::from_millis(120));
        handle.shutdown().unwrap();
        runner.join().unwrap().unwrap();
        let snapshot = handle.snapshot();
        assert!(snapshot.ticks > 1, "loop stopped after {} ticks", snapshot.ticks);
        assert_eq!(snapshot.frames_sent, 0);
    }

    #[test]
    fn test_run_shuts_down_on_command() {
        let engine = Engine::new(
            test_config(),
            Mode::Maintenance,
            Box::new(MemoryStore::new()),
            CueLibrary::default(),
        )
        .unwrap();
        let handle = engine.handle();
        let runner = std::thread::spawn(move || engine.run());
        // Give the loop a few ticks before stopping it.
        std::thread::sleep(std::time::Duration::from_millis(120));
        handle.shutdown().unwrap();
        runner.join().unwrap().unwrap();
        let snapshot = handle.snapshot();
        assert!(snapshot.ticks > 0);
        assert_eq!(snapshot.mode, Mode::Maintenance);
    }
}
