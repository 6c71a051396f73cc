use std::{path::PathBuf, sync::Arc};

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::{
    audio_mixer::Mixer,
    catalog::EffectCatalog,
    command::Command,
    error::BusError,
    metadata::probe_bitrate,
    pacer::Pacer,
    session::{PipelineState, Session, SourceInfo, Wiring},
    sink::{BroadcastSink, Listener, ListenerId, ListenerRegistry},
    stream,
    tool::{AudioTool, MixSpec},
};

/// Settings of one broadcast. Paths are used as given.
#[derive(Debug, Clone)]
pub struct BusConfig {
    pub track: PathBuf,
    pub fx_dir: PathBuf,
    /// bits per second assumed when probing fails
    pub default_bitrate: u64,
    /// `bytes_per_sec = bitrate / bitrate_divisor`
    pub bitrate_divisor: u64,
    pub media_type: String,
    pub volume: String,
    pub fx_volume: String,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            track: PathBuf::from("audio/songs/conversation.mp3"),
            fx_dir: PathBuf::from("audio/fx"),
            default_bitrate: 128_000,
            bitrate_divisor: 8,
            media_type: "mp3".to_string(),
            volume: "0.99".to_string(),
            fx_volume: "0.1".to_string(),
        }
    }
}

impl BusConfig {
    pub fn bytes_per_sec(&self, bits: u64) -> u64 {
        (bits / self.bitrate_divisor.max(1)).max(1)
    }

    fn mix_spec(&self, effect: PathBuf) -> MixSpec {
        MixSpec {
            media_type: self.media_type.clone(),
            volume: self.volume.clone(),
            fx_volume: self.fx_volume.clone(),
            effect,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BusStatus {
    #[serde(flatten)]
    pub state: PipelineState,
    pub track: PathBuf,
    pub bytes_per_sec: u64,
    pub listeners: usize,
}

/// The playback controller. Owns the session on its own task and runs
/// start, stop and overlay one at a time.
pub struct Bus {
    id: String,
    cancel: CancellationToken,
    tx: mpsc::Sender<BusCommand>,
    registry: ListenerRegistry,
}

impl Bus {
    pub fn new(id: &str, config: BusConfig, tool: Arc<dyn AudioTool>) -> Self {
        let id = id.to_string();
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(64);
        let registry = ListenerRegistry::new();

        let state = BusState::new(config, tool, registry.clone());
        let cancel_clone = cancel.clone();
        let loop_id = id.clone();
        tokio::spawn(async move { Self::inner_loop(loop_id, state, cancel_clone, rx).await });

        Self {
            id,
            cancel,
            tx,
            registry,
        }
    }

    async fn inner_loop(
        id: String,
        mut state: BusState,
        cancel: CancellationToken,
        mut rx: mpsc::Receiver<BusCommand>,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                Some(cmd) = rx.recv() => {
                    if let Err(e) = Self::inner_command_handler(&mut state, cmd).await {
                        log::error!("bus {} command handler error: {:#}", id, e);
                    }
                },
                else => break,
            }
        }
        state.session.stop();
        log::info!("bus {} stopped", id);
    }

    async fn inner_command_handler(state: &mut BusState, cmd: BusCommand) -> anyhow::Result<()> {
        match cmd {
            BusCommand::Start { result } => {
                result
                    .send(Self::start_internal(state).await)
                    .map_err(|_| anyhow::anyhow!("send result error: receiver dropped"))?;
            }
            BusCommand::Stop { result } => {
                result
                    .send(Self::stop_internal(state))
                    .map_err(|_| anyhow::anyhow!("send result error: receiver dropped"))?;
            }
            BusCommand::Overlay { name, result } => {
                result
                    .send(Self::overlay_internal(state, &name).await)
                    .map_err(|_| anyhow::anyhow!("send result error: receiver dropped"))?;
            }
            BusCommand::Status { result } => {
                result
                    .send(Self::status_internal(state))
                    .map_err(|_| anyhow::anyhow!("send result error: receiver dropped"))?;
            }
        }
        Ok(())
    }

    async fn start_internal(state: &mut BusState) -> anyhow::Result<u64> {
        if state.session.stop() {
            log::info!("restarting {}", state.session.track.display());
        }

        let track = state.session.track.clone();
        let bits = probe_bitrate(state.tool.as_ref(), &track, state.config.default_bitrate).await;
        let bytes_per_sec = state.config.bytes_per_sec(bits);
        let source = stream::open_file(&track).await?;

        let pacer = Pacer::new(bytes_per_sec, BroadcastSink::spawn(state.registry.clone()));
        pacer.attach(source).await?;

        state.session.bytes_per_sec = bytes_per_sec;
        state.session.wiring = Wiring::Playing {
            pacer,
            source: SourceInfo::Track(track.clone()),
        };
        log::info!("playing {} at {} B/s", track.display(), bytes_per_sec);
        Ok(bytes_per_sec)
    }

    fn stop_internal(state: &mut BusState) -> anyhow::Result<bool> {
        let stopped = state.session.stop();
        if stopped {
            log::info!("stopped {}", state.session.track.display());
        }
        Ok(stopped)
    }

    /// Splices `name` into the live stream. The new pacer is wired to a sink
    /// before the old source is detached, and the old pacer is stopped
    /// before the new one releases anything.
    async fn overlay_internal(state: &mut BusState, name: &str) -> anyhow::Result<PathBuf> {
        let effect = state.catalog.resolve(name).await?;

        state.session.settle();
        let Wiring::Playing { pacer: old, .. } = &state.session.wiring else {
            return Err(BusError::NotPlaying.into());
        };

        let pending = PendingOverlay {
            pacer: Pacer::new_paused(
                state.session.bytes_per_sec,
                BroadcastSink::spawn(state.registry.clone()),
            ),
            effect,
        };

        let Some(primary) = old.detach().await else {
            // the track ran out while we were setting up
            state.session.stop();
            return Err(BusError::NotPlaying.into());
        };

        let spec = state.config.mix_spec(pending.effect.clone());
        let mixer = match Mixer::spawn(state.tool.as_ref(), spec) {
            Ok(mixer) => mixer,
            Err(e) => {
                if let Wiring::Playing { pacer: old, .. } = &state.session.wiring {
                    old.attach(primary).await?;
                    old.resume().await;
                }
                return Err(e.context(format!("overlay {}", pending.effect.display())));
            }
        };

        if let Err(e) = pending.pacer.attach(mixer.merge(primary)).await {
            state.session.stop();
            return Err(e);
        }

        let previous = std::mem::replace(&mut state.session.wiring, Wiring::Idle);
        let Wiring::Playing { pacer: old, source } = previous else {
            return Err(BusError::NotPlaying.into());
        };
        old.stop();

        pending.pacer.resume().await;
        let effect = pending.effect.clone();
        state.session.wiring = pending.into_wiring(source);
        log::info!(
            "overlaid {} on {} ({:?})",
            effect.display(),
            state.session.track.display(),
            state.session.state()
        );
        Ok(effect)
    }

    fn status_internal(state: &mut BusState) -> anyhow::Result<BusStatus> {
        state.session.settle();
        Ok(BusStatus {
            state: state.session.state(),
            track: state.session.track.clone(),
            bytes_per_sec: state.session.bytes_per_sec,
            listeners: state.registry.len(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Starts the track from the beginning. Returns the byte rate in use.
    pub async fn start(&self) -> anyhow::Result<u64> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(BusCommand::Start { result: tx })
            .await
            .map_err(|_| BusError::Closed)?;
        rx.await.map_err(|_| BusError::Closed)?
    }

    /// Returns `false` when nothing was playing.
    pub async fn stop(&self) -> anyhow::Result<bool> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(BusCommand::Stop { result: tx })
            .await
            .map_err(|_| BusError::Closed)?;
        rx.await.map_err(|_| BusError::Closed)?
    }

    /// Overlays the first effect matching `name`. Returns its path.
    pub async fn overlay(&self, name: &str) -> anyhow::Result<PathBuf> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(BusCommand::Overlay {
                name: name.to_string(),
                result: tx,
            })
            .await
            .map_err(|_| BusError::Closed)?;
        rx.await.map_err(|_| BusError::Closed)?
    }

    pub async fn status(&self) -> anyhow::Result<BusStatus> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(BusCommand::Status { result: tx })
            .await
            .map_err(|_| BusError::Closed)?;
        rx.await.map_err(|_| BusError::Closed)?
    }

    pub async fn execute(&self, command: Command) -> anyhow::Result<()> {
        log::debug!("bus {} executing {}", self.id, command);
        match command {
            Command::Start => self.start().await.map(|_| ()),
            Command::Stop => self.stop().await.map(|_| ()),
            Command::Overlay(name) => self.overlay(&name).await.map(|_| ()),
        }
    }

    pub fn register(&self) -> Listener {
        self.registry.register()
    }

    pub fn unregister(&self, id: &ListenerId) -> bool {
        self.registry.unregister(id)
    }

    pub fn registry(&self) -> &ListenerRegistry {
        &self.registry
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for Bus {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct BusState {
    config: BusConfig,
    tool: Arc<dyn AudioTool>,
    catalog: EffectCatalog,
    registry: ListenerRegistry,
    session: Session,
}

impl BusState {
    fn new(config: BusConfig, tool: Arc<dyn AudioTool>, registry: ListenerRegistry) -> Self {
        let bytes_per_sec = config.bytes_per_sec(config.default_bitrate);
        Self {
            catalog: EffectCatalog::new(config.fx_dir.clone()),
            session: Session::new(config.track.clone(), bytes_per_sec),
            config,
            tool,
            registry,
        }
    }
}

/// A paused pacer already feeding listeners, waiting for merged audio.
struct PendingOverlay {
    pacer: Pacer,
    effect: PathBuf,
}

impl PendingOverlay {
    fn into_wiring(self, base: SourceInfo) -> Wiring {
        Wiring::Playing {
            pacer: self.pacer,
            source: SourceInfo::Mixed {
                base: Box::new(base),
                effect: self.effect,
            },
        }
    }
}

pub enum BusCommand {
    Start {
        result: oneshot::Sender<anyhow::Result<u64>>,
    },
    Stop {
        result: oneshot::Sender<anyhow::Result<bool>>,
    },
    Overlay {
        name: String,
        result: oneshot::Sender<anyhow::Result<PathBuf>>,
    },
    Status {
        result: oneshot::Sender<anyhow::Result<BusStatus>>,
    },
}

#[cfg(test)]
#[path = "bus_test.rs"]
mod bus_test;
