use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::pacer::Pacer;

/// What the live pacer is reading from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceInfo {
    Track(PathBuf),
    Mixed {
        base: Box<SourceInfo>,
        effect: PathBuf,
    },
}

impl SourceInfo {
    /// Number of overlays stacked on the track.
    pub fn depth(&self) -> usize {
        match self {
            SourceInfo::Track(_) => 0,
            SourceInfo::Mixed { base, .. } => base.depth() + 1,
        }
    }

    pub fn track(&self) -> &Path {
        match self {
            SourceInfo::Track(path) => path,
            SourceInfo::Mixed { base, .. } => base.track(),
        }
    }
}

pub enum Wiring {
    Idle,
    Playing { pacer: Pacer, source: SourceInfo },
}

/// Observable shape of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum PipelineState {
    Idle,
    Plain,
    Merged { depth: usize },
}

/// The one playback session. Owned by the bus loop.
pub struct Session {
    pub track: PathBuf,
    pub bytes_per_sec: u64,
    pub wiring: Wiring,
}

impl Session {
    pub fn new(track: PathBuf, bytes_per_sec: u64) -> Self {
        Self {
            track,
            bytes_per_sec,
            wiring: Wiring::Idle,
        }
    }

    pub fn state(&self) -> PipelineState {
        match &self.wiring {
            Wiring::Idle => PipelineState::Idle,
            Wiring::Playing { source, .. } => match source.depth() {
                0 => PipelineState::Plain,
                depth => PipelineState::Merged { depth },
            },
        }
    }

    /// Falls back to idle when the live pacer ran out on its own.
    pub fn settle(&mut self) {
        if let Wiring::Playing { pacer, .. } = &self.wiring {
            if pacer.is_finished() {
                log::info!("track {} finished", self.track.display());
                self.wiring = Wiring::Idle;
            }
        }
    }

    /// Stops the live pacer. Returns `false` when already idle.
    pub fn stop(&mut self) -> bool {
        match std::mem::replace(&mut self.wiring, Wiring::Idle) {
            Wiring::Idle => false,
            Wiring::Playing { pacer, .. } => {
                pacer.stop();
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::SinkWriter;

    #[test]
    fn test_source_depth() {
        let track = SourceInfo::Track("song.mp3".into());
        let once = SourceInfo::Mixed {
            base: Box::new(track.clone()),
            effect: "a.mp3".into(),
        };
        let twice = SourceInfo::Mixed {
            base: Box::new(once.clone()),
            effect: "b.mp3".into(),
        };
        assert_eq!(track.depth(), 0);
        assert_eq!(once.depth(), 1);
        assert_eq!(twice.depth(), 2);
        assert_eq!(twice.track(), Path::new("song.mp3"));
    }

    #[tokio::test]
    async fn test_state_and_stop() {
        let mut session = Session::new("song.mp3".into(), 16_000);
        assert_eq!(session.state(), PipelineState::Idle);
        assert!(!session.stop());

        let (writer, _rx) = SinkWriter::channel(1);
        session.wiring = Wiring::Playing {
            pacer: Pacer::new_paused(16_000, writer),
            source: SourceInfo::Mixed {
                base: Box::new(SourceInfo::Track("song.mp3".into())),
                effect: "fx.mp3".into(),
            },
        };
        assert_eq!(session.state(), PipelineState::Merged { depth: 1 });
        assert!(session.stop());
        assert_eq!(session.state(), PipelineState::Idle);
        assert_eq!(session.bytes_per_sec, 16_000);
    }

    #[test]
    fn test_state_json() -> anyhow::Result<()> {
        let json = serde_json::to_value(PipelineState::Merged { depth: 2 })?;
        assert_eq!(json, serde_json::json!({"state": "merged", "depth": 2}));
        Ok(())
    }
}
