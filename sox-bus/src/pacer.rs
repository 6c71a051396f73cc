use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use tokio::{
    sync::{mpsc, oneshot},
    time::Instant,
};
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

use crate::{
    error::BusError,
    sink::SinkWriter,
    stream::{self, ByteSource},
};

/// Release granularity: one slice of `bytes_per_sec / 10` bytes per tick.
pub const PACE_TICK: Duration = Duration::from_millis(100);

enum PacerCommand {
    Attach {
        source: ByteSource,
        result: oneshot::Sender<Result<(), BusError>>,
    },
    Detach {
        result: oneshot::Sender<Option<ByteSource>>,
    },
    Pause,
    Resume,
}

/// Releases bytes from an attached source to a [`SinkWriter`] at a fixed
/// byte rate. Never reads more than one slice ahead of the schedule.
pub struct Pacer {
    bytes_per_sec: u64,
    cancel: CancellationToken,
    done: CancellationToken,
    tx: mpsc::Sender<PacerCommand>,
}

impl Pacer {
    pub fn new(bytes_per_sec: u64, out: SinkWriter) -> Self {
        Self::spawn(bytes_per_sec, out, false)
    }

    /// Same as [`Pacer::new`] but releases nothing until [`Pacer::resume`].
    pub fn new_paused(bytes_per_sec: u64, out: SinkWriter) -> Self {
        Self::spawn(bytes_per_sec, out, true)
    }

    fn spawn(bytes_per_sec: u64, out: SinkWriter, paused: bool) -> Self {
        let bytes_per_sec = bytes_per_sec.max(1);
        let cancel = CancellationToken::new();
        let done = CancellationToken::new();
        let (tx, rx) = mpsc::channel(16);

        let state = PacerState {
            source: None,
            pending: Bytes::new(),
            paused,
            clock: PaceClock::new(bytes_per_sec),
        };
        let cancel_clone = cancel.clone();
        let done_clone = done.clone();
        tokio::spawn(async move {
            Self::inner_loop(state, cancel_clone, rx, out).await;
            done_clone.cancel();
        });

        Self {
            bytes_per_sec,
            cancel,
            done,
            tx,
        }
    }

    async fn inner_loop(
        mut state: PacerState,
        cancel: CancellationToken,
        mut rx: mpsc::Receiver<PacerCommand>,
        out: SinkWriter,
    ) {
        loop {
            let active = state.source.is_some() && !state.paused;
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                Some(cmd) = rx.recv() => state.handle(cmd),
                step = state.next_slice(), if active => match step {
                    Step::Slice(slice) => {
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            sent = out.send(slice) => if sent.is_err() {
                                log::debug!("pacer output closed");
                                break;
                            },
                        }
                    }
                    Step::End => {
                        log::info!("pacer source ended after {} bytes", state.clock.released);
                        break;
                    }
                    Step::Failed(e) => {
                        log::error!("pacer source failed: {}", e);
                        break;
                    }
                },
            }
        }
        // dropping `out` here is the end-of-stream signal for the sink
    }

    pub fn bytes_per_sec(&self) -> u64 {
        self.bytes_per_sec
    }

    /// Bytes released per tick.
    pub fn slice_len(&self) -> usize {
        slice_len(self.bytes_per_sec)
    }

    pub async fn attach(&self, source: ByteSource) -> anyhow::Result<()> {
        let (result, rx) = oneshot::channel();
        self.tx
            .send(PacerCommand::Attach { source, result })
            .await
            .map_err(|_| BusError::Closed)?;
        rx.await.map_err(|_| BusError::Closed)??;
        Ok(())
    }

    /// Pauses the pacer and hands back its source, with any bytes read but
    /// not yet released put back in front. `None` when nothing is attached
    /// or the pacer has already finished.
    pub async fn detach(&self) -> Option<ByteSource> {
        let (result, rx) = oneshot::channel();
        self.tx.send(PacerCommand::Detach { result }).await.ok()?;
        rx.await.ok().flatten()
    }

    pub async fn pause(&self) {
        let _ = self.tx.send(PacerCommand::Pause).await;
    }

    pub async fn resume(&self) {
        let _ = self.tx.send(PacerCommand::Resume).await;
    }

    /// Ends output. Idempotent, safe after the pacer has finished on its own.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.done.is_cancelled()
    }

    /// Resolves once the pacer task has exited and dropped its output.
    pub async fn finished(&self) {
        self.done.cancelled().await
    }

    /// Like [`Pacer::finished`], but usable after the pacer is dropped.
    pub fn stopped(&self) -> WaitForCancellationFutureOwned {
        self.done.clone().cancelled_owned()
    }
}

impl Drop for Pacer {
    fn drop(&mut self) {
        self.stop();
    }
}

enum Step {
    Slice(Bytes),
    End,
    Failed(std::io::Error),
}

struct PacerState {
    source: Option<ByteSource>,
    /// read from the source, not yet released
    pending: Bytes,
    paused: bool,
    clock: PaceClock,
}

impl PacerState {
    fn handle(&mut self, cmd: PacerCommand) {
        match cmd {
            PacerCommand::Attach { source, result } => {
                if self.source.is_some() {
                    let _ = result.send(Err(BusError::AlreadyAttached));
                    return;
                }
                self.source = Some(source);
                self.pending = Bytes::new();
                self.clock.reset();
                let _ = result.send(Ok(()));
            }
            PacerCommand::Detach { result } => {
                self.paused = true;
                let detached = self
                    .source
                    .take()
                    .map(|source| stream::prepend(std::mem::take(&mut self.pending), source));
                let _ = result.send(detached);
            }
            PacerCommand::Pause => self.paused = true,
            PacerCommand::Resume => {
                if self.paused {
                    self.paused = false;
                    self.clock.reset();
                }
            }
        }
    }

    /// Waits for the next slice to be due. Every await point leaves the
    /// state intact, so the select loop may drop this future at any time.
    async fn next_slice(&mut self) -> Step {
        while self.pending.is_empty() {
            let Some(source) = self.source.as_mut() else {
                return Step::End;
            };
            match source.next().await {
                Some(Ok(chunk)) => self.pending = chunk,
                Some(Err(e)) => return Step::Failed(e),
                None => return Step::End,
            }
        }

        tokio::time::sleep_until(self.clock.next_release()).await;

        let n = self.pending.len().min(self.clock.slice_len());
        let slice = self.pending.split_to(n);
        self.clock.released += n as u64;
        Step::Slice(slice)
    }
}

fn slice_len(bytes_per_sec: u64) -> usize {
    let per_tick = bytes_per_sec as u128 * PACE_TICK.as_millis() / 1000;
    (per_tick as usize).max(1)
}

/// Schedule of a run: the slice after `released` bytes is due at
/// `start + released / rate`, so timer jitter does not accumulate.
struct PaceClock {
    bytes_per_sec: u64,
    start: Instant,
    released: u64,
}

impl PaceClock {
    fn new(bytes_per_sec: u64) -> Self {
        Self {
            bytes_per_sec,
            start: Instant::now(),
            released: 0,
        }
    }

    fn reset(&mut self) {
        self.start = Instant::now();
        self.released = 0;
    }

    fn slice_len(&self) -> usize {
        slice_len(self.bytes_per_sec)
    }

    fn next_release(&self) -> Instant {
        self.start + Duration::from_secs_f64(self.released as f64 / self.bytes_per_sec as f64)
    }
}

#[cfg(test)]
#[path = "pacer_test.rs"]
mod pacer_test;
