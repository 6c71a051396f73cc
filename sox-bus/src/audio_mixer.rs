use std::{
    io,
    pin::Pin,
    task::{Context, Poll},
};

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::{
    io::ReaderStream,
    sync::{CancellationToken, DropGuard},
};

use crate::{
    stream::{ByteSource, READ_CHUNK},
    tool::{AudioTool, MixSpec},
};

/// A spawned two-input overlay: the primary stream goes in through
/// [`Mixer::merge`], the merged audio comes out as a [`ByteSource`].
pub struct Mixer {
    spec: MixSpec,
    stdin: Box<dyn AsyncWrite + Send + Unpin>,
    stdout: Box<dyn AsyncRead + Send + Unpin>,
    cancel: CancellationToken,
}

impl Mixer {
    /// Starts the external mixer. Nothing is read from the primary stream
    /// yet, so a failure here leaves the caller's source untouched.
    pub fn spawn(tool: &dyn AudioTool, spec: MixSpec) -> anyhow::Result<Self> {
        let process = tool.spawn_mixer(&spec)?;
        let cancel = CancellationToken::new();

        let exit = process.exit;
        let exit_cancel = cancel.clone();
        let effect = spec.effect.display().to_string();
        tokio::spawn(async move {
            tokio::select! {
                result = exit => match result {
                    Ok(()) => log::debug!("mixer for {} finished", effect),
                    Err(e) => log::error!("mixer for {} failed: {:#}", effect, e),
                },
                // dropping `exit` kills the process
                _ = exit_cancel.cancelled() => log::debug!("mixer for {} released", effect),
            }
        });

        Ok(Self {
            spec,
            stdin: process.stdin,
            stdout: process.stdout,
            cancel,
        })
    }

    pub fn spec(&self) -> &MixSpec {
        &self.spec
    }

    /// Feeds `primary` into the mixer and returns its merged output. The
    /// process is released when the returned source is dropped.
    pub fn merge(self, primary: ByteSource) -> ByteSource {
        let Self {
            spec,
            stdin,
            stdout,
            cancel,
        } = self;

        tokio::spawn(feed(primary, stdin, cancel.clone()));

        Box::pin(MixedOutput {
            inner: ReaderStream::with_capacity(stdout, READ_CHUNK),
            effect: spec.effect.display().to_string(),
            _guard: cancel.drop_guard(),
        })
    }
}

async fn feed(
    mut primary: ByteSource,
    mut stdin: Box<dyn AsyncWrite + Send + Unpin>,
    cancel: CancellationToken,
) {
    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => break,
            chunk = primary.next() => chunk,
        };
        match chunk {
            Some(Ok(chunk)) => {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    written = stdin.write_all(&chunk) => if let Err(e) = written {
                        log::error!("error on sending stream to mixer: {}", e);
                        break;
                    },
                }
            }
            Some(Err(e)) => {
                log::error!("error reading primary stream for mixer: {}", e);
                break;
            }
            None => break,
        }
    }
    let _ = stdin.shutdown().await;
}

struct MixedOutput {
    inner: ReaderStream<Box<dyn AsyncRead + Send + Unpin>>,
    effect: String,
    _guard: DropGuard,
}

impl Stream for MixedOutput {
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let polled = this.inner.poll_next_unpin(cx);
        if let Poll::Ready(Some(Err(e))) = &polled {
            log::error!("error on receiving stream from mixer {}: {}", this.effect, e);
        }
        polled
    }
}
