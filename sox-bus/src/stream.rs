use std::{io, path::Path, pin::Pin};

use anyhow::Context as _;
use bytes::Bytes;
use futures::{Stream, StreamExt, stream};
use tokio::io::AsyncRead;
use tokio_util::io::ReaderStream;

/// Read size used for file and process sources.
pub const READ_CHUNK: usize = 16 * 1024;

/// An owned, pull-based source of encoded audio bytes.
pub type ByteSource = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

pub async fn open_file(path: &Path) -> anyhow::Result<ByteSource> {
    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("open source {}", path.display()))?;
    Ok(from_reader(file))
}

pub fn from_reader<R>(reader: R) -> ByteSource
where
    R: AsyncRead + Send + 'static,
{
    Box::pin(ReaderStream::with_capacity(reader, READ_CHUNK))
}

/// Puts `head` back in front of `rest`. Empty heads are skipped.
pub fn prepend(head: Bytes, rest: ByteSource) -> ByteSource {
    if head.is_empty() {
        return rest;
    }
    Box::pin(stream::once(async move { Ok::<_, io::Error>(head) }).chain(rest))
}

#[cfg(test)]
pub(crate) fn from_chunks<I>(chunks: I) -> ByteSource
where
    I: IntoIterator<Item = Bytes>,
    I::IntoIter: Send + 'static,
{
    Box::pin(stream::iter(chunks.into_iter().map(Ok::<_, io::Error>)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    #[tokio::test]
    async fn test_prepend_keeps_order() -> anyhow::Result<()> {
        let rest = from_chunks([Bytes::from_static(b"cd"), Bytes::from_static(b"ef")]);
        let all: Vec<Bytes> = prepend(Bytes::from_static(b"ab"), rest).try_collect().await?;
        assert_eq!(all.concat(), b"abcdef");
        Ok(())
    }

    #[tokio::test]
    async fn test_prepend_empty_head() -> anyhow::Result<()> {
        let rest = from_chunks([Bytes::from_static(b"x")]);
        let all: Vec<Bytes> = prepend(Bytes::new(), rest).try_collect().await?;
        assert_eq!(all.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_open_missing_file() {
        let err = match open_file(Path::new("/definitely/not/here.mp3")).await {
            Ok(_) => panic!("expected open to fail"),
            Err(e) => e,
        };
        let io_err = err.downcast_ref::<io::Error>().expect("io error in chain");
        assert_eq!(io_err.kind(), io::ErrorKind::NotFound);
    }
}
