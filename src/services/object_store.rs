//! The storage collaborator consumed by every controller.
//!
//! Controllers hold an `Arc<dyn ObjectStore>`; backends are independent
//! types implementing the trait rather than layers of one client type.

use crate::models::{
    key::ObjectKey,
    object::{ObjectMetadata, PutOptions, PutOutcome},
    range::ByteRange,
};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use std::{io, pin::Pin};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Stream of object bytes.
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object `{0}` not found")]
    NotFound(String),
    #[error("invalid object key `{0}`")]
    InvalidKey(String),
    #[error("operation cancelled")]
    Cancelled,
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch metadata without content.
    async fn stat(&self, key: &ObjectKey) -> StoreResult<ObjectMetadata>;

    /// Open the object (or `range` of it) as a byte stream.
    ///
    /// The stream must stop with an `Interrupted` error once `cancel` fires.
    async fn get(
        &self,
        key: &ObjectKey,
        range: Option<ByteRange>,
        cancel: &CancellationToken,
    ) -> StoreResult<ByteStream>;

    /// Store `body` under `key`. Nothing is stored when the body stream
    /// yields an error or `cancel` fires.
    async fn put(
        &self,
        key: &ObjectKey,
        body: ByteStream,
        options: PutOptions,
        cancel: &CancellationToken,
    ) -> StoreResult<PutOutcome>;

    async fn exists(&self, key: &ObjectKey) -> StoreResult<bool>;

    /// Readiness probe; backends check their dependencies here.
    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }
}

/// Error yielded by streams aborted through their cancellation token.
pub fn cancelled_io_error() -> io::Error {
    io::Error::new(io::ErrorKind::Interrupted, "request cancelled")
}

/// Wrap `stream` so it ends with an `Interrupted` error as soon as `token`
/// is cancelled, even while the inner stream is waiting for data.
pub fn cancellable(stream: ByteStream, token: CancellationToken) -> ByteStream {
    Box::pin(futures::stream::unfold(
        (stream, token, false),
        |(mut stream, token, done)| async move {
            if done {
                return None;
            }
            tokio::select! {
                biased;
                _ = token.cancelled() => Some((Err(cancelled_io_error()), (stream, token, true))),
                item = stream.next() => item.map(|chunk| (chunk, (stream, token, false))),
            }
        },
    ))
}

/// Read a whole stream into memory.
pub async fn drain(mut stream: ByteStream) -> io::Result<Bytes> {
    let mut buffer = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        buffer.extend_from_slice(&chunk?);
    }
    Ok(buffer.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn cancellable_interrupts_a_pending_stream() {
        let token = CancellationToken::new();
        let pending: ByteStream = Box::pin(futures::stream::pending::<io::Result<Bytes>>());
        let mut stream = cancellable(pending, token.clone());

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let item = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .expect("stream should be interrupted")
            .expect("an error item");
        assert_eq!(item.unwrap_err().kind(), io::ErrorKind::Interrupted);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn drain_concatenates_chunks() {
        let chunks: Vec<io::Result<Bytes>> =
            vec![Ok(Bytes::from_static(b"ab")), Ok(Bytes::from_static(b"cd"))];
        let stream: ByteStream = Box::pin(futures::stream::iter(chunks));
        assert_eq!(drain(stream).await.unwrap(), Bytes::from_static(b"abcd"));
    }
}
