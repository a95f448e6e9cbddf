//! Response bodies for streamed deliveries.
//!
//! Once a handler returns its `Response` the status line and headers are
//! committed. From then on a failure can only end the body early, which
//! makes hyper close the connection; it is logged here instead of being
//! turned into an error response.

use crate::{
    models::range::ByteRange,
    services::{cancellation::CancellationBridge, object_store::ByteStream},
};
use axum::body::Body;
use futures::TryStreamExt;
use std::io;
use uuid::Uuid;

/// Who a streamed body belongs to, for log lines.
#[derive(Clone, Debug)]
pub struct DeliveryContext {
    pub request_id: Uuid,
    /// Object key, or the archive name for zip downloads.
    pub key: String,
    pub range: Option<ByteRange>,
}

impl DeliveryContext {
    pub fn new(key: impl Into<String>, range: Option<ByteRange>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            key: key.into(),
            range,
        }
    }
}

/// Body that streams `stream` under `bridge`: dropping the body cancels
/// the request, and a cancelled request ends the body.
pub fn streaming_body(
    bridge: CancellationBridge,
    stream: ByteStream,
    ctx: DeliveryContext,
) -> Body {
    let stream = bridge.bind(stream).inspect_err(move |err| {
        if err.kind() == io::ErrorKind::Interrupted {
            tracing::debug!(
                request_id = %ctx.request_id,
                key = %ctx.key,
                range = ?ctx.range,
                "delivery cancelled: {}",
                err
            );
        } else {
            tracing::error!(
                request_id = %ctx.request_id,
                key = %ctx.key,
                range = ?ctx.range,
                "delivery failed after headers were sent: {}",
                err
            );
        }
    });
    Body::from_stream(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http_body_util::BodyExt;

    #[tokio::test]
    async fn body_ends_with_error_when_cancelled() {
        let bridge = CancellationBridge::new();
        bridge.cancel();
        let pending: ByteStream = Box::pin(futures::stream::pending::<io::Result<Bytes>>());
        let body = streaming_body(
            bridge,
            pending,
            DeliveryContext::new("a.bin", None),
        );
        assert!(body.collect().await.is_err());
    }

    #[tokio::test]
    async fn body_carries_stream_bytes() {
        let chunks: Vec<io::Result<Bytes>> =
            vec![Ok(Bytes::from_static(b"he")), Ok(Bytes::from_static(b"llo"))];
        let body = streaming_body(
            CancellationBridge::new(),
            Box::pin(futures::stream::iter(chunks)),
            DeliveryContext::new("a.txt", None),
        );
        let bytes = body.collect().await.unwrap().to_bytes();
        assert_eq!(bytes, Bytes::from_static(b"hello"));
    }
}
