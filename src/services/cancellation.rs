//! Per-request cancellation.
//!
//! A `CancellationBridge` owns the request's token and cancels it when it
//! is dropped. Handlers move the bridge into the response body, so hyper
//! dropping the body on a client disconnect (or dropping the handler future
//! before a response exists) cancels every remote call tied to the request.

use crate::services::object_store::{ByteStream, cancellable};
use std::{
    sync::{Arc, OnceLock},
    time::Duration,
};
use tokio_util::sync::{CancellationToken, DropGuard};

/// What set the token first.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CancelReason {
    Disconnected,
    TimedOut(Duration),
    Requested,
}

pub struct CancellationBridge {
    token: CancellationToken,
    reason: Arc<OnceLock<CancelReason>>,
    _on_drop: DropGuard,
}

impl CancellationBridge {
    pub fn new() -> Self {
        let token = CancellationToken::new();
        Self {
            _on_drop: token.clone().drop_guard(),
            token,
            reason: Arc::new(OnceLock::new()),
        }
    }

    /// Token to hand to object store calls.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel explicitly. Safe to call any number of times.
    pub fn cancel(&self) {
        let _ = self.reason.set(CancelReason::Requested);
        self.token.cancel();
    }

    /// The first trigger, or `Disconnected` when the bridge was dropped.
    pub fn reason(&self) -> Option<CancelReason> {
        if !self.token.is_cancelled() {
            return None;
        }
        Some(
            self.reason
                .get()
                .copied()
                .unwrap_or(CancelReason::Disconnected),
        )
    }

    /// Cancel automatically after `timeout` unless the request finishes
    /// (or is cancelled) first. Must be called inside a tokio runtime.
    pub fn arm_timeout(&self, timeout: Duration) {
        let token = self.token.clone();
        let reason = self.reason.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    let _ = reason.set(CancelReason::TimedOut(timeout));
                    tracing::debug!("request timed out after {:?}", timeout);
                    token.cancel();
                }
            }
        });
    }

    /// Tie `stream` to this request: it ends as soon as the token fires,
    /// and dropping it (the client went away) cancels the token.
    pub fn bind(self, stream: ByteStream) -> ByteStream {
        let token = self.token.clone();
        let inner = cancellable(stream, token);
        Box::pin(futures::stream::unfold(
            (inner, self),
            |(mut inner, bridge)| async move {
                use futures::StreamExt;
                let item = inner.next().await?;
                Some((item, (inner, bridge)))
            },
        ))
    }
}

impl Default for CancellationBridge {
    fn default() -> Self {
        Self::new()
    }
}
