use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures_util::Stream as FuturesStream;
use mjpeg_common::multipart::{self, PartWriter};
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, trace};

use crate::store::FrameStore;

/// Upper bound on how long a closing session waits to queue its final delimiter.
const CLOSE_GRACE: Duration = Duration::from_millis(250);

/// Why a session loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The stream-wide shutdown token fired.
    Shutdown,
    /// This connection's own token fired.
    Cancelled,
    /// The receiving side went away, or a write to it failed.
    Disconnected,
}

/// Private state of one connected client.
pub(crate) struct Session {
    pub(crate) id: u64,
    pub(crate) writer: PartWriter,
    pub(crate) interval: Duration,
    pub(crate) shutdown: CancellationToken,
    pub(crate) cancel: CancellationToken,
}

impl Session {
    /// Push the current frame every `interval` until cancelled or disconnected.
    pub(crate) async fn run(mut self, store: Arc<FrameStore>, tx: mpsc::Sender<Bytes>) -> SessionEnd {
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return self.close(&tx).await,
                _ = tx.closed() => return SessionEnd::Disconnected,
                _ = tokio::time::sleep(self.interval) => {}
            }

            let Some(frame) = store.read() else {
                trace!(session = self.id, "no frame published yet");
                continue;
            };
            let part = self.writer.jpeg_part(frame.jpeg_data());

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return self.close(&tx).await,
                sent = tx.send(part) => {
                    if sent.is_err() {
                        return SessionEnd::Disconnected;
                    }
                }
            }
            trace!(session = self.id, seq = frame.seq, bytes = frame.len(), "sent frame");
        }
    }

    /// Queue the terminating delimiter, best effort.
    async fn close(&mut self, tx: &mpsc::Sender<Bytes>) -> SessionEnd {
        if tx.is_closed() {
            return SessionEnd::Disconnected;
        }
        let end = if self.shutdown.is_cancelled() {
            SessionEnd::Shutdown
        } else {
            SessionEnd::Cancelled
        };
        let grace = self.interval.min(CLOSE_GRACE);
        if tokio::time::timeout(grace, tx.send(self.writer.close())).await.is_err() {
            debug!(session = self.id, "client not draining, dropped closing delimiter");
        }
        end
    }
}

/// Counts a session as active for as long as it is alive.
pub(crate) struct ActiveGuard(Arc<AtomicUsize>);

impl ActiveGuard {
    pub(crate) fn new(active: Arc<AtomicUsize>) -> Self {
        active.fetch_add(1, Ordering::Relaxed);
        Self(active)
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Receiving end of one session: the multipart body, chunk by chunk.
///
/// Dropping it cancels the session. Yields `None` once the session ended,
/// after the closing delimiter when the session was cancelled.
pub struct Connection {
    boundary: String,
    chunks: mpsc::Receiver<Bytes>,
    cancel: CancellationToken,
    _drop_guard: DropGuard,
}

impl Connection {
    pub(crate) fn new(
        boundary: String,
        chunks: mpsc::Receiver<Bytes>,
        cancel: CancellationToken,
    ) -> Self {
        let drop_guard = cancel.clone().drop_guard();
        Self {
            boundary,
            chunks,
            cancel,
            _drop_guard: drop_guard,
        }
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Value for the response `Content-Type` header.
    pub fn content_type(&self) -> String {
        multipart::content_type(&self.boundary)
    }

    /// End this session only; other connections are unaffected.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub async fn next_chunk(&mut self) -> Option<Bytes> {
        self.chunks.recv().await
    }
}

impl FuturesStream for Connection {
    type Item = Bytes;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Bytes>> {
        self.get_mut().chunks.poll_recv(cx)
    }
}
