use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use futures_util::StreamExt;
use image::DynamicImage;
use mjpeg_common::config::StreamConfig;
use mjpeg_common::multipart::{generate_boundary, PartWriter};
use mjpeg_common::Frame;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::StreamError;
use crate::session::{ActiveGuard, Connection, Session};
use crate::store::FrameStore;

/// Chunks a session may queue ahead of a slow client.
const SESSION_BUFFER: usize = 1;

/// Knobs fixed at construction.
#[derive(Debug, Clone)]
pub struct StreamOptions {
    /// Minimum time between two parts sent to the same client.
    pub frame_interval: Duration,
    /// JPEG quality, 1..=100.
    pub quality: u8,
    /// Stream-wide shutdown. Every session closes once it fires.
    pub shutdown: CancellationToken,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            frame_interval: Duration::from_secs(1) / 20,
            quality: 75,
            shutdown: CancellationToken::new(),
        }
    }
}

impl StreamOptions {
    pub fn from_config(config: &StreamConfig, shutdown: CancellationToken) -> Self {
        Self {
            frame_interval: config.frame_interval(),
            quality: config.quality,
            shutdown,
        }
    }
}

/// One live image shared by every connected client.
///
/// Thread-safe: any thread may call [`update`](Self::update) while any number
/// of sessions are streaming, and each session picks up the newest frame on
/// its next tick.
pub struct Stream {
    opts: StreamOptions,
    store: Arc<FrameStore>,
    next_session_id: AtomicU64,
    active: Arc<AtomicUsize>,
}

impl Default for Stream {
    fn default() -> Self {
        Self::new()
    }
}

impl Stream {
    /// 20 frames per second, quality 75, never shut down.
    pub fn new() -> Self {
        Self::with_options(StreamOptions::default())
    }

    pub fn with_options(opts: StreamOptions) -> Self {
        Self {
            store: Arc::new(FrameStore::new(opts.quality)),
            opts,
            next_session_id: AtomicU64::new(1),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn options(&self) -> &StreamOptions {
        &self.opts
    }

    /// Encode `image` as JPEG and publish it to every session.
    ///
    /// The image is not retained. Connected clients keep getting the previous
    /// frame if this fails.
    pub fn update(&self, image: &DynamicImage) -> Result<Frame, StreamError> {
        Ok(self.store.update(image)?)
    }

    /// The frame sessions are currently sending, if any was published.
    pub fn latest(&self) -> Option<Frame> {
        self.store.read()
    }

    pub fn active_sessions(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    /// Fire the shutdown token, closing every session.
    pub fn shutdown(&self) {
        self.opts.shutdown.cancel();
    }

    /// Open a session with a freshly generated boundary.
    ///
    /// Must be called from within a Tokio runtime; the session loop runs as
    /// its own task.
    pub fn connect(&self) -> Result<Connection, StreamError> {
        self.connect_with_boundary(generate_boundary())
    }

    pub fn connect_with_boundary(&self, boundary: String) -> Result<Connection, StreamError> {
        let writer = PartWriter::new(boundary.clone())?;
        let id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        let cancel = self.opts.shutdown.child_token();
        let (tx, rx) = mpsc::channel(SESSION_BUFFER);

        let session = Session {
            id,
            writer,
            interval: self.opts.frame_interval,
            shutdown: self.opts.shutdown.clone(),
            cancel: cancel.clone(),
        };
        let store = Arc::clone(&self.store);
        let active = ActiveGuard::new(Arc::clone(&self.active));

        debug!(session = id, boundary, "session opened");
        tokio::spawn(async move {
            let _active = active;
            let end = session.run(store, tx).await;
            debug!(session = id, ?end, "session closed");
        });

        Ok(Connection::new(boundary, rx, cancel))
    }

    /// Answer one HTTP request with an endless multipart body.
    pub fn handle(&self) -> Response {
        match self.negotiate() {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "failed to open stream session");
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
            }
        }
    }

    fn negotiate(&self) -> Result<Response, StreamError> {
        let connection = self.connect()?;
        let content_type = HeaderValue::from_str(&connection.content_type())
            .map_err(|e| StreamError::Negotiate(e.to_string()))?;
        let body = Body::from_stream(connection.map(Ok::<_, Infallible>));

        Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, content_type)
            .body(body)
            .map_err(|e| StreamError::Negotiate(e.to_string()))
    }

    /// Router serving the stream on every path and method.
    pub fn router(self: Arc<Self>) -> Router {
        Router::new().fallback(serve_stream).with_state(self)
    }
}

async fn serve_stream(State(stream): State<Arc<Stream>>) -> Response {
    stream.handle()
}
