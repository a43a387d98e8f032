//! Live MJPEG distribution of a single, continuously replaced still image.
//!
//! A producer calls [`Stream::update`] whenever a new picture is ready. Every
//! HTTP client served by [`Stream::router`] gets its own session that pushes
//! the most recent JPEG as one `multipart/x-mixed-replace` part per frame
//! interval, until the client goes away or the shutdown token fires.

pub mod encode;
pub mod error;
pub mod server;
pub mod session;
pub mod store;

pub use error::{EncodeError, StreamError};
pub use mjpeg_common::Frame;
pub use server::{Stream, StreamOptions};
pub use session::{Connection, SessionEnd};
pub use store::FrameStore;
