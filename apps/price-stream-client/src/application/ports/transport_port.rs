//! Transport Port (Driven Port)
//!
//! Raw frame I/O over a single bidirectional connection. No retry logic and
//! no business decoding live behind this interface.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::domain::connection::ErrorKind;

/// One discrete message unit exchanged over the connection.
pub type Frame = Vec<u8>;

/// Lazy sequence of inbound frames.
///
/// Ends cleanly after a local `close()`; yields a final
/// `Err(ErrorKind::ReceiveFailed)` when the remote end errors or drops.
pub type FrameStream = BoxStream<'static, Result<Frame, ErrorKind>>;

/// A single-use bidirectional connection.
///
/// A closed transport cannot be reopened; ask the factory for a new one.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Validate the URL and complete the opening handshake.
    ///
    /// Fails with `InvalidUrl` before any I/O when the scheme is not
    /// `ws`/`wss`. Does not enforce a timeout; callers race it.
    async fn open(&self, url: &str) -> Result<(), ErrorKind>;

    /// Release the connection. Idempotent and infallible.
    async fn close(&self);

    /// Write one whole frame.
    ///
    /// Fails with `SendFailed` when the transport is not open.
    async fn send_frame(&self, frame: Frame) -> Result<(), ErrorKind>;

    /// Take the inbound frame sequence.
    fn receive_frames(&self) -> FrameStream;

    /// Check if the transport is open and writable.
    fn is_open(&self) -> bool;
}

/// Produces fresh transport instances, one per connection attempt.
pub trait TransportFactory: Send + Sync {
    /// Create an unopened transport.
    fn create(&self) -> Arc<dyn Transport>;
}
