//! WebSocket Transport
//!
//! `Transport` over `tokio-tungstenite`. The stream is split after the
//! handshake: the writer sits behind an async mutex so frames are never
//! interleaved, and the reader is handed out once as a `FrameStream`.
//!
//! A transport is single-use. After `close()` it reports closed forever and
//! the state machine asks the factory for a fresh one.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::application::ports::{Frame, FrameStream, Transport, TransportFactory};
use crate::domain::connection::{ErrorKind, validate_url};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWriter = SplitSink<WsStream, Message>;
type WsReader = SplitStream<WsStream>;

/// Configuration for WebSocket transports.
#[derive(Debug, Clone, Copy)]
pub struct WebSocketConfig {
    /// Upper bound for the closing handshake.
    pub close_timeout: Duration,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            close_timeout: Duration::from_secs(2),
        }
    }
}

// =============================================================================
// Transport
// =============================================================================

/// One WebSocket connection.
pub struct WebSocketTransport {
    config: WebSocketConfig,
    writer: tokio::sync::Mutex<Option<WsWriter>>,
    reader: parking_lot::Mutex<Option<WsReader>>,
    opened: AtomicBool,
    closed: AtomicBool,
    cancel: CancellationToken,
}

impl std::fmt::Debug for WebSocketTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketTransport")
            .field("open", &self.is_open())
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl WebSocketTransport {
    /// Create an unopened transport.
    #[must_use]
    pub fn new(config: WebSocketConfig) -> Self {
        Self {
            config,
            writer: tokio::sync::Mutex::new(None),
            reader: parking_lot::Mutex::new(None),
            opened: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }
    }

    fn to_message(frame: Frame) -> Message {
        match String::from_utf8(frame) {
            Ok(text) => Message::Text(text.into()),
            Err(err) => Message::Binary(err.into_bytes().into()),
        }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self, url: &str) -> Result<(), ErrorKind> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ErrorKind::ConnectionFailed("transport closed".to_string()));
        }
        if self.opened.load(Ordering::SeqCst) {
            return Err(ErrorKind::ConnectionFailed("transport already open".to_string()));
        }
        validate_url(url)?;

        let connected = tokio::select! {
            () = self.cancel.cancelled() => {
                return Err(ErrorKind::ConnectionFailed("transport closed".to_string()));
            }
            result = tokio_tungstenite::connect_async(url) => result,
        };
        let (ws_stream, _response) =
            connected.map_err(|e| ErrorKind::ConnectionFailed(e.to_string()))?;

        let (write, read) = ws_stream.split();
        *self.writer.lock().await = Some(write);
        *self.reader.lock() = Some(read);
        self.opened.store(true, Ordering::SeqCst);

        if self.cancel.is_cancelled() {
            self.close().await;
            return Err(ErrorKind::ConnectionFailed("transport closed".to_string()));
        }

        tracing::debug!(url, "WebSocket handshake complete");
        Ok(())
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();
        self.opened.store(false, Ordering::SeqCst);
        self.reader.lock().take();

        let closing = async {
            if let Some(mut writer) = self.writer.lock().await.take() {
                if let Err(e) = writer.close().await {
                    tracing::debug!(error = %e, "WebSocket close handshake failed");
                }
            }
        };
        if tokio::time::timeout(self.config.close_timeout, closing)
            .await
            .is_err()
        {
            tracing::debug!("WebSocket close handshake timed out");
        }
    }

    async fn send_frame(&self, frame: Frame) -> Result<(), ErrorKind> {
        if !self.is_open() {
            return Err(ErrorKind::SendFailed("not connected".to_string()));
        }

        let mut writer = self.writer.lock().await;
        let Some(sink) = writer.as_mut() else {
            return Err(ErrorKind::SendFailed("not connected".to_string()));
        };
        sink.send(Self::to_message(frame))
            .await
            .map_err(|e| ErrorKind::SendFailed(e.to_string()))
    }

    fn receive_frames(&self) -> FrameStream {
        let Some(reader) = self.reader.lock().take() else {
            return stream::empty().boxed();
        };

        stream::unfold(
            Some((reader, self.cancel.clone())),
            |state| async move {
                let (mut reader, cancel) = state?;
                loop {
                    let next = tokio::select! {
                        biased;
                        () = cancel.cancelled() => return None,
                        next = reader.next() => next,
                    };

                    let item = match next {
                        Some(Ok(Message::Text(text))) => Ok(text.as_str().as_bytes().to_vec()),
                        Some(Ok(Message::Binary(data))) => Ok(data.to_vec()),
                        Some(Ok(Message::Close(frame))) => {
                            let reason = frame.map(|f| f.reason.to_string()).unwrap_or_default();
                            return Some((
                                Err(ErrorKind::ReceiveFailed(format!("closed by remote: {reason}"))),
                                None,
                            ));
                        }
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => {
                            return Some((Err(ErrorKind::ReceiveFailed(e.to_string())), None));
                        }
                        None => {
                            return Some((
                                Err(ErrorKind::ReceiveFailed("connection dropped".to_string())),
                                None,
                            ));
                        }
                    };
                    return Some((item, Some((reader, cancel))));
                }
            },
        )
        .boxed()
    }

    fn is_open(&self) -> bool {
        self.opened.load(Ordering::SeqCst) && !self.closed.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Factory
// =============================================================================

/// Creates a fresh `WebSocketTransport` per connection attempt.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketTransportFactory {
    config: WebSocketConfig,
}

impl WebSocketTransportFactory {
    /// Create a factory.
    #[must_use]
    pub const fn new(config: WebSocketConfig) -> Self {
        Self { config }
    }
}

impl TransportFactory for WebSocketTransportFactory {
    fn create(&self) -> Arc<dyn Transport> {
        Arc::new(WebSocketTransport::new(self.config))
    }
}
