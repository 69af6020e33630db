//! Streaming Client
//!
//! Facade over the connection state machine, the price codec and the
//! subscriber registry. Callers connect, send validated updates and
//! subscribe to decoded inbound updates without touching frames.
//!
//! # Receive Pump
//!
//! One background task per client waits for `Connected`, drains the
//! connection's frames, decodes each one and fans it out. A frame that
//! fails to decode is skipped. A receive error is reported to the state
//! machine, which fails the connection and schedules a reconnect; the pump
//! then waits for the next `Connected` and resumes on the new transport.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use super::connection::{ConnectionConfig, ConnectionStateMachine};
use crate::application::ports::{PriceSink, Reachability, TransportFactory};
use crate::domain::connection::{ConnectionState, ErrorKind};
use crate::domain::price::{PriceBounds, PriceUpdate};
use crate::infrastructure::broadcast::{
    BroadcastConfig, BroadcastStats, PriceBroadcaster, SubscriberId,
};
use crate::infrastructure::metrics;
use crate::infrastructure::websocket::{CodecError, PriceCodec};

/// Lazy sequence of inbound price updates for one subscriber.
pub type PriceStream = ReceiverStream<PriceUpdate>;

/// Handle identifying one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(SubscriberId);

impl SubscriptionHandle {
    /// Underlying subscriber id.
    #[must_use]
    pub const fn id(&self) -> SubscriberId {
        self.0
    }
}

impl std::fmt::Display for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Configuration for the streaming client.
#[derive(Debug, Clone, Default)]
pub struct StreamingConfig {
    /// Connection timings and retry table.
    pub connection: ConnectionConfig,
    /// Subscriber channel sizing.
    pub broadcast: BroadcastConfig,
    /// Price bounds enforced on both directions.
    pub bounds: PriceBounds,
}

/// Resilient price stream client.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
///
/// use futures::StreamExt;
/// use price_stream_client::application::services::{StreamingClient, StreamingConfig};
/// use price_stream_client::infrastructure::websocket::{
///     ManualReachability, WebSocketTransportFactory,
/// };
///
/// async fn example() {
///     let client = StreamingClient::new(
///         StreamingConfig::default(),
///         Arc::new(WebSocketTransportFactory::default()),
///         Arc::new(ManualReachability::default()),
///     );
///
///     let (_handle, mut updates) = client.subscribe();
///     if client.connect().await.is_ok() {
///         while let Some(update) = updates.next().await {
///             println!("{} {}", update.symbol, update.price);
///         }
///     }
/// }
/// ```
#[derive(Debug)]
pub struct StreamingClient {
    machine: Arc<ConnectionStateMachine>,
    broadcaster: PriceBroadcaster,
    codec: PriceCodec,
    pump: Mutex<Option<CancellationToken>>,
}

impl StreamingClient {
    /// Create a disconnected client.
    #[must_use]
    pub fn new(
        config: StreamingConfig,
        factory: Arc<dyn TransportFactory>,
        reachability: Arc<dyn Reachability>,
    ) -> Arc<Self> {
        Arc::new(Self {
            machine: Arc::new(ConnectionStateMachine::new(
                config.connection,
                factory,
                reachability,
            )),
            broadcaster: PriceBroadcaster::new(config.broadcast),
            codec: PriceCodec::new(config.bounds),
            pump: Mutex::new(None),
        })
    }

    // =========================================================================
    // Connection
    // =========================================================================

    /// Connect and start receiving.
    ///
    /// # Errors
    ///
    /// Returns the `ErrorKind` the connection failed with. Retryable
    /// failures keep reconnecting in the background.
    pub async fn connect(self: &Arc<Self>) -> Result<(), ErrorKind> {
        self.ensure_pump();
        self.machine.connect().await
    }

    /// Stop receiving, close the connection and cancel reconnection.
    ///
    /// Subscriptions stay registered and resume on the next `connect()`.
    pub async fn disconnect(&self) {
        if let Some(pump) = self.pump.lock().take() {
            pump.cancel();
        }
        self.machine.disconnect().await;
    }

    /// Snapshot of the connection state.
    #[must_use]
    pub fn current_state(&self) -> ConnectionState {
        self.machine.state()
    }

    /// Receiver that observes every state transition.
    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.machine.subscribe_state()
    }

    /// Check if the client is connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.machine.is_connected()
    }

    /// Error from the most recent failure, if any.
    #[must_use]
    pub fn last_error(&self) -> Option<ErrorKind> {
        self.machine.last_error()
    }

    /// Total automatic reconnection attempts.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u64 {
        self.machine.reconnect_attempts()
    }

    // =========================================================================
    // Send
    // =========================================================================

    /// Validate, encode and write one update.
    ///
    /// Never reconnects implicitly.
    ///
    /// # Errors
    ///
    /// Returns `EncodingFailed` for invalid updates, `SendFailed` when not
    /// connected or the write fails.
    pub async fn send(&self, update: &PriceUpdate) -> Result<(), ErrorKind> {
        let frame = self
            .codec
            .encode(update)
            .map_err(CodecError::into_encoding)?;

        let result = if self.machine.is_connected() {
            self.machine.send_frame(frame).await
        } else {
            Err(ErrorKind::SendFailed("not connected".to_string()))
        };

        metrics::record_send(&result);
        if let Err(error) = &result {
            tracing::debug!(symbol = %update.symbol, error = %error, "Send failed");
        }
        result
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Register a subscriber for inbound updates. Never blocks.
    #[must_use]
    pub fn subscribe(&self) -> (SubscriptionHandle, PriceStream) {
        let (id, rx) = self.broadcaster.subscribe();
        (SubscriptionHandle(id), ReceiverStream::new(rx))
    }

    /// Cancel a subscription, ending its stream.
    ///
    /// Returns `false` if the handle was already cancelled.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        self.broadcaster.unsubscribe(handle.0)
    }

    /// Number of active subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.broadcaster.subscriber_count()
    }

    /// Fan-out statistics.
    #[must_use]
    pub fn broadcast_stats(&self) -> BroadcastStats {
        self.broadcaster.stats()
    }

    // =========================================================================
    // Receive Pump
    // =========================================================================

    fn ensure_pump(self: &Arc<Self>) {
        let mut pump = self.pump.lock();
        if pump.as_ref().is_some_and(|token| !token.is_cancelled()) {
            return;
        }

        let token = CancellationToken::new();
        *pump = Some(token.clone());
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.pump_loop(token).await;
        });
    }

    async fn pump_loop(self: Arc<Self>, cancel: CancellationToken) {
        let mut states = self.machine.subscribe_state();
        let mut drained_epoch = None;

        loop {
            let connected = tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                connected = async {
                    states.wait_for(ConnectionState::is_connected).await.is_ok()
                } => connected,
            };
            if !connected {
                return;
            }

            let Some((epoch, mut frames)) = self.machine.open_frames() else {
                continue;
            };
            if drained_epoch == Some(epoch) {
                // Already drained; wait for the next transition.
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return,
                    _ = states.changed() => continue,
                }
            }
            drained_epoch = Some(epoch);
            tracing::debug!(epoch, "Receiving price frames");

            loop {
                // Frames still queued at disconnect are dropped.
                let next = tokio::select! {
                    biased;
                    () = cancel.cancelled() => return,
                    next = frames.next() => next,
                };
                match next {
                    Some(Ok(frame)) => self.dispatch(&frame),
                    Some(Err(error)) => {
                        self.machine.connection_lost(epoch, error).await;
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    fn dispatch(&self, frame: &[u8]) {
        metrics::record_frame_received();
        match self.codec.decode(frame) {
            Ok(update) => {
                let report = self.broadcaster.publish(&update);
                tracing::trace!(
                    symbol = %update.symbol,
                    price = update.price,
                    delivered = report.delivered,
                    "Price update received"
                );
            }
            Err(e) => {
                metrics::record_decode_failure();
                tracing::warn!(error = %e, bytes = frame.len(), "Skipping undecodable frame");
            }
        }
    }
}

#[async_trait]
impl PriceSink for StreamingClient {
    fn is_connected(&self) -> bool {
        self.machine.is_connected()
    }

    async fn publish(&self, update: PriceUpdate) -> Result<(), ErrorKind> {
        self.send(&update).await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::super::retry_policy::RetryConfig;
    use super::super::test_support::{FakeTransportFactory, OpenBehavior};
    use super::*;
    use crate::infrastructure::websocket::ManualReachability;

    const FRAME: &str = r#"{"symbol":"AAPL","price":185.5,"timestamp":"2025-08-22T10:15:30.123Z"}"#;

    fn client(factory: &Arc<FakeTransportFactory>) -> Arc<StreamingClient> {
        let config = StreamingConfig {
            connection: ConnectionConfig {
                url: "ws://127.0.0.1:9/feed".to_string(),
                connect_timeout: Duration::from_millis(200),
                reconnect_delay: Duration::from_millis(20),
                retry: RetryConfig::new(3, vec![Duration::from_millis(10)]),
            },
            ..StreamingConfig::default()
        };
        StreamingClient::new(
            config,
            Arc::clone(factory) as Arc<dyn TransportFactory>,
            Arc::new(ManualReachability::new(true)),
        )
    }

    async fn next(stream: &mut PriceStream) -> Option<PriceUpdate> {
        tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .ok()
            .flatten()
    }

    #[tokio::test]
    async fn each_subscriber_gets_exactly_one_copy() {
        let factory = Arc::new(FakeTransportFactory::new(OpenBehavior::Succeed));
        let client = client(&factory);
        let mut streams: Vec<_> = (0..3).map(|_| client.subscribe().1).collect();

        client.connect().await.unwrap();
        factory.last().unwrap().push_frame(FRAME);

        for stream in &mut streams {
            let update = next(stream).await.unwrap();
            assert_eq!(update.symbol, "AAPL");
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        for stream in &mut streams {
            assert!(
                tokio::time::timeout(Duration::from_millis(20), stream.next())
                    .await
                    .is_err()
            );
        }
        assert_eq!(client.broadcast_stats().delivered, 3);
    }

    #[tokio::test]
    async fn undecodable_frames_are_skipped() {
        let factory = Arc::new(FakeTransportFactory::new(OpenBehavior::Succeed));
        let client = client(&factory);
        let (_handle, mut stream) = client.subscribe();

        client.connect().await.unwrap();
        let transport = factory.last().unwrap();
        transport.push_frame("garbage");
        transport.push_frame(r#"{"symbol":"AAPL","price":-1,"timestamp":"2025-08-22T10:15:30Z"}"#);
        transport.push_frame(FRAME);

        let update = next(&mut stream).await.unwrap();
        assert!((update.price - 185.5).abs() < f64::EPSILON);
        assert!(client.is_connected());
    }

    #[tokio::test]
    async fn updates_arrive_in_wire_order() {
        let factory = Arc::new(FakeTransportFactory::new(OpenBehavior::Succeed));
        let client = client(&factory);
        let (_handle, mut stream) = client.subscribe();

        client.connect().await.unwrap();
        let transport = factory.last().unwrap();
        for price in [1.0, 2.0, 3.0] {
            let update = PriceUpdate::new("KO", price, "2025-08-22T10:15:30Z");
            transport.push_frame(serde_json::to_vec(&update).unwrap());
        }

        let mut prices = Vec::new();
        for _ in 0..3 {
            prices.push(next(&mut stream).await.unwrap().price);
        }
        assert_eq!(prices, vec![1.0, 2.0, 3.0]);
    }

    #[tokio::test]
    async fn frames_queued_at_disconnect_are_not_dispatched() {
        let factory = Arc::new(FakeTransportFactory::new(OpenBehavior::Succeed));
        let client = client(&factory);
        let (_handle, mut stream) = client.subscribe();

        client.connect().await.unwrap();
        let transport = factory.last().unwrap();
        for _ in 0..5 {
            transport.push_frame(FRAME);
        }
        client.disconnect().await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(
            tokio::time::timeout(Duration::from_millis(20), stream.next())
                .await
                .is_err()
        );
        assert_eq!(client.broadcast_stats().delivered, 0);
        assert_eq!(client.current_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn send_requires_connection() {
        let factory = Arc::new(FakeTransportFactory::new(OpenBehavior::Succeed));
        let client = client(&factory);
        let update = PriceUpdate::now("AAPL", 185.5);

        assert_eq!(
            client.send(&update).await,
            Err(ErrorKind::SendFailed("not connected".to_string()))
        );
        // No implicit reconnect.
        assert_eq!(factory.created(), 0);

        client.connect().await.unwrap();
        client.send(&update).await.unwrap();

        let sent = factory.last().unwrap().sent();
        assert_eq!(sent.len(), 1);
        let decoded: PriceUpdate = serde_json::from_slice(&sent[0]).unwrap();
        assert_eq!(decoded, update);
    }

    #[tokio::test]
    async fn invalid_update_is_encoding_failure() {
        let factory = Arc::new(FakeTransportFactory::new(OpenBehavior::Succeed));
        let client = client(&factory);
        client.connect().await.unwrap();

        let result = client.send(&PriceUpdate::now("AAPL", f64::INFINITY)).await;
        assert!(matches!(result, Err(ErrorKind::EncodingFailed(_))));
        assert!(factory.last().unwrap().sent().is_empty());
    }

    #[tokio::test]
    async fn unsubscribe_ends_stream() {
        let factory = Arc::new(FakeTransportFactory::new(OpenBehavior::Succeed));
        let client = client(&factory);
        let (handle, mut stream) = client.subscribe();
        let (_other, _other_stream) = client.subscribe();

        assert!(client.unsubscribe(handle));
        assert!(!client.unsubscribe(handle));
        assert_eq!(client.subscriber_count(), 1);
        assert!(next(&mut stream).await.is_none());
    }

    #[tokio::test]
    async fn resumes_after_remote_failure() {
        let factory = Arc::new(FakeTransportFactory::new(OpenBehavior::Succeed));
        let client = client(&factory);
        let (_handle, mut stream) = client.subscribe();

        client.connect().await.unwrap();
        factory.last().unwrap().fail_remote("reset by peer");

        let reconnected = tokio::time::timeout(Duration::from_secs(1), async {
            while !(factory.created() == 2 && client.is_connected()) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(reconnected.is_ok());
        assert_eq!(
            client.last_error(),
            Some(ErrorKind::ReceiveFailed("reset by peer".to_string()))
        );
        assert_eq!(client.reconnect_attempts(), 1);

        factory.last().unwrap().push_frame(FRAME);
        assert_eq!(next(&mut stream).await.unwrap().symbol, "AAPL");
    }

    #[tokio::test]
    async fn disconnect_keeps_subscriptions() {
        let factory = Arc::new(FakeTransportFactory::new(OpenBehavior::Succeed));
        let client = client(&factory);
        let (_handle, mut stream) = client.subscribe();

        client.connect().await.unwrap();
        client.disconnect().await;
        client.disconnect().await;
        assert_eq!(client.current_state(), ConnectionState::Disconnected);
        assert_eq!(client.subscriber_count(), 1);

        client.connect().await.unwrap();
        factory.last().unwrap().push_frame(FRAME);
        assert!(next(&mut stream).await.is_some());
    }

    #[tokio::test]
    async fn acts_as_price_sink() {
        let factory = Arc::new(FakeTransportFactory::new(OpenBehavior::Succeed));
        let client = client(&factory);
        let sink: Arc<dyn PriceSink> = client.clone();

        assert!(!sink.is_connected());
        client.connect().await.unwrap();
        assert!(sink.is_connected());
        sink.publish(PriceUpdate::now("MSFT", 420.85)).await.unwrap();
        assert_eq!(factory.last().unwrap().sent().len(), 1);
    }
}
