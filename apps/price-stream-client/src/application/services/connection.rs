//! Connection State Machine
//!
//! Owns the single upstream connection and every transition of its
//! `ConnectionState`. Transitions are published on a `watch` channel.
//!
//! # Lifecycle
//!
//! ```text
//! Disconnected ──connect()──► Connecting ──open ok──► Connected
//!                                 │                      │
//!                      timeout / open error      network lost / remote drop
//!                                 ▼                      ▼
//!                              Failed(kind) ◄────────────┘
//!                                 │
//!                  delay elapsed + network available
//!                                 ▼
//!                            Reconnecting ──► Connecting ...
//! ```
//!
//! `disconnect()` moves any state to `Disconnected` and cancels every
//! timer, attempt and watcher started for the session.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::retry_policy::{RetryConfig, RetryPolicy};
use crate::application::ports::{Frame, FrameStream, Reachability, Transport, TransportFactory};
use crate::domain::connection::{ConnectionState, ErrorKind, validate_url};
use crate::infrastructure::metrics;

// =============================================================================
// Configuration
// =============================================================================

/// Default feed endpoint.
pub const DEFAULT_URL: &str = "wss://ws.postman-echo.com/raw";

/// Connection timings and retry table.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Feed endpoint (`ws` or `wss`).
    pub url: String,
    /// Upper bound for one open attempt.
    pub connect_timeout: Duration,
    /// Steady delay between attempts once the retry table is exhausted.
    pub reconnect_delay: Duration,
    /// Retry decisions and backoff table.
    pub retry: RetryConfig,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            connect_timeout: Duration::from_secs(10),
            reconnect_delay: Duration::from_secs(5),
            retry: RetryConfig::default(),
        }
    }
}

// =============================================================================
// Internal State
// =============================================================================

struct ActiveConnection {
    epoch: u64,
    transport: Arc<dyn Transport>,
    cancel: CancellationToken,
}

struct Shared {
    connection: Option<ActiveConnection>,
    /// Cancelled and replaced by every `disconnect()`.
    session: CancellationToken,
    /// Token of the pending reconnect loop, if any.
    reconnect: Option<CancellationToken>,
    last_error: Option<ErrorKind>,
}

enum OpenOutcome {
    Opened(Result<(), ErrorKind>),
    TimedOut,
    Cancelled,
}

// =============================================================================
// State Machine
// =============================================================================

/// Drives one logical connection through its states.
///
/// At most one open attempt is in flight at a time. `Connected` always
/// has an open transport behind it.
pub struct ConnectionStateMachine {
    config: ConnectionConfig,
    policy: RetryPolicy,
    factory: Arc<dyn TransportFactory>,
    reachability: Arc<dyn Reachability>,
    shared: Mutex<Shared>,
    state_tx: watch::Sender<ConnectionState>,
    attempt_lock: tokio::sync::Mutex<()>,
    consecutive_failures: AtomicU32,
    next_epoch: AtomicU64,
    reconnect_attempts: AtomicU64,
}

impl std::fmt::Debug for ConnectionStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionStateMachine")
            .field("url", &self.config.url)
            .field("state", &*self.state_tx.borrow())
            .finish_non_exhaustive()
    }
}

impl ConnectionStateMachine {
    /// Create a machine in `Disconnected`.
    #[must_use]
    pub fn new(
        config: ConnectionConfig,
        factory: Arc<dyn TransportFactory>,
        reachability: Arc<dyn Reachability>,
    ) -> Self {
        let (state_tx, _rx) = watch::channel(ConnectionState::Disconnected);
        Self {
            policy: RetryPolicy::new(config.retry.clone()),
            config,
            factory,
            reachability,
            shared: Mutex::new(Shared {
                connection: None,
                session: CancellationToken::new(),
                reconnect: None,
                last_error: None,
            }),
            state_tx,
            attempt_lock: tokio::sync::Mutex::new(()),
            consecutive_failures: AtomicU32::new(0),
            next_epoch: AtomicU64::new(0),
            reconnect_attempts: AtomicU64::new(0),
        }
    }

    /// Snapshot of the current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state_tx.borrow().clone()
    }

    /// Receiver that observes every state transition.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Check if the connection is usable.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state_tx.borrow().is_connected()
    }

    /// Error from the most recent transition into `Failed`.
    #[must_use]
    pub fn last_error(&self) -> Option<ErrorKind> {
        self.shared.lock().last_error.clone()
    }

    /// Total automatic reconnection attempts started.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u64 {
        self.reconnect_attempts.load(Ordering::Relaxed)
    }

    // =========================================================================
    // Public Operations
    // =========================================================================

    /// Open the connection, racing the open handshake against the timeout.
    ///
    /// Returns immediately if already connected. On a retryable failure an
    /// automatic reconnection is scheduled before this returns.
    ///
    /// # Errors
    ///
    /// Returns the `ErrorKind` the machine failed with, or
    /// `ConnectionFailed` if `disconnect()` interrupted the attempt.
    pub async fn connect(self: &Arc<Self>) -> Result<(), ErrorKind> {
        let session = {
            let mut shared = self.shared.lock();
            // A caller-initiated attempt supersedes any pending reconnect.
            if let Some(pending) = shared.reconnect.take() {
                pending.cancel();
            }
            shared.session.clone()
        };

        let result = self.attempt(&session, &session).await;
        if let Err(error) = &result {
            self.schedule_reconnect(error.clone(), &session);
        }
        result
    }

    /// Close the connection and cancel all pending work.
    ///
    /// Idempotent; always ends in `Disconnected`.
    pub async fn disconnect(&self) {
        let connection = {
            let mut shared = self.shared.lock();
            shared.session.cancel();
            shared.session = CancellationToken::new();
            shared.reconnect = None;
            let connection = shared.connection.take();
            self.set_state(ConnectionState::Disconnected);
            connection
        };
        self.consecutive_failures.store(0, Ordering::SeqCst);

        if let Some(connection) = connection {
            connection.cancel.cancel();
            connection.transport.close().await;
            tracing::info!(epoch = connection.epoch, "Disconnected");
        }
    }

    /// Write one frame on the current connection.
    ///
    /// # Errors
    ///
    /// Returns `SendFailed` if there is no open connection, or the
    /// transport's write error.
    pub async fn send_frame(&self, frame: Frame) -> Result<(), ErrorKind> {
        let transport = self
            .shared
            .lock()
            .connection
            .as_ref()
            .map(|connection| Arc::clone(&connection.transport));

        match transport {
            Some(transport) => transport.send_frame(frame).await,
            None => Err(ErrorKind::SendFailed("not connected".to_string())),
        }
    }

    /// Take the inbound frames of the current connection, tagged with its
    /// epoch so failures can be reported against it.
    #[must_use]
    pub fn open_frames(&self) -> Option<(u64, FrameStream)> {
        self.shared
            .lock()
            .connection
            .as_ref()
            .map(|connection| (connection.epoch, connection.transport.receive_frames()))
    }

    /// Report that the connection identified by `epoch` has failed.
    ///
    /// Stale epochs are ignored. Closes the transport, moves to
    /// `Failed(kind)` and schedules a reconnect if `kind` is retryable.
    pub async fn connection_lost(self: &Arc<Self>, epoch: u64, kind: ErrorKind) {
        let (connection, session) = {
            let mut shared = self.shared.lock();
            if shared.connection.as_ref().map(|c| c.epoch) != Some(epoch) {
                return;
            }
            let Some(connection) = shared.connection.take() else {
                return;
            };
            shared.last_error = Some(kind.clone());
            self.set_state(ConnectionState::Failed(kind.clone()));
            (connection, shared.session.clone())
        };

        tracing::warn!(epoch, error = %kind, "Connection lost");
        metrics::record_connection_error(&kind);
        connection.cancel.cancel();
        connection.transport.close().await;

        self.schedule_reconnect(kind, &session);
    }

    // =========================================================================
    // Attempt
    // =========================================================================

    /// Run one attempt.
    ///
    /// `scope` cancels the attempt; `session` owns the resulting connection.
    async fn attempt(
        self: &Arc<Self>,
        session: &CancellationToken,
        scope: &CancellationToken,
    ) -> Result<(), ErrorKind> {
        let _guard = self.attempt_lock.lock().await;

        if scope.is_cancelled() {
            return Err(ErrorKind::ConnectionFailed("attempt cancelled".to_string()));
        }
        if self.is_connected() {
            return Ok(());
        }

        if let Err(error) = validate_url(&self.config.url) {
            self.fail(scope, &error);
            return Err(error);
        }
        if !self.reachability.is_available() {
            let error = ErrorKind::NetworkUnavailable;
            self.fail(scope, &error);
            return Err(error);
        }
        if !self.transition(scope, ConnectionState::Connecting) {
            return Err(ErrorKind::ConnectionFailed("attempt cancelled".to_string()));
        }

        tracing::info!(url = %self.config.url, "Connecting to price feed");
        let transport = self.factory.create();

        let outcome = tokio::select! {
            biased;
            () = scope.cancelled() => OpenOutcome::Cancelled,
            result = transport.open(&self.config.url) => OpenOutcome::Opened(result),
            () = tokio::time::sleep(self.config.connect_timeout) => OpenOutcome::TimedOut,
        };

        let error = match outcome {
            OpenOutcome::Opened(Ok(())) => return self.install(transport, session, scope).await,
            OpenOutcome::Cancelled => {
                transport.close().await;
                return Err(ErrorKind::ConnectionFailed("attempt cancelled".to_string()));
            }
            OpenOutcome::TimedOut => {
                tracing::warn!(
                    timeout_ms = self.config.connect_timeout.as_millis(),
                    "Connection attempt timed out"
                );
                ErrorKind::Timeout
            }
            OpenOutcome::Opened(Err(ErrorKind::InvalidUrl)) => ErrorKind::InvalidUrl,
            OpenOutcome::Opened(Err(ErrorKind::ConnectionFailed(detail))) => {
                ErrorKind::ConnectionFailed(detail)
            }
            OpenOutcome::Opened(Err(other)) => ErrorKind::ConnectionFailed(other.to_string()),
        };

        transport.close().await;
        self.fail(scope, &error);
        Err(error)
    }

    async fn install(
        self: &Arc<Self>,
        transport: Arc<dyn Transport>,
        session: &CancellationToken,
        scope: &CancellationToken,
    ) -> Result<(), ErrorKind> {
        let epoch = self.next_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = session.child_token();

        let installed = {
            let mut shared = self.shared.lock();
            if scope.is_cancelled() {
                false
            } else {
                shared.connection = Some(ActiveConnection {
                    epoch,
                    transport: Arc::clone(&transport),
                    cancel: cancel.clone(),
                });
                self.set_state(ConnectionState::Connected);
                true
            }
        };

        if !installed {
            transport.close().await;
            return Err(ErrorKind::ConnectionFailed("attempt cancelled".to_string()));
        }

        self.consecutive_failures.store(0, Ordering::SeqCst);
        tracing::info!(epoch, url = %self.config.url, "Connected to price feed");
        self.watch_reachability(epoch, cancel);
        Ok(())
    }

    /// Move to `Failed` unless the attempt's scope was cancelled.
    fn fail(&self, scope: &CancellationToken, error: &ErrorKind) -> bool {
        {
            let mut shared = self.shared.lock();
            if scope.is_cancelled() {
                return false;
            }
            shared.last_error = Some(error.clone());
            self.set_state(ConnectionState::Failed(error.clone()));
        }
        metrics::record_connection_error(error);
        tracing::warn!(error = %error, "Connection failed");
        true
    }

    fn transition(&self, scope: &CancellationToken, state: ConnectionState) -> bool {
        let _shared = self.shared.lock();
        if scope.is_cancelled() {
            return false;
        }
        self.set_state(state);
        true
    }

    /// Callers hold the `shared` lock so transitions are ordered.
    fn set_state(&self, state: ConnectionState) {
        metrics::set_connection_state(&state);
        tracing::debug!(state = %state, "Connection state changed");
        self.state_tx.send_replace(state);
    }

    // =========================================================================
    // Reconnection
    // =========================================================================

    fn schedule_reconnect(self: &Arc<Self>, error: ErrorKind, session: &CancellationToken) {
        if session.is_cancelled() {
            return;
        }
        if !RetryPolicy::is_retryable(&error) {
            tracing::info!(error = %error, "Failure is not retryable; not reconnecting");
            return;
        }

        let token = session.child_token();
        {
            let mut shared = self.shared.lock();
            if !self.state_tx.borrow().is_failed() {
                return;
            }
            if let Some(previous) = shared.reconnect.replace(token.clone()) {
                previous.cancel();
            }
        }

        let this = Arc::clone(self);
        let session = session.clone();
        tokio::spawn(async move {
            this.reconnect_loop(error, session, token).await;
        });
    }

    fn reconnect_delay(&self, error: &ErrorKind, attempt: u32) -> Duration {
        if self.policy.should_retry(error, attempt) {
            self.policy.delay_for(attempt)
        } else {
            self.config.reconnect_delay
        }
    }

    async fn reconnect_loop(
        self: Arc<Self>,
        mut error: ErrorKind,
        session: CancellationToken,
        token: CancellationToken,
    ) {
        loop {
            let attempt = self.consecutive_failures.fetch_add(1, Ordering::SeqCst);
            let delay = self.reconnect_delay(&error, attempt);
            tracing::info!(
                attempt = attempt + 1,
                delay_ms = delay.as_millis(),
                error = %error,
                "Scheduling reconnection"
            );

            if !self.wait_for_network(&token).await {
                return;
            }
            tokio::select! {
                biased;
                () = token.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }
            if !self.wait_for_network(&token).await {
                return;
            }

            {
                let _shared = self.shared.lock();
                if token.is_cancelled() || !self.state_tx.borrow().is_failed() {
                    return;
                }
                self.set_state(ConnectionState::Reconnecting);
            }
            self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
            metrics::record_reconnect();

            match self.attempt(&session, &token).await {
                Ok(()) => return,
                Err(next) => {
                    if token.is_cancelled() || !RetryPolicy::is_retryable(&next) {
                        return;
                    }
                    error = next;
                }
            }
        }
    }

    /// Block until the network is available. Returns `false` if cancelled.
    async fn wait_for_network(&self, token: &CancellationToken) -> bool {
        if self.reachability.is_available() {
            return true;
        }

        tracing::info!("Network unavailable; holding reconnection");
        let mut rx = self.reachability.subscribe();
        tokio::select! {
            biased;
            () = token.cancelled() => false,
            available = async { rx.wait_for(|up| *up).await.is_ok() } => available,
        }
    }

    fn watch_reachability(self: &Arc<Self>, epoch: u64, cancel: CancellationToken) {
        let mut rx = self.reachability.subscribe();
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let lost = tokio::select! {
                biased;
                () = cancel.cancelled() => false,
                lost = async { rx.wait_for(|up| !*up).await.is_ok() } => lost,
            };
            if lost {
                this.connection_lost(epoch, ErrorKind::NetworkUnavailable)
                    .await;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{FakeTransportFactory, OpenBehavior};
    use super::*;
    use crate::infrastructure::websocket::ManualReachability;

    fn fast_config(url: &str) -> ConnectionConfig {
        ConnectionConfig {
            url: url.to_string(),
            connect_timeout: Duration::from_millis(100),
            reconnect_delay: Duration::from_millis(20),
            retry: RetryConfig::new(3, vec![Duration::from_millis(10)]),
        }
    }

    fn slow_retry_config(url: &str) -> ConnectionConfig {
        ConnectionConfig {
            retry: RetryConfig::new(3, vec![Duration::from_secs(30)]),
            reconnect_delay: Duration::from_secs(30),
            ..fast_config(url)
        }
    }

    fn machine(
        config: ConnectionConfig,
        factory: &Arc<FakeTransportFactory>,
        reachability: &Arc<ManualReachability>,
    ) -> Arc<ConnectionStateMachine> {
        Arc::new(ConnectionStateMachine::new(
            config,
            Arc::clone(factory) as Arc<dyn TransportFactory>,
            Arc::clone(reachability) as Arc<dyn Reachability>,
        ))
    }

    async fn wait_for_state(
        machine: &ConnectionStateMachine,
        predicate: impl Fn(&ConnectionState) -> bool,
    ) -> bool {
        let mut rx = machine.subscribe_state();
        tokio::time::timeout(Duration::from_secs(2), async {
            rx.wait_for(|state| predicate(state)).await.is_ok()
        })
        .await
        .unwrap_or(false)
    }

    /// Collect every state the machine publishes from now on.
    fn record_states(machine: &ConnectionStateMachine) -> Arc<Mutex<Vec<ConnectionState>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut rx = machine.subscribe_state();
        let sink = Arc::clone(&seen);
        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let state = rx.borrow_and_update().clone();
                sink.lock().push(state);
            }
        });
        seen
    }

    const URL: &str = "ws://127.0.0.1:9/feed";

    #[tokio::test]
    async fn connect_success() {
        let factory = Arc::new(FakeTransportFactory::new(OpenBehavior::Succeed));
        let reachability = Arc::new(ManualReachability::new(true));
        let machine = machine(fast_config(URL), &factory, &reachability);

        assert_eq!(machine.state(), ConnectionState::Disconnected);
        machine.connect().await.unwrap();

        assert_eq!(machine.state(), ConnectionState::Connected);
        assert!(factory.last().unwrap().is_open());
        assert_eq!(machine.last_error(), None);
    }

    #[tokio::test]
    async fn connect_when_connected_is_noop() {
        let factory = Arc::new(FakeTransportFactory::new(OpenBehavior::Succeed));
        let reachability = Arc::new(ManualReachability::new(true));
        let machine = machine(fast_config(URL), &factory, &reachability);

        machine.connect().await.unwrap();
        machine.connect().await.unwrap();
        assert_eq!(factory.created(), 1);
    }

    #[tokio::test]
    async fn invalid_url_fails_without_io() {
        let factory = Arc::new(FakeTransportFactory::new(OpenBehavior::Succeed));
        let reachability = Arc::new(ManualReachability::new(true));
        let machine = machine(fast_config("https://example.com"), &factory, &reachability);
        let seen = record_states(&machine);

        let result = machine.connect().await;

        assert_eq!(result, Err(ErrorKind::InvalidUrl));
        assert_eq!(machine.state(), ConnectionState::Failed(ErrorKind::InvalidUrl));
        assert_eq!(machine.last_error(), Some(ErrorKind::InvalidUrl));

        tokio::time::sleep(Duration::from_millis(80)).await;
        let seen = seen.lock().clone();
        assert!(!seen.contains(&ConnectionState::Connecting), "{seen:?}");
        assert_eq!(
            seen.last(),
            Some(&ConnectionState::Failed(ErrorKind::InvalidUrl))
        );
        assert_eq!(factory.created(), 0);
        assert_eq!(machine.reconnect_attempts(), 0);
    }

    #[tokio::test]
    async fn concurrent_connects_open_one_transport() {
        let factory = Arc::new(FakeTransportFactory::new(OpenBehavior::Hang));
        let reachability = Arc::new(ManualReachability::new(true));
        let config = ConnectionConfig {
            connect_timeout: Duration::from_secs(30),
            ..slow_retry_config(URL)
        };
        let machine = machine(config, &factory, &reachability);

        let callers: Vec<_> = (0..2)
            .map(|_| {
                let machine = Arc::clone(&machine);
                tokio::spawn(async move { machine.connect().await })
            })
            .collect();
        assert!(wait_for_state(&machine, |s| *s == ConnectionState::Connecting).await);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(factory.created(), 1);

        machine.disconnect().await;
        for caller in callers {
            let result = tokio::time::timeout(Duration::from_secs(1), caller)
                .await
                .unwrap()
                .unwrap();
            assert!(matches!(result, Err(ErrorKind::ConnectionFailed(_))));
        }
        assert_eq!(factory.created(), 1);
        assert_eq!(machine.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn network_unavailable_fails_without_io() {
        let factory = Arc::new(FakeTransportFactory::new(OpenBehavior::Succeed));
        let reachability = Arc::new(ManualReachability::new(false));
        let machine = machine(fast_config(URL), &factory, &reachability);

        let result = machine.connect().await;

        assert_eq!(result, Err(ErrorKind::NetworkUnavailable));
        assert_eq!(
            machine.state(),
            ConnectionState::Failed(ErrorKind::NetworkUnavailable)
        );
        assert_eq!(factory.created(), 0);
        machine.disconnect().await;
    }

    #[tokio::test]
    async fn open_that_never_completes_times_out() {
        let factory = Arc::new(FakeTransportFactory::new(OpenBehavior::Hang));
        let reachability = Arc::new(ManualReachability::new(true));
        let machine = machine(slow_retry_config(URL), &factory, &reachability);

        let result = machine.connect().await;

        assert_eq!(result, Err(ErrorKind::Timeout));
        assert_eq!(machine.state(), ConnectionState::Failed(ErrorKind::Timeout));
        // The losing open was released.
        assert_eq!(factory.last().unwrap().close_calls(), 1);
        machine.disconnect().await;
    }

    #[tokio::test]
    async fn open_error_is_connection_failed() {
        let factory = Arc::new(FakeTransportFactory::new(OpenBehavior::Fail(
            "refused".to_string(),
        )));
        let reachability = Arc::new(ManualReachability::new(true));
        let machine = machine(slow_retry_config(URL), &factory, &reachability);

        let result = machine.connect().await;

        let expected = ErrorKind::ConnectionFailed("refused".to_string());
        assert_eq!(result, Err(expected.clone()));
        assert_eq!(machine.state(), ConnectionState::Failed(expected.clone()));
        assert_eq!(machine.last_error(), Some(expected));
        machine.disconnect().await;
    }

    #[tokio::test]
    async fn disconnect_twice_is_idempotent() {
        let factory = Arc::new(FakeTransportFactory::new(OpenBehavior::Succeed));
        let reachability = Arc::new(ManualReachability::new(true));
        let machine = machine(fast_config(URL), &factory, &reachability);

        machine.connect().await.unwrap();
        let transport = factory.last().unwrap();

        machine.disconnect().await;
        assert_eq!(machine.state(), ConnectionState::Disconnected);
        machine.disconnect().await;
        assert_eq!(machine.state(), ConnectionState::Disconnected);

        assert!(!transport.is_open());
        assert_eq!(transport.close_calls(), 1);
    }

    #[tokio::test]
    async fn disconnect_interrupts_pending_attempt() {
        let factory = Arc::new(FakeTransportFactory::new(OpenBehavior::Hang));
        let reachability = Arc::new(ManualReachability::new(true));
        let config = ConnectionConfig {
            connect_timeout: Duration::from_secs(30),
            ..slow_retry_config(URL)
        };
        let machine = machine(config, &factory, &reachability);

        let pending = {
            let machine = Arc::clone(&machine);
            tokio::spawn(async move { machine.connect().await })
        };
        assert!(wait_for_state(&machine, |s| *s == ConnectionState::Connecting).await);

        machine.disconnect().await;
        let result = tokio::time::timeout(Duration::from_secs(1), pending)
            .await
            .unwrap()
            .unwrap();

        assert!(matches!(result, Err(ErrorKind::ConnectionFailed(_))));
        assert_eq!(machine.state(), ConnectionState::Disconnected);
        assert_eq!(factory.last().unwrap().close_calls(), 1);
    }

    #[tokio::test]
    async fn reconnects_after_failure() {
        let factory = Arc::new(FakeTransportFactory::new(OpenBehavior::Succeed));
        factory.push(OpenBehavior::Fail("refused".to_string()));
        let reachability = Arc::new(ManualReachability::new(true));
        let machine = machine(fast_config(URL), &factory, &reachability);

        assert!(machine.connect().await.is_err());
        assert!(wait_for_state(&machine, ConnectionState::is_connected).await);

        assert_eq!(factory.created(), 2);
        assert_eq!(machine.reconnect_attempts(), 1);
        // The failure stays visible after recovery.
        assert_eq!(
            machine.last_error(),
            Some(ErrorKind::ConnectionFailed("refused".to_string()))
        );
    }

    #[tokio::test]
    async fn no_reconnect_while_offline() {
        let factory = Arc::new(FakeTransportFactory::new(OpenBehavior::Succeed));
        let reachability = Arc::new(ManualReachability::new(false));
        let machine = machine(fast_config(URL), &factory, &reachability);

        assert_eq!(machine.connect().await, Err(ErrorKind::NetworkUnavailable));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(factory.created(), 0);
        assert!(machine.state().is_failed());

        reachability.set_available(true);
        assert!(wait_for_state(&machine, ConnectionState::is_connected).await);
        assert_eq!(factory.created(), 1);
    }

    #[tokio::test]
    async fn network_loss_closes_connection() {
        let factory = Arc::new(FakeTransportFactory::new(OpenBehavior::Succeed));
        let reachability = Arc::new(ManualReachability::new(true));
        let machine = machine(fast_config(URL), &factory, &reachability);

        machine.connect().await.unwrap();
        let first = factory.last().unwrap();

        reachability.set_available(false);
        assert!(wait_for_state(&machine, ConnectionState::is_failed).await);
        assert_eq!(
            machine.state(),
            ConnectionState::Failed(ErrorKind::NetworkUnavailable)
        );
        assert!(!first.is_open());

        reachability.set_available(true);
        assert!(wait_for_state(&machine, ConnectionState::is_connected).await);
        assert_eq!(factory.created(), 2);
    }

    #[tokio::test]
    async fn stale_epoch_is_ignored() {
        let factory = Arc::new(FakeTransportFactory::new(OpenBehavior::Succeed));
        let reachability = Arc::new(ManualReachability::new(true));
        let machine = machine(fast_config(URL), &factory, &reachability);

        machine.connect().await.unwrap();
        let (epoch, _frames) = machine.open_frames().unwrap();

        machine
            .connection_lost(epoch + 1, ErrorKind::ReceiveFailed("gone".to_string()))
            .await;
        assert_eq!(machine.state(), ConnectionState::Connected);

        machine
            .connection_lost(epoch, ErrorKind::ReceiveFailed("gone".to_string()))
            .await;
        assert_eq!(
            machine.last_error(),
            Some(ErrorKind::ReceiveFailed("gone".to_string()))
        );
        assert!(wait_for_state(&machine, ConnectionState::is_connected).await);
        assert_ne!(machine.open_frames().unwrap().0, epoch);
    }

    #[tokio::test]
    async fn disconnect_cancels_scheduled_reconnect() {
        let factory = Arc::new(FakeTransportFactory::new(OpenBehavior::Fail(
            "refused".to_string(),
        )));
        let reachability = Arc::new(ManualReachability::new(true));
        let config = ConnectionConfig {
            retry: RetryConfig::new(3, vec![Duration::from_millis(50)]),
            ..fast_config(URL)
        };
        let machine = machine(config, &factory, &reachability);

        assert!(machine.connect().await.is_err());
        machine.disconnect().await;
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(factory.created(), 1);
        assert_eq!(machine.state(), ConnectionState::Disconnected);
        assert_eq!(machine.reconnect_attempts(), 0);
    }

    #[tokio::test]
    async fn send_frame_requires_connection() {
        let factory = Arc::new(FakeTransportFactory::new(OpenBehavior::Succeed));
        let reachability = Arc::new(ManualReachability::new(true));
        let machine = machine(fast_config(URL), &factory, &reachability);

        assert_eq!(
            machine.send_frame(b"x".to_vec()).await,
            Err(ErrorKind::SendFailed("not connected".to_string()))
        );

        machine.connect().await.unwrap();
        machine.send_frame(b"hello".to_vec()).await.unwrap();
        assert_eq!(factory.last().unwrap().sent(), vec![b"hello".to_vec()]);
    }

    #[test]
    fn delay_falls_back_to_steady_interval() {
        let factory = Arc::new(FakeTransportFactory::new(OpenBehavior::Succeed));
        let reachability = Arc::new(ManualReachability::new(true));
        let machine = machine(ConnectionConfig::default(), &factory, &reachability);

        assert_eq!(
            machine.reconnect_delay(&ErrorKind::Timeout, 0),
            Duration::from_secs(1)
        );
        assert_eq!(
            machine.reconnect_delay(&ErrorKind::Timeout, 2),
            Duration::from_secs(5)
        );
        assert_eq!(
            machine.reconnect_delay(&ErrorKind::Timeout, 3),
            Duration::from_secs(5)
        );
        assert_eq!(
            machine.reconnect_delay(&ErrorKind::Timeout, 100),
            Duration::from_secs(5)
        );
    }
}
