//! Network Reachability
//!
//! Two `Reachability` adapters:
//!
//! - `ProbeReachability` periodically opens a TCP connection to the feed
//!   host and publishes whether it succeeded.
//! - `ManualReachability` is flipped by hand; used in tests and when
//!   probing is disabled.

use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::application::ports::Reachability;
use crate::domain::connection::{ErrorKind, validate_url};

// =============================================================================
// Manual Reachability
// =============================================================================

/// Reachability flag set explicitly by the owner.
#[derive(Debug)]
pub struct ManualReachability {
    tx: watch::Sender<bool>,
}

impl Default for ManualReachability {
    fn default() -> Self {
        Self::new(true)
    }
}

impl ManualReachability {
    /// Create a flag with an initial value.
    #[must_use]
    pub fn new(available: bool) -> Self {
        let (tx, _rx) = watch::channel(available);
        Self { tx }
    }

    /// Set availability, notifying watchers only on change.
    pub fn set_available(&self, available: bool) {
        self.tx.send_if_modified(|current| {
            let changed = *current != available;
            *current = available;
            changed
        });
    }
}

impl Reachability for ManualReachability {
    fn is_available(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

// =============================================================================
// Probe Reachability
// =============================================================================

/// Shortest interval the probe loop will run at.
const MIN_PROBE_INTERVAL: Duration = Duration::from_millis(100);

/// Configuration for TCP reachability probing.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Host to probe.
    pub host: String,
    /// Port to probe.
    pub port: u16,
    /// Interval between probes.
    pub interval: Duration,
    /// Timeout for one probe connection.
    pub probe_timeout: Duration,
}

impl ProbeConfig {
    /// Derive the probe target from a feed URL.
    ///
    /// # Errors
    ///
    /// Returns `ErrorKind::InvalidUrl` if the URL is not a valid `ws`/`wss`
    /// endpoint.
    pub fn for_url(url: &str, interval: Duration) -> Result<Self, ErrorKind> {
        let parsed = validate_url(url)?;
        let host = parsed
            .host_str()
            .ok_or(ErrorKind::InvalidUrl)?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        let port = parsed.port_or_known_default().ok_or(ErrorKind::InvalidUrl)?;
        Ok(Self {
            host,
            port,
            interval,
            probe_timeout: interval.min(Duration::from_secs(3)),
        })
    }
}

/// Reachability backed by periodic TCP connect probes.
///
/// Starts optimistic (`true`) until the first probe completes.
#[derive(Debug)]
pub struct ProbeReachability {
    config: ProbeConfig,
    tx: watch::Sender<bool>,
}

impl ProbeReachability {
    /// Create a prober. Call `run` to start probing.
    #[must_use]
    pub fn new(config: ProbeConfig) -> Self {
        let (tx, _rx) = watch::channel(true);
        Self { config, tx }
    }

    /// Run the probe loop until cancelled.
    ///
    /// Intervals shorter than 100ms are raised to 100ms.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.interval.max(MIN_PROBE_INTERVAL));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            let available = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                available = async {
                    interval.tick().await;
                    self.probe().await
                } => available,
            };
            self.publish(available);
        }
        tracing::debug!("Reachability probe cancelled");
    }

    async fn probe(&self) -> bool {
        let target = (self.config.host.as_str(), self.config.port);
        matches!(
            tokio::time::timeout(self.config.probe_timeout, TcpStream::connect(target)).await,
            Ok(Ok(_))
        )
    }

    fn publish(&self, available: bool) {
        let changed = self.tx.send_if_modified(|current| {
            let changed = *current != available;
            *current = available;
            changed
        });
        if changed {
            if available {
                tracing::info!(host = %self.config.host, "Network reachable");
            } else {
                tracing::warn!(host = %self.config.host, "Network unreachable");
            }
        }
    }
}

impl Reachability for ProbeReachability {
    fn is_available(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}
