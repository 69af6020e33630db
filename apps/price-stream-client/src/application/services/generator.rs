//! Price Generator
//!
//! Publishes synthetic price updates for a set of tracked items on a fixed
//! interval. Each tick moves every price by a bounded random walk and sends
//! each update independently, so one failed send never cancels the rest.
//!
//! The walk is stateless with respect to send outcomes: a price advances
//! from its last synthesized value whether or not its send succeeded.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::application::ports::PriceSink;
use crate::domain::price::{PriceBounds, PriceUpdate, TrackedItem};

// =============================================================================
// Configuration
// =============================================================================

/// Generator timing and walk parameters.
#[derive(Debug, Clone, Copy)]
pub struct GeneratorConfig {
    /// Interval between ticks.
    pub tick_interval: Duration,
    /// Maximum relative move per tick, e.g. `0.02` for ±2%.
    pub volatility: f64,
    /// Bounds every synthesized price is clamped into.
    pub bounds: PriceBounds,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(2),
            volatility: 0.02,
            bounds: PriceBounds::default(),
        }
    }
}

/// Generator errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GeneratorError {
    /// `start` was called while already generating.
    #[error("price generation already running")]
    AlreadyGenerating,

    /// The sink was not connected when `start` was called.
    #[error("client is not connected")]
    NotConnected,
}

/// Generator lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorState {
    /// Not generating.
    Idle,
    /// Ticking.
    Generating,
}

/// Outcome of one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Sends attempted.
    pub attempted: usize,
    /// Sends that failed.
    pub failed: usize,
}

// =============================================================================
// Price Walk
// =============================================================================

/// Next price in the walk: `old × (1 ± volatility)` clamped into `bounds`.
///
/// Always finite and within bounds, whatever `old` is.
pub fn next_price<R: Rng>(
    old: f64,
    volatility: f64,
    bounds: &PriceBounds,
    rng: &mut R,
) -> f64 {
    let volatility = if volatility.is_finite() {
        volatility.abs()
    } else {
        0.0
    };
    let change = rng.random_range(-volatility..=volatility);
    bounds.clamp(old * (1.0 + change))
}

/// Advance every item one step and build the updates to send.
pub fn advance_prices<R: Rng>(
    items: &mut [TrackedItem],
    config: &GeneratorConfig,
    rng: &mut R,
) -> Vec<PriceUpdate> {
    items
        .iter_mut()
        .map(|item| {
            item.current_price =
                next_price(item.current_price, config.volatility, &config.bounds, rng);
            PriceUpdate::now(item.symbol.clone(), item.current_price)
        })
        .collect()
}

/// Send every update concurrently and report how many failed.
pub async fn run_tick(sink: &dyn PriceSink, updates: Vec<PriceUpdate>) -> TickReport {
    let attempted = updates.len();
    let results = join_all(updates.into_iter().map(|update| async move {
        let symbol = update.symbol.clone();
        let result = sink.publish(update).await;
        if let Err(error) = &result {
            tracing::warn!(symbol = %symbol, error = %error, "Failed to send generated price");
        }
        result
    }))
    .await;

    TickReport {
        attempted,
        failed: results.iter().filter(|r| r.is_err()).count(),
    }
}

// =============================================================================
// Generator
// =============================================================================

/// Periodic synthetic price publisher.
pub struct PriceGenerator {
    config: GeneratorConfig,
    sink: Arc<dyn PriceSink>,
    running: Mutex<Option<CancellationToken>>,
    ticks: Arc<AtomicU64>,
}

impl std::fmt::Debug for PriceGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriceGenerator")
            .field("config", &self.config)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl PriceGenerator {
    /// Create an idle generator publishing to `sink`.
    #[must_use]
    pub fn new(config: GeneratorConfig, sink: Arc<dyn PriceSink>) -> Self {
        Self {
            config,
            sink,
            running: Mutex::new(None),
            ticks: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> GeneratorState {
        if self
            .running
            .lock()
            .as_ref()
            .is_some_and(|token| !token.is_cancelled())
        {
            GeneratorState::Generating
        } else {
            GeneratorState::Idle
        }
    }

    /// Ticks completed since creation.
    #[must_use]
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Start ticking over `items`.
    ///
    /// Connectivity is checked once here; later disconnects surface as
    /// per-update send failures.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyGenerating` if running, `NotConnected` if the sink is
    /// not connected.
    pub fn start(&self, items: Vec<TrackedItem>) -> Result<(), GeneratorError> {
        let mut running = self.running.lock();
        if running.as_ref().is_some_and(|token| !token.is_cancelled()) {
            return Err(GeneratorError::AlreadyGenerating);
        }
        if !self.sink.is_connected() {
            return Err(GeneratorError::NotConnected);
        }

        let cancel = CancellationToken::new();
        *running = Some(cancel.clone());
        drop(running);

        tracing::info!(
            items = items.len(),
            interval_ms = self.config.tick_interval.as_millis(),
            "Starting price generation"
        );

        let config = self.config;
        let sink = Arc::clone(&self.sink);
        let ticks = Arc::clone(&self.ticks);
        tokio::spawn(async move {
            run_loop(config, sink, items, cancel, ticks).await;
        });
        Ok(())
    }

    /// Stop ticking. Idempotent.
    pub fn stop(&self) {
        if let Some(cancel) = self.running.lock().take() {
            cancel.cancel();
            tracing::info!("Stopped price generation");
        }
    }
}

impl Drop for PriceGenerator {
    fn drop(&mut self) {
        if let Some(cancel) = self.running.get_mut().take() {
            cancel.cancel();
        }
    }
}

async fn run_loop(
    config: GeneratorConfig,
    sink: Arc<dyn PriceSink>,
    mut items: Vec<TrackedItem>,
    cancel: CancellationToken,
    ticks: Arc<AtomicU64>,
) {
    let mut interval = tokio::time::interval(config.tick_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The first tick completes immediately; generation starts one interval in.
    interval.tick().await;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }

        let updates = advance_prices(&mut items, &config, &mut rand::rng());
        // In-flight sends are dropped when the generator stops mid-tick.
        let report = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            report = run_tick(sink.as_ref(), updates) => report,
        };
        ticks.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            attempted = report.attempted,
            failed = report.failed,
            "Generated price tick"
        );
    }
}
