//! Phase manager: ties detector, adapter and scaler together under a
//! periodic control loop.
//!
//! # Lifecycle
//!
//! ```text
//!   ┌─────────┐   start(ctx)   ┌─────────┐   stop() / ctx cancelled   ┌─────────┐
//!   │  IDLE   │ ──────────────▶│ RUNNING │ ──────────────────────────▶│ STOPPED │
//!   └─────────┘                └─────────┘                            └─────────┘
//! ```
//!
//! Each tick pulls the portfolio value from the injected source (outside
//! any lock), feeds it to the detector and, on transition, refreshes the
//! cached strategy/risk snapshot read by synchronous callers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::adapter::StrategyAdapter;
use crate::config::PhaseManagerConfig;
use crate::detector::PhaseDetector;
use crate::scaler::CapitalScaler;
use crate::store::{NoopPhaseStore, PhaseStore};
use crate::types::{
    CapitalAllocation, Phase, PhaseError, PhaseTransitionEvent, Result, RiskParameters,
    StrategyConfig, StrategyType,
};

// ============================================================================
// Portfolio value source
// ============================================================================

/// Supplier of the current portfolio value.
///
/// The manager treats it as opaque: failures are logged and the check is
/// skipped. It is the only suspension point of a phase check, so callers
/// are responsible for bounding its latency.
#[async_trait]
pub trait PortfolioValueSource: Send + Sync {
    async fn portfolio_value(&self) -> anyhow::Result<f64>;
}

/// Adapter turning an async closure into a [`PortfolioValueSource`].
struct FnSource<F>(F);

#[async_trait]
impl<F, Fut> PortfolioValueSource for FnSource<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<f64>> + Send,
{
    async fn portfolio_value(&self) -> anyhow::Result<f64> {
        (self.0)().await
    }
}

// ============================================================================
// Status
// ============================================================================

/// Strategy and risk selected for the current phase.
#[derive(Debug, Clone, PartialEq)]
struct ActiveProfile {
    phase: Phase,
    strategy: StrategyConfig,
    risk: RiskParameters,
}

/// Point-in-time view of the manager for dashboards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseStatus {
    pub phase: Phase,
    pub phase_duration_secs: u64,
    pub strategy_name: String,
    pub strategy_type: StrategyType,
    pub transitions: usize,
    pub running: bool,
}

// ============================================================================
// Phase Manager
// ============================================================================

struct ManagerInner {
    config: PhaseManagerConfig,
    detector: PhaseDetector,
    adapter: RwLock<StrategyAdapter>,
    active: RwLock<ActiveProfile>,
    source: RwLock<Option<Arc<dyn PortfolioValueSource>>>,
    running: AtomicBool,
    /// Flips to `true` once the loop task has finished or been abandoned
    exited: watch::Sender<bool>,
}

/// Orchestrates phase detection and strategy adaptation.
pub struct PhaseManager {
    inner: Arc<ManagerInner>,
    stop_token: CancellationToken,
    started: AtomicBool,
    stopped: AtomicBool,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl PhaseManager {
    /// Create a manager with the log-only phase store.
    pub fn new(config: PhaseManagerConfig) -> Result<Self> {
        Self::with_store(config, Arc::new(NoopPhaseStore))
    }

    /// Create a manager persisting detector state through `store`.
    pub fn with_store(config: PhaseManagerConfig, store: Arc<dyn PhaseStore>) -> Result<Self> {
        config.validate()?;

        let detector = PhaseDetector::new(config.detector.clone())?.with_store(store);
        let adapter = StrategyAdapter::new(config.strategy.clone())?;

        let phase = Phase::Bootstrap;
        let active = ActiveProfile {
            phase,
            strategy: adapter.select_strategy(phase),
            risk: adapter.get_risk_params(phase),
        };

        Ok(Self {
            inner: Arc::new(ManagerInner {
                config,
                detector,
                adapter: RwLock::new(adapter),
                active: RwLock::new(active),
                source: RwLock::new(None),
                running: AtomicBool::new(false),
                exited: watch::Sender::new(false),
            }),
            stop_token: CancellationToken::new(),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            loop_handle: Mutex::new(None),
        })
    }

    /// Launch the periodic check loop.
    ///
    /// The loop exits when `ctx` is cancelled or [`Self::stop`] is called.
    /// Only the first call launches a loop; later calls are ignored.
    pub async fn start(&self, ctx: CancellationToken) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("Phase manager already started");
            return Ok(());
        }

        match self.inner.detector.load().await {
            Ok(true) => self.inner.refresh_active().await,
            Ok(false) => {}
            Err(e) => warn!(error = %e, "Failed to restore phase state, starting fresh"),
        }

        let inner = Arc::clone(&self.inner);
        let stop = self.stop_token.clone();
        inner.running.store(true, Ordering::SeqCst);

        let handle = tokio::spawn(async move {
            inner.run(ctx, stop).await;
            inner.running.store(false, Ordering::SeqCst);
            inner.exited.send_replace(true);
        });
        *self.loop_handle.lock().await = Some(handle);

        info!(
            check_interval_secs = self.inner.config.check_interval.as_secs(),
            "Phase manager started"
        );
        Ok(())
    }

    /// Signal the loop to exit and wait for it, at most `shutdown_timeout`.
    ///
    /// The signal is sent once; every caller, concurrent or later, returns
    /// only after the loop has exited. If the loop is stuck in the portfolio
    /// source past the timeout it is aborted.
    pub async fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            debug!("Phase manager stop requested");
            self.stop_token.cancel();
        }

        if !self.started.load(Ordering::SeqCst) {
            return;
        }

        let handle = self.loop_handle.lock().await.take();
        let Some(mut handle) = handle else {
            // Another caller owns the handle, or start() has not stored it yet
            let mut exited = self.inner.exited.subscribe();
            let _ = exited.wait_for(|done| *done).await;
            return;
        };

        let timeout = self.inner.config.shutdown_timeout;
        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(Ok(())) => info!("Phase manager stopped"),
            Ok(Err(e)) => error!(error = %e, "Phase manager loop terminated abnormally"),
            Err(_) => {
                warn!(
                    timeout_secs = timeout.as_secs(),
                    "Phase manager loop did not exit in time, abandoning"
                );
                handle.abort();
            }
        }

        self.inner.running.store(false, Ordering::SeqCst);
        self.inner.exited.send_replace(true);
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Inject or replace the portfolio value source.
    pub async fn set_portfolio_source(&self, source: Arc<dyn PortfolioValueSource>) {
        *self.inner.source.write().await = Some(source);
        debug!("Portfolio value source set");
    }

    /// Inject or replace the portfolio value getter.
    pub async fn set_portfolio_getter<F, Fut>(&self, getter: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<f64>> + Send + 'static,
    {
        self.set_portfolio_source(Arc::new(FnSource(getter))).await;
    }

    /// Run one phase check immediately for an externally observed value.
    pub async fn on_portfolio_value_update(
        &self,
        value: f64,
        reason: &str,
    ) -> (PhaseTransitionEvent, bool) {
        self.inner.process_value(value, reason).await
    }

    pub async fn get_current_phase(&self) -> Phase {
        self.inner.detector.get_current_phase().await
    }

    pub async fn get_current_strategy(&self) -> StrategyConfig {
        self.inner.active.read().await.strategy.clone()
    }

    pub async fn get_current_risk_params(&self) -> RiskParameters {
        self.inner.active.read().await.risk
    }

    /// Confidence-weighted size for the current phase.
    pub async fn calculate_position_size(&self, base_size: f64, confidence: f64) -> f64 {
        let phase = self.get_current_phase().await;
        let adapter = self.inner.adapter.read().await;
        CapitalScaler::new(&adapter).calculate_position_size(phase, base_size, confidence)
    }

    /// Capital-pool derived size for the current phase.
    pub async fn calculate_scaled_position_size(
        &self,
        total_capital: f64,
        confidence: f64,
        volatility: f64,
    ) -> f64 {
        let phase = self.get_current_phase().await;
        let adapter = self.inner.adapter.read().await;
        CapitalScaler::new(&adapter).calculate_scaled_position_size(
            phase,
            total_capital,
            confidence,
            volatility,
        )
    }

    pub async fn get_capital_allocation(&self, total_capital: f64) -> CapitalAllocation {
        let phase = self.get_current_phase().await;
        let adapter = self.inner.adapter.read().await;
        CapitalScaler::new(&adapter).get_capital_allocation(phase, total_capital)
    }

    /// Strict bound check against the current phase.
    pub async fn validate_position_size(&self, size: f64) -> Result<()> {
        let phase = self.get_current_phase().await;
        let adapter = self.inner.adapter.read().await;
        CapitalScaler::new(&adapter).validate_position_size(phase, size)
    }

    pub async fn register_phase_transition_handler<F>(&self, handler: F)
    where
        F: Fn(PhaseTransitionEvent) + Send + Sync + 'static,
    {
        self.inner.detector.register_transition_handler(handler).await;
    }

    /// Override the phase, bypassing hysteresis and dwell time.
    ///
    /// Accepts a [`Phase`], `u8` ordinal or phase name; conversion errors
    /// are returned unchanged.
    pub async fn force_phase<P>(&self, phase: P, reason: &str) -> Result<PhaseTransitionEvent>
    where
        P: TryInto<Phase>,
        PhaseError: From<P::Error>,
    {
        let event = {
            let mut active = self.inner.active.write().await;
            let event = self.inner.detector.set_phase(phase, reason).await?;
            let adapter = self.inner.adapter.read().await;
            *active = ActiveProfile {
                phase: event.to_phase,
                strategy: adapter.select_strategy(event.to_phase),
                risk: adapter.get_risk_params(event.to_phase),
            };
            event
        };

        self.inner.persist().await;
        Ok(event)
    }

    pub fn get_phase_for_value(&self, value: f64) -> Phase {
        self.inner.detector.get_phase_for_value(value)
    }

    pub async fn get_phase_duration(&self) -> std::time::Duration {
        self.inner.detector.get_phase_duration().await
    }

    pub async fn get_transition_history(&self) -> Vec<PhaseTransitionEvent> {
        self.inner.detector.get_transition_history().await
    }

    /// Replace a phase's strategy; the active snapshot follows if it is
    /// the current phase.
    pub async fn update_strategy_config(&self, phase: Phase, config: StrategyConfig) {
        self.inner
            .adapter
            .write()
            .await
            .update_strategy_config(phase, config);
        self.inner.refresh_active().await;
    }

    pub async fn update_risk_params(&self, phase: Phase, params: RiskParameters) {
        self.inner
            .adapter
            .write()
            .await
            .update_risk_params(phase, params);
        self.inner.refresh_active().await;
    }

    pub async fn get_all_strategies(&self) -> std::collections::HashMap<Phase, StrategyConfig> {
        self.inner.adapter.read().await.get_all_strategies()
    }

    pub async fn status(&self) -> PhaseStatus {
        let active = self.inner.active.read().await.clone();
        PhaseStatus {
            phase: active.phase,
            phase_duration_secs: self.get_phase_duration().await.as_secs(),
            strategy_name: active.strategy.name,
            strategy_type: active.strategy.strategy_type,
            transitions: self.get_transition_history().await.len(),
            running: self.is_running(),
        }
    }
}

impl Drop for PhaseManager {
    fn drop(&mut self) {
        self.stop_token.cancel();
    }
}

impl ManagerInner {
    async fn run(&self, ctx: CancellationToken, stop: CancellationToken) {
        // First check one full interval after start
        let period = self.config.check_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ctx.cancelled() => {
                    info!("Phase manager loop cancelled");
                    break;
                }
                _ = stop.cancelled() => {
                    debug!("Phase manager loop received stop signal");
                    break;
                }
                _ = ticker.tick() => self.check_phase().await,
            }
        }
    }

    /// One periodic check. Never fails; problems skip the tick.
    async fn check_phase(&self) {
        let source = self.source.read().await.clone();
        let Some(source) = source else {
            debug!("No portfolio value source configured, skipping phase check");
            return;
        };

        let value = match source.portfolio_value().await {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "Failed to get portfolio value, skipping phase check");
                return;
            }
        };

        self.process_value(value, "periodic check").await;
    }

    async fn process_value(&self, value: f64, reason: &str) -> (PhaseTransitionEvent, bool) {
        let (event, transitioned) = self.detector.attempt_transition(value, reason).await;
        if transitioned {
            self.refresh_active().await;
            self.persist().await;
        }
        (event, transitioned)
    }

    /// Re-select strategy and risk for the detector's current phase.
    async fn refresh_active(&self) {
        let mut active = self.active.write().await;
        let phase = self.detector.get_current_phase().await;
        let adapter = self.adapter.read().await;

        *active = ActiveProfile {
            phase,
            strategy: adapter.select_strategy(phase),
            risk: adapter.get_risk_params(phase),
        };

        debug!(
            phase = %phase,
            strategy = %active.strategy.name,
            "Active strategy refreshed"
        );
    }

    async fn persist(&self) {
        if let Err(e) = self.detector.save().await {
            warn!(error = %e, "Failed to save phase state");
        }
    }
}
