//! Zero Phase Library
//!
//! Adaptive strategy control for the Zero trading ecosystem. As a managed
//! portfolio grows or shrinks, the phase manager reclassifies its growth
//! phase and retunes strategy, risk limits and position sizing, without
//! flapping between phases on every price tick.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                         PhaseManager                                │
//! │         periodic loop  ·  on_portfolio_value_update  ·  getters     │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────┐     │
//! │  │  PhaseDetector  │  │ StrategyAdapter │  │  CapitalScaler  │     │
//! │  │  (hysteresis)   │  │ (phase tables)  │  │    (sizing)     │     │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────┘     │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Concepts
//!
//! ## Phases
//! - **Bootstrap** ≤ 10k, **Growth** ≤ 50k, **Scale** ≤ 200k, **Mature** above
//! - Each boundary belongs to the lower phase
//!
//! ## Hysteresis & dwell time
//! - A value must cross a boundary by `hysteresis` (default 5%) before the
//!   phase changes, in either direction
//! - No transition is considered until the phase has been active for
//!   `min_phase_duration` (default 24h)
//!
//! ## Observers
//! - Handlers registered on the manager run on their own tasks after every
//!   transition; a panicking handler is logged and isolated
//!
//! # Usage
//!
//! ```rust,no_run
//! use tokio_util::sync::CancellationToken;
//! use zero_common::config::Config;
//! use zero_phase::{PhaseManager, PhaseManagerConfig};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = Config::load_and_validate()?;
//! zero_common::logging::init_from_config(&config.observability);
//!
//! let manager = PhaseManager::new(PhaseManagerConfig::from_config(&config)?)?;
//! manager
//!     .set_portfolio_getter(|| async { Ok::<f64, anyhow::Error>(25_000.0) })
//!     .await;
//! manager
//!     .register_phase_transition_handler(|event| {
//!         tracing::info!(from = %event.from_phase, to = %event.to_phase, "rebalance");
//!     })
//!     .await;
//!
//! let shutdown = CancellationToken::new();
//! manager.start(shutdown.clone()).await?;
//! // ...
//! manager.stop().await;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod adapter;
pub mod config;
pub mod detector;
pub mod manager;
pub mod scaler;
pub mod store;
pub mod types;

pub use adapter::{PhaseProfile, StrategyAdapter, StrategyAdapterConfig};
pub use config::PhaseManagerConfig;
pub use detector::{PhaseDetector, PhaseDetectorConfig, TransitionHandler};
pub use manager::{PhaseManager, PhaseStatus, PortfolioValueSource};
pub use scaler::CapitalScaler;
pub use store::{NoopPhaseStore, PhaseSnapshot, PhaseStore};
pub use types::{
    parse_phase, AllocationConfig, CapitalAllocation, Phase, PhaseError, PhaseThresholds,
    PhaseTransitionEvent, PositionSizingRules, Result, RiskParameters, StrategyConfig,
    StrategyType,
};
