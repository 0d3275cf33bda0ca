//! Strategy adapter: phase-keyed lookup of strategy, risk, sizing and
//! allocation configuration.
//!
//! The adapter owns the four tables exclusively. It is not synchronized
//! internally; [`crate::PhaseManager`] is the sole mutator and serializes
//! access behind its own lock.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::types::{
    AllocationConfig, Phase, PhaseError, PositionSizingRules, Result, RiskParameters,
    StrategyConfig, StrategyType,
};

/// Tolerance when checking that allocation percentages sum to 100.
const ALLOCATION_TOLERANCE_PCT: f64 = 0.01;

// ============================================================================
// Configuration
// ============================================================================

/// Complete configuration for one phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseProfile {
    pub strategy: StrategyConfig,
    pub risk: RiskParameters,
    pub sizing: PositionSizingRules,
    pub allocation: AllocationConfig,
}

/// Adapter configuration: one profile per phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyAdapterConfig {
    pub bootstrap: PhaseProfile,
    pub growth: PhaseProfile,
    pub scale: PhaseProfile,
    pub mature: PhaseProfile,
}

impl StrategyAdapterConfig {
    pub fn profile(&self, phase: Phase) -> &PhaseProfile {
        match phase {
            Phase::Bootstrap => &self.bootstrap,
            Phase::Growth => &self.growth,
            Phase::Scale => &self.scale,
            Phase::Mature => &self.mature,
        }
    }
}

impl Default for StrategyAdapterConfig {
    fn default() -> Self {
        Self {
            bootstrap: default_bootstrap_profile(),
            growth: default_growth_profile(),
            scale: default_scale_profile(),
            mature: default_mature_profile(),
        }
    }
}

fn default_bootstrap_profile() -> PhaseProfile {
    PhaseProfile {
        strategy: StrategyConfig {
            strategy_type: StrategyType::Conservative,
            name: "Capital Preservation".to_string(),
            max_concurrent_positions: 3,
            max_exposure_pct: 30.0,
            min_signal_confidence: 0.8,
            max_hold_time: Duration::from_secs(4 * 3600),
            rebalance_interval: Duration::from_secs(3600),
        },
        risk: RiskParameters {
            max_daily_loss_pct: 2.0,
            max_position_loss_pct: 1.0,
            max_drawdown_pct: 5.0,
            stop_loss_pct: 1.0,
            take_profit_pct: 2.0,
            risk_per_trade_pct: 0.5,
        },
        sizing: PositionSizingRules {
            base_size_multiplier: 1.0,
            confidence_weight: 0.5,
            volatility_adjustment: true,
            min_position_usd: 10.0,
            max_position_usd: 500.0,
        },
        allocation: AllocationConfig {
            primary_strategy_pct: 70.0,
            secondary_strategy_pct: 20.0,
            reserve_pct: 10.0,
            max_concurrent_positions: 3,
        },
    }
}

fn default_growth_profile() -> PhaseProfile {
    PhaseProfile {
        strategy: StrategyConfig {
            strategy_type: StrategyType::Moderate,
            name: "Balanced Growth".to_string(),
            max_concurrent_positions: 5,
            max_exposure_pct: 50.0,
            min_signal_confidence: 0.7,
            max_hold_time: Duration::from_secs(12 * 3600),
            rebalance_interval: Duration::from_secs(30 * 60),
        },
        risk: RiskParameters {
            max_daily_loss_pct: 3.0,
            max_position_loss_pct: 1.5,
            max_drawdown_pct: 10.0,
            stop_loss_pct: 1.5,
            take_profit_pct: 3.0,
            risk_per_trade_pct: 1.0,
        },
        sizing: PositionSizingRules {
            base_size_multiplier: 1.5,
            confidence_weight: 0.6,
            volatility_adjustment: true,
            min_position_usd: 50.0,
            max_position_usd: 2_500.0,
        },
        allocation: AllocationConfig {
            primary_strategy_pct: 60.0,
            secondary_strategy_pct: 25.0,
            reserve_pct: 15.0,
            max_concurrent_positions: 5,
        },
    }
}

fn default_scale_profile() -> PhaseProfile {
    PhaseProfile {
        strategy: StrategyConfig {
            strategy_type: StrategyType::Aggressive,
            name: "Scaled Expansion".to_string(),
            max_concurrent_positions: 8,
            max_exposure_pct: 70.0,
            min_signal_confidence: 0.65,
            max_hold_time: Duration::from_secs(24 * 3600),
            rebalance_interval: Duration::from_secs(15 * 60),
        },
        risk: RiskParameters {
            max_daily_loss_pct: 4.0,
            max_position_loss_pct: 2.0,
            max_drawdown_pct: 15.0,
            stop_loss_pct: 2.0,
            take_profit_pct: 4.0,
            risk_per_trade_pct: 1.5,
        },
        sizing: PositionSizingRules {
            base_size_multiplier: 2.0,
            confidence_weight: 0.7,
            volatility_adjustment: true,
            min_position_usd: 100.0,
            max_position_usd: 10_000.0,
        },
        allocation: AllocationConfig {
            primary_strategy_pct: 55.0,
            secondary_strategy_pct: 30.0,
            reserve_pct: 15.0,
            max_concurrent_positions: 8,
        },
    }
}

fn default_mature_profile() -> PhaseProfile {
    PhaseProfile {
        strategy: StrategyConfig {
            strategy_type: StrategyType::Conservative,
            name: "Institutional".to_string(),
            max_concurrent_positions: 12,
            max_exposure_pct: 60.0,
            min_signal_confidence: 0.75,
            max_hold_time: Duration::from_secs(48 * 3600),
            rebalance_interval: Duration::from_secs(3600),
        },
        risk: RiskParameters {
            max_daily_loss_pct: 2.5,
            max_position_loss_pct: 1.5,
            max_drawdown_pct: 10.0,
            stop_loss_pct: 1.5,
            take_profit_pct: 3.0,
            risk_per_trade_pct: 1.0,
        },
        sizing: PositionSizingRules {
            base_size_multiplier: 2.5,
            confidence_weight: 0.8,
            volatility_adjustment: true,
            min_position_usd: 250.0,
            max_position_usd: 25_000.0,
        },
        allocation: AllocationConfig {
            primary_strategy_pct: 50.0,
            secondary_strategy_pct: 30.0,
            reserve_pct: 20.0,
            max_concurrent_positions: 12,
        },
    }
}

fn validate_allocation(phase: Phase, allocation: &AllocationConfig) -> Result<()> {
    let negative = allocation.primary_strategy_pct < 0.0
        || allocation.secondary_strategy_pct < 0.0
        || allocation.reserve_pct < 0.0;
    let total = allocation.total_pct();
    if negative || (total - 100.0).abs() > ALLOCATION_TOLERANCE_PCT {
        return Err(PhaseError::InvalidAllocation { phase, total });
    }
    Ok(())
}

fn validate_sizing(phase: Phase, sizing: &PositionSizingRules) -> Result<()> {
    if sizing.min_position_usd < 0.0 || sizing.min_position_usd > sizing.max_position_usd {
        return Err(PhaseError::InvalidConfig(format!(
            "phase {}: min_position_usd {} must be in [0, max_position_usd {}]",
            phase, sizing.min_position_usd, sizing.max_position_usd
        )));
    }
    if !(0.0..=1.0).contains(&sizing.confidence_weight) {
        return Err(PhaseError::InvalidConfig(format!(
            "phase {}: confidence_weight {} must be in [0, 1]",
            phase, sizing.confidence_weight
        )));
    }
    Ok(())
}

// ============================================================================
// Strategy Adapter
// ============================================================================

/// Phase-keyed configuration tables.
#[derive(Debug, Clone)]
pub struct StrategyAdapter {
    strategies: HashMap<Phase, StrategyConfig>,
    risk_params: HashMap<Phase, RiskParameters>,
    sizing_rules: HashMap<Phase, PositionSizingRules>,
    allocations: HashMap<Phase, AllocationConfig>,
}

impl StrategyAdapter {
    /// Build the tables, one entry per phase.
    ///
    /// Rejects allocations that do not sum to 100% and inverted sizing bounds.
    pub fn new(config: StrategyAdapterConfig) -> Result<Self> {
        for phase in Phase::all() {
            let profile = config.profile(phase);
            validate_allocation(phase, &profile.allocation)?;
            validate_sizing(phase, &profile.sizing)?;
        }

        let adapter = Self::populate(config);
        debug!(phases = adapter.strategies.len(), "Strategy adapter initialized");
        Ok(adapter)
    }

    fn populate(config: StrategyAdapterConfig) -> Self {
        let mut adapter = Self {
            strategies: HashMap::with_capacity(4),
            risk_params: HashMap::with_capacity(4),
            sizing_rules: HashMap::with_capacity(4),
            allocations: HashMap::with_capacity(4),
        };
        for phase in Phase::all() {
            let profile = config.profile(phase).clone();
            adapter.strategies.insert(phase, profile.strategy);
            adapter.risk_params.insert(phase, profile.risk);
            adapter.sizing_rules.insert(phase, profile.sizing);
            adapter.allocations.insert(phase, profile.allocation);
        }
        adapter
    }

    /// Strategy for `phase`, falling back to Bootstrap.
    pub fn select_strategy(&self, phase: Phase) -> StrategyConfig {
        lookup(&self.strategies, phase, "strategy").clone()
    }

    pub fn get_risk_params(&self, phase: Phase) -> RiskParameters {
        *lookup(&self.risk_params, phase, "risk")
    }

    pub fn get_position_sizing_rules(&self, phase: Phase) -> PositionSizingRules {
        *lookup(&self.sizing_rules, phase, "sizing")
    }

    pub fn get_allocation_config(&self, phase: Phase) -> AllocationConfig {
        *lookup(&self.allocations, phase, "allocation")
    }

    /// Replace the strategy for a single phase.
    pub fn update_strategy_config(&mut self, phase: Phase, config: StrategyConfig) {
        info!(phase = %phase, strategy = %config.name, "Updated strategy config");
        self.strategies.insert(phase, config);
    }

    /// Replace the risk parameters for a single phase.
    pub fn update_risk_params(&mut self, phase: Phase, params: RiskParameters) {
        info!(phase = %phase, "Updated risk parameters");
        self.risk_params.insert(phase, params);
    }

    /// Replace the sizing rules for a single phase.
    pub fn update_position_sizing_rules(
        &mut self,
        phase: Phase,
        rules: PositionSizingRules,
    ) -> Result<()> {
        validate_sizing(phase, &rules)?;
        info!(phase = %phase, "Updated position sizing rules");
        self.sizing_rules.insert(phase, rules);
        Ok(())
    }

    /// Replace the capital allocation for a single phase.
    pub fn update_allocation_config(
        &mut self,
        phase: Phase,
        allocation: AllocationConfig,
    ) -> Result<()> {
        validate_allocation(phase, &allocation)?;
        info!(phase = %phase, "Updated allocation config");
        self.allocations.insert(phase, allocation);
        Ok(())
    }

    /// Copy of the full strategy table.
    pub fn get_all_strategies(&self) -> HashMap<Phase, StrategyConfig> {
        self.strategies.clone()
    }
}

impl Default for StrategyAdapter {
    /// Built-in tables; the defaults are known to be valid.
    fn default() -> Self {
        Self::populate(StrategyAdapterConfig::default())
    }
}

/// Entry for `phase`, or the Bootstrap entry when absent.
///
/// Tables are fully populated on construction, so the fallback only guards
/// against future removal APIs.
fn lookup<'a, T>(table: &'a HashMap<Phase, T>, phase: Phase, kind: &'static str) -> &'a T {
    if let Some(entry) = table.get(&phase) {
        return entry;
    }
    warn!(phase = %phase, table = kind, "Missing phase entry, falling back to bootstrap");
    table
        .get(&Phase::Bootstrap)
        .or_else(|| table.values().next())
        .unwrap_or_else(|| unreachable!("{} table is populated for every phase", kind))
}
