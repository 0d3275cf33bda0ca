//! Phase model: the growth phase ordinal, thresholds, transition events and
//! the per-phase configuration values.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

// ============================================================================
// Phase
// ============================================================================

/// Portfolio growth phase.
///
/// Ordering is meaningful: a transition to a greater phase is an upgrade
/// (the portfolio is growing), to a lesser one a downgrade.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Phase {
    /// Small account, capital preservation first
    #[default]
    Bootstrap = 0,
    /// Account is compounding
    Growth = 1,
    /// Account large enough to run several strategies at size
    Scale = 2,
    /// Large account, drawdown control dominates
    Mature = 3,
}

impl Phase {
    /// All phases in ascending order.
    pub const fn all() -> [Phase; 4] {
        [Phase::Bootstrap, Phase::Growth, Phase::Scale, Phase::Mature]
    }

    /// Ordinal value (0 = Bootstrap).
    pub const fn ordinal(self) -> u8 {
        self as u8
    }

    /// Lowercase name used for serialization and display.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Bootstrap => "bootstrap",
            Self::Growth => "growth",
            Self::Scale => "scale",
            Self::Mature => "mature",
        }
    }

    /// Stringify a raw ordinal, `"unknown"` when out of range.
    pub fn name_for_ordinal(ordinal: u8) -> &'static str {
        Phase::try_from(ordinal).map_or("unknown", Phase::name)
    }

    /// The next phase up, if any.
    pub fn next(self) -> Option<Phase> {
        Phase::try_from(self.ordinal() + 1).ok()
    }

    /// The next phase down, if any.
    pub fn previous(self) -> Option<Phase> {
        self.ordinal().checked_sub(1).and_then(|o| Phase::try_from(o).ok())
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<u8> for Phase {
    type Error = PhaseError;

    fn try_from(ordinal: u8) -> std::result::Result<Self, Self::Error> {
        match ordinal {
            0 => Ok(Self::Bootstrap),
            1 => Ok(Self::Growth),
            2 => Ok(Self::Scale),
            3 => Ok(Self::Mature),
            other => Err(PhaseError::InvalidPhase(other)),
        }
    }
}

impl FromStr for Phase {
    type Err = PhaseError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "bootstrap" => Ok(Self::Bootstrap),
            "growth" => Ok(Self::Growth),
            "scale" => Ok(Self::Scale),
            "mature" => Ok(Self::Mature),
            other => Err(PhaseError::UnknownPhase(other.to_string())),
        }
    }
}

impl TryFrom<&str> for Phase {
    type Error = PhaseError;

    fn try_from(s: &str) -> std::result::Result<Self, Self::Error> {
        s.parse()
    }
}

/// Parse a phase from its lowercase name.
pub fn parse_phase(s: &str) -> Result<Phase> {
    s.parse()
}

// ============================================================================
// Errors
// ============================================================================

/// Errors raised by the phase management core.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PhaseError {
    #[error("invalid phase ordinal {0}: must be between 0 and 3")]
    InvalidPhase(u8),

    #[error("unknown phase: {0}")]
    UnknownPhase(String),

    #[error(
        "phase thresholds must be strictly increasing and positive \
         (bootstrap_max={bootstrap_max}, growth_max={growth_max}, scale_max={scale_max})"
    )]
    InvalidThresholds {
        bootstrap_max: f64,
        growth_max: f64,
        scale_max: f64,
    },

    #[error("allocation for phase {phase} must sum to 100%, got {total:.2}%")]
    InvalidAllocation { phase: Phase, total: f64 },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("position size {size:.2} below minimum {min:.2} for phase {phase}")]
    PositionBelowMinimum { phase: Phase, size: f64, min: f64 },

    #[error("position size {size:.2} above maximum {max:.2} for phase {phase}")]
    PositionAboveMaximum { phase: Phase, size: f64, max: f64 },

    #[error("phase store error: {0}")]
    Store(String),
}

impl From<Infallible> for PhaseError {
    fn from(never: Infallible) -> Self {
        match never {}
    }
}

/// Result alias for the phase core.
pub type Result<T> = std::result::Result<T, PhaseError>;

// ============================================================================
// Thresholds & Events
// ============================================================================

/// Phase boundaries. Each boundary belongs to the lower phase.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhaseThresholds {
    /// Upper bound of Bootstrap (inclusive)
    pub bootstrap_max: f64,
    /// Upper bound of Growth (inclusive)
    pub growth_max: f64,
    /// Upper bound of Scale (inclusive); Mature is unbounded above
    pub scale_max: f64,
}

impl Default for PhaseThresholds {
    fn default() -> Self {
        Self {
            bootstrap_max: 10_000.0,
            growth_max: 50_000.0,
            scale_max: 200_000.0,
        }
    }
}

impl PhaseThresholds {
    /// Reject non-positive or non-increasing boundaries.
    pub fn validate(&self) -> Result<()> {
        let ordered = self.bootstrap_max > 0.0
            && self.bootstrap_max < self.growth_max
            && self.growth_max < self.scale_max;
        if ordered && self.scale_max.is_finite() {
            Ok(())
        } else {
            Err(PhaseError::InvalidThresholds {
                bootstrap_max: self.bootstrap_max,
                growth_max: self.growth_max,
                scale_max: self.scale_max,
            })
        }
    }

    /// Boundary separating `phase` from the phase above it.
    /// `None` for Mature.
    pub fn upper_bound(&self, phase: Phase) -> Option<f64> {
        match phase {
            Phase::Bootstrap => Some(self.bootstrap_max),
            Phase::Growth => Some(self.growth_max),
            Phase::Scale => Some(self.scale_max),
            Phase::Mature => None,
        }
    }

    /// Boundary separating `phase` from the phase below it.
    /// `None` for Bootstrap.
    pub fn lower_bound(&self, phase: Phase) -> Option<f64> {
        phase.previous().and_then(|p| self.upper_bound(p))
    }
}

/// Immutable record of one phase transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseTransitionEvent {
    pub from_phase: Phase,
    pub to_phase: Phase,
    /// Portfolio value that triggered the transition
    pub portfolio_value: f64,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
}

impl PhaseTransitionEvent {
    pub fn new(from_phase: Phase, to_phase: Phase, portfolio_value: f64, reason: &str) -> Self {
        Self {
            from_phase,
            to_phase,
            portfolio_value,
            timestamp: Utc::now(),
            reason: reason.to_string(),
        }
    }

    pub fn is_upgrade(&self) -> bool {
        self.to_phase > self.from_phase
    }

    pub fn is_downgrade(&self) -> bool {
        self.to_phase < self.from_phase
    }
}

impl Default for PhaseTransitionEvent {
    fn default() -> Self {
        Self {
            from_phase: Phase::Bootstrap,
            to_phase: Phase::Bootstrap,
            portfolio_value: 0.0,
            timestamp: DateTime::<Utc>::UNIX_EPOCH,
            reason: String::new(),
        }
    }
}

// ============================================================================
// Per-phase configuration values
// ============================================================================

/// Trading aggressiveness of a strategy profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyType {
    Conservative,
    Moderate,
    Aggressive,
}

impl fmt::Display for StrategyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Conservative => write!(f, "conservative"),
            Self::Moderate => write!(f, "moderate"),
            Self::Aggressive => write!(f, "aggressive"),
        }
    }
}

/// Trading behavior for a phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub strategy_type: StrategyType,
    pub name: String,
    pub max_concurrent_positions: u32,
    /// Maximum total exposure as a percentage of portfolio value
    pub max_exposure_pct: f64,
    /// Signals below this confidence (0-1) are ignored
    pub min_signal_confidence: f64,
    #[serde(with = "duration_secs")]
    pub max_hold_time: Duration,
    #[serde(with = "duration_secs")]
    pub rebalance_interval: Duration,
}

/// Risk envelope for a phase. All values are percentages.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskParameters {
    pub max_daily_loss_pct: f64,
    pub max_position_loss_pct: f64,
    pub max_drawdown_pct: f64,
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
    pub risk_per_trade_pct: f64,
}

/// Position sizing inputs for a phase.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionSizingRules {
    pub base_size_multiplier: f64,
    /// How strongly confidence scales the size (0 = flat, 1 = fully confidence driven)
    pub confidence_weight: f64,
    pub volatility_adjustment: bool,
    pub min_position_usd: f64,
    pub max_position_usd: f64,
}

/// Capital split for a phase.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AllocationConfig {
    pub primary_strategy_pct: f64,
    pub secondary_strategy_pct: f64,
    pub reserve_pct: f64,
    /// Used to derive the per-position ceiling
    pub max_concurrent_positions: u32,
}

impl AllocationConfig {
    pub fn total_pct(&self) -> f64 {
        self.primary_strategy_pct + self.secondary_strategy_pct + self.reserve_pct
    }
}

/// Absolute capital breakdown computed from an [`AllocationConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CapitalAllocation {
    pub phase: Phase,
    pub total_capital: f64,
    pub primary_capital: f64,
    pub secondary_capital: f64,
    pub reserve_capital: f64,
    pub primary_strategy_pct: f64,
    pub secondary_strategy_pct: f64,
    pub reserve_pct: f64,
    pub max_concurrent_positions: u32,
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}
