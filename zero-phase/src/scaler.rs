//! Capital scaler.
//!
//! Stateless sizing over a borrowed [`StrategyAdapter`]. Every sizing call
//! clamps into the phase's `[min_position_usd, max_position_usd]` range;
//! only [`CapitalScaler::validate_position_size`] reports out-of-range sizes
//! as errors.

use tracing::debug;

use crate::adapter::StrategyAdapter;
use crate::types::{CapitalAllocation, Phase, PhaseError, PositionSizingRules, Result};

/// Position sizing and capital allocation for a phase.
#[derive(Debug, Clone, Copy)]
pub struct CapitalScaler<'a> {
    adapter: &'a StrategyAdapter,
}

impl<'a> CapitalScaler<'a> {
    pub fn new(adapter: &'a StrategyAdapter) -> Self {
        Self { adapter }
    }

    /// Confidence-weighted position size.
    ///
    /// `weighted = confidence * weight + (1 - weight)`, so a weight of 0
    /// ignores confidence entirely and a weight of 1 scales linearly with it.
    pub fn calculate_position_size(&self, phase: Phase, base_size: f64, confidence: f64) -> f64 {
        let rules = self.adapter.get_position_sizing_rules(phase);
        let confidence = clamp_unit(confidence);

        let weighted = confidence * rules.confidence_weight + (1.0 - rules.confidence_weight);
        let size = base_size * rules.base_size_multiplier * weighted;

        clamp_to_rules(phase, size, &rules)
    }

    /// Split `total_capital` according to the phase's allocation.
    pub fn get_capital_allocation(&self, phase: Phase, total_capital: f64) -> CapitalAllocation {
        let alloc = self.adapter.get_allocation_config(phase);

        CapitalAllocation {
            phase,
            total_capital,
            primary_capital: total_capital * alloc.primary_strategy_pct / 100.0,
            secondary_capital: total_capital * alloc.secondary_strategy_pct / 100.0,
            reserve_capital: total_capital * alloc.reserve_pct / 100.0,
            primary_strategy_pct: alloc.primary_strategy_pct,
            secondary_strategy_pct: alloc.secondary_strategy_pct,
            reserve_pct: alloc.reserve_pct,
            max_concurrent_positions: alloc.max_concurrent_positions,
        }
    }

    /// Position size derived from the primary capital pool.
    ///
    /// The pool is split evenly across the phase's position slots, scaled by
    /// confidence and the base multiplier, and shrunk by `1 / (1 + volatility)`
    /// when the phase enables volatility adjustment.
    pub fn calculate_scaled_position_size(
        &self,
        phase: Phase,
        total_capital: f64,
        confidence: f64,
        volatility: f64,
    ) -> f64 {
        let rules = self.adapter.get_position_sizing_rules(phase);
        let alloc = self.adapter.get_allocation_config(phase);
        let confidence = clamp_unit(confidence);

        let available = total_capital * alloc.primary_strategy_pct / 100.0;
        let slots = alloc.max_concurrent_positions.max(1);
        let per_position = available / f64::from(slots);

        let mut size = per_position * confidence * rules.base_size_multiplier;
        if rules.volatility_adjustment && volatility > 0.0 {
            size *= 1.0 / (1.0 + volatility);
        }

        clamp_to_rules(phase, size, &rules)
    }

    pub fn get_max_position_size_for_phase(&self, phase: Phase) -> f64 {
        self.adapter.get_position_sizing_rules(phase).max_position_usd
    }

    pub fn get_min_position_size_for_phase(&self, phase: Phase) -> f64 {
        self.adapter.get_position_sizing_rules(phase).min_position_usd
    }

    /// Strict check: error when `size` lies outside the phase's bounds.
    /// Boundary values are accepted.
    pub fn validate_position_size(&self, phase: Phase, size: f64) -> Result<()> {
        let rules = self.adapter.get_position_sizing_rules(phase);

        if size < rules.min_position_usd {
            return Err(PhaseError::PositionBelowMinimum {
                phase,
                size,
                min: rules.min_position_usd,
            });
        }
        if size > rules.max_position_usd {
            return Err(PhaseError::PositionAboveMaximum {
                phase,
                size,
                max: rules.max_position_usd,
            });
        }
        Ok(())
    }
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

fn clamp_to_rules(phase: Phase, size: f64, rules: &PositionSizingRules) -> f64 {
    // NaN compares false everywhere; treat it as the minimum
    if size.is_nan() || size < rules.min_position_usd {
        debug!(
            phase = %phase,
            size,
            min = rules.min_position_usd,
            "Position size clamped to minimum"
        );
        return rules.min_position_usd;
    }
    if size > rules.max_position_usd {
        debug!(
            phase = %phase,
            size,
            max = rules.max_position_usd,
            "Position size clamped to maximum"
        );
        return rules.max_position_usd;
    }
    size
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn adapter() -> StrategyAdapter {
        StrategyAdapter::default()
    }

    #[test]
    fn test_confidence_weighting() {
        let adapter = adapter();
        let scaler = CapitalScaler::new(&adapter);

        // Growth: multiplier 1.5, weight 0.6
        // confidence 1.0 -> weighted 1.0 -> 100 * 1.5 = 150
        let full = scaler.calculate_position_size(Phase::Growth, 100.0, 1.0);
        assert!((full - 150.0).abs() < 1e-9);

        // confidence 0.5 -> weighted 0.3 + 0.4 = 0.7 -> 105
        let half = scaler.calculate_position_size(Phase::Growth, 100.0, 0.5);
        assert!((half - 105.0).abs() < 1e-9);
    }

    #[test]
    fn test_confidence_is_clamped() {
        let adapter = adapter();
        let scaler = CapitalScaler::new(&adapter);

        let over = scaler.calculate_position_size(Phase::Growth, 100.0, 7.0);
        let one = scaler.calculate_position_size(Phase::Growth, 100.0, 1.0);
        assert_eq!(over, one);

        let under = scaler.calculate_position_size(Phase::Growth, 100.0, -3.0);
        let zero = scaler.calculate_position_size(Phase::Growth, 100.0, 0.0);
        assert_eq!(under, zero);
    }

    #[test]
    fn test_position_size_clamped_to_bounds() {
        let adapter = adapter();
        let scaler = CapitalScaler::new(&adapter);

        assert_eq!(scaler.calculate_position_size(Phase::Bootstrap, 0.0, 0.5), 10.0);
        assert_eq!(
            scaler.calculate_position_size(Phase::Bootstrap, 1_000_000.0, 1.0),
            500.0
        );
    }

    #[test]
    fn test_capital_allocation() {
        let adapter = adapter();
        let scaler = CapitalScaler::new(&adapter);

        let alloc = scaler.get_capital_allocation(Phase::Bootstrap, 10_000.0);
        assert!((alloc.primary_capital - 7_000.0).abs() < 1e-9);
        assert!((alloc.secondary_capital - 2_000.0).abs() < 1e-9);
        assert!((alloc.reserve_capital - 1_000.0).abs() < 1e-9);
        assert_eq!(alloc.primary_strategy_pct, 70.0);
        assert_eq!(alloc.max_concurrent_positions, 3);
    }

    #[test]
    fn test_scaled_position_size_volatility() {
        let adapter = adapter();
        let scaler = CapitalScaler::new(&adapter);

        // Scale: 55% primary over 8 slots, multiplier 2.0
        // 100k -> 55k / 8 = 6875 * 0.5 * 2.0 = 6875
        let calm = scaler.calculate_scaled_position_size(Phase::Scale, 100_000.0, 0.5, 0.0);
        assert!((calm - 6_875.0).abs() < 1e-9);

        let volatile = scaler.calculate_scaled_position_size(Phase::Scale, 100_000.0, 0.5, 1.0);
        assert!((volatile - 3_437.5).abs() < 1e-9);
    }

    #[test]
    fn test_scaled_position_size_ignores_volatility_when_disabled() {
        let mut adapter = adapter();
        let mut rules = adapter.get_position_sizing_rules(Phase::Scale);
        rules.volatility_adjustment = false;
        adapter
            .update_position_sizing_rules(Phase::Scale, rules)
            .unwrap();
        let scaler = CapitalScaler::new(&adapter);

        let a = scaler.calculate_scaled_position_size(Phase::Scale, 100_000.0, 0.5, 0.0);
        let b = scaler.calculate_scaled_position_size(Phase::Scale, 100_000.0, 0.5, 3.0);
        assert_eq!(a, b);
    }

    #[test]
    fn test_validate_position_size() {
        let adapter = adapter();
        let scaler = CapitalScaler::new(&adapter);

        assert!(scaler.validate_position_size(Phase::Growth, 50.0).is_ok());
        assert!(scaler.validate_position_size(Phase::Growth, 2_500.0).is_ok());
        assert!(matches!(
            scaler.validate_position_size(Phase::Growth, 49.99),
            Err(PhaseError::PositionBelowMinimum { .. })
        ));
        assert!(matches!(
            scaler.validate_position_size(Phase::Growth, 2_500.01),
            Err(PhaseError::PositionAboveMaximum { .. })
        ));
    }

    #[test]
    fn test_min_max_accessors() {
        let adapter = adapter();
        let scaler = CapitalScaler::new(&adapter);
        assert_eq!(scaler.get_min_position_size_for_phase(Phase::Mature), 250.0);
        assert_eq!(scaler.get_max_position_size_for_phase(Phase::Mature), 25_000.0);
    }

    proptest! {
        #[test]
        fn prop_position_size_within_bounds(
            phase_idx in 0u8..4,
            base in 0.0f64..10_000_000.0,
            confidence in 0.0f64..=1.0,
        ) {
            let adapter = StrategyAdapter::default();
            let scaler = CapitalScaler::new(&adapter);
            let phase = Phase::try_from(phase_idx).unwrap();

            let size = scaler.calculate_position_size(phase, base, confidence);
            prop_assert!(size >= scaler.get_min_position_size_for_phase(phase));
            prop_assert!(size <= scaler.get_max_position_size_for_phase(phase));
            prop_assert!(scaler.validate_position_size(phase, size).is_ok());
        }

        #[test]
        fn prop_scaled_size_within_bounds(
            phase_idx in 0u8..4,
            capital in 0.0f64..100_000_000.0,
            confidence in 0.0f64..=1.0,
            volatility in 0.0f64..10.0,
        ) {
            let adapter = StrategyAdapter::default();
            let scaler = CapitalScaler::new(&adapter);
            let phase = Phase::try_from(phase_idx).unwrap();

            let size = scaler.calculate_scaled_position_size(phase, capital, confidence, volatility);
            prop_assert!(scaler.validate_position_size(phase, size).is_ok());
        }
    }
}
