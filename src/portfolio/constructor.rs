//! Five-stage portfolio construction.
//!
//! 1. flatten strategy weights per instrument
//! 2. risk-parity base (equal weights when the returns history is unusable)
//! 3. conviction overlay, gross preserving
//! 4. conflict dampening per asset class
//! 5. regime scaling through the transition ramp
//!
//! The constructor is the one stateful component in the pipeline: each
//! instance owns the regime ramp for one book and must be fed trading dates
//! in order.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::covariance::ledoit_wolf;
use super::regime::{Regime, RegimeState};
use super::risk_parity::{equal_weights, RiskParityOptimizer};
use crate::config::{ConstructorConfig, DAMPENING_RANGE, TRANSITION_DAYS_RANGE};
use crate::signal::resolve_strategy_class;
use crate::utils::types::{
    AssetClass, AssetClassMap, ConflictMap, Position, StrategyPositions, Weights, WEIGHT_EPSILON,
};

/// Output of one construction call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioTarget {
    /// Net strategy weight per instrument
    pub flattened_weights: Weights,
    /// Signed risk-parity base, before the conviction overlay
    pub risk_parity_weights: Weights,
    /// After conviction and dampening, before regime scaling
    pub pre_regime_weights: Weights,
    pub weights: Weights,
    pub regime: Regime,
    /// Scale actually applied (interpolated mid-transition)
    pub regime_scale: f64,
    pub conflicts: ConflictMap,
    /// True when equal weights stood in for the optimizer
    pub risk_parity_fallback: bool,
}

impl PortfolioTarget {
    /// Sum of |w| over the final weights
    pub fn gross_exposure(&self) -> f64 {
        self.weights.values().map(|w| w.abs()).sum()
    }
}

/// Instrument with its net weight and the positions that produced it
struct FlatInstrument<'a> {
    net: f64,
    contributors: Vec<&'a Position>,
}

pub struct PortfolioConstructor {
    config: ConstructorConfig,
    regime: RegimeState,
    instrument_classes: Option<AssetClassMap>,
    strategy_classes: Option<AssetClassMap>,
}

impl Default for PortfolioConstructor {
    fn default() -> Self {
        Self::new(ConstructorConfig::default())
    }
}

impl PortfolioConstructor {
    /// Build a constructor; the dampening factor and transition length are
    /// clamped into their lock ranges.
    pub fn new(mut config: ConstructorConfig) -> Self {
        let (lo, hi) = DAMPENING_RANGE;
        if !(lo..=hi).contains(&config.dampening_factor) {
            let clamped = if config.dampening_factor.is_finite() {
                config.dampening_factor.clamp(lo, hi)
            } else {
                lo
            };
            warn!("dampening_factor {} outside [{}, {}], using {}", config.dampening_factor, lo, hi, clamped);
            config.dampening_factor = clamped;
        }
        let (dlo, dhi) = TRANSITION_DAYS_RANGE;
        if !(dlo..=dhi).contains(&config.transition_days) {
            let clamped = config.transition_days.clamp(dlo, dhi);
            warn!("transition_days {} outside [{}, {}], using {}", config.transition_days, dlo, dhi, clamped);
            config.transition_days = clamped;
        }
        Self { config, regime: RegimeState::default(), instrument_classes: None, strategy_classes: None }
    }

    /// Explicit instrument → asset-class lookup used for dampening
    pub fn with_instrument_classes(mut self, classes: AssetClassMap) -> Self {
        self.instrument_classes = Some(classes);
        self
    }

    /// Strategy id → asset-class overrides, consulted before the id prefix
    pub fn with_strategy_classes(mut self, classes: AssetClassMap) -> Self {
        self.strategy_classes = Some(classes);
        self
    }

    /// Resume a ramp persisted by an earlier run
    pub fn with_regime_state(mut self, state: RegimeState) -> Self {
        self.regime = state;
        self
    }

    pub fn regime_state(&self) -> RegimeState {
        self.regime
    }

    pub fn config(&self) -> &ConstructorConfig {
        &self.config
    }

    /// Run all five stages for one trading date and advance the regime ramp.
    ///
    /// `returns` is row-major `observations × instruments`, its columns named
    /// by `instruments`. Missing, short or misaligned history falls back to
    /// equal weights; nothing here fails.
    pub fn construct(
        &mut self, positions: &StrategyPositions, returns: Option<&[Vec<f64>]>,
        instruments: Option<&[String]>, regime_score: f64, conflicts: &ConflictMap,
    ) -> PortfolioTarget {
        // 1. flatten
        let flat = flatten(positions);
        let flattened_weights: Weights = flat.iter().map(|(k, f)| (k.clone(), f.net)).collect();
        let names: Vec<&String> = flat.keys().collect();

        // 2. risk-parity base
        let (base, risk_parity_fallback) = match self.risk_parity_base(&names, returns, instruments) {
            | Some(w) => (w, false),
            | None => (equal_weights(names.len()), true),
        };
        let risk_parity_weights: Weights = names
            .iter()
            .zip(&base)
            .map(|(name, w)| (name.to_string(), w * sign(flat[*name].net)))
            .collect();

        // 3. conviction overlay
        let mut weights = self.apply_conviction(&flat, &risk_parity_weights);

        // 4. conflict dampening
        for (instrument, w) in weights.iter_mut() {
            let Some(class) = self.instrument_class(instrument, &flat[instrument].contributors) else {
                continue;
            };
            if conflicts.get(&class).is_some_and(|d| !d.is_empty()) {
                debug!("dampening {} ({}) by {:.2}", instrument, class, self.config.dampening_factor);
                *w *= self.config.dampening_factor;
            }
        }
        let pre_regime_weights = weights.clone();

        // 5. regime scaling
        let (next, regime_scale) = self.regime.step(regime_score, self.config.transition_days);
        if next.target_regime.is_some() || next.committed_regime != self.regime.committed_regime {
            info!(
                "regime score {:.3}: {} -> scale {:.3}",
                regime_score,
                Regime::from_score(regime_score),
                regime_scale
            );
        }
        self.regime = next;
        for w in weights.values_mut() {
            *w *= regime_scale;
        }

        PortfolioTarget {
            flattened_weights,
            risk_parity_weights,
            pre_regime_weights,
            weights,
            regime: Regime::from_score(regime_score),
            regime_scale,
            conflicts: conflicts.clone(),
            risk_parity_fallback,
        }
    }

    /// Optimizer weights in `names` order, or `None` to fall back.
    fn risk_parity_base(
        &self, names: &[&String], returns: Option<&[Vec<f64>]>, instruments: Option<&[String]>,
    ) -> Option<Vec<f64>> {
        let (returns, instruments) = (returns?, instruments?);
        if names.is_empty() {
            return None;
        }
        if returns.len() < self.config.min_observations {
            debug!(
                "{} return observations < {}, using equal weights",
                returns.len(),
                self.config.min_observations
            );
            return None;
        }
        if returns.iter().any(|row| row.len() != instruments.len()) {
            debug!("returns matrix does not match {} instrument names", instruments.len());
            return None;
        }
        let columns: Vec<usize> = names
            .iter()
            .map(|name| instruments.iter().position(|i| i == *name))
            .collect::<Option<_>>()?;
        let aligned: Vec<Vec<f64>> =
            returns.iter().map(|row| columns.iter().map(|c| row[*c]).collect()).collect();

        let cov = ledoit_wolf(&aligned)?;
        debug!("ledoit-wolf shrinkage {:.4}", cov.shrinkage);
        match RiskParityOptimizer::new(self.config.max_iterations).solve(&cov.matrix) {
            | Some(solution) => Some(solution.weights),
            | None => {
                warn!(
                    "risk parity did not converge within {} iterations, using equal weights",
                    self.config.max_iterations
                );
                None
            }
        }
    }

    fn apply_conviction(&self, flat: &BTreeMap<String, FlatInstrument<'_>>, base: &Weights) -> Weights {
        let gross_before: f64 = base.values().map(|w| w.abs()).sum();
        let mut weights: Weights = base
            .iter()
            .map(|(name, w)| {
                let conviction = average_conviction(&flat[name].contributors).max(self.config.conviction_floor);
                (name.clone(), w * conviction)
            })
            .collect();
        let gross_after: f64 = weights.values().map(|w| w.abs()).sum();
        if gross_after > WEIGHT_EPSILON {
            let k = gross_before / gross_after;
            weights.values_mut().for_each(|w| *w *= k);
        }
        weights
    }

    /// Explicit instrument map first, then the first contributing strategy that resolves.
    fn instrument_class(&self, instrument: &str, contributors: &[&Position]) -> Option<AssetClass> {
        if let Some(class) = self.instrument_classes.as_ref().and_then(|m| m.get(instrument)) {
            return Some(*class);
        }
        contributors
            .iter()
            .find_map(|p| resolve_strategy_class(&p.strategy_id, self.strategy_classes.as_ref()))
    }
}

fn flatten(positions: &StrategyPositions) -> BTreeMap<String, FlatInstrument<'_>> {
    let mut flat: BTreeMap<String, FlatInstrument<'_>> = BTreeMap::new();
    for list in positions.values() {
        for pos in list {
            let entry = flat
                .entry(pos.instrument.clone())
                .or_insert_with(|| FlatInstrument { net: 0.0, contributors: Vec::new() });
            entry.net += pos.weight;
            entry.contributors.push(pos);
        }
    }
    flat
}

/// Mean of confidence × strength multiplier; unknown buckets count as zero.
/// Confidence is clamped to [0, 1] and non-finite values are skipped.
fn average_conviction(contributors: &[&Position]) -> f64 {
    let scores: Vec<f64> = contributors
        .iter()
        .filter(|p| p.confidence.is_finite())
        .map(|p| p.confidence.clamp(0.0, 1.0) * p.strength().map(|s| s.multiplier()).unwrap_or(0.0))
        .collect();
    if scores.is_empty() {
        return 0.0;
    }
    scores.iter().sum::<f64>() / scores.len() as f64
}

fn sign(net: f64) -> f64 {
    if net > WEIGHT_EPSILON {
        1.0
    } else if net < -WEIGHT_EPSILON {
        -1.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::types::Direction;
    use std::collections::HashMap;

    fn pos(strategy: &str, instrument: &str, weight: f64, confidence: f64, strength: &str) -> Position {
        let direction = if weight >= 0.0 { Direction::Long } else { Direction::Short };
        Position::new(strategy, instrument, weight, direction, confidence).with_strength(strength)
    }

    fn book(list: Vec<Position>) -> StrategyPositions {
        let mut book = StrategyPositions::new();
        for p in list {
            book.entry(p.strategy_id.clone()).or_default().push(p);
        }
        book
    }

    fn two_vol_returns(rows: usize) -> (Vec<Vec<f64>>, Vec<String>) {
        let returns = (0..rows)
            .map(|t| {
                let t = t as f64;
                vec![(t * 0.7).sin() * 0.005, (t * 1.3).cos() * 0.02]
            })
            .collect();
        (returns, vec!["DI1F27".to_string(), "USDBRL".to_string()])
    }

    #[test]
    fn test_flatten_nets_strategies() {
        let positions = book(vec![
            pos("S1", "DI_1", 0.12, 0.8, "STRONG"),
            pos("S2", "DI_1", -0.02, 0.8, "STRONG"),
        ]);
        let mut constructor = PortfolioConstructor::default();
        let target = constructor.construct(&positions, None, None, 0.0, &ConflictMap::new());
        assert!((target.flattened_weights["DI_1"] - 0.10).abs() < 1e-12);
        assert_eq!(target.risk_parity_weights["DI_1"], 1.0);
    }

    #[test]
    fn test_short_history_falls_back_to_equal_weights() {
        let positions = book(vec![
            pos("RATES_CARRY", "DI1F27", 0.10, 0.6, "STRONG"),
            pos("FX_CARRY", "USDBRL", -0.05, 0.6, "STRONG"),
        ]);
        let (returns, names) = two_vol_returns(59);
        let mut constructor = PortfolioConstructor::default();
        let target =
            constructor.construct(&positions, Some(&returns[..]), Some(&names[..]), 0.0, &ConflictMap::new());
        assert!(target.risk_parity_fallback);
        assert_eq!(target.risk_parity_weights["DI1F27"], 0.5);
        assert_eq!(target.risk_parity_weights["USDBRL"], -0.5);
    }

    #[test]
    fn test_risk_parity_with_history() {
        let positions = book(vec![
            pos("RATES_CARRY", "DI1F27", 0.10, 0.6, "STRONG"),
            pos("FX_CARRY", "USDBRL", 0.05, 0.6, "STRONG"),
        ]);
        let (returns, names) = two_vol_returns(120);
        let mut constructor = PortfolioConstructor::default();
        let target =
            constructor.construct(&positions, Some(&returns[..]), Some(&names[..]), 0.0, &ConflictMap::new());
        assert!(!target.risk_parity_fallback);
        let rp = &target.risk_parity_weights;
        assert!((rp["DI1F27"] + rp["USDBRL"] - 1.0).abs() < 1e-9);
        // the quieter instrument carries more weight
        assert!(rp["DI1F27"] > rp["USDBRL"]);
    }

    #[test]
    fn test_misaligned_history_falls_back() {
        let positions = book(vec![pos("RATES_CARRY", "DI1F29", 0.10, 0.6, "STRONG")]);
        let (returns, names) = two_vol_returns(120);
        let mut constructor = PortfolioConstructor::default();
        let target =
            constructor.construct(&positions, Some(&returns[..]), Some(&names[..]), 0.0, &ConflictMap::new());
        assert!(target.risk_parity_fallback);
        assert_eq!(target.risk_parity_weights["DI1F29"], 1.0);
    }

    #[test]
    fn test_conviction_preserves_gross_and_redistributes() {
        let positions = book(vec![
            pos("FX_CARRY", "USDBRL", 0.10, 0.8, "STRONG"),
            pos("RATES_CARRY", "DI1F27", 0.10, 0.5, "WEAK"),
        ]);
        let mut constructor = PortfolioConstructor::default();
        let target = constructor.construct(&positions, None, None, 0.0, &ConflictMap::new());
        let w = &target.pre_regime_weights;
        let gross: f64 = w.values().map(|v| v.abs()).sum();
        assert!((gross - 1.0).abs() < 1e-12);
        // 0.8 * 1.0 against 0.5 * 0.3
        assert!((w["USDBRL"] / w["DI1F27"] - 0.8 / 0.15).abs() < 1e-9);
    }

    #[test]
    fn test_conviction_floor_applies_to_missing_strength() {
        let untagged = Position::new("FX_CARRY", "USDBRL", 0.10, Direction::Long, 0.9);
        let positions = book(vec![untagged, pos("RATES_CARRY", "DI1F27", 0.10, 0.5, "STRONG")]);
        let mut constructor = PortfolioConstructor::default();
        let target = constructor.construct(&positions, None, None, 0.0, &ConflictMap::new());
        let w = &target.pre_regime_weights;
        // floor 0.1 against 0.5
        assert!((w["USDBRL"] / w["DI1F27"] - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_conviction_ignores_non_finite_confidence() {
        let positions = book(vec![
            pos("FX_CARRY", "USDBRL", 0.10, f64::INFINITY, "STRONG"),
            pos("FX_VALUE", "USDBRL", 0.05, f64::NAN, "STRONG"),
            pos("RATES_CARRY", "DI1F27", 0.10, 0.5, "STRONG"),
        ]);
        let mut constructor = PortfolioConstructor::default();
        let target = constructor.construct(&positions, None, None, 0.0, &ConflictMap::new());
        assert!(target.weights.values().all(|w| w.is_finite()));
        let w = &target.pre_regime_weights;
        // no usable confidence on USDBRL: floor 0.1 against 0.5
        assert!((w["USDBRL"] / w["DI1F27"] - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_conviction_clamps_confidence() {
        let positions = book(vec![
            pos("FX_CARRY", "USDBRL", 0.10, 2.5, "STRONG"),
            pos("RATES_CARRY", "DI1F27", 0.10, 0.5, "STRONG"),
        ]);
        let mut constructor = PortfolioConstructor::default();
        let target = constructor.construct(&positions, None, None, 0.0, &ConflictMap::new());
        let w = &target.pre_regime_weights;
        assert!((w["USDBRL"] / w["DI1F27"] - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_conflicted_class_is_dampened() {
        let positions = book(vec![
            pos("RATES_CARRY", "DI1F27", 0.10, 0.6, "STRONG"),
            pos("FX_CARRY", "USDBRL", 0.10, 0.6, "STRONG"),
        ]);
        let conflicts =
            ConflictMap::from([(AssetClass::Rates, vec!["RATES_A LONG [X] vs RATES_B SHORT [Y]".to_string()])]);
        let mut constructor = PortfolioConstructor::default();
        let target = constructor.construct(&positions, None, None, 0.0, &conflicts);
        let w = &target.pre_regime_weights;
        assert!((w["DI1F27"] - 0.5 * 0.60).abs() < 1e-12);
        assert!((w["USDBRL"] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_empty_conflict_list_and_unclassified_are_untouched() {
        let positions = book(vec![
            pos("MOMENTUM", "WDO", 0.10, 0.6, "STRONG"),
            pos("RATES_CARRY", "DI1F27", 0.10, 0.6, "STRONG"),
        ]);
        let conflicts = ConflictMap::from([(AssetClass::Rates, Vec::new())]);
        let mut constructor = PortfolioConstructor::default();
        let target = constructor.construct(&positions, None, None, 0.0, &conflicts);
        assert!((target.pre_regime_weights["DI1F27"] - 0.5).abs() < 1e-12);
        assert!((target.pre_regime_weights["WDO"] - 0.5).abs() < 1e-12);

        // an explicit instrument map classifies WDO and subjects it to dampening
        let conflicts = ConflictMap::from([(AssetClass::Fx, vec!["x".to_string()])]);
        let mut constructor = PortfolioConstructor::default()
            .with_instrument_classes(HashMap::from([("WDO".to_string(), AssetClass::Fx)]));
        let target = constructor.construct(&positions, None, None, 0.0, &conflicts);
        assert!((target.pre_regime_weights["WDO"] - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_regime_ramp_across_calls() {
        let positions = book(vec![pos("FX_CARRY", "USDBRL", 0.10, 0.6, "STRONG")]);
        let mut constructor = PortfolioConstructor::default();
        let first = constructor.construct(&positions, None, None, -0.9, &ConflictMap::new());
        assert_eq!(first.regime, Regime::RiskOn);
        assert_eq!(first.regime_scale, 1.0);

        let mut scales = Vec::new();
        for _ in 0..3 {
            let t = constructor.construct(&positions, None, None, 0.9, &ConflictMap::new());
            assert_eq!(t.regime, Regime::RiskOff);
            assert!((t.weights["USDBRL"] - t.pre_regime_weights["USDBRL"] * t.regime_scale).abs() < 1e-12);
            scales.push(t.regime_scale);
        }
        assert!((scales[2] - 0.4).abs() < 1e-12);
        assert!(scales.iter().all(|s| (0.4 - 1e-12..=1.0).contains(s)));
        assert_eq!(constructor.regime_state().committed_regime, Some(Regime::RiskOff));
    }

    #[test]
    fn test_restored_state_continues_ramp() {
        let positions = book(vec![pos("FX_CARRY", "USDBRL", 0.10, 0.6, "STRONG")]);
        let mut a = PortfolioConstructor::default();
        a.construct(&positions, None, None, -0.9, &ConflictMap::new());
        a.construct(&positions, None, None, 0.9, &ConflictMap::new());

        let mut b = PortfolioConstructor::default().with_regime_state(a.regime_state());
        let next_a = a.construct(&positions, None, None, 0.9, &ConflictMap::new());
        let next_b = b.construct(&positions, None, None, 0.9, &ConflictMap::new());
        assert_eq!(next_a.regime_scale, next_b.regime_scale);
    }

    #[test]
    fn test_lock_ranges_are_clamped() {
        let config = ConstructorConfig { dampening_factor: 0.95, transition_days: 7, ..Default::default() };
        let constructor = PortfolioConstructor::new(config);
        assert_eq!(constructor.config().dampening_factor, 0.70);
        assert_eq!(constructor.config().transition_days, 3);
    }

    #[test]
    fn test_zero_net_instrument_gets_zero_weight() {
        let positions = book(vec![
            pos("FX_CARRY", "USDBRL", 0.10, 0.6, "STRONG"),
            pos("FX_VALUE", "USDBRL", -0.10, 0.6, "STRONG"),
            pos("RATES_CARRY", "DI1F27", 0.10, 0.6, "STRONG"),
        ]);
        let mut constructor = PortfolioConstructor::default();
        let target = constructor.construct(&positions, None, None, -0.9, &ConflictMap::new());
        assert_eq!(target.weights["USDBRL"], 0.0);
        assert!((target.weights["DI1F27"] - 0.5).abs() < 1e-12);
        assert!((target.gross_exposure() - 0.5).abs() < 1e-12);
    }
}
