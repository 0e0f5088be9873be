use macrobook::portfolio::{PortfolioConstructor, Regime};
use macrobook::signal::detect_strategy_conflicts;
use macrobook::utils::prelude::*;

fn position(strategy: &str, instrument: &str, weight: f64, strength: &str) -> Position {
    let direction = if weight > 0.0 { Direction::Long } else { Direction::Short };
    Position::new(strategy, instrument, weight, direction, 0.7).with_strength(strength)
}

fn book(list: Vec<Position>) -> StrategyPositions {
    let mut book = StrategyPositions::new();
    for p in list {
        book.entry(p.strategy_id.clone()).or_default().push(p);
    }
    book
}

#[test]
fn flatten_nets_opposing_strategies() {
    let positions = book(vec![position("S1", "DI_1", 0.12, "STRONG"), position("S2", "DI_1", -0.02, "STRONG")]);
    let mut constructor = PortfolioConstructor::default();
    let target = constructor.construct(&positions, None, None, 0.0, &ConflictMap::new());
    assert!((target.flattened_weights["DI_1"] - 0.10).abs() < 1e-12);
    assert!(target.risk_parity_fallback);
}

#[test]
fn detected_conflicts_dampen_the_class() {
    let positions = book(vec![
        position("RATES_CARRY", "DI1F27", 0.15, "STRONG"),
        position("RATES_MOMENTUM", "DI1F29", -0.05, "STRONG"),
        position("FX_CARRY", "USDBRL", 0.10, "STRONG"),
    ]);
    let conflicts = detect_strategy_conflicts(&positions, None);
    assert!(conflicts.contains_key(&AssetClass::Rates));

    let mut constructor = PortfolioConstructor::default();
    let undamped = PortfolioConstructor::default().construct(&positions, None, None, -0.9, &ConflictMap::new());
    let damped = constructor.construct(&positions, None, None, -0.9, &conflicts);

    for instrument in ["DI1F27", "DI1F29"] {
        let ratio = damped.weights[instrument] / undamped.weights[instrument];
        assert!((ratio - 0.60).abs() < 1e-12, "{} ratio {}", instrument, ratio);
    }
    assert_eq!(damped.weights["USDBRL"], undamped.weights["USDBRL"]);
}

#[test]
fn conviction_floor_bounds_shrinkage() {
    // NO_SIGNAL maps to zero conviction, floored at 0.1 of the base weight
    let positions = book(vec![
        position("FX_CARRY", "USDBRL", 0.10, "NO_SIGNAL"),
        position("RATES_CARRY", "DI1F27", 0.10, "NO_SIGNAL"),
    ]);
    let mut constructor = PortfolioConstructor::default();
    let target = constructor.construct(&positions, None, None, -0.9, &ConflictMap::new());
    // equal floors redistribute nothing
    assert!((target.weights["USDBRL"] - 0.5).abs() < 1e-12);
    assert!((target.weights["DI1F27"] - 0.5).abs() < 1e-12);
}

#[test]
fn regime_ramp_down_and_reversal() {
    let positions = book(vec![position("FX_CARRY", "USDBRL", 0.10, "STRONG")]);
    let mut constructor = PortfolioConstructor::default();

    let scales: Vec<f64> = [-0.9, 0.9, 0.9, -0.9, -0.9]
        .iter()
        .map(|score| constructor.construct(&positions, None, None, *score, &ConflictMap::new()).regime_scale)
        .collect();

    // committed RISK_ON, then one step toward RISK_OFF, then snap back
    assert_eq!(scales[0], 1.0);
    assert!((scales[1] - 0.8).abs() < 1e-12);
    assert!((scales[2] - 0.6).abs() < 1e-12);
    assert_eq!(scales[3], 1.0);
    assert_eq!(scales[4], 1.0);
    assert_eq!(constructor.regime_state().committed_regime, Some(Regime::RiskOn));
}
