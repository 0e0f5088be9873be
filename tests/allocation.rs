use ndarray::array;
use rstest::rstest;
use std::collections::HashMap;

use macrobook::config::AllocationConstraints;
use macrobook::portfolio::PortfolioConstructor;
use macrobook::risk::CapitalAllocator;
use macrobook::utils::prelude::*;

const EPS: f64 = 1e-9;

fn weights(entries: &[(&str, f64)]) -> Weights {
    entries.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}

fn classes() -> AssetClassMap {
    HashMap::from([
        ("DI1F27".to_string(), AssetClass::Rates),
        ("DI1F29".to_string(), AssetClass::Rates),
        ("DI1F31".to_string(), AssetClass::Rates),
        ("USDBRL".to_string(), AssetClass::Fx),
        ("NTNB35".to_string(), AssetClass::Inflation),
    ])
}

#[rstest]
#[case(weights(&[("DI1F27", 0.40), ("DI1F29", 0.35), ("DI1F31", -0.30), ("USDBRL", 0.10)]), 4.0)]
#[case(weights(&[("DI1F27", 0.9), ("USDBRL", -0.9), ("NTNB35", 0.9), ("WDO", 0.9)]), 0.5)]
#[case(weights(&[("DI1F27", 0.05), ("USDBRL", 0.05)]), 4.0)]
#[case(weights(&[]), 1.0)]
fn hard_limits_hold(#[case] target: Weights, #[case] max_leverage: f64) {
    let constraints = AllocationConstraints { max_leverage, ..Default::default() };
    let classes = classes();
    let result = CapitalAllocator::new(constraints, 1_000_000.0).allocate_weights(&target, None, Some(&classes));

    let gross: f64 = result.weights.values().map(|w| w.abs()).sum();
    assert!(gross <= constraints.max_leverage + EPS);
    assert!((result.leverage - gross).abs() < EPS);
    for w in result.weights.values() {
        assert!(w.abs() <= constraints.max_single_position + EPS);
    }
    for class in AssetClass::ALL {
        let class_gross: f64 = result
            .weights
            .iter()
            .filter(|(k, _)| classes.get(*k) == Some(&class))
            .map(|(_, w)| w.abs())
            .sum();
        assert!(class_gross <= constraints.max_asset_class_concentration + EPS);
    }
}

#[rstest]
#[case(0.0)]
#[case(10_000.0)]
#[case(50_000.0)]
fn trades_round_trip(#[case] min_trade_notional: f64) {
    let constraints = AllocationConstraints { min_trade_notional, ..Default::default() };
    let allocator = CapitalAllocator::new(constraints, 1_000_000.0);
    let target = weights(&[("A", 0.20), ("B", 0.01), ("C", -0.15)]);
    let current = weights(&[("A", 0.10), ("B", 0.0), ("D", 0.03)]);
    let result = allocator.allocate_weights(&target, Some(&current), None);
    assert!(result.rebalance_needed);

    let min_delta = allocator.min_trade_weight();
    for name in ["A", "B", "C", "D"] {
        let delta = result.weights.get(name).copied().unwrap_or(0.0) - current.get(name).copied().unwrap_or(0.0);
        match result.trades.get(name) {
            | Some(trade) => assert!((trade - delta).abs() < EPS),
            | None => assert!(delta.abs() < min_delta, "{} delta {}", name, delta),
        }
    }
}

#[test]
fn min_notional_scenario() {
    let constraints = AllocationConstraints { min_trade_notional: 50_000.0, ..Default::default() };
    let result = CapitalAllocator::new(constraints, 1_000_000.0).allocate_weights(
        &weights(&[("A", 0.20), ("B", 0.01)]),
        Some(&weights(&[("A", 0.10), ("B", 0.0)])),
        None,
    );
    assert_eq!(result.trades.len(), 1);
    assert!((result.trades["A"] - 0.10).abs() < EPS);
}

#[test]
fn violations_survive_a_skipped_rebalance() {
    // the clamped target equals the held book, so nothing trades
    let current = weights(&[("A", 0.25)]);
    let result = CapitalAllocator::default().allocate_weights(&weights(&[("A", 0.40)]), Some(&current), None);
    assert!(!result.rebalance_needed);
    assert_eq!(result.violations.len(), 1);
    assert_eq!(result.weights, current);
}

#[test]
fn risk_budget_through_allocator() {
    let allocator = CapitalAllocator::default();
    let w = weights(&[("A", 0.2), ("B", 0.2), ("C", 0.2)]);
    let cov = array![[0.09, 0.0, 0.0], [0.0, 0.01, 0.0], [0.0, 0.0, 0.01]];
    let names: Vec<String> = ["A", "B", "C"].iter().map(|s| s.to_string()).collect();
    let violations = allocator.check_risk_budget(&w, Some(&cov), Some(names.as_slice()));
    assert_eq!(violations.len(), 1);
    assert!(violations[0].starts_with("A:"));
}

#[test]
fn non_finite_inputs_stay_bounded() {
    let mut book = StrategyPositions::new();
    for p in [
        Position::new("FX_CARRY", "USDBRL", 0.20, Direction::Long, f64::INFINITY).with_strength("STRONG"),
        Position::new("RATES_CARRY", "DI1F27", 0.10, Direction::Long, 0.6).with_strength("STRONG"),
    ] {
        book.entry(p.strategy_id.clone()).or_default().push(p);
    }
    let target = PortfolioConstructor::default().construct(&book, None, None, -0.5, &ConflictMap::new());
    assert!(target.weights.values().all(|w| w.is_finite()));

    let classes = classes();
    let held = weights(&[("USDBRL", f64::NAN), ("DI1F27", 0.05)]);
    let result = CapitalAllocator::default().allocate(&target, Some(&held), Some(&classes));
    let constraints = AllocationConstraints::default();
    assert!(result.leverage.is_finite() && result.leverage <= constraints.max_leverage + EPS);
    assert!(result.weights.values().all(|w| w.is_finite() && w.abs() <= constraints.max_single_position + EPS));
    assert!(result.trades.values().all(|d| d.is_finite()));
    assert!(result.violations.iter().any(|v| v.starts_with("USDBRL: non-finite current weight")));
}
