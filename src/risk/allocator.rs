//! Capital allocation: hard limits, drift gate and trade deltas.

use log::{debug, info, warn};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;

use super::{budget, gross_leverage, standard_rules, ConstraintRule};
use crate::config::{AllocationConfig, AllocationConstraints};
use crate::portfolio::PortfolioTarget;
use crate::utils::error::Result;
use crate::utils::types::{AssetClassMap, Weights};

/// Exposure bucket for instruments missing from the class map
pub const UNCLASSIFIED: &str = "UNCLASSIFIED";

/// Output of one allocation call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationResult {
    /// Constrained weights, or the current book when no rebalance is needed
    pub weights: Weights,
    /// Instrument → weight delta to execute
    pub trades: Weights,
    pub rebalance_needed: bool,
    pub violations: Vec<String>,
    /// Gross leverage of `weights`
    pub leverage: f64,
    /// Gross exposure per asset class name
    pub exposure: BTreeMap<String, f64>,
}

impl AllocationResult {
    /// Write the trade list as `instrument,delta` CSV rows.
    pub fn write_trades_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut wtr = csv::Writer::from_writer(writer);
        wtr.write_record(["instrument", "delta"])?;
        for (instrument, delta) in &self.trades {
            wtr.write_record([instrument.clone(), delta.to_string()])?;
        }
        wtr.flush()?;
        Ok(())
    }
}

/// Enforces [`AllocationConstraints`] on a target and computes the rebalance trade.
#[derive(Clone)]
pub struct CapitalAllocator {
    constraints: AllocationConstraints,
    reference_equity: f64,
    rules: Vec<Box<dyn ConstraintRule>>,
}

impl Default for CapitalAllocator {
    fn default() -> Self {
        Self::from_config(&AllocationConfig::default())
    }
}

impl CapitalAllocator {
    pub fn new(constraints: AllocationConstraints, reference_equity: f64) -> Self {
        let constraints = match constraints.validate() {
            | Ok(()) => constraints,
            | Err(e) => {
                warn!("{}, using default allocation limits", e);
                AllocationConstraints::default()
            }
        };
        let reference_equity = if reference_equity.is_finite() && reference_equity > 0.0 {
            reference_equity
        } else {
            warn!("reference equity {} is not positive, using 1,000,000", reference_equity);
            1_000_000.0
        };
        Self { rules: standard_rules(&constraints), constraints, reference_equity }
    }

    pub fn from_config(config: &AllocationConfig) -> Self {
        Self::new(config.constraints, config.reference_equity)
    }

    pub fn constraints(&self) -> &AllocationConstraints {
        &self.constraints
    }

    pub fn reference_equity(&self) -> f64 {
        self.reference_equity
    }

    /// Smallest |delta| that is worth trading, as a weight. Every smaller delta is dropped.
    pub fn min_trade_weight(&self) -> f64 {
        self.constraints.min_trade_notional / self.reference_equity
    }

    pub fn allocate(
        &self, target: &PortfolioTarget, current: Option<&Weights>, classes: Option<&AssetClassMap>,
    ) -> AllocationResult {
        self.allocate_weights(&target.weights, current, classes)
    }

    /// Apply the hard limits in order, then gate on drift and build the trade list.
    pub fn allocate_weights(
        &self, target: &Weights, current: Option<&Weights>, classes: Option<&AssetClassMap>,
    ) -> AllocationResult {
        let mut weights = target.clone();
        let mut violations = zero_non_finite(&mut weights, "target");
        let current: Option<Weights> = current.map(|held| {
            let mut held = held.clone();
            violations.extend(zero_non_finite(&mut held, "current"));
            held
        });
        let current = current.as_ref();
        for rule in &self.rules {
            let found = rule.apply(&mut weights, classes);
            if !found.is_empty() {
                debug!("{} limit adjusted {} entries", rule.name(), found.len());
            }
            violations.extend(found);
        }
        if !violations.is_empty() {
            warn!("allocation recorded {} constraint violation(s)", violations.len());
        }

        if let Some(current) = current {
            let drift = max_deviation(&weights, current);
            if drift <= self.constraints.drift_threshold {
                info!(
                    "max drift {:.4} within threshold {:.4}, keeping current book",
                    drift, self.constraints.drift_threshold
                );
                return AllocationResult {
                    leverage: gross_leverage(current),
                    exposure: exposure_by_class(current, classes),
                    weights: current.clone(),
                    trades: Weights::new(),
                    rebalance_needed: false,
                    violations,
                };
            }
            debug!("max drift {:.4} exceeds threshold {:.4}", drift, self.constraints.drift_threshold);
        }

        let empty = Weights::new();
        let trades = trade_deltas(&weights, current.unwrap_or(&empty), self.min_trade_weight());
        info!("rebalance: {} trade(s), gross leverage {:.4}", trades.len(), gross_leverage(&weights));

        AllocationResult {
            leverage: gross_leverage(&weights),
            exposure: exposure_by_class(&weights, classes),
            weights,
            trades,
            rebalance_needed: true,
            violations,
        }
    }

    /// Instruments whose share of portfolio variance exceeds `max_risk_budget_share`.
    pub fn check_risk_budget(
        &self, weights: &Weights, covariance: Option<&Array2<f64>>, instruments: Option<&[String]>,
    ) -> Vec<String> {
        budget::check_risk_budget(weights, covariance, instruments, self.constraints.max_risk_budget_share)
    }
}

fn union_keys<'a>(a: &'a Weights, b: &'a Weights) -> BTreeSet<&'a String> {
    a.keys().chain(b.keys()).collect()
}

/// Largest |target - current| with missing entries read as zero.
fn max_deviation(target: &Weights, current: &Weights) -> f64 {
    union_keys(target, current)
        .into_iter()
        .map(|k| {
            let t = target.get(k).copied().unwrap_or(0.0);
            let c = current.get(k).copied().unwrap_or(0.0);
            (t - c).abs()
        })
        .fold(0.0, f64::max)
}

fn trade_deltas(target: &Weights, current: &Weights, min_delta: f64) -> Weights {
    union_keys(target, current)
        .into_iter()
        .filter_map(|k| {
            let delta = target.get(k).copied().unwrap_or(0.0) - current.get(k).copied().unwrap_or(0.0);
            if delta.abs() < min_delta {
                None
            } else {
                Some((k.clone(), delta))
            }
        })
        .collect()
}

/// Replace NaN and infinite entries with zero so the limits can bound the rest.
fn zero_non_finite(weights: &mut Weights, side: &str) -> Vec<String> {
    let mut violations = Vec::new();
    for (instrument, w) in weights.iter_mut().filter(|(_, w)| !w.is_finite()) {
        violations.push(format!("{}: non-finite {} weight {}, set to 0", instrument, side, w));
        *w = 0.0;
    }
    violations
}

fn exposure_by_class(weights: &Weights, classes: Option<&AssetClassMap>) -> BTreeMap<String, f64> {
    let mut exposure = BTreeMap::new();
    for (instrument, w) in weights {
        let bucket = classes
            .and_then(|m| m.get(instrument))
            .map(|c| c.as_str())
            .unwrap_or(UNCLASSIFIED);
        *exposure.entry(bucket.to_string()).or_insert(0.0) += w.abs();
    }
    exposure
}
