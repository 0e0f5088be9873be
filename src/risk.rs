//! Hard allocation limits.
//! Each limit is a rule that rewrites a weight vector in place and reports
//! what it changed. The allocator applies them in a fixed order: single
//! position, then asset-class concentration, then gross leverage.

use std::collections::BTreeMap;

use crate::config::AllocationConstraints;
use crate::utils::types::{AssetClass, AssetClassMap, Weights};

pub mod allocator;
pub mod budget;

pub use allocator::{AllocationResult, CapitalAllocator};
pub use budget::check_risk_budget;

/// Generic interface for a hard limit on target weights.
pub trait ConstraintRule: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Enforce the limit on `weights`.
    ///
    /// * `classes` – instrument → asset-class lookup; instruments missing from it
    ///   are ignored by class-level rules.
    ///
    /// Returns one description per adjustment made.
    fn apply(&self, weights: &mut Weights, classes: Option<&AssetClassMap>) -> Vec<String>;

    /// Clone boxed trait-objects safely.
    fn box_clone(&self) -> Box<dyn ConstraintRule>;
}

impl Clone for Box<dyn ConstraintRule> {
    fn clone(&self) -> Self { self.box_clone() }
}

/// Clamp |w| of every instrument to `max`.
#[derive(Debug, Clone)]
pub struct SinglePositionLimit {
    max: f64,
}

impl SinglePositionLimit {
    pub fn new(max: f64) -> Self { Self { max } }
}

impl ConstraintRule for SinglePositionLimit {
    fn name(&self) -> &'static str { "single_position" }

    fn apply(&self, weights: &mut Weights, _classes: Option<&AssetClassMap>) -> Vec<String> {
        let mut violations = Vec::new();
        for (instrument, w) in weights.iter_mut() {
            if w.abs() > self.max {
                violations.push(format!(
                    "{}: weight {:.4} exceeds single-position limit {:.4}, clamped",
                    instrument, w, self.max
                ));
                *w = w.signum() * self.max;
            }
        }
        violations
    }

    fn box_clone(&self) -> Box<dyn ConstraintRule> { Box::new(self.clone()) }
}

/// Scale an asset class down proportionally when its gross exposure exceeds `max`.
#[derive(Debug, Clone)]
pub struct ConcentrationLimit {
    max: f64,
}

impl ConcentrationLimit {
    pub fn new(max: f64) -> Self { Self { max } }
}

impl ConstraintRule for ConcentrationLimit {
    fn name(&self) -> &'static str { "asset_class_concentration" }

    fn apply(&self, weights: &mut Weights, classes: Option<&AssetClassMap>) -> Vec<String> {
        let Some(classes) = classes else {
            return Vec::new();
        };
        let mut gross: BTreeMap<AssetClass, f64> = BTreeMap::new();
        for (instrument, w) in weights.iter() {
            if let Some(class) = classes.get(instrument) {
                *gross.entry(*class).or_default() += w.abs();
            }
        }

        let mut violations = Vec::new();
        for (class, total) in gross {
            if total <= self.max {
                continue;
            }
            let k = self.max / total;
            violations.push(format!(
                "{}: gross exposure {:.4} exceeds concentration limit {:.4}, scaled by {:.4}",
                class, total, self.max, k
            ));
            for (instrument, w) in weights.iter_mut() {
                if classes.get(instrument) == Some(&class) {
                    *w *= k;
                }
            }
        }
        violations
    }

    fn box_clone(&self) -> Box<dyn ConstraintRule> { Box::new(self.clone()) }
}

/// Scale the whole book down when sum |w| exceeds `max`.
#[derive(Debug, Clone)]
pub struct LeverageLimit {
    max: f64,
}

impl LeverageLimit {
    pub fn new(max: f64) -> Self { Self { max } }
}

impl ConstraintRule for LeverageLimit {
    fn name(&self) -> &'static str { "leverage" }

    fn apply(&self, weights: &mut Weights, _classes: Option<&AssetClassMap>) -> Vec<String> {
        let total = gross_leverage(weights);
        if total <= self.max {
            return Vec::new();
        }
        let k = self.max / total;
        weights.values_mut().for_each(|w| *w *= k);
        vec![format!(
            "gross leverage {:.4} exceeds limit {:.4}, scaled by {:.4}",
            total, self.max, k
        )]
    }

    fn box_clone(&self) -> Box<dyn ConstraintRule> { Box::new(self.clone()) }
}

/// The three hard limits in enforcement order.
pub fn standard_rules(constraints: &AllocationConstraints) -> Vec<Box<dyn ConstraintRule>> {
    vec![
        Box::new(SinglePositionLimit::new(constraints.max_single_position)),
        Box::new(ConcentrationLimit::new(constraints.max_asset_class_concentration)),
        Box::new(LeverageLimit::new(constraints.max_leverage)),
    ]
}

/// Sum of |w|
pub fn gross_leverage(weights: &Weights) -> f64 {
    weights.values().map(|w| w.abs()).sum()
}
