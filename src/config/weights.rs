//! Agent → asset-class weight matrix for the signal aggregator.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::utils::error::{Error, Result};
use crate::utils::types::AssetClass;

/// How much each agent's headline signal counts toward each asset class.
///
/// Serialized as a TOML table of tables:
///
/// ```toml
/// [aggregator.weights.fx_agent]
/// FX = 0.5
/// CUPOM = 0.4
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawWeights", into = "RawWeights")]
pub struct AgentWeightMatrix {
    weights: BTreeMap<String, BTreeMap<AssetClass, f64>>,
}

/// On-disk shape: class names as plain string keys.
type RawWeights = BTreeMap<String, BTreeMap<String, f64>>;

impl TryFrom<RawWeights> for AgentWeightMatrix {
    type Error = Error;

    fn try_from(raw: RawWeights) -> Result<Self> {
        let mut weights = BTreeMap::new();
        for (agent, row) in raw {
            let mut parsed = BTreeMap::new();
            for (class, w) in row {
                let class: AssetClass = class.parse().map_err(Error::ConfigError)?;
                parsed.insert(class, w);
            }
            weights.insert(agent, parsed);
        }
        Self::new(weights)
    }
}

impl From<AgentWeightMatrix> for RawWeights {
    fn from(matrix: AgentWeightMatrix) -> Self {
        matrix
            .weights
            .into_iter()
            .map(|(agent, row)| {
                (agent, row.into_iter().map(|(c, w)| (c.as_str().to_string(), w)).collect())
            })
            .collect()
    }
}

impl AgentWeightMatrix {
    /// Build a matrix, rejecting negative or non-finite entries.
    pub fn new(weights: BTreeMap<String, BTreeMap<AssetClass, f64>>) -> Result<Self> {
        let matrix = Self { weights };
        matrix.validate()?;
        Ok(matrix)
    }

    pub fn validate(&self) -> Result<()> {
        for (agent, row) in &self.weights {
            if agent.trim().is_empty() {
                return Err(Error::ConfigError("agent weight row with empty agent id".into()));
            }
            for (class, w) in row {
                if !w.is_finite() || *w < 0.0 {
                    return Err(Error::ConfigError(format!(
                        "weight for agent {} / {} must be finite and >= 0 (got {})",
                        agent, class, w
                    )));
                }
            }
        }
        Ok(())
    }

    /// Weight of `agent` for `class`; zero when either is unknown.
    pub fn weight(&self, agent: &str, class: AssetClass) -> f64 {
        self.weights
            .get(agent)
            .and_then(|row| row.get(&class))
            .copied()
            .unwrap_or(0.0)
    }

    /// Agents with a nonzero weight for `class`, in id order.
    pub fn agents_for(&self, class: AssetClass) -> Vec<(&str, f64)> {
        self.weights
            .iter()
            .filter_map(|(agent, row)| match row.get(&class) {
                | Some(w) if *w > 0.0 => Some((agent.as_str(), *w)),
                | _ => None,
            })
            .collect()
    }

    /// Asset classes with at least one nonzero weight, in `AssetClass` order.
    pub fn tracked_classes(&self) -> Vec<AssetClass> {
        AssetClass::ALL
            .iter()
            .copied()
            .filter(|c| !self.agents_for(*c).is_empty())
            .collect()
    }

    /// Override a single entry.
    pub fn set(&mut self, agent: &str, class: AssetClass, weight: f64) -> Result<()> {
        if !weight.is_finite() || weight < 0.0 {
            return Err(Error::InvalidArgument(format!(
                "weight for {} / {} must be finite and >= 0",
                agent, class
            )));
        }
        self.weights.entry(agent.to_string()).or_default().insert(class, weight);
        Ok(())
    }
}

impl Default for AgentWeightMatrix {
    fn default() -> Self {
        use AssetClass::*;
        let rows: [(&str, &[(AssetClass, f64)]); 5] = [
            ("inflation_agent", &[(Rates, 0.25), (Inflation, 0.55)]),
            (
                "monetary_agent",
                &[(Fx, 0.15), (Rates, 0.45), (Inflation, 0.25), (Cupom, 0.30), (Sovereign, 0.15)],
            ),
            (
                "fiscal_agent",
                &[(Fx, 0.15), (Rates, 0.15), (Inflation, 0.10), (Cupom, 0.15), (Sovereign, 0.50)],
            ),
            (
                "fx_agent",
                &[(Fx, 0.50), (Rates, 0.05), (Inflation, 0.10), (Cupom, 0.40), (Sovereign, 0.10)],
            ),
            ("cross_asset_agent", &[(Fx, 0.20), (Rates, 0.10), (Cupom, 0.15), (Sovereign, 0.25)]),
        ];
        let weights = rows
            .iter()
            .map(|(agent, row)| (agent.to_string(), row.iter().copied().collect()))
            .collect();
        Self { weights }
    }
}
