//! Cross-agent consensus per asset class.
//!
//! Each tracked asset class gets one [`AggregatedSignal`]: the confidence- and
//! weight-adjusted mean of the agents' headline directions. Agents that are
//! missing or report nothing simply drop out and the remaining weights are
//! renormalised. A cross-asset regime score beyond the veto threshold halves
//! every net score, in either direction.

use log::{debug, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::config::AggregatorConfig;
use crate::utils::types::{AgentReport, AssetClass, Direction};

/// One agent's input to an asset-class consensus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentContribution {
    pub agent_id: String,
    pub weight: f64,
    pub direction: Direction,
    pub confidence: f64,
}

/// Consensus view for one asset class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedSignal {
    pub asset_class: AssetClass,
    pub direction: Direction,
    /// Always within [-1, 1]
    pub net_score: f64,
    pub confidence: f64,
    pub contributors: Vec<AgentContribution>,
    pub conflict: bool,
    pub conflict_details: Vec<String>,
    pub veto_applied: bool,
    pub veto_detail: Option<String>,
}

/// Stateless reducer from agent reports to per-class consensus.
#[derive(Debug, Clone)]
pub struct SignalAggregator {
    config: AggregatorConfig,
}

impl Default for SignalAggregator {
    fn default() -> Self {
        Self::new(AggregatorConfig::default())
    }
}

impl SignalAggregator {
    pub fn new(config: AggregatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    /// Value of the configured cross-asset regime signal, first match across reports.
    pub fn regime_score(&self, reports: &[AgentReport]) -> Option<f64> {
        reports
            .iter()
            .flat_map(|r| r.signals.iter())
            .find(|s| s.signal_id == self.config.regime_signal_id)
            .map(|s| s.value)
            .filter(|v| v.is_finite())
    }

    /// Reduce agent reports into one consensus signal per tracked asset class.
    pub fn aggregate(&self, reports: &[AgentReport]) -> Vec<AggregatedSignal> {
        let mut by_agent: HashMap<&str, &AgentReport> = HashMap::new();
        for report in reports {
            by_agent.entry(report.agent_id.as_str()).or_insert(report);
        }

        let regime = self.regime_score(reports);
        let veto = regime.filter(|r| r.abs() > self.config.veto_threshold);

        self.config
            .weights
            .tracked_classes()
            .into_iter()
            .map(|class| {
                let mut signal = self.aggregate_class(class, &by_agent);
                if let Some(score) = veto {
                    self.apply_veto(&mut signal, score);
                }
                signal
            })
            .collect()
    }

    /// Aggregate independent report batches (e.g. one per backtest date) in parallel.
    pub fn aggregate_many(&self, batches: &[Vec<AgentReport>]) -> Vec<Vec<AggregatedSignal>> {
        batches.par_iter().map(|batch| self.aggregate(batch)).collect()
    }

    fn aggregate_class(
        &self, class: AssetClass, by_agent: &HashMap<&str, &AgentReport>,
    ) -> AggregatedSignal {
        let mut weighted_sum = 0.0;
        let mut weight_sum = 0.0;
        let mut contributors = Vec::new();

        for (agent_id, weight) in self.config.weights.agents_for(class) {
            let Some(signal) = by_agent.get(agent_id).and_then(|r| r.headline_signal()) else {
                continue;
            };
            if !signal.confidence.is_finite() {
                continue;
            }
            let confidence = signal.confidence.clamp(0.0, 1.0);
            weighted_sum += signal.direction.score() * weight * confidence;
            weight_sum += weight;
            contributors.push(AgentContribution {
                agent_id: agent_id.to_string(),
                weight,
                direction: signal.direction,
                confidence,
            });
        }

        let net_score = if weight_sum > 0.0 {
            (weighted_sum / weight_sum).clamp(-1.0, 1.0)
        } else {
            0.0
        };
        let direction = Direction::from_score(net_score, self.config.neutral_band);
        let confidence = if contributors.is_empty() {
            0.0
        } else {
            contributors.iter().map(|c| c.confidence).sum::<f64>() / contributors.len() as f64
        };

        let conflict_details: Vec<String> = if direction.is_neutral() {
            Vec::new()
        } else {
            contributors
                .iter()
                .filter(|c| {
                    c.weight > self.config.conflict_weight_threshold
                        && !c.direction.is_neutral()
                        && c.direction != direction
                })
                .map(|c| {
                    format!(
                        "{} is {} (weight {:.2}, confidence {:.2}) against {} consensus",
                        c.agent_id, c.direction, c.weight, c.confidence, direction
                    )
                })
                .collect()
        };
        if !conflict_details.is_empty() {
            warn!("{} consensus {} has {} dissenting agent(s)", class, direction, conflict_details.len());
        }
        debug!(
            "{}: net_score={:.3} direction={} contributors={}",
            class,
            net_score,
            direction,
            contributors.len()
        );

        AggregatedSignal {
            asset_class: class,
            direction,
            net_score,
            confidence,
            contributors,
            conflict: !conflict_details.is_empty(),
            conflict_details,
            veto_applied: false,
            veto_detail: None,
        }
    }

    fn apply_veto(&self, signal: &mut AggregatedSignal, regime_score: f64) {
        let before = signal.net_score;
        signal.net_score = (before * self.config.veto_factor).clamp(-1.0, 1.0);
        signal.direction = Direction::from_score(signal.net_score, self.config.neutral_band);
        signal.veto_applied = true;
        signal.veto_detail = Some(format!(
            "regime score {:+.2} beyond ±{:.2}: net score {:+.3} -> {:+.3}",
            regime_score, self.config.veto_threshold, before, signal.net_score
        ));
        warn!("{} veto applied (regime score {:+.2})", signal.asset_class, regime_score);
    }
}
