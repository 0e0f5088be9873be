//! One daily run: aggregate → detect conflicts → construct → allocate.
//!
//! A [`Pipeline`] owns one constructor and therefore one regime ramp; feed it
//! trading dates in order. Independent books need independent pipelines.

use chrono::NaiveDate;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::config::Config;
use crate::portfolio::{ledoit_wolf, PortfolioConstructor, PortfolioTarget, RegimeState};
use crate::risk::{AllocationResult, CapitalAllocator};
use crate::signal::{detect_strategy_conflicts, AggregatedSignal, SignalAggregator};
use crate::utils::error::{Error, Result};
use crate::utils::types::{AgentReport, AssetClassMap, ConflictMap, StrategyPositions, Weights};

/// Everything a run consumes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunInputs {
    pub as_of: NaiveDate,
    #[serde(default)]
    pub reports: Vec<AgentReport>,
    #[serde(default)]
    pub positions: StrategyPositions,
    /// Row-major observations × instruments
    #[serde(default)]
    pub returns: Option<Vec<Vec<f64>>>,
    /// Column names for `returns`
    #[serde(default)]
    pub instruments: Option<Vec<String>>,
    /// Overrides the score found in the reports
    #[serde(default)]
    pub regime_score: Option<f64>,
    /// Book currently held
    #[serde(default)]
    pub current_weights: Option<Weights>,
}

impl RunInputs {
    pub fn new(as_of: NaiveDate) -> Self {
        Self {
            as_of,
            reports: Vec::new(),
            positions: StrategyPositions::new(),
            returns: None,
            instruments: None,
            regime_score: None,
            current_weights: None,
        }
    }

    /// Parse inputs from JSON. A returns matrix must come with its instrument names.
    pub fn from_json(text: &str) -> Result<Self> {
        let inputs: Self = serde_json::from_str(text)?;
        if inputs.returns.is_some() && inputs.instruments.is_none() {
            return Err(Error::DataError(format!(
                "{}: returns supplied without instrument names",
                inputs.as_of
            )));
        }
        Ok(inputs)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }
}

/// Everything a run produces
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutput {
    pub as_of: NaiveDate,
    pub signals: Vec<AggregatedSignal>,
    pub conflicts: ConflictMap,
    pub target: PortfolioTarget,
    pub allocation: AllocationResult,
    /// Risk-budget breaches of the allocated weights (empty without returns)
    pub risk_budget: Vec<String>,
}

impl RunOutput {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

pub struct Pipeline {
    aggregator: SignalAggregator,
    constructor: PortfolioConstructor,
    allocator: CapitalAllocator,
    instrument_classes: Option<AssetClassMap>,
    strategy_classes: Option<AssetClassMap>,
}

impl Pipeline {
    pub fn new(
        aggregator: SignalAggregator, constructor: PortfolioConstructor, allocator: CapitalAllocator,
    ) -> Self {
        Self { aggregator, constructor, allocator, instrument_classes: None, strategy_classes: None }
    }

    /// Validate `config` and build all three stages from it.
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(
            SignalAggregator::new(config.aggregator.clone()),
            PortfolioConstructor::new(config.constructor.clone()),
            CapitalAllocator::from_config(&config.allocation),
        ))
    }

    /// Instrument → asset class, used for dampening, concentration and exposure
    pub fn with_instrument_classes(mut self, classes: AssetClassMap) -> Self {
        self.constructor = self.constructor.with_instrument_classes(classes.clone());
        self.instrument_classes = Some(classes);
        self
    }

    /// Strategy id → asset class overrides for conflict detection
    pub fn with_strategy_classes(mut self, classes: AssetClassMap) -> Self {
        self.constructor = self.constructor.with_strategy_classes(classes.clone());
        self.strategy_classes = Some(classes);
        self
    }

    pub fn with_regime_state(mut self, state: RegimeState) -> Self {
        self.constructor = self.constructor.with_regime_state(state);
        self
    }

    pub fn regime_state(&self) -> RegimeState {
        self.constructor.regime_state()
    }

    pub fn aggregator(&self) -> &SignalAggregator {
        &self.aggregator
    }

    pub fn allocator(&self) -> &CapitalAllocator {
        &self.allocator
    }

    pub fn run(&mut self, inputs: RunInputs) -> RunOutput {
        let signals = self.aggregator.aggregate(&inputs.reports);
        let regime_score = inputs
            .regime_score
            .or_else(|| self.aggregator.regime_score(&inputs.reports))
            .unwrap_or(0.0);

        let conflicts = detect_strategy_conflicts(&inputs.positions, self.strategy_classes.as_ref());

        let returns = inputs.returns.as_deref();
        let instruments = inputs.instruments.as_deref();
        let target =
            self.constructor.construct(&inputs.positions, returns, instruments, regime_score, &conflicts);

        let allocation = self.allocator.allocate(
            &target,
            inputs.current_weights.as_ref(),
            self.instrument_classes.as_ref(),
        );

        let risk_budget = match (returns, instruments) {
            | (Some(r), Some(names)) => match ledoit_wolf(r) {
                | Some(cov) => self.allocator.check_risk_budget(
                    &allocation.weights,
                    Some(&cov.matrix),
                    Some(names),
                ),
                | None => Vec::new(),
            },
            | _ => Vec::new(),
        };
        if !risk_budget.is_empty() {
            debug!("{} risk budget breach(es)", risk_budget.len());
        }

        info!(
            "{}: regime {} scale {:.3}, {} conflicted class(es), {} trade(s), leverage {:.3}",
            inputs.as_of,
            target.regime,
            target.regime_scale,
            conflicts.len(),
            allocation.trades.len(),
            allocation.leverage
        );

        RunOutput { as_of: inputs.as_of, signals, conflicts, target, allocation, risk_budget }
    }
}
