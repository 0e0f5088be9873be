//! Configuration for the aggregation → construction → allocation pipeline

pub mod weights;

use crate::utils::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::env;

pub use weights::AgentWeightMatrix;

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Configuration file version
    pub version: String,

    /// Signal aggregation settings
    #[serde(default)]
    pub aggregator: AggregatorConfig,

    /// Portfolio construction settings
    #[serde(default)]
    pub constructor: ConstructorConfig,

    /// Hard limits and rebalancing settings
    #[serde(default)]
    pub allocation: AllocationConfig,
}

/// Signal aggregator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatorConfig {
    /// Net scores inside ±band classify as NEUTRAL
    #[serde(default = "default_neutral_band")]
    pub neutral_band: f64,

    /// Contributors heavier than this are checked for disagreement
    #[serde(default = "default_conflict_weight_threshold")]
    pub conflict_weight_threshold: f64,

    /// Id of the cross-asset regime signal read for the bilateral veto
    #[serde(default = "default_regime_signal_id")]
    pub regime_signal_id: String,

    /// |regime score| above this triggers the veto
    #[serde(default = "default_veto_threshold")]
    pub veto_threshold: f64,

    /// Multiplier applied to every net score under veto
    #[serde(default = "default_veto_factor")]
    pub veto_factor: f64,

    /// Agent → asset-class weights
    #[serde(default)]
    pub weights: AgentWeightMatrix,
}

/// Portfolio constructor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstructorConfig {
    /// Minimum return observations before risk parity is attempted
    #[serde(default = "default_min_observations")]
    pub min_observations: usize,

    /// Risk-parity optimizer iteration cap
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Weight multiplier for instruments in a conflicted asset class (0.50 – 0.70)
    #[serde(default = "default_dampening_factor")]
    pub dampening_factor: f64,

    /// Days to ramp between regime scales (2 – 3)
    #[serde(default = "default_transition_days")]
    pub transition_days: u32,

    /// Floor on the per-instrument conviction multiplier
    #[serde(default = "default_conviction_floor")]
    pub conviction_floor: f64,
}

/// Hard allocation limits
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AllocationConstraints {
    /// Maximum gross exposure (sum of |w|)
    #[serde(default = "default_max_leverage")]
    pub max_leverage: f64,

    /// Maximum |w| for any single instrument
    #[serde(default = "default_max_single_position")]
    pub max_single_position: f64,

    /// Maximum sum of |w| inside one asset class
    #[serde(default = "default_max_asset_class_concentration")]
    pub max_asset_class_concentration: f64,

    /// Maximum share of portfolio variance from a single instrument
    #[serde(default = "default_max_risk_budget_share")]
    pub max_risk_budget_share: f64,

    /// Largest per-instrument deviation tolerated without rebalancing
    #[serde(default = "default_drift_threshold")]
    pub drift_threshold: f64,

    /// Trades smaller than this notional are dropped
    #[serde(default = "default_min_trade_notional")]
    pub min_trade_notional: f64,
}

/// Allocation configuration: limits plus the equity base for notional filters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AllocationConfig {
    #[serde(flatten)]
    pub constraints: AllocationConstraints,

    /// Equity used to convert `min_trade_notional` into a weight
    #[serde(default = "default_reference_equity")]
    pub reference_equity: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            aggregator: AggregatorConfig::default(),
            constructor: ConstructorConfig::default(),
            allocation: AllocationConfig::default(),
        }
    }
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            neutral_band: default_neutral_band(),
            conflict_weight_threshold: default_conflict_weight_threshold(),
            regime_signal_id: default_regime_signal_id(),
            veto_threshold: default_veto_threshold(),
            veto_factor: default_veto_factor(),
            weights: AgentWeightMatrix::default(),
        }
    }
}

impl Default for ConstructorConfig {
    fn default() -> Self {
        Self {
            min_observations: default_min_observations(),
            max_iterations: default_max_iterations(),
            dampening_factor: default_dampening_factor(),
            transition_days: default_transition_days(),
            conviction_floor: default_conviction_floor(),
        }
    }
}

impl Default for AllocationConstraints {
    fn default() -> Self {
        Self {
            max_leverage: default_max_leverage(),
            max_single_position: default_max_single_position(),
            max_asset_class_concentration: default_max_asset_class_concentration(),
            max_risk_budget_share: default_max_risk_budget_share(),
            drift_threshold: default_drift_threshold(),
            min_trade_notional: default_min_trade_notional(),
        }
    }
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self {
            constraints: AllocationConstraints::default(),
            reference_equity: default_reference_equity(),
        }
    }
}

// --------- Helper default functions for serde ---------
fn default_neutral_band() -> f64 {
    0.1
}
fn default_conflict_weight_threshold() -> f64 {
    0.10
}
fn default_regime_signal_id() -> String {
    "CROSS_ASSET_REGIME".to_string()
}
fn default_veto_threshold() -> f64 {
    0.7
}
fn default_veto_factor() -> f64 {
    0.5
}
fn default_min_observations() -> usize {
    60
}
fn default_max_iterations() -> usize {
    1_000
}
fn default_dampening_factor() -> f64 {
    0.60
}
fn default_transition_days() -> u32 {
    3
}
fn default_conviction_floor() -> f64 {
    0.1
}
fn default_max_leverage() -> f64 {
    4.0
}
fn default_max_single_position() -> f64 {
    0.25
}
fn default_max_asset_class_concentration() -> f64 {
    0.60
}
fn default_max_risk_budget_share() -> f64 {
    0.20
}
fn default_drift_threshold() -> f64 {
    0.05
}
fn default_min_trade_notional() -> f64 {
    10_000.0
}
fn default_reference_equity() -> f64 {
    1_000_000.0
}

/// Dampening factor lock range
pub const DAMPENING_RANGE: (f64, f64) = (0.50, 0.70);
/// Regime transition length lock range, in days
pub const TRANSITION_DAYS_RANGE: (u32, u32) = (2, 3);

fn require_positive(name: &str, v: f64) -> Result<()> {
    if !v.is_finite() || v <= 0.0 {
        return Err(Error::ConfigError(format!("{} must be finite and > 0 (got {})", name, v)));
    }
    Ok(())
}

fn require_non_negative(name: &str, v: f64) -> Result<()> {
    if !v.is_finite() || v < 0.0 {
        return Err(Error::ConfigError(format!("{} must be finite and >= 0 (got {})", name, v)));
    }
    Ok(())
}

impl AllocationConstraints {
    pub fn validate(&self) -> Result<()> {
        require_positive("max_leverage", self.max_leverage)?;
        require_positive("max_single_position", self.max_single_position)?;
        require_positive("max_asset_class_concentration", self.max_asset_class_concentration)?;
        require_positive("max_risk_budget_share", self.max_risk_budget_share)?;
        require_non_negative("drift_threshold", self.drift_threshold)?;
        require_non_negative("min_trade_notional", self.min_trade_notional)?;
        Ok(())
    }
}

impl Config {
    /// Serialize default config to TOML string
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }

    /// Load configuration from a specific file path
    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(|e| {
            Error::ConfigError(format!("Failed to read config file {:?}: {}", path.as_ref(), e))
        })?;
        let mut cfg: Self = toml::from_str(&content)
            .map_err(|e| Error::ConfigError(format!("Failed to parse config file: {}", e)))?;
        cfg.merge_env()?;
        Ok(cfg)
    }

    /// Save the configuration to a file
    pub fn save<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::ConfigError(format!("Failed to serialize config: {}", e)))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::ConfigError(format!("Failed to create directory {:?}: {}", parent, e))
            })?;
        }
        std::fs::write(path, content).map_err(|e| {
            Error::ConfigError(format!("Failed to write config file {:?}: {}", path, e))
        })?;
        Ok(())
    }

    /// Validate the configuration for required fields and reasonable values
    pub fn validate(&self) -> Result<()> {
        if self.version.trim().is_empty() {
            return Err(Error::ConfigError("Config version must be set (e.g., '0.1.0')".into()));
        }

        // Aggregator
        self.aggregator.weights.validate()?;
        if self.aggregator.weights.tracked_classes().is_empty() {
            return Err(Error::ConfigError("aggregator.weights tracks no asset class".into()));
        }
        require_non_negative("aggregator.neutral_band", self.aggregator.neutral_band)?;
        if self.aggregator.neutral_band >= 1.0 {
            return Err(Error::ConfigError("aggregator.neutral_band must be < 1".into()));
        }
        require_non_negative(
            "aggregator.conflict_weight_threshold",
            self.aggregator.conflict_weight_threshold,
        )?;
        require_non_negative("aggregator.veto_threshold", self.aggregator.veto_threshold)?;
        if !(0.0..=1.0).contains(&self.aggregator.veto_factor) {
            return Err(Error::ConfigError("aggregator.veto_factor must lie in [0, 1]".into()));
        }
        if self.aggregator.regime_signal_id.trim().is_empty() {
            return Err(Error::ConfigError("aggregator.regime_signal_id must be set".into()));
        }

        // Constructor
        let c = &self.constructor;
        if c.min_observations < 2 {
            return Err(Error::ConfigError("constructor.min_observations must be >= 2".into()));
        }
        if c.max_iterations == 0 {
            return Err(Error::ConfigError("constructor.max_iterations must be > 0".into()));
        }
        let (lo, hi) = DAMPENING_RANGE;
        if !(lo..=hi).contains(&c.dampening_factor) {
            return Err(Error::ConfigError(format!(
                "constructor.dampening_factor must lie in [{:.2}, {:.2}]",
                lo, hi
            )));
        }
        let (dlo, dhi) = TRANSITION_DAYS_RANGE;
        if !(dlo..=dhi).contains(&c.transition_days) {
            return Err(Error::ConfigError(format!(
                "constructor.transition_days must lie in [{}, {}]",
                dlo, dhi
            )));
        }
        if !(0.0..=1.0).contains(&c.conviction_floor) {
            return Err(Error::ConfigError("constructor.conviction_floor must lie in [0, 1]".into()));
        }

        // Allocation
        self.allocation.constraints.validate()?;
        require_positive("allocation.reference_equity", self.allocation.reference_equity)?;
        Ok(())
    }

    /// Load configuration from default locations
    pub fn load() -> Result<Self> {
        if let Ok(config) = Self::from_file("macrobook.toml") {
            return Ok(config);
        }

        if let Some(mut path) = dirs::config_dir() {
            path.push("macrobook");
            path.push("config.toml");
            if path.exists() {
                return Self::from_file(path);
            }
        }

        let mut config = Self::default();
        config.merge_env()?;
        Ok(config)
    }

    /// Merge environment variables into the configuration
    pub fn merge_env(&mut self) -> Result<()> {
        let limits = &mut self.allocation.constraints;
        if let Some(v) = env_f64("MACROBOOK_MAX_LEVERAGE")? {
            limits.max_leverage = v;
        }
        if let Some(v) = env_f64("MACROBOOK_MAX_SINGLE_POSITION")? {
            limits.max_single_position = v;
        }
        if let Some(v) = env_f64("MACROBOOK_DRIFT_THRESHOLD")? {
            limits.drift_threshold = v;
        }
        if let Some(v) = env_f64("MACROBOOK_REFERENCE_EQUITY")? {
            self.allocation.reference_equity = v;
        }
        Ok(())
    }
}

fn env_f64(key: &str) -> Result<Option<f64>> {
    match env::var(key) {
        | Ok(raw) => raw
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|e| Error::ConfigError(format!("{}={:?} is not a number: {}", key, raw, e))),
        | Err(_) => Ok(None),
    }
}
