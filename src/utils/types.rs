//! Common types shared by the aggregator, constructor and allocator.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

/// Weight magnitudes at or below this are treated as flat.
pub const WEIGHT_EPSILON: f64 = 1e-9;

/// Instrument → weight. Ordered so reports and trade lists are deterministic.
pub type Weights = BTreeMap<String, f64>;

/// Strategy id → positions produced by that strategy.
pub type StrategyPositions = BTreeMap<String, Vec<Position>>;

/// Instrument (or strategy id) → asset class lookup supplied by the caller.
pub type AssetClassMap = HashMap<String, AssetClass>;

/// Asset class → human readable conflict descriptions.
pub type ConflictMap = BTreeMap<AssetClass, Vec<String>>;

/// Directional view carried by signals and positions
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Long,
    Short,
    #[default]
    Neutral,
}

impl Direction {
    /// Signed score used in consensus sums: +1 long, -1 short, 0 neutral.
    pub fn score(&self) -> f64 {
        match self {
            | Direction::Long => 1.0,
            | Direction::Short => -1.0,
            | Direction::Neutral => 0.0,
        }
    }

    /// Classify a net score against a symmetric neutral band.
    pub fn from_score(score: f64, neutral_band: f64) -> Self {
        if score > neutral_band {
            Direction::Long
        } else if score < -neutral_band {
            Direction::Short
        } else {
            Direction::Neutral
        }
    }

    pub fn is_neutral(&self) -> bool {
        matches!(self, Direction::Neutral)
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            | "long" | "buy" => Ok(Direction::Long),
            | "short" | "sell" => Ok(Direction::Short),
            | "neutral" | "flat" => Ok(Direction::Neutral),
            | other => Err(format!("Invalid direction: {}", other)),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            | Direction::Long => "LONG",
            | Direction::Short => "SHORT",
            | Direction::Neutral => "NEUTRAL",
        };
        f.write_str(s)
    }
}

/// Strength bucket attached to a signal or position
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Strength {
    Strong,
    Moderate,
    Weak,
    NoSignal,
}

impl Strength {
    /// Conviction multiplier used by the portfolio overlay.
    pub fn multiplier(&self) -> f64 {
        match self {
            | Strength::Strong => 1.0,
            | Strength::Moderate => 0.6,
            | Strength::Weak => 0.3,
            | Strength::NoSignal => 0.0,
        }
    }
}

impl FromStr for Strength {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            | "strong" => Ok(Strength::Strong),
            | "moderate" => Ok(Strength::Moderate),
            | "weak" => Ok(Strength::Weak),
            | "no_signal" | "none" => Ok(Strength::NoSignal),
            | other => Err(format!("Invalid strength: {}", other)),
        }
    }
}

/// Asset classes tracked by the book
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssetClass {
    Fx,
    Rates,
    Inflation,
    Cupom,
    Sovereign,
    CrossAsset,
}

impl AssetClass {
    pub const ALL: [AssetClass; 6] = [
        AssetClass::Fx,
        AssetClass::Rates,
        AssetClass::Inflation,
        AssetClass::Cupom,
        AssetClass::Sovereign,
        AssetClass::CrossAsset,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            | AssetClass::Fx => "FX",
            | AssetClass::Rates => "RATES",
            | AssetClass::Inflation => "INFLATION",
            | AssetClass::Cupom => "CUPOM",
            | AssetClass::Sovereign => "SOVEREIGN",
            | AssetClass::CrossAsset => "CROSS_ASSET",
        }
    }

    /// Resolve a strategy id such as `RATES_BR_01` by its prefix.
    pub fn from_strategy_prefix(strategy_id: &str) -> Option<Self> {
        let prefix = strategy_id.split('_').next()?.to_uppercase();
        match prefix.as_str() {
            | "FX" => Some(AssetClass::Fx),
            | "RATES" | "DI" => Some(AssetClass::Rates),
            | "INF" => Some(AssetClass::Inflation),
            | "CUPOM" => Some(AssetClass::Cupom),
            | "SOV" => Some(AssetClass::Sovereign),
            | "CROSS" => Some(AssetClass::CrossAsset),
            | _ => None,
        }
    }
}

impl FromStr for AssetClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_uppercase().replace('-', "_");
        AssetClass::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == upper)
            .ok_or_else(|| format!("Invalid asset class: {}", s))
    }
}

impl fmt::Display for AssetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A directional opinion produced by an analytical agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub signal_id: String,
    pub agent_id: String,
    pub direction: Direction,
    pub strength: Strength,
    /// Confidence in [0, 1]
    pub confidence: f64,
    pub value: f64,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Signal {
    pub fn new(
        signal_id: &str, agent_id: &str, direction: Direction, strength: Strength,
        confidence: f64, value: f64,
    ) -> Self {
        Self {
            signal_id: signal_id.to_string(),
            agent_id: agent_id.to_string(),
            direction,
            strength,
            confidence,
            value,
            metadata: HashMap::new(),
        }
    }

    pub fn is_composite(&self) -> bool {
        self.signal_id.ends_with("_COMPOSITE")
    }
}

/// Everything one agent reported for a run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentReport {
    pub agent_id: String,
    #[serde(default)]
    pub signals: Vec<Signal>,
}

impl AgentReport {
    pub fn new(agent_id: &str, signals: Vec<Signal>) -> Self {
        Self { agent_id: agent_id.to_string(), signals }
    }

    /// The agent's composite signal, or its first signal when none is tagged composite.
    pub fn headline_signal(&self) -> Option<&Signal> {
        self.signals.iter().find(|s| s.is_composite()).or_else(|| self.signals.first())
    }
}

/// A raw strategy position expressed as a portfolio weight
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub strategy_id: String,
    pub instrument: String,
    /// Signed weight (positive = long)
    pub weight: f64,
    pub direction: Direction,
    pub confidence: f64,
    /// Free-form tags; `strength` feeds the conviction overlay.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Position {
    pub fn new(
        strategy_id: &str, instrument: &str, weight: f64, direction: Direction, confidence: f64,
    ) -> Self {
        Self {
            strategy_id: strategy_id.to_string(),
            instrument: instrument.to_string(),
            weight,
            direction,
            confidence,
            metadata: HashMap::new(),
        }
    }

    pub fn with_strength(mut self, strength: &str) -> Self {
        self.metadata.insert("strength".to_string(), strength.to_string());
        self
    }

    /// Strength bucket recorded in metadata, if present and recognised.
    pub fn strength(&self) -> Option<Strength> {
        self.metadata.get("strength").and_then(|s| s.parse().ok())
    }

    /// Nonzero long exposure
    pub fn is_long(&self) -> bool {
        self.direction == Direction::Long && self.weight.abs() > WEIGHT_EPSILON
    }

    /// Nonzero short exposure
    pub fn is_short(&self) -> bool {
        self.direction == Direction::Short && self.weight.abs() > WEIGHT_EPSILON
    }
}
