//! Signal reduction: per-class agent consensus and strategy conflict detection.

pub mod aggregator;
pub mod conflicts;

pub use aggregator::{AgentContribution, AggregatedSignal, SignalAggregator};
pub use conflicts::{detect_strategy_conflicts, resolve_strategy_class};
