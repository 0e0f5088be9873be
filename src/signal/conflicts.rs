//! Opposing-direction detection across strategies.
//!
//! Strategies are grouped by asset class (explicit map first, id prefix second)
//! and a class is flagged when one strategy holds a nonzero LONG while a
//! different strategy holds a nonzero SHORT. The resulting map feeds the
//! constructor's conflict dampening stage.

use log::warn;
use std::collections::{BTreeMap, BTreeSet};

use crate::utils::types::{AssetClass, AssetClassMap, ConflictMap, StrategyPositions};

/// Asset class of a strategy: explicit entry first, then the id prefix.
pub fn resolve_strategy_class(strategy_id: &str, overrides: Option<&AssetClassMap>) -> Option<AssetClass> {
    overrides
        .and_then(|m| m.get(strategy_id).copied())
        .or_else(|| AssetClass::from_strategy_prefix(strategy_id))
}

/// Flag every asset class in which strategies disagree on direction.
///
/// Only classes with at least one conflict appear in the returned map.
pub fn detect_strategy_conflicts(
    positions: &StrategyPositions, strategy_classes: Option<&AssetClassMap>,
) -> ConflictMap {
    // class -> strategy -> (long instruments, short instruments)
    let mut sides: BTreeMap<AssetClass, BTreeMap<&str, (BTreeSet<&str>, BTreeSet<&str>)>> =
        BTreeMap::new();

    for (strategy_id, list) in positions {
        let Some(class) = resolve_strategy_class(strategy_id, strategy_classes) else {
            continue;
        };
        let entry = sides.entry(class).or_default().entry(strategy_id.as_str()).or_default();
        for pos in list {
            if pos.is_long() {
                entry.0.insert(pos.instrument.as_str());
            } else if pos.is_short() {
                entry.1.insert(pos.instrument.as_str());
            }
        }
    }

    let mut conflicts = ConflictMap::new();
    for (class, strategies) in sides {
        let mut details = Vec::new();
        for (long_id, (longs, _)) in strategies.iter().filter(|(_, s)| !s.0.is_empty()) {
            for (short_id, (_, shorts)) in strategies.iter().filter(|(_, s)| !s.1.is_empty()) {
                if long_id == short_id {
                    continue;
                }
                details.push(format!(
                    "{} LONG [{}] vs {} SHORT [{}]",
                    long_id,
                    join(longs),
                    short_id,
                    join(shorts)
                ));
            }
        }
        if !details.is_empty() {
            warn!("{}: {} opposing strategy pair(s)", class, details.len());
            conflicts.insert(class, details);
        }
    }
    conflicts
}

fn join(set: &BTreeSet<&str>) -> String {
    set.iter().copied().collect::<Vec<_>>().join(", ")
}
