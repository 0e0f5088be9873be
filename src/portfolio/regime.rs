//! Macro regime classification and the exposure ramp between regimes.
//!
//! The ramp is a pure function `(state, score) -> (state, scale)`; the
//! constructor owns the only live copy of the state and feeds it one score per
//! trading date, in order.

use serde::{Deserialize, Serialize};

use crate::config::TRANSITION_DAYS_RANGE;

/// Scores below this are risk-on
pub const RISK_ON_THRESHOLD: f64 = -0.3;
/// Scores above this are risk-off
pub const RISK_OFF_THRESHOLD: f64 = 0.3;

/// Discrete risk posture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Regime {
    RiskOn,
    Neutral,
    RiskOff,
}

impl Regime {
    /// Classify a cross-asset regime score (negative = risk appetite). Non-finite scores are neutral.
    pub fn from_score(score: f64) -> Self {
        if score < RISK_ON_THRESHOLD {
            Regime::RiskOn
        } else if score > RISK_OFF_THRESHOLD {
            Regime::RiskOff
        } else {
            Regime::Neutral
        }
    }

    /// Gross exposure multiplier once the regime is fully in force.
    pub fn target_scale(&self) -> f64 {
        match self {
            | Regime::RiskOn => 1.0,
            | Regime::Neutral => 0.7,
            | Regime::RiskOff => 0.4,
        }
    }
}

impl std::fmt::Display for Regime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            | Regime::RiskOn => "RISK_ON",
            | Regime::Neutral => "NEUTRAL",
            | Regime::RiskOff => "RISK_OFF",
        };
        f.write_str(s)
    }
}

/// Where the ramp currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegimePhase {
    NoHistory,
    Steady,
    Transitioning,
}

/// Persistent ramp memory.
///
/// While `target_regime` is set the applied scale is
/// `ramp_start_scale + (target_scale - ramp_start_scale) * day_counter / transition_days`,
/// which always lies between the two endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RegimeState {
    pub committed_regime: Option<Regime>,
    pub committed_scale: f64,
    pub target_regime: Option<Regime>,
    pub ramp_start_scale: f64,
    pub day_counter: u32,
}

fn lock_days(transition_days: u32) -> u32 {
    let (lo, hi) = TRANSITION_DAYS_RANGE;
    transition_days.clamp(lo, hi)
}

impl RegimeState {
    pub fn phase(&self) -> RegimePhase {
        match (self.committed_regime, self.target_regime) {
            | (None, _) => RegimePhase::NoHistory,
            | (Some(_), None) => RegimePhase::Steady,
            | (Some(_), Some(_)) => RegimePhase::Transitioning,
        }
    }

    /// Scale the state currently implies (the last applied scale).
    pub fn current_scale(&self, transition_days: u32) -> f64 {
        match self.target_regime {
            | Some(target) => {
                let frac = (self.day_counter as f64 / lock_days(transition_days) as f64).min(1.0);
                self.ramp_start_scale + (target.target_scale() - self.ramp_start_scale) * frac
            }
            | None => self.committed_scale,
        }
    }

    /// Advance one trading date. Returns the next state and the scale to apply.
    pub fn step(&self, score: f64, transition_days: u32) -> (RegimeState, f64) {
        let regime = Regime::from_score(score);
        let days = lock_days(transition_days);

        let Some(committed) = self.committed_regime else {
            let next = RegimeState {
                committed_regime: Some(regime),
                committed_scale: regime.target_scale(),
                ..RegimeState::default()
            };
            return (next, next.committed_scale);
        };

        if regime == committed {
            let next = RegimeState {
                committed_regime: Some(committed),
                committed_scale: committed.target_scale(),
                ..RegimeState::default()
            };
            return (next, next.committed_scale);
        }

        let mut next = *self;
        if self.target_regime == Some(regime) {
            next.day_counter = next.day_counter.saturating_add(1);
        } else {
            // new or reversed target: restart from wherever the last call left the scale
            next.ramp_start_scale = self.current_scale(days);
            next.target_regime = Some(regime);
            next.day_counter = 1;
        }

        let frac = (next.day_counter as f64 / days as f64).min(1.0);
        let target_scale = regime.target_scale();
        if frac >= 1.0 {
            let done = RegimeState {
                committed_regime: Some(regime),
                committed_scale: target_scale,
                ..RegimeState::default()
            };
            return (done, target_scale);
        }
        let scale = next.ramp_start_scale + (target_scale - next.ramp_start_scale) * frac;
        (next, scale)
    }
}
