//! Portfolio construction: covariance estimation, risk parity, regime ramp
//! and the five-stage constructor that ties them together.

pub mod constructor;
pub mod covariance;
pub mod regime;
pub mod risk_parity;

pub use constructor::{PortfolioConstructor, PortfolioTarget};
pub use covariance::{ledoit_wolf, ShrunkCovariance};
pub use regime::{Regime, RegimePhase, RegimeState};
pub use risk_parity::{RiskParityOptimizer, RiskParitySolution};
