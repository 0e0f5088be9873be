//! # Macrobook
//! Signal aggregation, portfolio construction and capital allocation for a
//! Brazilian macro book.
//!
//! Agent reports and strategy positions flow one way:
//! [`signal::SignalAggregator`] → [`portfolio::PortfolioConstructor`] →
//! [`risk::CapitalAllocator`]. [`pipeline::Pipeline`] wires the three for a
//! daily run.

pub use crate::utils::error::{Error, Result};

pub mod config;
pub mod pipeline;
pub mod portfolio;
pub mod risk;
pub mod signal;
pub mod utils;

pub use crate::config::Config;
pub use crate::pipeline::{Pipeline, RunInputs, RunOutput};
