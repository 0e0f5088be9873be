//! Per-instrument risk budget check.

use log::debug;
use ndarray::{Array1, Array2};

use crate::portfolio::covariance::is_square;
use crate::portfolio::risk_parity::risk_contributions;
use crate::utils::types::Weights;

/// Flag instruments whose share of portfolio variance exceeds `max_share`.
///
/// `covariance` rows and columns follow `instruments`; instruments absent from
/// `weights` count as zero. Missing or mismatched inputs and a numerically
/// zero variance all yield an empty list.
pub fn check_risk_budget(
    weights: &Weights, covariance: Option<&Array2<f64>>, instruments: Option<&[String]>,
    max_share: f64,
) -> Vec<String> {
    let (Some(cov), Some(instruments)) = (covariance, instruments) else {
        return Vec::new();
    };
    if instruments.is_empty() || !is_square(cov, instruments.len()) {
        debug!("risk budget skipped: covariance does not match {} instruments", instruments.len());
        return Vec::new();
    }
    let w: Array1<f64> = instruments.iter().map(|i| weights.get(i).copied().unwrap_or(0.0)).collect();
    let Some(shares) = risk_contributions(&w, cov) else {
        return Vec::new();
    };
    instruments
        .iter()
        .zip(shares.iter())
        .filter(|(_, share)| **share > max_share)
        .map(|(instrument, share)| {
            format!("{}: risk share {:.4} exceeds budget {:.4}", instrument, share, max_share)
        })
        .collect()
}
