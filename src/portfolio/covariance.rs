//! Covariance estimation from an observations × instruments returns matrix.
//!
//! Inputs arrive as row-major `Vec<Vec<f64>>` (one row per observation);
//! estimates are returned as `ndarray` matrices.

use ndarray::{Array1, Array2};
use statrs::statistics::Statistics;

/// Covariance estimate together with the shrinkage intensity used.
#[derive(Debug, Clone, PartialEq)]
pub struct ShrunkCovariance {
    pub matrix: Array2<f64>,
    /// Weight on the scaled-identity target, in [0, 1]
    pub shrinkage: f64,
}

/// Column-demeaned observation matrix; `None` for ragged, empty or non-finite input.
fn demeaned(returns: &[Vec<f64>]) -> Option<Array2<f64>> {
    let t = returns.len();
    let n = returns.first()?.len();
    if t < 2 || n == 0 {
        return None;
    }
    if returns.iter().any(|row| row.len() != n || row.iter().any(|x| !x.is_finite())) {
        return None;
    }
    let mut x = Array2::from_shape_vec((t, n), returns.concat()).ok()?;
    for mut column in x.columns_mut() {
        let mean = column.iter().mean();
        column.mapv_inplace(|v| v - mean);
    }
    Some(x)
}

/// Maximum-likelihood (1/T) covariance of already centred data.
fn scatter(x: &Array2<f64>) -> Array2<f64> {
    let s = x.t().dot(x) / x.nrows() as f64;
    // exact symmetry regardless of the kernel's summation order
    (&s + &s.t()) * 0.5
}

/// Sample covariance (1/T normalisation).
pub fn sample_covariance(returns: &[Vec<f64>]) -> Option<Array2<f64>> {
    demeaned(returns).map(|x| scatter(&x))
}

/// Ledoit–Wolf shrinkage toward `mu * I`, `mu = trace(S) / n`.
pub fn ledoit_wolf(returns: &[Vec<f64>]) -> Option<ShrunkCovariance> {
    let x = demeaned(returns)?;
    let s = scatter(&x);
    let (t, n) = x.dim();
    let tf = t as f64;
    let nf = n as f64;

    let trace = s.diag().sum();
    let mu = trace / nf;

    // sum over t of (sum_i x_ti^2)^2
    let beta_raw: f64 = x
        .rows()
        .into_iter()
        .map(|row| {
            let sq = row.dot(&row);
            sq * sq
        })
        .sum();
    let frob_sq: f64 = s.iter().map(|v| v * v).sum();

    let beta = (beta_raw / tf - frob_sq) / (nf * tf);
    let delta = (frob_sq - 2.0 * mu * trace + nf * mu * mu) / nf;

    let shrinkage = if delta <= 0.0 || !delta.is_finite() {
        0.0
    } else {
        (beta.min(delta) / delta).clamp(0.0, 1.0)
    };

    let mut matrix = s * (1.0 - shrinkage);
    matrix.diag_mut().mapv_inplace(|v| v + shrinkage * mu);
    Some(ShrunkCovariance { matrix, shrinkage })
}

/// `wᵀ · cov · w`
pub fn portfolio_variance(cov: &Array2<f64>, w: &Array1<f64>) -> f64 {
    w.dot(&cov.dot(w))
}

/// True when `cov` is an `n × n` matrix of finite values.
pub fn is_square(cov: &Array2<f64>, n: usize) -> bool {
    cov.dim() == (n, n) && cov.iter().all(|v| v.is_finite())
}
