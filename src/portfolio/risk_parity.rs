//! Equal-risk-contribution weights.
//!
//! Minimises `sum_i (rc_i - 1/n)^2`, where `rc_i = w_i (Σw)_i / wᵀΣw` is the
//! instrument's share of portfolio variance, subject to `lower <= w_i <= upper`
//! and `sum_i w_i = 1`. The solver is projected gradient descent with Armijo
//! backtracking, warm-started from the unconstrained ERC point found by cyclical
//! coordinate descent. Iterations are capped; callers treat `None` as
//! non-convergence and fall back to equal weights.

use log::debug;
use ndarray::{Array1, Array2};

use super::covariance::{is_square, portfolio_variance};

const ARMIJO_C: f64 = 1e-4;
const MAX_BACKTRACKS: usize = 60;

/// Converged optimizer output
#[derive(Debug, Clone, PartialEq)]
pub struct RiskParitySolution {
    pub weights: Vec<f64>,
    pub iterations: usize,
    pub objective: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct RiskParityOptimizer {
    pub max_iterations: usize,
    pub tolerance: f64,
    pub lower: f64,
    pub upper: f64,
}

impl Default for RiskParityOptimizer {
    fn default() -> Self {
        Self { max_iterations: 1_000, tolerance: 1e-10, lower: 0.01, upper: 1.0 }
    }
}

/// `1/n` for each of `n` instruments.
pub fn equal_weights(n: usize) -> Vec<f64> {
    if n == 0 {
        return Vec::new();
    }
    vec![1.0 / n as f64; n]
}

/// Each instrument's share of portfolio variance. `None` when variance is ~0 or shapes differ.
pub fn risk_contributions(weights: &Array1<f64>, cov: &Array2<f64>) -> Option<Array1<f64>> {
    if !is_square(cov, weights.len()) {
        return None;
    }
    let marginal = cov.dot(weights);
    let var = weights.dot(&marginal);
    if !var.is_finite() || var.abs() < 1e-18 {
        return None;
    }
    Some(weights * &marginal / var)
}

impl RiskParityOptimizer {
    pub fn new(max_iterations: usize) -> Self {
        Self { max_iterations, ..Self::default() }
    }

    /// Solve for bounded ERC weights. `None` on malformed input or non-convergence.
    pub fn solve(&self, cov: &Array2<f64>) -> Option<RiskParitySolution> {
        let n = cov.nrows();
        if n == 0 || !is_square(cov, n) {
            return None;
        }
        if n == 1 {
            return Some(RiskParitySolution { weights: vec![1.0], iterations: 0, objective: 0.0 });
        }
        if (n as f64) * self.lower > 1.0 || (n as f64) * self.upper < 1.0 {
            return None;
        }
        if cov.diag().iter().any(|v| *v <= 0.0) {
            return None;
        }

        let start = self.erc_warm_start(cov).unwrap_or_else(|| inverse_volatility(cov));
        let mut w = self.project(&start);
        let mut f = objective(&w, cov)?;
        let mut step: f64 = 1.0;

        for iter in 0..self.max_iterations {
            if f < 1e-20 {
                debug!("risk parity converged after {} iterations (objective {:.3e})", iter, f);
                return Some(solution(w, iter, f));
            }
            let g = gradient(&w, cov)?;

            let mut t = (step * 2.0).min(1e6);
            let mut accepted = None;
            for _ in 0..MAX_BACKTRACKS {
                let cand = self.project(&(&w - &(&g * t)));
                let descent = g.dot(&(&cand - &w));
                if let Some(fc) = objective(&cand, cov) {
                    if fc <= f + ARMIJO_C * descent {
                        accepted = Some((cand, fc));
                        break;
                    }
                }
                t *= 0.5;
            }

            let Some((cand, fc)) = accepted else {
                // no descent direction left: stationary if the projected gradient step is tiny
                let full_step = self.project(&(&w - &g));
                if max_abs_diff(&full_step, &w) < 1e-8 {
                    return Some(solution(w, iter, f));
                }
                return None;
            };

            let moved = max_abs_diff(&cand, &w);
            w = cand;
            f = fc;
            step = t;
            if moved < self.tolerance {
                debug!("risk parity converged after {} iterations (objective {:.3e})", iter + 1, f);
                return Some(solution(w, iter + 1, f));
            }
        }
        None
    }

    /// Unconstrained ERC point by cyclical coordinate descent on
    /// `½ yᵀΣy - (1/n) Σ ln y_i`, normalised to sum to one.
    fn erc_warm_start(&self, cov: &Array2<f64>) -> Option<Array1<f64>> {
        let n = cov.nrows();
        let budget = 1.0 / n as f64;
        let mut y = inverse_volatility(cov);
        for _ in 0..self.max_iterations {
            let mut delta: f64 = 0.0;
            for i in 0..n {
                let b: f64 = (0..n).filter(|j| *j != i).map(|j| cov[[i, j]] * y[j]).sum();
                let a = cov[[i, i]];
                let yi = (-b + (b * b + 4.0 * a * budget).sqrt()) / (2.0 * a);
                if !yi.is_finite() || yi <= 0.0 {
                    return None;
                }
                delta = delta.max((yi - y[i]).abs());
                y[i] = yi;
            }
            if delta < 1e-14 {
                let total = y.sum();
                return Some(y / total);
            }
        }
        None
    }

    /// Euclidean projection onto `{lower <= w_i <= upper, sum w = 1}` by bisection on the shift.
    fn project(&self, v: &Array1<f64>) -> Array1<f64> {
        let clamp_sum = |tau: f64| -> f64 { v.iter().map(|x| (x - tau).clamp(self.lower, self.upper)).sum() };
        let max = v.fold(f64::NEG_INFINITY, |a, b| a.max(*b));
        let min = v.fold(f64::INFINITY, |a, b| a.min(*b));
        let mut lo = min - self.upper;
        let mut hi = max - self.lower;
        for _ in 0..200 {
            let mid = 0.5 * (lo + hi);
            if clamp_sum(mid) > 1.0 {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        let tau = 0.5 * (lo + hi);
        v.mapv(|x| (x - tau).clamp(self.lower, self.upper))
    }
}

fn solution(w: Array1<f64>, iterations: usize, objective: f64) -> RiskParitySolution {
    RiskParitySolution { weights: w.to_vec(), iterations, objective }
}

fn inverse_volatility(cov: &Array2<f64>) -> Array1<f64> {
    let inv = cov.diag().mapv(|v| 1.0 / v.sqrt());
    let total = inv.sum();
    inv / total
}

fn objective(w: &Array1<f64>, cov: &Array2<f64>) -> Option<f64> {
    let target = 1.0 / w.len() as f64;
    let rc = risk_contributions(w, cov)?;
    Some(rc.mapv(|r| (r - target) * (r - target)).sum())
}

/// Analytic gradient of the objective:
/// `g_j = 2/V * (e_j m_j + (Σ(e∘w))_j - 2 m_j Σ_i e_i rc_i)` with `m = Σw`, `e = rc - 1/n`.
fn gradient(w: &Array1<f64>, cov: &Array2<f64>) -> Option<Array1<f64>> {
    let target = 1.0 / w.len() as f64;
    let m = cov.dot(w);
    let var = portfolio_variance(cov, w);
    if var.abs() < 1e-18 {
        return None;
    }
    let rc = w * &m / var;
    let e = rc.mapv(|r| r - target);
    let c = e.dot(&rc);
    let cov_ew = cov.dot(&(&e * w));
    Some((&e * &m + &cov_ew - &m * (2.0 * c)) * (2.0 / var))
}

fn max_abs_diff(a: &Array1<f64>, b: &Array1<f64>) -> f64 {
    (a - b).fold(0.0, |acc: f64, d| acc.max(d.abs()))
}
