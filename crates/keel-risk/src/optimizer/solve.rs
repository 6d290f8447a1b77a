//! Per-objective solvers
//!
//! Long-only problems go through [`SimplexQp`]. With short selling the budget
//! constraint is the only one left and each objective has a closed form in
//! `Sigma^-1`.

use super::qp::SimplexQp;
use super::{Objective, OptimizerError};
use keel_stats::Cholesky;
use ndarray::{Array1, Array2};
use tracing::debug;

/// Bisection steps on the return multiplier
const BISECTION_STEPS: usize = 200;

/// Doublings of the upper multiplier before the target is declared unreachable
const MAX_DOUBLINGS: usize = 60;

/// Problem data shared by every objective
#[derive(Debug, Clone, Copy)]
pub(crate) struct Problem<'a> {
    pub(crate) expected_returns: &'a Array1<f64>,
    pub(crate) covariance: &'a Array2<f64>,
    pub(crate) risk_free_rate: f64,
    pub(crate) max_iterations: usize,
}

impl Problem<'_> {
    /// Raw weights for `objective`.
    pub(crate) fn solve(
        &self,
        objective: Objective,
        allow_short: bool,
    ) -> Result<Array1<f64>, OptimizerError> {
        if allow_short {
            self.solve_unconstrained(objective)
        } else {
            match objective {
                Objective::MinVariance => self.min_variance(),
                Objective::MaxSharpe => self.max_sharpe(),
                Objective::TargetReturn(target) => self.target_return(target),
            }
        }
    }

    fn n(&self) -> usize {
        self.expected_returns.len()
    }

    fn min_variance(&self) -> Result<Array1<f64>, OptimizerError> {
        self.penalized(0.0)
    }

    /// `min 1/2 w'Sw - lambda mu'w` over the long-only simplex.
    fn penalized(&self, lambda: f64) -> Result<Array1<f64>, OptimizerError> {
        let ones = Array1::<f64>::ones(self.n());
        let c = self.expected_returns * lambda;
        SimplexQp {
            q: self.covariance,
            c: &c,
            a: &ones,
            b: 1.0,
        }
        .solve(self.max_iterations)
    }

    fn max_sharpe(&self) -> Result<Array1<f64>, OptimizerError> {
        let excess = self.expected_returns - self.risk_free_rate;
        if excess.iter().all(|&e| e <= 0.0) {
            return Err(OptimizerError::Infeasible(format!(
                "no asset has an expected return above the risk-free rate {}",
                self.risk_free_rate
            )));
        }
        let zeros = Array1::<f64>::zeros(self.n());
        let y = SimplexQp {
            q: self.covariance,
            c: &zeros,
            a: &excess,
            b: 1.0,
        }
        .solve(self.max_iterations)?;
        let total = y.sum();
        if !(total > 0.0 && total.is_finite()) {
            return Err(OptimizerError::Numerical(format!(
                "max-Sharpe reformulation produced total {total}"
            )));
        }
        Ok(y / total)
    }

    fn target_return(&self, target: f64) -> Result<Array1<f64>, OptimizerError> {
        let mu = self.expected_returns;
        let best = mu.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if !target.is_finite() || target > best {
            return Err(OptimizerError::Infeasible(format!(
                "target return {target} exceeds the best expected return {best}"
            )));
        }

        let reaches = |w: &Array1<f64>| mu.dot(w) >= target;

        let base = self.min_variance()?;
        if reaches(&base) {
            return Ok(base);
        }

        let mut hi = 1.0;
        let mut w_hi = self.penalized(hi)?;
        let mut doublings = 0;
        while !reaches(&w_hi) {
            if doublings == MAX_DOUBLINGS {
                return Err(OptimizerError::Infeasible(format!(
                    "target return {target} not reached by the return multiplier"
                )));
            }
            hi *= 2.0;
            w_hi = self.penalized(hi)?;
            doublings += 1;
        }

        let mut lo = 0.0;
        for _ in 0..BISECTION_STEPS {
            if hi - lo <= 1e-12 * hi {
                break;
            }
            let mid = 0.5 * (lo + hi);
            let w_mid = self.penalized(mid)?;
            if reaches(&w_mid) {
                hi = mid;
                w_hi = w_mid;
            } else {
                lo = mid;
            }
        }
        debug!(target, multiplier = hi, "Target return bracketed");
        Ok(w_hi)
    }

    fn solve_unconstrained(&self, objective: Objective) -> Result<Array1<f64>, OptimizerError> {
        let chol = Cholesky::new(self.covariance)
            .map_err(|e| OptimizerError::Numerical(e.to_string()))?;
        let ones = Array1::<f64>::ones(self.n());
        let inv_ones = chol.solve(ones.view());

        match objective {
            Objective::MinVariance => normalize(inv_ones, "min-variance"),
            Objective::MaxSharpe => {
                let excess = self.expected_returns - self.risk_free_rate;
                let z = chol.solve(excess.view());
                if !(z.sum() > 0.0) {
                    return Err(OptimizerError::Infeasible(
                        "tangency portfolio has a non-positive budget".to_string(),
                    ));
                }
                normalize(z, "max-Sharpe")
            }
            Objective::TargetReturn(target) => {
                let mu = self.expected_returns;
                let inv_mu = chol.solve(mu.view());
                let a = ones.dot(&inv_ones);
                let b = ones.dot(&inv_mu);
                let c = mu.dot(&inv_mu);
                let d = a * c - b * b;
                if !(d > f64::EPSILON * a * c) {
                    return Err(OptimizerError::Infeasible(
                        "expected returns do not span a frontier".to_string(),
                    ));
                }
                let w = (inv_ones * (c - target * b) + inv_mu * (target * a - b)) / d;
                Ok(w)
            }
        }
    }
}

fn normalize(z: Array1<f64>, label: &str) -> Result<Array1<f64>, OptimizerError> {
    let total = z.sum();
    if !(total.abs() > f64::EPSILON && total.is_finite()) {
        return Err(OptimizerError::Numerical(format!(
            "{label} weights cannot be normalized (total {total})"
        )));
    }
    Ok(z / total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn problem<'a>(mu: &'a Array1<f64>, cov: &'a Array2<f64>, rf: f64) -> Problem<'a> {
        Problem {
            expected_returns: mu,
            covariance: cov,
            risk_free_rate: rf,
            max_iterations: 100,
        }
    }

    #[test]
    fn test_long_only_max_sharpe_diagonal() {
        // Uncorrelated: y_i proportional to excess_i / var_i
        let mu = array![0.03, 0.02];
        let cov = array![[0.04, 0.0], [0.0, 0.01]];
        let w = problem(&mu, &cov, 0.01)
            .solve(Objective::MaxSharpe, false)
            .unwrap();
        // 0.02/0.04 = 0.5, 0.01/0.01 = 1.0
        assert_abs_diff_eq!(w[0], 1.0 / 3.0, epsilon = 1e-10);
        assert_abs_diff_eq!(w[1], 2.0 / 3.0, epsilon = 1e-10);
    }

    #[test]
    fn test_max_sharpe_excludes_losers() {
        let mu = array![0.03, 0.0];
        let cov = array![[0.04, 0.0], [0.0, 0.01]];
        let w = problem(&mu, &cov, 0.01)
            .solve(Objective::MaxSharpe, false)
            .unwrap();
        assert_abs_diff_eq!(w[0], 1.0, epsilon = 1e-12);
        assert_eq!(w[1], 0.0);
    }

    #[test]
    fn test_max_sharpe_infeasible() {
        let mu = array![0.0, -0.01];
        let cov = Array2::<f64>::eye(2);
        let result = problem(&mu, &cov, 0.0).solve(Objective::MaxSharpe, false);
        assert!(matches!(result, Err(OptimizerError::Infeasible(_))));
    }

    #[test]
    fn test_target_return_reached() {
        let mu = array![0.01, 0.02, 0.03];
        let cov = array![[0.01, 0.0, 0.0], [0.0, 0.02, 0.0], [0.0, 0.0, 0.03]];
        let w = problem(&mu, &cov, 0.0)
            .solve(Objective::TargetReturn(0.025), false)
            .unwrap();
        assert!(mu.dot(&w) >= 0.025);
        assert_abs_diff_eq!(mu.dot(&w), 0.025, epsilon = 1e-9);
        assert_abs_diff_eq!(w.sum(), 1.0, epsilon = 1e-12);
        assert!(w.iter().all(|&v| v >= 0.0));
    }

    #[test]
    fn test_target_return_above_best_is_infeasible() {
        let mu = array![0.01, 0.02];
        let cov = Array2::<f64>::eye(2);
        let result = problem(&mu, &cov, 0.0).solve(Objective::TargetReturn(0.05), false);
        assert!(matches!(result, Err(OptimizerError::Infeasible(_))));
    }

    #[test]
    fn test_unconstrained_min_variance() {
        let mu = array![0.01, 0.02];
        let cov = array![[1.0, 0.9], [0.9, 1.0]];
        let w = problem(&mu, &cov, 0.0)
            .solve(Objective::MinVariance, true)
            .unwrap();
        assert_abs_diff_eq!(w[0], 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(w[1], 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_unconstrained_target_return_allows_shorts() {
        let mu = array![0.01, 0.02];
        let cov = array![[0.04, 0.0], [0.0, 0.04]];
        let w = problem(&mu, &cov, 0.0)
            .solve(Objective::TargetReturn(0.03), true)
            .unwrap();
        assert_abs_diff_eq!(w.sum(), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(mu.dot(&w), 0.03, epsilon = 1e-12);
        assert!(w[0] < 0.0);
    }
}
