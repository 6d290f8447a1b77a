//! Primal active-set solver for simplex-type quadratic programs
//!
//! Solves
//!
//! ```text
//! min  1/2 x'Qx - c'x
//! s.t. a'x = b
//!      x  >= 0
//! ```
//!
//! for a positive-definite `Q`. Every iterate is feasible. Each iteration solves
//! the equality-constrained problem on the free set with a Cholesky
//! factorization, then either steps to a blocking bound or, at a stationary
//! point, releases the bound with the most negative multiplier.

use super::OptimizerError;
use keel_stats::Cholesky;
use ndarray::{Array1, Array2};
use tracing::trace;

/// Free variables this close to zero after a blocking step join the active set
const BOUND_TOLERANCE: f64 = 1e-14;

/// A quadratic program over the scaled simplex `{x >= 0, a'x = b}`
#[derive(Debug, Clone, Copy)]
pub(crate) struct SimplexQp<'a> {
    pub(crate) q: &'a Array2<f64>,
    pub(crate) c: &'a Array1<f64>,
    pub(crate) a: &'a Array1<f64>,
    pub(crate) b: f64,
}

impl SimplexQp<'_> {
    /// Solve to optimality or fail after `max_iterations`.
    pub(crate) fn solve(&self, max_iterations: usize) -> Result<Array1<f64>, OptimizerError> {
        let n = self.q.nrows();
        if n == 0 || self.q.ncols() != n || self.c.len() != n || self.a.len() != n {
            return Err(OptimizerError::InvalidInput(format!(
                "QP dimensions do not agree: Q {}x{}, c {}, a {}",
                self.q.nrows(),
                self.q.ncols(),
                self.c.len(),
                self.a.len()
            )));
        }
        if !(self.b > 0.0 && self.b.is_finite()) {
            return Err(OptimizerError::InvalidInput(format!(
                "constraint level must be positive, got {}",
                self.b
            )));
        }

        // Feasible vertex on the largest positive coefficient
        let (start, a_max) = self
            .a
            .iter()
            .copied()
            .enumerate()
            .fold((0, f64::NEG_INFINITY), |best, (i, v)| {
                if v > best.1 { (i, v) } else { best }
            });
        if !(a_max > 0.0) {
            return Err(OptimizerError::Infeasible(
                "no asset can satisfy the equality constraint with a nonnegative weight"
                    .to_string(),
            ));
        }

        let mut x = Array1::<f64>::zeros(n);
        x[start] = self.b / a_max;
        let mut free = vec![false; n];
        free[start] = true;

        for iteration in 0..max_iterations {
            let indices: Vec<usize> = (0..n).filter(|&i| free[i]).collect();
            let (candidate, nu) = self.solve_free_set(&indices)?;

            let feasible = candidate.iter().all(|&v| v >= 0.0);
            if feasible {
                x.fill(0.0);
                for (k, &i) in indices.iter().enumerate() {
                    x[i] = candidate[k];
                }

                // Multipliers of the active bounds
                let gradient = self.q.dot(&x) - self.c - &(self.a * nu);
                let scale =
                    1.0 + max_abs(self.c.iter()) + nu.abs() * max_abs(self.a.iter());
                let tolerance = 1e-12 * scale;

                let release = (0..n)
                    .filter(|&i| !free[i])
                    .map(|i| (i, gradient[i]))
                    .filter(|&(_, g)| g < -tolerance)
                    .min_by(|l, r| l.1.total_cmp(&r.1));

                match release {
                    Some((i, g)) => {
                        trace!(iteration, asset = i, multiplier = g, "Releasing bound");
                        free[i] = true;
                    }
                    None => return Ok(x),
                }
            } else {
                // Step toward the candidate until the first bound blocks
                let mut alpha = 1.0_f64;
                let mut blocking = None;
                for (k, &i) in indices.iter().enumerate() {
                    if candidate[k] < 0.0 {
                        let ratio = x[i] / (x[i] - candidate[k]);
                        if ratio < alpha {
                            alpha = ratio;
                            blocking = Some(i);
                        }
                    }
                }
                let level = max_abs(x.iter());
                for (k, &i) in indices.iter().enumerate() {
                    x[i] += alpha * (candidate[k] - x[i]);
                    if Some(i) == blocking
                        || (candidate[k] < 0.0 && x[i] <= BOUND_TOLERANCE * level)
                    {
                        x[i] = 0.0;
                        free[i] = false;
                    }
                }
                trace!(iteration, alpha, "Blocking step");
                if !free.iter().any(|&f| f) {
                    return Err(OptimizerError::Numerical(
                        "active-set iteration emptied the free set".to_string(),
                    ));
                }
            }
        }

        Err(OptimizerError::NotConverged {
            iterations: max_iterations,
        })
    }

    /// Equality-constrained minimizer on `indices`, with its budget multiplier.
    fn solve_free_set(&self, indices: &[usize]) -> Result<(Array1<f64>, f64), OptimizerError> {
        let m = indices.len();
        let q_ff = Array2::from_shape_fn((m, m), |(i, j)| self.q[[indices[i], indices[j]]]);
        let c_f: Array1<f64> = indices.iter().map(|&i| self.c[i]).collect();
        let a_f: Array1<f64> = indices.iter().map(|&i| self.a[i]).collect();

        let chol =
            Cholesky::new(&q_ff).map_err(|e| OptimizerError::Numerical(e.to_string()))?;
        let qinv_c = chol.solve(c_f.view());
        let qinv_a = chol.solve(a_f.view());

        let denominator = a_f.dot(&qinv_a);
        if !(denominator.abs() > f64::EPSILON) {
            return Err(OptimizerError::Numerical(
                "degenerate equality constraint on the free set".to_string(),
            ));
        }
        let nu = (self.b - a_f.dot(&qinv_c)) / denominator;
        let candidate = qinv_c + &(qinv_a * nu);
        if candidate.iter().any(|v| !v.is_finite()) {
            return Err(OptimizerError::Numerical(
                "non-finite free-set solution".to_string(),
            ));
        }
        Ok((candidate, nu))
    }
}

fn max_abs<'a>(values: impl Iterator<Item = &'a f64>) -> f64 {
    values.fold(0.0_f64, |m, v| m.max(v.abs()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_interior_min_variance() {
        // Diagonal covariance: weights proportional to inverse variance
        let q = array![[1.0, 0.0], [0.0, 4.0]];
        let c = Array1::zeros(2);
        let a = Array1::ones(2);
        let x = SimplexQp {
            q: &q,
            c: &c,
            a: &a,
            b: 1.0,
        }
        .solve(50)
        .unwrap();
        assert_abs_diff_eq!(x[0], 0.8, epsilon = 1e-12);
        assert_abs_diff_eq!(x[1], 0.2, epsilon = 1e-12);
    }

    #[test]
    fn test_bound_becomes_active() {
        // Unconstrained optimum shorts the second asset
        let q = array![[1.0, 0.9], [0.9, 1.0]];
        let c = array![1.0, 0.0];
        let a = Array1::ones(2);
        let x = SimplexQp {
            q: &q,
            c: &c,
            a: &a,
            b: 1.0,
        }
        .solve(50)
        .unwrap();
        assert_abs_diff_eq!(x[0], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(x[1], 0.0, epsilon = 1e-15);
    }

    #[test]
    fn test_released_bound_from_vertex() {
        // Starts on asset 0 (largest a), must release asset 2
        let q = array![[2.0, 0.0, 0.0], [0.0, 2.0, 0.0], [0.0, 0.0, 1.0]];
        let c = Array1::zeros(3);
        let a = array![1.0, 0.5, 0.5];
        let x = SimplexQp {
            q: &q,
            c: &c,
            a: &a,
            b: 1.0,
        }
        .solve(50)
        .unwrap();
        assert!(x.iter().all(|&v| v >= 0.0));
        assert_abs_diff_eq!(a.dot(&x), 1.0, epsilon = 1e-12);
        assert!(x[2] > 0.0);
    }

    #[test]
    fn test_infeasible_constraint() {
        let q = Array2::<f64>::eye(2);
        let c = Array1::zeros(2);
        let a = array![-1.0, -0.5];
        let result = SimplexQp {
            q: &q,
            c: &c,
            a: &a,
            b: 1.0,
        }
        .solve(50);
        assert!(matches!(result, Err(OptimizerError::Infeasible(_))));
    }

    #[test]
    fn test_iteration_cap() {
        let q = array![[2.0, 0.0, 0.0], [0.0, 2.0, 0.0], [0.0, 0.0, 1.0]];
        let c = Array1::zeros(3);
        let a = array![1.0, 0.5, 0.5];
        let result = SimplexQp {
            q: &q,
            c: &c,
            a: &a,
            b: 1.0,
        }
        .solve(1);
        assert!(matches!(
            result,
            Err(OptimizerError::NotConverged { iterations: 1 })
        ));
    }
}
