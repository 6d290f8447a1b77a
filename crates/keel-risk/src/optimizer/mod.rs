//! Mean-variance portfolio optimization
//!
//! The optimizer prepares its inputs before solving:
//!
//! 1. assets with an undefined expected return are dropped
//! 2. the covariance is divided by its largest absolute entry
//! 3. expected returns are winsorized at configurable percentiles
//! 4. the covariance spectrum is lifted to a positive floor
//!
//! It then walks a fallback ladder: the configured objective, then
//! min-variance once, then a fatal [`OptimizerError::OptimizationFailed`]
//! listing every attempt.

mod precondition;
mod qp;
mod solve;
pub mod weights;

pub use weights::{PortfolioPerformance, PortfolioWeights, REPORT_DECIMALS, clean_weights};

use crate::covariance::{ConditioningOutcome, CovarianceError, condition_covariance};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use solve::Problem;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::{info, warn};

/// Optimizer errors
#[derive(Debug, Error)]
pub enum OptimizerError {
    /// Inputs do not line up or are empty
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The objective has no feasible solution
    #[error("Infeasible: {0}")]
    Infeasible(String),

    /// A factorization or normalization broke down
    #[error("Numerical failure: {0}")]
    Numerical(String),

    /// Active-set iteration limit reached
    #[error("Solver did not converge within {iterations} iterations")]
    NotConverged {
        /// Iteration limit
        iterations: usize,
    },

    /// Solution produced a NaN return or Sharpe ratio, or weights that do not sum to one
    #[error("Undefined result: {0}")]
    Undefined(String),

    /// Covariance conditioning failed
    #[error("Covariance error: {0}")]
    Covariance(#[from] CovarianceError),

    /// Every rung of the fallback ladder failed
    #[error("Optimization failed after {} attempt(s): {}", attempts.len(), describe(attempts))]
    OptimizationFailed {
        /// Attempts in order
        attempts: Vec<Attempt>,
    },

    /// Invalid configuration
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

fn describe(attempts: &[Attempt]) -> String {
    attempts
        .iter()
        .map(|a| a.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Portfolio objective
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Objective {
    /// Long-only maximum Sharpe ratio
    MaxSharpe,
    /// Minimum variance
    MinVariance,
    /// Minimum variance subject to a per-period expected return floor
    TargetReturn(f64),
}

impl fmt::Display for Objective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MaxSharpe => write!(f, "max-sharpe"),
            Self::MinVariance => write!(f, "min-variance"),
            Self::TargetReturn(r) => write!(f, "target-return:{r}"),
        }
    }
}

impl FromStr for Objective {
    type Err = OptimizerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        match normalized.as_str() {
            "max-sharpe" => Ok(Self::MaxSharpe),
            "min-variance" => Ok(Self::MinVariance),
            other => other
                .strip_prefix("target-return:")
                .and_then(|r| r.trim().parse::<f64>().ok())
                .filter(|r| r.is_finite())
                .map(Self::TargetReturn)
                .ok_or_else(|| {
                    OptimizerError::InvalidParameter(format!(
                        "unknown objective '{s}' (expected max-sharpe, min-variance or target-return:<r>)"
                    ))
                }),
        }
    }
}

/// Where the expected-return vector comes from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpectedReturnSource {
    /// Mean of aligned historical returns
    #[default]
    Historical,
    /// CAPM expected returns
    Capm,
}

/// Optimizer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Objective tried first
    pub objective: Objective,
    /// Drop the nonnegativity constraint
    pub allow_short: bool,
    /// Eigenvalue floor for conditioning (relative to the scaled covariance)
    pub epsilon: f64,
    /// Lower winsorization percentile
    pub winsorize_lower: f64,
    /// Upper winsorization percentile
    pub winsorize_upper: f64,
    /// Weights smaller than this in magnitude are zeroed
    pub cleaning_threshold: f64,
    /// Active-set iteration limit per solve
    pub max_iterations: usize,
    /// Expected-return input
    pub expected_returns: ExpectedReturnSource,
}

impl Default for OptimizerConfig {
    /// Max-Sharpe, long-only, `epsilon = 1e-6`, winsorized at 5% / 95%,
    /// weights under `1e-4` cleaned, historical expected returns.
    fn default() -> Self {
        Self {
            objective: Objective::MaxSharpe,
            allow_short: false,
            epsilon: 1e-6,
            winsorize_lower: 0.05,
            winsorize_upper: 0.95,
            cleaning_threshold: 1e-4,
            max_iterations: 500,
            expected_returns: ExpectedReturnSource::Historical,
        }
    }
}

impl OptimizerConfig {
    /// Check ranges.
    ///
    /// # Errors
    /// Returns [`OptimizerError::InvalidParameter`] for out-of-range values.
    pub fn validate(&self) -> Result<(), OptimizerError> {
        if !(self.epsilon > 0.0 && self.epsilon.is_finite()) {
            return Err(OptimizerError::InvalidParameter(format!(
                "epsilon must be positive, got {}",
                self.epsilon
            )));
        }
        if !(0.0..=1.0).contains(&self.winsorize_lower)
            || !(0.0..=1.0).contains(&self.winsorize_upper)
            || self.winsorize_lower > self.winsorize_upper
        {
            return Err(OptimizerError::InvalidParameter(format!(
                "winsorization bounds must satisfy 0 <= lower <= upper <= 1, got {} and {}",
                self.winsorize_lower, self.winsorize_upper
            )));
        }
        if !(0.0..0.5).contains(&self.cleaning_threshold) {
            return Err(OptimizerError::InvalidParameter(format!(
                "cleaning threshold must be in [0, 0.5), got {}",
                self.cleaning_threshold
            )));
        }
        if self.max_iterations == 0 {
            return Err(OptimizerError::InvalidParameter(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        if let Objective::TargetReturn(r) = self.objective
            && !r.is_finite()
        {
            return Err(OptimizerError::InvalidParameter(format!(
                "target return must be finite, got {r}"
            )));
        }
        Ok(())
    }
}

/// Inputs to one optimization
#[derive(Debug, Clone)]
pub struct OptimizationInput {
    /// Asset labels, in covariance order
    pub symbols: Vec<String>,
    /// Per-period expected returns
    pub expected_returns: Array1<f64>,
    /// Per-period covariance
    pub covariance: Array2<f64>,
    /// Per-period risk-free rate
    pub risk_free_rate: f64,
}

/// Outcome of a single rung of the fallback ladder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttemptOutcome {
    /// The objective produced valid weights
    Succeeded,
    /// The objective failed with this reason
    Failed(String),
}

/// A single objective tried by the optimizer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attempt {
    /// Objective tried
    pub objective: Objective,
    /// What happened
    pub outcome: AttemptOutcome,
}

impl fmt::Display for Attempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            AttemptOutcome::Succeeded => write!(f, "{} succeeded", self.objective),
            AttemptOutcome::Failed(reason) => write!(f, "{} failed: {reason}", self.objective),
        }
    }
}

/// Whether the result rests on the measured covariance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultQuality {
    /// Computed from the (possibly shifted) sample covariance
    Exact,
    /// Covariance was replaced by `epsilon * I`
    Degraded,
}

impl fmt::Display for ResultQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact => write!(f, "exact"),
            Self::Degraded => write!(f, "degraded"),
        }
    }
}

/// Optimized portfolio
#[derive(Debug, Clone)]
pub struct OptimizationResult {
    /// Cleaned weights, summing to one
    pub weights: PortfolioWeights,
    /// Solver weights before cleaning
    pub raw_weights: PortfolioWeights,
    /// Objective that produced the weights
    pub objective: Objective,
    /// Every attempt, in order
    pub attempts: Vec<Attempt>,
    /// Per-period performance of the cleaned weights
    pub performance: PortfolioPerformance,
    /// Covariance quality
    pub quality: ResultQuality,
    /// Conditioning applied to the scaled covariance
    pub conditioning: ConditioningOutcome,
    /// Symbols dropped for an undefined expected return
    pub dropped: Vec<String>,
}

impl OptimizationResult {
    /// Whether the configured objective failed and min-variance was used.
    pub fn used_fallback(&self) -> bool {
        self.attempts.len() > 1
    }

    /// Weights rounded for reporting.
    pub fn rounded_weights(&self) -> PortfolioWeights {
        self.weights.rounded()
    }
}

/// Mean-variance optimizer
#[derive(Debug, Clone)]
pub struct MeanVarianceOptimizer {
    config: OptimizerConfig,
}

impl MeanVarianceOptimizer {
    /// Create an optimizer.
    ///
    /// # Errors
    /// Returns an error if the configuration is out of range.
    pub fn new(config: OptimizerConfig) -> Result<Self, OptimizerError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Create an optimizer with default configuration.
    ///
    /// # Errors
    /// Never fails for the default configuration.
    pub fn try_default() -> Result<Self, OptimizerError> {
        Self::new(OptimizerConfig::default())
    }

    /// Get the configuration.
    pub const fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Optimize the portfolio.
    ///
    /// # Errors
    /// Fails on misaligned input, when conditioning cannot produce a usable
    /// matrix, or with [`OptimizerError::OptimizationFailed`] when every rung of
    /// the ladder fails.
    pub fn optimize(
        &self,
        input: &OptimizationInput,
    ) -> Result<OptimizationResult, OptimizerError> {
        let k = input.symbols.len();
        if input.expected_returns.len() != k
            || input.covariance.nrows() != k
            || input.covariance.ncols() != k
        {
            return Err(OptimizerError::InvalidInput(format!(
                "{} symbols, {} expected returns, {}x{} covariance",
                k,
                input.expected_returns.len(),
                input.covariance.nrows(),
                input.covariance.ncols()
            )));
        }
        if input.risk_free_rate.is_nan() {
            return Err(OptimizerError::InvalidInput(
                "risk-free rate is NaN".to_string(),
            ));
        }

        // 1. Drop undefined expected returns
        let keep: Vec<usize> = (0..k)
            .filter(|&i| !input.expected_returns[i].is_nan())
            .collect();
        let dropped: Vec<String> = (0..k)
            .filter(|&i| input.expected_returns[i].is_nan())
            .map(|i| input.symbols[i].clone())
            .collect();
        if !dropped.is_empty() {
            warn!(symbols = ?dropped, "Dropping assets with undefined expected return");
        }
        if keep.is_empty() {
            return Err(OptimizerError::InvalidInput(
                "no asset has a defined expected return".to_string(),
            ));
        }
        let symbols: Vec<String> = keep.iter().map(|&i| input.symbols[i].clone()).collect();
        let mu: Array1<f64> = keep.iter().map(|&i| input.expected_returns[i]).collect();
        let sigma = Array2::from_shape_fn((keep.len(), keep.len()), |(i, j)| {
            input.covariance[[keep[i], keep[j]]]
        });

        // 2. Scale
        let (scaled, scale) = precondition::normalize_scale(&sigma);

        // 3. Winsorize
        let mu = precondition::winsorize(
            &mu,
            self.config.winsorize_lower,
            self.config.winsorize_upper,
        );

        // 4. Condition
        let conditioned = condition_covariance(&scaled, self.config.epsilon)?;
        let quality = if conditioned.is_degraded() {
            warn!("Covariance replaced by epsilon * I; result is degraded");
            ResultQuality::Degraded
        } else {
            ResultQuality::Exact
        };
        let covariance = &conditioned.matrix * scale;

        let problem = Problem {
            expected_returns: &mu,
            covariance: &conditioned.matrix,
            risk_free_rate: input.risk_free_rate,
            max_iterations: self.config.max_iterations,
        };

        let mut ladder = vec![self.config.objective];
        if self.config.objective != Objective::MinVariance {
            ladder.push(Objective::MinVariance);
        }

        let mut attempts = Vec::with_capacity(ladder.len());
        for objective in ladder {
            let solved = problem
                .solve(objective, self.config.allow_short)
                .and_then(|raw| self.finish(raw, &mu, &covariance, input.risk_free_rate));
            match solved {
                Ok((raw, cleaned, performance)) => {
                    attempts.push(Attempt {
                        objective,
                        outcome: AttemptOutcome::Succeeded,
                    });
                    info!(
                        %objective,
                        assets = symbols.len(),
                        attempts = attempts.len(),
                        sharpe = performance.sharpe_ratio,
                        %quality,
                        "Portfolio optimized"
                    );
                    return Ok(OptimizationResult {
                        weights: PortfolioWeights::from_parts(&symbols, &cleaned),
                        raw_weights: PortfolioWeights::from_parts(&symbols, &raw),
                        objective,
                        attempts,
                        performance,
                        quality,
                        conditioning: conditioned.outcome,
                        dropped,
                    });
                }
                Err(e) => {
                    warn!(%objective, error = %e, "Optimization attempt failed");
                    attempts.push(Attempt {
                        objective,
                        outcome: AttemptOutcome::Failed(e.to_string()),
                    });
                }
            }
        }

        Err(OptimizerError::OptimizationFailed { attempts })
    }

    /// Clean, validate and evaluate solver weights.
    fn finish(
        &self,
        raw: Array1<f64>,
        mu: &Array1<f64>,
        covariance: &Array2<f64>,
        risk_free_rate: f64,
    ) -> Result<(Array1<f64>, Array1<f64>, PortfolioPerformance), OptimizerError> {
        if raw.iter().any(|w| !w.is_finite()) {
            return Err(OptimizerError::Undefined(
                "solver returned non-finite weights".to_string(),
            ));
        }
        let cleaned = clean_weights(&raw, self.config.cleaning_threshold).ok_or_else(|| {
            OptimizerError::Undefined("no weight survives cleaning".to_string())
        })?;
        let total = cleaned.sum();
        if (total - 1.0).abs() > 1e-6 {
            return Err(OptimizerError::Undefined(format!(
                "weights sum to {total}"
            )));
        }
        let performance =
            PortfolioPerformance::evaluate(&cleaned, mu, covariance, risk_free_rate);
        if performance.expected_return.is_nan() {
            return Err(OptimizerError::Undefined(
                "expected return is NaN".to_string(),
            ));
        }
        if performance.sharpe_ratio.is_nan() {
            return Err(OptimizerError::Undefined("Sharpe ratio is NaN".to_string()));
        }
        Ok((raw, cleaned, performance))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use rstest::rstest;

    fn input(mu: Array1<f64>, cov: Array2<f64>) -> OptimizationInput {
        let symbols = (0..mu.len()).map(|i| format!("S{i}")).collect();
        OptimizationInput {
            symbols,
            expected_returns: mu,
            covariance: cov,
            risk_free_rate: 0.0,
        }
    }

    #[rstest]
    #[case("max-sharpe", Objective::MaxSharpe)]
    #[case("min_variance", Objective::MinVariance)]
    #[case("Target-Return:0.001", Objective::TargetReturn(0.001))]
    fn test_objective_from_str(#[case] text: &str, #[case] expected: Objective) {
        assert_eq!(text.parse::<Objective>().unwrap(), expected);
        assert_eq!(expected.to_string().parse::<Objective>().unwrap(), expected);
    }

    #[test]
    fn test_objective_from_str_invalid() {
        assert!("max-return".parse::<Objective>().is_err());
        assert!("target-return:abc".parse::<Objective>().is_err());
    }

    #[test]
    fn test_objective_serde() {
        let json = serde_json::to_string(&Objective::TargetReturn(0.5)).unwrap();
        assert_eq!(json, r#"{"target_return":0.5}"#);
        let parsed: Objective = serde_json::from_str(r#""min_variance""#).unwrap();
        assert_eq!(parsed, Objective::MinVariance);
    }

    #[test]
    fn test_invalid_config() {
        let config = OptimizerConfig {
            winsorize_lower: 0.9,
            winsorize_upper: 0.1,
            ..Default::default()
        };
        assert!(MeanVarianceOptimizer::new(config).is_err());

        let config = OptimizerConfig {
            epsilon: 0.0,
            ..Default::default()
        };
        assert!(MeanVarianceOptimizer::new(config).is_err());
    }

    #[test]
    fn test_min_variance_weights_sum_to_one() {
        let config = OptimizerConfig {
            objective: Objective::MinVariance,
            ..Default::default()
        };
        let optimizer = MeanVarianceOptimizer::new(config).unwrap();
        let result = optimizer
            .optimize(&input(
                array![0.001, 0.002, 0.0015],
                array![
                    [0.0004, 0.0001, 0.0],
                    [0.0001, 0.0009, 0.0002],
                    [0.0, 0.0002, 0.0016]
                ],
            ))
            .unwrap();
        assert_abs_diff_eq!(result.weights.total(), 1.0, epsilon = 1e-6);
        assert!(result.weights.iter().all(|(_, w)| w >= -1e-9));
        assert_eq!(result.attempts.len(), 1);
        assert_eq!(result.quality, ResultQuality::Exact);
    }

    #[test]
    fn test_nan_expected_return_is_dropped() {
        let optimizer = MeanVarianceOptimizer::try_default().unwrap();
        let result = optimizer
            .optimize(&input(
                array![0.002, f64::NAN, 0.001],
                array![
                    [0.0004, 0.0, 0.0],
                    [0.0, 0.0004, 0.0],
                    [0.0, 0.0, 0.0004]
                ],
            ))
            .unwrap();
        assert_eq!(result.dropped, vec!["S1".to_string()]);
        assert_eq!(result.weights.len(), 2);
        assert!(result.weights.get("S1").is_none());
    }

    #[test]
    fn test_misaligned_input() {
        let optimizer = MeanVarianceOptimizer::try_default().unwrap();
        let result = optimizer.optimize(&input(array![0.1, 0.2], Array2::eye(3)));
        assert!(matches!(result, Err(OptimizerError::InvalidInput(_))));
    }
}
