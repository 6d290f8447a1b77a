//! Market beta and CAPM expected returns
//!
//! Beta is the OLS slope of asset returns on market returns with an intercept,
//! fitted over the dates both series share:
//!
//! Beta = Cov(R_i, R_m) / Var(R_m)
//!
//! The expected return then follows the single-factor model
//! `rf + beta * (mean(R_m) - rf)`, with every figure at the sampling frequency.

use keel_data::{DataQualityReport, QualityIssue, ReturnPanel, ReturnSeries, Stage};
use keel_stats::{StatsError, ols};
use ndarray::{Array1, Array2};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Market variance below this is treated as zero.
const MIN_MARKET_VARIANCE: f64 = 1e-14;

/// Errors that can occur while fitting the factor model
#[derive(Debug, Error)]
pub enum CapmError {
    /// Asset and market share too few dates
    #[error("Insufficient overlap: need at least {required} shared dates, got {actual}")]
    InsufficientOverlap {
        /// Required number of shared dates
        required: usize,
        /// Shared dates available
        actual: usize,
    },

    /// Market returns have (near) zero variance over the window
    #[error("Market variance {0:e} is too small to fit a beta")]
    DegenerateMarket(f64),

    /// The fit produced a non-finite statistic
    #[error("Undefined estimate: {0}")]
    Undefined(String),

    /// Invalid configuration parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

/// Configuration for CAPM estimation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CapmConfig {
    /// Annual risk-free rate (default: 0.02)
    pub risk_free_rate: f64,
    /// Sampling periods per year (default: 252 trading days)
    pub periods_per_year: usize,
    /// Minimum shared dates between asset and market (default: 2)
    pub min_observations: usize,
}

impl Default for CapmConfig {
    fn default() -> Self {
        Self {
            risk_free_rate: 0.02,
            periods_per_year: 252,
            min_observations: 2,
        }
    }
}

impl CapmConfig {
    /// Risk-free rate per sampling period.
    pub fn periodic_risk_free_rate(&self) -> f64 {
        self.risk_free_rate / self.periods_per_year as f64
    }
}

/// Fitted single-factor model for one symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorModelEstimate {
    /// Ticker
    pub symbol: String,
    /// Slope on market returns
    pub beta: f64,
    /// Regression intercept
    pub alpha: f64,
    /// Coefficient of determination
    pub r_squared: f64,
    /// Shared dates used in the fit
    pub observations: usize,
    /// CAPM expected return per period
    pub expected_return: f64,
    /// Risk-free rate per period
    pub risk_free_rate: f64,
    /// Mean market return minus the risk-free rate, per period
    pub market_premium: f64,
}

/// Why a symbol has no estimate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// No dates in common with the market
    NoOverlap,
    /// Fewer shared dates than required
    InsufficientOverlap {
        /// Shared dates available
        observations: usize,
    },
    /// Market variance was zero over the shared dates
    DegenerateMarket,
    /// Beta or expected return was not finite
    Undefined,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoOverlap => write!(f, "no overlapping dates"),
            Self::InsufficientOverlap { observations } => {
                write!(f, "only {observations} overlapping dates")
            }
            Self::DegenerateMarket => write!(f, "degenerate market variance"),
            Self::Undefined => write!(f, "undefined estimate"),
        }
    }
}

impl From<&CapmError> for SkipReason {
    fn from(err: &CapmError) -> Self {
        match err {
            CapmError::InsufficientOverlap { actual: 0, .. } => Self::NoOverlap,
            CapmError::InsufficientOverlap { actual, .. } => Self::InsufficientOverlap {
                observations: *actual,
            },
            CapmError::DegenerateMarket(_) => Self::DegenerateMarket,
            CapmError::Undefined(_) | CapmError::InvalidParameter(_) => Self::Undefined,
        }
    }
}

/// A symbol excluded from estimation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedEstimate {
    /// Ticker
    pub symbol: String,
    /// Why it was excluded
    pub reason: SkipReason,
}

/// Estimates for a whole panel, sorted by symbol
#[derive(Debug, Clone, Default)]
pub struct CapmEstimates {
    /// Successful fits
    pub estimates: Vec<FactorModelEstimate>,
    /// Symbols that could not be fitted
    pub skipped: Vec<SkippedEstimate>,
}

impl CapmEstimates {
    /// Estimate for a symbol.
    pub fn get(&self, symbol: &str) -> Option<&FactorModelEstimate> {
        self.estimates.iter().find(|e| e.symbol == symbol)
    }
}

/// Fits the single-factor model
#[derive(Debug, Clone)]
pub struct CapmEstimator {
    config: CapmConfig,
}

impl CapmEstimator {
    /// Create an estimator with a validated configuration.
    ///
    /// # Errors
    /// Returns an error if `periods_per_year` is zero, `min_observations` is
    /// below two, or the risk-free rate is not finite.
    pub fn new(config: CapmConfig) -> Result<Self, CapmError> {
        if config.periods_per_year == 0 {
            return Err(CapmError::InvalidParameter(
                "periods_per_year must be positive".to_string(),
            ));
        }
        if config.min_observations < 2 {
            return Err(CapmError::InvalidParameter(format!(
                "min_observations must be at least 2, got {}",
                config.min_observations
            )));
        }
        if !config.risk_free_rate.is_finite() {
            return Err(CapmError::InvalidParameter(
                "risk_free_rate must be finite".to_string(),
            ));
        }
        Ok(Self { config })
    }

    /// Create an estimator with the default configuration.
    pub fn try_default() -> Result<Self, CapmError> {
        Self::new(CapmConfig::default())
    }

    /// Estimator configuration.
    pub const fn config(&self) -> &CapmConfig {
        &self.config
    }

    /// Fit one asset against the market over their shared dates.
    ///
    /// # Errors
    /// Fails when fewer than `min_observations` dates overlap, when the market
    /// variance is near zero, or when the fit is not finite.
    pub fn estimate(
        &self,
        symbol: &str,
        asset: &ReturnSeries,
        market: &ReturnSeries,
    ) -> Result<FactorModelEstimate, CapmError> {
        let (xs, ys) = overlap(asset, market);
        let n = ys.len();
        if n < self.config.min_observations {
            return Err(CapmError::InsufficientOverlap {
                required: self.config.min_observations,
                actual: n,
            });
        }

        let nf = n as f64;
        let mean_m = xs.iter().sum::<f64>() / nf;
        let market_variance = xs.iter().map(|x| (x - mean_m).powi(2)).sum::<f64>() / (nf - 1.0);
        if market_variance < MIN_MARKET_VARIANCE {
            return Err(CapmError::DegenerateMarket(market_variance));
        }

        let mut design = Array2::<f64>::ones((n, 2));
        design.column_mut(1).assign(&Array1::from(xs));
        let fit = ols(Array1::from(ys).view(), &design).map_err(|e| match e {
            StatsError::SingularDesign => CapmError::DegenerateMarket(market_variance),
            other => CapmError::Undefined(other.to_string()),
        })?;
        let alpha = fit.coefficients[0];
        let beta = fit.coefficients[1];
        let r_squared = fit.r_squared;

        let rf = self.config.periodic_risk_free_rate();
        let market_premium = mean_m - rf;
        let expected_return = rf + beta * market_premium;

        if !beta.is_finite() || !expected_return.is_finite() {
            return Err(CapmError::Undefined(format!(
                "beta {beta}, expected return {expected_return}"
            )));
        }

        debug!(symbol, beta, expected_return, observations = n, "Fitted CAPM");

        Ok(FactorModelEstimate {
            symbol: symbol.to_string(),
            beta,
            alpha,
            r_squared,
            observations: n,
            expected_return,
            risk_free_rate: rf,
            market_premium,
        })
    }

    /// Fit every symbol in the panel against the panel's market proxy.
    ///
    /// Symbols are fitted in parallel. Failures are recorded as skips and in
    /// `quality`, never as zero betas.
    pub fn estimate_panel(
        &self,
        panel: &ReturnPanel,
        quality: &mut DataQualityReport,
    ) -> CapmEstimates {
        let market = panel.market();
        let outcomes: Vec<(String, Result<FactorModelEstimate, CapmError>)> = panel
            .iter()
            .collect::<Vec<_>>()
            .par_iter()
            .map(|s| (s.symbol.clone(), self.estimate(&s.symbol, &s.close, market)))
            .collect();

        let mut result = CapmEstimates::default();
        for (symbol, outcome) in outcomes {
            match outcome {
                Ok(estimate) => result.estimates.push(estimate),
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "Skipping CAPM estimate");
                    quality.record_symbol(Stage::Capm, QualityIssue::SkippedSymbols, &symbol);
                    result.skipped.push(SkippedEstimate {
                        reason: SkipReason::from(&e),
                        symbol,
                    });
                }
            }
        }

        info!(
            estimated = result.estimates.len(),
            skipped = result.skipped.len(),
            "CAPM estimation complete"
        );
        result
    }
}

/// Market and asset values on the dates both series share.
fn overlap(asset: &ReturnSeries, market: &ReturnSeries) -> (Vec<f64>, Vec<f64>) {
    asset
        .iter()
        .filter_map(|(date, a)| market.get(date).map(|m| (m, a)))
        .unzip()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use chrono::NaiveDate;
    use rstest::rstest;

    fn series(values: &[f64]) -> ReturnSeries {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let dates = (0..values.len())
            .map(|i| start + chrono::Days::new(i as u64))
            .collect();
        ReturnSeries::new(dates, values.to_vec()).unwrap()
    }

    #[test]
    fn test_config_defaults() {
        let config = CapmConfig::default();
        assert_eq!(config.risk_free_rate, 0.02);
        assert_eq!(config.periods_per_year, 252);
        assert_abs_diff_eq!(config.periodic_risk_free_rate(), 0.02 / 252.0);
    }

    #[rstest]
    #[case(CapmConfig { periods_per_year: 0, ..Default::default() })]
    #[case(CapmConfig { min_observations: 1, ..Default::default() })]
    #[case(CapmConfig { risk_free_rate: f64::NAN, ..Default::default() })]
    fn test_invalid_config(#[case] config: CapmConfig) {
        assert!(CapmEstimator::new(config).is_err());
    }

    #[test]
    fn test_recovers_linear_beta() {
        let market = series(&[0.01, -0.02, 0.015, 0.003, -0.007, 0.012]);
        let asset = series(
            &market
                .values()
                .iter()
                .map(|m| 0.001 + 1.5 * m)
                .collect::<Vec<_>>(),
        );
        let estimator = CapmEstimator::try_default().unwrap();
        let est = estimator.estimate("AAPL", &asset, &market).unwrap();

        assert_abs_diff_eq!(est.beta, 1.5, epsilon = 1e-12);
        assert_abs_diff_eq!(est.alpha, 0.001, epsilon = 1e-12);
        assert_abs_diff_eq!(est.r_squared, 1.0, epsilon = 1e-12);
        assert_eq!(est.observations, 6);

        let rf = 0.02 / 252.0;
        let mean_m = market.mean().unwrap();
        assert_abs_diff_eq!(est.expected_return, rf + 1.5 * (mean_m - rf), epsilon = 1e-15);
        assert_abs_diff_eq!(est.market_premium, mean_m - rf, epsilon = 1e-15);
    }

    #[test]
    fn test_two_observations_are_enough() {
        let market = series(&[0.01, -0.01]);
        let asset = series(&[0.02, -0.02]);
        let est = CapmEstimator::try_default()
            .unwrap()
            .estimate("X", &asset, &market)
            .unwrap();
        assert_abs_diff_eq!(est.beta, 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_matches_regression_with_intercept() {
        let market = series(&[0.01, -0.02, 0.015, 0.003, -0.007]);
        let asset = series(&[0.012, -0.018, 0.02, -0.001, -0.004]);
        let est = CapmEstimator::try_default()
            .unwrap()
            .estimate("X", &asset, &market)
            .unwrap();

        let mut design = Array2::<f64>::ones((5, 2));
        design.column_mut(1).assign(&Array1::from(market.values().to_vec()));
        let fit = ols(Array1::from(asset.values().to_vec()).view(), &design).unwrap();
        assert_abs_diff_eq!(est.alpha, fit.coefficients[0], epsilon = 1e-15);
        assert_abs_diff_eq!(est.beta, fit.coefficients[1], epsilon = 1e-15);
        assert_abs_diff_eq!(est.r_squared, fit.r_squared, epsilon = 1e-15);
        assert!(est.r_squared > 0.0 && est.r_squared < 1.0);
    }

    #[test]
    fn test_market_mean_uses_shared_dates_only() {
        let market = series(&[0.01, -0.01, 0.5]);
        let asset = series(&[0.02, -0.02]);
        let est = CapmEstimator::try_default()
            .unwrap()
            .estimate("X", &asset, &market)
            .unwrap();
        let rf = 0.02 / 252.0;
        assert_abs_diff_eq!(est.market_premium, -rf, epsilon = 1e-15);
    }

    #[test]
    fn test_single_overlap_is_error_not_zero() {
        let market = series(&[0.01, 0.02]);
        let asset = series(&[0.03]);
        let err = CapmEstimator::try_default()
            .unwrap()
            .estimate("X", &asset, &market)
            .unwrap_err();
        assert!(matches!(
            err,
            CapmError::InsufficientOverlap { required: 2, actual: 1 }
        ));
        assert_eq!(
            SkipReason::from(&err),
            SkipReason::InsufficientOverlap { observations: 1 }
        );
    }

    #[test]
    fn test_flat_market_is_fitting_error() {
        let market = series(&[0.01, 0.01, 0.01]);
        let asset = series(&[0.02, -0.01, 0.03]);
        let err = CapmEstimator::try_default()
            .unwrap()
            .estimate("X", &asset, &market)
            .unwrap_err();
        assert!(matches!(err, CapmError::DegenerateMarket(_)));
    }
}
