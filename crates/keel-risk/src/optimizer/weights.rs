//! Portfolio weights and their performance summary

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Decimal places used when weights are reported
pub const REPORT_DECIMALS: i32 = 5;

/// Symbol to weight, ordered by symbol
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PortfolioWeights(BTreeMap<String, f64>);

impl PortfolioWeights {
    /// Pair labels with a weight vector.
    pub fn from_parts(symbols: &[String], weights: &Array1<f64>) -> Self {
        symbols
            .iter()
            .cloned()
            .zip(weights.iter().copied())
            .collect()
    }

    /// Weight of `symbol`, if it was eligible.
    pub fn get(&self, symbol: &str) -> Option<f64> {
        self.0.get(symbol).copied()
    }

    /// Iterate `(symbol, weight)` in symbol order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(s, &w)| (s.as_str(), w))
    }

    /// Symbols with a strictly positive weight.
    pub fn positive(&self) -> impl Iterator<Item = (&str, f64)> {
        self.iter().filter(|&(_, w)| w > 0.0)
    }

    /// Number of symbols.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no symbols.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Sum of all weights.
    pub fn total(&self) -> f64 {
        self.0.values().sum()
    }

    /// Weights rounded to [`REPORT_DECIMALS`] places for reporting.
    ///
    /// Uses largest-remainder rounding: every weight is floored, then the
    /// units lost to flooring go to the weights with the largest remainders,
    /// so the rounded weights keep the rounded total of the originals.
    pub fn rounded(&self) -> Self {
        let factor = 10f64.powi(REPORT_DECIMALS);
        let scaled: Vec<f64> = self.0.values().map(|w| w * factor).collect();
        let mut units: Vec<f64> = scaled.iter().map(|x| x.floor()).collect();
        let target = scaled.iter().sum::<f64>().round();
        let missing = (target - units.iter().sum::<f64>()).max(0.0) as usize;

        let mut by_remainder: Vec<usize> = (0..scaled.len()).collect();
        let remainder = |i: usize| scaled[i] - units[i];
        by_remainder.sort_by(|&a, &b| remainder(b).total_cmp(&remainder(a)));
        for &i in by_remainder.iter().take(missing) {
            units[i] += 1.0;
        }

        self.0
            .keys()
            .cloned()
            .zip(units.into_iter().map(|u| u / factor))
            .collect()
    }

    /// Consume into the underlying map.
    pub fn into_inner(self) -> BTreeMap<String, f64> {
        self.0
    }
}

impl FromIterator<(String, f64)> for PortfolioWeights {
    fn from_iter<T: IntoIterator<Item = (String, f64)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Expected return, volatility and Sharpe ratio of a weight vector
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PortfolioPerformance {
    /// `mu' w`, per period
    pub expected_return: f64,
    /// `sqrt(w' Sigma w)`, per period
    pub expected_volatility: f64,
    /// `(ret - rf) / vol`
    pub sharpe_ratio: f64,
}

impl PortfolioPerformance {
    /// Evaluate `weights` against `mu` and `covariance`.
    pub fn evaluate(
        weights: &Array1<f64>,
        expected_returns: &Array1<f64>,
        covariance: &Array2<f64>,
        risk_free_rate: f64,
    ) -> Self {
        let expected_return = expected_returns.dot(weights);
        let variance = weights.dot(&covariance.dot(weights));
        let expected_volatility = variance.max(0.0).sqrt();
        let sharpe_ratio = (expected_return - risk_free_rate) / expected_volatility;
        Self {
            expected_return,
            expected_volatility,
            sharpe_ratio,
        }
    }

    /// Scale per-period figures to `periods` per year.
    pub fn annualized(&self, periods: f64) -> Self {
        Self {
            expected_return: self.expected_return * periods,
            expected_volatility: self.expected_volatility * periods.sqrt(),
            sharpe_ratio: self.sharpe_ratio * periods.sqrt(),
        }
    }

    /// Whether every figure is a number.
    pub fn is_defined(&self) -> bool {
        !self.expected_return.is_nan()
            && !self.expected_volatility.is_nan()
            && !self.sharpe_ratio.is_nan()
    }
}

/// Zero weights with `|w| < threshold` and renormalize the rest to sum to one.
///
/// Returns `None` when nothing with a positive total survives.
pub fn clean_weights(weights: &Array1<f64>, threshold: f64) -> Option<Array1<f64>> {
    let cleaned = weights.mapv(|w| if w.abs() < threshold { 0.0 } else { w });
    let total = cleaned.sum();
    if !(total > 0.0 && total.is_finite()) {
        return None;
    }
    Some(cleaned / total)
}
