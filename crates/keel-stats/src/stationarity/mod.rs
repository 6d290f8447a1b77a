//! Stationarity testing and differencing.
//!
//! Each series moves through `Raw -> Tested -> {Stationary, Differenced}`. A
//! series whose ADF p-value exceeds the significance level is differenced
//! exactly once; the differenced series is never tested and differenced again.

mod adf;
mod mackinnon;

pub use adf::{AdfTest, MIN_OBSERVATIONS, adf};

use crate::error::{Result, StatsError};
use chrono::NaiveDate;
use keel_data::{DataQualityReport, PriceTable, QualityIssue, Stage};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};

/// Configuration for the stationarity tester.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdfConfig {
    /// p-value above which a series is treated as non-stationary (default: 0.05)
    pub significance: f64,
    /// Series shorter than this are flagged low-confidence (default: 20)
    pub low_confidence_below: usize,
    /// Upper bound on lagged differences; `None` uses the Schwert rule
    pub max_lag: Option<usize>,
}

impl Default for AdfConfig {
    fn default() -> Self {
        Self {
            significance: 0.05,
            low_confidence_below: 20,
            max_lag: None,
        }
    }
}

/// ADF critical values at the usual significance levels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CriticalValues {
    /// 1% critical value
    pub one_percent: f64,
    /// 5% critical value
    pub five_percent: f64,
    /// 10% critical value
    pub ten_percent: f64,
}

/// Terminal state of a tested series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StationarityState {
    /// Unit root rejected, series kept as is
    Stationary,
    /// Unit root not rejected, series differenced once
    Differenced,
}

impl StationarityState {
    /// Lowercase label used in exported tables.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Stationary => "stationary",
            Self::Differenced => "differenced",
        }
    }
}

impl fmt::Display for StationarityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-symbol outcome of the ADF test on the raw series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationarityReport {
    /// Ticker
    pub symbol: String,
    /// ADF t-statistic
    pub test_statistic: f64,
    /// MacKinnon p-value
    pub p_value: f64,
    /// Lagged differences chosen by AIC
    pub lags_used: usize,
    /// Observations in the final regression
    pub nobs: usize,
    /// Finite-sample critical values
    pub critical_values: CriticalValues,
    /// Whether the series was differenced
    pub differenced: bool,
    /// Series was shorter than the configured confidence threshold
    pub low_confidence: bool,
}

impl StationarityReport {
    /// State implied by the report.
    pub const fn state(&self) -> StationarityState {
        if self.differenced {
            StationarityState::Differenced
        } else {
            StationarityState::Stationary
        }
    }
}

/// A (possibly differenced) close series ready for downstream use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationarySeries {
    /// Ticker
    pub symbol: String,
    /// Dates of the values
    pub dates: Vec<NaiveDate>,
    /// Series values
    pub values: Vec<f64>,
    /// How the series was obtained
    pub state: StationarityState,
}

/// Symbol that could not be tested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedSeries {
    /// Ticker
    pub symbol: String,
    /// Why the test failed
    pub reason: String,
}

/// Results of testing every symbol in a price table.
#[derive(Debug, Clone, Default)]
pub struct StationarityRun {
    /// Reports sorted by symbol
    pub reports: Vec<StationarityReport>,
    /// Transformed series sorted by symbol
    pub series: Vec<StationarySeries>,
    /// Symbols that could not be tested
    pub skipped: Vec<SkippedSeries>,
}

/// Tests series for a unit root and differences them when needed.
#[derive(Debug, Clone)]
pub struct StationarityTester {
    config: AdfConfig,
}

impl StationarityTester {
    /// Create a tester with a validated configuration.
    ///
    /// # Errors
    /// Returns an error if `significance` is outside `(0, 1)`.
    pub fn new(config: AdfConfig) -> Result<Self> {
        if !(config.significance > 0.0 && config.significance < 1.0) {
            return Err(StatsError::InvalidParameter(format!(
                "significance must be in (0, 1), got {}",
                config.significance
            )));
        }
        Ok(Self { config })
    }

    /// Create a tester with the default configuration.
    pub fn try_default() -> Result<Self> {
        Self::new(AdfConfig::default())
    }

    /// Tester configuration.
    pub const fn config(&self) -> &AdfConfig {
        &self.config
    }

    /// Run the ADF test on `series` without transforming it.
    ///
    /// The returned report always has `differenced == false`.
    ///
    /// # Errors
    /// Fails on series too short for the regression or with non-finite values.
    pub fn test(&self, symbol: &str, series: &[f64]) -> Result<StationarityReport> {
        let result = adf(series, self.config.max_lag)?;
        Ok(StationarityReport {
            symbol: symbol.to_string(),
            test_statistic: result.statistic,
            p_value: result.p_value,
            lags_used: result.lags_used,
            nobs: result.nobs,
            critical_values: result.critical_values,
            differenced: false,
            low_confidence: series.len() < self.config.low_confidence_below,
        })
    }

    /// Test `series` and difference it once if the unit root is not rejected.
    ///
    /// # Errors
    /// Same as [`StationarityTester::test`].
    pub fn transform(&self, symbol: &str, series: &[f64]) -> Result<(StationarityReport, Vec<f64>)> {
        let mut report = self.test(symbol, series)?;
        if report.low_confidence {
            warn!(symbol, n = series.len(), "Short series, ADF result is low confidence");
        }
        if report.p_value > self.config.significance {
            report.differenced = true;
            debug!(symbol, p_value = report.p_value, "Differencing non-stationary series");
            let diffed = series.windows(2).map(|w| w[1] - w[0]).collect();
            Ok((report, diffed))
        } else {
            debug!(symbol, p_value = report.p_value, "Series is stationary");
            Ok((report, series.to_vec()))
        }
    }

    /// Test every symbol's close series in parallel.
    ///
    /// Symbols that cannot be tested are skipped and recorded in `quality`.
    pub fn run(&self, table: &PriceTable, quality: &mut DataQualityReport) -> StationarityRun {
        let inputs: Vec<(&str, Vec<NaiveDate>, Vec<f64>)> = table
            .iter()
            .map(|(symbol, obs)| {
                (
                    symbol,
                    obs.iter().map(|o| o.date).collect(),
                    obs.iter().map(|o| o.close).collect(),
                )
            })
            .collect();

        let outcomes: Vec<_> = inputs
            .par_iter()
            .map(|(symbol, dates, closes)| {
                self.transform(symbol, closes).map(|(report, values)| {
                    let dates = if report.differenced {
                        dates[1..].to_vec()
                    } else {
                        dates.clone()
                    };
                    let series = StationarySeries {
                        symbol: symbol.to_string(),
                        dates,
                        values,
                        state: report.state(),
                    };
                    (report, series)
                })
            })
            .collect();

        let mut run = StationarityRun::default();
        for ((symbol, _, _), outcome) in inputs.iter().zip(outcomes) {
            match outcome {
                Ok((report, series)) => {
                    run.reports.push(report);
                    run.series.push(series);
                }
                Err(e) => {
                    warn!(symbol, error = %e, "Skipping stationarity test");
                    quality.record_symbol(Stage::Stationarity, QualityIssue::SkippedSymbols, symbol);
                    run.skipped.push(SkippedSeries {
                        symbol: symbol.to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        let differenced = run.reports.iter().filter(|r| r.differenced).count();
        info!(
            tested = run.reports.len(),
            differenced,
            skipped = run.skipped.len(),
            "Stationarity testing complete"
        );
        run
    }
}
