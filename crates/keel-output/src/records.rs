//! Flat record types for each exported table.

use keel_data::DataQualityReport;
use keel_factors::FactorModelEstimate;
use keel_risk::{
    OptimizationResult, PortfolioPerformance, PortfolioWeights, PositionSizingResult,
    SectorExposure,
};
use keel_stats::StationarityReport;
use serde::{Deserialize, Serialize};

/// Row of `capm_results`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CapmRecord {
    /// Ticker.
    pub symbol: String,
    /// Regression slope against the market proxy.
    pub beta: f64,
    /// CAPM expected return, per period.
    pub expected_return: f64,
    /// Regression intercept.
    pub alpha: f64,
    /// Coefficient of determination.
    pub r_squared: f64,
    /// Overlapping observations used.
    pub observations: usize,
}

impl From<&FactorModelEstimate> for CapmRecord {
    fn from(e: &FactorModelEstimate) -> Self {
        Self {
            symbol: e.symbol.clone(),
            beta: e.beta,
            expected_return: e.expected_return,
            alpha: e.alpha,
            r_squared: e.r_squared,
            observations: e.observations,
        }
    }
}

/// Row of `optimized_portfolio_weights`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WeightRecord {
    /// Ticker.
    pub symbol: String,
    /// Portfolio weight.
    pub weight: f64,
}

impl WeightRecord {
    /// One row per symbol, in symbol order.
    pub fn from_weights(weights: &PortfolioWeights) -> Vec<Self> {
        weights
            .iter()
            .map(|(symbol, weight)| Self {
                symbol: symbol.to_string(),
                weight,
            })
            .collect()
    }
}

/// The single row of `portfolio_performance`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PerformanceRecord {
    /// Expected portfolio return.
    pub expected_return: f64,
    /// Portfolio volatility.
    pub expected_volatility: f64,
    /// Sharpe ratio.
    pub sharpe_ratio: f64,
    /// Objective that produced the weights.
    pub objective: String,
    /// `exact` or `degraded`.
    pub quality: String,
    /// Objectives tried, including failures.
    pub attempts: usize,
    /// Whether the figures were annualized.
    pub annualized: bool,
}

impl PerformanceRecord {
    /// Per-period figures of `result`.
    pub fn from_result(result: &OptimizationResult) -> Self {
        Self::build(result, result.performance, false)
    }

    /// Figures of `result` scaled to `periods_per_year`.
    pub fn annualized(result: &OptimizationResult, periods_per_year: f64) -> Self {
        Self::build(result, result.performance.annualized(periods_per_year), true)
    }

    fn build(
        result: &OptimizationResult,
        performance: PortfolioPerformance,
        annualized: bool,
    ) -> Self {
        Self {
            expected_return: performance.expected_return,
            expected_volatility: performance.expected_volatility,
            sharpe_ratio: performance.sharpe_ratio,
            objective: result.objective.to_string(),
            quality: result.quality.to_string(),
            attempts: result.attempts.len(),
            annualized,
        }
    }
}

/// Row of `risk_managed_portfolio`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PositionRecord {
    /// Ticker.
    pub symbol: String,
    /// Volatility proxy.
    pub atr: f64,
    /// Position size after the sector cap.
    pub position_size: f64,
    /// Share of total position size.
    pub weight: f64,
    /// Sector label.
    pub sector: String,
}

impl From<&PositionSizingResult> for PositionRecord {
    fn from(p: &PositionSizingResult) -> Self {
        Self {
            symbol: p.symbol.clone(),
            atr: p.atr,
            position_size: p.position_size,
            weight: p.weight,
            sector: p.sector.clone(),
        }
    }
}

/// Row of `sector_allocation`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SectorRecord {
    /// Sector label.
    pub sector: String,
    /// Sum of final position weights.
    pub weight: f64,
    /// Share before the cap.
    pub original_weight: f64,
    /// Share after the cap, against the original total.
    pub corrected_weight: f64,
    /// Whether the cap was applied.
    pub capped: bool,
}

impl From<&SectorExposure> for SectorRecord {
    fn from(e: &SectorExposure) -> Self {
        Self {
            sector: e.sector.clone(),
            weight: e.final_weight,
            original_weight: e.original_weight,
            corrected_weight: e.corrected_weight,
            capped: e.capped,
        }
    }
}

/// Row of `stationarity_results`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StationarityRecord {
    /// Ticker.
    pub symbol: String,
    /// ADF t-statistic.
    pub test_statistic: f64,
    /// MacKinnon p-value.
    pub p_value: f64,
    /// Lagged differences used.
    pub lags_used: usize,
    /// Regression observations.
    pub nobs: usize,
    /// 1% critical value.
    pub critical_value_1pct: f64,
    /// 5% critical value.
    pub critical_value_5pct: f64,
    /// 10% critical value.
    pub critical_value_10pct: f64,
    /// Whether the series was differenced.
    pub differenced: bool,
    /// Short-series flag.
    pub low_confidence: bool,
}

impl From<&StationarityReport> for StationarityRecord {
    fn from(r: &StationarityReport) -> Self {
        Self {
            symbol: r.symbol.clone(),
            test_statistic: r.test_statistic,
            p_value: r.p_value,
            lags_used: r.lags_used,
            nobs: r.nobs,
            critical_value_1pct: r.critical_values.one_percent,
            critical_value_5pct: r.critical_values.five_percent,
            critical_value_10pct: r.critical_values.ten_percent,
            differenced: r.differenced,
            low_confidence: r.low_confidence,
        }
    }
}

/// Row of `data_quality`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QualityRecord {
    /// Stage that applied the drop or fill.
    pub stage: String,
    /// Issue name.
    pub metric: String,
    /// Rows, values or symbols affected.
    pub count: usize,
    /// Affected symbols, `;`-separated.
    pub symbols: String,
}

impl QualityRecord {
    /// One row per stage and issue.
    pub fn from_report(report: &DataQualityReport) -> Vec<Self> {
        report
            .entries()
            .iter()
            .map(|e| Self {
                stage: e.stage.to_string(),
                metric: e.issue.to_string(),
                count: e.count,
                symbols: e.symbols.join(";"),
            })
            .collect()
    }
}

/// Convert a slice of source values into records.
pub fn records<'a, S, R>(items: &'a [S]) -> Vec<R>
where
    R: From<&'a S>,
{
    items.iter().map(R::from).collect()
}
