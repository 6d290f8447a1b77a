//! Human-readable run summaries.
//!
//! A [`RunSummary`] collects headline figures of each stage that ran, plus the
//! data-quality tally, and renders them as an indented text block.

use keel_data::DataQualityReport;
use keel_factors::CapmEstimates;
use keel_risk::{OptimizationResult, SizingPlan};
use keel_stats::StationarityRun;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stationarity headline figures.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct StationaritySummary {
    /// Series kept as is.
    pub stationary: usize,
    /// Series differenced once.
    pub differenced: usize,
    /// Series that could not be tested.
    pub skipped: usize,
    /// Reports flagged low-confidence.
    pub low_confidence: usize,
}

impl From<&StationarityRun> for StationaritySummary {
    fn from(run: &StationarityRun) -> Self {
        let differenced = run.reports.iter().filter(|r| r.differenced).count();
        Self {
            stationary: run.reports.len() - differenced,
            differenced,
            skipped: run.skipped.len(),
            low_confidence: run.reports.iter().filter(|r| r.low_confidence).count(),
        }
    }
}

/// CAPM headline figures.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct CapmSummary {
    /// Symbols estimated.
    pub estimated: usize,
    /// Symbols skipped.
    pub skipped: usize,
    /// Mean beta across estimates.
    pub mean_beta: Option<f64>,
}

impl From<&CapmEstimates> for CapmSummary {
    fn from(estimates: &CapmEstimates) -> Self {
        let n = estimates.estimates.len();
        let mean_beta = (n > 0)
            .then(|| estimates.estimates.iter().map(|e| e.beta).sum::<f64>() / n as f64);
        Self {
            estimated: n,
            skipped: estimates.skipped.len(),
            mean_beta,
        }
    }
}

/// Optimizer headline figures, annualized.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OptimizationSummary {
    /// Objective that produced the weights.
    pub objective: String,
    /// Objectives tried.
    pub attempts: usize,
    /// `exact` or `degraded`.
    pub quality: String,
    /// Assets with a nonzero weight.
    pub holdings: usize,
    /// Annualized expected return.
    pub expected_return: f64,
    /// Annualized volatility.
    pub expected_volatility: f64,
    /// Annualized Sharpe ratio.
    pub sharpe_ratio: f64,
}

impl OptimizationSummary {
    /// Summarize `result`, annualizing with `periods_per_year`.
    pub fn new(result: &OptimizationResult, periods_per_year: f64) -> Self {
        let annual = result.performance.annualized(periods_per_year);
        Self {
            objective: result.objective.to_string(),
            attempts: result.attempts.len(),
            quality: result.quality.to_string(),
            holdings: result.weights.positive().count(),
            expected_return: annual.expected_return,
            expected_volatility: annual.expected_volatility,
            sharpe_ratio: annual.sharpe_ratio,
        }
    }
}

/// Sizing headline figures.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct SizingSummary {
    /// Positions sized.
    pub positions: usize,
    /// Sectors represented.
    pub sectors: usize,
    /// Sectors scaled down by the cap.
    pub capped_sectors: usize,
}

impl From<&SizingPlan> for SizingSummary {
    fn from(plan: &SizingPlan) -> Self {
        Self {
            positions: plan.positions.len(),
            sectors: plan.sectors.len(),
            capped_sectors: plan.sectors.iter().filter(|s| s.capped).count(),
        }
    }
}

/// Summary of a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RunSummary {
    /// Symbols in the price table.
    pub symbols: usize,
    /// Stationarity stage, if it ran.
    pub stationarity: Option<StationaritySummary>,
    /// CAPM stage, if it ran.
    pub capm: Option<CapmSummary>,
    /// Optimizer stage, if it ran.
    pub optimization: Option<OptimizationSummary>,
    /// Sizing stage, if it ran.
    pub sizing: Option<SizingSummary>,
    /// Drops and fills across stages.
    pub quality: DataQualityReport,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Keel run: {} symbols", self.symbols)?;
        if let Some(s) = &self.stationarity {
            writeln!(
                f,
                "  Stationarity: {} stationary, {} differenced, {} skipped ({} low confidence)",
                s.stationary, s.differenced, s.skipped, s.low_confidence
            )?;
        }
        if let Some(c) = &self.capm {
            write!(f, "  CAPM: {} estimated, {} skipped", c.estimated, c.skipped)?;
            match c.mean_beta {
                Some(beta) => writeln!(f, ", mean beta {beta:.3}")?,
                None => writeln!(f)?,
            }
        }
        if let Some(o) = &self.optimization {
            writeln!(
                f,
                "  Portfolio: {} after {} attempt(s), {} holdings, {} covariance",
                o.objective,
                o.attempts,
                o.holdings,
                o.quality
            )?;
            writeln!(f, "    Expected Return: {:.2}%", o.expected_return * 100.0)?;
            writeln!(f, "    Volatility: {:.2}%", o.expected_volatility * 100.0)?;
            writeln!(f, "    Sharpe Ratio: {:.3}", o.sharpe_ratio)?;
        }
        if let Some(s) = &self.sizing {
            writeln!(
                f,
                "  Sizing: {} positions across {} sectors, {} capped",
                s.positions, s.sectors, s.capped_sectors
            )?;
        }
        if self.quality.is_clean() {
            writeln!(f, "  Data quality: clean")?;
        } else {
            writeln!(f, "  Data quality:")?;
            for entry in self.quality.entries() {
                writeln!(f, "    {}/{}: {}", entry.stage, entry.issue, entry.count)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_data::{QualityIssue, Stage};

    #[test]
    fn test_display_sections() {
        let mut quality = DataQualityReport::new();
        quality.record(Stage::Returns, QualityIssue::FilledReturns, 4);
        let summary = RunSummary {
            symbols: 3,
            capm: Some(CapmSummary {
                estimated: 2,
                skipped: 1,
                mean_beta: Some(1.0),
            }),
            sizing: Some(SizingSummary {
                positions: 2,
                sectors: 2,
                capped_sectors: 1,
            }),
            quality,
            ..Default::default()
        };
        let text = summary.to_string();
        assert!(text.starts_with("Keel run: 3 symbols"));
        assert!(text.contains("CAPM: 2 estimated, 1 skipped, mean beta 1.000"));
        assert!(text.contains("1 capped"));
        assert!(text.contains(&format!("{}/{}: 4", Stage::Returns, QualityIssue::FilledReturns)));
        assert!(!text.contains("Stationarity"));
    }

    #[test]
    fn test_clean_quality() {
        let text = RunSummary::default().to_string();
        assert!(text.contains("Data quality: clean"));
    }
}
