//! End-to-end run over a price table.
//!
//! Stages run in order: ingest, returns, optional stationarity, CAPM,
//! optimization, sizing. Each stage takes tables and configuration and returns
//! values; every drop and fill lands in a single [`DataQualityReport`].

use crate::config::{ConfigError, KeelConfig};
use keel_data::{
    DataError, DataQualityReport, MarketSource, PriceTable, QualityIssue, ReturnPanel,
    ReturnsBuilder, Stage,
};
use keel_factors::{CapmEstimates, CapmEstimator};
use keel_output::{
    CapmRecord, CapmSummary, ExportError, ExportFormat, OptimizationSummary, PerformanceRecord,
    PositionRecord, QualityRecord, RunSummary, SectorRecord, SizingSummary, StationaryDataset,
    StationarityRecord, StationaritySummary, WeightRecord, records, write_table,
};
use keel_risk::{
    CovarianceEstimator, ExpectedReturnSource, MeanVarianceOptimizer, OptimizationInput,
    OptimizationResult, OptimizerError, PositionSizer, SampleCovariance, SectorLookup,
    SizingBasis, SizingError, SizingPlan,
};
use keel_stats::{StationarityRun, StationarityTester};
use ndarray::Array1;
use polars::prelude::DataFrame;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

/// A failed run, tagged by the stage that failed.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Configuration rejected before any stage ran.
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// Input table unusable (missing columns, unreadable values).
    #[error("Input stage failed: {0}")]
    Input(#[source] DataError),

    /// No aligned return panel could be formed.
    #[error("Returns stage failed: {0}")]
    Returns(#[source] DataError),

    /// No series could be tested.
    #[error("Stationarity stage failed for {symbols:?}: {reason}")]
    Stationarity {
        /// Symbols involved
        symbols: Vec<String>,
        /// What went wrong
        reason: String,
    },

    /// No symbol could be fitted.
    #[error("CAPM stage failed for {symbols:?}: {reason}")]
    Capm {
        /// Symbols involved
        symbols: Vec<String>,
        /// What went wrong
        reason: String,
    },

    /// Every optimizer attempt failed, or the inputs were unusable.
    #[error("Optimization stage failed: {0}")]
    Optimization(#[from] OptimizerError),

    /// Nothing could be sized.
    #[error("Sizing stage failed: {0}")]
    Sizing(#[from] SizingError),
}

impl PipelineError {
    /// Stage that raised the error, `None` for configuration errors.
    pub const fn stage(&self) -> Option<Stage> {
        match self {
            Self::Config(_) => None,
            Self::Input(_) => Some(Stage::Ingest),
            Self::Returns(_) => Some(Stage::Returns),
            Self::Stationarity { .. } => Some(Stage::Stationarity),
            Self::Capm { .. } => Some(Stage::Capm),
            Self::Optimization(_) => Some(Stage::Optimizer),
            Self::Sizing(_) => Some(Stage::Sizing),
        }
    }
}

/// Run options that are not part of the persisted configuration.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Run the stationarity stage (default: true)
    pub stationarity: bool,
    /// Market proxy used for CAPM (default: equal-weighted)
    pub market: MarketSource,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            stationarity: true,
            market: MarketSource::EqualWeighted,
        }
    }
}

/// Price table and return panel after ingestion.
#[derive(Debug, Clone)]
pub struct Prepared {
    /// Validated prices
    pub table: PriceTable,
    /// Per-symbol returns and the market proxy
    pub panel: ReturnPanel,
    /// Ingest and return-build drops so far
    pub quality: DataQualityReport,
}

/// Names of the exported tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableName {
    /// CAPM estimates
    CapmResults,
    /// Cleaned optimizer weights
    OptimizedPortfolioWeights,
    /// Annualized portfolio figures
    PortfolioPerformance,
    /// Sized positions
    RiskManagedPortfolio,
    /// Sector exposures
    SectorAllocation,
    /// ADF reports
    StationarityResults,
    /// Transformed close series
    StationaryDataset,
    /// Drops and fills
    DataQuality,
}

impl TableName {
    /// File stem of the table.
    pub const fn file_stem(&self) -> &'static str {
        match self {
            Self::CapmResults => "capm_results",
            Self::OptimizedPortfolioWeights => "optimized_portfolio_weights",
            Self::PortfolioPerformance => "portfolio_performance",
            Self::RiskManagedPortfolio => "risk_managed_portfolio",
            Self::SectorAllocation => "sector_allocation",
            Self::StationarityResults => "stationarity_results",
            Self::StationaryDataset => "stationary_dataset",
            Self::DataQuality => "data_quality",
        }
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_stem())
    }
}

/// Everything a full run produces.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    /// Symbols in the validated price table
    pub symbols: usize,
    /// Stationarity reports and series, if the stage ran
    pub stationarity: Option<StationarityRun>,
    /// CAPM estimates and skips
    pub capm: CapmEstimates,
    /// Optimizer weights, attempts and performance
    pub optimization: OptimizationResult,
    /// Positions and sector exposure
    pub sizing: SizingPlan,
    /// Drops and fills across all stages
    pub quality: DataQualityReport,
    /// Periods per year used for annualized figures
    pub periods_per_year: f64,
}

impl PipelineOutput {
    /// Headline figures of the run.
    pub fn summary(&self) -> RunSummary {
        RunSummary {
            symbols: self.symbols,
            stationarity: self.stationarity.as_ref().map(StationaritySummary::from),
            capm: Some(CapmSummary::from(&self.capm)),
            optimization: Some(OptimizationSummary::new(
                &self.optimization,
                self.periods_per_year,
            )),
            sizing: Some(SizingSummary::from(&self.sizing)),
            quality: self.quality.clone(),
        }
    }

    /// Write every table to `dir`.
    ///
    /// # Errors
    /// Returns the first table that fails to serialize or write.
    pub fn write_tables(
        &self,
        dir: &Path,
        format: ExportFormat,
    ) -> Result<Vec<PathBuf>, ExportError> {
        let mut written = vec![
            write_capm(dir, &self.capm, format)?,
            write_table(
                dir,
                TableName::OptimizedPortfolioWeights.file_stem(),
                &WeightRecord::from_weights(&self.optimization.rounded_weights())[..],
                format,
            )?,
            write_table(
                dir,
                TableName::PortfolioPerformance.file_stem(),
                &[PerformanceRecord::annualized(
                    &self.optimization,
                    self.periods_per_year,
                )][..],
                format,
            )?,
        ];
        written.extend(write_sizing(dir, &self.sizing, format)?);
        if let Some(run) = &self.stationarity {
            written.extend(write_stationarity(dir, run, format)?);
        }
        written.push(write_quality(dir, &self.quality, format)?);
        info!(dir = %dir.display(), tables = written.len(), "Wrote result tables");
        Ok(written)
    }
}

/// Write the CAPM table.
///
/// # Errors
/// Returns an error if serialization or writing fails.
pub fn write_capm(
    dir: &Path,
    capm: &CapmEstimates,
    format: ExportFormat,
) -> Result<PathBuf, ExportError> {
    let rows: Vec<CapmRecord> = records(&capm.estimates);
    write_table(dir, TableName::CapmResults.file_stem(), &rows[..], format)
}

/// Write the position and sector tables.
///
/// # Errors
/// Returns an error if serialization or writing fails.
pub fn write_sizing(
    dir: &Path,
    plan: &SizingPlan,
    format: ExportFormat,
) -> Result<Vec<PathBuf>, ExportError> {
    let positions: Vec<PositionRecord> = records(&plan.positions);
    let sectors: Vec<SectorRecord> = records(&plan.sectors);
    Ok(vec![
        write_table(
            dir,
            TableName::RiskManagedPortfolio.file_stem(),
            &positions[..],
            format,
        )?,
        write_table(
            dir,
            TableName::SectorAllocation.file_stem(),
            &sectors[..],
            format,
        )?,
    ])
}

/// Write the stationarity report table and the stationary dataset.
///
/// # Errors
/// Returns an error if serialization or writing fails.
pub fn write_stationarity(
    dir: &Path,
    run: &StationarityRun,
    format: ExportFormat,
) -> Result<Vec<PathBuf>, ExportError> {
    let reports: Vec<StationarityRecord> = records(&run.reports);
    Ok(vec![
        write_table(
            dir,
            TableName::StationarityResults.file_stem(),
            &reports[..],
            format,
        )?,
        write_table(
            dir,
            TableName::StationaryDataset.file_stem(),
            &StationaryDataset::new(&run.series),
            format,
        )?,
    ])
}

/// Write the data-quality table.
///
/// # Errors
/// Returns an error if serialization or writing fails.
pub fn write_quality(
    dir: &Path,
    quality: &DataQualityReport,
    format: ExportFormat,
) -> Result<PathBuf, ExportError> {
    write_table(
        dir,
        TableName::DataQuality.file_stem(),
        &QualityRecord::from_report(quality)[..],
        format,
    )
}

/// The staged pipeline with validated configuration.
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: KeelConfig,
    returns: ReturnsBuilder,
    stationarity: StationarityTester,
    capm: CapmEstimator,
    optimizer: MeanVarianceOptimizer,
    sizer: PositionSizer,
}

impl Pipeline {
    /// Build every stage from `config`.
    ///
    /// # Errors
    /// Returns [`PipelineError::Config`] if any section is out of range.
    pub fn new(config: KeelConfig) -> Result<Self, PipelineError> {
        let returns = ReturnsBuilder::new(config.returns.clone()).map_err(ConfigError::from)?;
        let stationarity =
            StationarityTester::new(config.stationarity.clone()).map_err(ConfigError::from)?;
        let capm = CapmEstimator::new(config.capm.clone()).map_err(ConfigError::from)?;
        let optimizer =
            MeanVarianceOptimizer::new(config.optimizer.clone()).map_err(ConfigError::from)?;
        let sizer = PositionSizer::new(config.sizing.clone()).map_err(ConfigError::from)?;
        Ok(Self {
            config,
            returns,
            stationarity,
            capm,
            optimizer,
            sizer,
        })
    }

    /// Create a pipeline with the default configuration.
    pub fn try_default() -> Result<Self, PipelineError> {
        Self::new(KeelConfig::default())
    }

    /// Pipeline configuration.
    pub const fn config(&self) -> &KeelConfig {
        &self.config
    }

    /// Validate `frame` and derive return series.
    ///
    /// # Errors
    /// Returns [`PipelineError::Input`] on schema or type errors, and
    /// [`PipelineError::Returns`] if the return queries fail.
    pub fn ingest(
        &self,
        frame: &DataFrame,
        market: MarketSource,
    ) -> Result<Prepared, PipelineError> {
        let table = PriceTable::from_frame(frame).map_err(PipelineError::Input)?;
        if table.is_empty() {
            return Err(PipelineError::Input(DataError::InsufficientData {
                reason: "no valid price rows".to_string(),
            }));
        }
        let panel = self
            .returns
            .build(&table, market)
            .map_err(PipelineError::Returns)?;

        let mut quality = table.quality().clone();
        quality.merge(panel.quality().clone());
        Ok(Prepared {
            table,
            panel,
            quality,
        })
    }

    /// Test every close series and difference the non-stationary ones.
    ///
    /// # Errors
    /// Returns [`PipelineError::Stationarity`] if no series could be tested.
    pub fn stationarity(
        &self,
        table: &PriceTable,
        quality: &mut DataQualityReport,
    ) -> Result<StationarityRun, PipelineError> {
        let run = self.stationarity.run(table, quality);
        if run.reports.is_empty() && !run.skipped.is_empty() {
            return Err(PipelineError::Stationarity {
                symbols: run.skipped.iter().map(|s| s.symbol.clone()).collect(),
                reason: "no series could be tested".to_string(),
            });
        }
        Ok(run)
    }

    /// Fit every symbol against the panel's market proxy.
    ///
    /// # Errors
    /// Returns [`PipelineError::Capm`] if no symbol could be fitted.
    pub fn capm(
        &self,
        panel: &ReturnPanel,
        quality: &mut DataQualityReport,
    ) -> Result<CapmEstimates, PipelineError> {
        let estimates = self.capm.estimate_panel(panel, quality);
        if estimates.estimates.is_empty() {
            return Err(PipelineError::Capm {
                symbols: estimates.skipped.iter().map(|s| s.symbol.clone()).collect(),
                reason: "no symbol could be fitted against the market proxy".to_string(),
            });
        }
        Ok(estimates)
    }

    /// Align returns, estimate the covariance and run the optimizer.
    ///
    /// With [`ExpectedReturnSource::Capm`], symbols without a CAPM estimate get
    /// an undefined expected return and are dropped by the optimizer.
    ///
    /// # Errors
    /// Returns [`PipelineError::Returns`] if no aligned panel can be formed,
    /// [`PipelineError::Capm`] if CAPM returns are requested but missing, and
    /// [`PipelineError::Optimization`] if every attempt fails.
    pub fn optimize(
        &self,
        panel: &ReturnPanel,
        capm: Option<&CapmEstimates>,
        quality: &mut DataQualityReport,
    ) -> Result<OptimizationResult, PipelineError> {
        let aligned = panel
            .align(&self.config.returns, quality)
            .map_err(PipelineError::Returns)?;
        let covariance = SampleCovariance::default()
            .estimate(&aligned.returns)
            .map_err(OptimizerError::from)?;

        let expected_returns = match self.config.optimizer.expected_returns {
            ExpectedReturnSource::Historical => Array1::from(aligned.mean_returns()),
            ExpectedReturnSource::Capm => {
                let estimates = capm.ok_or_else(|| PipelineError::Capm {
                    symbols: aligned.symbols.clone(),
                    reason: "CAPM expected returns requested but not estimated".to_string(),
                })?;
                aligned
                    .symbols
                    .iter()
                    .map(|s| estimates.get(s).map_or(f64::NAN, |e| e.expected_return))
                    .collect()
            }
        };

        let input = OptimizationInput {
            symbols: aligned.symbols.clone(),
            expected_returns,
            covariance,
            risk_free_rate: self.config.capm.periodic_risk_free_rate(),
        };
        let result = self.optimizer.optimize(&input)?;
        for symbol in &result.dropped {
            quality.record_symbol(Stage::Optimizer, QualityIssue::UndefinedExpectedReturn, symbol);
        }
        if result.used_fallback() {
            warn!(objective = %result.objective, "Optimizer fell back");
        }
        Ok(result)
    }

    /// Size positions on `basis` and apply the sector caps.
    ///
    /// # Errors
    /// Returns [`PipelineError::Sizing`] if no symbol can be sized.
    pub fn size<L>(
        &self,
        table: &PriceTable,
        sectors: &L,
        basis: &SizingBasis,
        quality: &mut DataQualityReport,
    ) -> Result<SizingPlan, PipelineError>
    where
        L: SectorLookup + ?Sized,
    {
        Ok(self.sizer.size(table, sectors, basis, quality)?)
    }

    /// Run every stage on `frame`.
    ///
    /// # Errors
    /// Returns the first fatal stage error. Non-fatal drops are in
    /// [`PipelineOutput::quality`].
    pub fn run<L>(
        &self,
        frame: &DataFrame,
        sectors: &L,
        options: PipelineOptions,
    ) -> Result<PipelineOutput, PipelineError>
    where
        L: SectorLookup + ?Sized,
    {
        let Prepared {
            table,
            panel,
            mut quality,
        } = self.ingest(frame, options.market)?;

        let stationarity = if options.stationarity {
            Some(self.stationarity(&table, &mut quality)?)
        } else {
            None
        };
        let capm = self.capm(&panel, &mut quality)?;
        let optimization = self.optimize(&panel, Some(&capm), &mut quality)?;
        let basis = SizingBasis::Allocation(optimization.weights.clone());
        let sizing = self.size(&table, sectors, &basis, &mut quality)?;

        info!(
            symbols = table.len(),
            holdings = optimization.weights.positive().count(),
            positions = sizing.positions.len(),
            quality_entries = quality.entries().len(),
            "Pipeline complete"
        );

        Ok(PipelineOutput {
            symbols: table.len(),
            stationarity,
            capm,
            optimization,
            sizing,
            quality,
            periods_per_year: self.config.periods_per_year() as f64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_risk::SizingConfig;

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = KeelConfig {
            sizing: SizingConfig {
                atr_window: 1,
                ..Default::default()
            },
            ..Default::default()
        };
        let err = Pipeline::new(config).unwrap_err();
        assert!(matches!(err, PipelineError::Config(ConfigError::Sizing(_))));
        assert!(err.stage().is_none());
    }

    #[test]
    fn test_table_names() {
        assert_eq!(TableName::CapmResults.to_string(), "capm_results");
        assert_eq!(
            TableName::OptimizedPortfolioWeights.file_stem(),
            "optimized_portfolio_weights"
        );
    }

    #[test]
    fn test_missing_columns_are_input_errors() {
        let frame = polars::prelude::df!("date" => ["2024-01-02"], "close" => [1.0]).unwrap();
        let err = Pipeline::try_default()
            .unwrap()
            .ingest(&frame, MarketSource::EqualWeighted)
            .unwrap_err();
        assert_eq!(err.stage(), Some(Stage::Ingest));
        assert!(matches!(err, PipelineError::Input(e) if e.is_schema_error()));
    }
}
