//! Keel CLI binary.
//!
//! Provides command-line interface for the Keel portfolio pipeline.

use clap::{Args, Parser, Subcommand};
use keel::{KeelConfig, Pipeline, PipelineOptions, SectorMapping, io};
use keel_data::{DataQualityReport, MarketSource};
use keel_factors::CapmEstimates;
use keel_output::ExportFormat;
use keel_risk::{Objective, OptimizationResult, SizingBasis, SizingPlan};
use keel_stats::StationarityRun;
use std::path::{Path, PathBuf};
use std::process;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "keel")]
#[command(about = "Keel: CAPM, mean-variance allocation and risk-managed sizing", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct InputArgs {
    /// Price CSV with Date, Symbol, Open, High, Low, Close, Volume columns
    input: PathBuf,

    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Market return CSV (date, return); defaults to the equal-weighted universe
    #[arg(long)]
    market: Option<PathBuf>,
}

#[derive(Args)]
struct OutputArgs {
    /// Directory to write result tables to
    #[arg(long)]
    out: Option<PathBuf>,

    /// Table format (csv, json or pretty-json)
    #[arg(long, default_value = "csv")]
    format: ExportFormat,
}

#[derive(Args)]
struct Overrides {
    /// Portfolio value used for sizing
    #[arg(long)]
    portfolio_value: Option<f64>,

    /// Objective (max-sharpe, min-variance or target-return:<r>)
    #[arg(long)]
    objective: Option<Objective>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline and write every table
    Run {
        #[command(flatten)]
        input: InputArgs,

        /// Sector mapping (CSV with symbol and sector columns, or JSON object)
        #[arg(long)]
        sectors: PathBuf,

        /// Directory to write result tables to
        #[arg(long, default_value = "output")]
        out: PathBuf,

        /// Table format (csv, json or pretty-json)
        #[arg(long, default_value = "csv")]
        format: ExportFormat,

        /// Skip the stationarity stage
        #[arg(long)]
        no_stationarity: bool,

        #[command(flatten)]
        overrides: Overrides,
    },

    /// Test every close series for a unit root
    Stationarity {
        #[command(flatten)]
        input: InputArgs,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Estimate CAPM betas and expected returns
    Capm {
        #[command(flatten)]
        input: InputArgs,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Optimize portfolio weights
    Optimize {
        #[command(flatten)]
        input: InputArgs,

        #[command(flatten)]
        output: OutputArgs,

        #[command(flatten)]
        overrides: Overrides,
    },

    /// Size positions and cap sector exposure
    Size {
        #[command(flatten)]
        input: InputArgs,

        /// Sector mapping (CSV with symbol and sector columns, or JSON object)
        #[arg(long)]
        sectors: PathBuf,

        /// Size every mapped symbol instead of the optimized allocation
        #[arg(long)]
        raw: bool,

        #[command(flatten)]
        output: OutputArgs,

        #[command(flatten)]
        overrides: Overrides,
    },

    /// Print the default configuration as JSON
    Config,
}

fn main() {
    init_logging();
    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            input,
            sectors,
            out,
            format,
            no_stationarity,
            overrides,
        } => {
            let config = load_config(input.config.as_deref(), &overrides)?;
            let pipeline = Pipeline::new(config)?;
            let frame = io::read_prices(&input.input)?;
            let mapping = SectorMapping::from_path(&sectors)?;
            let options = PipelineOptions {
                stationarity: !no_stationarity,
                market: market_source(input.market.as_deref())?,
            };

            let output = pipeline.run(&frame, &mapping, options)?;
            let periods = pipeline.config().periods_per_year() as f64;
            print_weights(&output.optimization, periods);
            print_plan(&output.sizing);
            let written = output.write_tables(&out, format)?;
            println!("{}", output.summary());
            println!("Wrote {} tables to {}", written.len(), out.display());
        }
        Commands::Stationarity { input, output } => {
            let pipeline = Pipeline::new(load_config(input.config.as_deref(), &Overrides::none())?)?;
            let frame = io::read_prices(&input.input)?;
            let mut prepared = pipeline.ingest(&frame, MarketSource::EqualWeighted)?;
            let run = pipeline.stationarity(&prepared.table, &mut prepared.quality)?;

            print_stationarity(&run);
            print_quality(&prepared.quality);
            if let Some(dir) = &output.out {
                keel::write_stationarity(dir, &run, output.format)?;
                keel::write_quality(dir, &prepared.quality, output.format)?;
                report_written(dir);
            }
        }
        Commands::Capm { input, output } => {
            let pipeline = Pipeline::new(load_config(input.config.as_deref(), &Overrides::none())?)?;
            let frame = io::read_prices(&input.input)?;
            let mut prepared = pipeline.ingest(&frame, market_source(input.market.as_deref())?)?;
            let estimates = pipeline.capm(&prepared.panel, &mut prepared.quality)?;

            print_capm(&estimates);
            print_quality(&prepared.quality);
            if let Some(dir) = &output.out {
                keel::write_capm(dir, &estimates, output.format)?;
                keel::write_quality(dir, &prepared.quality, output.format)?;
                report_written(dir);
            }
        }
        Commands::Optimize {
            input,
            output,
            overrides,
        } => {
            let pipeline = Pipeline::new(load_config(input.config.as_deref(), &overrides)?)?;
            let frame = io::read_prices(&input.input)?;
            let mut prepared = pipeline.ingest(&frame, market_source(input.market.as_deref())?)?;
            let capm = pipeline.capm(&prepared.panel, &mut prepared.quality).ok();
            let result = pipeline.optimize(&prepared.panel, capm.as_ref(), &mut prepared.quality)?;

            print_weights(&result, pipeline.config().periods_per_year() as f64);
            print_quality(&prepared.quality);
            if let Some(dir) = &output.out {
                write_optimization(dir, &pipeline, &result, output.format)?;
                keel::write_quality(dir, &prepared.quality, output.format)?;
                report_written(dir);
            }
        }
        Commands::Size {
            input,
            sectors,
            raw,
            output,
            overrides,
        } => {
            let pipeline = Pipeline::new(load_config(input.config.as_deref(), &overrides)?)?;
            let frame = io::read_prices(&input.input)?;
            let mapping = SectorMapping::from_path(&sectors)?;
            let mut prepared = pipeline.ingest(&frame, market_source(input.market.as_deref())?)?;

            let basis = if raw {
                SizingBasis::RawRisk
            } else {
                let capm = pipeline.capm(&prepared.panel, &mut prepared.quality).ok();
                let result =
                    pipeline.optimize(&prepared.panel, capm.as_ref(), &mut prepared.quality)?;
                SizingBasis::Allocation(result.weights)
            };
            let plan = pipeline.size(&prepared.table, &mapping, &basis, &mut prepared.quality)?;

            print_plan(&plan);
            print_quality(&prepared.quality);
            if let Some(dir) = &output.out {
                keel::write_sizing(dir, &plan, output.format)?;
                keel::write_quality(dir, &prepared.quality, output.format)?;
                report_written(dir);
            }
        }
        Commands::Config => {
            println!("{}", KeelConfig::default().to_json()?);
        }
    }

    Ok(())
}

impl Overrides {
    const fn none() -> Self {
        Self {
            portfolio_value: None,
            objective: None,
        }
    }
}

fn load_config(
    path: Option<&Path>,
    overrides: &Overrides,
) -> Result<KeelConfig, Box<dyn std::error::Error>> {
    let mut config = match path {
        Some(path) => {
            info!(path = %path.display(), "Loading configuration");
            KeelConfig::from_path(path)?
        }
        None => KeelConfig::default(),
    };
    if let Some(value) = overrides.portfolio_value {
        config.sizing.portfolio_value = value;
    }
    if let Some(objective) = overrides.objective {
        config.optimizer.objective = objective;
    }
    config.validate()?;
    Ok(config)
}

fn market_source(path: Option<&Path>) -> Result<MarketSource, Box<dyn std::error::Error>> {
    Ok(match path {
        Some(path) => MarketSource::External(io::read_market_returns(path)?),
        None => MarketSource::EqualWeighted,
    })
}

fn write_optimization(
    dir: &Path,
    pipeline: &Pipeline,
    result: &OptimizationResult,
    format: ExportFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    use keel_output::{PerformanceRecord, WeightRecord, write_table};

    let periods = pipeline.config().periods_per_year() as f64;
    write_table(
        dir,
        keel::TableName::OptimizedPortfolioWeights.file_stem(),
        &WeightRecord::from_weights(&result.rounded_weights())[..],
        format,
    )?;
    write_table(
        dir,
        keel::TableName::PortfolioPerformance.file_stem(),
        &[PerformanceRecord::annualized(result, periods)][..],
        format,
    )?;
    Ok(())
}

fn report_written(dir: &Path) {
    println!("Tables written to {}", dir.display());
}

fn print_header(title: &str) {
    println!("\n╔══════════════════════════════════════════════════════════════╗");
    println!("║{:^62}║", title);
    println!("╚══════════════════════════════════════════════════════════════╝\n");
}

fn print_section(title: &str) {
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("{}", title);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n");
}

fn print_stationarity(run: &StationarityRun) {
    print_header("STATIONARITY (ADF)");
    println!(
        "{:<10} {:>10} {:>9} {:>5} {:>6}  {}",
        "Symbol", "ADF stat", "p-value", "Lags", "Nobs", "State"
    );
    println!("─────────────────────────────────────────────────────────────");
    for r in &run.reports {
        let flag = if r.low_confidence { " (low confidence)" } else { "" };
        println!(
            "{:<10} {:>10.4} {:>9.4} {:>5} {:>6}  {}{}",
            r.symbol,
            r.test_statistic,
            r.p_value,
            r.lags_used,
            r.nobs,
            r.state(),
            flag
        );
    }
    for s in &run.skipped {
        println!("{:<10} skipped: {}", s.symbol, s.reason);
    }
    println!();
}

fn print_capm(estimates: &CapmEstimates) {
    print_header("CAPM ESTIMATES");
    println!(
        "{:<10} {:>8} {:>12} {:>8} {:>6}",
        "Symbol", "Beta", "E[R] (day)", "R²", "Obs"
    );
    println!("─────────────────────────────────────────────────────────────");
    for e in &estimates.estimates {
        println!(
            "{:<10} {:>8.3} {:>12.6} {:>8.3} {:>6}",
            e.symbol, e.beta, e.expected_return, e.r_squared, e.observations
        );
    }
    for s in &estimates.skipped {
        println!("{:<10} skipped: {}", s.symbol, s.reason);
    }
    println!();
}

fn print_weights(result: &OptimizationResult, periods_per_year: f64) {
    print_header("OPTIMIZED PORTFOLIO");
    for attempt in &result.attempts {
        println!("Attempt: {}", attempt);
    }
    println!("Covariance: {}\n", result.quality);

    print_section("WEIGHTS");
    for (symbol, weight) in result.rounded_weights().positive() {
        println!("  {:<10} {:>8.2}%", symbol, weight * 100.0);
    }

    let annual = result.performance.annualized(periods_per_year);
    println!("\nExpected Return (annualized): {:>8.2}%", annual.expected_return * 100.0);
    println!("Volatility (annualized):      {:>8.2}%", annual.expected_volatility * 100.0);
    println!("Sharpe Ratio (annualized):    {:>8.3}\n", annual.sharpe_ratio);
}

fn print_plan(plan: &SizingPlan) {
    print_header("RISK-MANAGED POSITIONS");
    println!(
        "{:<10} {:>10} {:>14} {:>8}  {}",
        "Symbol", "ATR", "Position", "Weight", "Sector"
    );
    println!("─────────────────────────────────────────────────────────────");
    for p in &plan.positions {
        println!(
            "{:<10} {:>10.4} {:>14.2} {:>7.2}%  {}",
            p.symbol,
            p.atr,
            p.position_size,
            p.weight * 100.0,
            p.sector
        );
    }

    println!();
    print_section("SECTOR ALLOCATION");
    for e in &plan.sectors {
        let capped = if e.capped { " (capped)" } else { "" };
        println!(
            "  {:<20} {:>7.2}%  (before cap {:.2}%){}",
            e.sector,
            e.final_weight * 100.0,
            e.original_weight * 100.0,
            capped
        );
    }
    println!();
}

fn print_quality(quality: &DataQualityReport) {
    if quality.is_clean() {
        println!("Data quality: clean\n");
        return;
    }
    println!("Data quality:");
    for entry in quality.entries() {
        if entry.symbols.is_empty() {
            println!("  {}/{}: {}", entry.stage, entry.issue, entry.count);
        } else {
            println!(
                "  {}/{}: {} ({})",
                entry.stage,
                entry.issue,
                entry.count,
                entry.symbols.join(", ")
            );
        }
    }
    println!();
}
