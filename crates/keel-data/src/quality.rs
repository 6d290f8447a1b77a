//! Data-quality accounting.
//!
//! Every stage that drops or fills data records what it did here instead of
//! coercing silently. The report travels with the pipeline output so callers
//! can see how much of the universe survived each step.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Pipeline stage that recorded a quality event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Price table ingestion
    Ingest,
    /// Return series construction and alignment
    Returns,
    /// Unit-root testing
    Stationarity,
    /// Factor-model estimation
    Capm,
    /// Mean-variance optimization
    Optimizer,
    /// Position sizing
    Sizing,
}

impl Stage {
    /// Stable lowercase name.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Ingest => "ingest",
            Self::Returns => "returns",
            Self::Stationarity => "stationarity",
            Self::Capm => "capm",
            Self::Optimizer => "optimizer",
            Self::Sizing => "sizing",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Kind of drop or fill applied to the data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityIssue {
    /// Repeated (symbol, date) rows removed, first occurrence kept
    DuplicateRows,
    /// Rows with nulls, unparseable dates, `high < low` or negative volume
    InvalidRows,
    /// Rows with a negative close price
    NegativeClose,
    /// Symbols with fewer than two observations
    ShortHistory,
    /// Returns dropped because the previous value was zero
    NonFiniteReturns,
    /// Symbols below the minimum return coverage
    LowCoverage,
    /// Missing returns replaced with zero during alignment
    FilledReturns,
    /// Dates dropped during alignment because some symbol had no return
    DroppedDates,
    /// Symbols without a sector assignment
    UnmappedSymbols,
    /// Symbols skipped by a per-symbol estimator
    SkippedSymbols,
    /// Symbols excluded because no usable volatility proxy exists
    MissingVolatility,
    /// Assets dropped because the expected return was undefined
    UndefinedExpectedReturn,
}

impl QualityIssue {
    /// Stable lowercase name.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::DuplicateRows => "duplicate_rows",
            Self::InvalidRows => "invalid_rows",
            Self::NegativeClose => "negative_close",
            Self::ShortHistory => "short_history",
            Self::NonFiniteReturns => "non_finite_returns",
            Self::LowCoverage => "low_coverage",
            Self::FilledReturns => "filled_returns",
            Self::DroppedDates => "dropped_dates",
            Self::UnmappedSymbols => "unmapped_symbols",
            Self::SkippedSymbols => "skipped_symbols",
            Self::MissingVolatility => "missing_volatility",
            Self::UndefinedExpectedReturn => "undefined_expected_return",
        }
    }
}

impl fmt::Display for QualityIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A single counted quality event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityEntry {
    /// Stage that applied the drop or fill
    pub stage: Stage,
    /// What was done
    pub issue: QualityIssue,
    /// Number of rows, values or symbols affected
    pub count: usize,
    /// Symbols involved, when the event is per symbol
    pub symbols: Vec<String>,
}

/// Running tally of every drop and fill applied during a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataQualityReport {
    entries: Vec<QualityEntry>,
}

impl DataQualityReport {
    /// Create an empty report.
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    fn entry_mut(&mut self, stage: Stage, issue: QualityIssue) -> &mut QualityEntry {
        let idx = match self
            .entries
            .iter()
            .position(|e| e.stage == stage && e.issue == issue)
        {
            Some(idx) => idx,
            None => {
                self.entries.push(QualityEntry {
                    stage,
                    issue,
                    count: 0,
                    symbols: Vec::new(),
                });
                self.entries.len() - 1
            }
        };
        &mut self.entries[idx]
    }

    /// Record `count` affected rows or values. Zero counts are ignored.
    pub fn record(&mut self, stage: Stage, issue: QualityIssue, count: usize) {
        if count == 0 {
            return;
        }
        self.entry_mut(stage, issue).count += count;
    }

    /// Record one affected symbol.
    pub fn record_symbol(&mut self, stage: Stage, issue: QualityIssue, symbol: &str) {
        let entry = self.entry_mut(stage, issue);
        entry.count += 1;
        if !entry.symbols.iter().any(|s| s == symbol) {
            entry.symbols.push(symbol.to_string());
        }
    }

    /// Total count for an issue across all stages.
    pub fn count(&self, issue: QualityIssue) -> usize {
        self.entries
            .iter()
            .filter(|e| e.issue == issue)
            .map(|e| e.count)
            .sum()
    }

    /// Count for an issue recorded by one stage.
    pub fn count_at(&self, stage: Stage, issue: QualityIssue) -> usize {
        self.entries
            .iter()
            .filter(|e| e.stage == stage && e.issue == issue)
            .map(|e| e.count)
            .sum()
    }

    /// Symbols recorded for an issue across all stages.
    pub fn symbols(&self, issue: QualityIssue) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| e.issue == issue)
            .flat_map(|e| e.symbols.iter().map(String::as_str))
            .collect()
    }

    /// All entries in recording order.
    pub fn entries(&self) -> &[QualityEntry] {
        &self.entries
    }

    /// Whether nothing was dropped or filled.
    pub fn is_clean(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fold another report into this one.
    pub fn merge(&mut self, other: Self) {
        for entry in other.entries {
            let target = self.entry_mut(entry.stage, entry.issue);
            target.count += entry.count;
            for symbol in entry.symbols {
                if !target.symbols.contains(&symbol) {
                    target.symbols.push(symbol);
                }
            }
        }
    }
}
