//! Symbol to sector classification loaded from CSV or JSON.
//!
//! CSV files carry a `symbol` and a `sector` column (any case, any order,
//! extra columns ignored). JSON files are a single object mapping symbols to
//! sector labels. Symbols are normalized to uppercase like the price table.

use crate::universe::Universe;
use keel_risk::SectorLookup;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::Read;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors raised while loading a sector mapping.
#[derive(Debug, Error)]
pub enum SectorMappingError {
    /// File could not be read.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV could not be parsed.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON could not be parsed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A required CSV column is absent.
    #[error("Missing column: {0}")]
    MissingColumn(&'static str),

    /// A row has an empty symbol or sector.
    #[error("Empty symbol or sector in record {record}")]
    EmptyField {
        /// 1-based record number, header excluded
        record: usize,
    },

    /// The same symbol is assigned two sectors.
    #[error("Symbol {symbol} mapped to both {first} and {second}")]
    Conflict {
        /// Normalized symbol
        symbol: String,
        /// Sector seen first
        first: String,
        /// Conflicting sector
        second: String,
    },
}

/// Symbol to sector label.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SectorMapping {
    sectors: BTreeMap<String, String>,
}

impl SectorMapping {
    /// Build a mapping from `(symbol, sector)` pairs.
    ///
    /// Repeating a pair is allowed; assigning one symbol two sectors is not.
    ///
    /// # Errors
    /// Returns an error on empty fields or conflicting assignments.
    pub fn new<I, S, T>(pairs: I) -> Result<Self, SectorMappingError>
    where
        I: IntoIterator<Item = (S, T)>,
        S: AsRef<str>,
        T: AsRef<str>,
    {
        let mut sectors: BTreeMap<String, String> = BTreeMap::new();
        for (i, (symbol, sector)) in pairs.into_iter().enumerate() {
            let symbol = symbol.as_ref().trim().to_uppercase();
            let sector = sector.as_ref().trim();
            if symbol.is_empty() || sector.is_empty() {
                return Err(SectorMappingError::EmptyField { record: i + 1 });
            }
            match sectors.get(&symbol) {
                Some(first) if first != sector => {
                    return Err(SectorMappingError::Conflict {
                        symbol,
                        first: first.clone(),
                        second: sector.to_string(),
                    });
                }
                Some(_) => {}
                None => {
                    sectors.insert(symbol, sector.to_string());
                }
            }
        }
        Ok(Self { sectors })
    }

    /// Parse CSV with `symbol` and `sector` columns.
    ///
    /// # Errors
    /// Returns an error if a column is missing or a record is malformed.
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self, SectorMappingError> {
        let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let headers = rdr.headers()?.clone();
        let column = |name: &'static str| {
            headers
                .iter()
                .position(|h| h.eq_ignore_ascii_case(name))
                .ok_or(SectorMappingError::MissingColumn(name))
        };
        let symbol_idx = column("symbol")?;
        let sector_idx = column("sector")?;

        let mut pairs = Vec::new();
        for record in rdr.records() {
            let record = record?;
            pairs.push((
                record.get(symbol_idx).unwrap_or_default().to_string(),
                record.get(sector_idx).unwrap_or_default().to_string(),
            ));
        }
        Self::new(pairs)
    }

    /// Parse a JSON object of `symbol: sector` entries.
    ///
    /// # Errors
    /// Returns an error if the JSON is not such an object.
    pub fn from_json(json: &str) -> Result<Self, SectorMappingError> {
        let raw: BTreeMap<String, String> = serde_json::from_str(json)?;
        Self::new(raw)
    }

    /// Load a mapping from a file.
    ///
    /// Files ending in `.json` are read as JSON, anything else as CSV.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, SectorMappingError> {
        let path = path.as_ref();
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let mapping = if is_json {
            Self::from_json(&fs::read_to_string(path)?)?
        } else {
            Self::from_csv_reader(File::open(path)?)?
        };
        info!(
            path = %path.display(),
            symbols = mapping.len(),
            sectors = mapping.sectors().len(),
            "Loaded sector mapping"
        );
        Ok(mapping)
    }

    /// Get the sector for a symbol.
    pub fn sector(&self, symbol: &str) -> Option<&str> {
        self.sectors.get(symbol).map(String::as_str)
    }

    /// Number of mapped symbols.
    pub fn len(&self) -> usize {
        self.sectors.len()
    }

    /// Whether nothing is mapped.
    pub fn is_empty(&self) -> bool {
        self.sectors.is_empty()
    }

    /// Distinct sector labels.
    pub fn sectors(&self) -> BTreeSet<&str> {
        self.sectors.values().map(String::as_str).collect()
    }

    /// Get all symbols in a specific sector.
    pub fn symbols_in_sector(&self, sector: &str) -> Vec<&str> {
        self.sectors
            .iter()
            .filter(|(_, s)| s.as_str() == sector)
            .map(|(symbol, _)| symbol.as_str())
            .collect()
    }

    /// `(symbol, sector)` pairs in symbol order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.sectors.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Universe symbols without a sector, sorted.
    ///
    /// Mapped symbols outside the universe are harmless and only logged.
    pub fn unmapped<U>(&self, universe: &U) -> Vec<String>
    where
        U: Universe + ?Sized,
    {
        let mut symbols = universe.symbols();
        symbols.sort();
        let unmapped: Vec<String> = symbols
            .into_iter()
            .filter(|s| !self.sectors.contains_key(s))
            .collect();

        let unused = self
            .sectors
            .keys()
            .filter(|s| !universe.contains(s))
            .count();
        if unused > 0 {
            debug!(unused, "Mapped symbols outside the universe");
        }
        if !unmapped.is_empty() {
            warn!(
                count = unmapped.len(),
                symbols = ?unmapped,
                "Symbols without a sector will not be sized"
            );
        }
        unmapped
    }
}

impl SectorLookup for SectorMapping {
    fn sector(&self, symbol: &str) -> Option<&str> {
        Self::sector(self, symbol)
    }
}
