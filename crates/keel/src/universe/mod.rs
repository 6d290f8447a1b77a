//! Universe and sector classification.
//!
//! The sector mapping is injected by the caller; Keel ships no built-in
//! classification.

pub mod sectors;

pub use sectors::{SectorMapping, SectorMappingError};

use keel_data::{AlignedReturns, PriceTable};

/// Trait for stock universes.
pub trait Universe {
    /// Get all symbols in the universe.
    fn symbols(&self) -> Vec<String>;

    /// Check if a symbol is in the universe.
    fn contains(&self, symbol: &str) -> bool {
        self.symbols().iter().any(|s| s == symbol)
    }

    /// Get the number of constituents.
    fn size(&self) -> usize {
        self.symbols().len()
    }
}

impl Universe for PriceTable {
    fn symbols(&self) -> Vec<String> {
        Self::symbols(self).into_iter().map(str::to_string).collect()
    }

    fn contains(&self, symbol: &str) -> bool {
        self.series(symbol).is_some()
    }

    fn size(&self) -> usize {
        self.len()
    }
}

impl Universe for AlignedReturns {
    fn symbols(&self) -> Vec<String> {
        self.symbols.clone()
    }

    fn contains(&self, symbol: &str) -> bool {
        self.index_of(symbol).is_some()
    }
}

impl Universe for [String] {
    fn symbols(&self) -> Vec<String> {
        self.to_vec()
    }
}
