//! Sector exposure measurement and the single-pass cap
//!
//! Each sector whose share of total position size exceeds its cap has every
//! position scaled by `cap / share`. Shares are measured against the total
//! before scaling, so a capped sector's corrected share is exactly its cap.
//! The pass is not repeated and the remaining sectors are not renormalized:
//! after the pass, shares of the new total can still exceed a cap.

use super::PositionSizingResult;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::warn;

/// Symbol to sector label
pub trait SectorLookup {
    /// Sector of `symbol`, if mapped.
    fn sector(&self, symbol: &str) -> Option<&str>;
}

impl SectorLookup for BTreeMap<String, String> {
    fn sector(&self, symbol: &str) -> Option<&str> {
        self.get(symbol).map(String::as_str)
    }
}

impl SectorLookup for HashMap<String, String> {
    fn sector(&self, symbol: &str) -> Option<&str> {
        self.get(symbol).map(String::as_str)
    }
}

/// Exposure of one sector before and after the cap
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectorExposure {
    /// Sector label
    pub sector: String,
    /// Share of total position size before the cap
    pub original_weight: f64,
    /// Share after scaling, measured against the original total
    pub corrected_weight: f64,
    /// Whether the cap was applied
    pub capped: bool,
    /// Sum of final position weights in this sector
    pub final_weight: f64,
}

/// Apply the cap to `positions` in place and recompute their weights.
///
/// `cap_for` returns the cap of a sector. Returns one exposure row per sector,
/// ordered by sector.
pub fn rebalance_sectors(
    positions: &mut [PositionSizingResult],
    cap_for: impl Fn(&str) -> f64,
) -> Vec<SectorExposure> {
    let total: f64 = positions.iter().map(|p| p.position_size).sum();
    if !(total > 0.0) {
        return Vec::new();
    }

    let mut by_sector: BTreeMap<String, f64> = BTreeMap::new();
    for p in positions.iter() {
        *by_sector.entry(p.sector.clone()).or_default() += p.position_size;
    }

    let mut exposures: BTreeMap<String, SectorExposure> = BTreeMap::new();
    for (sector, size) in by_sector {
        let original_weight = size / total;
        let cap = cap_for(&sector);
        let capped = original_weight > cap;
        if capped {
            let factor = cap / original_weight;
            warn!(
                sector = %sector,
                weight = original_weight,
                cap,
                "Sector exposure above cap, scaling positions"
            );
            for p in positions.iter_mut().filter(|p| p.sector == sector) {
                p.position_size *= factor;
            }
        }
        let corrected_weight = positions
            .iter()
            .filter(|p| p.sector == sector)
            .map(|p| p.position_size)
            .sum::<f64>()
            / total;
        exposures.insert(
            sector.clone(),
            SectorExposure {
                sector,
                original_weight,
                corrected_weight,
                capped,
                final_weight: 0.0,
            },
        );
    }

    let new_total: f64 = positions.iter().map(|p| p.position_size).sum();
    for p in positions.iter_mut() {
        p.weight = p.position_size / new_total;
        if let Some(exposure) = exposures.get_mut(&p.sector) {
            exposure.final_weight += p.weight;
        }
    }

    exposures.into_values().collect()
}
