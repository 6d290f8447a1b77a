//! Integration tests for position sizing and the sector cap.

use approx::assert_abs_diff_eq;
use chrono::{Days, NaiveDate};
use keel_data::{DataQualityReport, PriceObservation, PriceTable, QualityIssue};
use keel_risk::sizing::{rebalance_sectors, rolling_volatility};
use keel_risk::{
    PortfolioWeights, PositionSizer, PositionSizingResult, SizingBasis, SizingConfig,
    SizingError,
};
use std::collections::BTreeMap;

fn position(symbol: &str, sector: &str, size: f64) -> PositionSizingResult {
    PositionSizingResult {
        symbol: symbol.to_string(),
        atr: 1.0,
        position_size: size,
        sector: sector.to_string(),
        weight: 0.0,
    }
}

fn bars(symbol: &str, closes: &[f64]) -> Vec<PriceObservation> {
    let start = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| PriceObservation {
            symbol: symbol.to_string(),
            date: start + Days::new(i as u64),
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 1_000.0,
        })
        .collect()
}

fn zigzag(base: f64, amplitude: f64, n: usize) -> Vec<f64> {
    (0..n)
        .map(|i| base + if i % 2 == 0 { amplitude } else { -amplitude })
        .collect()
}

fn sample_std(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
}

fn sectors(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(s, x)| (s.to_string(), x.to_string()))
        .collect()
}

#[test]
fn test_only_overexposed_sector_is_capped() {
    // Tech is capped at 0.25; Energy carries its own cap of 1.0
    let mut config = SizingConfig::default();
    config.sector_caps.insert("Energy".to_string(), 1.0);

    let mut positions = vec![position("AAPL", "Tech", 40.0), position("XOM", "Energy", 60.0)];
    let exposures = rebalance_sectors(&mut positions, |s| config.cap_for(s));

    let energy = &exposures[0];
    let tech = &exposures[1];
    assert_abs_diff_eq!(tech.original_weight, 0.40, epsilon = 1e-12);
    assert_abs_diff_eq!(tech.corrected_weight, 0.25, epsilon = 1e-12);
    assert!(tech.capped);
    assert_abs_diff_eq!(energy.corrected_weight, 0.60, epsilon = 1e-12);
    assert!(!energy.capped);

    // Single pass: final shares are relative to the reduced total
    assert_abs_diff_eq!(tech.final_weight, 0.25 / 0.85, epsilon = 1e-12);
    assert_abs_diff_eq!(energy.final_weight, 0.60 / 0.85, epsilon = 1e-12);
}

#[test]
fn test_uniform_cap_applies_to_every_sector() {
    let config = SizingConfig::default();
    let mut positions = vec![position("AAPL", "Tech", 40.0), position("XOM", "Energy", 60.0)];
    let exposures = rebalance_sectors(&mut positions, |s| config.cap_for(s));

    for exposure in &exposures {
        assert!(exposure.capped);
        assert_abs_diff_eq!(exposure.corrected_weight, 0.25, epsilon = 1e-12);
        assert_abs_diff_eq!(exposure.final_weight, 0.5, epsilon = 1e-12);
    }
}

#[test]
fn test_raw_risk_sizing_with_exclusions() {
    let mut rows = bars("AAA", &zigzag(100.0, 5.0, 20));
    rows.extend(bars("BBB", &zigzag(50.0, 1.0, 20)));
    rows.extend(bars("CCC", &zigzag(30.0, 1.0, 20)));
    rows.extend(bars("FLAT", &[25.0; 20]));
    rows.extend(bars("NEW", &zigzag(10.0, 1.0, 5)));
    let table = PriceTable::from_observations(rows).unwrap();
    let mapping = sectors(&[
        ("AAA", "Tech"),
        ("BBB", "Energy"),
        ("FLAT", "Tech"),
        ("NEW", "Energy"),
    ]);

    let mut config = SizingConfig::default();
    config.max_sector_exposure = 1.0;
    let sizer = PositionSizer::new(config).unwrap();
    let mut quality = DataQualityReport::new();
    let plan = sizer
        .size(&table, &mapping, &SizingBasis::RawRisk, &mut quality)
        .unwrap();

    let symbols: Vec<&str> = plan.positions.iter().map(|p| p.symbol.as_str()).collect();
    assert_eq!(symbols, vec!["AAA", "BBB"]);
    assert_eq!(quality.symbols(QualityIssue::UnmappedSymbols), vec!["CCC"]);
    assert_eq!(quality.count(QualityIssue::MissingVolatility), 2);

    let aaa = &plan.positions[0];
    let closes = table.closes("AAA").unwrap();
    let atr = sample_std(&closes[closes.len() - 14..]);
    assert_abs_diff_eq!(aaa.atr, atr, epsilon = 1e-9);
    assert_abs_diff_eq!(rolling_volatility(&table, 14).unwrap()["AAA"], atr, epsilon = 1e-9);
    assert_abs_diff_eq!(aaa.position_size, 2_000.0 / (2.0 * atr), epsilon = 1e-9);

    let total: f64 = plan.positions.iter().map(|p| p.weight).sum();
    assert_abs_diff_eq!(total, 1.0, epsilon = 1e-12);
    let allocation: f64 = plan.sector_allocation().values().sum();
    assert_abs_diff_eq!(allocation, 1.0, epsilon = 1e-12);
}

#[test]
fn test_allocation_basis_scales_budget() {
    let mut rows = bars("AAA", &zigzag(100.0, 2.0, 14));
    rows.extend(bars("BBB", &zigzag(100.0, 2.0, 14)));
    rows.extend(bars("CCC", &zigzag(100.0, 2.0, 14)));
    let table = PriceTable::from_observations(rows).unwrap();
    let mapping = sectors(&[("AAA", "Tech"), ("BBB", "Energy"), ("CCC", "Utilities")]);
    let weights: PortfolioWeights = [
        ("AAA".to_string(), 0.75),
        ("BBB".to_string(), 0.25),
        ("CCC".to_string(), 0.0),
    ]
    .into_iter()
    .collect();

    let mut config = SizingConfig::default();
    config.max_sector_exposure = 1.0;
    let sizer = PositionSizer::new(config).unwrap();
    let mut quality = DataQualityReport::new();
    let plan = sizer
        .size(&table, &mapping, &SizingBasis::Allocation(weights), &mut quality)
        .unwrap();

    assert_eq!(plan.positions.len(), 2);
    assert!(quality.is_clean());
    // Identical volatility, so position shares follow the allocation
    assert_abs_diff_eq!(plan.positions[0].weight, 0.75, epsilon = 1e-12);
    assert_abs_diff_eq!(plan.positions[1].weight, 0.25, epsilon = 1e-12);
    assert_abs_diff_eq!(
        plan.positions[0].position_size,
        3.0 * plan.positions[1].position_size,
        epsilon = 1e-9
    );
}

#[test]
fn test_nothing_to_size() {
    let table = PriceTable::from_observations(bars("AAA", &zigzag(10.0, 1.0, 20))).unwrap();
    let mapping: BTreeMap<String, String> = BTreeMap::new();
    let mut quality = DataQualityReport::new();
    let result = PositionSizer::try_default().unwrap().size(
        &table,
        &mapping,
        &SizingBasis::RawRisk,
        &mut quality,
    );
    assert!(matches!(result, Err(SizingError::NoPositions { candidates: 1 })));
}
