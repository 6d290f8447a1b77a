//! Integration tests for ingesting a price frame and aligning returns.

use approx::assert_abs_diff_eq;
use keel_data::{
    DataQualityReport, MarketSource, MissingReturnPolicy, PriceTable, QualityIssue,
    ReturnsBuilder, ReturnsConfig,
};
use polars::prelude::*;
use rstest::rstest;

/// AAPL and MSFT trade every day, GOOG misses one day, TINY trades twice.
fn sample_frame() -> DataFrame {
    df!(
        "Date" => [
            "2024-01-01", "2024-01-02", "2024-01-03", "2024-01-04", "2024-01-05",
            "2024-01-01", "2024-01-02", "2024-01-03", "2024-01-04", "2024-01-05",
            "2024-01-01", "2024-01-02", "2024-01-04", "2024-01-05",
            "2024-01-01", "2024-01-05",
            "2024-01-05",
        ],
        "Symbol" => [
            "AAPL", "AAPL", "AAPL", "AAPL", "AAPL",
            "MSFT", "MSFT", "MSFT", "MSFT", "MSFT",
            "GOOG", "GOOG", "GOOG", "GOOG",
            "TINY", "TINY",
            "AAPL",
        ],
        "Open" => [
            100.0, 101.0, 102.0, 103.0, 104.0,
            200.0, 202.0, 204.0, 206.0, 208.0,
            50.0, 51.0, 52.0, 53.0,
            1.0, 2.0,
            999.0,
        ],
        "High" => [
            101.0, 102.0, 103.0, 104.0, 105.0,
            201.0, 203.0, 205.0, 207.0, 209.0,
            51.0, 52.0, 53.0, 54.0,
            1.0, 2.0,
            999.0,
        ],
        "Low" => [
            99.0, 100.0, 101.0, 102.0, 103.0,
            199.0, 201.0, 203.0, 205.0, 207.0,
            49.0, 50.0, 51.0, 52.0,
            1.0, 2.0,
            999.0,
        ],
        "Close" => [
            100.0, 101.0, 102.0, 103.0, 104.0,
            200.0, 202.0, 204.0, 206.0, 208.0,
            50.0, 51.0, 52.0, 53.0,
            1.0, 2.0,
            999.0,
        ],
        "Volume" => [
            1e6, 1e6, 1e6, 1e6, 1e6,
            2e6, 2e6, 2e6, 2e6, 2e6,
            5e5, 5e5, 5e5, 5e5,
            10.0, 10.0,
            1.0,
        ],
    )
    .unwrap()
}

#[test]
fn test_ingest_counts_duplicate() {
    let table = PriceTable::from_frame(&sample_frame()).unwrap();
    assert_eq!(table.symbols(), vec!["AAPL", "GOOG", "MSFT", "TINY"]);
    assert_eq!(table.quality().count(QualityIssue::DuplicateRows), 1);
    assert_eq!(table.closes("AAPL").unwrap().last().copied(), Some(104.0));
}

#[rstest]
#[case(MissingReturnPolicy::FillZero, 4, 1, 0)]
#[case(MissingReturnPolicy::DropDates, 3, 0, 1)]
fn test_alignment_policies(
    #[case] policy: MissingReturnPolicy,
    #[case] expected_dates: usize,
    #[case] expected_fills: usize,
    #[case] expected_dropped: usize,
) {
    let table = PriceTable::from_frame(&sample_frame()).unwrap();
    let builder = ReturnsBuilder::new(ReturnsConfig {
        min_coverage: 0.5,
        missing_policy: policy,
    })
    .unwrap();
    let panel = builder.build(&table, MarketSource::EqualWeighted).unwrap();

    let mut quality = DataQualityReport::new();
    let aligned = panel.align(builder.config(), &mut quality).unwrap();

    // TINY has one return out of four dates and falls below coverage
    assert_eq!(aligned.symbols, vec!["AAPL", "GOOG", "MSFT"]);
    assert_eq!(aligned.n_periods(), expected_dates);
    assert_eq!(quality.count(QualityIssue::LowCoverage), 1);
    assert_eq!(quality.symbols(QualityIssue::LowCoverage), vec!["TINY"]);
    assert_eq!(quality.count(QualityIssue::FilledReturns), expected_fills);
    assert_eq!(quality.count(QualityIssue::DroppedDates), expected_dropped);
}

#[test]
fn test_filled_return_is_zero() {
    let table = PriceTable::from_frame(&sample_frame()).unwrap();
    let builder = ReturnsBuilder::new(ReturnsConfig {
        min_coverage: 0.5,
        ..Default::default()
    })
    .unwrap();
    let panel = builder.build(&table, MarketSource::EqualWeighted).unwrap();
    let mut quality = DataQualityReport::new();
    let aligned = panel.align(builder.config(), &mut quality).unwrap();

    // GOOG has no bar on 2024-01-03
    let goog = aligned.index_of("GOOG").unwrap();
    assert_abs_diff_eq!(aligned.returns[[1, goog]], 0.0);
    let aapl = aligned.index_of("AAPL").unwrap();
    assert_abs_diff_eq!(aligned.returns[[0, aapl]], 0.01, epsilon = 1e-12);
}

#[test]
fn test_full_coverage_requirement() {
    let table = PriceTable::from_frame(&sample_frame()).unwrap();
    let builder = ReturnsBuilder::new(ReturnsConfig {
        min_coverage: 1.0,
        ..Default::default()
    })
    .unwrap();
    let panel = builder.build(&table, MarketSource::EqualWeighted).unwrap();
    let mut quality = DataQualityReport::new();
    let aligned = panel.align(builder.config(), &mut quality).unwrap();

    // AAPL and MSFT cover every date even at full coverage
    assert_eq!(aligned.symbols, vec!["AAPL", "MSFT"]);
    assert_eq!(quality.count(QualityIssue::LowCoverage), 2);
}
