#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/keel/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod dataset;
pub mod export;
pub mod records;
pub mod summary;

pub use dataset::{StationaryDataset, StationaryPoint};
pub use export::{ExportError, ExportFormat, Exporter, write_table};
pub use records::{
    CapmRecord, PerformanceRecord, PositionRecord, QualityRecord, SectorRecord,
    StationarityRecord, WeightRecord, records,
};
pub use summary::{
    CapmSummary, OptimizationSummary, RunSummary, SizingSummary, StationaritySummary,
};
