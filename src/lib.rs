//! geoglyph-scout: feature engineering and candidate-site scoring for
//! archaeological earthwork prospection.
//!
//! The library turns elevation tiles and multi-date optical imagery into
//! per-location feature vectors, assembles labeled training tables around
//! known sites, trains a gradient-boosted classifier with stratified
//! cross-validation, and scans regions for high-probability candidates.

pub mod types;
pub mod config;
pub mod io;
pub mod core;

#[cfg(feature = "python")]
mod python;

// Re-export main types and functions for easier access
pub use types::{BoundingBox, GeoPoint, GeoTransform, ScoutError, ScoutResult};

pub use config::DiscoveryConfig;

pub use io::{BandLayout, BandSelector, DateSeries, RasterReader, RasterTile, Sample, SiteReader, TileCatalog};

pub use crate::core::{
    score, score_batch, write_candidates_csv, CandidateSite, ClassifierTrainer, CoverageEnvelope,
    ExtractionParams, FeatureSchema, FeatureTable, FeatureTableBuilder, FeatureVector,
    HotspotScanner, LabeledSample, QualityGate, SampleAssembler, TemporalExtractor, TileFeatures,
    TileInputs, TopographicExtractor, TrainedModel, TrainingTable,
};
