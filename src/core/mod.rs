//! Core feature extraction, sampling, training and scanning modules

pub mod schema;
pub mod surface;
mod window;
pub mod topographic;
pub mod spectral;
pub mod temporal;
pub mod features;
pub mod quality;
pub mod sampling;
pub mod validation;
pub mod classifier;
pub mod hotspot;

// Re-export main types
pub use schema::{FeatureSchema, FeatureVector, SPECTRAL_FEATURES, TEMPORAL_FEATURES, TOPOGRAPHIC_FEATURES};
pub use surface::SurfaceSet;
pub use topographic::{TopographicExtractor, TopographicParams, TopographicSurfaces, TPI_RADII};
pub use spectral::{Reflectance, SpectralIndex};
pub use temporal::{IndexStatistics, TemporalExtractor, TemporalParams, TemporalSurfaces};
pub use features::{
    CoverageEnvelope, ExtractionParams, ExtractionReport, FeatureRow, FeatureTable,
    FeatureTableBuilder, PointOutcome, SkippedAcquisition, SkippedTile, TileFeatures, TileInputs,
};
pub use quality::{CorrelatedPair, QualityGate, QualityParams, QualityReport};
pub use sampling::{
    AssemblyReport, Label, LabeledSample, PlannedPoint, Provenance, SampleAssembler, SamplePlan,
    SamplingParams, SamplingReport, TrainingTable,
};
pub use classifier::{
    score, score_batch, BoostedEnsemble, BoostingParams, ClassifierTrainer, CrossValidationParams,
    FeatureImportance, FoldCounts, TrainedModel, ValidationMetrics,
};
pub use hotspot::{write_candidates_csv, CandidateSite, HotspotScanner, ScanParams, ScanReport, ScanResult};
