//! Point-wise feature extraction over a set of processed tiles.
//!
//! Every requested point ends in exactly one `PointOutcome`; the
//! accompanying `ExtractionReport` accounts for all of them.

use crate::core::schema::{FeatureSchema, FeatureVector};
use crate::core::surface::SurfaceSet;
use crate::core::temporal::{TemporalExtractor, TemporalParams, TemporalSurfaces};
use crate::core::topographic::{TopographicExtractor, TopographicParams, TopographicSurfaces};
use crate::io::raster::{BandSelector, RasterReader, RasterTile};
use crate::io::series::{BandLayout, DateSeries, SkippedDate};
use crate::types::{BoundingBox, GeoPoint, ScoutError, ScoutResult};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Source files of one spatial tile
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TileInputs {
    pub id: String,
    pub dem_path: PathBuf,
    pub optical: Vec<(NaiveDate, PathBuf)>,
    #[serde(default)]
    pub layout: BandLayout,
}

/// Parameters for per-tile surface extraction
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionParams {
    pub topographic: TopographicParams,
    pub temporal: TemporalParams,
}

/// A tile that produced no surfaces
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedTile {
    pub id: String,
    pub reason: String,
}

/// An acquisition left out of a tile's date series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedAcquisition {
    pub tile: String,
    pub date: NaiveDate,
    pub reason: String,
}

/// Result of extracting features at one point
#[derive(Debug, Clone, PartialEq)]
pub enum PointOutcome {
    Valid(FeatureVector),
    /// Inside coverage, but these features had no valid value
    Invalid { features: Vec<String> },
    OutsideCoverage,
}

/// Topographic and temporal surfaces of one spatial tile
#[derive(Debug, Clone)]
pub struct TileFeatures {
    id: String,
    topographic: TopographicSurfaces,
    temporal: TemporalSurfaces,
    skipped_dates: Vec<SkippedDate>,
}

impl TileFeatures {
    pub fn new(id: impl Into<String>, topographic: TopographicSurfaces, temporal: TemporalSurfaces) -> Self {
        Self {
            id: id.into(),
            topographic,
            temporal,
            skipped_dates: Vec::new(),
        }
    }

    /// Run both extractors over in-memory rasters
    pub fn from_rasters(
        id: impl Into<String>,
        elevation: &RasterTile,
        series: &DateSeries,
        params: &ExtractionParams,
    ) -> ScoutResult<Self> {
        let topographic = TopographicExtractor::new(params.topographic.clone()).extract(elevation)?;
        let temporal = TemporalExtractor::new(params.temporal.clone()).extract(series)?;
        Ok(Self::new(id, topographic, temporal))
    }

    /// Load the tile's rasters and extract its surfaces
    pub fn load(inputs: &TileInputs, params: &ExtractionParams) -> ScoutResult<Self> {
        log::info!("Processing tile {}", inputs.id);
        let elevation = RasterReader::load(&inputs.dem_path, &BandSelector::First)?;
        let (series, skipped) = DateSeries::load(&inputs.optical, inputs.layout.clone())?;
        if !skipped.is_empty() {
            log::warn!(
                "Tile {}: {} of {} acquisitions skipped",
                inputs.id,
                skipped.len(),
                inputs.optical.len()
            );
        }
        let mut tile = Self::from_rasters(inputs.id.clone(), &elevation, &series, params)?;
        tile.skipped_dates = skipped;
        Ok(tile)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn topographic(&self) -> &TopographicSurfaces {
        &self.topographic
    }

    pub fn temporal(&self) -> &TemporalSurfaces {
        &self.temporal
    }

    /// Acquisitions that could not be read when the tile was loaded
    pub fn skipped_dates(&self) -> &[SkippedDate] {
        &self.skipped_dates
    }

    /// Area where both the elevation and the optical grids exist
    pub fn bounds(&self) -> Option<BoundingBox> {
        let a = self.topographic.tile().bounds();
        let b = self.temporal.surfaces().tile().bounds();
        let overlap = BoundingBox::new(
            a.min_lon.max(b.min_lon),
            a.max_lon.min(b.max_lon),
            a.min_lat.max(b.min_lat),
            a.max_lat.min(b.max_lat),
        );
        if overlap.is_valid() && overlap.area() > 0.0 {
            Some(overlap)
        } else {
            None
        }
    }

    pub fn contains(&self, point: &GeoPoint) -> bool {
        self.topographic.contains(point) && self.temporal.surfaces().contains(point)
    }

    /// Feature values at a point, read from the pixel containing it
    pub fn outcome_at(&self, point: &GeoPoint) -> PointOutcome {
        let sets: [&SurfaceSet; 2] = [&self.topographic, self.temporal.surfaces()];
        let mut pairs = Vec::new();
        let mut invalid = Vec::new();
        for set in sets {
            match set.values_at(point) {
                None => return PointOutcome::OutsideCoverage,
                Some(values) => {
                    for (name, value) in values {
                        match value {
                            Some(v) => pairs.push((name.to_string(), v)),
                            None => invalid.push(name.to_string()),
                        }
                    }
                }
            }
        }
        if !invalid.is_empty() {
            return PointOutcome::Invalid { features: invalid };
        }
        match FeatureVector::from_pairs(pairs) {
            Ok(vector) => PointOutcome::Valid(vector),
            Err(_) => PointOutcome::Invalid { features: Vec::new() },
        }
    }
}

/// A valid feature vector and its location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub point: GeoPoint,
    pub vector: FeatureVector,
}

/// Feature vectors sharing one schema
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureTable {
    schema: FeatureSchema,
    rows: Vec<FeatureRow>,
}

impl FeatureTable {
    /// Build a table; every row must match the schema exactly
    pub fn new(schema: FeatureSchema, rows: Vec<FeatureRow>) -> ScoutResult<Self> {
        for row in &rows {
            schema.check(&row.vector)?;
        }
        Ok(Self { schema, rows })
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn rows(&self) -> &[FeatureRow] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<FeatureRow> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// All values of one feature, in row order
    pub fn column(&self, name: &str) -> Option<Vec<f64>> {
        if !self.schema.contains(name) {
            return None;
        }
        self.rows.iter().map(|r| r.vector.get(name)).collect()
    }

    /// Table without the named features; unknown names are an error
    pub fn drop_features(&self, names: &[String]) -> ScoutResult<FeatureTable> {
        if let Some(unknown) = names.iter().find(|n| !self.schema.contains(n)) {
            return Err(ScoutError::InvalidParameter(format!(
                "Cannot drop unknown feature {}",
                unknown
            )));
        }
        log::info!("Dropping features: {}", names.join(", "));
        Ok(FeatureTable {
            schema: self.schema.without(names),
            rows: self
                .rows
                .iter()
                .map(|r| FeatureRow {
                    point: r.point,
                    vector: r.vector.without(names),
                })
                .collect(),
        })
    }
}

/// Accounting of one extraction batch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionReport {
    pub requested: usize,
    pub extracted: usize,
    pub outside_coverage: usize,
    pub invalid: usize,
    /// How many invalid points each feature was responsible for
    pub invalid_by_feature: BTreeMap<String, usize>,
    pub skipped_tiles: Vec<SkippedTile>,
    pub skipped_acquisitions: Vec<SkippedAcquisition>,
}

/// Union of axis-aligned boxes in which features can be extracted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageEnvelope {
    boxes: Vec<BoundingBox>,
}

impl CoverageEnvelope {
    /// Keep only valid boxes with positive area
    pub fn new(boxes: Vec<BoundingBox>) -> Self {
        Self {
            boxes: boxes
                .into_iter()
                .filter(|b| b.is_valid() && b.area() > 0.0)
                .collect(),
        }
    }

    pub fn boxes(&self) -> &[BoundingBox] {
        &self.boxes
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    pub fn contains(&self, point: &GeoPoint) -> bool {
        self.boxes.iter().any(|b| b.contains(point))
    }

    /// Sum of box areas in square degrees (overlaps counted twice)
    pub fn area(&self) -> f64 {
        self.boxes.iter().map(|b| b.area()).sum()
    }
}

/// Processed tiles that answer feature queries for arbitrary points
#[derive(Debug, Clone)]
pub struct FeatureTableBuilder {
    tiles: Vec<Arc<TileFeatures>>,
    schema: FeatureSchema,
    skipped_tiles: Vec<SkippedTile>,
}

impl FeatureTableBuilder {
    pub fn from_tiles(tiles: Vec<TileFeatures>) -> Self {
        Self {
            tiles: tiles.into_iter().map(Arc::new).collect(),
            schema: FeatureSchema::standard(),
            skipped_tiles: Vec::new(),
        }
    }

    /// Load and process every tile; tiles with unreadable inputs are skipped.
    pub fn from_inputs(inputs: &[TileInputs], params: &ExtractionParams) -> ScoutResult<Self> {
        log::info!("Building features for {} tiles", inputs.len());

        #[cfg(feature = "parallel")]
        let results: Vec<(String, ScoutResult<TileFeatures>)> = inputs
            .par_iter()
            .map(|i| (i.id.clone(), TileFeatures::load(i, params)))
            .collect();

        #[cfg(not(feature = "parallel"))]
        let results: Vec<(String, ScoutResult<TileFeatures>)> = inputs
            .iter()
            .map(|i| (i.id.clone(), TileFeatures::load(i, params)))
            .collect();

        let mut tiles = Vec::new();
        let mut skipped_tiles = Vec::new();
        for (id, result) in results {
            match result {
                Ok(tile) => tiles.push(Arc::new(tile)),
                Err(ScoutError::DataAccess(reason)) => {
                    log::warn!("Skipping tile {}: {}", id, reason);
                    skipped_tiles.push(SkippedTile { id, reason });
                }
                Err(e) => return Err(e),
            }
        }

        if tiles.is_empty() {
            return Err(ScoutError::Coverage(format!(
                "None of the {} tiles could be processed",
                inputs.len()
            )));
        }
        log::info!(
            "Feature builder ready: {} tiles, {} skipped",
            tiles.len(),
            skipped_tiles.len()
        );

        Ok(Self {
            tiles,
            schema: FeatureSchema::standard(),
            skipped_tiles,
        })
    }

    pub fn tiles(&self) -> &[Arc<TileFeatures>] {
        &self.tiles
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn skipped_tiles(&self) -> &[SkippedTile] {
        &self.skipped_tiles
    }

    /// Unreadable acquisitions of the tiles that were processed
    pub fn skipped_acquisitions(&self) -> Vec<SkippedAcquisition> {
        self.tiles
            .iter()
            .flat_map(|t| {
                t.skipped_dates().iter().map(move |d| SkippedAcquisition {
                    tile: t.id().to_string(),
                    date: d.date,
                    reason: d.reason.clone(),
                })
            })
            .collect()
    }

    pub fn coverage_envelope(&self) -> CoverageEnvelope {
        CoverageEnvelope::new(self.tiles.iter().filter_map(|t| t.bounds()).collect())
    }

    /// Outcome at a point: the first valid tile wins, else the first invalid one
    pub fn outcome_at(&self, point: &GeoPoint) -> PointOutcome {
        let mut first_invalid = None;
        for tile in &self.tiles {
            match tile.outcome_at(point) {
                PointOutcome::Valid(v) => return PointOutcome::Valid(v),
                PointOutcome::Invalid { features } => {
                    if first_invalid.is_none() {
                        first_invalid = Some(features);
                    }
                }
                PointOutcome::OutsideCoverage => {}
            }
        }
        match first_invalid {
            Some(features) => PointOutcome::Invalid { features },
            None => PointOutcome::OutsideCoverage,
        }
    }

    /// Outcomes for many points, in input order
    pub fn outcomes(&self, points: &[GeoPoint]) -> Vec<PointOutcome> {
        #[cfg(feature = "parallel")]
        let outcomes = points.par_iter().map(|p| self.outcome_at(p)).collect();

        #[cfg(not(feature = "parallel"))]
        let outcomes = points.iter().map(|p| self.outcome_at(p)).collect();

        outcomes
    }

    /// One feature vector per covered, valid point plus the full accounting
    pub fn extract(&self, points: &[GeoPoint]) -> ScoutResult<(FeatureTable, ExtractionReport)> {
        log::info!("Extracting features at {} points", points.len());
        let mut report = ExtractionReport {
            requested: points.len(),
            skipped_tiles: self.skipped_tiles.clone(),
            skipped_acquisitions: self.skipped_acquisitions(),
            ..Default::default()
        };

        let mut rows = Vec::new();
        for (point, outcome) in points.iter().zip(self.outcomes(points)) {
            match outcome {
                PointOutcome::Valid(vector) => rows.push(FeatureRow {
                    point: *point,
                    vector,
                }),
                PointOutcome::Invalid { features } => {
                    report.invalid += 1;
                    for f in features {
                        *report.invalid_by_feature.entry(f).or_insert(0) += 1;
                    }
                }
                PointOutcome::OutsideCoverage => report.outside_coverage += 1,
            }
        }
        report.extracted = rows.len();

        if report.outside_coverage > 0 || report.invalid > 0 {
            log::warn!(
                "Feature extraction dropped {} points outside coverage and {} invalid points",
                report.outside_coverage,
                report.invalid
            );
        }
        log::info!("Extracted {} of {} feature vectors", report.extracted, report.requested);

        let table = FeatureTable::new(self.schema.clone(), rows)?;
        Ok((table, report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_drops_degenerate_boxes() {
        let env = CoverageEnvelope::new(vec![
            BoundingBox::new(-61.0, -60.0, -10.0, -9.0),
            BoundingBox::new(-60.0, -60.0, -10.0, -9.0),
        ]);
        assert_eq!(env.boxes().len(), 1);
        assert!(env.contains(&GeoPoint::new(-9.5, -60.5)));
        assert!(!env.contains(&GeoPoint::new(-9.5, -59.5)));
    }

    #[test]
    fn test_drop_features_rejects_unknown_names() {
        let schema = FeatureSchema::new(vec!["a".into(), "b".into()]).unwrap();
        let row = FeatureRow {
            point: GeoPoint::new(0.0, 0.0),
            vector: FeatureVector::from_pairs(vec![("a", 1.0), ("b", 2.0)]).unwrap(),
        };
        let table = FeatureTable::new(schema, vec![row]).unwrap();
        assert!(table.drop_features(&["c".to_string()]).is_err());

        let dropped = table.drop_features(&["a".to_string()]).unwrap();
        assert_eq!(dropped.schema().names(), &["b".to_string()]);
        assert_eq!(dropped.column("b"), Some(vec![2.0]));
        assert_eq!(dropped.column("a"), None);
    }

    #[test]
    fn test_table_rejects_mismatched_rows() {
        let schema = FeatureSchema::new(vec!["a".into()]).unwrap();
        let row = FeatureRow {
            point: GeoPoint::new(0.0, 0.0),
            vector: FeatureVector::from_pairs(vec![("b", 1.0)]).unwrap(),
        };
        assert!(matches!(
            FeatureTable::new(schema, vec![row]),
            Err(ScoutError::SchemaMismatch { .. })
        ));
    }
}
