use crate::io::raster::{BandSelector, RasterReader, RasterTile};
use crate::types::{GeoTransform, ScoutError, ScoutResult};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Position of each optical role inside a multi-band tile (0-based)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BandLayout {
    pub blue: usize,
    pub green: usize,
    pub red: usize,
    pub red_edge: usize,
    pub nir: usize,
    pub swir1: usize,
    pub swir2: usize,
    /// Multiplier from stored digital numbers to surface reflectance
    pub reflectance_scale: f64,
}

impl Default for BandLayout {
    fn default() -> Self {
        // HLS stacking order B02, B03, B04, B05, B08, B11, B12 with 1e-4 scaling
        Self {
            blue: 0,
            green: 1,
            red: 2,
            red_edge: 3,
            nir: 4,
            swir1: 5,
            swir2: 6,
            reflectance_scale: 1e-4,
        }
    }
}

impl BandLayout {
    /// Number of bands a tile must carry for this layout
    pub fn required_bands(&self) -> usize {
        [
            self.blue,
            self.green,
            self.red,
            self.red_edge,
            self.nir,
            self.swir1,
            self.swir2,
        ]
        .iter()
        .max()
        .map_or(0, |m| m + 1)
    }
}

/// One acquisition of an optical tile
#[derive(Debug, Clone)]
pub struct DatedTile {
    pub date: NaiveDate,
    pub tile: RasterTile,
}

/// Chronologically ordered acquisitions over one extent
#[derive(Debug, Clone)]
pub struct DateSeries {
    tiles: Vec<DatedTile>,
    layout: BandLayout,
}

/// A date that could not be loaded into a series
#[derive(Debug, Clone)]
pub struct SkippedDate {
    pub date: NaiveDate,
    pub reason: String,
}

impl DateSeries {
    /// Sort by date and check that every member shares the grid.
    pub fn new(mut tiles: Vec<DatedTile>, layout: BandLayout) -> ScoutResult<Self> {
        if tiles.is_empty() {
            return Err(ScoutError::DataAccess("Date series has no tiles".to_string()));
        }
        tiles.sort_by_key(|t| t.date);

        if let Some(w) = tiles.windows(2).find(|w| w[0].date == w[1].date) {
            return Err(ScoutError::DataAccess(format!(
                "Duplicate acquisition date {} in series",
                w[0].date
            )));
        }

        let reference = &tiles[0];
        let shape = reference.tile.shape();
        let transform = *reference.tile.transform();
        let required = layout.required_bands();
        for dated in &tiles {
            if dated.tile.shape() != shape {
                return Err(ScoutError::DataAccess(format!(
                    "Tile for {} has shape {:?}, series expects {:?}",
                    dated.date,
                    dated.tile.shape(),
                    shape
                )));
            }
            if !transforms_match(dated.tile.transform(), &transform) {
                return Err(ScoutError::DataAccess(format!(
                    "Tile for {} is not aligned with the series grid",
                    dated.date
                )));
            }
            if dated.tile.band_count() < required {
                return Err(ScoutError::DataAccess(format!(
                    "Tile for {} has {} bands, layout needs {}",
                    dated.date,
                    dated.tile.band_count(),
                    required
                )));
            }
        }

        Ok(Self { tiles, layout })
    }

    /// Load `(date, path)` pairs; unreadable dates are skipped and returned.
    pub fn load(
        entries: &[(NaiveDate, PathBuf)],
        layout: BandLayout,
    ) -> ScoutResult<(Self, Vec<SkippedDate>)> {
        log::info!("Loading optical series with {} acquisitions", entries.len());
        let mut tiles = Vec::with_capacity(entries.len());
        let mut skipped = Vec::new();

        for (date, path) in entries {
            match RasterReader::load(path, &BandSelector::All) {
                Ok(tile) => tiles.push(DatedTile { date: *date, tile }),
                Err(e) => {
                    log::warn!("Skipping acquisition {} ({}): {}", date, path.display(), e);
                    skipped.push(SkippedDate {
                        date: *date,
                        reason: e.to_string(),
                    });
                }
            }
        }

        let series = DateSeries::new(tiles, layout)?;
        Ok((series, skipped))
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn tiles(&self) -> &[DatedTile] {
        &self.tiles
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        self.tiles.iter().map(|t| t.date).collect()
    }

    pub fn layout(&self) -> &BandLayout {
        &self.layout
    }

    pub fn shape(&self) -> (usize, usize) {
        self.tiles[0].tile.shape()
    }

    pub fn transform(&self) -> &GeoTransform {
        self.tiles[0].tile.transform()
    }

    /// Days since the first acquisition for every member
    pub fn day_offsets(&self) -> Vec<f64> {
        let first = self.tiles[0].date;
        self.tiles
            .iter()
            .map(|t| (t.date - first).num_days() as f64)
            .collect()
    }
}

fn transforms_match(a: &GeoTransform, b: &GeoTransform) -> bool {
    // a millionth of a pixel
    let tol = (1e-6 * a.pixel_width.abs().max(a.pixel_height.abs())).max(1e-12);
    a.to_gdal()
        .iter()
        .zip(b.to_gdal().iter())
        .all(|(x, y)| (x - y).abs() <= tol)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn tile(value: f64, transform: GeoTransform) -> RasterTile {
        let bands = (0..7).map(|_| Array2::from_elem((3, 3), value)).collect();
        RasterTile::new(bands, transform, None).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_series_sorted_chronologically() {
        let gt = GeoTransform::north_up(-61.0, -9.0, 0.001, -0.001);
        let series = DateSeries::new(
            vec![
                DatedTile { date: date(2023, 8, 1), tile: tile(1.0, gt) },
                DatedTile { date: date(2023, 6, 1), tile: tile(2.0, gt) },
            ],
            BandLayout::default(),
        )
        .unwrap();
        assert_eq!(series.dates(), vec![date(2023, 6, 1), date(2023, 8, 1)]);
        assert_eq!(series.day_offsets(), vec![0.0, 61.0]);
    }

    #[test]
    fn test_misaligned_series_rejected() {
        let gt = GeoTransform::north_up(-61.0, -9.0, 0.001, -0.001);
        let shifted = GeoTransform::north_up(-60.5, -9.0, 0.001, -0.001);
        let result = DateSeries::new(
            vec![
                DatedTile { date: date(2023, 6, 1), tile: tile(1.0, gt) },
                DatedTile { date: date(2023, 7, 1), tile: tile(1.0, shifted) },
            ],
            BandLayout::default(),
        );
        assert!(matches!(result, Err(ScoutError::DataAccess(_))));
    }

    #[test]
    fn test_duplicate_dates_rejected() {
        let gt = GeoTransform::north_up(-61.0, -9.0, 0.001, -0.001);
        let result = DateSeries::new(
            vec![
                DatedTile { date: date(2023, 6, 1), tile: tile(1.0, gt) },
                DatedTile { date: date(2023, 6, 1), tile: tile(2.0, gt) },
            ],
            BandLayout::default(),
        );
        assert!(result.is_err());
    }
}
