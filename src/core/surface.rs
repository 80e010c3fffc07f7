use crate::io::raster::RasterTile;
use crate::types::{GeoPoint, GeoTransform, ScoutError, ScoutResult};
use ndarray::Array2;

/// Named per-pixel surfaces on one grid, invalid pixels held as NaN
#[derive(Debug, Clone)]
pub struct SurfaceSet {
    names: Vec<String>,
    tile: RasterTile,
}

impl SurfaceSet {
    pub fn new(
        names: Vec<String>,
        layers: Vec<Array2<f64>>,
        transform: GeoTransform,
    ) -> ScoutResult<Self> {
        if names.len() != layers.len() {
            return Err(ScoutError::InvalidParameter(format!(
                "{} surface names for {} layers",
                names.len(),
                layers.len()
            )));
        }
        let tile = RasterTile::new(layers, transform, Some(f64::NAN))?;
        Ok(Self { names, tile })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn get(&self, name: &str) -> Option<&Array2<f64>> {
        let idx = self.names.iter().position(|n| n == name)?;
        self.tile.band(idx)
    }

    pub fn tile(&self) -> &RasterTile {
        &self.tile
    }

    pub fn contains(&self, point: &GeoPoint) -> bool {
        self.tile.contains(point)
    }

    /// Value of every surface at the pixel containing `point`.
    ///
    /// `None` when the point is outside the grid; an inner `None` marks an
    /// invalid pixel for that surface.
    pub fn values_at(&self, point: &GeoPoint) -> Option<Vec<(&str, Option<f64>)>> {
        let (r, c) = self.tile.geo_to_pixel(point)?;
        Some(
            self.names
                .iter()
                .zip(self.tile.bands())
                .map(|(name, layer)| {
                    let v = layer[[r, c]];
                    (name.as_str(), if v.is_finite() { Some(v) } else { None })
                })
                .collect(),
        )
    }

    /// Fraction of pixels valid in every surface
    pub fn valid_fraction(&self) -> f64 {
        let (rows, cols) = self.tile.shape();
        let mut valid = 0usize;
        for r in 0..rows {
            for c in 0..cols {
                if self.tile.bands().iter().all(|b| b[[r, c]].is_finite()) {
                    valid += 1;
                }
            }
        }
        valid as f64 / (rows * cols) as f64
    }
}
