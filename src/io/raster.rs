use crate::types::{BoundingBox, GeoPoint, GeoTransform, ScoutError, ScoutResult};
use gdal::Dataset;
use ndarray::Array2;
use std::path::Path;

/// Which GDAL bands (1-based) to read from a dataset
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BandSelector {
    First,
    Index(usize),
    Indices(Vec<usize>),
    All,
}

/// Result of a point lookup on a raster band
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sample {
    Value(f64),
    NoData,
    OutsideTile,
}

impl Sample {
    pub fn value(&self) -> Option<f64> {
        match self {
            Sample::Value(v) => Some(*v),
            _ => None,
        }
    }
}

/// A georeferenced block of one or more co-registered bands.
///
/// Bands share the shape and the transform. NaN and the nodata marker are both
/// treated as invalid; nothing in the crate rewrites them to zero.
#[derive(Debug, Clone)]
pub struct RasterTile {
    bands: Vec<Array2<f64>>,
    transform: GeoTransform,
    nodata: Option<f64>,
}

impl RasterTile {
    pub fn new(
        bands: Vec<Array2<f64>>,
        transform: GeoTransform,
        nodata: Option<f64>,
    ) -> ScoutResult<Self> {
        let shape = match bands.first() {
            Some(band) => band.dim(),
            None => return Err(ScoutError::DataAccess("Raster tile has no bands".to_string())),
        };
        if shape.0 == 0 || shape.1 == 0 {
            return Err(ScoutError::DataAccess(format!(
                "Raster tile has empty shape {}x{}",
                shape.0, shape.1
            )));
        }
        if let Some(i) = bands.iter().position(|b| b.dim() != shape) {
            return Err(ScoutError::DataAccess(format!(
                "Band {} shape {:?} differs from band 0 shape {:?}",
                i,
                bands[i].dim(),
                shape
            )));
        }
        if !transform.is_invertible() {
            return Err(ScoutError::DataAccess(format!(
                "Geotransform is not invertible: {:?}",
                transform.to_gdal()
            )));
        }

        Ok(Self { bands, transform, nodata })
    }

    /// Single-band tile, the common case for elevation and derived surfaces
    pub fn single_band(
        band: Array2<f64>,
        transform: GeoTransform,
        nodata: Option<f64>,
    ) -> ScoutResult<Self> {
        Self::new(vec![band], transform, nodata)
    }

    pub fn band(&self, index: usize) -> Option<&Array2<f64>> {
        self.bands.get(index)
    }

    pub fn bands(&self) -> &[Array2<f64>] {
        &self.bands
    }

    pub fn band_count(&self) -> usize {
        self.bands.len()
    }

    /// (rows, cols)
    pub fn shape(&self) -> (usize, usize) {
        self.bands[0].dim()
    }

    pub fn transform(&self) -> &GeoTransform {
        &self.transform
    }

    pub fn nodata(&self) -> Option<f64> {
        self.nodata
    }

    pub fn is_nodata(&self, value: f64) -> bool {
        is_nodata_value(value, self.nodata)
    }

    /// Per-pixel validity of one band
    pub fn valid_mask(&self, band: usize) -> Option<Array2<bool>> {
        let data = self.bands.get(band)?;
        Some(data.mapv(|v| !self.is_nodata(v)))
    }

    /// Copy of one band with every invalid pixel set to NaN
    pub fn band_as_nan(&self, band: usize) -> Option<Array2<f64>> {
        let data = self.bands.get(band)?;
        Some(data.mapv(|v| if self.is_nodata(v) { f64::NAN } else { v }))
    }

    /// Geographic position of a pixel centre
    pub fn pixel_to_geo(&self, row: usize, col: usize) -> GeoPoint {
        let (x, y) = self.transform.apply(row as f64 + 0.5, col as f64 + 0.5);
        GeoPoint::new(y, x)
    }

    /// Pixel containing a point, `None` outside the tile
    pub fn geo_to_pixel(&self, point: &GeoPoint) -> Option<(usize, usize)> {
        let (row, col) = self.transform.invert(point.lon, point.lat)?;
        let (rows, cols) = self.shape();
        if !row.is_finite() || !col.is_finite() || row < 0.0 || col < 0.0 {
            return None;
        }
        let (r, c) = (row.floor() as usize, col.floor() as usize);
        if r >= rows || c >= cols {
            return None;
        }
        Some((r, c))
    }

    pub fn bounds(&self) -> BoundingBox {
        let (rows, cols) = self.shape();
        let corners = [
            self.transform.apply(0.0, 0.0),
            self.transform.apply(0.0, cols as f64),
            self.transform.apply(rows as f64, 0.0),
            self.transform.apply(rows as f64, cols as f64),
        ];
        let mut bbox = BoundingBox::new(corners[0].0, corners[0].0, corners[0].1, corners[0].1);
        for (x, y) in &corners[1..] {
            bbox.min_lon = bbox.min_lon.min(*x);
            bbox.max_lon = bbox.max_lon.max(*x);
            bbox.min_lat = bbox.min_lat.min(*y);
            bbox.max_lat = bbox.max_lat.max(*y);
        }
        bbox
    }

    pub fn contains(&self, point: &GeoPoint) -> bool {
        self.geo_to_pixel(point).is_some()
    }

    /// Exact-pixel lookup; invalid pixels and points outside the tile give `None`
    pub fn value_at(&self, point: &GeoPoint, band: usize) -> Option<f64> {
        let data = self.bands.get(band)?;
        let (r, c) = self.geo_to_pixel(point)?;
        let v = data[[r, c]];
        if self.is_nodata(v) {
            None
        } else {
            Some(v)
        }
    }

    /// Nearest-valid-pixel lookup.
    ///
    /// Returns the containing pixel when valid, otherwise the closest valid
    /// pixel of the surrounding 3x3 ring (distance measured from the point's
    /// fractional position), otherwise `NoData`.
    pub fn sample_at(&self, point: &GeoPoint, band: usize) -> Sample {
        let data = match self.bands.get(band) {
            Some(d) => d,
            None => return Sample::OutsideTile,
        };
        let (row_f, col_f) = match self.transform.invert(point.lon, point.lat) {
            Some(rc) => rc,
            None => return Sample::OutsideTile,
        };
        let (r, c) = match self.geo_to_pixel(point) {
            Some(rc) => rc,
            None => return Sample::OutsideTile,
        };

        let v = data[[r, c]];
        if !self.is_nodata(v) {
            return Sample::Value(v);
        }

        let (rows, cols) = self.shape();
        let mut best: Option<(f64, f64)> = None;
        for dr in -1isize..=1 {
            for dc in -1isize..=1 {
                if dr == 0 && dc == 0 {
                    continue;
                }
                let nr = r as isize + dr;
                let nc = c as isize + dc;
                if nr < 0 || nc < 0 || nr >= rows as isize || nc >= cols as isize {
                    continue;
                }
                let nv = data[[nr as usize, nc as usize]];
                if self.is_nodata(nv) {
                    continue;
                }
                let dist = (nr as f64 + 0.5 - row_f).powi(2) + (nc as f64 + 0.5 - col_f).powi(2);
                if best.map_or(true, |(d, _)| dist < d) {
                    best = Some((dist, nv));
                }
            }
        }

        match best {
            Some((_, value)) => Sample::Value(value),
            None => Sample::NoData,
        }
    }

    /// Tile on the same grid holding different bands (derived surfaces)
    pub fn derive(&self, bands: Vec<Array2<f64>>) -> ScoutResult<RasterTile> {
        RasterTile::new(bands, self.transform, Some(f64::NAN))
    }
}

/// NaN is always invalid; otherwise compare against the marker
pub(crate) fn is_nodata_value(value: f64, nodata: Option<f64>) -> bool {
    if value.is_nan() {
        return true;
    }
    match nodata {
        Some(nd) if nd.is_nan() => false,
        Some(nd) => (value - nd).abs() < f64::EPSILON * nd.abs().max(1.0),
        None => false,
    }
}

/// GDAL-backed raster reader
pub struct RasterReader;

impl RasterReader {
    /// Load selected bands of a georeferenced raster.
    ///
    /// Any failure to open, decode or georeference the file is reported as
    /// `DataAccess` with the path attached, so batch callers can skip the tile.
    pub fn load<P: AsRef<Path>>(path: P, selector: &BandSelector) -> ScoutResult<RasterTile> {
        let path = path.as_ref();
        log::info!("Reading raster from: {}", path.display());

        let access = |what: &str, e: &dyn std::fmt::Display| {
            ScoutError::DataAccess(format!("{} ({}): {}", what, path.display(), e))
        };

        if !path.exists() {
            return Err(ScoutError::DataAccess(format!(
                "Raster file does not exist: {}",
                path.display()
            )));
        }

        let dataset = Dataset::open(path).map_err(|e| access("Failed to open raster", &e))?;
        let geo_transform = dataset
            .geo_transform()
            .map_err(|e| access("Missing geotransform", &e))?;
        let transform = GeoTransform::from_gdal(geo_transform);
        if !transform.is_invertible() {
            return Err(ScoutError::DataAccess(format!(
                "Geotransform of {} is not invertible: {:?}",
                path.display(),
                geo_transform
            )));
        }

        let (width, height) = dataset.raster_size();
        let band_count = dataset.raster_count().max(0) as usize;
        log::debug!("Raster size: {}x{}, {} band(s)", width, height, band_count);
        log::debug!("Raster geotransform: {:?}", geo_transform);

        let indices: Vec<usize> = match selector {
            BandSelector::First => vec![1],
            BandSelector::Index(i) => vec![*i],
            BandSelector::Indices(list) => list.clone(),
            BandSelector::All => (1..=band_count).collect(),
        };
        if indices.is_empty() {
            return Err(ScoutError::DataAccess(format!(
                "No bands selected from {}",
                path.display()
            )));
        }

        let mut bands = Vec::with_capacity(indices.len());
        let mut nodata = None;
        for index in indices {
            if index == 0 || index > band_count {
                return Err(ScoutError::DataAccess(format!(
                    "Band {} out of range (1..={}) in {}",
                    index,
                    band_count,
                    path.display()
                )));
            }
            let rasterband = dataset
                .rasterband(index as isize)
                .map_err(|e| access("Failed to open band", &e))?;
            if nodata.is_none() {
                nodata = rasterband.no_data_value();
            }
            let buffer = rasterband
                .read_as::<f64>((0, 0), (width, height), (width, height), None)
                .map_err(|e| access("Failed to read band", &e))?;
            let array = Array2::from_shape_vec((height, width), buffer.data)
                .map_err(|e| access("Failed to reshape band", &e))?;
            bands.push(array);
        }

        RasterTile::new(bands, transform, nodata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tile_with_hole() -> RasterTile {
        let mut data = Array2::from_elem((4, 4), 10.0);
        data[[1, 1]] = -9999.0;
        let gt = GeoTransform::north_up(-61.0, -9.0, 0.01, -0.01);
        RasterTile::single_band(data, gt, Some(-9999.0)).unwrap()
    }

    #[test]
    fn test_pixel_geo_roundtrip() {
        let tile = tile_with_hole();
        let p = tile.pixel_to_geo(2, 3);
        assert_eq!(tile.geo_to_pixel(&p), Some((2, 3)));
    }

    #[test]
    fn test_sample_nearest_valid() {
        let tile = tile_with_hole();
        let hole = tile.pixel_to_geo(1, 1);
        assert_eq!(tile.value_at(&hole, 0), None);
        assert_eq!(tile.sample_at(&hole, 0), Sample::Value(10.0));
    }

    #[test]
    fn test_sample_nodata_propagates() {
        let data = Array2::from_elem((3, 3), -9999.0);
        let gt = GeoTransform::north_up(0.0, 0.0, 1.0, -1.0);
        let tile = RasterTile::single_band(data, gt, Some(-9999.0)).unwrap();
        assert_eq!(tile.sample_at(&tile.pixel_to_geo(1, 1), 0), Sample::NoData);
        assert_eq!(tile.sample_at(&GeoPoint::new(5.0, 5.0), 0), Sample::OutsideTile);
    }

    #[test]
    fn test_singular_transform_rejected() {
        let gt = GeoTransform::north_up(0.0, 0.0, 0.0, 0.0);
        let result = RasterTile::single_band(Array2::zeros((2, 2)), gt, None);
        assert!(matches!(result, Err(ScoutError::DataAccess(_))));
    }

    #[test]
    fn test_bounds() {
        let tile = tile_with_hole();
        let b = tile.bounds();
        assert!((b.min_lon + 61.0).abs() < 1e-12);
        assert!((b.max_lon + 60.96).abs() < 1e-12);
        assert!((b.max_lat + 9.0).abs() < 1e-12);
        assert!((b.min_lat + 9.04).abs() < 1e-12);
    }
}
