use crate::core::schema::TOPOGRAPHIC_FEATURES;
use crate::core::surface::SurfaceSet;
use crate::core::window::{clean_windows, fill_rows, gaussian_kernel, SummedArea};
use crate::io::raster::RasterTile;
use crate::types::{GeoTransform, ScoutError, ScoutResult};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Neighbourhood radii (pixels) of the multi-scale topographic position index
pub const TPI_RADII: [usize; 3] = [3, 7, 15];

/// The nine named topographic surfaces of one elevation tile
pub type TopographicSurfaces = SurfaceSet;

/// Aspect assigned to flat pixels, where no downslope direction exists
pub const FLAT_ASPECT: f64 = -1.0;

/// Parameters for topographic feature computation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopographicParams {
    /// Gaussian sigma (pixels) of the background surface removed by the anomaly
    pub anomaly_sigma: f64,
    /// Ground spacing (x, y) in meters; derived from the transform when unset
    pub ground_spacing_m: Option<(f64, f64)>,
    /// Gradient magnitude (m/m) below which a pixel counts as flat
    pub flat_gradient: f64,
}

impl Default for TopographicParams {
    fn default() -> Self {
        Self {
            anomaly_sigma: 15.0,
            ground_spacing_m: None,
            flat_gradient: 1e-8,
        }
    }
}

/// Topographic feature processor
pub struct TopographicExtractor {
    params: TopographicParams,
}

impl TopographicExtractor {
    pub fn new(params: TopographicParams) -> Self {
        Self { params }
    }

    /// Create a processor with default parameters
    pub fn standard() -> Self {
        Self::new(TopographicParams::default())
    }

    /// Compute all nine topographic surfaces of an elevation tile (band 0).
    ///
    /// Every surface is NaN wherever its neighbourhood reaches the tile edge or
    /// an invalid elevation pixel.
    pub fn extract(&self, elevation: &RasterTile) -> ScoutResult<TopographicSurfaces> {
        log::info!("Starting topographic feature extraction");
        let dem = elevation
            .band_as_nan(0)
            .ok_or_else(|| ScoutError::DataAccess("Elevation tile has no band".to_string()))?;
        let transform = *elevation.transform();
        let spacing = self.ground_spacing(elevation)?;
        log::debug!("DEM shape {:?}, ground spacing {:?} m", dem.dim(), spacing);

        log::debug!("Computing slope and aspect");
        let (slope, aspect) = self.compute_slope_aspect(&dem, spacing, &transform)?;

        log::debug!("Computing Gaussian anomaly (sigma {})", self.params.anomaly_sigma);
        let anomaly = self.compute_anomaly(&dem)?;

        let mut tpi = Vec::with_capacity(TPI_RADII.len());
        for radius in TPI_RADII {
            log::debug!("Computing TPI at radius {}", radius);
            tpi.push(self.compute_tpi(&dem, radius)?);
        }

        log::debug!("Computing profile and plan curvature");
        let (profile, plan) = self.compute_curvatures(&dem, spacing, &transform)?;

        let mut layers = vec![dem, slope, aspect, anomaly];
        layers.extend(tpi);
        layers.push(profile);
        layers.push(plan);

        let names = TOPOGRAPHIC_FEATURES.iter().map(|s| s.to_string()).collect();
        let surfaces = SurfaceSet::new(names, layers, transform)?;
        log::info!(
            "Topographic extraction completed ({:.1}% pixels fully valid)",
            surfaces.valid_fraction() * 100.0
        );
        Ok(surfaces)
    }

    /// Ground spacing in meters, from the parameters or the tile's centre latitude
    fn ground_spacing(&self, tile: &RasterTile) -> ScoutResult<(f64, f64)> {
        let (dx, dy) = match self.params.ground_spacing_m {
            Some(spacing) => spacing,
            None => {
                let b = tile.bounds();
                tile.transform().ground_spacing_m((b.min_lat + b.max_lat) / 2.0)
            }
        };
        if !(dx > 0.0 && dy > 0.0 && dx.is_finite() && dy.is_finite()) {
            return Err(ScoutError::InvalidParameter(format!(
                "Ground spacing must be positive, got ({}, {})",
                dx, dy
            )));
        }
        Ok((dx, dy))
    }

    /// Compute slope and aspect from DEM (Horn 3x3 differences)
    ///
    /// Returns (slope_degrees, aspect_degrees). Aspect is the downslope
    /// direction measured clockwise from north in [0, 360); flat pixels get
    /// `FLAT_ASPECT`.
    pub fn compute_slope_aspect(
        &self,
        dem: &Array2<f64>,
        spacing: (f64, f64),
        transform: &GeoTransform,
    ) -> ScoutResult<(Array2<f64>, Array2<f64>)> {
        let (rows, cols) = dem.dim();
        let clean = clean_windows(&dem.mapv(f64::is_finite), 1);
        let (dx, dy) = spacing;
        // rows run southward on north-up grids
        let south_sign = if transform.pixel_height < 0.0 { 1.0 } else { -1.0 };
        let flat = self.params.flat_gradient;

        let gradient = |i: usize, j: usize| -> (f64, f64) {
            let a = dem[[i - 1, j - 1]];
            let b = dem[[i - 1, j]];
            let c = dem[[i - 1, j + 1]];
            let d = dem[[i, j - 1]];
            let f = dem[[i, j + 1]];
            let g = dem[[i + 1, j - 1]];
            let h = dem[[i + 1, j]];
            let k = dem[[i + 1, j + 1]];
            let dz_dx = ((c + 2.0 * f + k) - (a + 2.0 * d + g)) / (8.0 * dx);
            let dz_dsouth = south_sign * ((g + 2.0 * h + k) - (a + 2.0 * b + c)) / (8.0 * dy);
            (dz_dx, dz_dsouth)
        };

        let slope = fill_rows(rows, cols, |i, out| {
            for j in 0..cols {
                if clean[[i, j]] {
                    let (gx, gy) = gradient(i, j);
                    out[j] = gx.hypot(gy).atan().to_degrees();
                }
            }
        })?;

        let aspect = fill_rows(rows, cols, |i, out| {
            for j in 0..cols {
                if clean[[i, j]] {
                    let (gx, gy) = gradient(i, j);
                    out[j] = if gx.hypot(gy) < flat {
                        FLAT_ASPECT
                    } else {
                        // downslope: east component -gx, north component +gy
                        let bearing = (-gx).atan2(gy).to_degrees();
                        if bearing < 0.0 {
                            bearing + 360.0
                        } else if bearing >= 360.0 {
                            bearing - 360.0
                        } else {
                            bearing
                        }
                    };
                }
            }
        })?;

        Ok((slope, aspect))
    }

    /// Topographic position index: elevation minus the mean of the
    /// `(2r+1)^2` neighbourhood excluding the centre.
    pub fn compute_tpi(&self, dem: &Array2<f64>, radius: usize) -> ScoutResult<Array2<f64>> {
        if radius == 0 {
            return Err(ScoutError::InvalidParameter("TPI radius must be at least 1".to_string()));
        }
        let (rows, cols) = dem.dim();
        let valid = dem.mapv(f64::is_finite);
        let clean = clean_windows(&valid, radius);

        // centring keeps the summed-area table small in magnitude
        let reference = finite_mean(dem).unwrap_or(0.0);
        let centred = dem.mapv(|v| if v.is_finite() { v - reference } else { 0.0 });
        let table = SummedArea::new(&centred);
        let neighbours = ((2 * radius + 1) * (2 * radius + 1) - 1) as f64;

        fill_rows(rows, cols, |i, out| {
            for j in 0..cols {
                if !clean[[i, j]] {
                    continue;
                }
                if let Some(total) = table.centred_sum(i, j, radius) {
                    let z = centred[[i, j]];
                    out[j] = z - (total - z) / neighbours;
                }
            }
        })
    }

    /// Profile and plan curvature (Zevenbergen & Thorne second-order surface)
    pub fn compute_curvatures(
        &self,
        dem: &Array2<f64>,
        spacing: (f64, f64),
        transform: &GeoTransform,
    ) -> ScoutResult<(Array2<f64>, Array2<f64>)> {
        let (rows, cols) = dem.dim();
        let clean = clean_windows(&dem.mapv(f64::is_finite), 1);
        let (dx, dy) = spacing;
        let north_sign = if transform.pixel_height < 0.0 { 1.0 } else { -1.0 };

        // (p, q, r, s, t) with x east and y north
        let coefficients = |i: usize, j: usize| -> (f64, f64, f64, f64, f64) {
            let z1 = dem[[i - 1, j - 1]];
            let z2 = dem[[i - 1, j]];
            let z3 = dem[[i - 1, j + 1]];
            let z4 = dem[[i, j - 1]];
            let z5 = dem[[i, j]];
            let z6 = dem[[i, j + 1]];
            let z7 = dem[[i + 1, j - 1]];
            let z8 = dem[[i + 1, j]];
            let z9 = dem[[i + 1, j + 1]];
            let p = (z6 - z4) / (2.0 * dx);
            let q = north_sign * (z2 - z8) / (2.0 * dy);
            let r = (z4 - 2.0 * z5 + z6) / (dx * dx);
            let s = north_sign * (z3 - z1 - z9 + z7) / (4.0 * dx * dy);
            let t = (z2 - 2.0 * z5 + z8) / (dy * dy);
            (p, q, r, s, t)
        };

        let profile = fill_rows(rows, cols, |i, out| {
            for j in 0..cols {
                if clean[[i, j]] {
                    let (p, q, r, s, t) = coefficients(i, j);
                    let p2q2 = p * p + q * q;
                    out[j] = if p2q2 < 1e-20 {
                        0.0
                    } else {
                        -(r * p * p + 2.0 * s * p * q + t * q * q) / p2q2
                    };
                }
            }
        })?;

        let plan = fill_rows(rows, cols, |i, out| {
            for j in 0..cols {
                if clean[[i, j]] {
                    let (p, q, r, s, t) = coefficients(i, j);
                    let p2q2 = p * p + q * q;
                    out[j] = if p2q2 < 1e-20 {
                        0.0
                    } else {
                        -(r * q * q - 2.0 * s * p * q + t * p * p) / p2q2
                    };
                }
            }
        })?;

        Ok((profile, plan))
    }

    /// Elevation minus its Gaussian-blurred background (separable, truncated at 3 sigma)
    pub fn compute_anomaly(&self, dem: &Array2<f64>) -> ScoutResult<Array2<f64>> {
        let sigma = self.params.anomaly_sigma;
        if !(sigma > 0.0 && sigma.is_finite()) {
            return Err(ScoutError::InvalidParameter(format!(
                "Anomaly sigma must be positive, got {}",
                sigma
            )));
        }
        let (rows, cols) = dem.dim();
        let kernel = gaussian_kernel(sigma);
        let half = kernel.len() / 2;
        let clean = clean_windows(&dem.mapv(f64::is_finite), half);
        if !clean.iter().any(|&c| c) {
            log::warn!(
                "Tile {}x{} too small for anomaly radius {}; surface fully invalid",
                rows,
                cols,
                half
            );
        }

        // Row pass where the horizontal window fits; NaN inputs only reach
        // pixels that `clean` masks out afterwards.
        let row_pass = fill_rows(rows, cols, |i, out| {
            if cols < 2 * half + 1 {
                return;
            }
            for j in half..cols - half {
                out[j] = kernel
                    .iter()
                    .enumerate()
                    .map(|(k, w)| w * dem[[i, j + k - half]])
                    .sum();
            }
        })?;

        fill_rows(rows, cols, |i, out| {
            for j in 0..cols {
                if !clean[[i, j]] {
                    continue;
                }
                let blurred: f64 = kernel
                    .iter()
                    .enumerate()
                    .map(|(k, w)| w * row_pass[[i + k - half, j]])
                    .sum();
                out[j] = dem[[i, j]] - blurred;
            }
        })
    }
}

fn finite_mean(values: &Array2<f64>) -> Option<f64> {
    let (sum, n) = values
        .iter()
        .filter(|v| v.is_finite())
        .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        None
    } else {
        Some(sum / n as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn north_up() -> GeoTransform {
        GeoTransform::north_up(0.0, 0.0, 1.0, -1.0)
    }

    #[test]
    fn test_slope_aspect_computation() {
        let extractor = TopographicExtractor::standard();

        // Elevation rising eastward: downslope faces west
        let dem = Array2::from_shape_fn((5, 5), |(_, j)| j as f64 * 10.0);
        let (slope, aspect) = extractor
            .compute_slope_aspect(&dem, (10.0, 10.0), &north_up())
            .unwrap();

        assert!((slope[[2, 2]] - 45.0).abs() < 1e-9);
        assert!((aspect[[2, 2]] - 270.0).abs() < 1e-9);
        assert!(slope[[0, 2]].is_nan());
        assert!(aspect[[2, 4]].is_nan());
    }

    #[test]
    fn test_aspect_north_facing() {
        let extractor = TopographicExtractor::standard();
        // Elevation rising southward (with row index): downslope faces north
        let dem = Array2::from_shape_fn((5, 5), |(i, _)| i as f64);
        let (_, aspect) = extractor
            .compute_slope_aspect(&dem, (1.0, 1.0), &north_up())
            .unwrap();
        assert!(aspect[[2, 2]].abs() < 1e-9);
    }

    #[test]
    fn test_flat_pixels() {
        let extractor = TopographicExtractor::standard();
        let dem = Array2::from_elem((5, 5), 120.0);
        let (slope, aspect) = extractor
            .compute_slope_aspect(&dem, (30.0, 30.0), &north_up())
            .unwrap();
        assert_eq!(slope[[2, 2]], 0.0);
        assert_eq!(aspect[[2, 2]], FLAT_ASPECT);

        let (profile, plan) = extractor
            .compute_curvatures(&dem, (30.0, 30.0), &north_up())
            .unwrap();
        assert_eq!(profile[[2, 2]], 0.0);
        assert_eq!(plan[[2, 2]], 0.0);
    }

    #[test]
    fn test_curvature_of_plane_is_zero() {
        let extractor = TopographicExtractor::standard();
        let dem = Array2::from_shape_fn((6, 6), |(i, j)| 2.0 * i as f64 + 3.0 * j as f64);
        let (profile, plan) = extractor
            .compute_curvatures(&dem, (1.0, 1.0), &north_up())
            .unwrap();
        assert!(profile[[2, 3]].abs() < 1e-12);
        assert!(plan[[2, 3]].abs() < 1e-12);
    }

    #[test]
    fn test_tpi_nodata_neighbourhood_invalid() {
        let extractor = TopographicExtractor::standard();
        let mut dem = Array2::from_elem((11, 11), 5.0);
        dem[[5, 8]] = f64::NAN;
        let tpi = extractor.compute_tpi(&dem, 3).unwrap();
        assert!(tpi[[5, 5]].is_nan());
        assert!(tpi[[3, 3]].abs() < 1e-12);
        assert!(tpi[[2, 5]].is_nan());
    }

    #[test]
    fn test_anomaly_highlights_bump() {
        let extractor = TopographicExtractor::new(TopographicParams {
            anomaly_sigma: 2.0,
            ..Default::default()
        });
        let mut dem = Array2::from_elem((21, 21), 100.0);
        dem[[10, 10]] = 103.0;
        let anomaly = extractor.compute_anomaly(&dem).unwrap();
        assert!(anomaly[[10, 10]] > 2.0);
        assert!(anomaly[[6, 6]].is_finite());
        assert!(anomaly[[5, 10]].is_nan());
        assert!(extractor.compute_anomaly(&Array2::zeros((5, 5))).unwrap()[[2, 2]].is_nan());
    }
}
