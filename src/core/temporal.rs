use crate::core::schema::{SPECTRAL_FEATURES, TEMPORAL_FEATURES};
use crate::core::spectral::{Reflectance, SpectralIndex};
use crate::core::surface::SurfaceSet;
use crate::core::window::map_rows;
use crate::io::raster::RasterTile;
use crate::io::series::DateSeries;
use crate::types::{ScoutError, ScoutResult};
use chrono::NaiveDate;
use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};

/// Days per year used to express trends per year
const DAYS_PER_YEAR: f64 = 365.25;

/// Offset keeping the stability index finite for constant series
pub const STABILITY_EPSILON: f64 = 0.001;

/// Parameters for multi-date spectral statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemporalParams {
    /// Minimum valid observations for a pixel to get any temporal value
    pub min_valid_dates: usize,
}

impl Default for TemporalParams {
    fn default() -> Self {
        Self { min_valid_dates: 2 }
    }
}

/// Per-pixel statistics of one index across the valid dates
#[derive(Debug, Clone)]
pub struct IndexStatistics {
    pub mean: Array2<f64>,
    /// Population standard deviation
    pub std: Array2<f64>,
    pub min: Array2<f64>,
    pub max: Array2<f64>,
    /// Least-squares slope in index units per year
    pub trend: Array2<f64>,
    /// Dates on which the index had a value
    pub valid_count: Array2<u32>,
}

/// Temporal and spectral surfaces of one optical series
#[derive(Debug, Clone)]
pub struct TemporalSurfaces {
    surfaces: SurfaceSet,
    statistics: Vec<(SpectralIndex, IndexStatistics)>,
    valid_dates: Array2<u32>,
    date_mask: Array3<bool>,
    dates: Vec<NaiveDate>,
}

impl TemporalSurfaces {
    /// The 13 named feature surfaces (6 temporal NDVI, 7 spectral composites)
    pub fn surfaces(&self) -> &SurfaceSet {
        &self.surfaces
    }

    pub fn statistics(&self, index: SpectralIndex) -> Option<&IndexStatistics> {
        self.statistics
            .iter()
            .find(|(i, _)| *i == index)
            .map(|(_, s)| s)
    }

    /// Per-pixel count of dates with every required band valid
    pub fn valid_dates(&self) -> &Array2<u32> {
        &self.valid_dates
    }

    /// Validity of each (date, row, col)
    pub fn date_mask(&self) -> &Array3<bool> {
        &self.date_mask
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }
}

/// Bands of one acquisition needed by the indices
struct DateBands<'a> {
    tile: &'a RasterTile,
    blue: &'a Array2<f64>,
    red: &'a Array2<f64>,
    red_edge: &'a Array2<f64>,
    nir: &'a Array2<f64>,
    swir1: &'a Array2<f64>,
}

impl<'a> DateBands<'a> {
    fn new(tile: &'a RasterTile, series: &DateSeries) -> ScoutResult<Self> {
        let layout = series.layout();
        let band = |idx: usize| {
            tile.band(idx)
                .ok_or_else(|| ScoutError::DataAccess(format!("Optical tile lacks band {}", idx)))
        };
        Ok(Self {
            tile,
            blue: band(layout.blue)?,
            red: band(layout.red)?,
            red_edge: band(layout.red_edge)?,
            nir: band(layout.nir)?,
            swir1: band(layout.swir1)?,
        })
    }

    fn is_valid(&self, r: usize, c: usize) -> bool {
        [self.blue, self.red, self.red_edge, self.nir, self.swir1]
            .iter()
            .all(|b| !self.tile.is_nodata(b[[r, c]]))
    }

    fn reflectance(&self, r: usize, c: usize, scale: f64) -> Reflectance {
        Reflectance {
            blue: self.blue[[r, c]] * scale,
            red: self.red[[r, c]] * scale,
            red_edge: self.red_edge[[r, c]] * scale,
            nir: self.nir[[r, c]] * scale,
            swir1: self.swir1[[r, c]] * scale,
        }
    }
}

/// Streaming mean, variance, extremes and time regression (Welford updates)
#[derive(Debug, Clone, Copy, Default)]
struct RunningStats {
    n: u32,
    mean_v: f64,
    mean_t: f64,
    m2_v: f64,
    m2_t: f64,
    co: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    fn push(&mut self, t: f64, v: f64) {
        if self.n == 0 {
            self.min = v;
            self.max = v;
        } else {
            self.min = self.min.min(v);
            self.max = self.max.max(v);
        }
        self.n += 1;
        let n = self.n as f64;
        let dt = t - self.mean_t;
        let dv = v - self.mean_v;
        self.mean_t += dt / n;
        self.mean_v += dv / n;
        self.m2_t += dt * (t - self.mean_t);
        self.m2_v += dv * (v - self.mean_v);
        self.co += dt * (v - self.mean_v);
    }

    fn std(&self) -> f64 {
        (self.m2_v / self.n as f64).max(0.0).sqrt()
    }

    fn slope(&self) -> f64 {
        if self.m2_t > 0.0 {
            self.co / self.m2_t
        } else {
            0.0
        }
    }
}

struct RowStatistics {
    mean: Vec<f64>,
    std: Vec<f64>,
    min: Vec<f64>,
    max: Vec<f64>,
    trend: Vec<f64>,
    count: Vec<u32>,
}

/// Multi-date spectral statistics processor
pub struct TemporalExtractor {
    params: TemporalParams,
}

impl TemporalExtractor {
    pub fn new(params: TemporalParams) -> Self {
        Self { params }
    }

    pub fn standard() -> Self {
        Self::new(TemporalParams::default())
    }

    /// Compute every index's statistics and the 13 named feature surfaces
    pub fn extract(&self, series: &DateSeries) -> ScoutResult<TemporalSurfaces> {
        if self.params.min_valid_dates == 0 {
            return Err(ScoutError::InvalidParameter(
                "min_valid_dates must be at least 1".to_string(),
            ));
        }
        log::info!(
            "Starting temporal extraction over {} acquisitions",
            series.len()
        );
        if series.len() < self.params.min_valid_dates {
            log::warn!(
                "Series has {} dates, fewer than the {} required; all temporal surfaces will be invalid",
                series.len(),
                self.params.min_valid_dates
            );
        }

        let (rows, cols) = series.shape();
        let dates: Vec<DateBands> = series
            .tiles()
            .iter()
            .map(|dated| DateBands::new(&dated.tile, series))
            .collect::<ScoutResult<_>>()?;
        let years: Vec<f64> = series
            .day_offsets()
            .iter()
            .map(|d| d / DAYS_PER_YEAR)
            .collect();

        let mut date_mask = Array3::from_elem((dates.len(), rows, cols), false);
        for (d, bands) in dates.iter().enumerate() {
            for r in 0..rows {
                for c in 0..cols {
                    date_mask[[d, r, c]] = bands.is_valid(r, c);
                }
            }
        }
        let valid_dates = Array2::from_shape_fn((rows, cols), |(r, c)| {
            (0..dates.len()).filter(|&d| date_mask[[d, r, c]]).count() as u32
        });

        let scale = series.layout().reflectance_scale;
        let mut statistics = Vec::with_capacity(SpectralIndex::ALL.len());
        for index in SpectralIndex::ALL {
            log::debug!("Computing temporal statistics for {}", index.name());
            let stats = self.index_statistics(index, &dates, &date_mask, &years, scale, (rows, cols))?;
            statistics.push((index, stats));
        }

        let surfaces = build_surfaces(&statistics, series)?;
        log::info!(
            "Temporal extraction completed ({:.1}% pixels fully valid)",
            surfaces.valid_fraction() * 100.0
        );

        Ok(TemporalSurfaces {
            surfaces,
            statistics,
            valid_dates,
            date_mask,
            dates: series.dates(),
        })
    }

    fn index_statistics(
        &self,
        index: SpectralIndex,
        dates: &[DateBands],
        date_mask: &Array3<bool>,
        years: &[f64],
        scale: f64,
        shape: (usize, usize),
    ) -> ScoutResult<IndexStatistics> {
        let (rows, cols) = shape;
        let min_valid = self.params.min_valid_dates as u32;

        let per_row = map_rows(rows, |r| {
            let mut row = RowStatistics {
                mean: vec![f64::NAN; cols],
                std: vec![f64::NAN; cols],
                min: vec![f64::NAN; cols],
                max: vec![f64::NAN; cols],
                trend: vec![f64::NAN; cols],
                count: vec![0; cols],
            };
            for c in 0..cols {
                let mut stats = RunningStats::default();
                for (d, bands) in dates.iter().enumerate() {
                    if !date_mask[[d, r, c]] {
                        continue;
                    }
                    if let Some(v) = index.compute(&bands.reflectance(r, c, scale)) {
                        stats.push(years[d], v);
                    }
                }
                row.count[c] = stats.n;
                if stats.n >= min_valid {
                    row.mean[c] = stats.mean_v;
                    row.std[c] = stats.std();
                    row.min[c] = stats.min;
                    row.max[c] = stats.max;
                    row.trend[c] = stats.slope();
                }
            }
            row
        });

        let counts: Vec<u32> = per_row.iter().flat_map(|r| r.count.iter().copied()).collect();

        Ok(IndexStatistics {
            mean: stack_rows(&per_row, shape, |r| r.mean.as_slice())?,
            std: stack_rows(&per_row, shape, |r| r.std.as_slice())?,
            min: stack_rows(&per_row, shape, |r| r.min.as_slice())?,
            max: stack_rows(&per_row, shape, |r| r.max.as_slice())?,
            trend: stack_rows(&per_row, shape, |r| r.trend.as_slice())?,
            valid_count: Array2::from_shape_vec(shape, counts).map_err(|e| {
                ScoutError::InvalidParameter(format!("Failed to shape count surface: {}", e))
            })?,
        })
    }
}

fn stack_rows<F>(rows: &[RowStatistics], shape: (usize, usize), field: F) -> ScoutResult<Array2<f64>>
where
    F: Fn(&RowStatistics) -> &[f64],
{
    let data: Vec<f64> = rows.iter().flat_map(|r| field(r).iter().copied()).collect();
    Array2::from_shape_vec(shape, data)
        .map_err(|e| ScoutError::InvalidParameter(format!("Failed to shape temporal surface: {}", e)))
}

fn build_surfaces(
    statistics: &[(SpectralIndex, IndexStatistics)],
    series: &DateSeries,
) -> ScoutResult<SurfaceSet> {
    let find = |index: SpectralIndex| {
        statistics
            .iter()
            .find(|(i, _)| *i == index)
            .map(|(_, s)| s)
            .ok_or_else(|| {
                ScoutError::InvalidParameter(format!("No statistics for {}", index.name()))
            })
    };
    let ndvi = find(SpectralIndex::Ndvi)?;

    let mut layers = vec![
        ndvi.mean.clone(),
        ndvi.std.clone(),
        ndvi.min.clone(),
        ndvi.max.clone(),
        ndvi.std.mapv(|s| 1.0 / (s + STABILITY_EPSILON)),
        ndvi.trend.clone(),
    ];
    for index in SpectralIndex::ALL {
        layers.push(find(index)?.mean.clone());
    }

    let names = TEMPORAL_FEATURES
        .iter()
        .chain(SPECTRAL_FEATURES.iter())
        .map(|s| s.to_string())
        .collect();
    SurfaceSet::new(names, layers, *series.transform())
}
