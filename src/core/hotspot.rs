use crate::core::classifier::TrainedModel;
use crate::core::features::{FeatureTableBuilder, PointOutcome, SkippedAcquisition, SkippedTile};
use crate::core::schema::FeatureVector;
use crate::types::{BoundingBox, GeoPoint, ScoutError, ScoutResult};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::Path;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Parameters for grid scanning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanParams {
    pub grid_spacing_deg: f64,
    /// Percentile of the scanned scores that a candidate must reach
    pub percentile: f64,
}

impl Default for ScanParams {
    fn default() -> Self {
        Self {
            grid_spacing_deg: 0.005,
            percentile: 90.0,
        }
    }
}

impl ScanParams {
    pub fn validate(&self) -> ScoutResult<()> {
        if !(self.grid_spacing_deg > 0.0 && self.grid_spacing_deg.is_finite()) {
            return Err(ScoutError::InvalidParameter(format!(
                "Grid spacing must be positive, got {}",
                self.grid_spacing_deg
            )));
        }
        if !(0.0..=100.0).contains(&self.percentile) {
            return Err(ScoutError::InvalidParameter(format!(
                "Percentile must be in [0, 100], got {}",
                self.percentile
            )));
        }
        Ok(())
    }
}

/// A scored location at or above the scan cutoff
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateSite {
    pub point: GeoPoint,
    pub probability: f64,
    /// The model-schema features that produced the score
    pub features: FeatureVector,
    /// 1 for the highest probability
    pub rank: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanReport {
    pub grid_points: usize,
    pub scored: usize,
    pub outside_coverage: usize,
    pub invalid: usize,
    pub skipped_tiles: Vec<SkippedTile>,
    pub skipped_acquisitions: Vec<SkippedAcquisition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResult {
    /// Sorted by decreasing probability, ties by (lat, lon)
    pub candidates: Vec<CandidateSite>,
    pub cutoff: f64,
    pub report: ScanReport,
}

/// Scores a regular grid with a trained model and keeps the top percentile
pub struct HotspotScanner<'m> {
    model: &'m TrainedModel,
    params: ScanParams,
}

impl<'m> HotspotScanner<'m> {
    pub fn new(model: &'m TrainedModel, params: ScanParams) -> Self {
        Self { model, params }
    }

    pub fn scan(&self, region: &BoundingBox, builder: &FeatureTableBuilder) -> ScoutResult<ScanResult> {
        self.params.validate()?;
        if !region.is_valid() {
            return Err(ScoutError::InvalidParameter(format!(
                "Invalid scan region {:?}",
                region
            )));
        }

        let grid = grid_points(region, self.params.grid_spacing_deg);
        log::info!(
            "Scanning {} grid points at {}° spacing",
            grid.len(),
            self.params.grid_spacing_deg
        );

        let mut report = ScanReport {
            grid_points: grid.len(),
            skipped_tiles: builder.skipped_tiles().to_vec(),
            skipped_acquisitions: builder.skipped_acquisitions(),
            ..Default::default()
        };
        let schema = self.model.schema();
        let mut scorable = Vec::new();
        let outcomes = builder.outcomes(&grid);
        for (point, outcome) in grid.into_iter().zip(outcomes) {
            match outcome {
                PointOutcome::Valid(vector) => scorable.push((point, vector.select(schema)?)),
                PointOutcome::Invalid { .. } => report.invalid += 1,
                PointOutcome::OutsideCoverage => report.outside_coverage += 1,
            }
        }
        if scorable.is_empty() {
            return Err(ScoutError::Coverage(format!(
                "No grid point in {:?} could be scored ({} outside coverage, {} invalid)",
                region, report.outside_coverage, report.invalid
            )));
        }

        #[cfg(feature = "parallel")]
        let scores: Vec<f64> = scorable
            .par_iter()
            .map(|(_, v)| self.model.score(v))
            .collect::<ScoutResult<_>>()?;

        #[cfg(not(feature = "parallel"))]
        let scores: Vec<f64> = scorable
            .iter()
            .map(|(_, v)| self.model.score(v))
            .collect::<ScoutResult<_>>()?;

        // all scores are in before thresholding
        report.scored = scores.len();
        let (candidates, cutoff) = select_candidates(scorable, scores, self.params.percentile);

        log::info!(
            "Scan kept {} of {} scored points at cutoff {:.4} ({} outside coverage, {} invalid)",
            candidates.len(),
            report.scored,
            cutoff,
            report.outside_coverage,
            report.invalid
        );

        Ok(ScanResult {
            candidates,
            cutoff,
            report,
        })
    }
}

/// Regular grid anchored at the region's south-west corner
pub fn grid_points(region: &BoundingBox, spacing: f64) -> Vec<GeoPoint> {
    let steps = |extent: f64| (extent / spacing + 1e-9).floor() as usize + 1;
    let (n_lat, n_lon) = (steps(region.height()), steps(region.width()));
    let mut points = Vec::with_capacity(n_lat * n_lon);
    for i in 0..n_lat {
        let lat = region.min_lat + i as f64 * spacing;
        for j in 0..n_lon {
            points.push(GeoPoint::new(lat, region.min_lon + j as f64 * spacing));
        }
    }
    points
}

/// Linear-interpolation percentile of unsorted values; `p` in [0, 100]
pub fn percentile(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let rank = p / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
    }
}

/// Keep every point scoring at or above the percentile cutoff, ranked.
///
/// Points tied exactly at the cutoff are all kept.
fn select_candidates(
    scorable: Vec<(GeoPoint, FeatureVector)>,
    scores: Vec<f64>,
    p: f64,
) -> (Vec<CandidateSite>, f64) {
    let cutoff = percentile(&scores, p);
    let mut candidates: Vec<CandidateSite> = scorable
        .into_iter()
        .zip(scores)
        .filter(|(_, probability)| *probability >= cutoff)
        .map(|((point, features), probability)| CandidateSite {
            point,
            probability,
            features,
            rank: 0,
        })
        .collect();
    candidates.sort_by(compare_candidates);
    for (i, c) in candidates.iter_mut().enumerate() {
        c.rank = i + 1;
    }
    (candidates, cutoff)
}

fn compare_candidates(a: &CandidateSite, b: &CandidateSite) -> Ordering {
    b.probability
        .total_cmp(&a.probability)
        .then_with(|| a.point.lat.total_cmp(&b.point.lat))
        .then_with(|| a.point.lon.total_cmp(&b.point.lon))
}

/// Export candidates with every feature value, one row per site
pub fn write_candidates_csv<P: AsRef<Path>>(path: P, candidates: &[CandidateSite]) -> ScoutResult<()> {
    let mut writer = csv::Writer::from_path(path.as_ref())?;
    let feature_names: Vec<String> = candidates
        .first()
        .map(|c| c.features.keys().map(str::to_string).collect())
        .unwrap_or_default();

    let mut header = vec![
        "rank".to_string(),
        "lat".to_string(),
        "lon".to_string(),
        "probability".to_string(),
    ];
    header.extend(feature_names.iter().cloned());
    writer.write_record(&header)?;

    for c in candidates {
        let mut record = vec![
            c.rank.to_string(),
            format!("{:.6}", c.point.lat),
            format!("{:.6}", c.point.lon),
            format!("{:.6}", c.probability),
        ];
        for name in &feature_names {
            record.push(c.features.get(name).map(|v| v.to_string()).unwrap_or_default());
        }
        writer.write_record(&record)?;
    }
    writer.flush()?;
    log::info!("Wrote {} candidates to {}", candidates.len(), path.as_ref().display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentile_interpolates() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(percentile(&values, 50.0), 3.0);
        assert_eq!(percentile(&values, 100.0), 5.0);
        assert!((percentile(&values, 90.0) - 4.6).abs() < 1e-12);
        assert_eq!(percentile(&[0.7, 0.7, 0.7], 90.0), 0.7);
    }

    #[test]
    fn test_grid_anchored_south_west() {
        let region = BoundingBox::new(-60.0, -59.99, -10.0, -9.995);
        let grid = grid_points(&region, 0.005);
        assert_eq!(grid.len(), 3 * 2);
        assert_eq!(grid[0], GeoPoint::new(-10.0, -60.0));
    }

    #[test]
    fn test_candidate_ordering_breaks_ties_by_position() {
        let make = |lat: f64, p: f64| CandidateSite {
            point: GeoPoint::new(lat, -60.0),
            probability: p,
            features: FeatureVector::from_pairs(Vec::<(String, f64)>::new()).unwrap(),
            rank: 0,
        };
        let mut v = vec![make(-9.0, 0.5), make(-9.5, 0.5), make(-9.2, 0.9)];
        v.sort_by(compare_candidates);
        let lats: Vec<f64> = v.iter().map(|c| c.point.lat).collect();
        assert_eq!(lats, vec![-9.2, -9.5, -9.0]);
    }

    #[test]
    fn test_ties_at_cutoff_all_kept() {
        let empty = || FeatureVector::from_pairs(Vec::<(String, f64)>::new()).unwrap();
        let scores = vec![0.1, 0.1, 0.1, 0.1, 0.1, 0.1, 0.4, 0.4, 0.4, 0.9];
        let lats = [-9.00, -9.01, -9.02, -9.03, -9.04, -9.05, -9.06, -9.07, -9.08, -9.09];
        let scorable: Vec<(GeoPoint, FeatureVector)> = lats
            .iter()
            .map(|&lat| (GeoPoint::new(lat, -60.0), empty()))
            .collect();

        // 70th percentile lands exactly on the 0.4 plateau
        let (candidates, cutoff) = select_candidates(scorable.clone(), scores.clone(), 70.0);
        assert_eq!(cutoff, 0.4);
        assert_eq!(candidates.len(), 4);
        assert_eq!(candidates[0].probability, 0.9);
        let tied: Vec<f64> = candidates[1..].iter().map(|c| c.point.lat).collect();
        assert_eq!(tied, vec![-9.08, -9.07, -9.06]);
        assert_eq!(candidates.iter().map(|c| c.rank).collect::<Vec<_>>(), vec![1, 2, 3, 4]);

        // a cutoff on the lowest plateau keeps everything
        let (all, cutoff) = select_candidates(scorable, scores, 50.0);
        assert_eq!(cutoff, 0.1);
        assert_eq!(all.len(), 10);
    }

    #[test]
    fn test_invalid_scan_params() {
        assert!(ScanParams { grid_spacing_deg: 0.0, percentile: 90.0 }.validate().is_err());
        assert!(ScanParams { grid_spacing_deg: 0.01, percentile: 101.0 }.validate().is_err());
    }
}
