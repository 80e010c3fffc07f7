//! Labeled training sample assembly.
//!
//! Known sites become positives; background points are drawn from a seeded
//! generator in one ordered sequence before any feature extraction, so a
//! seed fully determines the table.

use crate::core::features::{
    CoverageEnvelope, FeatureRow, FeatureTable, FeatureTableBuilder, PointOutcome, SkippedAcquisition,
    SkippedTile,
};
use crate::core::quality::{QualityGate, QualityReport};
use crate::core::schema::{FeatureSchema, FeatureVector};
use crate::types::{GeoPoint, ScoutError, ScoutResult};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Parameters for labeled sample assembly
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingParams {
    /// Share of positives in the assembled table
    pub target_positive_fraction: f64,
    /// Share of negatives drawn near known sites
    pub hard_negative_fraction: f64,
    /// No negative may lie closer than this to any known site (meters)
    pub exclusion_radius_m: f64,
    /// Outer radius of the hard-negative ring (meters)
    pub max_radius_m: f64,
    pub seed: u64,
    pub max_attempts_per_sample: usize,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            target_positive_fraction: 0.25,
            hard_negative_fraction: 0.7,
            exclusion_radius_m: 1000.0,
            max_radius_m: 5000.0,
            seed: 42,
            max_attempts_per_sample: 100,
        }
    }
}

impl SamplingParams {
    pub fn validate(&self) -> ScoutResult<()> {
        if !(self.target_positive_fraction > 0.0 && self.target_positive_fraction < 1.0) {
            return Err(ScoutError::InvalidParameter(format!(
                "target_positive_fraction must be in (0, 1), got {}",
                self.target_positive_fraction
            )));
        }
        if !(0.0..=1.0).contains(&self.hard_negative_fraction) {
            return Err(ScoutError::InvalidParameter(format!(
                "hard_negative_fraction must be in [0, 1], got {}",
                self.hard_negative_fraction
            )));
        }
        if !(self.exclusion_radius_m >= 0.0 && self.max_radius_m > self.exclusion_radius_m) {
            return Err(ScoutError::InvalidParameter(format!(
                "Need 0 <= exclusion_radius_m < max_radius_m, got {} and {}",
                self.exclusion_radius_m, self.max_radius_m
            )));
        }
        if self.max_attempts_per_sample == 0 {
            return Err(ScoutError::InvalidParameter(
                "max_attempts_per_sample must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Label {
    Site,
    Background,
}

impl Label {
    pub fn is_positive(&self) -> bool {
        matches!(self, Label::Site)
    }

    /// 1.0 for sites, 0.0 for background
    pub fn target(&self) -> f64 {
        if self.is_positive() {
            1.0
        } else {
            0.0
        }
    }
}

/// Where a sample came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Provenance {
    KnownSite,
    HardNegative,
    EasyNegative,
}

impl Provenance {
    pub fn label(&self) -> Label {
        match self {
            Provenance::KnownSite => Label::Site,
            Provenance::HardNegative | Provenance::EasyNegative => Label::Background,
        }
    }
}

/// A location selected for labeling, before feature extraction
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlannedPoint {
    pub point: GeoPoint,
    pub provenance: Provenance,
}

/// Accounting of the sampling draws
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SamplingReport {
    pub positives_supplied: usize,
    pub positives_in_coverage: usize,
    /// Repeated coordinates among the covered sites, kept once
    pub duplicate_sites: usize,
    pub hard_requested: usize,
    pub hard_drawn: usize,
    pub easy_requested: usize,
    pub easy_drawn: usize,
    pub rejected_outside_coverage: usize,
    pub rejected_near_site: usize,
    pub rejected_duplicate: usize,
}

impl SamplingReport {
    /// Negatives that could not be drawn within the attempt budget
    pub fn shortfall(&self) -> usize {
        (self.hard_requested - self.hard_drawn) + (self.easy_requested - self.easy_drawn)
    }
}

/// Ordered points to label plus the draw accounting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplePlan {
    pub points: Vec<PlannedPoint>,
    pub report: SamplingReport,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledSample {
    pub point: GeoPoint,
    pub vector: FeatureVector,
    pub label: Label,
    pub provenance: Provenance,
}

/// Labeled samples sharing one feature schema
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingTable {
    schema: FeatureSchema,
    samples: Vec<LabeledSample>,
}

impl TrainingTable {
    pub fn new(schema: FeatureSchema, samples: Vec<LabeledSample>) -> ScoutResult<Self> {
        for s in &samples {
            schema.check(&s.vector)?;
        }
        Ok(Self { schema, samples })
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn samples(&self) -> &[LabeledSample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn positives(&self) -> usize {
        self.samples.iter().filter(|s| s.label.is_positive()).count()
    }

    pub fn negatives(&self) -> usize {
        self.len() - self.positives()
    }

    /// The unlabeled feature rows
    pub fn feature_table(&self) -> ScoutResult<FeatureTable> {
        FeatureTable::new(
            self.schema.clone(),
            self.samples
                .iter()
                .map(|s| FeatureRow {
                    point: s.point,
                    vector: s.vector.clone(),
                })
                .collect(),
        )
    }

    pub fn drop_features(&self, names: &[String]) -> ScoutResult<TrainingTable> {
        if let Some(unknown) = names.iter().find(|n| !self.schema.contains(n)) {
            return Err(ScoutError::InvalidParameter(format!(
                "Cannot drop unknown feature {}",
                unknown
            )));
        }
        Ok(TrainingTable {
            schema: self.schema.without(names),
            samples: self
                .samples
                .iter()
                .map(|s| LabeledSample {
                    vector: s.vector.without(names),
                    ..s.clone()
                })
                .collect(),
        })
    }

    /// Run the quality gates and drop the near-constant features they find
    pub fn apply_quality(
        &self,
        gate: &QualityGate,
        positives: Option<(usize, usize)>,
    ) -> ScoutResult<(TrainingTable, QualityReport)> {
        let (_, report) = gate.apply(self.feature_table()?, positives)?;
        let table = self.drop_features(&report.dropped_low_variance)?;
        Ok((table, report))
    }
}

/// Accounting of one assembly run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssemblyReport {
    pub sampling: SamplingReport,
    pub positives_extracted: usize,
    pub negatives_extracted: usize,
    pub outside_coverage: usize,
    pub invalid: usize,
    pub skipped_tiles: Vec<SkippedTile>,
    pub skipped_acquisitions: Vec<SkippedAcquisition>,
}

impl AssemblyReport {
    /// `(distinct supplied, extracted)` known sites, for the positive-coverage gate
    pub fn positive_counts(&self) -> (usize, usize) {
        (
            self.sampling.positives_supplied - self.sampling.duplicate_sites,
            self.positives_extracted,
        )
    }
}

enum Rejection {
    OutsideCoverage,
    NearSite,
    Duplicate,
}

/// Labeled sample processor
pub struct SampleAssembler {
    params: SamplingParams,
}

impl SampleAssembler {
    pub fn new(params: SamplingParams) -> Self {
        Self { params }
    }

    pub fn standard() -> Self {
        Self::new(SamplingParams::default())
    }

    /// Choose every sample location for one run.
    ///
    /// Uses a single `StdRng` seeded from the parameters; the same inputs and
    /// seed always produce the same plan.
    pub fn plan(&self, positives: &[GeoPoint], envelope: &CoverageEnvelope) -> ScoutResult<SamplePlan> {
        self.params.validate()?;
        if envelope.is_empty() {
            return Err(ScoutError::Coverage("Coverage envelope is empty".to_string()));
        }

        let mut report = SamplingReport {
            positives_supplied: positives.len(),
            ..Default::default()
        };
        let mut seen: HashSet<(u64, u64)> = HashSet::new();
        let mut covered: Vec<GeoPoint> = Vec::new();
        for p in positives.iter().filter(|p| p.is_finite() && envelope.contains(p)) {
            if seen.insert(point_key(p)) {
                covered.push(*p);
            } else {
                report.duplicate_sites += 1;
            }
        }
        if report.duplicate_sites > 0 {
            log::warn!("Ignoring {} repeated known-site coordinates", report.duplicate_sites);
        }
        report.positives_in_coverage = covered.len();
        if covered.is_empty() {
            return Err(ScoutError::Coverage(format!(
                "None of the {} known sites lie inside raster coverage",
                positives.len()
            )));
        }
        log::info!(
            "Planning samples: {} of {} known sites covered",
            covered.len(),
            positives.len()
        );

        let fraction = self.params.target_positive_fraction;
        let negatives =
            ((covered.len() as f64) * (1.0 - fraction) / fraction).round() as usize;
        report.hard_requested =
            ((negatives as f64) * self.params.hard_negative_fraction).round() as usize;
        report.easy_requested = negatives - report.hard_requested;
        log::debug!(
            "Drawing {} hard and {} easy negatives (seed {})",
            report.hard_requested,
            report.easy_requested,
            self.params.seed
        );

        let mut points: Vec<PlannedPoint> = covered
            .iter()
            .map(|&point| PlannedPoint {
                point,
                provenance: Provenance::KnownSite,
            })
            .collect();

        let mut rng = StdRng::seed_from_u64(self.params.seed);

        for _ in 0..report.hard_requested {
            let drawn = self.draw(&mut rng, &mut report, &mut seen, positives, envelope, |rng| {
                let site = covered[rng.gen_range(0..covered.len())];
                self.ring_point(rng, &site)
            });
            if let Some(point) = drawn {
                report.hard_drawn += 1;
                points.push(PlannedPoint {
                    point,
                    provenance: Provenance::HardNegative,
                });
            }
        }

        for _ in 0..report.easy_requested {
            let drawn = self.draw(&mut rng, &mut report, &mut seen, positives, envelope, |rng| {
                uniform_point(rng, envelope)
            });
            if let Some(point) = drawn {
                report.easy_drawn += 1;
                points.push(PlannedPoint {
                    point,
                    provenance: Provenance::EasyNegative,
                });
            }
        }

        if report.shortfall() > 0 {
            log::warn!(
                "Negative sampling fell {} samples short ({} near-site, {} outside-coverage, {} duplicate rejections)",
                report.shortfall(),
                report.rejected_near_site,
                report.rejected_outside_coverage,
                report.rejected_duplicate
            );
        }

        Ok(SamplePlan { points, report })
    }

    /// Attach features to a plan; points without a valid vector are counted
    pub fn assemble(
        &self,
        plan: &SamplePlan,
        builder: &FeatureTableBuilder,
    ) -> ScoutResult<(TrainingTable, AssemblyReport)> {
        let locations: Vec<GeoPoint> = plan.points.iter().map(|p| p.point).collect();
        let outcomes = builder.outcomes(&locations);

        let mut report = AssemblyReport {
            sampling: plan.report.clone(),
            skipped_tiles: builder.skipped_tiles().to_vec(),
            skipped_acquisitions: builder.skipped_acquisitions(),
            ..Default::default()
        };
        let mut samples = Vec::with_capacity(plan.points.len());
        for (planned, outcome) in plan.points.iter().zip(outcomes) {
            match outcome {
                PointOutcome::Valid(vector) => {
                    let label = planned.provenance.label();
                    if label.is_positive() {
                        report.positives_extracted += 1;
                    } else {
                        report.negatives_extracted += 1;
                    }
                    samples.push(LabeledSample {
                        point: planned.point,
                        vector,
                        label,
                        provenance: planned.provenance,
                    });
                }
                PointOutcome::Invalid { .. } => report.invalid += 1,
                PointOutcome::OutsideCoverage => report.outside_coverage += 1,
            }
        }

        log::info!(
            "Assembled {} samples ({} positive, {} negative); {} invalid, {} outside coverage",
            samples.len(),
            report.positives_extracted,
            report.negatives_extracted,
            report.invalid,
            report.outside_coverage
        );

        let table = TrainingTable::new(builder.schema().clone(), samples)?;
        Ok((table, report))
    }

    /// Propose candidates until one is accepted or the attempt budget runs out
    fn draw<F>(
        &self,
        rng: &mut StdRng,
        report: &mut SamplingReport,
        seen: &mut HashSet<(u64, u64)>,
        sites: &[GeoPoint],
        envelope: &CoverageEnvelope,
        mut propose: F,
    ) -> Option<GeoPoint>
    where
        F: FnMut(&mut StdRng) -> GeoPoint,
    {
        for _ in 0..self.params.max_attempts_per_sample {
            let candidate = propose(rng);
            match self.check(&candidate, seen, sites, envelope) {
                Ok(()) => {
                    seen.insert(point_key(&candidate));
                    return Some(candidate);
                }
                Err(Rejection::OutsideCoverage) => report.rejected_outside_coverage += 1,
                Err(Rejection::NearSite) => report.rejected_near_site += 1,
                Err(Rejection::Duplicate) => report.rejected_duplicate += 1,
            }
        }
        None
    }

    fn check(
        &self,
        candidate: &GeoPoint,
        seen: &HashSet<(u64, u64)>,
        sites: &[GeoPoint],
        envelope: &CoverageEnvelope,
    ) -> Result<(), Rejection> {
        if !candidate.is_finite() || !envelope.contains(candidate) {
            return Err(Rejection::OutsideCoverage);
        }
        if sites
            .iter()
            .any(|s| s.is_finite() && s.distance_m(candidate) < self.params.exclusion_radius_m)
        {
            return Err(Rejection::NearSite);
        }
        if seen.contains(&point_key(candidate)) {
            return Err(Rejection::Duplicate);
        }
        Ok(())
    }

    /// Uniform-by-area point in the ring between the exclusion and maximum radii
    fn ring_point(&self, rng: &mut StdRng, centre: &GeoPoint) -> GeoPoint {
        let r0 = self.params.exclusion_radius_m;
        let r1 = self.params.max_radius_m;
        let u: f64 = rng.gen();
        let distance = (r0 * r0 + u * (r1 * r1 - r0 * r0)).sqrt();
        let bearing = rng.gen_range(0.0..(2.0 * std::f64::consts::PI));
        centre.offset_m(distance * bearing.cos(), distance * bearing.sin())
    }
}

/// Uniform point in the envelope, boxes weighted by area
fn uniform_point(rng: &mut StdRng, envelope: &CoverageEnvelope) -> GeoPoint {
    let boxes = envelope.boxes();
    let mut pick = rng.gen::<f64>() * envelope.area();
    let mut chosen = &boxes[boxes.len() - 1];
    for b in boxes {
        if pick < b.area() {
            chosen = b;
            break;
        }
        pick -= b.area();
    }
    let lat = chosen.min_lat + rng.gen::<f64>() * chosen.height();
    let lon = chosen.min_lon + rng.gen::<f64>() * chosen.width();
    GeoPoint::new(lat, lon)
}

fn point_key(p: &GeoPoint) -> (u64, u64) {
    (p.lat.to_bits(), p.lon.to_bits())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BoundingBox;

    fn envelope() -> CoverageEnvelope {
        CoverageEnvelope::new(vec![BoundingBox::new(-61.0, -60.0, -10.0, -9.0)])
    }

    fn sites() -> Vec<GeoPoint> {
        vec![
            GeoPoint::new(-9.5, -60.5),
            GeoPoint::new(-9.3, -60.2),
            GeoPoint::new(-9.8, -60.8),
            GeoPoint::new(-9.2, -60.7),
        ]
    }

    #[test]
    fn test_plan_counts_and_ratio() {
        let plan = SampleAssembler::standard().plan(&sites(), &envelope()).unwrap();
        assert_eq!(plan.report.positives_in_coverage, 4);
        assert_eq!(plan.report.hard_requested + plan.report.easy_requested, 12);
        assert_eq!(plan.report.hard_requested, 8);
        assert_eq!(plan.report.shortfall(), 0);
        assert_eq!(plan.points.len(), 16);
        assert_eq!(
            plan.points
                .iter()
                .filter(|p| p.provenance == Provenance::KnownSite)
                .count(),
            4
        );
    }

    #[test]
    fn test_hard_negatives_in_ring() {
        let params = SamplingParams::default();
        let plan = SampleAssembler::new(params.clone()).plan(&sites(), &envelope()).unwrap();
        for p in plan.points.iter().filter(|p| p.provenance == Provenance::HardNegative) {
            let nearest = sites()
                .iter()
                .map(|s| s.distance_m(&p.point))
                .fold(f64::INFINITY, f64::min);
            assert!(nearest >= params.exclusion_radius_m);
            assert!(nearest <= params.max_radius_m * 1.01);
        }
    }

    #[test]
    fn test_outside_sites_still_exclude() {
        // an uncovered site right at the envelope edge
        let mut all = sites();
        all.push(GeoPoint::new(-9.5, -59.999));
        let plan = SampleAssembler::standard().plan(&all, &envelope()).unwrap();
        assert_eq!(plan.report.positives_in_coverage, 4);
        for p in plan.points.iter().filter(|p| !p.provenance.label().is_positive()) {
            assert!(p.point.distance_m(&all[4]) >= 1000.0);
        }
    }

    #[test]
    fn test_repeated_sites_kept_once() {
        let repeated = vec![
            GeoPoint::new(-9.5, -60.5),
            GeoPoint::new(-9.5, -60.5),
            GeoPoint::new(-9.3, -60.2),
        ];
        let plan = SampleAssembler::standard().plan(&repeated, &envelope()).unwrap();
        let known: Vec<GeoPoint> = plan
            .points
            .iter()
            .filter(|p| p.provenance == Provenance::KnownSite)
            .map(|p| p.point)
            .collect();
        assert_eq!(known, vec![GeoPoint::new(-9.5, -60.5), GeoPoint::new(-9.3, -60.2)]);
        assert_eq!(plan.report.positives_supplied, 3);
        assert_eq!(plan.report.positives_in_coverage, 2);
        assert_eq!(plan.report.duplicate_sites, 1);
        // negatives sized from the distinct sites only
        assert_eq!(plan.report.hard_requested + plan.report.easy_requested, 6);

        let report = AssemblyReport {
            sampling: plan.report.clone(),
            positives_extracted: 2,
            ..Default::default()
        };
        assert_eq!(report.positive_counts(), (2, 2));
    }

    #[test]
    fn test_invalid_params_and_empty_coverage() {
        let bad = SampleAssembler::new(SamplingParams {
            target_positive_fraction: 1.0,
            ..Default::default()
        });
        assert!(bad.plan(&sites(), &envelope()).is_err());

        let empty = CoverageEnvelope::new(Vec::new());
        assert!(matches!(
            SampleAssembler::standard().plan(&sites(), &empty),
            Err(ScoutError::Coverage(_))
        ));
        let far = vec![GeoPoint::new(10.0, 10.0)];
        assert!(matches!(
            SampleAssembler::standard().plan(&far, &envelope()),
            Err(ScoutError::Coverage(_))
        ));
    }
}
