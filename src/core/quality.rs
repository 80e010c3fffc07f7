use crate::core::features::FeatureTable;
use crate::types::{ScoutError, ScoutResult};
use serde::{Deserialize, Serialize};

/// Thresholds applied to a feature table before training
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityParams {
    /// Features with population variance below this are dropped
    pub min_variance: f64,
    /// Pairs with |Pearson r| above this are flagged
    pub max_correlation: f64,
    /// Minimum fraction of known positives that must yield a valid vector
    pub min_positive_coverage: f64,
    /// Fail on flagged pairs instead of reporting them
    pub strict_correlation: bool,
}

impl Default for QualityParams {
    fn default() -> Self {
        Self {
            min_variance: 1e-10,
            max_correlation: 0.95,
            min_positive_coverage: 0.5,
            strict_correlation: false,
        }
    }
}

/// A pair of features whose values move together
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelatedPair {
    pub first: String,
    pub second: String,
    pub correlation: f64,
}

/// Findings of the quality gates
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub dropped_low_variance: Vec<String>,
    pub correlated_pairs: Vec<CorrelatedPair>,
    pub positive_coverage: Option<f64>,
}

/// Variance, correlation and positive-coverage gates
pub struct QualityGate {
    params: QualityParams,
}

impl QualityGate {
    pub fn new(params: QualityParams) -> Self {
        Self { params }
    }

    pub fn standard() -> Self {
        Self::new(QualityParams::default())
    }

    /// Check that enough known positives produced a vector
    pub fn check_positive_coverage(&self, requested: usize, extracted: usize) -> ScoutResult<f64> {
        if requested == 0 {
            return Err(ScoutError::Coverage("No known positive sites supplied".to_string()));
        }
        let coverage = extracted as f64 / requested as f64;
        if coverage < self.params.min_positive_coverage {
            return Err(ScoutError::Coverage(format!(
                "Only {} of {} known sites ({:.1}%) have valid features, below the {:.1}% minimum",
                extracted,
                requested,
                coverage * 100.0,
                self.params.min_positive_coverage * 100.0
            )));
        }
        Ok(coverage)
    }

    /// Names of features whose variance is below the threshold
    pub fn low_variance_features(&self, table: &FeatureTable) -> Vec<String> {
        table
            .schema()
            .names()
            .iter()
            .filter(|name| {
                table
                    .column(name)
                    .map_or(true, |col| population_variance(&col) < self.params.min_variance)
            })
            .cloned()
            .collect()
    }

    /// Every feature pair with |r| above the threshold, in schema order
    pub fn correlated_pairs(&self, table: &FeatureTable) -> Vec<CorrelatedPair> {
        let names = table.schema().names();
        let columns: Vec<Vec<f64>> = names
            .iter()
            .map(|n| table.column(n).unwrap_or_default())
            .collect();

        let mut pairs = Vec::new();
        for i in 0..names.len() {
            for j in (i + 1)..names.len() {
                if let Some(r) = pearson(&columns[i], &columns[j]) {
                    if r.abs() > self.params.max_correlation {
                        pairs.push(CorrelatedPair {
                            first: names[i].clone(),
                            second: names[j].clone(),
                            correlation: r,
                        });
                    }
                }
            }
        }
        pairs
    }

    /// Run all gates.
    ///
    /// Low-variance features are removed from the returned table; correlated
    /// pairs are only reported unless `strict_correlation` is set.
    /// `positives` is `(requested, extracted)` for the known sites, when known.
    pub fn apply(
        &self,
        table: FeatureTable,
        positives: Option<(usize, usize)>,
    ) -> ScoutResult<(FeatureTable, QualityReport)> {
        let mut report = QualityReport::default();
        if let Some((requested, extracted)) = positives {
            report.positive_coverage = Some(self.check_positive_coverage(requested, extracted)?);
        }

        report.dropped_low_variance = self.low_variance_features(&table);
        let table = if report.dropped_low_variance.is_empty() {
            table
        } else {
            log::warn!(
                "Dropping near-constant features: {}",
                report.dropped_low_variance.join(", ")
            );
            table.drop_features(&report.dropped_low_variance)?
        };

        report.correlated_pairs = self.correlated_pairs(&table);
        for pair in &report.correlated_pairs {
            log::warn!(
                "Features {} and {} are highly correlated (r = {:.3})",
                pair.first,
                pair.second,
                pair.correlation
            );
        }
        if self.params.strict_correlation && !report.correlated_pairs.is_empty() {
            let features = report
                .correlated_pairs
                .iter()
                .map(|p| format!("{}~{}", p.first, p.second))
                .collect();
            return Err(ScoutError::FeatureQuality {
                message: format!(
                    "{} feature pairs exceed |r| > {}",
                    report.correlated_pairs.len(),
                    self.params.max_correlation
                ),
                features,
            });
        }

        Ok((table, report))
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn population_variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64
}

/// Pearson correlation, `None` when either column is constant
fn pearson(a: &[f64], b: &[f64]) -> Option<f64> {
    if a.len() != b.len() || a.len() < 2 {
        return None;
    }
    let (ma, mb) = (mean(a), mean(b));
    let mut cov = 0.0;
    let mut va = 0.0;
    let mut vb = 0.0;
    for (x, y) in a.iter().zip(b) {
        cov += (x - ma) * (y - mb);
        va += (x - ma).powi(2);
        vb += (y - mb).powi(2);
    }
    if va <= 0.0 || vb <= 0.0 {
        return None;
    }
    Some((cov / (va.sqrt() * vb.sqrt())).clamp(-1.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::features::FeatureRow;
    use crate::core::schema::{FeatureSchema, FeatureVector};
    use crate::types::GeoPoint;

    fn table() -> FeatureTable {
        let schema = FeatureSchema::new(vec!["a".into(), "b".into(), "c".into(), "d".into()]).unwrap();
        let rows = (0..10)
            .map(|i| {
                let x = i as f64;
                FeatureRow {
                    point: GeoPoint::new(-9.0, -60.0 + x * 0.01),
                    vector: FeatureVector::from_pairs(vec![
                        ("a", x),
                        ("b", 2.0 * x + 1.0),
                        ("c", 5.0),
                        ("d", (x * 1.7).sin()),
                    ])
                    .unwrap(),
                }
            })
            .collect();
        FeatureTable::new(schema, rows).unwrap()
    }

    #[test]
    fn test_gates_flag_and_drop() {
        let (cleaned, report) = QualityGate::standard().apply(table(), Some((10, 8))).unwrap();
        assert_eq!(report.dropped_low_variance, vec!["c".to_string()]);
        assert!(!cleaned.schema().contains("c"));
        assert_eq!(report.correlated_pairs.len(), 1);
        assert_eq!(report.correlated_pairs[0].first, "a");
        assert_eq!(report.correlated_pairs[0].second, "b");
        // flagged pairs stay in the table
        assert!(cleaned.schema().contains("b"));
        assert_eq!(report.positive_coverage, Some(0.8));
    }

    #[test]
    fn test_strict_correlation_fails() {
        let gate = QualityGate::new(QualityParams {
            strict_correlation: true,
            ..Default::default()
        });
        match gate.apply(table(), None) {
            Err(ScoutError::FeatureQuality { features, .. }) => {
                assert_eq!(features, vec!["a~b".to_string()])
            }
            other => panic!("expected feature quality error, got {:?}", other),
        }
    }

    #[test]
    fn test_low_positive_coverage_rejected() {
        let gate = QualityGate::standard();
        assert!(matches!(
            gate.apply(table(), Some((10, 4))),
            Err(ScoutError::Coverage(_))
        ));
        assert!(gate.check_positive_coverage(0, 0).is_err());
    }
}
