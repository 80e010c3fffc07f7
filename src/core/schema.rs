//! Feature names, schemas and feature vectors.
//!
//! Vectors are keyed by name; positional layouts are derived from a schema
//! only at the model boundary, after the key sets have been checked.

use crate::types::{ScoutError, ScoutResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const TOPOGRAPHIC_FEATURES: [&str; 9] = [
    "elevation",
    "slope",
    "aspect",
    "topo_anomaly",
    "tpi_r3",
    "tpi_r7",
    "tpi_r15",
    "profile_curvature",
    "plan_curvature",
];

pub const TEMPORAL_FEATURES: [&str; 6] = [
    "ndvi_temporal_mean",
    "ndvi_temporal_std",
    "ndvi_temporal_min",
    "ndvi_temporal_max",
    "ndvi_stability_index",
    "ndvi_trend_slope",
];

pub const SPECTRAL_FEATURES: [&str; 7] = ["ndvi", "evi2", "savi", "ndre", "bsi", "sci", "edi"];

/// Ordered set of feature names
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSchema {
    names: Vec<String>,
}

impl FeatureSchema {
    pub fn new(names: Vec<String>) -> ScoutResult<Self> {
        let mut seen = std::collections::BTreeSet::new();
        for n in &names {
            if !seen.insert(n.as_str()) {
                return Err(ScoutError::InvalidParameter(format!(
                    "Duplicate feature name in schema: {}",
                    n
                )));
            }
        }
        Ok(Self { names })
    }

    /// The full 22-feature schema: topographic, temporal, spectral
    pub fn standard() -> Self {
        let names = TOPOGRAPHIC_FEATURES
            .iter()
            .chain(TEMPORAL_FEATURES.iter())
            .chain(SPECTRAL_FEATURES.iter())
            .map(|s| s.to_string())
            .collect();
        Self { names }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    /// Schema without the given names, order preserved
    pub fn without(&self, drop: &[String]) -> Self {
        Self {
            names: self
                .names
                .iter()
                .filter(|n| !drop.contains(*n))
                .cloned()
                .collect(),
        }
    }

    /// Fail with `SchemaMismatch` unless the vector's keys equal this schema
    pub fn check(&self, vector: &FeatureVector) -> ScoutResult<()> {
        let missing: Vec<String> = self
            .names
            .iter()
            .filter(|n| !vector.values.contains_key(n.as_str()))
            .cloned()
            .collect();
        let unexpected: Vec<String> = vector
            .values
            .keys()
            .filter(|k| !self.contains(k))
            .cloned()
            .collect();

        if missing.is_empty() && unexpected.is_empty() {
            Ok(())
        } else {
            Err(ScoutError::SchemaMismatch { missing, unexpected })
        }
    }
}

/// Named finite feature values for one location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    values: BTreeMap<String, f64>,
}

impl FeatureVector {
    /// Build from name/value pairs; any non-finite value is rejected
    pub fn from_pairs<I, S>(pairs: I) -> ScoutResult<Self>
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        let mut values = BTreeMap::new();
        for (name, value) in pairs {
            let name = name.into();
            if !value.is_finite() {
                return Err(ScoutError::InvalidParameter(format!(
                    "Feature {} has non-finite value {}",
                    name, value
                )));
            }
            if values.insert(name.clone(), value).is_some() {
                return Err(ScoutError::InvalidParameter(format!(
                    "Feature {} given twice",
                    name
                )));
            }
        }
        Ok(Self { values })
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(|k| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Values laid out in schema order after an exact key-set check
    pub fn to_ordered(&self, schema: &FeatureSchema) -> ScoutResult<Vec<f64>> {
        schema.check(self)?;
        Ok(schema
            .names()
            .iter()
            .filter_map(|n| self.values.get(n).copied())
            .collect())
    }

    /// Keep only the schema's features; fails if one of them is absent
    pub fn select(&self, schema: &FeatureSchema) -> ScoutResult<FeatureVector> {
        let missing: Vec<String> = schema
            .names()
            .iter()
            .filter(|n| !self.values.contains_key(n.as_str()))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(ScoutError::SchemaMismatch {
                missing,
                unexpected: Vec::new(),
            });
        }
        Ok(FeatureVector {
            values: schema
                .names()
                .iter()
                .filter_map(|n| self.values.get_key_value(n))
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
        })
    }

    /// Copy without the named features
    pub fn without(&self, drop: &[String]) -> FeatureVector {
        FeatureVector {
            values: self
                .values
                .iter()
                .filter(|(k, _)| !drop.contains(*k))
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_schema_has_22_features() {
        let schema = FeatureSchema::standard();
        assert_eq!(schema.len(), 22);
        assert_eq!(schema.index_of("elevation"), Some(0));
        assert_eq!(schema.index_of("edi"), Some(21));
    }

    #[test]
    fn test_non_finite_rejected() {
        assert!(FeatureVector::from_pairs(vec![("slope", f64::NAN)]).is_err());
        assert!(FeatureVector::from_pairs(vec![("slope", 1.0), ("slope", 2.0)]).is_err());
    }

    #[test]
    fn test_schema_check_reports_both_sides() {
        let schema = FeatureSchema::new(vec!["a".into(), "b".into()]).unwrap();
        let v = FeatureVector::from_pairs(vec![("a", 1.0), ("c", 2.0)]).unwrap();
        match schema.check(&v) {
            Err(ScoutError::SchemaMismatch { missing, unexpected }) => {
                assert_eq!(missing, vec!["b".to_string()]);
                assert_eq!(unexpected, vec!["c".to_string()]);
            }
            other => panic!("expected schema mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_ordered_layout_follows_schema() {
        let schema = FeatureSchema::new(vec!["z".into(), "a".into()]).unwrap();
        let v = FeatureVector::from_pairs(vec![("a", 1.0), ("z", 26.0)]).unwrap();
        assert_eq!(v.to_ordered(&schema).unwrap(), vec![26.0, 1.0]);
    }

    #[test]
    fn test_select_projects_by_name() {
        let schema = FeatureSchema::new(vec!["b".into()]).unwrap();
        let v = FeatureVector::from_pairs(vec![("a", 1.0), ("b", 2.0)]).unwrap();
        let projected = v.select(&schema).unwrap();
        assert_eq!(projected.len(), 1);
        assert_eq!(projected.get("b"), Some(2.0));
    }
}
