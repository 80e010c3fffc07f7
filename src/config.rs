//! Run configuration aggregating every processor's parameters.

use crate::core::classifier::{BoostingParams, CrossValidationParams};
use crate::core::features::ExtractionParams;
use crate::core::hotspot::ScanParams;
use crate::core::quality::QualityParams;
use crate::core::sampling::SamplingParams;
use crate::types::{ScoutError, ScoutResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Every tunable of a discovery run; absent sections take their defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub extraction: ExtractionParams,
    pub quality: QualityParams,
    pub sampling: SamplingParams,
    pub boosting: BoostingParams,
    pub cross_validation: CrossValidationParams,
    pub scan: ScanParams,
}

impl DiscoveryConfig {
    pub fn from_json_str(json: &str) -> ScoutResult<Self> {
        let config: DiscoveryConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> ScoutResult<Self> {
        log::debug!("Reading configuration from {}", path.as_ref().display());
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&content)
    }

    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> ScoutResult<()> {
        fs::write(path.as_ref(), serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Check ranges that the processors rely on
    pub fn validate(&self) -> ScoutResult<()> {
        let topo = &self.extraction.topographic;
        if !(topo.anomaly_sigma > 0.0 && topo.anomaly_sigma.is_finite()) {
            return Err(ScoutError::InvalidParameter(format!(
                "anomaly_sigma must be positive, got {}",
                topo.anomaly_sigma
            )));
        }
        if let Some((dx, dy)) = topo.ground_spacing_m {
            if !(dx > 0.0 && dy > 0.0) {
                return Err(ScoutError::InvalidParameter(format!(
                    "ground_spacing_m must be positive, got ({}, {})",
                    dx, dy
                )));
            }
        }
        if self.extraction.temporal.min_valid_dates == 0 {
            return Err(ScoutError::InvalidParameter(
                "min_valid_dates must be at least 1".to_string(),
            ));
        }

        let q = &self.quality;
        if q.min_variance < 0.0 || !(0.0..=1.0).contains(&q.max_correlation) {
            return Err(ScoutError::InvalidParameter(format!(
                "Need min_variance >= 0 and max_correlation in [0, 1], got {} and {}",
                q.min_variance, q.max_correlation
            )));
        }
        if !(0.0..=1.0).contains(&q.min_positive_coverage) {
            return Err(ScoutError::InvalidParameter(format!(
                "min_positive_coverage must be in [0, 1], got {}",
                q.min_positive_coverage
            )));
        }

        self.sampling.validate()?;
        self.boosting.validate()?;
        if self.cross_validation.folds < 2 {
            return Err(ScoutError::InvalidParameter(format!(
                "Cross-validation needs at least 2 folds, got {}",
                self.cross_validation.folds
            )));
        }
        self.scan.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = DiscoveryConfig::from_json_str(
            r#"{"sampling": {"seed": 7}, "scan": {"percentile": 95.0}}"#,
        )
        .unwrap();
        assert_eq!(config.sampling.seed, 7);
        assert_eq!(config.sampling.exclusion_radius_m, 1000.0);
        assert_eq!(config.scan.percentile, 95.0);
        assert_eq!(config.scan.grid_spacing_deg, 0.005);
        assert_eq!(config.boosting.max_depth, 3);
        assert_eq!(config.cross_validation.folds, 5);
        assert_eq!(config.extraction.temporal.min_valid_dates, 2);
    }

    #[test]
    fn test_out_of_range_rejected() {
        let err = DiscoveryConfig::from_json_str(r#"{"cross_validation": {"folds": 1}}"#);
        assert!(matches!(err, Err(ScoutError::InvalidParameter(_))));
        let err = DiscoveryConfig::from_json_str(r#"{"quality": {"max_correlation": 1.5}}"#);
        assert!(err.is_err());
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut config = DiscoveryConfig::default();
        config.boosting.n_estimators = 40;
        config.to_json_file(&path).unwrap();
        assert_eq!(DiscoveryConfig::from_json_file(&path).unwrap(), config);
    }
}
