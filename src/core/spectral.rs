//! Spectral indices of scaled surface reflectance.
//!
//! Each index is a pure function returning `None` when an input is not
//! finite or the denominator vanishes.

use num_traits::Float;
use serde::{Deserialize, Serialize};

/// SAVI soil brightness correction factor
pub const SAVI_L: f64 = 0.5;

/// Reflectances of one pixel on one date
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reflectance {
    pub blue: f64,
    pub red: f64,
    pub red_edge: f64,
    pub nir: f64,
    pub swir1: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpectralIndex {
    Ndvi,
    Evi2,
    Savi,
    Ndre,
    Bsi,
    Sci,
    Edi,
}

impl SpectralIndex {
    pub const ALL: [SpectralIndex; 7] = [
        SpectralIndex::Ndvi,
        SpectralIndex::Evi2,
        SpectralIndex::Savi,
        SpectralIndex::Ndre,
        SpectralIndex::Bsi,
        SpectralIndex::Sci,
        SpectralIndex::Edi,
    ];

    /// Feature name of the index's temporal-mean composite
    pub fn name(&self) -> &'static str {
        match self {
            SpectralIndex::Ndvi => "ndvi",
            SpectralIndex::Evi2 => "evi2",
            SpectralIndex::Savi => "savi",
            SpectralIndex::Ndre => "ndre",
            SpectralIndex::Bsi => "bsi",
            SpectralIndex::Sci => "sci",
            SpectralIndex::Edi => "edi",
        }
    }

    pub fn is_vegetation(&self) -> bool {
        matches!(
            self,
            SpectralIndex::Ndvi | SpectralIndex::Evi2 | SpectralIndex::Savi | SpectralIndex::Ndre
        )
    }

    pub fn compute(&self, r: &Reflectance) -> Option<f64> {
        match self {
            SpectralIndex::Ndvi => ndvi(r.nir, r.red),
            SpectralIndex::Evi2 => evi2(r.nir, r.red),
            SpectralIndex::Savi => savi(r.nir, r.red),
            SpectralIndex::Ndre => ndre(r.nir, r.red_edge),
            SpectralIndex::Bsi => bsi(r.blue, r.red, r.nir, r.swir1),
            SpectralIndex::Sci => sci(r.swir1, r.nir),
            SpectralIndex::Edi => edi(r.blue, r.red, r.nir, r.swir1),
        }
    }
}

/// (a - b) / (a + b)
pub fn normalized_difference<F: Float>(a: F, b: F) -> Option<F> {
    ratio(a - b, a + b)
}

fn ratio<F: Float>(num: F, den: F) -> Option<F> {
    if !num.is_finite() || !den.is_finite() || den.abs() < F::epsilon() {
        return None;
    }
    let v = num / den;
    if v.is_finite() {
        Some(v)
    } else {
        None
    }
}

pub fn ndvi(nir: f64, red: f64) -> Option<f64> {
    normalized_difference(nir, red)
}

/// Two-band enhanced vegetation index
pub fn evi2(nir: f64, red: f64) -> Option<f64> {
    ratio(2.5 * (nir - red), nir + 2.4 * red + 1.0)
}

/// Soil-adjusted vegetation index
pub fn savi(nir: f64, red: f64) -> Option<f64> {
    ratio((1.0 + SAVI_L) * (nir - red), nir + red + SAVI_L)
}

/// Normalized difference red-edge index
pub fn ndre(nir: f64, red_edge: f64) -> Option<f64> {
    normalized_difference(nir, red_edge)
}

/// Bare soil index
pub fn bsi(blue: f64, red: f64, nir: f64, swir1: f64) -> Option<f64> {
    normalized_difference(swir1 + red, nir + blue)
}

/// Soil composition index
pub fn sci(swir1: f64, nir: f64) -> Option<f64> {
    normalized_difference(swir1, nir)
}

/// Earthwork detection index: half the difference of BSI and NDVI
pub fn edi(blue: f64, red: f64, nir: f64, swir1: f64) -> Option<f64> {
    Some((bsi(blue, red, nir, swir1)? - ndvi(nir, red)?) / 2.0)
}
