use serde::{Deserialize, Serialize};

/// Mean Earth radius used for metric distances (meters)
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Meters per degree of latitude (WGS84 mean)
pub const METERS_PER_DEGREE_LAT: f64 = 110_574.0;

/// Meters per degree of longitude at the equator
pub const METERS_PER_DEGREE_LON_EQUATOR: f64 = 111_320.0;

/// Geographic point (WGS84 degrees)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Great-circle distance in meters (haversine)
    pub fn distance_m(&self, other: &GeoPoint) -> f64 {
        let phi1 = self.lat.to_radians();
        let phi2 = other.lat.to_radians();
        let dphi = phi2 - phi1;
        let dlambda = (other.lon - self.lon).to_radians();

        let a = (dphi / 2.0).sin().powi(2)
            + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_M * a.sqrt().clamp(0.0, 1.0).asin()
    }

    /// Move by a metric offset using a local equirectangular approximation.
    /// Adequate for the few-kilometre offsets used by negative sampling.
    pub fn offset_m(&self, north_m: f64, east_m: f64) -> GeoPoint {
        let dlat = north_m / METERS_PER_DEGREE_LAT;
        let lon_scale = METERS_PER_DEGREE_LON_EQUATOR * self.lat.to_radians().cos();
        let dlon = if lon_scale.abs() > 1e-9 { east_m / lon_scale } else { 0.0 };
        GeoPoint::new(self.lat + dlat, self.lon + dlon)
    }

    pub fn is_finite(&self) -> bool {
        self.lat.is_finite() && self.lon.is_finite()
    }
}

impl std::fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.6}, {:.6})", self.lat, self.lon)
    }
}

/// Geospatial bounding box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    pub fn new(min_lon: f64, max_lon: f64, min_lat: f64, max_lat: f64) -> Self {
        Self { min_lon, max_lon, min_lat, max_lat }
    }

    /// Smallest box containing every point, `None` for an empty slice
    pub fn from_points(points: &[GeoPoint]) -> Option<Self> {
        let first = points.first()?;
        let mut bbox = BoundingBox::new(first.lon, first.lon, first.lat, first.lat);
        for p in &points[1..] {
            bbox.min_lon = bbox.min_lon.min(p.lon);
            bbox.max_lon = bbox.max_lon.max(p.lon);
            bbox.min_lat = bbox.min_lat.min(p.lat);
            bbox.max_lat = bbox.max_lat.max(p.lat);
        }
        Some(bbox)
    }

    /// Closed-interval containment
    pub fn contains(&self, point: &GeoPoint) -> bool {
        point.lon >= self.min_lon
            && point.lon <= self.max_lon
            && point.lat >= self.min_lat
            && point.lat <= self.max_lat
    }

    pub fn intersects(&self, other: &BoundingBox) -> bool {
        !(self.min_lon > other.max_lon
            || self.max_lon < other.min_lon
            || self.min_lat > other.max_lat
            || self.max_lat < other.min_lat)
    }

    pub fn width(&self) -> f64 {
        self.max_lon - self.min_lon
    }

    pub fn height(&self) -> f64 {
        self.max_lat - self.min_lat
    }

    /// Area in square degrees
    pub fn area(&self) -> f64 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    pub fn is_valid(&self) -> bool {
        self.min_lon.is_finite()
            && self.max_lon.is_finite()
            && self.min_lat.is_finite()
            && self.max_lat.is_finite()
            && self.min_lon <= self.max_lon
            && self.min_lat <= self.max_lat
    }
}

/// Geospatial transformation parameters (GDAL coefficient order)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// North-up transform without rotation
    pub fn north_up(top_left_x: f64, top_left_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            top_left_x,
            pixel_width,
            rotation_x: 0.0,
            top_left_y,
            rotation_y: 0.0,
            pixel_height,
        }
    }

    pub fn from_gdal(coeffs: [f64; 6]) -> Self {
        Self {
            top_left_x: coeffs[0],
            pixel_width: coeffs[1],
            rotation_x: coeffs[2],
            top_left_y: coeffs[3],
            rotation_y: coeffs[4],
            pixel_height: coeffs[5],
        }
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.top_left_x,
            self.pixel_width,
            self.rotation_x,
            self.top_left_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }

    pub fn determinant(&self) -> f64 {
        self.pixel_width * self.pixel_height - self.rotation_x * self.rotation_y
    }

    pub fn is_invertible(&self) -> bool {
        let det = self.determinant();
        det.is_finite() && det.abs() > 1e-18
    }

    /// Geographic coordinates of a fractional pixel position
    pub fn apply(&self, row: f64, col: f64) -> (f64, f64) {
        let x = self.top_left_x + col * self.pixel_width + row * self.rotation_x;
        let y = self.top_left_y + col * self.rotation_y + row * self.pixel_height;
        (x, y)
    }

    /// Fractional (row, col) for a geographic position, `None` for a singular transform
    pub fn invert(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        if !self.is_invertible() {
            return None;
        }
        let det = self.determinant();
        let dx = x - self.top_left_x;
        let dy = y - self.top_left_y;
        let col = (self.pixel_height * dx - self.rotation_x * dy) / det;
        let row = (-self.rotation_y * dx + self.pixel_width * dy) / det;
        Some((row, col))
    }

    /// Approximate ground spacing (x, y) in meters at a latitude, for degree-based transforms
    pub fn ground_spacing_m(&self, latitude: f64) -> (f64, f64) {
        let x_deg = self.pixel_width.hypot(self.rotation_y);
        let y_deg = self.pixel_height.hypot(self.rotation_x);
        let dx = x_deg * METERS_PER_DEGREE_LON_EQUATOR * latitude.to_radians().cos().abs();
        let dy = y_deg * METERS_PER_DEGREE_LAT;
        (dx, dy)
    }
}

/// Error types for the discovery pipeline
#[derive(Debug, thiserror::Error)]
pub enum ScoutError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Data access error: {0}")]
    DataAccess(String),

    #[error("Coverage error: {0}")]
    Coverage(String),

    #[error("Feature quality error: {message} ({})", .features.join(", "))]
    FeatureQuality {
        message: String,
        features: Vec<String>,
    },

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Schema mismatch: missing [{}], unexpected [{}]", .missing.join(", "), .unexpected.join(", "))]
    SchemaMismatch {
        missing: Vec<String>,
        unexpected: Vec<String>,
    },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("XML parsing error: {0}")]
    XmlParsing(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Result type for pipeline operations
pub type ScoutResult<T> = Result<T, ScoutError>;

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_transform_roundtrip() {
        let gt = GeoTransform::north_up(-61.0, -9.0, 0.00025, -0.00025);
        let (x, y) = gt.apply(10.5, 20.5);
        let (row, col) = gt.invert(x, y).unwrap();
        assert_relative_eq!(row, 10.5, epsilon = 1e-9);
        assert_relative_eq!(col, 20.5, epsilon = 1e-9);
    }

    #[test]
    fn test_singular_transform() {
        let gt = GeoTransform::north_up(0.0, 0.0, 0.0, -1.0);
        assert!(!gt.is_invertible());
        assert!(gt.invert(1.0, 1.0).is_none());
    }

    #[test]
    fn test_distance_and_offset() {
        let origin = GeoPoint::new(-10.0, -67.0);
        let moved = origin.offset_m(3000.0, 4000.0);
        let d = origin.distance_m(&moved);
        assert!((d - 5000.0).abs() < 25.0, "distance was {}", d);
    }

    #[test]
    fn test_bbox_from_points() {
        let pts = vec![GeoPoint::new(-10.0, -67.0), GeoPoint::new(-9.5, -68.0)];
        let bbox = BoundingBox::from_points(&pts).unwrap();
        assert_eq!(bbox.min_lon, -68.0);
        assert_eq!(bbox.max_lat, -9.5);
        assert!(bbox.contains(&GeoPoint::new(-9.8, -67.5)));
        assert!(BoundingBox::from_points(&[]).is_none());
    }
}
