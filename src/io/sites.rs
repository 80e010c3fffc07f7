use crate::types::{GeoPoint, ScoutError, ScoutResult};
use quick_xml::de::from_str;
use serde::Deserialize;
use std::path::Path;

/// Root `<kml>` element
#[derive(Debug, Deserialize)]
pub struct KmlRoot {
    #[serde(rename = "Document")]
    pub document: KmlContainer,
}

/// `<Document>` or `<Folder>`: placemarks plus nested folders
#[derive(Debug, Default, Deserialize)]
pub struct KmlContainer {
    #[serde(rename = "Placemark", default)]
    pub placemarks: Vec<Placemark>,
    #[serde(rename = "Folder", default)]
    pub folders: Vec<KmlContainer>,
}

#[derive(Debug, Deserialize)]
pub struct Placemark {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "Point", default)]
    pub point: Option<KmlPoint>,
}

#[derive(Debug, Deserialize)]
pub struct KmlPoint {
    pub coordinates: String,
}

/// Known sites plus the number of records that could not be used
#[derive(Debug, Clone)]
pub struct SiteList {
    pub points: Vec<GeoPoint>,
    pub skipped: usize,
}

/// Loader for known archaeological site coordinates
pub struct SiteReader;

impl SiteReader {
    /// Read point placemarks from a KML file
    pub fn read_kml<P: AsRef<Path>>(path: P) -> ScoutResult<SiteList> {
        let path = path.as_ref();
        log::info!("Loading known sites from KML: {}", path.display());
        let content = std::fs::read_to_string(path)?;
        Self::parse_kml(&content)
    }

    /// Parse KML text; placemarks without a usable `<Point>` are skipped and counted.
    pub fn parse_kml(xml_content: &str) -> ScoutResult<SiteList> {
        let root = from_str::<KmlRoot>(xml_content)
            .map_err(|e| ScoutError::XmlParsing(format!("Failed to parse KML: {}", e)))?;

        let mut points = Vec::new();
        let mut skipped = 0usize;
        collect_placemarks(&root.document, &mut points, &mut skipped);

        if skipped > 0 {
            log::warn!("Skipped {} placemarks without valid point coordinates", skipped);
        }
        log::info!("Parsed {} known sites", points.len());
        Ok(SiteList { points, skipped })
    }

    /// Read a CSV with `lat` and `lon` (or `latitude`/`longitude`) columns
    pub fn read_csv<P: AsRef<Path>>(path: P) -> ScoutResult<SiteList> {
        let path = path.as_ref();
        log::info!("Loading known sites from CSV: {}", path.display());
        let mut reader = csv::Reader::from_path(path)?;
        let headers = reader.headers()?.clone();

        let find = |names: &[&str]| {
            headers
                .iter()
                .position(|h| names.iter().any(|n| h.trim().eq_ignore_ascii_case(n)))
        };
        let lat_idx = find(&["lat", "latitude", "y"]).ok_or_else(|| {
            ScoutError::DataAccess(format!("No latitude column in {}", path.display()))
        })?;
        let lon_idx = find(&["lon", "lng", "longitude", "x"]).ok_or_else(|| {
            ScoutError::DataAccess(format!("No longitude column in {}", path.display()))
        })?;

        let mut points = Vec::new();
        let mut skipped = 0usize;
        for record in reader.records() {
            let record = record?;
            let lat = record.get(lat_idx).and_then(|v| v.trim().parse::<f64>().ok());
            let lon = record.get(lon_idx).and_then(|v| v.trim().parse::<f64>().ok());
            match (lat, lon) {
                (Some(lat), Some(lon)) if valid_coordinate(lat, lon) => {
                    points.push(GeoPoint::new(lat, lon))
                }
                _ => skipped += 1,
            }
        }

        log::info!("Parsed {} known sites ({} skipped)", points.len(), skipped);
        Ok(SiteList { points, skipped })
    }
}

fn collect_placemarks(container: &KmlContainer, points: &mut Vec<GeoPoint>, skipped: &mut usize) {
    for placemark in &container.placemarks {
        match placemark.point.as_ref().and_then(|p| parse_coordinates(&p.coordinates)) {
            Some(point) => points.push(point),
            None => {
                log::debug!("Placemark {:?} has no usable point", placemark.name);
                *skipped += 1;
            }
        }
    }
    for folder in &container.folders {
        collect_placemarks(folder, points, skipped);
    }
}

/// KML coordinates are `lon,lat[,alt]`
fn parse_coordinates(text: &str) -> Option<GeoPoint> {
    let mut parts = text.trim().split(',');
    let lon: f64 = parts.next()?.trim().parse().ok()?;
    let lat: f64 = parts.next()?.trim().parse().ok()?;
    if valid_coordinate(lat, lon) {
        Some(GeoPoint::new(lat, lon))
    } else {
        None
    }
}

fn valid_coordinate(lat: f64, lon: f64) -> bool {
    lat.is_finite() && lon.is_finite() && (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon)
}
