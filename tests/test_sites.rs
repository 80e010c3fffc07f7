use geoglyph_scout::io::SiteReader;
use geoglyph_scout::types::{GeoPoint, ScoutError};
use std::fs;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn test_read_kml_file() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sites.kml");
    fs::write(
        &path,
        r#"<?xml version="1.0" encoding="UTF-8"?>
<kml xmlns="http://www.opengis.net/kml/2.2">
  <Document>
    <Placemark><name>Fazenda Colorada</name><Point><coordinates>-67.3312,-9.8741,0</coordinates></Point></Placemark>
    <Placemark><name>Jacó Sá</name><Point><coordinates>-67.2911,-9.9350</coordinates></Point></Placemark>
    <Placemark><name>Polygon only</name></Placemark>
  </Document>
</kml>"#,
    )
    .unwrap();

    let sites = SiteReader::read_kml(&path).expect("Failed to read KML");
    println!("Loaded {} sites, skipped {}", sites.points.len(), sites.skipped);
    assert_eq!(sites.points.len(), 2);
    assert_eq!(sites.skipped, 1);
    assert_eq!(sites.points[1], GeoPoint::new(-9.9350, -67.2911));
}

#[test]
fn test_malformed_kml_is_reported() {
    init_logging();
    let result = SiteReader::parse_kml("<kml><Document><Placemark>");
    assert!(matches!(result, Err(ScoutError::XmlParsing(_))));
}

#[test]
fn test_read_csv_file() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sites.csv");
    fs::write(
        &path,
        "name,Latitude,Longitude\n\
         a,-9.87,-67.33\n\
         b,not-a-number,-67.10\n\
         c,-95.0,-67.10\n\
         d,-10.02,-67.61\n",
    )
    .unwrap();

    let sites = SiteReader::read_csv(&path).expect("Failed to read CSV");
    assert_eq!(sites.points, vec![GeoPoint::new(-9.87, -67.33), GeoPoint::new(-10.02, -67.61)]);
    assert_eq!(sites.skipped, 2);
}

#[test]
fn test_csv_without_coordinates_rejected() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sites.csv");
    fs::write(&path, "name,elevation\na,210\n").unwrap();
    assert!(matches!(SiteReader::read_csv(&path), Err(ScoutError::DataAccess(_))));
}
