use approx::assert_abs_diff_eq;
use geoglyph_scout::core::topographic::{TopographicExtractor, TopographicParams, TPI_RADII};
use geoglyph_scout::io::RasterTile;
use geoglyph_scout::types::GeoTransform;
use ndarray::Array2;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn dem_tile(dem: Array2<f64>) -> RasterTile {
    // 1 arc-second pixels in western Amazonia
    let transform = GeoTransform::north_up(-67.5, -9.8, 1.0 / 3600.0, -1.0 / 3600.0);
    RasterTile::single_band(dem, transform, Some(-9999.0)).expect("Failed to build DEM tile")
}

fn rolling_terrain(rows: usize, cols: usize) -> Array2<f64> {
    Array2::from_shape_fn((rows, cols), |(i, j)| {
        let (x, y) = (j as f64, i as f64);
        180.0 + 6.0 * (x / 9.0).sin() + 4.0 * (y / 13.0).cos() + 0.02 * x * y
    })
}

#[test]
fn test_plateau_tpi_scenario() {
    init_logging();

    let mut dem = Array2::from_elem((100, 100), 150.0);
    for i in 48..53 {
        for j in 48..53 {
            dem[[i, j]] = 152.0;
        }
    }

    let surfaces = TopographicExtractor::standard()
        .extract(&dem_tile(dem))
        .expect("Topographic extraction failed");

    for radius in TPI_RADII {
        let name = format!("tpi_r{}", radius);
        let tpi = surfaces.get(&name).expect("Missing TPI surface");
        let centre = tpi[[50, 50]];
        println!("{}: centre {:.4}, corner-most valid {:.4}", name, centre, tpi[[radius, radius]]);

        // corners sit inside the edge margin
        assert!(tpi[[0, 0]].is_nan());
        assert!(tpi[[99, 99]].is_nan());
        assert!(centre > tpi[[radius, radius]]);
        assert!(centre > tpi[[99 - radius, 99 - radius]]);
        assert!(centre > 0.0);
    }

    // 7x7 window holds the 25 plateau pixels
    let tpi_r3 = surfaces.get("tpi_r3").unwrap();
    assert_abs_diff_eq!(tpi_r3[[50, 50]], 1.0, epsilon = 1e-9);

    let anomaly = surfaces.get("topo_anomaly").unwrap();
    assert!(anomaly[[50, 50]] > 0.0);
}

#[test]
fn test_slope_aspect_invariant_under_offset() {
    init_logging();

    let dem = rolling_terrain(60, 60);
    let shifted = dem.mapv(|z| z + 1234.5);

    let extractor = TopographicExtractor::standard();
    let base = extractor.extract(&dem_tile(dem)).unwrap();
    let moved = extractor.extract(&dem_tile(shifted)).unwrap();

    let (slope_a, slope_b) = (base.get("slope").unwrap(), moved.get("slope").unwrap());
    let (aspect_a, aspect_b) = (base.get("aspect").unwrap(), moved.get("aspect").unwrap());
    let mut compared = 0;
    for ((idx, sa), sb) in slope_a.indexed_iter().zip(slope_b.iter()) {
        if sa.is_nan() {
            assert!(sb.is_nan(), "slope validity differs at {:?}", idx);
            continue;
        }
        assert_abs_diff_eq!(*sa, *sb, epsilon = 1e-6);

        let diff = (aspect_a[idx] - aspect_b[idx]).abs();
        assert!(diff.min(360.0 - diff) < 1e-4, "aspect differs at {:?}", idx);
        compared += 1;
    }
    assert_eq!(compared, 58 * 58);
}

#[test]
fn test_nodata_hole_propagates_to_neighbourhood() {
    init_logging();

    let mut dem = rolling_terrain(50, 50);
    dem[[25, 25]] = -9999.0;
    let surfaces = TopographicExtractor::new(TopographicParams {
        anomaly_sigma: 2.0,
        ..Default::default()
    })
    .extract(&dem_tile(dem))
    .unwrap();

    let slope = surfaces.get("slope").unwrap();
    assert!(slope[[25, 25]].is_nan());
    assert!(slope[[24, 26]].is_nan());
    assert!(slope[[25, 27]].is_finite());

    let tpi = surfaces.get("tpi_r7").unwrap();
    assert!(tpi[[30, 30]].is_nan());
    assert!(tpi[[25, 33]].is_finite());

    assert!(surfaces.get("elevation").unwrap()[[25, 25]].is_nan());
    assert_eq!(surfaces.names().len(), 9);
}

#[test]
fn test_flat_tile_has_no_aspect() {
    init_logging();

    let surfaces = TopographicExtractor::standard()
        .extract(&dem_tile(Array2::from_elem((20, 20), 90.0)))
        .unwrap();
    assert_eq!(surfaces.get("slope").unwrap()[[10, 10]], 0.0);
    assert_eq!(surfaces.get("aspect").unwrap()[[10, 10]], -1.0);
    assert_eq!(surfaces.get("plan_curvature").unwrap()[[10, 10]], 0.0);
}
