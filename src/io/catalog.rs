use crate::types::{BoundingBox, GeoPoint, ScoutError, ScoutResult};
use chrono::NaiveDate;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

static FABDEM_NAME: OnceLock<Option<Regex>> = OnceLock::new();
static HLS_SCENE_ID: OnceLock<Option<Regex>> = OnceLock::new();

/// A 1x1 degree elevation tile known by its file name
#[derive(Debug, Clone)]
pub struct TileEntry {
    pub id: String,
    pub path: PathBuf,
    pub bounds: BoundingBox,
}

/// Tile together with the known sites that fall inside it
#[derive(Debug, Clone)]
pub struct PrioritizedTile {
    pub entry: TileEntry,
    pub site_count: usize,
    pub cumulative_coverage: f64,
}

/// Outcome of density-based tile selection
#[derive(Debug, Clone)]
pub struct TileSelection {
    /// All overlapping tiles, densest first
    pub ranked: Vec<PrioritizedTile>,
    /// How many of `ranked` to process
    pub selected_count: usize,
    /// Fraction of overlapping sites covered by the selected tiles
    pub coverage: f64,
}

impl TileSelection {
    pub fn selected(&self) -> &[PrioritizedTile] {
        &self.ranked[..self.selected_count]
    }
}

/// Parse a FABDEM tile name such as `S01W061_FABDEM_V1-2.tif`.
///
/// The name encodes the south-west corner; each tile spans one degree.
pub fn parse_fabdem_tile(name: &str) -> Option<BoundingBox> {
    let re = FABDEM_NAME
        .get_or_init(|| Regex::new(r"^([NS])(\d{1,2})([EW])(\d{1,3})_FABDEM_V[\d-]+\.tif$").ok())
        .as_ref()?;
    let caps = re.captures(name)?;
    let lat: f64 = caps[2].parse().ok()?;
    let lon: f64 = caps[4].parse().ok()?;
    let south = if &caps[1] == "S" { -lat } else { lat };
    let west = if &caps[3] == "W" { -lon } else { lon };
    Some(BoundingBox::new(west, west + 1.0, south, south + 1.0))
}

/// Parse an HLS scene identifier such as `HLS.S30.T20LKP.2023123T141741.v2.0`
/// into the MGRS tile and the acquisition date (year + day of year).
pub fn parse_hls_scene_id(name: &str) -> Option<(String, NaiveDate)> {
    let re = HLS_SCENE_ID
        .get_or_init(|| Regex::new(r"(?i)HLS[._-][LS]30[._-](T\d{2}[A-Z]{3})[._-](\d{4})(\d{3})T\d{6}").ok())
        .as_ref()?;
    let caps = re.captures(name)?;
    let tile = caps[1].to_uppercase();
    let year: i32 = caps[2].parse().ok()?;
    let doy: u32 = caps[3].parse().ok()?;
    let date = NaiveDate::from_yo_opt(year, doy)?;
    Some((tile, date))
}

/// Set of elevation tiles addressed by tile identifier
#[derive(Debug, Clone, Default)]
pub struct TileCatalog {
    entries: Vec<TileEntry>,
}

impl TileCatalog {
    /// Build a catalog from file paths; names that do not parse are skipped and returned.
    pub fn from_paths<P: AsRef<Path>>(paths: &[P]) -> (Self, Vec<PathBuf>) {
        let mut entries = Vec::new();
        let mut unrecognized = Vec::new();

        for path in paths {
            let path = path.as_ref();
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            match parse_fabdem_tile(name) {
                Some(bounds) => entries.push(TileEntry {
                    id: name.trim_end_matches(".tif").to_string(),
                    path: path.to_path_buf(),
                    bounds,
                }),
                None => {
                    log::warn!("Unrecognized elevation tile name: {}", path.display());
                    unrecognized.push(path.to_path_buf());
                }
            }
        }

        entries.sort_by(|a, b| a.id.cmp(&b.id));
        log::info!("Catalogued {} elevation tiles", entries.len());
        (Self { entries }, unrecognized)
    }

    pub fn entries(&self) -> &[TileEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Tiles whose bounds intersect the bounding box of the sites
    pub fn overlapping(&self, sites: &[GeoPoint]) -> Vec<&TileEntry> {
        let bbox = match BoundingBox::from_points(sites) {
            Some(b) => b,
            None => return Vec::new(),
        };
        self.entries
            .iter()
            .filter(|e| e.bounds.intersects(&bbox))
            .collect()
    }

    /// Rank tiles by site density and choose how many to process.
    ///
    /// The selection is the larger of the tile count reaching `coverage_target`
    /// of all sites and the number of tiles holding at least `dense_tile_sites`
    /// sites. Tiles without sites are never selected.
    pub fn prioritize(
        &self,
        sites: &[GeoPoint],
        coverage_target: f64,
        dense_tile_sites: usize,
    ) -> ScoutResult<TileSelection> {
        if !(0.0..=1.0).contains(&coverage_target) {
            return Err(ScoutError::InvalidParameter(format!(
                "coverage_target must be in [0, 1], got {}",
                coverage_target
            )));
        }

        let mut counted: Vec<(TileEntry, usize)> = self
            .entries
            .iter()
            .map(|e| {
                let n = sites.iter().filter(|p| e.bounds.contains(p)).count();
                (e.clone(), n)
            })
            .filter(|(_, n)| *n > 0)
            .collect();

        if counted.is_empty() {
            return Err(ScoutError::Coverage(format!(
                "None of {} catalogued tiles contains any of {} known sites",
                self.entries.len(),
                sites.len()
            )));
        }

        // densest first, id as a stable tie-break
        counted.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.id.cmp(&b.0.id)));

        let total: usize = counted.iter().map(|(_, n)| n).sum();
        let mut cumulative = 0usize;
        let mut reach_target = 0usize;
        let mut dense = 0usize;
        let mut ranked = Vec::with_capacity(counted.len());

        for (i, (entry, n)) in counted.into_iter().enumerate() {
            cumulative += n;
            let coverage = cumulative as f64 / total as f64;
            if reach_target == 0 && coverage >= coverage_target {
                reach_target = i + 1;
            }
            if n >= dense_tile_sites {
                dense = i + 1;
            }
            ranked.push(PrioritizedTile {
                entry,
                site_count: n,
                cumulative_coverage: coverage,
            });
        }

        let selected_count = reach_target.max(dense).max(1).min(ranked.len());
        let coverage = ranked[selected_count - 1].cumulative_coverage;

        log::info!(
            "Selected {} of {} tiles covering {:.1}% of {} sites",
            selected_count,
            ranked.len(),
            coverage * 100.0,
            total
        );

        Ok(TileSelection {
            ranked,
            selected_count,
            coverage,
        })
    }
}
