//! I/O modules for reading elevation and optical rasters and known site lists

pub mod raster;
pub mod series;
pub mod catalog;
pub mod sites;

pub use raster::{BandSelector, RasterReader, RasterTile, Sample};
pub use series::{BandLayout, DateSeries, DatedTile, SkippedDate};
pub use catalog::{parse_fabdem_tile, parse_hls_scene_id, TileCatalog, TileEntry, TileSelection};
pub use sites::{SiteList, SiteReader};
