//! Finding the population raster for a country
//!
//! Rasters live in one folder per country under the population root:
//! `<root>/<iso3 lowercase>/<iso3 lowercase>_pop_<year>_CN_100m_R2025A_v1.tif`.
//! Other releases of the same year are accepted by prefix, and as a last
//! resort any GeoTIFF in the folder. Countries without a raster of their
//! own can borrow a neighbour's through the configured fallback map.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Outcome of a raster lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RasterLocation {
    /// The country's own raster
    Own(PathBuf),
    /// Raster of another country that covers this one
    Fallback { source: String, path: PathBuf },
    /// Nothing usable on disk
    Missing,
}

impl RasterLocation {
    pub fn path(&self) -> Option<&Path> {
        match self {
            RasterLocation::Own(path) | RasterLocation::Fallback { path, .. } => Some(path),
            RasterLocation::Missing => None,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, RasterLocation::Fallback { .. })
    }
}

/// Locate the raster to overlay for `iso3`
///
/// # Arguments
/// * `population_dir` - Root folder holding one sub-folder per country
/// * `iso3` - Country code (any case)
/// * `year` - Reference year of the dataset
/// * `fallbacks` - Country to raster-owner map, consulted only when the
///   country has no raster of its own
pub fn locate_raster(
    population_dir: &Path,
    iso3: &str,
    year: i32,
    fallbacks: &BTreeMap<String, String>,
) -> RasterLocation {
    let iso3 = iso3.to_uppercase();
    if let Some(path) = find_country_raster(population_dir, &iso3, year) {
        return RasterLocation::Own(path);
    }

    if let Some(source) = fallbacks.get(&iso3) {
        let source = source.to_uppercase();
        if let Some(path) = find_country_raster(population_dir, &source, year) {
            debug!(country = %iso3, source = %source, "Using fallback raster");
            return RasterLocation::Fallback { source, path };
        }
    }

    RasterLocation::Missing
}

fn find_country_raster(population_dir: &Path, iso3: &str, year: i32) -> Option<PathBuf> {
    let lower = iso3.to_lowercase();
    let folders = [population_dir.join(&lower), population_dir.join(iso3)];

    let exact_name = format!("{}_pop_{}_CN_100m_R2025A_v1.tif", lower, year);
    for folder in folders.iter().filter(|f| f.is_dir()) {
        let exact = folder.join(&exact_name);
        if exact.is_file() {
            return Some(exact);
        }
    }

    let prefix = format!("{}_pop_{}_", lower, year);
    for folder in folders.iter().filter(|f| f.is_dir()) {
        let tifs = list_tifs(folder);
        if let Some(path) = tifs.iter().find(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.to_lowercase().starts_with(&prefix))
        }) {
            return Some(path.clone());
        }
        if let Some(first) = tifs.into_iter().next() {
            return Some(first);
        }
    }
    None
}

/// `.tif` / `.tiff` files of a folder in name order
fn list_tifs(folder: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(folder) else {
        return Vec::new();
    };
    let mut tifs: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("tif") || e.eq_ignore_ascii_case("tiff"))
        })
        .collect();
    tifs.sort();
    tifs
}
