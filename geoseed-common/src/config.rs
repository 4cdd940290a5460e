//! Pipeline configuration loading
//!
//! Configuration is a TOML document deserialized into [`PipelineConfig`].
//! Every field has a compiled default, so a missing file never prevents
//! startup. Resolution priority for the config file itself:
//! 1. Explicit path (command-line `--config`)
//! 2. `GEOSEED_CONFIG` environment variable
//! 3. Platform config directory (`~/.config/geoseed/config.toml` on Linux)
//! 4. Compiled defaults

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "GEOSEED_CONFIG";

/// Environment variable overriding the data root folder
pub const DATA_ROOT_ENV_VAR: &str = "GEOSEED_DATA_ROOT";

/// Complete pipeline configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub paths: PathsConfig,
    pub boundaries: BoundaryConfig,
    pub population: PopulationConfig,
    pub tiles: TileConfig,
    pub store: StoreConfig,
}

/// Input and output locations
///
/// Unset paths are derived from `data_root`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PathsConfig {
    pub data_root: PathBuf,
    pub boundaries_dir: Option<PathBuf>,
    pub population_dir: Option<PathBuf>,
    pub meta_csv: Option<PathBuf>,
    pub database: Option<PathBuf>,
    pub ledger: Option<PathBuf>,
}

/// Phase 1 tuning
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BoundaryConfig {
    /// Douglas-Peucker tolerance in degrees; 0 disables simplification
    pub simplify_tolerance: f64,
    /// Rows per insert transaction
    pub insert_batch_size: usize,
}

/// Phase 2 tuning
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PopulationConfig {
    pub year: i32,
    /// Nominal raster resolution in metres
    pub resolution_m: i32,
    /// Rows fetched per chunk (one checkpoint per chunk)
    pub fetch_chunk_size: usize,
    /// Polygons aggregated per sub-batch
    pub zonal_batch_size: usize,
    /// Bounding-box pixel count above which the tiled path is used
    pub max_bbox_pixels: u64,
    /// Edge length in pixels of a tiled-path window
    pub tile_pixels: u32,
    /// Relative national-vs-children difference that triggers a warning
    pub validation_tolerance: f64,
    /// Countries without their own raster, mapped to the raster to use
    pub fallback_rasters: BTreeMap<String, String>,
    /// Countries the population dataset does not cover at all
    pub no_coverage: BTreeSet<String>,
}

/// Raster tile loading tuning
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TileConfig {
    pub tile_size: u32,
    pub insert_batch_size: usize,
    /// Drop tiles whose cells are all nodata
    pub skip_empty_tiles: bool,
}

/// Store access tuning
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    /// Upper bound on total backoff for a locked store
    pub max_lock_wait_ms: u64,
    /// Attempts to open the store before giving up
    pub connect_attempts: u32,
    pub busy_timeout_ms: u64,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_root: default_data_root(),
            boundaries_dir: None,
            population_dir: None,
            meta_csv: None,
            database: None,
            ledger: None,
        }
    }
}

impl Default for BoundaryConfig {
    fn default() -> Self {
        Self {
            simplify_tolerance: 0.001,
            insert_batch_size: 50,
        }
    }
}

impl Default for PopulationConfig {
    fn default() -> Self {
        let fallback_rasters = [("VAT", "ITA"), ("XKX", "SRB")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let no_coverage = ["ATA"].into_iter().map(String::from).collect();

        Self {
            year: 2023,
            resolution_m: 100,
            fetch_chunk_size: 2000,
            zonal_batch_size: 50,
            max_bbox_pixels: 400_000_000,
            tile_pixels: 5000,
            validation_tolerance: 0.05,
            fallback_rasters,
            no_coverage,
        }
    }
}

impl Default for TileConfig {
    fn default() -> Self {
        Self {
            tile_size: 256,
            insert_batch_size: 50,
            skip_empty_tiles: false,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_lock_wait_ms: 30_000,
            connect_attempts: 5,
            busy_timeout_ms: 5000,
        }
    }
}

impl PathsConfig {
    pub fn boundaries_dir(&self) -> PathBuf {
        self.boundaries_dir
            .clone()
            .unwrap_or_else(|| self.data_root.join("geoboundaries"))
    }

    pub fn population_dir(&self) -> PathBuf {
        self.population_dir
            .clone()
            .unwrap_or_else(|| self.data_root.join("worldpop"))
    }

    /// Supplementary boundary metadata CSV
    pub fn meta_csv(&self) -> PathBuf {
        self.meta_csv
            .clone()
            .unwrap_or_else(|| self.boundaries_dir().join("geoBoundariesOpen-meta.csv"))
    }

    pub fn database(&self) -> PathBuf {
        self.database
            .clone()
            .unwrap_or_else(|| self.data_root.join("geoseed.db"))
    }

    pub fn ledger(&self) -> PathBuf {
        self.ledger
            .clone()
            .unwrap_or_else(|| self.data_root.join("seed_progress.json"))
    }
}

impl PipelineConfig {
    /// Load configuration following the documented priority order
    ///
    /// # Arguments
    /// * `explicit` - Path given on the command line, if any
    ///
    /// # Returns
    /// Validated configuration. An explicit path that does not exist is an
    /// error; an implicit one falls back to compiled defaults with a warning.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            if !path.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    path.display()
                )));
            }
            return Self::from_file(path);
        }

        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            let path = PathBuf::from(path);
            if path.exists() {
                return Self::from_file(&path);
            }
            warn!(
                "{} points to missing file {}, using defaults",
                CONFIG_ENV_VAR,
                path.display()
            );
        } else if let Some(path) = default_config_path().filter(|p| p.exists()) {
            return Self::from_file(&path);
        }

        info!("No config file found, using compiled defaults");
        let mut config = Self::default();
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a TOML config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&text)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        config.apply_env();
        config.validate()?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(root) = std::env::var(DATA_ROOT_ENV_VAR) {
            self.paths.data_root = PathBuf::from(root);
        }
    }

    /// Reject values that would make the pipeline loop or divide by zero
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("boundaries.insert_batch_size", self.boundaries.insert_batch_size),
            ("population.fetch_chunk_size", self.population.fetch_chunk_size),
            ("population.zonal_batch_size", self.population.zonal_batch_size),
            ("population.tile_pixels", self.population.tile_pixels as usize),
            ("tiles.tile_size", self.tiles.tile_size as usize),
            ("tiles.insert_batch_size", self.tiles.insert_batch_size),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(Error::Config(format!("{} must be greater than 0", name)));
            }
        }

        if self.boundaries.simplify_tolerance < 0.0 {
            return Err(Error::Config(
                "boundaries.simplify_tolerance must not be negative".to_string(),
            ));
        }
        if self.population.max_bbox_pixels == 0 {
            return Err(Error::Config(
                "population.max_bbox_pixels must be greater than 0".to_string(),
            ));
        }
        if self.store.connect_attempts == 0 {
            return Err(Error::Config(
                "store.connect_attempts must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Platform config file location (`<config_dir>/geoseed/config.toml`)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("geoseed").join("config.toml"))
}

/// OS-dependent default data folder
fn default_data_root() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("geoseed"))
        .unwrap_or_else(|| PathBuf::from("./geoseed_data"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_dataset_constants() {
        let config = PipelineConfig::default();
        assert_eq!(config.population.year, 2023);
        assert_eq!(config.population.fetch_chunk_size, 2000);
        assert_eq!(config.population.max_bbox_pixels, 400_000_000);
        assert_eq!(config.population.fallback_rasters.get("VAT").map(String::as_str), Some("ITA"));
        assert!(config.population.no_coverage.contains("ATA"));
        assert_eq!(config.tiles.tile_size, 256);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_derived_paths_follow_data_root() {
        let mut paths = PathsConfig::default();
        paths.data_root = PathBuf::from("/srv/geo");
        assert_eq!(paths.database(), PathBuf::from("/srv/geo/geoseed.db"));
        assert_eq!(
            paths.meta_csv(),
            PathBuf::from("/srv/geo/geoboundaries/geoBoundariesOpen-meta.csv")
        );

        paths.ledger = Some(PathBuf::from("/tmp/ledger.json"));
        assert_eq!(paths.ledger(), PathBuf::from("/tmp/ledger.json"));
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let mut config = PipelineConfig::default();
        config.population.zonal_batch_size = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }
}
