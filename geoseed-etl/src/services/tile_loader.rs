//! Raster tile loader
//!
//! Slices a country raster into `tile_size` x `tile_size` windows and stores
//! them in `raster_tiles`. A reload first deletes every tile of the
//! (country, year), then inserts in batches, so a crashed load is simply
//! redone from scratch. Countries that borrow another country's raster are
//! not loaded; their owner's tiles already cover them.

use crate::checkpoint::{Ledger, TaskKey, TaskMetrics};
use crate::db::jurisdictions;
use crate::db::raster_tiles::{self, NewRasterTile};
use crate::raster::{locate_raster, GeoTiffRaster, PixelWindow, RasterLocation, RasterMeta, RasterSource};
use crate::selection::Selection;
use crate::utils::retry_on_lock;
use geoseed_common::{Error, PipelineConfig, Result};
use sqlx::SqlitePool;
use std::path::Path;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TileLoadStats {
    pub countries_done: usize,
    pub countries_already_done: usize,
    pub countries_skipped: usize,
    pub countries_failed: usize,
    pub tiles_written: u64,
    pub empty_tiles_skipped: u64,
}

impl TileLoadStats {
    pub fn display_string(&self) -> String {
        format!(
            "{} countries loaded ({} already done, {} skipped, {} failed), {} tiles written, {} empty tiles skipped",
            self.countries_done,
            self.countries_already_done,
            self.countries_skipped,
            self.countries_failed,
            self.tiles_written,
            self.empty_tiles_skipped
        )
    }
}

pub struct TileLoader<'a> {
    pool: &'a SqlitePool,
    config: &'a PipelineConfig,
}

impl<'a> TileLoader<'a> {
    pub fn new(pool: &'a SqlitePool, config: &'a PipelineConfig) -> Self {
        Self { pool, config }
    }

    /// Load tiles for every selected country not yet done
    pub async fn run(&self, ledger: &mut Ledger, selection: &Selection) -> Result<TileLoadStats> {
        let population = &self.config.population;
        let countries = match selection.country_list() {
            Some(list) => list,
            None => jurisdictions::distinct_countries(self.pool).await?,
        };
        info!(countries = countries.len(), "Loading raster tiles");

        let mut stats = TileLoadStats::default();
        for iso3 in countries {
            let key = TaskKey::raster_tiles(&iso3);
            if ledger.is_done(&key) {
                stats.countries_already_done += 1;
                continue;
            }
            if population.no_coverage.contains(&iso3) {
                ledger.mark_skipped(&key, "no_coverage")?;
                stats.countries_skipped += 1;
                continue;
            }

            let location = locate_raster(
                &self.config.paths.population_dir(),
                &iso3,
                population.year,
                &population.fallback_rasters,
            );
            let path = match location {
                RasterLocation::Own(path) => path,
                RasterLocation::Fallback { source, .. } => {
                    info!(country = %iso3, source = %source, "Raster belongs to another country, not loading");
                    ledger.mark_skipped(&key, format!("fallback_raster:{}", source))?;
                    stats.countries_skipped += 1;
                    continue;
                }
                RasterLocation::Missing => {
                    warn!(country = %iso3, "No raster to load");
                    ledger.mark_skipped(&key, "raster_not_found")?;
                    stats.countries_skipped += 1;
                    continue;
                }
            };

            ledger.mark_in_progress(&key)?;
            match self.load_country(&iso3, &path, &mut stats).await {
                Ok(tiles) => {
                    ledger.mark_done(&key, TaskMetrics::tiles(tiles))?;
                    stats.countries_done += 1;
                    stats.tiles_written += tiles;
                    info!(country = %iso3, tiles, "Raster tiles loaded");
                }
                Err(Error::Ledger(msg)) => return Err(Error::Ledger(msg)),
                Err(e) => {
                    error!(country = %iso3, error = %e, "Raster tile load failed");
                    ledger.mark_failed(&key, e.to_string())?;
                    stats.countries_failed += 1;
                }
            }
        }

        info!("Tile loading complete: {}", stats.display_string());
        Ok(stats)
    }

    /// Replace the stored tiles of one country with tiles of `path`
    ///
    /// # Returns
    /// Number of tiles written
    pub async fn load_country(
        &self,
        iso3: &str,
        path: &Path,
        stats: &mut TileLoadStats,
    ) -> Result<u64> {
        let tiles_config = &self.config.tiles;
        let year = self.config.population.year;
        let max_wait = self.config.store.max_lock_wait_ms;

        let mut raster = GeoTiffRaster::open(path)?;
        let meta = *raster.meta();

        let deleted = retry_on_lock("delete tiles", max_wait, || {
            raster_tiles::delete_tiles(self.pool, iso3, year)
        })
        .await?;
        if deleted > 0 {
            info!(country = %iso3, deleted, "Removed previously loaded tiles");
        }

        let windows = PixelWindow::new(0, 0, meta.width, meta.height).tiles(tiles_config.tile_size);
        let mut written = 0;

        for batch in windows.chunks(tiles_config.insert_batch_size) {
            let mut tiles = Vec::with_capacity(batch.len());
            for window in batch {
                let values = raster.read_window(window)?;
                if tiles_config.skip_empty_tiles && values.iter().all(|v| meta.is_nodata(*v)) {
                    stats.empty_tiles_skipped += 1;
                    continue;
                }
                tiles.push(NewRasterTile {
                    iso_code: iso3.to_string(),
                    year,
                    resolution_m: self.config.population.resolution_m,
                    tile_row: window.row_off / tiles_config.tile_size,
                    tile_col: window.col_off / tiles_config.tile_size,
                    meta: RasterMeta {
                        width: window.width,
                        height: window.height,
                        transform: meta.transform.shifted(window.col_off, window.row_off),
                        nodata: meta.nodata,
                    },
                    values,
                });
            }

            written += retry_on_lock("insert tiles", max_wait, || {
                raster_tiles::insert_tiles(self.pool, &tiles)
            })
            .await?;
        }

        Ok(written)
    }
}
