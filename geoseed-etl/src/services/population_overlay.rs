//! Population overlay (Phase 2)
//!
//! Sums the population raster under every jurisdiction polygon and writes
//! the result back to the store. Work is checkpointed at three grains:
//! country (`NZL`), level (`NZL:adm2`) and chunk (`NZL:adm2:chunk3`). A
//! chunk is one page of `fetch_chunk_size` rows ordered by id; within a
//! chunk, polygons are aggregated in sub-batches of `zonal_batch_size`.
//!
//! Countries the dataset does not cover, and countries without any raster,
//! are known data gaps: their rows get population 0 with an explanatory
//! note and the ledger records them done, not failed.

use crate::checkpoint::{Ledger, TaskKey, TaskMetrics, TaskStatus};
use crate::db::jurisdictions::{self, JurisdictionShape, PopulationUpdate};
use crate::raster::{
    locate_raster, population_from_sum, zonal_sum, GeoTiffRaster, RasterLocation, RasterSource,
    ZonalPath, ZonalSettings,
};
use crate::selection::Selection;
use crate::utils::retry_on_lock;
use geoseed_common::{Error, PipelineConfig, Result};
use sqlx::SqlitePool;
use tracing::{debug, error, info, warn};

/// Per-invocation limits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OverlayOptions {
    /// Stop after this many chunks; the rest resumes on the next run
    pub max_chunks: Option<usize>,
}

/// Phase 2 counters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverlayStats {
    pub countries_done: usize,
    pub countries_already_done: usize,
    pub countries_failed: usize,
    pub countries_data_gap: usize,
    pub levels_done: usize,
    pub chunks_done: usize,
    pub rows_updated: u64,
    pub tiled_polygons: u64,
    /// Rows zeroed because their sub-batch failed to aggregate
    pub rows_zeroed_on_error: u64,
    pub validation_warnings: usize,
    /// The chunk budget ran out before all work was done
    pub interrupted: bool,
}

impl OverlayStats {
    pub fn display_string(&self) -> String {
        format!(
            "{} countries done ({} already done, {} data gaps, {} failed), {} levels, {} chunks, {} rows updated ({} tiled, {} zeroed on error), {} validation warnings{}",
            self.countries_done,
            self.countries_already_done,
            self.countries_data_gap,
            self.countries_failed,
            self.levels_done,
            self.chunks_done,
            self.rows_updated,
            self.tiled_polygons,
            self.rows_zeroed_on_error,
            self.validation_warnings,
            if self.interrupted { ", stopped at chunk limit" } else { "" }
        )
    }
}

/// How one country ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CountryOutcome {
    Done,
    /// Levels outside the selection remain
    Partial,
    /// Chunk budget exhausted
    Interrupted,
}

/// Population overlay service
pub struct PopulationOverlay<'a> {
    pool: &'a SqlitePool,
    config: &'a PipelineConfig,
}

impl<'a> PopulationOverlay<'a> {
    pub fn new(pool: &'a SqlitePool, config: &'a PipelineConfig) -> Self {
        Self { pool, config }
    }

    fn zonal_settings(&self) -> ZonalSettings {
        ZonalSettings {
            max_bbox_pixels: self.config.population.max_bbox_pixels,
            tile_pixels: self.config.population.tile_pixels,
        }
    }

    /// Overlay every selected country not yet done
    ///
    /// # Arguments
    /// * `ledger` - Progress ledger, saved after every chunk, level and country
    /// * `selection` - Countries (default: every country in the store) and levels
    /// * `options` - Chunk budget
    ///
    /// # Returns
    /// Counters for the run. Per-country failures are recorded and counted;
    /// ledger write failures abort.
    pub async fn run(
        &self,
        ledger: &mut Ledger,
        selection: &Selection,
        options: &OverlayOptions,
    ) -> Result<OverlayStats> {
        let countries = match selection.country_list() {
            Some(list) => list,
            None => jurisdictions::distinct_countries(self.pool).await?,
        };
        info!(
            countries = countries.len(),
            year = self.config.population.year,
            "Phase 2: population overlay"
        );

        let mut stats = OverlayStats::default();
        let mut budget = options.max_chunks;

        for iso3 in countries {
            let country_key = TaskKey::population_country(&iso3);
            if ledger.is_done(&country_key) {
                stats.countries_already_done += 1;
                continue;
            }

            match self
                .process_country(ledger, &iso3, selection, &mut budget, &mut stats)
                .await
            {
                Ok(CountryOutcome::Done) => stats.countries_done += 1,
                Ok(CountryOutcome::Partial) => {}
                Ok(CountryOutcome::Interrupted) => {
                    stats.interrupted = true;
                    info!(country = %iso3, "Chunk limit reached, remaining work resumes next run");
                    break;
                }
                Err(Error::Ledger(msg)) => return Err(Error::Ledger(msg)),
                Err(e) => {
                    error!(country = %iso3, error = %e, "Population overlay failed");
                    ledger.mark_failed(&country_key, e.to_string())?;
                    stats.countries_failed += 1;
                }
            }
        }

        info!("Phase 2 complete: {}", stats.display_string());
        Ok(stats)
    }

    async fn process_country(
        &self,
        ledger: &mut Ledger,
        iso3: &str,
        selection: &Selection,
        budget: &mut Option<usize>,
        stats: &mut OverlayStats,
    ) -> Result<CountryOutcome> {
        let population = &self.config.population;
        let all_levels = jurisdictions::levels_present(self.pool, iso3).await?;
        let levels: Vec<i64> = all_levels
            .iter()
            .copied()
            .filter(|l| selection.includes_level(*l))
            .collect();
        if levels.is_empty() {
            warn!(country = %iso3, "No jurisdictions in scope for population overlay");
            return Ok(CountryOutcome::Partial);
        }

        let location = if population.no_coverage.contains(iso3) {
            None
        } else {
            Some(locate_raster(
                &self.config.paths.population_dir(),
                iso3,
                population.year,
                &population.fallback_rasters,
            ))
        };

        let gap_note = match &location {
            None => Some(format!(
                "No population coverage for {} in the {} dataset",
                iso3, population.year
            )),
            Some(RasterLocation::Missing) => Some(format!(
                "No population raster found for {} ({})",
                iso3, population.year
            )),
            Some(_) => None,
        };

        if let Some(note) = gap_note {
            warn!(country = %iso3, note = %note, "Known data gap, population set to 0");
            for &level in &levels {
                let key = TaskKey::population_level(iso3, level);
                if ledger.is_done(&key) {
                    continue;
                }
                let max_wait = self.config.store.max_lock_wait_ms;
                let zeroed = retry_on_lock("zero population", max_wait, || {
                    jurisdictions::zero_level_population(
                        self.pool,
                        iso3,
                        level,
                        population.year,
                        &note,
                    )
                })
                .await?;
                ledger.mark_done(&key, TaskMetrics::updated(zeroed).with_note(note.clone()))?;
                stats.levels_done += 1;
                stats.rows_updated += zeroed;
            }
            stats.countries_data_gap += 1;
            return self.finish_country(ledger, iso3, &all_levels, Some(note), stats).await;
        }

        let Some(path) = location.as_ref().and_then(RasterLocation::path) else {
            return Ok(CountryOutcome::Partial);
        };
        let borrowed_from = match &location {
            Some(RasterLocation::Fallback { source, .. }) => Some(source.clone()),
            _ => None,
        };
        if let Some(source) = &borrowed_from {
            info!(country = %iso3, source = %source, "Using neighbouring country's raster");
        }

        let mut raster = GeoTiffRaster::open(path)?;
        info!(country = %iso3, raster = %path.display(), levels = ?levels, "Overlaying population");

        for &level in &levels {
            let key = TaskKey::population_level(iso3, level);
            if ledger.is_done(&key) {
                debug!(country = %iso3, level, "Level already done");
                continue;
            }
            let updated = match self
                .process_level(ledger, &mut raster, iso3, level, budget, stats)
                .await?
            {
                Some(updated) => updated,
                None => return Ok(CountryOutcome::Interrupted),
            };
            ledger.mark_done(&key, TaskMetrics::updated(updated))?;
            stats.levels_done += 1;
            info!(country = %iso3, level, updated, "Level population complete");
        }

        let note = borrowed_from.map(|source| format!("raster of {}", source));
        self.finish_country(ledger, iso3, &all_levels, note, stats).await
    }

    /// Validate and mark the country done once every level it has is done
    async fn finish_country(
        &self,
        ledger: &mut Ledger,
        iso3: &str,
        all_levels: &[i64],
        note: Option<String>,
        stats: &mut OverlayStats,
    ) -> Result<CountryOutcome> {
        let complete = all_levels
            .iter()
            .all(|l| ledger.is_done(&TaskKey::population_level(iso3, *l)));
        if !complete {
            return Ok(CountryOutcome::Partial);
        }

        if self.validate_country(iso3).await? {
            stats.validation_warnings += 1;
        }

        let updated: u64 = all_levels
            .iter()
            .filter_map(|l| ledger.get(&TaskKey::population_level(iso3, *l)))
            .filter_map(|r| r.updated)
            .sum();
        let mut metrics = TaskMetrics::updated(updated);
        if let Some(note) = note {
            metrics = metrics.with_note(note);
        }
        ledger.mark_done(&TaskKey::population_country(iso3), metrics)?;
        Ok(CountryOutcome::Done)
    }

    /// Process one level chunk by chunk
    ///
    /// # Returns
    /// Rows updated, or `None` if the chunk budget ran out first
    async fn process_level(
        &self,
        ledger: &mut Ledger,
        raster: &mut dyn RasterSource,
        iso3: &str,
        level: i64,
        budget: &mut Option<usize>,
        stats: &mut OverlayStats,
    ) -> Result<Option<u64>> {
        let chunk_size = self.config.population.fetch_chunk_size;
        let total = jurisdictions::count_at_level(self.pool, iso3, level).await? as usize;
        let chunks = total.div_ceil(chunk_size);
        let mut updated = 0u64;

        for chunk in 0..chunks {
            let key = TaskKey::population_chunk(iso3, level, chunk);
            if let Some(record) = ledger.get(&key).filter(|r| r.status == TaskStatus::Done) {
                updated += record.updated.unwrap_or(0);
                continue;
            }
            if *budget == Some(0) {
                return Ok(None);
            }
            ledger.mark_in_progress(&key)?;

            let shapes = jurisdictions::fetch_shapes_page(
                self.pool,
                iso3,
                level,
                chunk_size as i64,
                (chunk * chunk_size) as i64,
            )
            .await?;
            let updates = self.aggregate_chunk(raster, &shapes, stats);

            let max_wait = self.config.store.max_lock_wait_ms;
            let year = self.config.population.year;
            let written = retry_on_lock("population update", max_wait, || {
                jurisdictions::apply_population(self.pool, &updates, year)
            })
            .await?;

            ledger.mark_done(&key, TaskMetrics::updated(written))?;
            updated += written;
            stats.chunks_done += 1;
            stats.rows_updated += written;
            if let Some(remaining) = budget.as_mut() {
                *remaining -= 1;
            }
            debug!(country = %iso3, level, chunk, chunks, written, "Chunk complete");
        }

        Ok(Some(updated))
    }

    /// Population for every shape of a chunk, sub-batch by sub-batch
    fn aggregate_chunk(
        &self,
        raster: &mut dyn RasterSource,
        shapes: &[JurisdictionShape],
        stats: &mut OverlayStats,
    ) -> Vec<PopulationUpdate> {
        let settings = self.zonal_settings();
        let mut updates = Vec::with_capacity(shapes.len());

        for batch in shapes.chunks(self.config.population.zonal_batch_size) {
            let mut computed = Vec::with_capacity(batch.len());
            let mut tiled = 0;
            let mut failure = None;

            for shape in batch {
                match zonal_sum(raster, &shape.geometry, &settings) {
                    Ok(result) => {
                        if matches!(result.path, ZonalPath::Tiled { .. }) {
                            tiled += 1;
                        }
                        computed.push(PopulationUpdate {
                            id: shape.id.clone(),
                            population: population_from_sum(result.sum),
                            note: None,
                        });
                    }
                    Err(e) => {
                        failure = Some((shape.id.clone(), e));
                        break;
                    }
                }
            }

            match failure {
                None => {
                    stats.tiled_polygons += tiled;
                    updates.extend(computed);
                }
                Some((id, e)) => {
                    error!(
                        first_failed = %id,
                        rows = batch.len(),
                        error = %e,
                        "Sub-batch aggregation failed, writing 0 for the batch"
                    );
                    stats.rows_zeroed_on_error += batch.len() as u64;
                    updates.extend(batch.iter().map(|shape| PopulationUpdate {
                        id: shape.id.clone(),
                        population: 0,
                        note: Some(format!("aggregation failed: {}", e)),
                    }));
                }
            }
        }
        updates
    }

    /// Compare the national total with the sum of its direct children
    ///
    /// # Returns
    /// `true` if the difference exceeded the configured tolerance
    async fn validate_country(&self, iso3: &str) -> Result<bool> {
        let Some((national, children_sum, children)) =
            jurisdictions::national_and_children_population(self.pool, iso3).await?
        else {
            return Ok(false);
        };
        if children == 0 || national <= 0 {
            return Ok(false);
        }

        let delta = (national - children_sum).abs() as f64 / national as f64;
        if delta > self.config.population.validation_tolerance {
            warn!(
                country = %iso3,
                national,
                children_sum,
                children,
                delta_pct = delta * 100.0,
                "National population differs from sum of children"
            );
            Ok(true)
        } else {
            debug!(country = %iso3, national, children_sum, "Population validation passed");
            Ok(false)
        }
    }
}
