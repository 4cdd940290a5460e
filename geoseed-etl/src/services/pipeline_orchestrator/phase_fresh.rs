//! FRESH PURGE
//!
//! Clears the scope so the run starts over: ledger keys first, then stored
//! tiles (only when no level filter is given, tiles are per country), then
//! jurisdiction rows at the selected levels and deeper. Earth is kept.

use super::PipelineOrchestrator;
use crate::checkpoint::Ledger;
use crate::db::{jurisdictions, raster_tiles};
use crate::selection::Selection;
use crate::utils::retry_on_lock;
use geoseed_common::Result;

impl PipelineOrchestrator {
    pub(super) async fn phase_fresh(&self, ledger: &mut Ledger, selection: &Selection) -> Result<()> {
        let scope = selection.reset_scope();
        let cleared = ledger.reset(&scope)?;
        tracing::info!(cleared, "Fresh run: ledger keys cleared");

        let countries = selection.country_list();
        let max_wait = self.config.store.max_lock_wait_ms;

        if scope.min_level.is_none() {
            let tile_countries = match &countries {
                Some(list) => list.clone(),
                None => jurisdictions::distinct_countries(&self.pool).await?,
            };
            let year = self.config.population.year;
            let mut tiles_deleted = 0;
            for iso3 in &tile_countries {
                tiles_deleted += retry_on_lock("delete tiles", max_wait, || {
                    raster_tiles::delete_tiles(&self.pool, iso3, year)
                })
                .await?;
            }
            tracing::info!(tiles_deleted, "Fresh run: raster tiles removed");
        }

        let min_level = selection.min_level();
        let deleted = retry_on_lock("delete scope", max_wait, || {
            jurisdictions::delete_scope(&self.pool, countries.as_deref(), min_level)
        })
        .await?;
        tracing::info!(deleted, min_level, "Fresh run: jurisdictions removed");
        Ok(())
    }
}
