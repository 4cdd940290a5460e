//! PHASE 1: boundary import
//!
//! Runs in-process. Rows inserted without a parent (no overlapping
//! candidate one level up) are handed to hierarchy repair straight away,
//! which falls back to the nearest centroid.

use super::PipelineOrchestrator;
use crate::checkpoint::Ledger;
use crate::db::jurisdictions;
use crate::selection::Selection;
use crate::services::{BoundaryImporter, HierarchyRepair};
use geoseed_common::Result;

impl PipelineOrchestrator {
    pub(super) async fn phase_boundaries(
        &self,
        ledger: &mut Ledger,
        selection: &Selection,
    ) -> Result<()> {
        let importer = BoundaryImporter::new(&self.pool, &self.config);
        let stats = importer.run(ledger, selection).await?;

        if stats.orphans == 0 {
            return Ok(());
        }

        let earth_id = match ledger.earth_id() {
            Some(id) => id.to_string(),
            None => jurisdictions::ensure_earth(&self.pool).await?,
        };
        tracing::info!(orphans = stats.orphans, "Repairing orphaned jurisdictions");
        let repair = HierarchyRepair::new(
            &self.pool,
            self.config.population.fetch_chunk_size,
            self.config.store.max_lock_wait_ms,
        );
        let report = repair.run(&earth_id, selection).await?;
        if report.unresolved() > 0 {
            tracing::warn!(
                unresolved = report.unresolved(),
                "Some jurisdictions remain without a parent"
            );
        }
        Ok(())
    }
}
