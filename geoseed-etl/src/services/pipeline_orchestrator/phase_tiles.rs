//! TILE LOAD: raster tile loading in a worker process

use super::{PipelineOrchestrator, RunOptions};
use crate::checkpoint::Ledger;
use geoseed_common::Result;

impl PipelineOrchestrator {
    /// # Returns
    /// `false` when the worker reported task failures
    pub(super) async fn phase_tiles(&self, ledger: &mut Ledger, options: &RunOptions) -> Result<bool> {
        tracing::info!("Loading raster tiles (worker process)");
        self.run_worker(ledger, "load-tiles", options, &[]).await
    }
}
