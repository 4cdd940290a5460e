//! PHASE 2: population overlay in a worker process

use super::{PipelineOrchestrator, RunOptions};
use crate::checkpoint::Ledger;
use geoseed_common::Result;

impl PipelineOrchestrator {
    /// # Returns
    /// `false` when the worker reported task failures
    pub(super) async fn phase_population(
        &self,
        ledger: &mut Ledger,
        options: &RunOptions,
    ) -> Result<bool> {
        tracing::info!("Phase 2: population overlay (worker process)");
        let mut extra = Vec::new();
        if let Some(max_chunks) = options.max_chunks {
            extra.push("--max-chunks".to_string());
            extra.push(max_chunks.to_string());
        }
        self.run_worker(ledger, "population", options, &extra).await
    }
}
