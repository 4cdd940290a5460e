//! End-of-run summary
//!
//! Built from the reloaded ledger, so work done by worker processes is
//! counted the same way as in-process work.

use super::RunOutcome;
use crate::checkpoint::{Ledger, Section, StatusCounts, TaskKey};
use crate::selection::Selection;

/// Completed / failed / skipped counts for one phase
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SectionSummary {
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Left `in_progress` by an interrupted worker
    pub unfinished: usize,
}

impl From<StatusCounts> for SectionSummary {
    fn from(counts: StatusCounts) -> Self {
        Self {
            completed: counts.done,
            failed: counts.failed,
            skipped: counts.skipped,
            unfinished: counts.in_progress,
        }
    }
}

impl SectionSummary {
    pub fn display_string(&self) -> String {
        let mut text = format!(
            "{} completed, {} failed, {} skipped",
            self.completed, self.failed, self.skipped
        );
        if self.unfinished > 0 {
            text.push_str(&format!(", {} unfinished", self.unfinished));
        }
        text
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Boundary files
    pub boundaries: SectionSummary,
    /// Countries and (country, level) pairs; chunks are not counted
    pub population: SectionSummary,
    pub tiles: SectionSummary,
    /// Workers that exited reporting task failures
    pub worker_failures: usize,
}

impl RunSummary {
    /// Tally the ledger over the keys inside `selection`
    pub fn collect(ledger: &Ledger, selection: &Selection, worker_failures: usize) -> Self {
        let in_scope = |key: &TaskKey| {
            selection.includes_country(key.country())
                && key.level().map_or(true, |level| selection.includes_level(level))
        };
        Self {
            boundaries: ledger.counts_where(Section::Boundaries, in_scope).into(),
            population: ledger
                .counts_where(Section::Population, |key| {
                    !matches!(key, TaskKey::PopulationChunk { .. }) && in_scope(key)
                })
                .into(),
            tiles: ledger.counts_where(Section::RasterTiles, in_scope).into(),
            worker_failures,
        }
    }

    pub fn failed(&self) -> usize {
        self.boundaries.failed + self.population.failed + self.tiles.failed
    }

    pub fn outcome(&self) -> RunOutcome {
        if self.failed() > 0 || self.worker_failures > 0 {
            RunOutcome::CompletedWithFailures
        } else {
            RunOutcome::Completed
        }
    }

    pub fn display_string(&self) -> String {
        format!(
            "boundaries: {}; population: {}; tiles: {}",
            self.boundaries.display_string(),
            self.population.display_string(),
            self.tiles.display_string()
        )
    }
}
