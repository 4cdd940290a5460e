//! Checkpoint store
//!
//! Durable ledger of which units of work have completed. Every phase takes
//! the ledger by `&mut` and records each unit as soon as it finishes, so a
//! crash at any point loses at most the unit in flight. Store writes are
//! idempotent, so redoing that unit is harmless.
//!
//! A missing ledger means nothing has been done yet. An unreadable ledger is
//! a fatal `Error::Ledger`; it is never silently discarded.

mod backend;
mod key;

pub use backend::{FileBackend, LedgerBackend, MemoryBackend};
pub use key::{Section, TaskKey};

use chrono::{DateTime, Utc};
use geoseed_common::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::{debug, info, warn};

/// Lifecycle of one unit of work
///
/// Absent keys are pending. `failed` is retried on the next run; `done` and
/// `skipped` are not, until a fresh run resets the scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Done,
    #[serde(alias = "error")]
    Failed,
    Skipped,
}

/// Persisted state of one key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inserted: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tiles: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl TaskRecord {
    fn new(status: TaskStatus) -> Self {
        Self {
            status,
            inserted: None,
            updated: None,
            tiles: None,
            error: None,
            reason: None,
            note: None,
            timestamp: Utc::now(),
        }
    }
}

/// Counters recorded with a completed unit
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskMetrics {
    pub inserted: Option<u64>,
    pub updated: Option<u64>,
    pub tiles: Option<u64>,
    pub note: Option<String>,
}

impl TaskMetrics {
    pub fn inserted(n: u64) -> Self {
        Self {
            inserted: Some(n),
            ..Self::default()
        }
    }

    pub fn updated(n: u64) -> Self {
        Self {
            updated: Some(n),
            ..Self::default()
        }
    }

    pub fn tiles(n: u64) -> Self {
        Self {
            tiles: Some(n),
            ..Self::default()
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// On-disk ledger document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerState {
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub earth_inserted: bool,
    #[serde(default, alias = "earth_uuid")]
    pub earth_id: Option<String>,
    #[serde(default, alias = "geoboundaries")]
    pub boundaries: BTreeMap<String, TaskRecord>,
    #[serde(default, alias = "worldpop")]
    pub population: BTreeMap<String, TaskRecord>,
    #[serde(default)]
    pub raster_tiles: BTreeMap<String, TaskRecord>,
}

impl LedgerState {
    fn section(&self, section: Section) -> &BTreeMap<String, TaskRecord> {
        match section {
            Section::Boundaries => &self.boundaries,
            Section::Population => &self.population,
            Section::RasterTiles => &self.raster_tiles,
        }
    }

    fn section_mut(&mut self, section: Section) -> &mut BTreeMap<String, TaskRecord> {
        match section {
            Section::Boundaries => &mut self.boundaries,
            Section::Population => &mut self.population,
            Section::RasterTiles => &mut self.raster_tiles,
        }
    }
}

/// Which keys a fresh run clears
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResetScope {
    /// `None` = every country
    pub countries: Option<BTreeSet<String>>,
    /// Clear this stored level and everything deeper; `None` = all levels
    pub min_level: Option<i64>,
}

impl ResetScope {
    fn covers(&self, key: &TaskKey) -> bool {
        if let Some(countries) = &self.countries {
            if !countries.contains(key.country()) {
                return false;
            }
        }
        match (self.min_level, key) {
            (None, _) => true,
            // Country rollups are stale once any level underneath is reset
            (Some(_), TaskKey::PopulationCountry { .. }) => true,
            (Some(_), TaskKey::RasterTiles { .. }) => false,
            (Some(min), key) => key.level().map_or(false, |level| level >= min),
        }
    }
}

/// Populated (country, level) pair read back from the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PopulatedPair {
    pub country: String,
    pub level: i64,
    pub rows: u64,
}

/// Done / failed / skipped tallies for one section
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub done: usize,
    pub failed: usize,
    pub skipped: usize,
    pub in_progress: usize,
}

/// Task-state ledger bound to a persistence backend
pub struct Ledger {
    state: LedgerState,
    backend: Box<dyn LedgerBackend>,
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("backend", &self.backend.describe())
            .field("boundaries", &self.state.boundaries.len())
            .field("population", &self.state.population.len())
            .field("raster_tiles", &self.state.raster_tiles.len())
            .finish()
    }
}

impl Ledger {
    /// Load from the backend, starting empty if nothing was persisted
    pub fn open(backend: impl LedgerBackend + 'static) -> Result<Self> {
        let backend: Box<dyn LedgerBackend> = Box::new(backend);
        let state = match backend.load()? {
            Some(state) => {
                info!(
                    ledger = %backend.describe(),
                    boundaries = state.boundaries.len(),
                    population = state.population.len(),
                    raster_tiles = state.raster_tiles.len(),
                    "Loaded progress ledger"
                );
                state
            }
            None => {
                info!(ledger = %backend.describe(), "No progress ledger, starting fresh");
                LedgerState {
                    started_at: Some(Utc::now()),
                    ..LedgerState::default()
                }
            }
        };
        Ok(Self { state, backend })
    }

    pub fn open_file(path: &Path) -> Result<Self> {
        Self::open(FileBackend::new(path))
    }

    /// Re-read persisted state (after a worker process has written to it)
    pub fn reload(&mut self) -> Result<()> {
        if let Some(state) = self.backend.load()? {
            self.state = state;
        }
        Ok(())
    }

    pub fn save(&mut self) -> Result<()> {
        self.backend.store(&self.state)
    }

    pub fn state(&self) -> &LedgerState {
        &self.state
    }

    pub fn get(&self, key: &TaskKey) -> Option<&TaskRecord> {
        self.state.section(key.section()).get(&key.to_string())
    }

    pub fn status(&self, key: &TaskKey) -> TaskStatus {
        self.get(key).map_or(TaskStatus::Pending, |r| r.status)
    }

    pub fn is_done(&self, key: &TaskKey) -> bool {
        self.status(key) == TaskStatus::Done
    }

    /// Done or skipped: nothing left to do for this key
    pub fn is_settled(&self, key: &TaskKey) -> bool {
        matches!(self.status(key), TaskStatus::Done | TaskStatus::Skipped)
    }

    fn put(&mut self, key: &TaskKey, record: TaskRecord) -> Result<()> {
        debug!(key = %key, status = ?record.status, "Progress update");
        self.state
            .section_mut(key.section())
            .insert(key.to_string(), record);
        self.save()
    }

    pub fn mark_in_progress(&mut self, key: &TaskKey) -> Result<()> {
        self.put(key, TaskRecord::new(TaskStatus::InProgress))
    }

    pub fn mark_done(&mut self, key: &TaskKey, metrics: TaskMetrics) -> Result<()> {
        let mut record = TaskRecord::new(TaskStatus::Done);
        record.inserted = metrics.inserted;
        record.updated = metrics.updated;
        record.tiles = metrics.tiles;
        record.note = metrics.note;
        self.put(key, record)
    }

    pub fn mark_failed(&mut self, key: &TaskKey, error: impl Into<String>) -> Result<()> {
        let mut record = TaskRecord::new(TaskStatus::Failed);
        record.error = Some(error.into());
        self.put(key, record)
    }

    pub fn mark_skipped(&mut self, key: &TaskKey, reason: impl Into<String>) -> Result<()> {
        let mut record = TaskRecord::new(TaskStatus::Skipped);
        record.reason = Some(reason.into());
        self.put(key, record)
    }

    /// Root jurisdiction id, once it has been recorded
    pub fn earth_id(&self) -> Option<&str> {
        if self.state.earth_inserted {
            self.state.earth_id.as_deref()
        } else {
            None
        }
    }

    pub fn set_earth(&mut self, id: &str) -> Result<()> {
        self.state.earth_inserted = true;
        self.state.earth_id = Some(id.to_string());
        self.save()
    }

    /// Keys recorded in one section, skipping entries that do not parse
    pub fn keys(&self, section: Section) -> Vec<TaskKey> {
        self.state
            .section(section)
            .keys()
            .filter_map(|k| match k.parse::<TaskKey>() {
                Ok(key) => Some(key),
                Err(_) => {
                    warn!(key = %k, "Ignoring unrecognized progress key");
                    None
                }
            })
            .collect()
    }

    pub fn counts(&self, section: Section) -> StatusCounts {
        self.counts_where(section, |_| true)
    }

    /// Tallies over the keys of `section` accepted by `filter`
    pub fn counts_where(&self, section: Section, filter: impl Fn(&TaskKey) -> bool) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for (k, record) in self.state.section(section) {
            match k.parse::<TaskKey>() {
                Ok(key) if filter(&key) => {}
                _ => continue,
            }
            match record.status {
                TaskStatus::Done => counts.done += 1,
                TaskStatus::Failed => counts.failed += 1,
                TaskStatus::Skipped => counts.skipped += 1,
                TaskStatus::InProgress => counts.in_progress += 1,
                TaskStatus::Pending => {}
            }
        }
        counts
    }

    /// Forget every key inside `scope` so the work is redone
    ///
    /// # Returns
    /// Number of keys removed
    pub fn reset(&mut self, scope: &ResetScope) -> Result<usize> {
        let mut removed = 0;
        for section in [Section::Boundaries, Section::Population, Section::RasterTiles] {
            let doomed: Vec<String> = self
                .keys(section)
                .into_iter()
                .filter(|key| scope.covers(key))
                .map(|key| key.to_string())
                .collect();
            let map = self.state.section_mut(section);
            for k in doomed {
                if map.remove(&k).is_some() {
                    removed += 1;
                }
            }
        }
        info!(removed, ?scope, "Reset progress ledger scope");
        self.save()?;
        Ok(removed)
    }

    /// Replace the population section with what the store already holds
    ///
    /// Marks exactly the given (country, level) pairs done. Country and
    /// chunk keys are not synthesized: a country with some levels populated
    /// is revisited, and only its unfinished levels are processed.
    pub fn rebuild_from_store(&mut self, populated: &[PopulatedPair]) -> Result<usize> {
        self.state.population.clear();
        for pair in populated {
            let key = TaskKey::population_level(&pair.country, pair.level);
            let mut record = TaskRecord::new(TaskStatus::Done);
            record.updated = Some(pair.rows);
            record.note = Some("rebuilt from store".to_string());
            self.state.population.insert(key.to_string(), record);
        }
        info!(pairs = populated.len(), "Rebuilt population progress from store");
        self.save()?;
        Ok(populated.len())
    }
}
