//! Ledger backend that keeps every persisted state

use geoseed_common::Result;
use geoseed_etl::checkpoint::{
    LedgerBackend, LedgerState, MemoryBackend, Section, TaskKey, TaskStatus,
};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Default)]
pub struct RecordingBackend {
    inner: MemoryBackend,
    history: Arc<Mutex<Vec<LedgerState>>>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Successive statuses `key` was saved with, repeats collapsed
    pub fn statuses(&self, key: &TaskKey) -> Vec<TaskStatus> {
        let name = key.to_string();
        let mut seen: Vec<TaskStatus> = Vec::new();
        for state in self.history.lock().unwrap().iter() {
            let section = match key.section() {
                Section::Boundaries => &state.boundaries,
                Section::Population => &state.population,
                Section::RasterTiles => &state.raster_tiles,
            };
            if let Some(record) = section.get(&name) {
                if seen.last() != Some(&record.status) {
                    seen.push(record.status);
                }
            }
        }
        seen
    }
}

impl LedgerBackend for RecordingBackend {
    fn load(&self) -> Result<Option<LedgerState>> {
        self.inner.load()
    }

    fn store(&mut self, state: &LedgerState) -> Result<()> {
        self.history.lock().unwrap().push(state.clone());
        self.inner.store(state)
    }

    fn describe(&self) -> String {
        "recording ledger".to_string()
    }
}
