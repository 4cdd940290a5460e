//! Ledger persistence backends

use super::LedgerState;
use geoseed_common::{Error, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Where ledger state lives between runs
pub trait LedgerBackend: Send {
    /// `Ok(None)` when nothing has been persisted yet
    fn load(&self) -> Result<Option<LedgerState>>;

    /// Persist atomically: a crash leaves either the old or the new state
    fn store(&mut self, state: &LedgerState) -> Result<()>;

    fn describe(&self) -> String;
}

/// JSON file, replaced via write-to-temp, fsync, rename
#[derive(Debug, Clone)]
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "ledger.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl LedgerBackend for FileBackend {
    fn load(&self) -> Result<Option<LedgerState>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(&self.path)?;
        let state = serde_json::from_str(&text).map_err(|e| {
            Error::Ledger(format!("{} is unreadable: {}", self.path.display(), e))
        })?;
        Ok(Some(state))
    }

    fn store(&mut self, state: &LedgerState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let json = serde_json::to_vec_pretty(state)
            .map_err(|e| Error::Ledger(format!("serialize: {}", e)))?;

        let tmp = self.temp_path();
        {
            let mut file = std::fs::File::create(&tmp)?;
            file.write_all(&json)?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// In-process backend for tests
///
/// Clones share one slot, so a test can reopen a ledger "after a restart"
/// and see what the previous instance persisted.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    slot: Arc<Mutex<Option<String>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw persisted JSON, if any
    pub fn snapshot(&self) -> Option<String> {
        self.slot.lock().ok().and_then(|s| s.clone())
    }

    /// Overwrite the persisted JSON (e.g., to simulate corruption)
    pub fn put_raw(&self, json: &str) {
        if let Ok(mut slot) = self.slot.lock() {
            *slot = Some(json.to_string());
        }
    }
}

impl LedgerBackend for MemoryBackend {
    fn load(&self) -> Result<Option<LedgerState>> {
        let slot = self
            .slot
            .lock()
            .map_err(|_| Error::Internal("ledger slot poisoned".to_string()))?;
        match slot.as_deref() {
            None => Ok(None),
            Some(text) => serde_json::from_str(text)
                .map(Some)
                .map_err(|e| Error::Ledger(format!("memory ledger unreadable: {}", e))),
        }
    }

    fn store(&mut self, state: &LedgerState) -> Result<()> {
        let json = serde_json::to_string(state)
            .map_err(|e| Error::Ledger(format!("serialize: {}", e)))?;
        let mut slot = self
            .slot
            .lock()
            .map_err(|_| Error::Internal("ledger slot poisoned".to_string()))?;
        *slot = Some(json);
        Ok(())
    }

    fn describe(&self) -> String {
        "<memory>".to_string()
    }
}
