use std::{
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
};

use anyhow::{anyhow, Context, Result};
use log::warn;

use crate::timer::TimerState;

/// Storage key the timer state is persisted under.
pub const STATE_KEY: &str = "pomodoro-state";

/// Single-key store for the serialized timer state.
///
/// `load` never fails: anything missing or unparseable is reported as absent.
/// `save` is a full overwrite.
pub trait StateStore: Send + Sync {
    fn load(&self) -> Option<TimerState>;
    fn save(&self, state: &TimerState) -> Result<()>;
}

fn decode(contents: &str, origin: &str) -> Option<TimerState> {
    match serde_json::from_str(contents) {
        Ok(state) => Some(state),
        Err(err) => {
            warn!("Ignoring unreadable timer state from {origin}: {err}");
            None
        }
    }
}

pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    pub fn new(dir: &Path) -> Self {
        Self {
            path: dir.join(format!("{STATE_KEY}.json")),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StateStore for FileStateStore {
    fn load(&self) -> Option<TimerState> {
        if !self.path.exists() {
            return None;
        }
        match fs::read_to_string(&self.path) {
            Ok(contents) => decode(&contents, &self.path.display().to_string()),
            Err(err) => {
                warn!("Failed to read {}: {err}", self.path.display());
                None
            }
        }
    }

    fn save(&self, state: &TimerState) -> Result<()> {
        let serialized = serde_json::to_string(state)?;
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, serialized)
            .with_context(|| format!("Failed to write timer state to {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))
    }
}

/// Keeps the serialized document in memory.
#[derive(Default)]
pub struct MemoryStateStore {
    slot: Mutex<Option<String>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the store with a raw document, as if an earlier process wrote it.
    pub fn with_raw(raw: impl Into<String>) -> Self {
        Self {
            slot: Mutex::new(Some(raw.into())),
        }
    }

    pub fn raw(&self) -> Option<String> {
        self.slot.lock().ok().and_then(|guard| guard.clone())
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self) -> Option<TimerState> {
        let raw = self.raw()?;
        decode(&raw, "memory")
    }

    fn save(&self, state: &TimerState) -> Result<()> {
        let serialized = serde_json::to_string(state)?;
        let mut guard = self
            .slot
            .lock()
            .map_err(|_| anyhow!("state slot lock poisoned"))?;
        *guard = Some(serialized);
        Ok(())
    }
}
