use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use dpbridge_timesync::TimeSyncFormat;
use serde::{Deserialize, Serialize};

use crate::arbiter::ArbitrationMode;
use crate::collab::CollabError;
use crate::error::{EngineError, Result};

/// What survives a restart for one device.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PersistedDeviceState {
    pub mode: ArbitrationMode,
    #[serde(default)]
    pub forced_active: bool,
    /// Key of the mapping profile bound at attach.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    /// Time-sync format learned through re-requests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_format: Option<TimeSyncFormat>,
}

/// Device-keyed persistence. Last write wins.
pub trait StateStore: Send + Sync {
    fn load(&self, device: &str) -> std::result::Result<Option<PersistedDeviceState>, CollabError>;
    fn save(&self, device: &str, state: &PersistedDeviceState) -> std::result::Result<(), CollabError>;
}

#[derive(Debug, Default)]
pub struct MemoryStateStore {
    states: Mutex<HashMap<String, PersistedDeviceState>>,
}

impl StateStore for MemoryStateStore {
    fn load(&self, device: &str) -> std::result::Result<Option<PersistedDeviceState>, CollabError> {
        Ok(self
            .states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(device)
            .cloned())
    }

    fn save(&self, device: &str, state: &PersistedDeviceState) -> std::result::Result<(), CollabError> {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(device.to_string(), state.clone());
        Ok(())
    }
}

/// One `<device>.json` file per device under a directory.
#[derive(Debug, Clone)]
pub struct JsonFileStateStore {
    dir: PathBuf,
}

impl JsonFileStateStore {
    /// Use `dir`, creating it if missing.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|err| EngineError::Store {
            path: dir.clone(),
            message: err.to_string(),
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File holding `device`. Characters outside `[A-Za-z0-9._-]` become `_`.
    pub fn path_for(&self, device: &str) -> PathBuf {
        let stem: String = device
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{stem}.json"))
    }
}

impl StateStore for JsonFileStateStore {
    fn load(&self, device: &str) -> std::result::Result<Option<PersistedDeviceState>, CollabError> {
        let path = self.path_for(device);
        let content = match std::fs::read(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(CollabError::Storage(format!("{}: {err}", path.display()))),
        };
        serde_json::from_slice(&content)
            .map(Some)
            .map_err(|err| CollabError::Storage(format!("{}: {err}", path.display())))
    }

    fn save(&self, device: &str, state: &PersistedDeviceState) -> std::result::Result<(), CollabError> {
        let path = self.path_for(device);
        let tmp = path.with_extension("json.tmp");
        let content = serde_json::to_vec_pretty(state)
            .map_err(|err| CollabError::Storage(err.to_string()))?;
        std::fs::write(&tmp, content)
            .and_then(|()| std::fs::rename(&tmp, &path))
            .map_err(|err| CollabError::Storage(format!("{}: {err}", path.display())))
    }
}
