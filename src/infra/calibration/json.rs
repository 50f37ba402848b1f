//! JSON-file calibration store.
//!
//! State is written to a temporary file, synced, then renamed over the
//! previous copy, so a crash leaves either the old or the new state on disk.

use std::fs::{create_dir_all, rename, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::core::{CalibrationState, CalibrationStore, SchedulerError};

/// File-backed calibration store.
pub struct JsonCalibrationStore {
    path: PathBuf,
}

impl JsonCalibrationStore {
    /// Store state at `dir/calibration.json`.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, SchedulerError> {
        let dir = dir.as_ref();
        create_dir_all(dir).map_err(SchedulerError::storage)?;
        Ok(Self {
            path: dir.join("calibration.json"),
        })
    }

    /// Path of the state file.
    pub fn file_path(&self) -> &Path {
        &self.path
    }
}

impl CalibrationStore for JsonCalibrationStore {
    fn load(&mut self) -> Result<Option<CalibrationState>, SchedulerError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&self.path).map_err(SchedulerError::storage)?;
        match serde_json::from_str(&raw) {
            Ok(state) => Ok(Some(state)),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "discarding unreadable calibration state");
                Ok(None)
            }
        }
    }

    fn save(&mut self, state: &CalibrationState) -> Result<(), SchedulerError> {
        let tmp = self.path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(state).map_err(SchedulerError::storage)?;
        let mut file = File::create(&tmp).map_err(SchedulerError::storage)?;
        file.write_all(&body).map_err(SchedulerError::storage)?;
        file.sync_all().map_err(SchedulerError::storage)?;
        rename(&tmp, &self.path).map_err(SchedulerError::storage)
    }
}
