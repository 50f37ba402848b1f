//! In-memory calibration store.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::{CalibrationState, CalibrationStore, SchedulerError};

/// Volatile store. Clones share the same slot, which lets tests reopen a
/// calibrator against state saved by a previous instance.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCalibrationStore {
    slot: Arc<Mutex<Option<CalibrationState>>>,
}

impl InMemoryCalibrationStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl CalibrationStore for InMemoryCalibrationStore {
    fn load(&mut self) -> Result<Option<CalibrationState>, SchedulerError> {
        Ok(self.slot.lock().clone())
    }

    fn save(&mut self, state: &CalibrationState) -> Result<(), SchedulerError> {
        *self.slot.lock() = Some(state.clone());
        Ok(())
    }
}
