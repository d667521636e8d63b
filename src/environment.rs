//! Shared latest-reading store.
//!
//! One acquisition path writes, any number of consumers read. Each write swaps
//! the whole [`Reading`] under the write lock, so a reader sees either the
//! previous reading or the new one, never a mix. The lock is held only for the
//! copy; the sensor bus transaction happens outside it.

use crate::reading::Reading;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::warn;

#[derive(Debug, Default)]
struct Slot {
    reading: Reading,
    writes: u64,
}

/// Cloneable handle to the process-wide environment state.
#[derive(Debug, Clone, Default)]
pub struct SharedEnvironment {
    inner: Arc<RwLock<Slot>>,
}

impl SharedEnvironment {
    /// Create a store in the sentinel ("no reading yet") state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically replace the current reading.
    pub fn write(&self, reading: Reading) {
        let mut slot = self.write_guard();
        slot.reading = reading;
        slot.writes = slot.writes.wrapping_add(1);
    }

    /// Consistent copy of the current reading, or [`Reading::SENTINEL`].
    pub fn read(&self) -> Reading {
        self.read_guard().reading
    }

    /// The current reading if one has been accepted, `None` before that.
    pub fn snapshot(&self) -> Option<Reading> {
        Some(self.read()).filter(Reading::is_fresh)
    }

    /// Number of readings written since creation.
    pub fn write_count(&self) -> u64 {
        self.read_guard().writes
    }

    // A poisoned lock still holds a whole reading: writers never panic
    // between assigning the fields, so recover instead of propagating.
    fn read_guard(&self) -> RwLockReadGuard<'_, Slot> {
        self.inner.read().unwrap_or_else(|poisoned| {
            warn!("environment lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn write_guard(&self) -> RwLockWriteGuard<'_, Slot> {
        self.inner.write().unwrap_or_else(|poisoned| {
            warn!("environment lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }
}
