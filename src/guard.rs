//! Cycle detection for in-flight slot resolutions.
//!
//! One guard exists per top-level merge invocation and is shared by every
//! nested target built in that call tree. Slots are identified by a
//! per-invocation target id plus key, so sibling keys resolve freely and
//! independent merges never interfere.

use std::collections::HashSet;

use parking_lot::Mutex;
use tracing::warn;

use crate::error::MergeError;

/// Registry of `(target id, key)` pairs currently resolving.
///
/// Membership means "in progress, not yet finalized". Entries are released
/// on synchronous completion or, for deferred slots, when the chain settles.
#[derive(Debug, Default)]
pub(crate) struct CycleGuard {
    running: Mutex<HashSet<(u64, String)>>,
}

impl CycleGuard {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register a resolver; fails if the slot is already in flight.
    pub(crate) fn enter(&self, target: u64, key: &str, path: &str) -> Result<(), MergeError> {
        let mut running = self.running.lock();
        if !running.insert((target, key.to_string())) {
            drop(running);
            return Err(self.cycle(path));
        }
        Ok(())
    }

    /// Release a resolver registration.
    pub(crate) fn exit(&self, target: u64, key: &str) {
        self.running.lock().remove(&(target, key.to_string()));
    }

    /// Build the cycle error for a re-entered slot.
    pub(crate) fn cycle(&self, path: &str) -> MergeError {
        warn!(path, "configuration cycle detected");
        MergeError::Cycle {
            path: path.to_string(),
        }
    }
}
