//! In-memory upstream handle store.

use fleet_types::{ServiceHandle, ServiceId};
use std::collections::BTreeMap;

/// Stands in for the system of record that persists corrected handles.
#[derive(Debug, Clone, Default)]
pub struct SimHandleStore {
    handles: BTreeMap<ServiceId, ServiceHandle>,
    failing: bool,
    updates: usize,
}

impl SimHandleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later update fail (or succeed again).
    pub fn set_failing(&mut self, failing: bool) {
        self.failing = failing;
    }

    /// Persist a handle. Returns whether the update succeeded.
    pub fn update(&mut self, handle: ServiceHandle) -> bool {
        self.updates += 1;
        if self.failing {
            return false;
        }
        self.handles.insert(handle.service_id.clone(), handle);
        true
    }

    pub fn get(&self, id: &ServiceId) -> Option<&ServiceHandle> {
        self.handles.get(id)
    }

    pub fn handles(&self) -> impl Iterator<Item = &ServiceHandle> {
        self.handles.values()
    }

    /// Update attempts, failed ones included.
    pub fn update_count(&self) -> usize {
        self.updates
    }
}
