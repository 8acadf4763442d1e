//! Update-handle collaborator.

use async_trait::async_trait;
use fleet_types::{ServiceHandle, ServiceId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// Persists corrected handles in the upstream system of record.
#[async_trait]
pub trait HandleStore: Send + Sync {
    /// Returns whether the handle was persisted.
    async fn update(&self, handle: ServiceHandle) -> bool;
}

/// Keeps handles in memory.
#[derive(Default)]
pub struct MemoryHandleStore {
    handles: Mutex<HashMap<ServiceId, ServiceHandle>>,
    failing: AtomicBool,
}

impl MemoryHandleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make later updates fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    pub fn get(&self, id: &ServiceId) -> Option<ServiceHandle> {
        self.handles.lock().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.handles.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.lock().is_empty()
    }
}

#[async_trait]
impl HandleStore for MemoryHandleStore {
    async fn update(&self, handle: ServiceHandle) -> bool {
        if self.failing.load(Ordering::Relaxed) {
            return false;
        }
        self.handles.lock().insert(handle.service_id.clone(), handle);
        true
    }
}
