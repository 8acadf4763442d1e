//! In-memory instance directory.

use fleet_types::{ServiceHandle, ServiceId};
use indexmap::IndexMap;
use tracing::debug;

/// The provisioner's view of what is provisioned: instances and bindings
/// keyed by their own `service_id`.
///
/// Inserts overwrite, so a key is never duplicated. Iteration follows
/// insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstanceDirectory {
    records: IndexMap<ServiceId, ServiceHandle>,
}

impl InstanceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a record under its own `service_id`, replacing any previous one.
    pub fn insert(&mut self, handle: ServiceHandle) {
        self.records.insert(handle.service_id.clone(), handle);
    }

    pub fn get(&self, id: &ServiceId) -> Option<&ServiceHandle> {
        self.records.get(id)
    }

    pub fn remove(&mut self, id: &ServiceId) -> Option<ServiceHandle> {
        self.records.shift_remove(id)
    }

    /// Bulk-replace entries from a snapshot of the system of record.
    ///
    /// Entries not mentioned in `handles` are kept.
    pub fn update_handles(&mut self, handles: impl IntoIterator<Item = ServiceHandle>) {
        let mut count = 0usize;
        for handle in handles {
            self.insert(handle);
            count += 1;
        }
        debug!(updated = count, total = self.records.len(), "Handles updated");
    }

    /// Every binding of instance `name`: records whose `credentials.name`
    /// is `name`, excluding the instance's own record.
    pub fn find_all_bindings(&self, name: &ServiceId) -> Vec<&ServiceHandle> {
        self.records
            .values()
            .filter(|handle| handle.is_binding_of(name))
            .collect()
    }

    pub fn contains(&self, id: &ServiceId) -> bool {
        self.records.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ServiceHandle> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
