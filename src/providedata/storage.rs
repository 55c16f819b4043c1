//! Local versioned slot with compare-and-set replacement

use std::sync::{Arc, RwLock};

/// Version every slot starts at, older than anything an authority publishes.
pub const INIT_VERSION: i64 = -1;

/// An immutable, versioned snapshot of a parsed property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemDataStorage<T> {
    pub version: i64,
    pub value: T,
}

impl<T> SystemDataStorage<T> {
    pub fn new(version: i64, value: T) -> Self {
        Self { version, value }
    }
}

/// Holds the current snapshot. Readers get an `Arc` and never observe a
/// partially written value; writers replace the whole `Arc`.
pub struct VersionedSlot<T> {
    current: RwLock<Arc<SystemDataStorage<T>>>,
}

impl<T> VersionedSlot<T> {
    pub fn new(initial: SystemDataStorage<T>) -> Self {
        Self {
            current: RwLock::new(Arc::new(initial)),
        }
    }

    pub fn get(&self) -> Arc<SystemDataStorage<T>> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn version(&self) -> i64 {
        self.get().version
    }

    /// Install `new` iff the slot still holds exactly `expected` (pointer
    /// identity, not equality) and `new` carries a strictly newer version.
    pub fn compare_and_set(
        &self,
        expected: &Arc<SystemDataStorage<T>>,
        new: Arc<SystemDataStorage<T>>,
    ) -> bool {
        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        if !Arc::ptr_eq(&current, expected) || new.version <= current.version {
            return false;
        }
        *current = new;
        true
    }
}
