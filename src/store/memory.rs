//! In-memory store
//!
//! A single mutex around each table makes every conditional write
//! linearizable. Nodes that share one `Arc<MemStore>` therefore see exactly
//! the semantics of a shared database, which is what the integration tests
//! rely on.

use super::{lock_key, stamp, DistributeLockStore, FollowCompeteLock, LockRecord, ProvideDataStore};
use crate::common::{Clock, Error, Result, SystemClock};
use crate::providedata::ProvideData;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub struct MemStore {
    locks: Mutex<HashMap<String, LockRecord>>,
    provide_data: Mutex<HashMap<String, ProvideData>>,
    clock: Arc<dyn Clock>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
            provide_data: Mutex::new(HashMap::new()),
            clock,
        }
    }

    fn locks(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, LockRecord>>> {
        self.locks
            .lock()
            .map_err(|_| Error::Store("lock table poisoned".into()))
    }
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DistributeLockStore for MemStore {
    fn query_lock(&self, data_center: &str, lock_name: &str) -> Result<Option<LockRecord>> {
        Ok(self.locks()?.get(&lock_key(data_center, lock_name)).cloned())
    }

    fn compete_lock_on_insert(&self, lock: &LockRecord) -> Result<()> {
        let mut locks = self.locks()?;
        let key = lock.key();
        if let Some(existing) = locks.get(&key) {
            return Err(Error::Conflict(format!(
                "lock {} already held by {}",
                key, existing.owner
            )));
        }
        let now = stamp(None, self.clock.now());
        let mut row = lock.clone();
        row.gmt_create = now;
        row.last_modified = now;
        locks.insert(key, row);
        Ok(())
    }

    fn compete_lock_on_update(&self, compete: &FollowCompeteLock) -> Result<bool> {
        let mut locks = self.locks()?;
        let key = lock_key(&compete.data_center, &compete.lock_name);
        match locks.get_mut(&key) {
            Some(row) if compete.matches(row) => {
                row.owner = compete.new_owner.clone();
                row.last_modified = stamp(Some(row.last_modified), self.clock.now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn owner_heartbeat(&self, lock: &LockRecord) -> Result<LockRecord> {
        let mut locks = self.locks()?;
        let key = lock.key();
        let row = locks
            .get_mut(&key)
            .ok_or_else(|| Error::NotFound(format!("lock {}", key)))?;
        if row.owner != lock.owner {
            return Err(Error::Conflict(format!(
                "lock {} now owned by {}, not {}",
                key, row.owner, lock.owner
            )));
        }
        row.duration_ms = lock.duration_ms;
        row.last_modified = stamp(Some(row.last_modified), self.clock.now());
        Ok(row.clone())
    }
}

impl ProvideDataStore for MemStore {
    fn get_provide_data(&self, data_id: &str) -> Result<Option<ProvideData>> {
        let table = self
            .provide_data
            .lock()
            .map_err(|_| Error::Store("provide data table poisoned".into()))?;
        Ok(table.get(data_id).cloned())
    }

    fn put_provide_data(&self, data: &ProvideData) -> Result<bool> {
        let mut table = self
            .provide_data
            .lock()
            .map_err(|_| Error::Store("provide data table poisoned".into()))?;
        if let Some(current) = table.get(&data.data_id) {
            if data.version <= current.version {
                return Ok(false);
            }
        }
        table.insert(data.data_id.clone(), data.clone());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ManualClock;
    use std::time::Duration;

    fn setup() -> (Arc<ManualClock>, MemStore) {
        let clock = Arc::new(ManualClock::starting_now());
        let store = MemStore::with_clock(clock.clone());
        (clock, store)
    }

    #[test]
    fn test_insert_if_absent() {
        let (_clock, store) = setup();
        assert!(store.query_lock("dc1", "META-MASTER").unwrap().is_none());

        store
            .compete_lock_on_insert(&LockRecord::new("dc1", "META-MASTER", "a", 15_000))
            .unwrap();
        let err = store
            .compete_lock_on_insert(&LockRecord::new("dc1", "META-MASTER", "b", 15_000))
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        let lock = store.query_lock("dc1", "META-MASTER").unwrap().unwrap();
        assert_eq!(lock.owner, "a");

        // Another data center is an independent election.
        store
            .compete_lock_on_insert(&LockRecord::new("dc2", "META-MASTER", "b", 15_000))
            .unwrap();
    }

    #[test]
    fn test_heartbeat_requires_owner() {
        let (clock, store) = setup();
        store
            .compete_lock_on_insert(&LockRecord::new("dc1", "META-MASTER", "a", 15_000))
            .unwrap();
        let before = store.query_lock("dc1", "META-MASTER").unwrap().unwrap();

        clock.advance(Duration::from_secs(5));
        let after = store.owner_heartbeat(&before).unwrap();
        assert!(after.last_modified > before.last_modified);

        let mut impostor = before.clone();
        impostor.owner = "b".into();
        assert!(matches!(
            store.owner_heartbeat(&impostor),
            Err(Error::Conflict(_))
        ));
    }

    #[test]
    fn test_update_if_matches() {
        let (clock, store) = setup();
        store
            .compete_lock_on_insert(&LockRecord::new("dc1", "META-MASTER", "a", 15_000))
            .unwrap();
        let observed = store.query_lock("dc1", "META-MASTER").unwrap().unwrap();
        clock.advance(Duration::from_secs(16));

        let b = FollowCompeteLock::from_observed(&observed, "b");
        let c = FollowCompeteLock::from_observed(&observed, "c");
        assert!(store.compete_lock_on_update(&b).unwrap());
        assert!(!store.compete_lock_on_update(&c).unwrap());

        let lock = store.query_lock("dc1", "META-MASTER").unwrap().unwrap();
        assert_eq!(lock.owner, "b");
        assert!(lock.last_modified > observed.last_modified);
    }

    #[test]
    fn test_provide_data_only_newer() {
        let store = MemStore::new();
        assert!(store
            .put_provide_data(&ProvideData::new("switch", 2, Some("{}".into())))
            .unwrap());
        assert!(!store
            .put_provide_data(&ProvideData::new("switch", 2, Some("{}".into())))
            .unwrap());
        assert!(!store
            .put_provide_data(&ProvideData::new("switch", 1, None))
            .unwrap());
        assert_eq!(store.get_provide_data("switch").unwrap().unwrap().version, 2);
        assert!(store.get_provide_data("other").unwrap().is_none());
    }
}
