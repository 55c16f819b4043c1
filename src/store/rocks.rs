//! RocksDB-backed store
//!
//! Column families:
//! - `distribute_lock`: `"{data_center}/{lock_name}"` -> bincode [`LockRecord`]
//! - `provide_data`: `data_id` -> bincode [`ProvideData`]
//!
//! RocksDB has no conditional put, so every read-modify-write runs under a
//! single writer mutex. Plain point queries go straight to the DB.

use super::{lock_key, stamp, DistributeLockStore, FollowCompeteLock, LockRecord, ProvideDataStore};
use crate::common::{Clock, Error, Result, SystemClock};
use crate::providedata::ProvideData;
use rocksdb::{Options, DB};
use std::path::Path;
use std::sync::{Arc, Mutex};

const CF_LOCKS: &str = "distribute_lock";
const CF_PROVIDE_DATA: &str = "provide_data";

pub struct RocksStore {
    db: DB,
    write_lock: Mutex<()>,
    clock: Arc<dyn Clock>,
}

impl RocksStore {
    /// Open or create the store
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_clock(path, Arc::new(SystemClock))
    }

    pub fn open_with_clock(path: impl AsRef<Path>, clock: Arc<dyn Clock>) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let db = DB::open_cf(&opts, path, vec![CF_LOCKS, CF_PROVIDE_DATA])?;

        Ok(Self {
            db,
            write_lock: Mutex::new(()),
            clock,
        })
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Store(format!("missing column family {}", name)))
    }

    fn get_lock(&self, key: &str) -> Result<Option<LockRecord>> {
        match self.db.get_cf(self.cf(CF_LOCKS)?, key.as_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put_lock(&self, lock: &LockRecord) -> Result<()> {
        let value = bincode::serialize(lock)
            .map_err(|e| Error::Internal(format!("Serialize error: {}", e)))?;
        self.db
            .put_cf(self.cf(CF_LOCKS)?, lock.key().as_bytes(), value)?;
        Ok(())
    }

    fn writer(&self) -> Result<std::sync::MutexGuard<'_, ()>> {
        self.write_lock
            .lock()
            .map_err(|_| Error::Store("writer mutex poisoned".into()))
    }

    /// Flush to disk
    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

impl DistributeLockStore for RocksStore {
    fn query_lock(&self, data_center: &str, lock_name: &str) -> Result<Option<LockRecord>> {
        self.get_lock(&lock_key(data_center, lock_name))
    }

    fn compete_lock_on_insert(&self, lock: &LockRecord) -> Result<()> {
        let _guard = self.writer()?;
        let key = lock.key();
        if let Some(existing) = self.get_lock(&key)? {
            return Err(Error::Conflict(format!(
                "lock {} already held by {}",
                key, existing.owner
            )));
        }
        let now = stamp(None, self.clock.now());
        let mut row = lock.clone();
        row.gmt_create = now;
        row.last_modified = now;
        self.put_lock(&row)
    }

    fn compete_lock_on_update(&self, compete: &FollowCompeteLock) -> Result<bool> {
        let _guard = self.writer()?;
        let key = lock_key(&compete.data_center, &compete.lock_name);
        match self.get_lock(&key)? {
            Some(mut row) if compete.matches(&row) => {
                row.owner = compete.new_owner.clone();
                row.last_modified = stamp(Some(row.last_modified), self.clock.now());
                self.put_lock(&row)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn owner_heartbeat(&self, lock: &LockRecord) -> Result<LockRecord> {
        let _guard = self.writer()?;
        let key = lock.key();
        let mut row = self
            .get_lock(&key)?
            .ok_or_else(|| Error::NotFound(format!("lock {}", key)))?;
        if row.owner != lock.owner {
            return Err(Error::Conflict(format!(
                "lock {} now owned by {}, not {}",
                key, row.owner, lock.owner
            )));
        }
        row.duration_ms = lock.duration_ms;
        row.last_modified = stamp(Some(row.last_modified), self.clock.now());
        self.put_lock(&row)?;
        Ok(row)
    }
}

impl ProvideDataStore for RocksStore {
    fn get_provide_data(&self, data_id: &str) -> Result<Option<ProvideData>> {
        match self.db.get_cf(self.cf(CF_PROVIDE_DATA)?, data_id.as_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put_provide_data(&self, data: &ProvideData) -> Result<bool> {
        let _guard = self.writer()?;
        if let Some(current) = self.get_provide_data(&data.data_id)? {
            if data.version <= current.version {
                return Ok(false);
            }
        }
        let value = bincode::serialize(data)
            .map_err(|e| Error::Internal(format!("Serialize error: {}", e)))?;
        self.db
            .put_cf(self.cf(CF_PROVIDE_DATA)?, data.data_id.as_bytes(), value)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ManualClock;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn test_lock_lifecycle() {
        let dir = tempdir().unwrap();
        let clock = Arc::new(ManualClock::starting_now());
        let store = RocksStore::open_with_clock(dir.path().join("meta.db"), clock.clone()).unwrap();

        store
            .compete_lock_on_insert(&LockRecord::new("dc1", "META-MASTER", "meta-1", 15_000))
            .unwrap();
        assert!(matches!(
            store.compete_lock_on_insert(&LockRecord::new("dc1", "META-MASTER", "meta-2", 15_000)),
            Err(Error::Conflict(_))
        ));

        let first = store.query_lock("dc1", "META-MASTER").unwrap().unwrap();
        assert_eq!(first.owner, "meta-1");

        let renewed = store.owner_heartbeat(&first).unwrap();
        assert!(renewed.last_modified > first.last_modified);

        clock.advance(Duration::from_secs(20));
        let stale = FollowCompeteLock::from_observed(&first, "meta-2");
        assert!(!store.compete_lock_on_update(&stale).unwrap());
        let fresh = FollowCompeteLock::from_observed(&renewed, "meta-2");
        assert!(store.compete_lock_on_update(&fresh).unwrap());

        let lock = store.query_lock("dc1", "META-MASTER").unwrap().unwrap();
        assert_eq!(lock.owner, "meta-2");
    }

    #[test]
    fn test_rows_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("meta.db");

        {
            let store = RocksStore::open(&path).unwrap();
            store
                .compete_lock_on_insert(&LockRecord::new("dc1", "META-MASTER", "meta-1", 15_000))
                .unwrap();
            store
                .put_provide_data(&ProvideData::new("blacklist", 3, Some("[\"a\"]".into())))
                .unwrap();
            store.flush().unwrap();
        }

        let store = RocksStore::open(&path).unwrap();
        let lock = store.query_lock("dc1", "META-MASTER").unwrap().unwrap();
        assert_eq!(lock.owner, "meta-1");
        let data = store.get_provide_data("blacklist").unwrap().unwrap();
        assert_eq!(data.version, 3);
        assert!(!store
            .put_provide_data(&ProvideData::new("blacklist", 3, None))
            .unwrap());
    }
}
