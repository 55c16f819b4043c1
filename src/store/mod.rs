//! Persistence adapters for the shared coordination rows
//!
//! Every node talks to the same backing store. Correctness of the election
//! rests on two conditional writes the store must make linearizable per row:
//! insert-if-absent and update-if-matches. Rows carry a `last_modified`
//! timestamp that is always stamped by the store, never by the caller.

pub mod memory;
pub mod rocks;

use crate::common::Result;
use crate::providedata::ProvideData;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

pub use memory::MemStore;
pub use rocks::RocksStore;

/// One distributed lock row per `(data_center, lock_name)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    pub data_center: String,
    pub lock_name: String,
    pub owner: String,
    /// Lease length granted on acquire and on every heartbeat
    pub duration_ms: u64,
    pub gmt_create: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
}

impl LockRecord {
    /// A row to be inserted; timestamps are filled in by the store.
    pub fn new(
        data_center: impl Into<String>,
        lock_name: impl Into<String>,
        owner: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            data_center: data_center.into(),
            lock_name: lock_name.into(),
            owner: owner.into(),
            duration_ms,
            gmt_create: DateTime::UNIX_EPOCH,
            last_modified: DateTime::UNIX_EPOCH,
        }
    }

    /// `now - last_modified > duration`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        (now - self.last_modified).num_milliseconds() > self.duration_ms as i64
    }

    pub fn expire_at(&self) -> DateTime<Utc> {
        self.last_modified + Duration::milliseconds(self.duration_ms as i64)
    }

    pub(crate) fn key(&self) -> String {
        lock_key(&self.data_center, &self.lock_name)
    }
}

impl std::fmt::Display for LockRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{} owner={} modified={} duration={}ms",
            self.data_center,
            self.lock_name,
            self.owner,
            self.last_modified.timestamp_millis(),
            self.duration_ms
        )
    }
}

/// Takeover request: hand the lock to `new_owner` only if the row still
/// holds exactly the `(owner, last_modified)` pair the follower saw expire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FollowCompeteLock {
    pub data_center: String,
    pub lock_name: String,
    pub expected_owner: String,
    pub expected_last_modified: DateTime<Utc>,
    pub new_owner: String,
}

impl FollowCompeteLock {
    pub fn from_observed(observed: &LockRecord, new_owner: impl Into<String>) -> Self {
        Self {
            data_center: observed.data_center.clone(),
            lock_name: observed.lock_name.clone(),
            expected_owner: observed.owner.clone(),
            expected_last_modified: observed.last_modified,
            new_owner: new_owner.into(),
        }
    }

    fn matches(&self, current: &LockRecord) -> bool {
        current.owner == self.expected_owner
            && current.last_modified == self.expected_last_modified
    }
}

/// Conditional-write access to the distributed lock rows.
pub trait DistributeLockStore: Send + Sync {
    /// Point query.
    fn query_lock(&self, data_center: &str, lock_name: &str) -> Result<Option<LockRecord>>;

    /// Insert if absent; `Error::Conflict` when the row already exists.
    fn compete_lock_on_insert(&self, lock: &LockRecord) -> Result<()>;

    /// Update if the row still matches; `Ok(false)` when it does not.
    fn compete_lock_on_update(&self, compete: &FollowCompeteLock) -> Result<bool>;

    /// Refresh `last_modified` while `owner` is unchanged.
    /// `Error::Conflict` when the owner changed, `Error::NotFound` when the
    /// row is gone.
    fn owner_heartbeat(&self, lock: &LockRecord) -> Result<LockRecord>;
}

/// Versioned provide-data rows served to every node.
pub trait ProvideDataStore: Send + Sync {
    fn get_provide_data(&self, data_id: &str) -> Result<Option<ProvideData>>;

    /// Store `data` if its version is strictly newer than the stored one.
    fn put_provide_data(&self, data: &ProvideData) -> Result<bool>;
}

pub(crate) fn lock_key(data_center: &str, lock_name: &str) -> String {
    format!("{}/{}", data_center, lock_name)
}

/// Timestamp for a write: the store's clock, bumped past the previous value
/// so consecutive writes to a row strictly increase `last_modified`.
pub(crate) fn stamp(previous: Option<DateTime<Utc>>, now: DateTime<Utc>) -> DateTime<Utc> {
    // Millisecond precision, like the row it stands in for.
    let now = DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now);
    match previous {
        Some(prev) if now <= prev => prev + Duration::milliseconds(1),
        _ => now,
    }
}
