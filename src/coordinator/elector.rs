//! Lock-row leader election
//!
//! Every meta node runs the same polling state machine against one shared
//! [`LockRecord`] per `(data_center, lock_name)`:
//!
//! ```text
//!            query
//!              │
//!      ┌───────┴────────┐
//!    absent           present
//!      │                │
//!  insert-if-absent   owner == me ? ──yes──> heartbeat (update-if-owner)
//!      │                │
//!   re-query           no
//!                       │
//!                   expired ? ──no──> wait
//!                       │
//!                      yes
//!                       │
//!        update-if-(owner, last_modified) match
//!                       │
//!                    re-query
//! ```
//!
//! Mutual exclusion comes entirely from the store's conditional writes; a
//! crashed or paused leader stops heartbeating and its row expires.

use crate::common::{Clock, Error, Observable, Result, METRICS};
use crate::store::{DistributeLockStore, FollowCompeteLock, LockRecord};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Role of this node as of the last cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ElectorRole {
    Leader,
    Follower,
}

impl std::fmt::Display for ElectorRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ElectorRole::Leader => write!(f, "leader"),
            ElectorRole::Follower => write!(f, "follower"),
        }
    }
}

/// Snapshot of the lock row as last observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeaderInfo {
    /// `last_modified` in epoch millis; grows with every write to the row
    pub epoch: i64,
    pub leader: Option<String>,
    pub last_modified: DateTime<Utc>,
    pub duration_ms: u64,
}

impl LeaderInfo {
    /// Sentinel for "no lock row exists".
    pub fn no_leader() -> Self {
        Self {
            epoch: -1,
            leader: None,
            last_modified: DateTime::UNIX_EPOCH,
            duration_ms: 0,
        }
    }

    pub fn has_leader(&self) -> bool {
        self.leader.is_some()
    }

    pub fn expire_at(&self) -> DateTime<Utc> {
        self.last_modified + ChronoDuration::milliseconds(self.duration_ms as i64)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expire_at()
    }
}

impl From<&LockRecord> for LeaderInfo {
    fn from(lock: &LockRecord) -> Self {
        Self {
            epoch: lock.last_modified.timestamp_millis(),
            leader: Some(lock.owner.clone()),
            last_modified: lock.last_modified,
            duration_ms: lock.duration_ms,
        }
    }
}

impl std::fmt::Display for LeaderInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.leader {
            Some(leader) => write!(
                f,
                "leader={} epoch={} duration={}ms",
                leader, self.epoch, self.duration_ms
            ),
            None => write!(f, "no leader"),
        }
    }
}

/// Published after a cycle changed this node's role or the leader identity.
#[derive(Debug, Clone)]
pub struct LeadershipEvent {
    pub role: ElectorRole,
    pub previous_role: ElectorRole,
    pub info: LeaderInfo,
}

/// Settings for one election
#[derive(Debug, Clone)]
pub struct ElectorSettings {
    pub myself: String,
    pub data_center: String,
    pub lock_name: String,
    pub lock_duration: Duration,
}

impl ElectorSettings {
    pub fn new(myself: impl Into<String>, data_center: impl Into<String>) -> Self {
        Self {
            myself: myself.into(),
            data_center: data_center.into(),
            lock_name: "META-MASTER".to_string(),
            lock_duration: Duration::from_secs(15),
        }
    }

    pub fn from_config(myself: impl Into<String>, meta: &crate::common::MetaConfig) -> Self {
        Self {
            myself: myself.into(),
            data_center: meta.data_center.clone(),
            lock_name: meta.lock_name.clone(),
            lock_duration: meta.lock_duration(),
        }
    }
}

pub struct LeaderElector {
    settings: ElectorSettings,
    store: Arc<dyn DistributeLockStore>,
    clock: Arc<dyn Clock>,
    leader_info: RwLock<Arc<LeaderInfo>>,
    role: Mutex<ElectorRole>,
    /// Observer mode: query only, never compete
    observe_only: AtomicBool,
    /// Serializes cycles started concurrently on this node
    cycle: Mutex<()>,
    events: Observable<LeadershipEvent>,
}

impl LeaderElector {
    pub fn new(
        settings: ElectorSettings,
        store: Arc<dyn DistributeLockStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            settings,
            store,
            clock,
            leader_info: RwLock::new(Arc::new(LeaderInfo::no_leader())),
            role: Mutex::new(ElectorRole::Follower),
            observe_only: AtomicBool::new(false),
            cycle: Mutex::new(()),
            events: Observable::new(),
        }
    }

    pub fn myself(&self) -> &str {
        &self.settings.myself
    }

    pub fn settings(&self) -> &ElectorSettings {
        &self.settings
    }

    pub fn add_listener(&self, listener: Arc<dyn Fn(&LeadershipEvent) + Send + Sync>) {
        self.events.add_observer(listener);
    }

    /// Latest published snapshot.
    pub fn leader_info(&self) -> Arc<LeaderInfo> {
        self.leader_info
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn role(&self) -> ElectorRole {
        *self.role.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// This node owns the lock and the lease on it has not run out.
    pub fn am_i_leader(&self) -> bool {
        let info = self.leader_info();
        info.leader.as_deref() == Some(self.myself()) && !info.is_expired(self.clock.now())
    }

    /// Stop competing; keep publishing whoever holds the lock.
    pub fn change_to_observer(&self) {
        if !self.observe_only.swap(true, Ordering::SeqCst) {
            tracing::info!("elector {} switched to observer", self.myself());
        }
    }

    pub fn change_to_compete(&self) {
        if self.observe_only.swap(false, Ordering::SeqCst) {
            tracing::info!("elector {} rejoined the election", self.myself());
        }
    }

    pub fn is_observer(&self) -> bool {
        self.observe_only.load(Ordering::SeqCst)
    }

    /// Run one election cycle and return the resulting snapshot.
    ///
    /// Store failures are contained here: the previous snapshot and role
    /// stay in effect and the next cycle retries. A leader still drops its
    /// role once the lease on its snapshot has run out.
    pub fn elect(&self) -> Arc<LeaderInfo> {
        let _cycle = self.cycle.lock().unwrap_or_else(|e| e.into_inner());
        METRICS.elector_cycles.inc();

        let result = if self.is_observer() {
            self.do_query()
        } else {
            self.do_elect()
        };
        match result {
            Ok(info) => self.publish(info),
            Err(e) => {
                METRICS.elector_store_errors.inc();
                tracing::warn!(
                    "elect {}/{} failed, keeping {}: {}",
                    self.settings.data_center,
                    self.settings.lock_name,
                    self.leader_info(),
                    e
                );
            }
        }
        self.step_down_if_expired();
        self.leader_info()
    }

    /// Refresh the snapshot without writing.
    pub fn query(&self) -> Arc<LeaderInfo> {
        let _cycle = self.cycle.lock().unwrap_or_else(|e| e.into_inner());
        match self.do_query() {
            Ok(info) => self.publish(info),
            Err(e) => {
                METRICS.elector_store_errors.inc();
                tracing::warn!("query leader failed: {}", e);
            }
        }
        self.step_down_if_expired();
        self.leader_info()
    }

    fn do_query(&self) -> Result<LeaderInfo> {
        Ok(self
            .query_lock()?
            .map(|lock| LeaderInfo::from(&lock))
            .unwrap_or_else(LeaderInfo::no_leader))
    }

    fn do_elect(&self) -> Result<LeaderInfo> {
        let lock = match self.query_lock()? {
            Some(lock) => lock,
            None => return self.compete_leader(),
        };

        let role = if lock.owner == self.myself() {
            ElectorRole::Leader
        } else {
            ElectorRole::Follower
        };
        let lock = match role {
            ElectorRole::Leader => self.on_leader_working(lock)?,
            ElectorRole::Follower => self.on_follow_working(lock)?,
        };

        let info = LeaderInfo::from(&lock);
        tracing::debug!("meta role: {}, {}", role, info);
        Ok(info)
    }

    fn query_lock(&self) -> Result<Option<LockRecord>> {
        self.store
            .query_lock(&self.settings.data_center, &self.settings.lock_name)
    }

    /// Re-read the row after a write; it must exist by now.
    fn requery(&self) -> Result<LockRecord> {
        self.query_lock()?.ok_or_else(|| {
            Error::Store(format!(
                "lock {}/{} missing after write",
                self.settings.data_center, self.settings.lock_name
            ))
        })
    }

    fn compete_leader(&self) -> Result<LeaderInfo> {
        let lock = LockRecord::new(
            self.settings.data_center.clone(),
            self.settings.lock_name.clone(),
            self.myself(),
            self.settings.lock_duration.as_millis() as u64,
        );

        match self.store.compete_lock_on_insert(&lock) {
            Ok(()) => {
                METRICS.elector_competitions_won.inc();
                tracing::info!("meta {} compete success, become leader", self.myself());
            }
            Err(Error::Conflict(reason)) => {
                tracing::info!("meta {} compete lost: {}", self.myself(), reason);
            }
            Err(e) => {
                tracing::warn!("meta {} compete error: {}", self.myself(), e);
            }
        }

        // Winner or not, the stored row is the only authority.
        let lock = self.requery()?;
        Ok(LeaderInfo::from(&lock))
    }

    fn on_leader_working(&self, lock: LockRecord) -> Result<LockRecord> {
        let mut beat = lock.clone();
        beat.duration_ms = self.settings.lock_duration.as_millis() as u64;
        match self.store.owner_heartbeat(&beat) {
            Ok(renewed) => {
                tracing::debug!(
                    "leader {} heartbeat, lease until {}",
                    self.myself(),
                    renewed.expire_at()
                );
                self.requery()
            }
            Err(Error::Conflict(reason)) => {
                // Taken over between our query and the heartbeat.
                tracing::info!("leader {} lost the lock: {}", self.myself(), reason);
                self.requery()
            }
            Err(e) => {
                METRICS.elector_heartbeat_failures.inc();
                tracing::error!("leader {} heartbeat error: {}", self.myself(), e);
                Ok(lock)
            }
        }
    }

    fn on_follow_working(&self, lock: LockRecord) -> Result<LockRecord> {
        if !lock.is_expired(self.clock.now()) {
            return Ok(lock);
        }

        tracing::info!("lock expired: {}, meta {} starts takeover", lock, self.myself());
        let compete = FollowCompeteLock::from_observed(&lock, self.myself());
        match self.store.compete_lock_on_update(&compete) {
            Ok(true) => {
                METRICS.elector_takeovers.inc();
                tracing::info!("meta {} took over {}", self.myself(), lock.lock_name);
            }
            Ok(false) => {
                tracing::info!("meta {} takeover lost, lock moved on", self.myself());
            }
            Err(e) => {
                tracing::warn!("meta {} takeover error: {}", self.myself(), e);
            }
        }

        let fresh = self.requery()?;
        tracing::info!("elector finish, new lock: {}", fresh);
        Ok(fresh)
    }

    fn publish(&self, info: LeaderInfo) {
        let role = if info.leader.as_deref() == Some(self.myself()) {
            ElectorRole::Leader
        } else {
            ElectorRole::Follower
        };

        let previous = {
            let mut current = self.leader_info.write().unwrap_or_else(|e| e.into_inner());
            std::mem::replace(&mut *current, Arc::new(info.clone()))
        };
        self.transition(role, previous.leader != info.leader, info);
    }

    /// A leader whose cached lease ran out without a successful cycle can no
    /// longer assume it holds the lock; another node may already own it.
    fn step_down_if_expired(&self) {
        if self.role() != ElectorRole::Leader || self.am_i_leader() {
            return;
        }
        let info = self.leader_info();
        tracing::warn!(
            "meta {} lease expired at {} without a heartbeat, stepping down",
            self.myself(),
            info.expire_at()
        );
        self.transition(ElectorRole::Follower, false, info.as_ref().clone());
    }

    fn transition(&self, role: ElectorRole, leader_changed: bool, info: LeaderInfo) {
        let previous_role = {
            let mut current = self.role.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::replace(&mut *current, role)
        };
        METRICS
            .elector_is_leader
            .set(u64::from(role == ElectorRole::Leader));

        if previous_role != role || leader_changed {
            tracing::info!(
                "meta {} role {} -> {}, {}",
                self.myself(),
                previous_role,
                role,
                info
            );
            self.events.notify(&LeadershipEvent {
                role,
                previous_role,
                info,
            });
        }
    }
}

/// Run `elector` every `interval` until `shutdown` flips to `true`.
///
/// Each cycle runs on the blocking pool, so a slow store only delays this
/// elector and never the other periodic tasks.
pub fn start_elector_task(
    elector: Arc<LeaderElector>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        // Spread first attempts of nodes started together.
        let jitter_ms = rand::random::<u64>() % (interval.as_millis() as u64 / 5).max(1);
        tokio::time::sleep(Duration::from_millis(jitter_ms)).await;

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                res = shutdown.changed() => {
                    if res.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }
            let cycle = elector.clone();
            if let Err(e) = tokio::task::spawn_blocking(move || cycle.elect()).await {
                tracing::error!("elector cycle aborted: {}", e);
            }
        }
        tracing::info!("elector {} stopped", elector.myself());
    })
}
