//! Node liveness leases
//!
//! A node is alive while `now < expires_at`. Renewal only ever pushes
//! `expires_at` forward; eviction is the only way an entry leaves the table,
//! and only the current leader is permitted to evict.

use super::node::LeaseNode;
use crate::common::{Clock, Error, Observable, Result, METRICS};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Serialize)]
pub struct Lease<T> {
    pub node: T,
    pub registered_at: DateTime<Utc>,
    pub last_renewed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub renewal_count: u64,
}

impl<T> Lease<T> {
    pub fn is_alive(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Membership change published to observers.
#[derive(Debug, Clone)]
pub enum LeaseEvent<T> {
    /// First registration of a node
    Registered(T),
    /// Leases removed by one eviction pass
    Evicted(Vec<T>),
}

pub struct LeaseManager<T: LeaseNode> {
    leases: RwLock<HashMap<String, Lease<T>>>,
    lease_duration: chrono::Duration,
    grace: chrono::Duration,
    clock: Arc<dyn Clock>,
    evict_permitted: AtomicBool,
    /// Checked on every eviction on top of `evict_permitted`
    evict_guard: RwLock<Option<EvictGuard>>,
    events: Observable<LeaseEvent<T>>,
}

pub type EvictGuard = Arc<dyn Fn() -> bool + Send + Sync>;

impl<T: LeaseNode> LeaseManager<T> {
    pub fn new(lease_duration: Duration, grace: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            leases: RwLock::new(HashMap::new()),
            lease_duration: to_chrono(lease_duration),
            grace: to_chrono(grace),
            clock,
            evict_permitted: AtomicBool::new(false),
            evict_guard: RwLock::new(None),
            events: Observable::new(),
        }
    }

    pub fn add_observer(&self, observer: Arc<dyn Fn(&LeaseEvent<T>) + Send + Sync>) {
        self.events.add_observer(observer);
    }

    /// Create or refresh the lease for `node`.
    pub fn register(&self, node: T) -> Lease<T> {
        let now = self.clock.now();
        let expires_at = now + self.lease_duration;
        let (lease, joined) = {
            let mut leases = self.leases.write().unwrap_or_else(|e| e.into_inner());
            match leases.get_mut(node.node_id()) {
                Some(lease) => {
                    lease.node = node;
                    lease.last_renewed_at = now;
                    lease.expires_at = lease.expires_at.max(expires_at);
                    lease.renewal_count += 1;
                    (lease.clone(), false)
                }
                None => {
                    let lease = Lease {
                        node,
                        registered_at: now,
                        last_renewed_at: now,
                        expires_at,
                        renewal_count: 0,
                    };
                    leases.insert(lease.node.node_id().to_string(), lease.clone());
                    (lease, true)
                }
            }
        };

        if joined {
            METRICS.lease_registrations.inc();
            tracing::info!("node {} registered, lease until {}", lease.node.node_id(), lease.expires_at);
            self.events.notify(&LeaseEvent::Registered(lease.node.clone()));
        } else {
            METRICS.lease_renewals.inc();
        }
        lease
    }

    /// Extend the lease of a registered node.
    pub fn renew(&self, node_id: &str) -> Result<Lease<T>> {
        let now = self.clock.now();
        let mut leases = self.leases.write().unwrap_or_else(|e| e.into_inner());
        let lease = leases
            .get_mut(node_id)
            .ok_or_else(|| Error::NotFound(format!("no lease for node {}", node_id)))?;
        lease.last_renewed_at = now;
        lease.expires_at = lease.expires_at.max(now + self.lease_duration);
        lease.renewal_count += 1;
        METRICS.lease_renewals.inc();
        Ok(lease.clone())
    }

    pub fn get_lease(&self, node_id: &str) -> Option<Lease<T>> {
        self.leases
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(node_id)
            .cloned()
    }

    /// Nodes whose lease has not expired, sorted by node id.
    pub fn alive_nodes(&self) -> Vec<T> {
        let now = self.clock.now();
        let leases = self.leases.read().unwrap_or_else(|e| e.into_inner());
        let mut alive: Vec<&Lease<T>> = leases.values().filter(|l| l.is_alive(now)).collect();
        alive.sort_by(|a, b| a.node.node_id().cmp(b.node.node_id()));
        alive.into_iter().map(|l| l.node.clone()).collect()
    }

    /// Tracked leases, alive or not.
    pub fn lease_count(&self) -> usize {
        self.leases.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn set_evict_permitted(&self, permitted: bool) {
        let before = self.evict_permitted.swap(permitted, Ordering::SeqCst);
        if before != permitted {
            tracing::info!("lease eviction {}", if permitted { "enabled" } else { "disabled" });
        }
    }

    /// Install a check that must also pass for eviction, e.g. that this
    /// node's lock lease is still current.
    pub fn set_evict_guard(&self, guard: EvictGuard) {
        *self.evict_guard.write().unwrap_or_else(|e| e.into_inner()) = Some(guard);
    }

    pub fn is_evict_permitted(&self) -> bool {
        if !self.evict_permitted.load(Ordering::SeqCst) {
            return false;
        }
        let guard = self
            .evict_guard
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        guard.map_or(true, |guard| guard())
    }

    /// Remove leases expired for longer than the grace margin.
    ///
    /// Fails with `Error::NotLeader` and removes nothing unless eviction was
    /// permitted by the coordinator and the guard, if any, passes.
    pub fn evict_expired(&self) -> Result<Vec<T>> {
        if !self.is_evict_permitted() {
            return Err(Error::NotLeader("eviction not permitted on this node".into()));
        }

        let now = self.clock.now();
        let evicted: Vec<T> = {
            let mut leases = self.leases.write().unwrap_or_else(|e| e.into_inner());
            let expired: Vec<String> = leases
                .iter()
                .filter(|(_, l)| now > l.expires_at + self.grace)
                .map(|(id, _)| id.clone())
                .collect();
            let mut evicted: Vec<T> = expired
                .iter()
                .filter_map(|id| leases.remove(id))
                .map(|l| l.node)
                .collect();
            METRICS
                .lease_alive_nodes
                .set(leases.values().filter(|l| l.is_alive(now)).count() as u64);
            evicted.sort_by(|a, b| a.node_id().cmp(b.node_id()));
            evicted
        };

        if !evicted.is_empty() {
            METRICS.lease_evictions.add(evicted.len() as u64);
            let ids: Vec<&str> = evicted.iter().map(|n| n.node_id()).collect();
            tracing::info!("evicted {} expired leases: {:?}", ids.len(), ids);
            self.events.notify(&LeaseEvent::Evicted(evicted.clone()));
        }
        Ok(evicted)
    }
}

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::weeks(52 * 100))
}

/// Sweep expired leases every `interval` until `shutdown` flips to `true`.
/// Sweeps on non-leaders are skipped.
pub fn start_evict_task<T: LeaseNode>(
    manager: Arc<LeaseManager<T>>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
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
            match manager.evict_expired() {
                Ok(_) => {}
                Err(Error::NotLeader(_)) => tracing::debug!("skip lease sweep, not leader"),
                Err(e) => tracing::warn!("lease sweep failed: {}", e),
            }
        }
        tracing::info!("lease sweeper stopped");
    })
}
