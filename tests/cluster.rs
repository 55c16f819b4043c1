//! Coordinator facade: leadership, leases and membership together
use regcoord::common::{Error, ManualClock, Result};
use regcoord::coordinator::{
    ClusterCoordinator, ClusterEvent, ElectorRole, ElectorSettings, LeaderElector, LeaseManager,
    Node, NodeType,
};
use regcoord::store::{DistributeLockStore, FollowCompeteLock, LockRecord, MemStore};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Shared store as seen from a node that can be cut off from it.
struct PartitionedStore {
    inner: Arc<MemStore>,
    cut_off: AtomicBool,
}

impl PartitionedStore {
    fn check(&self) -> Result<()> {
        if self.cut_off.load(Ordering::SeqCst) {
            return Err(Error::Store("network unreachable".into()));
        }
        Ok(())
    }
}

impl DistributeLockStore for PartitionedStore {
    fn query_lock(&self, data_center: &str, lock_name: &str) -> Result<Option<LockRecord>> {
        self.check()?;
        self.inner.query_lock(data_center, lock_name)
    }

    fn compete_lock_on_insert(&self, lock: &LockRecord) -> Result<()> {
        self.check()?;
        self.inner.compete_lock_on_insert(lock)
    }

    fn compete_lock_on_update(&self, compete: &FollowCompeteLock) -> Result<bool> {
        self.check()?;
        self.inner.compete_lock_on_update(compete)
    }

    fn owner_heartbeat(&self, lock: &LockRecord) -> Result<LockRecord> {
        self.check()?;
        self.inner.owner_heartbeat(lock)
    }
}

fn meta_node(
    id: &str,
    store: Arc<dyn DistributeLockStore>,
    clock: Arc<ManualClock>,
) -> ClusterCoordinator {
    let elector = Arc::new(LeaderElector::new(
        ElectorSettings::new(id, "dc1"),
        store,
        clock.clone(),
    ));
    let leases = Arc::new(LeaseManager::new(
        Duration::from_secs(30),
        Duration::from_secs(5),
        clock,
    ));
    ClusterCoordinator::new(elector, leases)
}

#[test]
fn test_only_leader_evicts() {
    let clock = Arc::new(ManualClock::starting_now());
    let store = Arc::new(MemStore::with_clock(clock.clone()));
    let m1 = meta_node("m1", store.clone(), clock.clone());
    let m2 = meta_node("m2", store, clock.clone());

    m1.elector().elect();
    m2.elector().elect();
    assert!(m1.is_leader());
    assert!(!m2.is_leader());

    for coord in [&m1, &m2] {
        coord.renew(Node::session("s1"));
    }
    clock.advance(Duration::from_secs(36));
    // Keep the lock fresh on m1.
    m1.elector().elect();

    assert!(matches!(m2.evict_expired(), Err(Error::NotLeader(_))));
    assert_eq!(m2.leases().lease_count(), 1);

    let evicted = m1.evict_expired().unwrap();
    assert_eq!(evicted.len(), 1);
    assert_eq!(evicted[0].node_id, "s1");
    assert_eq!(m1.leases().lease_count(), 0);
}

#[test]
fn test_eviction_follows_leadership() {
    let clock = Arc::new(ManualClock::starting_now());
    let store = Arc::new(MemStore::with_clock(clock.clone()));
    let m1 = meta_node("m1", store.clone(), clock.clone());
    let m2 = meta_node("m2", store, clock.clone());

    m1.elector().elect();
    m2.elector().elect();
    assert!(m1.leases().is_evict_permitted());
    assert!(!m2.leases().is_evict_permitted());

    // m1 stalls past its lock lease.
    clock.advance(Duration::from_secs(16));
    m2.elector().elect();
    m1.elector().elect();

    assert!(m2.is_leader());
    assert!(m2.leases().is_evict_permitted());
    assert!(!m1.leases().is_evict_permitted());
    assert_eq!(m1.get_leader().leader.as_deref(), Some("m2"));
}

#[test]
fn test_lease_liveness() {
    let clock = Arc::new(ManualClock::starting_now());
    let store = Arc::new(MemStore::with_clock(clock.clone()));
    let coord = meta_node("m1", store, clock.clone());
    coord.elector().elect();

    coord.renew(Node::session("s1").with_address("10.0.0.1:9600"));
    coord.renew(Node::session("s2"));
    coord.renew(Node::meta("m1"));

    clock.advance(Duration::from_secs(20));
    coord.renew(Node::session("s1"));
    clock.advance(Duration::from_secs(15));

    // s2 expired at 30s, s1 renewed at 20s lives until 50s.
    assert_eq!(coord.get_alive_members(NodeType::Session), vec!["s1"]);
    let sessions = coord.get_session_servers();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].node_id, "s1");

    // s2 is past expiry but still inside the grace margin.
    coord.elector().elect();
    assert!(coord.evict_expired().unwrap().is_empty());
    clock.advance(Duration::from_secs(1));
    coord.elector().elect();
    let evicted: Vec<String> = coord
        .evict_expired()
        .unwrap()
        .into_iter()
        .map(|n| n.node_id)
        .collect();
    assert_eq!(evicted, vec!["m1", "s2"]);
}

#[test]
fn test_renew_after_eviction_registers_again() {
    let clock = Arc::new(ManualClock::starting_now());
    let store = Arc::new(MemStore::with_clock(clock.clone()));
    let coord = meta_node("m1", store, clock.clone());
    coord.elector().elect();

    coord.renew(Node::session("s1"));
    clock.advance(Duration::from_secs(40));
    coord.elector().elect();
    assert_eq!(coord.evict_expired().unwrap().len(), 1);
    assert!(coord.leases().renew("s1").is_err());

    let lease = coord.renew(Node::session("s1"));
    assert_eq!(lease.renewal_count, 0);
    let stored = coord.leases().get_lease("s1").unwrap();
    assert_eq!(stored.registered_at, lease.registered_at);
    assert_eq!(coord.get_alive_members(NodeType::Session), vec!["s1"]);
}

#[test]
fn test_observers_receive_all_event_kinds() {
    let clock = Arc::new(ManualClock::starting_now());
    let store = Arc::new(MemStore::with_clock(clock.clone()));
    let coord = meta_node("m1", store, clock.clone());

    let kinds = Arc::new(Mutex::new(Vec::new()));
    let sink = kinds.clone();
    coord.add_observer(Arc::new(move |e: &ClusterEvent| {
        let kind = match e {
            ClusterEvent::LeaderChanged { .. } => "leader",
            ClusterEvent::MembershipChanged { .. } => "membership",
            ClusterEvent::RosterChanged(_) => "roster",
        };
        sink.lock().unwrap().push(kind);
    }));

    coord.elector().elect();
    coord.renew(Node::session("s1"));
    coord
        .update_cluster_members(vec![Node::meta("m1"), Node::meta("m2")])
        .unwrap();

    assert_eq!(*kinds.lock().unwrap(), vec!["leader", "membership", "roster"]);
}

#[test]
fn test_partitioned_leader_stops_evicting() {
    let clock = Arc::new(ManualClock::starting_now());
    let shared = Arc::new(MemStore::with_clock(clock.clone()));
    let partitioned = Arc::new(PartitionedStore {
        inner: shared.clone(),
        cut_off: AtomicBool::new(false),
    });
    let a = meta_node("A", partitioned.clone(), clock.clone());
    let b = meta_node("B", shared.clone(), clock.clone());

    let roles = Arc::new(Mutex::new(Vec::new()));
    let sink = roles.clone();
    a.add_observer(Arc::new(move |e: &ClusterEvent| {
        if let ClusterEvent::LeaderChanged { role, .. } = e {
            sink.lock().unwrap().push(*role);
        }
    }));

    a.elector().elect();
    assert!(a.is_leader());
    a.renew(Node::session("s1"));

    partitioned.cut_off.store(true, Ordering::SeqCst);
    clock.advance(Duration::from_secs(50));
    b.elector().elect();
    a.elector().elect();

    assert!(b.is_leader());
    assert_eq!(
        shared.query_lock("dc1", "META-MASTER").unwrap().unwrap().owner,
        "B"
    );
    assert_eq!(a.elector().role(), ElectorRole::Follower);
    assert!(!a.is_leader());
    assert!(!a.leases().is_evict_permitted());
    assert!(matches!(a.evict_expired(), Err(Error::NotLeader(_))));
    assert_eq!(a.leases().lease_count(), 1);
    assert_eq!(
        *roles.lock().unwrap(),
        vec![ElectorRole::Leader, ElectorRole::Follower]
    );
}

#[test]
fn test_stale_lease_blocks_eviction_between_cycles() {
    let clock = Arc::new(ManualClock::starting_now());
    let store = Arc::new(MemStore::with_clock(clock.clone()));
    let coord = meta_node("m1", store, clock.clone());
    coord.elector().elect();
    coord.renew(Node::session("s1"));

    // No cycle has run since the lock lease ran out.
    clock.advance(Duration::from_secs(40));
    assert_eq!(coord.elector().role(), ElectorRole::Leader);
    assert!(matches!(coord.evict_expired(), Err(Error::NotLeader(_))));
    assert_eq!(coord.leases().lease_count(), 1);

    coord.elector().elect();
    assert_eq!(coord.evict_expired().unwrap().len(), 1);
}
