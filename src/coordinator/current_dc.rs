//! Meta server facade for the local data center
//!
//! [`ClusterCoordinator`] ties one [`LeaderElector`] to one
//! [`LeaseManager`]: only the node holding the lock may evict leases, and
//! observers hear about leadership, liveness and roster changes in one
//! stream of [`ClusterEvent`]s.

use super::elector::{ElectorRole, LeaderElector, LeaderInfo, LeadershipEvent};
use super::lease::{Lease, LeaseEvent, LeaseManager};
use super::node::{LeaseNode, Node, NodeType};
use crate::common::{Error, Observable, Result, METRICS};
use crate::providedata::FeatureSwitch;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock, Weak};

#[derive(Debug, Clone)]
pub enum ClusterEvent {
    /// The leader identity or this node's role changed
    LeaderChanged { role: ElectorRole, info: LeaderInfo },
    /// Alive set of one node type changed
    MembershipChanged {
        node_type: NodeType,
        alive: Vec<String>,
    },
    /// Configured meta roster was replaced
    RosterChanged(Vec<Node>),
}

pub struct ClusterCoordinator {
    elector: Arc<LeaderElector>,
    leases: Arc<LeaseManager<Node>>,
    roster: RwLock<Arc<Vec<Node>>>,
    features: RwLock<HashMap<String, Arc<dyn FeatureSwitch>>>,
    events: Arc<Observable<ClusterEvent>>,
}

impl ClusterCoordinator {
    pub fn new(elector: Arc<LeaderElector>, leases: Arc<LeaseManager<Node>>) -> Self {
        let events: Arc<Observable<ClusterEvent>> = Arc::new(Observable::new());

        leases.set_evict_permitted(elector.role() == ElectorRole::Leader);
        {
            // Weak: the elector's listeners already hold the manager.
            let weak: Weak<LeaderElector> = Arc::downgrade(&elector);
            leases.set_evict_guard(Arc::new(move || {
                weak.upgrade().is_some_and(|elector| elector.am_i_leader())
            }));
        }
        {
            let leases = leases.clone();
            let events = events.clone();
            elector.add_listener(Arc::new(move |event: &LeadershipEvent| {
                leases.set_evict_permitted(event.role == ElectorRole::Leader);
                events.notify(&ClusterEvent::LeaderChanged {
                    role: event.role,
                    info: event.info.clone(),
                });
            }));
        }
        {
            // Weak: the manager owns this closure.
            let weak: Weak<LeaseManager<Node>> = Arc::downgrade(&leases);
            let events = events.clone();
            leases.add_observer(Arc::new(move |event: &LeaseEvent<Node>| {
                let Some(leases) = weak.upgrade() else {
                    return;
                };
                let touched: BTreeSet<NodeType> = match event {
                    LeaseEvent::Registered(node) => BTreeSet::from([node.node_type]),
                    LeaseEvent::Evicted(nodes) => nodes.iter().map(|n| n.node_type).collect(),
                };
                let alive = leases.alive_nodes();
                for node_type in touched {
                    events.notify(&ClusterEvent::MembershipChanged {
                        node_type,
                        alive: ids_of(&alive, node_type),
                    });
                }
            }));
        }

        Self {
            elector,
            leases,
            roster: RwLock::new(Arc::new(Vec::new())),
            features: RwLock::new(HashMap::new()),
            events,
        }
    }

    pub fn elector(&self) -> &Arc<LeaderElector> {
        &self.elector
    }

    pub fn leases(&self) -> &Arc<LeaseManager<Node>> {
        &self.leases
    }

    pub fn add_observer(&self, observer: Arc<dyn Fn(&ClusterEvent) + Send + Sync>) {
        self.events.add_observer(observer);
    }

    // === Leadership ===

    pub fn get_leader(&self) -> LeaderInfo {
        self.elector.leader_info().as_ref().clone()
    }

    pub fn is_leader(&self) -> bool {
        self.elector.am_i_leader()
    }

    // === Liveness ===

    /// Register-or-renew heartbeat from `node`.
    pub fn renew(&self, node: Node) -> Lease<Node> {
        let lease = self.leases.register(node);
        METRICS
            .lease_alive_nodes
            .set(self.leases.alive_nodes().len() as u64);
        lease
    }

    pub fn evict_expired(&self) -> Result<Vec<Node>> {
        self.leases.evict_expired()
    }

    /// Ids of alive nodes of `node_type`, sorted.
    pub fn get_alive_members(&self, node_type: NodeType) -> Vec<String> {
        ids_of(&self.leases.alive_nodes(), node_type)
    }

    pub fn get_session_servers(&self) -> Vec<Node> {
        self.leases
            .alive_nodes()
            .into_iter()
            .filter(|n| n.node_type == NodeType::Session)
            .collect()
    }

    // === Roster ===

    /// Replace the configured meta roster.
    ///
    /// The roster is what operators declared, independent of who is alive.
    /// Entries are sorted and deduplicated by node id; observers are only
    /// told when the result differs from the current roster.
    pub fn update_cluster_members(&self, members: Vec<Node>) -> Result<()> {
        if let Some(bad) = members.iter().find(|n| n.node_type != NodeType::Meta) {
            return Err(Error::InvalidConfig(format!(
                "cluster roster only holds meta nodes, got {} node {}",
                bad.node_type,
                bad.node_id()
            )));
        }

        let mut members = members;
        members.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        members.dedup_by(|a, b| a.node_id == b.node_id);

        {
            let mut roster = self.roster.write().unwrap_or_else(|e| e.into_inner());
            if roster.as_slice() == members.as_slice() {
                return Ok(());
            }
            *roster = Arc::new(members.clone());
        }
        tracing::info!(
            "cluster roster updated: {:?}",
            members.iter().map(|n| n.node_id()).collect::<Vec<_>>()
        );
        self.events.notify(&ClusterEvent::RosterChanged(members));
        Ok(())
    }

    pub fn cluster_members(&self) -> Arc<Vec<Node>> {
        self.roster
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    // === Feature flags ===

    pub fn register_feature(&self, flag: impl Into<String>, switch: Arc<dyn FeatureSwitch>) {
        self.features
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(flag.into(), switch);
    }

    /// Unknown flags are off.
    pub fn is_feature_enabled(&self, flag: &str) -> bool {
        self.features
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(flag)
            .map(|s| s.is_enabled())
            .unwrap_or(false)
    }

    pub fn feature_flags(&self) -> Vec<String> {
        let mut flags: Vec<String> = self
            .features
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        flags.sort();
        flags
    }
}

fn ids_of(nodes: &[Node], node_type: NodeType) -> Vec<String> {
    nodes
        .iter()
        .filter(|n| n.node_type == node_type)
        .map(|n| n.node_id.clone())
        .collect()
}
