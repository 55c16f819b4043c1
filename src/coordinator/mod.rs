//! Meta-node coordination
//!
//! - Leader election over a shared lock row (`elector`)
//! - Node liveness leases (`lease`)
//! - The data-center facade combining both (`current_dc`)
//! - HTTP admin API and server wiring

pub mod current_dc;
pub mod elector;
pub mod http;
pub mod lease;
pub mod node;
pub mod server;

pub use current_dc::{ClusterCoordinator, ClusterEvent};
pub use elector::{
    start_elector_task, ElectorRole, ElectorSettings, LeaderElector, LeaderInfo, LeadershipEvent,
};
pub use lease::{start_evict_task, EvictGuard, Lease, LeaseEvent, LeaseManager};
pub use node::{LeaseNode, Node, NodeType};
pub use server::MetaServer;
