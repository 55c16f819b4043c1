//! # regcoord
//!
//! Control-plane coordination for a distributed service registry:
//! - Leader election over a single lock row with conditional writes
//! - Lease-based liveness tracking of meta and session nodes
//! - Versioned provide data (rate-limit switch, blacklist) fanned out by polling
//!
//! ## Architecture

#![allow(clippy::result_large_err)]
//!
//! ```text
//!  ┌────────────┐   ┌────────────┐   ┌────────────┐
//!  │  meta-1    │   │  meta-2    │   │  meta-3    │
//!  │  elector   │   │  elector   │   │  elector   │
//!  │  leases    │   │  leases    │   │  leases    │
//!  │  fetchers  │   │  fetchers  │   │  fetchers  │
//!  └─────┬──────┘   └─────┬──────┘   └─────┬──────┘
//!        │ query / insert-if-absent / update-if-match
//!        └────────────────┼────────────────┘
//!                  ┌──────▼───────┐
//!                  │  lock store  │  (data_center, lock_name) -> owner, last_modified
//!                  │ provide data │  data_id -> version, payload
//!                  └──────────────┘
//! ```
//!
//! The node whose lock row is fresh is the leader; only the leader evicts
//! expired leases and accepts provide data writes. Every node polls provide
//! data and installs strictly newer versions with a compare-and-set.
//!
//! ## Usage
//!
//! ```bash
//! regcoord-meta serve \
//!   --id meta-1 \
//!   --bind 0.0.0.0:9615 \
//!   --data-center dc1 \
//!   --db ./meta-data \
//!   --lock-duration 15s
//! ```

pub mod common;
pub mod coordinator;
pub mod providedata;
pub mod store;

// Re-export commonly used types
pub use common::{Config, Error, Result};
pub use coordinator::{ClusterCoordinator, MetaServer};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
