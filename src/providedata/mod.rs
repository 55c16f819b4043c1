//! Versioned provide-data distribution
//!
//! Small pieces of cluster-wide configuration (switches, blacklists) are
//! published by a central authority as [`ProvideData`] rows carrying an
//! origin-assigned version. Every node polls the rows it cares about and
//! swaps the parsed value into a local [`VersionedSlot`] with compare-and-set,
//! so a slow, stale fetch can never overwrite a newer value.
//!
//! The set of property kinds is closed: [`ClusterRateLimit`] and
//! [`DataInfoIdBlacklist`].

pub mod blacklist;
pub mod fetcher;
pub mod rate_limit;
pub mod service;
pub mod storage;

use serde::{Deserialize, Serialize};

pub use blacklist::DataInfoIdBlacklist;
pub use fetcher::{HttpProvideDataFetcher, ProvideDataFetcher, StoreProvideDataFetcher};
pub use rate_limit::{ClusterRateLimit, ClusterRateLimitSwitch};
pub use service::{
    start_fetch_task, FeatureSwitch, FetchOutcome, FetchSystemPropertyService, SystemPropertyKind,
};
pub use storage::{SystemDataStorage, VersionedSlot, INIT_VERSION};

mod private {
    pub trait Sealed {}
}

/// A versioned configuration payload as published by the authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvideData {
    pub data_id: String,
    pub version: i64,
    /// Raw payload, usually JSON; `None` when the authority has no value
    #[serde(default)]
    pub data: Option<String>,
}

impl ProvideData {
    pub fn new(data_id: impl Into<String>, version: i64, data: Option<String>) -> Self {
        Self {
            data_id: data_id.into(),
            version,
            data,
        }
    }
}
