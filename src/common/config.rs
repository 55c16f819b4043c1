//! Configuration for regcoord nodes

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Global configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Node ID (unique identifier, used as lock owner and lease key)
    pub node_id: String,

    /// Meta-node settings (election, leases, admin API)
    pub meta: MetaConfig,

    /// Provide-data fetch settings
    pub fetch: FetchConfig,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_id: "meta-1".to_string(),
            meta: MetaConfig::default(),
            fetch: FetchConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load `regcoord.toml` (if present) and `REGCOORD__*` environment
    /// overrides (nested keys also separated by `__`, e.g.
    /// `REGCOORD__META__DATA_CENTER`) on top of the defaults.
    ///
    /// Not validated: callers apply their own overrides first and then call
    /// [`Config::validate`]; `MetaServer::new` does so.
    pub fn load() -> crate::Result<Self> {
        Self::load_from("regcoord")
    }

    /// Load from a named config file (extension optional) plus environment.
    pub fn load_from(name: &str) -> crate::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(name).required(false))
            .add_source(config::Environment::with_prefix("REGCOORD").separator("__"))
            .build()
            .map_err(|e| crate::Error::InvalidConfig(e.to_string()))?;
        let config: Config = settings
            .try_deserialize()
            .map_err(|e| crate::Error::InvalidConfig(e.to_string()))?;
        Ok(config)
    }

    pub fn validate(&self) -> crate::Result<()> {
        crate::common::validate_id("node_id", &self.node_id)?;
        self.meta.validate()?;
        self.fetch.validate()
    }
}

/// Where lock and provide-data rows live
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "path")]
pub enum StoreBackend {
    /// Process-local store; only meaningful for a single process or tests
    Memory,
    /// RocksDB directory
    Rocksdb(PathBuf),
}

/// Meta-node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetaConfig {
    /// Bind address for the admin HTTP API
    pub bind_addr: SocketAddr,

    /// Partition key of the election; one election per data center
    pub data_center: String,

    /// Logical lock name
    #[serde(default = "default_lock_name")]
    pub lock_name: String,

    /// Lock lease length granted on acquire/heartbeat
    #[serde(default = "default_lock_duration")]
    pub lock_duration_ms: u64,

    /// Elector polling interval
    #[serde(default = "default_elector_interval")]
    pub elector_interval_ms: u64,

    /// Node lease length
    #[serde(default = "default_lease_duration")]
    pub lease_duration_ms: u64,

    /// Extra time past expiry before a lease is evicted
    #[serde(default = "default_eviction_grace")]
    pub eviction_grace_ms: u64,

    /// Lease sweep interval (runs only on the leader)
    #[serde(default = "default_evict_interval")]
    pub evict_interval_ms: u64,

    /// Join the election only as an observer
    #[serde(default)]
    pub observer: bool,

    #[serde(default = "default_store")]
    pub store: StoreBackend,
}

fn default_lock_name() -> String {
    "META-MASTER".to_string()
}
fn default_lock_duration() -> u64 {
    15_000
}
fn default_elector_interval() -> u64 {
    5_000
}
fn default_lease_duration() -> u64 {
    30_000
}
fn default_eviction_grace() -> u64 {
    5_000
}
fn default_evict_interval() -> u64 {
    3_000
}
fn default_store() -> StoreBackend {
    StoreBackend::Rocksdb(PathBuf::from("./meta-data"))
}

impl Default for MetaConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 9615)),
            data_center: "DefaultDataCenter".to_string(),
            lock_name: default_lock_name(),
            lock_duration_ms: default_lock_duration(),
            elector_interval_ms: default_elector_interval(),
            lease_duration_ms: default_lease_duration(),
            eviction_grace_ms: default_eviction_grace(),
            evict_interval_ms: default_evict_interval(),
            observer: false,
            store: default_store(),
        }
    }
}

impl MetaConfig {
    pub fn lock_duration(&self) -> Duration {
        Duration::from_millis(self.lock_duration_ms)
    }

    pub fn elector_interval(&self) -> Duration {
        Duration::from_millis(self.elector_interval_ms)
    }

    pub fn lease_duration(&self) -> Duration {
        Duration::from_millis(self.lease_duration_ms)
    }

    pub fn eviction_grace(&self) -> Duration {
        Duration::from_millis(self.eviction_grace_ms)
    }

    pub fn evict_interval(&self) -> Duration {
        Duration::from_millis(self.evict_interval_ms)
    }

    pub fn validate(&self) -> crate::Result<()> {
        crate::common::validate_id("data_center", &self.data_center)?;
        crate::common::validate_id("lock_name", &self.lock_name)?;
        if self.elector_interval_ms == 0 || self.evict_interval_ms == 0 {
            return Err(crate::Error::InvalidConfig(
                "intervals must be greater than zero".into(),
            ));
        }
        // The holder must get at least one more heartbeat in before the lock lapses.
        if self.elector_interval_ms >= self.lock_duration_ms {
            return Err(crate::Error::InvalidConfig(format!(
                "elector interval {}ms must be shorter than lock duration {}ms",
                self.elector_interval_ms, self.lock_duration_ms
            )));
        }
        if self.lease_duration_ms == 0 {
            return Err(crate::Error::InvalidConfig(
                "lease duration must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Provide-data fetch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Base URL of the provide-data authority; `None` reads the local store
    #[serde(default)]
    pub authority_url: Option<String>,

    /// Poll interval
    #[serde(default = "default_fetch_interval")]
    pub interval_ms: u64,

    /// Per-cycle time box for a fetch
    #[serde(default = "default_fetch_timeout")]
    pub timeout_ms: u64,
}

fn default_fetch_interval() -> u64 {
    10_000
}
fn default_fetch_timeout() -> u64 {
    3_000
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            authority_url: None,
            interval_ms: default_fetch_interval(),
            timeout_ms: default_fetch_timeout(),
        }
    }
}

impl FetchConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.interval_ms == 0 || self.timeout_ms == 0 {
            return Err(crate::Error::InvalidConfig(
                "fetch interval and timeout must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}
