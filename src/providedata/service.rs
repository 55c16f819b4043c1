//! Periodic fetch-parse-CAS loop for one provide-data property

use super::fetcher::ProvideDataFetcher;
use super::private::Sealed;
use super::storage::{SystemDataStorage, VersionedSlot, INIT_VERSION};
use super::ProvideData;
use crate::common::{Result, METRICS};
use std::fmt::Debug;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

/// Capability of one property kind: where it lives, how to parse it, what
/// to assume before anything was fetched.
pub trait SystemPropertyKind: Sealed + Send + Sync + 'static {
    type Value: Clone + Debug + Send + Sync + 'static;

    fn data_id(&self) -> &str;

    /// Value exposed until the first successful fetch.
    fn default_value(&self) -> Self::Value;

    fn parse(&self, raw: &str) -> Result<Self::Value>;

    /// Runs after `current` became visible to readers.
    fn on_committed(&self, _previous: &Self::Value, _current: &Self::Value) {}
}

/// A named on/off switch the coordinator can answer for.
pub trait FeatureSwitch: Send + Sync {
    fn is_enabled(&self) -> bool;
}

/// Result of one fetch cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// A newer version was parsed and installed
    Updated { version: i64 },
    /// Nothing newer, or a concurrent updater won the CAS
    Unchanged,
    /// Fetch or parse failed; the previous value stays in effect
    Failed,
}

pub struct FetchSystemPropertyService<K: SystemPropertyKind> {
    kind: K,
    slot: VersionedSlot<K::Value>,
    fetcher: Arc<dyn ProvideDataFetcher>,
    fetch_timeout: Duration,
    wakeup: Notify,
    notified_version: AtomicI64,
}

impl<K: SystemPropertyKind> FetchSystemPropertyService<K> {
    pub fn new(kind: K, fetcher: Arc<dyn ProvideDataFetcher>) -> Self {
        let initial = SystemDataStorage::new(INIT_VERSION, kind.default_value());
        Self {
            kind,
            slot: VersionedSlot::new(initial),
            fetcher,
            fetch_timeout: Duration::from_secs(3),
            wakeup: Notify::new(),
            notified_version: AtomicI64::new(INIT_VERSION),
        }
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn data_id(&self) -> &str {
        self.kind.data_id()
    }

    pub fn kind(&self) -> &K {
        &self.kind
    }

    /// Current snapshot
    pub fn storage(&self) -> Arc<SystemDataStorage<K::Value>> {
        self.slot.get()
    }

    pub fn version(&self) -> i64 {
        self.slot.version()
    }

    /// Push notification from the authority: a version newer than ours
    /// exists, fetch now instead of waiting for the next tick.
    pub fn notify(&self, version: i64) {
        if version <= self.version() {
            return;
        }
        self.notified_version.fetch_max(version, Ordering::SeqCst);
        self.wakeup.notify_one();
    }

    /// Newest announced version not installed yet.
    pub fn pending_notification(&self) -> Option<i64> {
        let announced = self.notified_version.load(Ordering::SeqCst);
        (announced > self.version()).then_some(announced)
    }

    /// One fetch cycle.
    pub async fn fetch_once(&self) -> FetchOutcome {
        // The CAS below must compare against what this cycle started from.
        let old = self.slot.get();
        let data_id = self.kind.data_id();

        let fetched =
            match tokio::time::timeout(self.fetch_timeout, self.fetcher.fetch(data_id)).await {
                Ok(Ok(Some(data))) => data,
                Ok(Ok(None)) => {
                    tracing::debug!("provide data {} not published yet", data_id);
                    return FetchOutcome::Unchanged;
                }
                Ok(Err(e)) => {
                    METRICS.provide_data_fetch_failures.inc();
                    tracing::warn!("fetch provide data {} failed: {}", data_id, e);
                    return FetchOutcome::Failed;
                }
                Err(_) => {
                    METRICS.provide_data_fetch_failures.inc();
                    tracing::warn!(
                        "fetch provide data {} timed out after {:?}",
                        data_id,
                        self.fetch_timeout
                    );
                    return FetchOutcome::Failed;
                }
            };

        self.process(&old, fetched)
    }

    /// Parse and install `data` on top of `old`.
    pub fn process(
        &self,
        old: &Arc<SystemDataStorage<K::Value>>,
        data: ProvideData,
    ) -> FetchOutcome {
        let data_id = self.kind.data_id();
        if data.version <= old.version {
            tracing::debug!(
                "provide data {} version {} not newer than {}",
                data_id,
                data.version,
                old.version
            );
            return FetchOutcome::Unchanged;
        }

        let value = match data
            .data
            .as_deref()
            .ok_or_else(|| crate::Error::Parse {
                data_id: data_id.to_string(),
                reason: "empty payload".into(),
            })
            .and_then(|raw| self.kind.parse(raw))
        {
            Ok(value) => value,
            Err(e) => {
                METRICS.provide_data_parse_failures.inc();
                tracing::error!(
                    "process provide data {} version {} failed, keeping version {}: {}",
                    data_id,
                    data.version,
                    old.version,
                    e
                );
                return FetchOutcome::Failed;
            }
        };

        let new = Arc::new(SystemDataStorage::new(data.version, value));
        if !self.slot.compare_and_set(old, new.clone()) {
            METRICS.provide_data_cas_conflicts.inc();
            tracing::info!(
                "provide data {} version {} lost to a concurrent update",
                data_id,
                data.version
            );
            return FetchOutcome::Unchanged;
        }

        METRICS.provide_data_updates.inc();
        tracing::info!(
            "provide data {} updated {} -> {}: {:?}",
            data_id,
            old.version,
            new.version,
            new.value
        );
        self.kind.on_committed(&old.value, &new.value);
        FetchOutcome::Updated {
            version: new.version,
        }
    }
}

/// Poll `service` every `interval` (and on push notifications) until
/// `shutdown` flips to `true`.
pub fn start_fetch_task<K: SystemPropertyKind>(
    service: Arc<FetchSystemPropertyService<K>>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = service.wakeup.notified() => {
                    let Some(version) = service.pending_notification() else {
                        // A tick already installed the announced version.
                        continue;
                    };
                    tracing::debug!(
                        "provide data {} notified of version {}",
                        service.data_id(),
                        version
                    );
                }
                res = shutdown.changed() => {
                    if res.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }
            service.fetch_once().await;
        }
        tracing::info!("provide data fetcher {} stopped", service.data_id());
    })
}
