//! DataInfoId blacklist
//!
//! Payload is a JSON array of data info ids. Publishers for a blacklisted id
//! are refused; ids that become blacklisted are handed to an optional cleanup
//! hook once the new list is visible, so publishers registering during the
//! update are already refused and cannot slip past the cleanup.

use super::private::Sealed;
use super::service::{FetchSystemPropertyService, SystemPropertyKind};
use crate::common::{Error, Result};
use std::collections::BTreeSet;
use std::sync::Arc;

pub const DATA_INFO_ID_BLACKLIST_DATA_ID: &str = "registry.datainfoid.blacklist";

pub type CleanupHook = Arc<dyn Fn(&BTreeSet<String>) + Send + Sync>;

#[derive(Default, Clone)]
pub struct DataInfoIdBlacklist {
    cleanup: Option<CleanupHook>,
}

impl DataInfoIdBlacklist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called with the ids added by each accepted version.
    pub fn with_cleanup(cleanup: CleanupHook) -> Self {
        Self {
            cleanup: Some(cleanup),
        }
    }
}

impl Sealed for DataInfoIdBlacklist {}

impl SystemPropertyKind for DataInfoIdBlacklist {
    type Value = BTreeSet<String>;

    fn data_id(&self) -> &str {
        DATA_INFO_ID_BLACKLIST_DATA_ID
    }

    fn default_value(&self) -> BTreeSet<String> {
        BTreeSet::new()
    }

    fn parse(&self, raw: &str) -> Result<BTreeSet<String>> {
        let ids: BTreeSet<String> = serde_json::from_str(raw).map_err(|e| Error::Parse {
            data_id: DATA_INFO_ID_BLACKLIST_DATA_ID.to_string(),
            reason: e.to_string(),
        })?;
        if ids.iter().any(|id| id.trim().is_empty()) {
            return Err(Error::Parse {
                data_id: DATA_INFO_ID_BLACKLIST_DATA_ID.to_string(),
                reason: "blank data info id".into(),
            });
        }
        Ok(ids)
    }

    fn on_committed(&self, previous: &BTreeSet<String>, current: &BTreeSet<String>) {
        let added: BTreeSet<String> = current.difference(previous).cloned().collect();
        let removed = previous.difference(current).count();
        tracing::info!(
            "blacklist changed: {} added, {} removed, {} total",
            added.len(),
            removed,
            current.len()
        );
        if added.is_empty() {
            return;
        }
        if let Some(cleanup) = &self.cleanup {
            cleanup(&added);
        }
    }
}

impl FetchSystemPropertyService<DataInfoIdBlacklist> {
    pub fn is_blacklisted(&self, data_info_id: &str) -> bool {
        self.storage().value.contains(data_info_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providedata::{FetchOutcome, ProvideData, StoreProvideDataFetcher};
    use crate::store::MemStore;
    use std::sync::Mutex;

    #[test]
    fn test_parse() {
        let ids = DataInfoIdBlacklist::new()
            .parse(r#"["a#@#DEFAULT", "b#@#DEFAULT"]"#)
            .unwrap();
        assert_eq!(ids.len(), 2);
        assert!(DataInfoIdBlacklist::new().parse(r#"["ok", " "]"#).is_err());
        assert!(DataInfoIdBlacklist::new().parse(r#"{"a": 1}"#).is_err());
    }

    #[test]
    fn test_cleanup_sees_only_new_ids_after_commit() {
        let seen: Arc<Mutex<Vec<BTreeSet<String>>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let kind = DataInfoIdBlacklist::with_cleanup(Arc::new(move |added: &BTreeSet<String>| {
            sink.lock().unwrap().push(added.clone());
        }));
        let fetcher = Arc::new(StoreProvideDataFetcher::new(Arc::new(MemStore::new())));
        let service = FetchSystemPropertyService::new(kind, fetcher);

        let v1 = ProvideData::new(DATA_INFO_ID_BLACKLIST_DATA_ID, 1, Some(r#"["a"]"#.into()));
        assert_eq!(
            service.process(&service.storage(), v1),
            FetchOutcome::Updated { version: 1 }
        );
        let v2 = ProvideData::new(DATA_INFO_ID_BLACKLIST_DATA_ID, 2, Some(r#"["a","b"]"#.into()));
        assert_eq!(
            service.process(&service.storage(), v2),
            FetchOutcome::Updated { version: 2 }
        );
        let v3 = ProvideData::new(DATA_INFO_ID_BLACKLIST_DATA_ID, 3, Some(r#"["b"]"#.into()));
        service.process(&service.storage(), v3);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen[0].contains("a"));
        assert_eq!(seen[1].iter().collect::<Vec<_>>(), vec!["b"]);
        assert!(service.is_blacklisted("b"));
        assert!(!service.is_blacklisted("a"));
    }
}
