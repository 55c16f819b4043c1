//! Sources of provide data

use super::ProvideData;
use crate::common::{Error, Result};
use crate::store::ProvideDataStore;
use async_trait::async_trait;
use std::sync::Arc;

/// The authority a node fetches provide data from.
#[async_trait]
pub trait ProvideDataFetcher: Send + Sync {
    /// `Ok(None)` when the authority has no row for `data_id`.
    async fn fetch(&self, data_id: &str) -> Result<Option<ProvideData>>;
}

/// Fetches from a meta node's `/provide-data/:data_id` endpoint.
pub struct HttpProvideDataFetcher {
    client: reqwest::Client,
    base_url: String,
}

impl HttpProvideDataFetcher {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, data_id: &str) -> String {
        format!("{}/provide-data/{}", self.base_url, data_id)
    }
}

#[async_trait]
impl ProvideDataFetcher for HttpProvideDataFetcher {
    async fn fetch(&self, data_id: &str) -> Result<Option<ProvideData>> {
        let resp = self.client.get(self.url(data_id)).send().await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(Error::Fetch(format!(
                "{} returned {}",
                self.url(data_id),
                resp.status()
            )));
        }
        let data: ProvideData = resp.json().await?;
        if data.data_id != data_id {
            return Err(Error::Fetch(format!(
                "asked for {}, authority answered {}",
                data_id, data.data_id
            )));
        }
        Ok(Some(data))
    }
}

/// Reads provide data straight from a store; meta nodes use this for the
/// rows they host themselves. Reads run on the blocking pool.
pub struct StoreProvideDataFetcher {
    store: Arc<dyn ProvideDataStore>,
}

impl StoreProvideDataFetcher {
    pub fn new(store: Arc<dyn ProvideDataStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ProvideDataFetcher for StoreProvideDataFetcher {
    async fn fetch(&self, data_id: &str) -> Result<Option<ProvideData>> {
        let store = self.store.clone();
        let data_id = data_id.to_string();
        tokio::task::spawn_blocking(move || store.get_provide_data(&data_id))
            .await
            .map_err(|e| Error::Internal(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemStore;

    #[test]
    fn test_http_url() {
        let fetcher = HttpProvideDataFetcher::new("http://meta-1:9615/");
        assert_eq!(
            fetcher.url("registry.cluster.rate.limit"),
            "http://meta-1:9615/provide-data/registry.cluster.rate.limit"
        );
    }

    #[test]
    fn test_store_fetcher() {
        let store = Arc::new(MemStore::new());
        store
            .put_provide_data(&ProvideData::new("x", 1, Some("true".into())))
            .unwrap();
        let fetcher = StoreProvideDataFetcher::new(store);

        let got = tokio_test::block_on(fetcher.fetch("x")).unwrap().unwrap();
        assert_eq!(got.version, 1);
        assert!(tokio_test::block_on(fetcher.fetch("y")).unwrap().is_none());
    }
}
