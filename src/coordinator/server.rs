//! Meta server: wires election, leases, provide data and the admin API

use crate::common::{Clock, Config, Result, StoreBackend, SystemClock};
use crate::coordinator::current_dc::ClusterCoordinator;
use crate::coordinator::elector::{start_elector_task, ElectorSettings, LeaderElector};
use crate::coordinator::http::{create_router, CoordState};
use crate::coordinator::lease::{start_evict_task, LeaseManager};
use crate::coordinator::node::Node;
use crate::providedata::rate_limit::TRAFFIC_OPERATE_LIMIT_FLAG;
use crate::providedata::{
    start_fetch_task, ClusterRateLimit, DataInfoIdBlacklist, FetchSystemPropertyService,
    HttpProvideDataFetcher, ProvideDataFetcher, StoreProvideDataFetcher,
};
use crate::store::{DistributeLockStore, MemStore, ProvideDataStore, RocksStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Both store facets over one backend.
struct Stores {
    locks: Arc<dyn DistributeLockStore>,
    provide_data: Arc<dyn ProvideDataStore>,
}

fn open_stores(backend: &StoreBackend, clock: Arc<dyn Clock>) -> Result<Stores> {
    Ok(match backend {
        StoreBackend::Memory => {
            let store = Arc::new(MemStore::with_clock(clock));
            Stores {
                locks: store.clone(),
                provide_data: store,
            }
        }
        StoreBackend::Rocksdb(path) => {
            let store = Arc::new(RocksStore::open_with_clock(path, clock)?);
            Stores {
                locks: store.clone(),
                provide_data: store,
            }
        }
    })
}

pub struct MetaServer {
    config: Config,
    state: CoordState,
}

impl MetaServer {
    /// Open the store and build every component; nothing runs until
    /// [`serve`](Self::serve).
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let stores = open_stores(&config.meta.store, clock.clone())?;

        let elector = Arc::new(LeaderElector::new(
            ElectorSettings::from_config(config.node_id.clone(), &config.meta),
            stores.locks.clone(),
            clock.clone(),
        ));
        if config.meta.observer {
            elector.change_to_observer();
        }
        let leases = Arc::new(LeaseManager::new(
            config.meta.lease_duration(),
            config.meta.eviction_grace(),
            clock,
        ));
        let coordinator = Arc::new(ClusterCoordinator::new(elector, leases));

        let fetcher: Arc<dyn ProvideDataFetcher> = match &config.fetch.authority_url {
            Some(url) => Arc::new(HttpProvideDataFetcher::new(url.clone())),
            None => Arc::new(StoreProvideDataFetcher::new(stores.provide_data.clone())),
        };
        let rate_limit = Arc::new(
            FetchSystemPropertyService::new(ClusterRateLimit, fetcher.clone())
                .with_fetch_timeout(config.fetch.timeout()),
        );
        let blacklist = Arc::new(
            FetchSystemPropertyService::new(DataInfoIdBlacklist::new(), fetcher)
                .with_fetch_timeout(config.fetch.timeout()),
        );
        coordinator.register_feature(TRAFFIC_OPERATE_LIMIT_FLAG, rate_limit.clone());

        let state = CoordState {
            coordinator,
            provide_data: stores.provide_data,
            rate_limit,
            blacklist,
        };
        Ok(Self { config, state })
    }

    pub fn state(&self) -> &CoordState {
        &self.state
    }

    /// Spawn the periodic tasks; they stop when `shutdown` flips to `true`.
    pub fn start_tasks(&self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let meta = &self.config.meta;
        let state = &self.state;
        vec![
            start_elector_task(
                state.coordinator.elector().clone(),
                meta.elector_interval(),
                shutdown.clone(),
            ),
            start_evict_task(
                state.coordinator.leases().clone(),
                meta.evict_interval(),
                shutdown.clone(),
            ),
            start_self_heartbeat(
                state.coordinator.clone(),
                Node::meta(self.config.node_id.clone())
                    .with_address(meta.bind_addr.to_string()),
                meta.lease_duration() / 3,
                shutdown.clone(),
            ),
            start_fetch_task(
                state.rate_limit.clone(),
                self.config.fetch.interval(),
                shutdown.clone(),
            ),
            start_fetch_task(state.blacklist.clone(), self.config.fetch.interval(), shutdown),
        ]
    }

    /// Run until ctrl-c.
    pub async fn serve(self) -> Result<()> {
        let meta = &self.config.meta;
        tracing::info!("Starting meta server: {}", self.config.node_id);
        tracing::info!("  HTTP API: {}", meta.bind_addr);
        tracing::info!("  Data center: {}", meta.data_center);
        tracing::info!("  Lock: {} ({}ms)", meta.lock_name, meta.lock_duration_ms);
        tracing::info!("  Store: {:?}", meta.store);
        match &self.config.fetch.authority_url {
            Some(url) => tracing::info!("  Provide data authority: {}", url),
            None => tracing::info!("  Provide data authority: local store"),
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let tasks = self.start_tasks(shutdown_rx);

        let listener = tokio::net::TcpListener::bind(meta.bind_addr).await?;
        let router = create_router(self.state.clone());
        tracing::info!(
            "✓ Meta server ready ({})",
            self.state.coordinator.elector().role()
        );

        let res = axum::serve(listener, router)
            .with_graceful_shutdown(async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!("failed to listen for ctrl-c: {}", e);
                }
                tracing::info!("shutting down");
            })
            .await;

        let _ = shutdown_tx.send(true);
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!("background task ended abnormally: {}", e);
            }
        }
        res?;
        Ok(())
    }
}

/// Keep this node's own meta lease fresh.
fn start_self_heartbeat(
    coordinator: Arc<ClusterCoordinator>,
    myself: Node,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(100)));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    coordinator.renew(myself.clone());
                }
                res = shutdown.changed() => {
                    if res.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    })
}
