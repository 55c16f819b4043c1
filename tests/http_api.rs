//! Admin HTTP API against an in-process meta node
use regcoord::common::SystemClock;
use regcoord::coordinator::http::{create_router, CoordState};
use regcoord::coordinator::{ClusterCoordinator, ElectorSettings, LeaderElector, LeaseManager};
use regcoord::providedata::rate_limit::{CLUSTER_RATE_LIMIT_DATA_ID, TRAFFIC_OPERATE_LIMIT_FLAG};
use regcoord::providedata::{
    ClusterRateLimit, DataInfoIdBlacklist, FetchSystemPropertyService, HttpProvideDataFetcher,
    ProvideDataFetcher, StoreProvideDataFetcher,
};
use regcoord::store::MemStore;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

struct TestNode {
    base: String,
    state: CoordState,
}

async fn start_node(id: &str, store: Arc<MemStore>) -> TestNode {
    let clock = Arc::new(SystemClock);
    let elector = Arc::new(LeaderElector::new(
        ElectorSettings::new(id, "dc1"),
        store.clone(),
        clock.clone(),
    ));
    let leases = Arc::new(LeaseManager::new(
        Duration::from_secs(30),
        Duration::from_secs(5),
        clock,
    ));
    let coordinator = Arc::new(ClusterCoordinator::new(elector, leases));

    let fetcher: Arc<dyn ProvideDataFetcher> = Arc::new(StoreProvideDataFetcher::new(store.clone()));
    let rate_limit = Arc::new(FetchSystemPropertyService::new(ClusterRateLimit, fetcher.clone()));
    let blacklist = Arc::new(FetchSystemPropertyService::new(
        DataInfoIdBlacklist::new(),
        fetcher,
    ));
    coordinator.register_feature(TRAFFIC_OPERATE_LIMIT_FLAG, rate_limit.clone());

    let state = CoordState {
        coordinator,
        provide_data: store,
        rate_limit,
        blacklist,
    };
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = create_router(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    TestNode {
        base: format!("http://{}", addr),
        state,
    }
}

#[tokio::test]
async fn test_health_and_status() {
    let node = start_node("m1", Arc::new(MemStore::new())).await;
    node.state.coordinator.elector().elect();
    let client = Client::new();

    let health: Value = client
        .get(format!("{}/health", node.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["role"], "leader");
    assert_eq!(health["leader"], "m1");

    let live = client
        .get(format!("{}/health/live", node.base))
        .send()
        .await
        .unwrap();
    assert!(live.status().is_success());

    let status: Value = client
        .get(format!("{}/admin/status", node.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["node_id"], "m1");
    assert_eq!(status["is_leader"], true);
    assert_eq!(status["evict_permitted"], true);
    assert_eq!(status["features"][TRAFFIC_OPERATE_LIMIT_FLAG], false);
    assert_eq!(status["provide_data"][CLUSTER_RATE_LIMIT_DATA_ID], -1);

    let leader: Value = client
        .get(format!("{}/admin/leader", node.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(leader["leader"], "m1");
    assert_eq!(leader["duration_ms"], 15_000);
}

#[tokio::test]
async fn test_heartbeat_and_members() {
    let node = start_node("m1", Arc::new(MemStore::new())).await;
    let client = Client::new();

    for id in ["s2", "s1"] {
        let resp = client
            .post(format!("{}/admin/heartbeat", node.base))
            .json(&json!({ "node_id": id, "node_type": "session", "address": "10.0.0.1:9600" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let lease: Value = resp.json().await.unwrap();
        assert_eq!(lease["node"]["node_id"], id);
    }

    let members: Value = client
        .get(format!("{}/admin/members/session", node.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(members["members"], json!(["s1", "s2"]));

    let bad = client
        .get(format!("{}/admin/members/volume", node.base))
        .send()
        .await
        .unwrap();
    assert_eq!(bad.status(), StatusCode::BAD_REQUEST);

    let blank = client
        .post(format!("{}/admin/heartbeat", node.base))
        .json(&json!({ "node_id": "", "node_type": "session" }))
        .send()
        .await
        .unwrap();
    assert_eq!(blank.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_roster_update() {
    let node = start_node("m1", Arc::new(MemStore::new())).await;
    let client = Client::new();

    let resp = client
        .put(format!("{}/admin/cluster-members", node.base))
        .json(&json!([
            { "node_id": "m2", "node_type": "meta" },
            { "node_id": "m1", "node_type": "meta" },
        ]))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    assert_eq!(node.state.coordinator.cluster_members().len(), 2);

    let resp = client
        .put(format!("{}/admin/cluster-members", node.base))
        .json(&json!([{ "node_id": "s1", "node_type": "session" }]))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_provide_data_publish_and_fetch() {
    let store = Arc::new(MemStore::new());
    let leader = start_node("m1", store.clone()).await;
    let follower = start_node("m2", store).await;
    leader.state.coordinator.elector().elect();
    follower.state.coordinator.elector().elect();
    let client = Client::new();
    let url = |base: &str| format!("{}/provide-data/{}", base, CLUSTER_RATE_LIMIT_DATA_ID);

    let missing = client.get(url(&leader.base)).send().await.unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    let body = json!({ "version": 1, "data": r#"{"trafficOperateLimitSwitch":true}"# });
    let redirected = client
        .put(url(&follower.base))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(redirected.status(), StatusCode::TEMPORARY_REDIRECT);

    let published = client.put(url(&leader.base)).json(&body).send().await.unwrap();
    assert_eq!(published.status(), StatusCode::OK);
    let stale = client.put(url(&leader.base)).json(&body).send().await.unwrap();
    assert_eq!(stale.status(), StatusCode::CONFLICT);

    // Any node's HTTP fetcher now sees version 1.
    let fetcher = HttpProvideDataFetcher::new(follower.base.clone());
    let fetched = fetcher.fetch(CLUSTER_RATE_LIMIT_DATA_ID).await.unwrap().unwrap();
    assert_eq!(fetched.version, 1);

    let service = FetchSystemPropertyService::new(ClusterRateLimit, Arc::new(fetcher));
    service.fetch_once().await;
    assert!(service.is_traffic_operate_limit_switch());

    // Follower's own service picks it up on its next cycle.
    follower.state.rate_limit.fetch_once().await;
    assert!(follower.state.coordinator.is_feature_enabled(TRAFFIC_OPERATE_LIMIT_FLAG));

    let flag: Value = client
        .get(format!("{}/admin/features/{}", follower.base, TRAFFIC_OPERATE_LIMIT_FLAG))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(flag["enabled"], true);
}

#[tokio::test]
async fn test_metrics_exposition() {
    let node = start_node("m1", Arc::new(MemStore::new())).await;
    node.state.coordinator.elector().elect();

    let text = Client::new()
        .get(format!("{}/metrics", node.base))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(text.contains("regcoord_is_leader 1"));
    assert!(text.contains("regcoord_elector_cycles_total"));
    assert!(text.contains(&format!(
        "regcoord_provide_data_version{{data_id=\"{}\"}} -1",
        CLUSTER_RATE_LIMIT_DATA_ID
    )));
}
