//! HTTP admin API for a meta node
//!
//! Read endpoints answer from cached snapshots and never touch the lock
//! store. Writes to provide data are accepted on the leader only; followers
//! answer `307` with the current leader in the body.

use crate::common::{Error, METRICS};
use crate::coordinator::current_dc::ClusterCoordinator;
use crate::coordinator::node::{Node, NodeType};
use crate::providedata::{
    ClusterRateLimit, DataInfoIdBlacklist, FetchSystemPropertyService, ProvideData,
};
use crate::store::ProvideDataStore;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct CoordState {
    pub coordinator: Arc<ClusterCoordinator>,
    pub provide_data: Arc<dyn ProvideDataStore>,
    pub rate_limit: Arc<FetchSystemPropertyService<ClusterRateLimit>>,
    pub blacklist: Arc<FetchSystemPropertyService<DataInfoIdBlacklist>>,
}

pub fn create_router(state: CoordState) -> Router {
    Router::new()
        // Health
        .route("/health", get(health))
        .route("/health/live", get(health_live))
        // Cluster view
        .route("/admin/status", get(admin_status))
        .route("/admin/leader", get(admin_leader))
        .route("/admin/members/:node_type", get(admin_members))
        .route("/admin/cluster-members", put(admin_update_roster))
        .route("/admin/heartbeat", post(admin_heartbeat))
        .route("/admin/features/:flag", get(admin_feature))
        // Provide data repository
        .route("/provide-data/:data_id", get(get_provide_data))
        .route("/provide-data/:data_id", put(put_provide_data))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn error_response(e: Error) -> Response {
    (e.to_http_status(), Json(json!({ "error": e.to_string() }))).into_response()
}

/// Health check with the elector's view of the cluster.
async fn health(State(state): State<CoordState>) -> impl IntoResponse {
    let leader = state.coordinator.get_leader();
    Json(json!({
        "status": "healthy",
        "role": state.coordinator.elector().role().to_string(),
        "is_leader": state.coordinator.is_leader(),
        "leader": leader.leader,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Liveness probe: answering at all is the signal.
async fn health_live() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "alive": true,
            "version": env!("CARGO_PKG_VERSION"),
            "timestamp": crate::common::timestamp_now_millis(),
        })),
    )
}

async fn admin_status(State(state): State<CoordState>) -> impl IntoResponse {
    let coord = &state.coordinator;
    let elector = coord.elector();
    let roster: Vec<String> = coord
        .cluster_members()
        .iter()
        .map(|n| n.node_id.clone())
        .collect();
    let features: serde_json::Map<String, serde_json::Value> = coord
        .feature_flags()
        .into_iter()
        .map(|flag| {
            let enabled = coord.is_feature_enabled(&flag);
            (flag, json!(enabled))
        })
        .collect();

    Json(json!({
        "node_id": elector.myself(),
        "data_center": elector.settings().data_center,
        "role": elector.role().to_string(),
        "is_leader": coord.is_leader(),
        "observer": elector.is_observer(),
        "leader": coord.get_leader(),
        "evict_permitted": coord.leases().is_evict_permitted(),
        "leases": coord.leases().lease_count(),
        "alive_meta": coord.get_alive_members(NodeType::Meta).len(),
        "alive_session": coord.get_alive_members(NodeType::Session).len(),
        "roster": roster,
        "features": features,
        "provide_data": provide_data_versions(&state),
    }))
}

async fn admin_leader(State(state): State<CoordState>) -> impl IntoResponse {
    Json(state.coordinator.get_leader())
}

async fn admin_members(
    State(state): State<CoordState>,
    Path(node_type): Path<String>,
) -> Response {
    let node_type: NodeType = match node_type.parse() {
        Ok(t) => t,
        Err(e) => return error_response(e),
    };
    let members = state.coordinator.get_alive_members(node_type);
    Json(json!({
        "node_type": node_type,
        "members": members,
    }))
    .into_response()
}

async fn admin_update_roster(
    State(state): State<CoordState>,
    Json(members): Json<Vec<Node>>,
) -> Response {
    match state.coordinator.update_cluster_members(members) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

/// Register-or-renew the lease of the calling node.
async fn admin_heartbeat(State(state): State<CoordState>, Json(node): Json<Node>) -> Response {
    if let Err(e) = crate::common::validate_id("node", &node.node_id) {
        return error_response(e);
    }
    let lease = state.coordinator.renew(node);
    Json(lease).into_response()
}

async fn admin_feature(
    State(state): State<CoordState>,
    Path(flag): Path<String>,
) -> impl IntoResponse {
    let enabled = state.coordinator.is_feature_enabled(&flag);
    Json(json!({ "flag": flag, "enabled": enabled }))
}

async fn get_provide_data(
    State(state): State<CoordState>,
    Path(data_id): Path<String>,
) -> Response {
    let store = state.provide_data.clone();
    let lookup = data_id.clone();
    let res = tokio::task::spawn_blocking(move || store.get_provide_data(&lookup)).await;
    match res {
        Ok(Ok(Some(data))) => Json(data).into_response(),
        Ok(Ok(None)) => error_response(Error::NotFound(format!("provide data {}", data_id))),
        Ok(Err(e)) => error_response(e),
        Err(e) => error_response(Error::Internal(e.to_string())),
    }
}

#[derive(Debug, Deserialize)]
struct PutProvideDataRequest {
    version: i64,
    #[serde(default)]
    data: Option<String>,
}

/// Publish a new version of a provide data row. Leader only.
async fn put_provide_data(
    State(state): State<CoordState>,
    Path(data_id): Path<String>,
    Json(req): Json<PutProvideDataRequest>,
) -> Response {
    if !state.coordinator.is_leader() {
        let leader = state
            .coordinator
            .get_leader()
            .leader
            .unwrap_or_else(|| "unknown".to_string());
        return error_response(Error::NotLeader(leader));
    }

    let data = ProvideData::new(data_id.clone(), req.version, req.data);
    let store = state.provide_data.clone();
    let row = data.clone();
    let accepted = match tokio::task::spawn_blocking(move || store.put_provide_data(&row)).await {
        Ok(Ok(accepted)) => accepted,
        Ok(Err(e)) => return error_response(e),
        Err(e) => return error_response(Error::Internal(e.to_string())),
    };
    if !accepted {
        return error_response(Error::Conflict(format!(
            "{} already at version >= {}",
            data_id, data.version
        )));
    }

    tracing::info!("provide data {} published at version {}", data_id, data.version);
    // Local subscribers pick it up without waiting for their next tick.
    if data_id == state.rate_limit.data_id() {
        state.rate_limit.notify(data.version);
    } else if data_id == state.blacklist.data_id() {
        state.blacklist.notify(data.version);
    }
    (StatusCode::OK, Json(data)).into_response()
}

fn provide_data_versions(state: &CoordState) -> serde_json::Map<String, serde_json::Value> {
    let mut versions = serde_json::Map::new();
    versions.insert(state.rate_limit.data_id().to_string(), json!(state.rate_limit.version()));
    versions.insert(state.blacklist.data_id().to_string(), json!(state.blacklist.version()));
    versions
}

/// Prometheus text exposition.
pub async fn metrics(State(state): State<CoordState>) -> impl IntoResponse {
    let mut out = String::new();
    out += &format!(
        "regcoord_is_leader {}\n",
        u8::from(state.coordinator.is_leader())
    );
    out += &format!(
        "regcoord_leases_tracked {}\n",
        state.coordinator.leases().lease_count()
    );
    for (data_id, version) in [
        (state.rate_limit.data_id(), state.rate_limit.version()),
        (state.blacklist.data_id(), state.blacklist.version()),
    ] {
        out += &format!(
            "regcoord_provide_data_version{{data_id=\"{}\"}} {}\n",
            data_id, version
        );
    }
    out += &METRICS.to_prometheus();

    (StatusCode::OK, out)
}
