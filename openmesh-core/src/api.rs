//! REST API for node lifecycle, topology and reward queries
//!
//! Write endpoints take the authenticated owner id from the
//! `x-owner-id` header; session issuance lives in the upstream auth
//! layer and is out of scope here. Read endpoints are public.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::context::AppContext;
use crate::ledger::Ledger;
use crate::registry::{LedgerHealth, RegisterNode, RegistryError};
use crate::rewards::RewardError;
use crate::stats::{StatsError, Timeframe};
use crate::store::{GeoBounds, NodeFilter, Store};
use crate::topology;
use crate::types::{
    Connection, LedgerNodeAccount, NeighborLink, Node, NodeStatus, PerformanceMetrics, Position,
    Reward,
};

const DEFAULT_PAGE_SIZE: usize = 50;

/// API state shared across handlers
#[derive(Clone)]
pub struct ApiState {
    pub ctx: Arc<AppContext>,
}

/// Create the REST API router
pub fn create_router(ctx: Arc<AppContext>) -> Router {
    let state = ApiState { ctx };

    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_endpoint))
        .route("/api/v1/nodes", post(register_node).get(list_nodes))
        .route("/api/v1/nodes/:id", get(get_node).delete(deactivate_node))
        .route("/api/v1/nodes/:id/heartbeat", post(submit_heartbeat))
        .route("/api/v1/nodes/:id/status", put(update_status))
        .route("/api/v1/nodes/:id/neighbors", get(node_neighbors))
        .route("/api/v1/nodes/:id/rewards", get(node_rewards))
        .route("/api/v1/network/map", get(network_map))
        .route("/api/v1/network/stats", get(network_stats))
        .route("/api/v1/network/activity", get(network_activity))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

// Request / response bodies

#[derive(Deserialize)]
struct HeartbeatBody {
    metrics: PerformanceMetrics,
}

#[derive(Deserialize)]
struct StatusBody {
    status: NodeStatus,
}

#[derive(Serialize)]
struct RegisterResponse {
    node: Node,
    transaction_signature: Option<String>,
    ledger: LedgerHealth,
}

#[derive(Serialize)]
struct HeartbeatResponse {
    node: Node,
    transaction_signature: Option<String>,
    ledger: LedgerHealth,
}

#[derive(Serialize)]
struct StatusResponse {
    node: Node,
    transaction_signature: Option<String>,
}

#[derive(Serialize)]
struct DeactivateResponse {
    message: String,
    transaction_signature: Option<String>,
}

#[derive(Serialize)]
struct Pagination {
    total: u64,
    limit: usize,
    offset: usize,
}

#[derive(Serialize)]
struct NodeListResponse {
    nodes: Vec<Node>,
    pagination: Pagination,
}

#[derive(Serialize)]
struct NodeDetailResponse {
    node: Node,
    /// On-chain view; null when the gateway has no account or is down
    ledger_account: Option<LedgerNodeAccount>,
}

#[derive(Serialize)]
struct NeighborsResponse {
    node_id: String,
    name: String,
    position: Position,
    connections: Vec<NeighborLink>,
}

#[derive(Serialize)]
struct RewardListResponse {
    rewards: Vec<Reward>,
    pagination: Pagination,
}

#[derive(Serialize)]
struct MapStats {
    total_nodes: u64,
    active_nodes: u64,
    coverage_area_km2: f64,
}

#[derive(Serialize)]
struct NetworkMapResponse {
    nodes: Vec<Node>,
    connections: Vec<Connection>,
    stats: MapStats,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    total_nodes: u64,
    active_nodes: u64,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Deserialize)]
struct PageQuery {
    status: Option<String>,
    limit: Option<usize>,
    offset: Option<usize>,
}

#[derive(Deserialize)]
struct MapQuery {
    status: Option<String>,
    /// JSON object: {"north":..,"south":..,"east":..,"west":..}
    bounds: Option<String>,
}

#[derive(Deserialize)]
struct ActivityQuery {
    timeframe: Option<String>,
}

// Handlers

async fn health_check(State(state): State<ApiState>) -> Result<impl IntoResponse, ApiError> {
    let nodes = state.ctx.store.list_nodes(NodeFilter::default()).await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    let active = nodes.iter().filter(|n| n.status == NodeStatus::Active).count() as u64;

    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        total_nodes: nodes.len() as u64,
        active_nodes: active,
    }))
}

async fn metrics_endpoint(State(state): State<ApiState>) -> Result<impl IntoResponse, ApiError> {
    let nodes = state.ctx.store.list_nodes(NodeFilter::default()).await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    let active = nodes.iter().filter(|n| n.status == NodeStatus::Active).count() as u64;

    let body = state.ctx.metrics.to_prometheus(nodes.len() as u64, active);
    Ok((
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        body,
    ))
}

async fn register_node(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(body): Json<RegisterNode>,
) -> Result<impl IntoResponse, ApiError> {
    let owner = caller_owner(&headers)?;
    let outcome = state.ctx.registry.register(&owner, body).await?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            node: outcome.node,
            transaction_signature: outcome.signature,
            ledger: outcome.ledger,
        }),
    ))
}

async fn list_nodes(
    State(state): State<ApiState>,
    Query(query): Query<PageQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let filter = NodeFilter {
        status: parse_status(query.status.as_deref())?,
        ..Default::default()
    };
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE);
    let offset = query.offset.unwrap_or(0);

    let (nodes, total) = state.ctx.registry.list(filter, limit, offset).await?;
    Ok(Json(NodeListResponse {
        nodes,
        pagination: Pagination {
            total,
            limit,
            offset,
        },
    }))
}

async fn get_node(
    State(state): State<ApiState>,
    Path(node_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let node = state.ctx.registry.get(&node_id).await?;

    // Best effort: read paths never fail on ledger unavailability
    let ledger_account = state.ctx.ledger.get_node_account(&node_id).await.unwrap_or(None);

    Ok(Json(NodeDetailResponse {
        node,
        ledger_account,
    }))
}

async fn submit_heartbeat(
    State(state): State<ApiState>,
    Path(node_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<HeartbeatBody>,
) -> Result<impl IntoResponse, ApiError> {
    let owner = caller_owner(&headers)?;
    let outcome = state
        .ctx
        .registry
        .submit_heartbeat(&node_id, &owner, body.metrics)
        .await?;

    Ok(Json(HeartbeatResponse {
        node: outcome.node,
        transaction_signature: outcome.signature,
        ledger: outcome.ledger,
    }))
}

async fn update_status(
    State(state): State<ApiState>,
    Path(node_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<StatusBody>,
) -> Result<impl IntoResponse, ApiError> {
    let owner = caller_owner(&headers)?;
    let outcome = state
        .ctx
        .registry
        .update_status(&node_id, &owner, body.status)
        .await?;

    Ok(Json(StatusResponse {
        node: outcome.node,
        transaction_signature: outcome.signature,
    }))
}

async fn deactivate_node(
    State(state): State<ApiState>,
    Path(node_id): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let owner = caller_owner(&headers)?;
    let outcome = state.ctx.registry.deactivate(&node_id, &owner).await?;

    Ok(Json(DeactivateResponse {
        message: "Node deactivated".to_string(),
        transaction_signature: outcome.signature,
    }))
}

async fn node_neighbors(
    State(state): State<ApiState>,
    Path(node_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let node = state.ctx.registry.get(&node_id).await?;

    let filter = NodeFilter {
        status: Some(NodeStatus::Active),
        ..Default::default()
    };
    let candidates = state.ctx.store.list_nodes(filter).await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let connections = topology::build_node_neighbors(
        &node,
        &candidates,
        topology::NEIGHBOR_THRESHOLD_KM,
        topology::NEIGHBOR_LIMIT,
    );

    Ok(Json(NeighborsResponse {
        node_id: node.node_id,
        name: node.name,
        position: node.position,
        connections,
    }))
}

async fn node_rewards(
    State(state): State<ApiState>,
    Path(node_id): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE);
    let offset = query.offset.unwrap_or(0);

    let (rewards, total) = state
        .ctx
        .rewards
        .list_node_rewards(&node_id, limit, offset)
        .await?;

    Ok(Json(RewardListResponse {
        rewards,
        pagination: Pagination {
            total,
            limit,
            offset,
        },
    }))
}

async fn network_map(
    State(state): State<ApiState>,
    Query(query): Query<MapQuery>,
) -> Result<impl IntoResponse, ApiError> {
    // The map defaults to active nodes unless a status is requested
    let status = match query.status.as_deref() {
        Some(s) => parse_status(Some(s))?,
        None => Some(NodeStatus::Active),
    };
    let bounds = parse_bounds(query.bounds.as_deref())?;

    let filter = NodeFilter {
        status,
        bounds,
        ..Default::default()
    };
    let nodes = state.ctx.store.list_nodes(filter).await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let connections = topology::build_map_graph(&nodes, topology::MAP_EDGE_THRESHOLD_KM);
    let active = nodes.iter().filter(|n| n.status == NodeStatus::Active).count() as u64;
    let coverage = topology::estimate_coverage_area(&nodes);

    Ok(Json(NetworkMapResponse {
        stats: MapStats {
            total_nodes: nodes.len() as u64,
            active_nodes: active,
            coverage_area_km2: coverage,
        },
        connections,
        nodes,
    }))
}

async fn network_stats(State(state): State<ApiState>) -> Result<impl IntoResponse, ApiError> {
    let current = state.ctx.stats.current().await?;
    Ok(Json(current))
}

async fn network_activity(
    State(state): State<ApiState>,
    Query(query): Query<ActivityQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let timeframe: Timeframe = query
        .timeframe
        .as_deref()
        .unwrap_or("24h")
        .parse()
        .map_err(|e: StatsError| ApiError::BadRequest(e.to_string()))?;

    let report = state.ctx.stats.activity(timeframe).await?;
    Ok(Json(report))
}

// Helpers

fn caller_owner(headers: &HeaderMap) -> Result<String, ApiError> {
    headers
        .get("x-owner-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or(ApiError::Unauthorized)
}

fn parse_status(status: Option<&str>) -> Result<Option<NodeStatus>, ApiError> {
    match status {
        None => Ok(None),
        Some(s) => s
            .parse()
            .map(Some)
            .map_err(|e: String| ApiError::BadRequest(e)),
    }
}

fn parse_bounds(bounds: Option<&str>) -> Result<Option<GeoBounds>, ApiError> {
    match bounds {
        None => Ok(None),
        Some(raw) => serde_json::from_str(raw)
            .map(Some)
            .map_err(|e| ApiError::BadRequest(format!("invalid bounds: {}", e))),
    }
}

/// API error type
#[derive(Debug)]
enum ApiError {
    BadRequest(String),
    Unauthorized,
    NotFound(String),
    LedgerUnavailable(String),
    Internal(String),
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::Validation(msg) => ApiError::BadRequest(msg),
            RegistryError::NotFoundOrUnauthorized => {
                ApiError::NotFound("node not found or unauthorized".to_string())
            }
            RegistryError::Ledger(e) => ApiError::LedgerUnavailable(e.to_string()),
            RegistryError::Store(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<RewardError> for ApiError {
    fn from(err: RewardError) -> Self {
        match err {
            RewardError::Validation(msg) => ApiError::BadRequest(msg),
            RewardError::Ledger(e) => ApiError::LedgerUnavailable(e.to_string()),
            RewardError::Store(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<StatsError> for ApiError {
    fn from(err: StatsError) -> Self {
        match err {
            StatsError::Timeframe(msg) => ApiError::BadRequest(msg),
            StatsError::Store(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "authentication required".to_string(),
            ),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::LedgerUnavailable(msg) => (StatusCode::BAD_GATEWAY, msg),
            ApiError::Internal(msg) => {
                error!("API error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = Json(ErrorResponse { error: message });
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use axum::body::Body;
    use axum::http::Request;
    use tower::util::ServiceExt;

    async fn test_router() -> Router {
        let config = Config {
            ephemeral: true,
            ..Config::default()
        };
        let ctx = AppContext::start(config).await.unwrap();
        create_router(ctx)
    }

    fn register_body(name: &str, lat: f64, lng: f64) -> String {
        serde_json::json!({
            "name": name,
            "position": { "lat": lat, "lng": lng, "city": "SF", "country": "US" },
            "hardware": { "kind": "raspberry-pi-4", "specs": "4GB", "capabilities": ["wifi6"] }
        })
        .to_string()
    }

    async fn register(app: &Router, owner: &str, name: &str, lat: f64, lng: f64) -> Node {
        let request = Request::builder()
            .method("POST")
            .uri("/api/v1/nodes")
            .header("content-type", "application/json")
            .header("x-owner-id", owner)
            .body(Body::from(register_body(name, lat, lng)))
            .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        serde_json::from_value(parsed["node"].clone()).unwrap()
    }

    async fn heartbeat(app: &Router, owner: &str, node_id: &str) -> StatusCode {
        let body = serde_json::json!({
            "metrics": {
                "uptime_percentage": 99.0,
                "bytes_transferred": 1073741824u64,
                "users_served": 5,
                "avg_response_time_ms": 18.0,
                "reliability_score": 97.0
            }
        });
        let request = Request::builder()
            .method("POST")
            .uri(format!("/api/v1/nodes/{}/heartbeat", node_id))
            .header("content-type", "application/json")
            .header("x-owner-id", owner)
            .body(Body::from(body.to_string()))
            .unwrap();

        app.clone().oneshot(request).await.unwrap().status()
    }

    #[tokio::test]
    async fn test_health_check() {
        let app = test_router().await;

        let request = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_register_requires_owner_header() {
        let app = test_router().await;

        let request = Request::builder()
            .method("POST")
            .uri("/api/v1/nodes")
            .header("content-type", "application/json")
            .body(Body::from(register_body("AP", 37.0, -122.0)))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_register_rejects_bad_coordinates() {
        let app = test_router().await;

        let request = Request::builder()
            .method("POST")
            .uri("/api/v1/nodes")
            .header("content-type", "application/json")
            .header("x-owner-id", "owner-1")
            .body(Body::from(register_body("AP", 120.0, -122.0)))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_register_heartbeat_and_detail() {
        let app = test_router().await;
        let node = register(&app, "owner-1", "Mission AP", 37.7749, -122.4194).await;

        assert_eq!(heartbeat(&app, "owner-1", &node.node_id).await, StatusCode::OK);

        let request = Request::builder()
            .uri(format!("/api/v1/nodes/{}", node.node_id))
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["node"]["status"], "active");
        assert_eq!(parsed["node"]["metrics"]["users_served"], 5);
    }

    #[tokio::test]
    async fn test_heartbeat_wrong_owner_is_404() {
        let app = test_router().await;
        let node = register(&app, "owner-1", "Mission AP", 37.7749, -122.4194).await;

        let status = heartbeat(&app, "owner-2", &node.node_id).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_network_map_links_close_pair() {
        let app = test_router().await;
        let a = register(&app, "owner-1", "A", 37.7749, -122.4194).await;
        let b = register(&app, "owner-2", "B", 37.7750, -122.4195).await;
        heartbeat(&app, "owner-1", &a.node_id).await;
        heartbeat(&app, "owner-2", &b.node_id).await;

        let request = Request::builder()
            .uri("/api/v1/network/map")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let connections = parsed["connections"].as_array().unwrap();
        assert_eq!(connections.len(), 1);
        let strength = connections[0]["strength"].as_f64().unwrap();
        assert!((strength - 99.85).abs() < 0.1, "strength was {}", strength);
        assert_eq!(parsed["stats"]["active_nodes"], 2);
    }

    #[tokio::test]
    async fn test_update_status_and_deactivate() {
        let app = test_router().await;
        let node = register(&app, "owner-1", "AP", 37.7749, -122.4194).await;
        heartbeat(&app, "owner-1", &node.node_id).await;

        let request = Request::builder()
            .method("PUT")
            .uri(format!("/api/v1/nodes/{}/status", node.node_id))
            .header("content-type", "application/json")
            .header("x-owner-id", "owner-1")
            .body(Body::from(r#"{"status":"maintenance"}"#))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let request = Request::builder()
            .method("DELETE")
            .uri(format!("/api/v1/nodes/{}", node.node_id))
            .header("x-owner-id", "owner-1")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let request = Request::builder()
            .uri(format!("/api/v1/nodes/{}", node.node_id))
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["node"]["status"], "inactive");
    }

    #[tokio::test]
    async fn test_activity_rejects_unknown_timeframe() {
        let app = test_router().await;

        let request = Request::builder()
            .uri("/api/v1/network/activity?timeframe=90d")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_network_stats_includes_blockchain() {
        let app = test_router().await;

        let request = Request::builder()
            .uri("/api/v1/network/stats")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(parsed["blockchain"].is_object());
        assert_eq!(parsed["total_nodes"], 0);
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let app = test_router().await;
        register(&app, "owner-1", "AP", 37.0, -122.0).await;

        let request = Request::builder()
            .uri("/metrics")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("openmesh_registrations_total 1"));
    }
}
