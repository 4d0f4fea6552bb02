//! HTTP control surface.

use crate::node::{DoinNode, NodeStatus};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use doin_types::{Block, Digest, PeerId, Task, TaskId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

#[derive(Clone)]
struct AppState {
    node: DoinNode,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Deserialize)]
struct BlockRangeQuery {
    from: u64,
    to: u64,
}

#[derive(Deserialize)]
struct ClaimRequest {
    task_id: String,
    claimant: String,
}

#[derive(Deserialize)]
struct CompleteRequest {
    task_id: String,
    claimant: String,
    result_hash: String,
    measured_metric: Option<f64>,
}

pub fn router(node: DoinNode) -> Router {
    Router::new()
        .route("/status", get(get_status))
        .route("/chain/status", get(get_chain_status))
        .route("/chain/blocks", get(get_blocks))
        .route("/chain/block/:index", get(get_block))
        .route("/tasks/claim", post(claim_task))
        .route("/tasks/complete", post(complete_task))
        .route("/peers", get(get_peers))
        .with_state(Arc::new(AppState { node }))
}

/// Serve the control surface; the returned handle runs for the node's
/// lifetime.
pub fn start(node: DoinNode, host: &str, port: u16) -> JoinHandle<()> {
    let app = router(node);
    let addr = format!("{}:{}", host, port);
    info!(%addr, "Starting API server");
    tokio::spawn(async move {
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .expect("failed to bind API server");
        axum::serve(listener, app).await.expect("API server failed");
    })
}

async fn get_status(State(state): State<Arc<AppState>>) -> Json<NodeStatus> {
    Json(state.node.status().await)
}

async fn get_chain_status(
    State(state): State<Arc<AppState>>,
) -> Json<doin_network::ChainStatusPayload> {
    Json(state.node.chain_status().await)
}

async fn get_blocks(
    State(state): State<Arc<AppState>>,
    Query(range): Query<BlockRangeQuery>,
) -> Result<Json<Vec<Block>>, (StatusCode, Json<ErrorResponse>)> {
    if range.to < range.from {
        return Err(bad_request("to must be >= from"));
    }
    Ok(Json(state.node.blocks_in_range(range.from, range.to).await))
}

async fn get_block(
    State(state): State<Arc<AppState>>,
    Path(index): Path<u64>,
) -> Result<Json<Block>, StatusCode> {
    match state.node.block_at(index).await {
        Some(block) => Ok(Json(block)),
        None => Err(StatusCode::NOT_FOUND),
    }
}

async fn claim_task(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ClaimRequest>,
) -> Result<Json<Task>, (StatusCode, Json<ErrorResponse>)> {
    let task_id = parse_task_id(&request.task_id)?;
    let claimant = parse_peer_id(&request.claimant)?;
    match state.node.claim_task(&task_id, claimant).await {
        Ok(task) => Ok(Json(task)),
        Err(e) => Err((
            StatusCode::CONFLICT,
            Json(ErrorResponse {
                error: e.to_string(),
            }),
        )),
    }
}

async fn complete_task(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CompleteRequest>,
) -> Result<StatusCode, (StatusCode, Json<ErrorResponse>)> {
    let task_id = parse_task_id(&request.task_id)?;
    let claimant = parse_peer_id(&request.claimant)?;
    let result_hash = Digest::from_hex(&request.result_hash)
        .map_err(|_| bad_request("result_hash must be 64 hex characters"))?;
    match state
        .node
        .complete_task(&task_id, claimant, result_hash, request.measured_metric)
        .await
    {
        Ok(()) => Ok(StatusCode::OK),
        Err(e) => Err((
            StatusCode::CONFLICT,
            Json(ErrorResponse {
                error: e.to_string(),
            }),
        )),
    }
}

async fn get_peers(State(state): State<Arc<AppState>>) -> Json<Vec<doin_network::PeerInfo>> {
    Json(state.node.peer_infos().await)
}

fn parse_task_id(s: &str) -> Result<TaskId, (StatusCode, Json<ErrorResponse>)> {
    let bytes = hex::decode(s).map_err(|_| bad_request("task_id must be hex"))?;
    let arr: [u8; 32] = bytes
        .try_into()
        .map_err(|_| bad_request("task_id must be 32 bytes"))?;
    Ok(TaskId::from_bytes(arr))
}

fn parse_peer_id(s: &str) -> Result<PeerId, (StatusCode, Json<ErrorResponse>)> {
    PeerId::from_hex(s).map_err(|_| bad_request("claimant must be a 32-byte hex peer id"))
}

fn bad_request(message: &str) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: message.to_string(),
        }),
    )
}
