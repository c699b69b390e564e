//! Internal peer RPC surface: what [`quorio_core::RemotePeer`] calls on
//! other nodes, answered by this node's [`LocalPeer`].

use crate::auth::require_peer_signature;
use crate::error::RpcError;
use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::{StatusCode, header},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use quorio_core::peer::remote::{LockResponse, PEER_API_PREFIX, ServiceRequest, UptimeResponse};
use quorio_core::{
    CredentialStore, Credentials, LocalPeer, LockFilter, LockRecord, LockRequest, QuorioError,
};
use serde::de::DeserializeOwned;
use std::sync::Arc;

type RpcResult<T> = std::result::Result<T, RpcError>;

pub fn peer_router(local: Arc<LocalPeer>, credentials: Arc<CredentialStore>) -> Router {
    let route = |suffix: &str| format!("{}{}", PEER_API_PREFIX, suffix);

    Router::new()
        .route(&route("/uptime"), get(uptime))
        .route(&route("/service"), post(service))
        .route(&route("/credentials"), post(set_credentials))
        .route(&route("/locks"), post(list_locks))
        .route(&route("/locks/force-unlock"), post(force_unlock))
        .route(&route("/locks/acquire"), post(acquire_lock))
        .route(&route("/locks/release"), post(release_lock))
        .route(&route("/reinit-storage"), post(reinit_storage))
        .route(&route("/config"), get(get_config))
        .route(&route("/config/stage/:name"), put(stage_config))
        .route(&route("/config/commit/:name"), post(commit_config))
        .route_layer(middleware::from_fn_with_state(
            credentials,
            require_peer_signature,
        ))
        .with_state(local)
}

fn parse_json<T: DeserializeOwned>(body: &[u8]) -> RpcResult<T> {
    serde_json::from_slice(body)
        .map_err(|e| RpcError(QuorioError::MalformedRequest(e.to_string())))
}

async fn uptime(State(local): State<Arc<LocalPeer>>) -> Json<UptimeResponse> {
    Json(UptimeResponse {
        uptime: local.local_uptime().as_nanos() as u64,
    })
}

async fn service(State(local): State<Arc<LocalPeer>>, body: Bytes) -> RpcResult<StatusCode> {
    let ServiceRequest { command } = parse_json(&body)?;
    local.signal_service(command);
    Ok(StatusCode::OK)
}

async fn set_credentials(
    State(local): State<Arc<LocalPeer>>,
    body: Bytes,
) -> RpcResult<StatusCode> {
    let credentials: Credentials = parse_json(&body)?;
    local.apply_credentials(&credentials).await?;
    Ok(StatusCode::OK)
}

async fn list_locks(State(local): State<Arc<LocalPeer>>, body: Bytes) -> RpcResult<Response> {
    let filter: LockFilter = parse_json(&body)?;
    Ok(Json(local.local_locks(&filter)).into_response())
}

async fn force_unlock(
    State(local): State<Arc<LocalPeer>>,
    body: Bytes,
) -> RpcResult<Json<LockResponse>> {
    let record: LockRecord = parse_json(&body)?;
    Ok(Json(LockResponse {
        success: local.force_unlock_local(&record),
    }))
}

async fn acquire_lock(
    State(local): State<Arc<LocalPeer>>,
    body: Bytes,
) -> RpcResult<Json<LockResponse>> {
    let request: LockRequest = parse_json(&body)?;
    Ok(Json(LockResponse {
        success: local.hold_lock(&request),
    }))
}

async fn release_lock(
    State(local): State<Arc<LocalPeer>>,
    body: Bytes,
) -> RpcResult<Json<LockResponse>> {
    let request: LockRequest = parse_json(&body)?;
    Ok(Json(LockResponse {
        success: local.release_held_lock(&request),
    }))
}

async fn reinit_storage(State(local): State<Arc<LocalPeer>>) -> RpcResult<StatusCode> {
    local.reinit_local_storage().await?;
    Ok(StatusCode::OK)
}

async fn get_config(State(local): State<Arc<LocalPeer>>) -> RpcResult<Response> {
    let document = local.read_config().await?;
    Ok(([(header::CONTENT_TYPE, "application/json")], document).into_response())
}

async fn stage_config(
    State(local): State<Arc<LocalPeer>>,
    Path(name): Path<String>,
    body: Bytes,
) -> RpcResult<StatusCode> {
    local.stage_local_config(&name, &body).await?;
    Ok(StatusCode::OK)
}

async fn commit_config(
    State(local): State<Arc<LocalPeer>>,
    Path(name): Path<String>,
) -> RpcResult<StatusCode> {
    local.commit_local_config(&name).await?;
    Ok(StatusCode::OK)
}
