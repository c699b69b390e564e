//! Signed-request authentication for the admin and peer surfaces.

use crate::error::{ApiError, RpcError};
use axum::body::{Body, to_bytes};
use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::Response;
use chrono::Utc;
use quorio_core::{
    CONTENT_SHA256_HEADER, CredentialStore, DATE_HEADER, OPERATION_HEADER, QuorioError,
    RequestAuth, Result, verify_request,
};
use std::sync::Arc;

/// Upper bound on a signed request body; config documents are small.
pub const MAX_SIGNED_BODY_BYTES: usize = 8 * 1024 * 1024;

/// Admin middleware: rejects unsigned or mis-signed requests with an XML error.
pub async fn require_signature(
    State(credentials): State<Arc<CredentialStore>>,
    request: Request,
    next: Next,
) -> std::result::Result<Response, ApiError> {
    let request = authenticate(&credentials, request).await?;
    Ok(next.run(request).await)
}

/// Peer RPC middleware: same check, plain-text error body.
pub async fn require_peer_signature(
    State(credentials): State<Arc<CredentialStore>>,
    request: Request,
    next: Next,
) -> std::result::Result<Response, RpcError> {
    let request = authenticate(&credentials, request).await?;
    Ok(next.run(request).await)
}

/// Buffers the body, verifies the signature over it and hands back an
/// equivalent request for the inner handler.
async fn authenticate(credentials: &CredentialStore, request: Request) -> Result<Request> {
    let (parts, body) = request.into_parts();
    let body = to_bytes(body, MAX_SIGNED_BODY_BYTES)
        .await
        .map_err(|e| QuorioError::MalformedRequest(format!("failed to read body: {}", e)))?;

    let header_value = |name: &str| parts.headers.get(name).and_then(|v| v.to_str().ok());
    let auth = RequestAuth {
        authorization: header_value(header::AUTHORIZATION.as_str()),
        date: header_value(DATE_HEADER),
        content_sha256: header_value(CONTENT_SHA256_HEADER),
        operation: header_value(OPERATION_HEADER),
    };

    verify_request(
        &credentials.get(),
        parts.method.as_str(),
        parts.uri.path(),
        parts.uri.query(),
        auth,
        &body,
        Utc::now(),
    )?;

    Ok(Request::from_parts(parts, Body::from(body)))
}
