use crate::xml;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use quorio_core::QuorioError;

/// HTTP status and wire error code for `error`.
pub fn status_and_code(error: &QuorioError) -> (StatusCode, &'static str) {
    match error {
        QuorioError::InvalidBucketName(_) => (StatusCode::BAD_REQUEST, "InvalidBucketName"),
        QuorioError::InvalidObjectName(_) => (StatusCode::BAD_REQUEST, "XQuorioInvalidObjectName"),
        QuorioError::InvalidDuration(_) => (StatusCode::BAD_REQUEST, "InvalidDuration"),
        QuorioError::InvalidMaxKeys(_) => (StatusCode::BAD_REQUEST, "InvalidMaxKeys"),
        QuorioError::InvalidArgument(_) => (StatusCode::BAD_REQUEST, "InvalidArgument"),
        QuorioError::InvalidCredentials(_) => (StatusCode::BAD_REQUEST, "InvalidCredentials"),
        QuorioError::MalformedRequest(_) => (StatusCode::BAD_REQUEST, "MalformedRequest"),
        QuorioError::AccessDenied(_) => (StatusCode::FORBIDDEN, "AccessDenied"),
        QuorioError::SignatureMismatch => (StatusCode::FORBIDDEN, "SignatureDoesNotMatch"),
        QuorioError::RequestTimeTooSkewed => (StatusCode::FORBIDDEN, "RequestTimeTooSkewed"),
        QuorioError::BucketNotFound(_) => (StatusCode::NOT_FOUND, "NoSuchBucket"),
        QuorioError::ObjectNotFound { .. } => (StatusCode::NOT_FOUND, "NoSuchKey"),
        QuorioError::CredentialsPinned | QuorioError::MethodNotAllowed(_) => {
            (StatusCode::METHOD_NOT_ALLOWED, "MethodNotAllowed")
        }
        QuorioError::NotImplemented(_) => (StatusCode::NOT_IMPLEMENTED, "NotImplemented"),
        QuorioError::ServerNotInitialized => {
            (StatusCode::SERVICE_UNAVAILABLE, "XQuorioServerNotInitialized")
        }
        QuorioError::NoQuorum { .. } => (StatusCode::SERVICE_UNAVAILABLE, "XQuorioAdminNoQuorum"),
        QuorioError::Peer(_)
        | QuorioError::Storage(_)
        | QuorioError::Io(_)
        | QuorioError::Serialization(_)
        | QuorioError::Config(_)
        | QuorioError::Http(_)
        | QuorioError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "InternalError"),
    }
}

fn log_failure(status: StatusCode, error: &QuorioError) {
    if status.is_server_error() {
        tracing::error!("Admin request failed: {}", error);
    } else {
        tracing::debug!("Admin request rejected: {}", error);
    }
}

/// Admin-surface error, rendered as an XML error document.
#[derive(Debug)]
pub struct ApiError(pub QuorioError);

impl From<QuorioError> for ApiError {
    fn from(error: QuorioError) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = status_and_code(&self.0);
        log_failure(status, &self.0);

        let body = xml::error_document(code, &self.0.to_string());
        (status, [(header::CONTENT_TYPE, "application/xml")], body).into_response()
    }
}

/// Peer-RPC error, rendered as plain text so the caller can surface the
/// message verbatim in its per-node report.
#[derive(Debug)]
pub struct RpcError(pub QuorioError);

impl From<QuorioError> for RpcError {
    fn from(error: QuorioError) -> Self {
        Self(error)
    }
}

impl IntoResponse for RpcError {
    fn into_response(self) -> Response {
        let (status, _) = status_and_code(&self.0);
        log_failure(status, &self.0);
        (status, self.0.to_string()).into_response()
    }
}
