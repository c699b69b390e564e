use crate::auth::require_signature;
use crate::error::ApiError;
use crate::selector::{AdminOperation, OPERATION_HEADER};
use crate::xml::{self, ListingParams};
use axum::{
    Json, Router,
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, Method, StatusCode, header},
    middleware,
    response::{IntoResponse, Response},
    routing::any,
};
use quorio_core::names::parse_max_keys;
use quorio_core::{
    ConfigCommitProtocol, CredentialStore, Credentials, EngineHandle, HealOrchestrator,
    HealRequest, HealTask, ListObjectsHealRequest, LockFilter, LockInventoryService, QuorioError,
    ServiceControl, StatusAggregator,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Path of every admin request; the query string selects the resource.
pub const ADMIN_PATH: &str = "/quorio/admin/v1";

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Components behind the admin surface.
#[derive(Clone)]
pub struct AdminState {
    pub status: Arc<StatusAggregator>,
    pub service: Arc<ServiceControl>,
    pub locks: Arc<LockInventoryService>,
    pub heal: Arc<HealOrchestrator>,
    pub config: Arc<ConfigCommitProtocol>,
    pub engine: Arc<EngineHandle>,
}

/// Body of a set-credentials request.
#[derive(Debug, Deserialize)]
struct CredentialsRequest {
    username: String,
    password: String,
}

pub fn admin_router(state: AdminState, credentials: Arc<CredentialStore>) -> Router {
    Router::new()
        .route(ADMIN_PATH, any(admin_handler))
        .route_layer(middleware::from_fn_with_state(credentials, require_signature))
        .with_state(state)
}

async fn admin_handler(
    State(state): State<AdminState>,
    method: Method,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> ApiResult<Response> {
    let operation_header = headers
        .get(OPERATION_HEADER)
        .and_then(|value| value.to_str().ok());
    let operation = AdminOperation::parse(&method, &query, operation_header)?;
    tracing::debug!("Admin operation {}", operation.name());

    let param = |key: &str| query.get(key).cloned().unwrap_or_default();
    let dry_run = query.contains_key("dry-run");

    let response = match operation {
        AdminOperation::ServiceStatus => Json(state.status.service_status().await?).into_response(),
        AdminOperation::ServiceRestart => {
            state.service.restart();
            StatusCode::OK.into_response()
        }
        AdminOperation::SetCredentials => {
            let CredentialsRequest { username, password } = serde_json::from_slice(&body)
                .map_err(|e| QuorioError::MalformedRequest(e.to_string()))?;
            state
                .service
                .set_credentials(Credentials::new(username, password))
                .await?;
            StatusCode::OK.into_response()
        }
        AdminOperation::ServerInfo => Json(state.status.server_info().await?).into_response(),
        AdminOperation::ListLocks => {
            let filter = lock_filter(&query)?;
            Json(state.locks.list(&filter).await?).into_response()
        }
        AdminOperation::ClearLocks => {
            let filter = lock_filter(&query)?;
            Json(state.locks.clear(&filter).await?).into_response()
        }
        AdminOperation::ListObjectsHeal => {
            let request = ListObjectsHealRequest {
                bucket: param("bucket"),
                prefix: param("prefix"),
                marker: param("marker"),
                delimiter: param("delimiter"),
                max_keys: query.get("max-key").cloned(),
            };
            let listing = state.heal.list_objects(request.clone()).await?;
            let params = ListingParams {
                bucket: &request.bucket,
                prefix: &request.prefix,
                marker: &request.marker,
                delimiter: &request.delimiter,
                max_keys: parse_max_keys(request.max_keys.as_deref())?,
            };
            xml_response(xml::list_objects_heal_result(params, &listing))
        }
        AdminOperation::ListBucketsHeal => {
            let buckets = state.heal.list_buckets().await?;
            xml_response(xml::list_buckets_heal_result(&buckets))
        }
        AdminOperation::HealBucket => {
            let task = HealTask::Bucket {
                bucket: param("bucket"),
            };
            Json(state.heal.run(HealRequest { task, dry_run }).await?).into_response()
        }
        AdminOperation::HealObject => {
            let task = HealTask::Object {
                bucket: param("bucket"),
                object: param("object"),
            };
            Json(state.heal.run(HealRequest { task, dry_run }).await?).into_response()
        }
        AdminOperation::HealFormat => {
            let task = HealTask::Format;
            Json(state.heal.run(HealRequest { task, dry_run }).await?).into_response()
        }
        AdminOperation::GetConfig => {
            let document = state.config.read().await?;
            ([(header::CONTENT_TYPE, "application/json")], document).into_response()
        }
        AdminOperation::SetConfig => {
            if !state.engine.is_initialized().await {
                return Err(QuorioError::ServerNotInitialized.into());
            }
            // Quorum failures still answer 200; the report carries the detail.
            Json(state.config.run(body).await?).into_response()
        }
    };

    Ok(response)
}

fn lock_filter(query: &HashMap<String, String>) -> quorio_core::Result<LockFilter> {
    LockFilter::from_query(
        query.get("bucket").map(String::as_str),
        query.get("prefix").map(String::as_str),
        query.get("duration").map(String::as_str),
    )
}

fn xml_response(body: String) -> Response {
    ([(header::CONTENT_TYPE, "application/xml")], body).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{TestNode, admin_credentials};
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use chrono::Utc;
    use quorio_core::{
        CONTENT_SHA256_HEADER, DATE_HEADER, NamespaceLocker, SetConfigResult, sign_request,
    };
    use serde_json::Value;
    use tower::ServiceExt;

    fn signed_request(
        credentials: &Credentials,
        method: Method,
        query: &str,
        operation: Option<&str>,
        body: &[u8],
    ) -> Request<Body> {
        let signed = sign_request(
            credentials,
            method.as_str(),
            ADMIN_PATH,
            Some(query),
            operation,
            body,
            Utc::now(),
        );
        let mut builder = Request::builder()
            .method(method)
            .uri(format!("{}?{}", ADMIN_PATH, query))
            .header(header::AUTHORIZATION, signed.authorization)
            .header(DATE_HEADER, signed.date)
            .header(CONTENT_SHA256_HEADER, signed.content_sha256);
        if let Some(operation) = operation {
            builder = builder.header(OPERATION_HEADER, operation);
        }
        builder.body(Body::from(body.to_vec())).unwrap()
    }

    async fn call(node: &TestNode, request: Request<Body>) -> (StatusCode, Bytes) {
        let app = admin_router(node.state.clone(), node.credentials.clone());
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body)
    }

    async fn call_signed(
        node: &TestNode,
        method: Method,
        query: &str,
        operation: Option<&str>,
        body: &[u8],
    ) -> (StatusCode, Bytes) {
        let request = signed_request(&admin_credentials(), method, query, operation, body);
        call(node, request).await
    }

    fn error_code(body: &Bytes) -> String {
        let text = String::from_utf8_lossy(body);
        let start = text.find("<Code>").map(|i| i + "<Code>".len()).unwrap_or(0);
        let end = text.find("</Code>").unwrap_or(start);
        text[start..end].to_string()
    }

    #[tokio::test]
    async fn test_unsigned_request_is_denied() {
        let node = TestNode::start(1).await;
        let request = Request::builder()
            .method(Method::GET)
            .uri(format!("{}?service", ADMIN_PATH))
            .header(OPERATION_HEADER, "status")
            .body(Body::empty())
            .unwrap();

        let (status, body) = call(&node, request).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(error_code(&body), "AccessDenied");
    }

    #[tokio::test]
    async fn test_tampered_query_fails_signature() {
        let node = TestNode::start(1).await;
        let mut request = signed_request(
            &admin_credentials(),
            Method::GET,
            "lock&bucket=photos",
            Some("list"),
            b"",
        );
        *request.uri_mut() = format!("{}?lock&bucket=videos", ADMIN_PATH).parse().unwrap();

        let (status, body) = call(&node, request).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(error_code(&body), "SignatureDoesNotMatch");
    }

    #[tokio::test]
    async fn test_swapped_operation_fails_signature() {
        let node = TestNode::start(2).await;
        let mut request = signed_request(
            &admin_credentials(),
            Method::POST,
            "heal&bucket=photos&dry-run",
            Some("bucket"),
            b"",
        );
        request
            .headers_mut()
            .insert(OPERATION_HEADER, header::HeaderValue::from_static("format"));

        let (status, body) = call(&node, request).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(error_code(&body), "SignatureDoesNotMatch");
    }

    #[tokio::test]
    async fn test_service_status() {
        let node = TestNode::start(1).await;
        let (status, body) = call_signed(&node, Method::GET, "service", Some("status"), b"").await;

        assert_eq!(status, StatusCode::OK);
        let value: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["serverVersion"]["version"], quorio_core::VERSION);
        assert!(value["uptime"].as_u64().is_some());
    }

    #[tokio::test]
    async fn test_server_info_reports_storage_and_region() {
        let node = TestNode::start(1).await;
        let (status, body) = call_signed(&node, Method::GET, "server-info", None, b"").await;

        assert_eq!(status, StatusCode::OK);
        let value: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["server"]["region"], "us-east-1");
        assert!(value["network"]["received"].as_u64().is_some());
    }

    #[tokio::test]
    async fn test_wrong_method_is_not_allowed() {
        let node = TestNode::start(1).await;
        let (status, body) = call_signed(&node, Method::GET, "config", Some("set"), b"").await;

        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(error_code(&body), "MethodNotAllowed");
    }

    #[tokio::test]
    async fn test_lock_listing_validates_bucket() {
        let node = TestNode::start(1).await;
        let (status, body) =
            call_signed(&node, Method::GET, "lock&bucket=ab", Some("list"), b"").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error_code(&body), "InvalidBucketName");
    }

    #[tokio::test]
    async fn test_clear_locks_releases_listed_records() {
        let node = TestNode::start(1).await;
        let guard = node.locker.lock("photos", "2024/a.jpg", "upload").await.unwrap();

        let (status, body) = call_signed(
            &node,
            Method::GET,
            "lock&bucket=photos&prefix=2024/",
            Some("list"),
            b"",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let listed: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(listed.as_array().unwrap().len(), 1);
        assert_eq!(listed[0]["object"], "2024/a.jpg");

        let (status, body) = call_signed(
            &node,
            Method::POST,
            "lock&bucket=photos&prefix=2024/",
            Some("clear"),
            b"",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let cleared: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(cleared, listed);

        let filter = LockFilter::from_query(Some("photos"), None, None).unwrap();
        assert!(node.locker.list(&filter, Utc::now()).is_empty());
        drop(guard);
    }

    #[tokio::test]
    async fn test_list_objects_heal_rejects_bad_max_key() {
        let node = TestNode::start(2).await;
        std::fs::create_dir_all(node.drive(0).join("photos")).unwrap();

        let (status, body) =
            call_signed(&node, Method::GET, "heal&bucket=photos&max-key=abc", None, b"").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error_code(&body), "InvalidMaxKeys");
    }

    #[tokio::test]
    async fn test_heal_listings_render_xml() {
        let node = TestNode::start(2).await;
        let bucket = node.drive(0).join("photos");
        std::fs::create_dir_all(&bucket).unwrap();
        std::fs::write(bucket.join("a.jpg"), b"jpeg").unwrap();

        let (status, body) = call_signed(&node, Method::GET, "heal", None, b"").await;
        assert_eq!(status, StatusCode::OK);
        let text = String::from_utf8_lossy(&body);
        assert!(text.contains("<ListAllMyBucketsResult"));
        assert!(text.contains("<Name>photos</Name>"));

        let (status, body) =
            call_signed(&node, Method::GET, "heal&bucket=photos&max-key=10", None, b"").await;
        assert_eq!(status, StatusCode::OK);
        let text = String::from_utf8_lossy(&body);
        assert!(text.contains("<ListBucketResult"));
        assert!(text.contains("<Key>a.jpg</Key>"));
        assert!(text.contains("<MaxKeys>10</MaxKeys>"));
    }

    #[tokio::test]
    async fn test_heal_object_dry_run_then_heal() {
        let node = TestNode::start(2).await;
        let bucket = node.drive(0).join("photos");
        std::fs::create_dir_all(&bucket).unwrap();
        std::fs::write(bucket.join("a.jpg"), b"jpeg").unwrap();
        std::fs::create_dir_all(node.drive(1).join("photos")).unwrap();

        let (status, body) = call_signed(
            &node,
            Method::POST,
            "heal&bucket=photos&object=a.jpg&dry-run",
            Some("object"),
            b"",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, Bytes::from_static(b"\"validated\""));
        assert!(!node.drive(1).join("photos/a.jpg").exists());

        let (status, body) = call_signed(
            &node,
            Method::POST,
            "heal&bucket=photos&object=a.jpg",
            Some("object"),
            b"",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, Bytes::from_static(b"\"healed\""));
        assert_eq!(std::fs::read(node.drive(1).join("photos/a.jpg")).unwrap(), b"jpeg");
    }

    #[tokio::test]
    async fn test_heal_missing_object_is_not_found() {
        let node = TestNode::start(2).await;
        std::fs::create_dir_all(node.drive(0).join("photos")).unwrap();

        let (status, body) = call_signed(
            &node,
            Method::POST,
            "heal&bucket=photos&object=missing.jpg",
            Some("object"),
            b"",
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(error_code(&body), "NoSuchKey");
    }

    #[tokio::test]
    async fn test_heal_format_needs_erasure_mode() {
        let node = TestNode::start(1).await;
        let (status, body) =
            call_signed(&node, Method::POST, "heal&dry-run", Some("format"), b"").await;

        assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
        assert_eq!(error_code(&body), "NotImplemented");
    }

    #[tokio::test]
    async fn test_set_config_then_get_config() {
        let node = TestNode::start(1).await;
        let document = quorio_core::ConfigDocument::new(admin_credentials(), "eu-central-1")
            .to_bytes()
            .unwrap();

        let (status, body) = call_signed(&node, Method::PUT, "config", Some("set"), &document).await;
        assert_eq!(status, StatusCode::OK);
        let result: SetConfigResult = serde_json::from_slice(&body).unwrap();
        assert!(result.status);
        assert_eq!(result.node_results.len(), 1);
        assert!(!result.node_results[0].err_set);

        let (status, body) = call_signed(&node, Method::GET, "config", Some("get"), b"").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, document);
    }

    #[tokio::test]
    async fn test_set_config_rejects_malformed_document() {
        let node = TestNode::start(1).await;
        let (status, body) =
            call_signed(&node, Method::PUT, "config", Some("set"), b"not json").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error_code(&body), "MalformedRequest");
    }

    #[tokio::test]
    async fn test_set_credentials_rotates_signing_key() {
        let node = TestNode::start(1).await;
        let body = br#"{"username":"rotatedadmin","password":"rotated-secret-key"}"#;

        let (status, _) = call_signed(&node, Method::POST, "service", Some("creds"), body).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = call_signed(&node, Method::GET, "service", Some("status"), b"").await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let rotated = Credentials::new("rotatedadmin", "rotated-secret-key");
        let request = signed_request(&rotated, Method::GET, "service", Some("status"), b"");
        let (status, _) = call(&node, request).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_pinned_credentials_cannot_change() {
        let node = TestNode::start_with(1, true).await;
        let body = br#"{"username":"rotatedadmin","password":"rotated-secret-key"}"#;

        let (status, body) = call_signed(&node, Method::POST, "service", Some("creds"), body).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(error_code(&body), "MethodNotAllowed");
    }
}
