use super::{AdminPeerClient, PeerOutcome};
use crate::{
    CONTENT_SHA256_HEADER, CredentialStore, Credentials, DATE_HEADER, LockFilter, LockRecord,
    LockRequest, PeerError, QuorioError, Result, ServiceCommand, sign_request,
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Route prefix of the internal peer RPC surface.
pub const PEER_API_PREFIX: &str = "/quorio/peer/v1";

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct UptimeResponse {
    /// Nanoseconds since the peer booted.
    pub uptime: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ServiceRequest {
    pub command: ServiceCommand,
}

/// Whether a lock call changed the peer's lock table.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LockResponse {
    pub success: bool,
}

/// A cluster peer reached over HTTP.
pub struct RemotePeer {
    address: String,
    client: reqwest::Client,
    credentials: Arc<CredentialStore>,
}

impl RemotePeer {
    pub fn new(
        address: impl Into<String>,
        credentials: Arc<CredentialStore>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| QuorioError::Http(error.to_string()))?;

        Ok(Self {
            address: address.into(),
            client,
            credentials,
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    fn endpoint(&self, route: &str) -> (String, String) {
        let path = format!("{}{}", PEER_API_PREFIX, route);
        let url = format!("http://{}{}", self.address, path);
        (path, url)
    }

    async fn send(&self, method: Method, route: &str, body: Bytes) -> PeerOutcome<reqwest::Response> {
        let (path, url) = self.endpoint(route);
        let signed = sign_request(
            &self.credentials.get(),
            method.as_str(),
            &path,
            None,
            None,
            &body,
            Utc::now(),
        );

        let response = self
            .client
            .request(method, &url)
            .header(reqwest::header::AUTHORIZATION, signed.authorization)
            .header(DATE_HEADER, signed.date)
            .header(CONTENT_SHA256_HEADER, signed.content_sha256)
            .body(body)
            .send()
            .await
            .map_err(|error| self.transport_error(error))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = response.text().await.unwrap_or_default();
        Err(PeerError::Remote {
            status: status.as_u16(),
            message: if message.is_empty() {
                status.to_string()
            } else {
                message
            },
        })
    }

    async fn send_json<B: Serialize>(&self, method: Method, route: &str, body: &B) -> PeerOutcome<reqwest::Response> {
        let payload = serde_json::to_vec(body).map_err(|error| PeerError::Local(error.to_string()))?;
        self.send(method, route, Bytes::from(payload)).await
    }

    fn transport_error(&self, error: reqwest::Error) -> PeerError {
        if error.is_timeout() {
            PeerError::Timeout(format!("{}: {}", self.address, error))
        } else {
            PeerError::Unreachable(format!("{}: {}", self.address, error))
        }
    }

    async fn read_json<T: for<'de> Deserialize<'de>>(&self, response: reqwest::Response) -> PeerOutcome<T> {
        response
            .json()
            .await
            .map_err(|error| self.transport_error(error))
    }
}

#[async_trait]
impl AdminPeerClient for RemotePeer {
    async fn uptime(&self) -> PeerOutcome<Duration> {
        let response = self.send(Method::GET, "/uptime", Bytes::new()).await?;
        let payload: UptimeResponse = self.read_json(response).await?;
        Ok(Duration::from_nanos(payload.uptime))
    }

    async fn service(&self, command: ServiceCommand) -> PeerOutcome<()> {
        self.send_json(Method::POST, "/service", &ServiceRequest { command })
            .await?;
        Ok(())
    }

    async fn set_credentials(&self, credentials: &Credentials) -> PeerOutcome<()> {
        self.send_json(Method::POST, "/credentials", credentials).await?;
        Ok(())
    }

    async fn list_locks(&self, filter: &LockFilter) -> PeerOutcome<Vec<LockRecord>> {
        let response = self.send_json(Method::POST, "/locks", filter).await?;
        self.read_json(response).await
    }

    async fn force_unlock(&self, record: &LockRecord) -> PeerOutcome<bool> {
        let response = self
            .send_json(Method::POST, "/locks/force-unlock", record)
            .await?;
        let payload: LockResponse = self.read_json(response).await?;
        Ok(payload.success)
    }

    async fn acquire_lock(&self, request: &LockRequest) -> PeerOutcome<bool> {
        let response = self.send_json(Method::POST, "/locks/acquire", request).await?;
        let payload: LockResponse = self.read_json(response).await?;
        Ok(payload.success)
    }

    async fn release_lock(&self, request: &LockRequest) -> PeerOutcome<bool> {
        let response = self.send_json(Method::POST, "/locks/release", request).await?;
        let payload: LockResponse = self.read_json(response).await?;
        Ok(payload.success)
    }

    async fn reinit_storage(&self) -> PeerOutcome<()> {
        self.send(Method::POST, "/reinit-storage", Bytes::new()).await?;
        Ok(())
    }

    async fn get_config(&self) -> PeerOutcome<Bytes> {
        let response = self.send(Method::GET, "/config", Bytes::new()).await?;
        response
            .bytes()
            .await
            .map_err(|error| self.transport_error(error))
    }

    async fn stage_config(&self, name: &str, payload: Bytes) -> PeerOutcome<()> {
        self.send(Method::PUT, &format!("/config/stage/{}", name), payload)
            .await?;
        Ok(())
    }

    async fn commit_config(&self, name: &str) -> PeerOutcome<()> {
        self.send(Method::POST, &format!("/config/commit/{}", name), Bytes::new())
            .await?;
        Ok(())
    }
}
