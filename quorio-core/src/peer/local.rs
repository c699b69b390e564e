use super::{AdminPeerClient, PeerOutcome};
use crate::{
    ConfigStore, CredentialStore, Credentials, EngineHandle, LocalNsLocker, LockFilter,
    LockRecord, LockRequest, Result, ServiceCommand, ServiceSignals, StorageBootstrap,
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// This node, answering peer calls in-process.
///
/// The inherent methods return [`crate::QuorioError`] so the peer RPC surface
/// can map failures to HTTP precisely; the [`AdminPeerClient`] impl folds them
/// into per-slot [`crate::PeerError`]s.
pub struct LocalPeer {
    address: String,
    boot_time: Instant,
    config_store: Arc<ConfigStore>,
    credentials: Arc<CredentialStore>,
    locker: Arc<LocalNsLocker>,
    engine: Arc<EngineHandle>,
    bootstrap: Arc<dyn StorageBootstrap>,
    signals: ServiceSignals,
}

impl LocalPeer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        address: impl Into<String>,
        boot_time: Instant,
        config_store: Arc<ConfigStore>,
        credentials: Arc<CredentialStore>,
        locker: Arc<LocalNsLocker>,
        engine: Arc<EngineHandle>,
        bootstrap: Arc<dyn StorageBootstrap>,
        signals: ServiceSignals,
    ) -> Self {
        Self {
            address: address.into(),
            boot_time,
            config_store,
            credentials,
            locker,
            engine,
            bootstrap,
            signals,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn local_uptime(&self) -> Duration {
        self.boot_time.elapsed()
    }

    pub fn signal_service(&self, command: ServiceCommand) {
        tracing::info!("Received {} request on {}", command.as_str(), self.address);
        self.signals.send(command);
    }

    /// Applies `credentials` in memory and persists them in the committed
    /// configuration document.
    pub async fn apply_credentials(&self, credentials: &Credentials) -> Result<()> {
        credentials.validate()?;
        self.credentials.set(credentials.clone())?;

        let mut document = self.config_store.load().await?;
        document.credential = credentials.clone();
        self.config_store.save(&document).await?;

        tracing::info!(
            "Updated credentials on {} (access key {})",
            self.address,
            credentials.access_key
        );
        Ok(())
    }

    pub fn local_locks(&self, filter: &LockFilter) -> Vec<LockRecord> {
        self.locker.list(filter, Utc::now())
    }

    pub fn force_unlock_local(&self, record: &LockRecord) -> bool {
        self.locker
            .force_unlock(&record.bucket, &record.object, &record.lock_id)
    }

    pub fn hold_lock(&self, request: &LockRequest) -> bool {
        self.locker.try_hold(request)
    }

    pub fn release_held_lock(&self, request: &LockRequest) -> bool {
        self.locker.release(request)
    }

    /// Re-opens this node's drives and swaps in a fresh engine bound to them.
    pub async fn reinit_local_storage(&self) -> Result<()> {
        let disks = self.bootstrap.init_disks().await?;
        let engine = self.bootstrap.open(disks).await?;
        self.engine.replace_and_retire(engine).await;
        tracing::info!("Reinitialized storage on {}", self.address);
        Ok(())
    }

    pub async fn read_config(&self) -> Result<Bytes> {
        self.config_store.read_bytes().await
    }

    pub async fn stage_local_config(&self, name: &str, payload: &[u8]) -> Result<()> {
        self.config_store.stage(name, payload).await
    }

    pub async fn commit_local_config(&self, name: &str) -> Result<()> {
        self.config_store.commit(name).await
    }
}

#[async_trait]
impl AdminPeerClient for LocalPeer {
    async fn uptime(&self) -> PeerOutcome<Duration> {
        Ok(self.local_uptime())
    }

    async fn service(&self, command: ServiceCommand) -> PeerOutcome<()> {
        self.signal_service(command);
        Ok(())
    }

    async fn set_credentials(&self, credentials: &Credentials) -> PeerOutcome<()> {
        Ok(self.apply_credentials(credentials).await?)
    }

    async fn list_locks(&self, filter: &LockFilter) -> PeerOutcome<Vec<LockRecord>> {
        Ok(self.local_locks(filter))
    }

    async fn force_unlock(&self, record: &LockRecord) -> PeerOutcome<bool> {
        Ok(self.force_unlock_local(record))
    }

    async fn acquire_lock(&self, request: &LockRequest) -> PeerOutcome<bool> {
        Ok(self.hold_lock(request))
    }

    async fn release_lock(&self, request: &LockRequest) -> PeerOutcome<bool> {
        Ok(self.release_held_lock(request))
    }

    async fn reinit_storage(&self) -> PeerOutcome<()> {
        Ok(self.reinit_local_storage().await?)
    }

    async fn get_config(&self) -> PeerOutcome<Bytes> {
        Ok(self.read_config().await?)
    }

    async fn stage_config(&self, name: &str, payload: Bytes) -> PeerOutcome<()> {
        Ok(self.stage_local_config(name, &payload).await?)
    }

    async fn commit_config(&self, name: &str) -> PeerOutcome<()> {
        Ok(self.commit_local_config(name).await?)
    }
}
