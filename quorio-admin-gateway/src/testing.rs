//! A single-node cluster on temporary drives, wired the way the server wires it.

use crate::router::AdminState;
use quorio_core::{
    ConfigCommitProtocol, ConfigDocument, ConfigStore, ConnStats, CredentialStore, Credentials,
    EngineHandle, HealOrchestrator, LocalNsLocker, LocalPeer, LockInventoryService,
    MirrorBootstrap, Peer, PeerRegistry, QuorumNsLocker, ServiceControl, ServiceSignals,
    StatusAggregator, StorageBootstrap,
};
use std::sync::Arc;
use std::time::Instant;
use tempfile::TempDir;

pub const NODE_ADDRESS: &str = "127.0.0.1:9000";

pub fn admin_credentials() -> Credentials {
    Credentials::new("quorioadmin", "quorio-secret-key")
}

pub struct TestNode {
    pub local: Arc<LocalPeer>,
    pub credentials: Arc<CredentialStore>,
    pub signals: ServiceSignals,
    pub engine: Arc<EngineHandle>,
    pub locker: Arc<LocalNsLocker>,
    pub bootstrap: Arc<MirrorBootstrap>,
    pub state: AdminState,
    _dirs: Vec<TempDir>,
}

impl TestNode {
    pub async fn start(drive_count: usize) -> Self {
        Self::start_with(drive_count, false).await
    }

    /// `pinned` marks the credentials as set through the environment.
    pub async fn start_with(drive_count: usize, pinned: bool) -> Self {
        let config_dir = TempDir::new().unwrap();
        let drives: Vec<TempDir> = (0..drive_count).map(|_| TempDir::new().unwrap()).collect();

        let bootstrap = Arc::new(
            MirrorBootstrap::new(drives.iter().map(|d| d.path().to_path_buf()).collect()).unwrap(),
        );
        let engine = Arc::new(EngineHandle::new(bootstrap.initialize().await.unwrap()));

        let config_store = Arc::new(ConfigStore::new(config_dir.path().to_path_buf()).unwrap());
        config_store
            .load_or_init(ConfigDocument::new(admin_credentials(), "us-east-1"))
            .await
            .unwrap();

        let credentials = Arc::new(CredentialStore::new(admin_credentials(), pinned));
        let locker = Arc::new(LocalNsLocker::new(NODE_ADDRESS));
        let signals = ServiceSignals::new();
        let bootstrap_dyn: Arc<dyn StorageBootstrap> = bootstrap.clone();

        let local = Arc::new(LocalPeer::new(
            NODE_ADDRESS,
            Instant::now(),
            config_store,
            credentials.clone(),
            locker.clone(),
            engine.clone(),
            bootstrap_dyn.clone(),
            signals.clone(),
        ));
        let registry = Arc::new(
            PeerRegistry::new(vec![Peer::new(NODE_ADDRESS, true, local.clone())]).unwrap(),
        );

        let state = AdminState {
            status: Arc::new(StatusAggregator::new(
                registry.clone(),
                engine.clone(),
                Arc::new(ConnStats::new()),
                "us-east-1",
            )),
            service: Arc::new(ServiceControl::new(
                registry.clone(),
                local.clone(),
                credentials.clone(),
            )),
            locks: Arc::new(LockInventoryService::new(registry.clone())),
            heal: Arc::new(HealOrchestrator::new(
                engine.clone(),
                bootstrap_dyn,
                registry.clone(),
            )),
            config: Arc::new(ConfigCommitProtocol::new(
                registry.clone(),
                Arc::new(QuorumNsLocker::new(registry)),
            )),
            engine: engine.clone(),
        };

        let mut dirs = drives;
        dirs.push(config_dir);

        Self {
            local,
            credentials,
            signals,
            engine,
            locker,
            bootstrap,
            state,
            _dirs: dirs,
        }
    }

    /// Path of drive `index` as the engine sees it.
    pub fn drive(&self, index: usize) -> std::path::PathBuf {
        self.bootstrap.endpoints()[index].clone()
    }
}
