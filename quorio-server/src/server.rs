use crate::config::Config;
use axum::{
    Router,
    body::{Body, HttpBody},
    extract::{Request, State},
    http::{HeaderMap, header},
    middleware::{self, Next},
    response::Response,
};
use quorio_admin_gateway::{AdminState, admin_router, peer_router};
use quorio_core::{
    ConfigCommitProtocol, ConfigDocument, ConfigStore, ConnStats, CredentialStore, EngineHandle,
    HealOrchestrator, LocalNsLocker, LocalPeer, LockInventoryService, MirrorBootstrap, Peer,
    PeerRegistry, QuorumNsLocker, RemotePeer, Result, ServiceCommand, ServiceControl,
    ServiceSignals, StatusAggregator, StorageBootstrap,
};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, oneshot};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

/// Everything one node runs, wired together.
pub struct Node {
    pub address: String,
    pub local: Arc<LocalPeer>,
    pub credentials: Arc<CredentialStore>,
    pub signals: ServiceSignals,
    pub engine: Arc<EngineHandle>,
    pub conn_stats: Arc<ConnStats>,
    pub admin: AdminState,
}

impl Node {
    pub async fn build(config: &Config) -> Result<Self> {
        let address = config.node.effective_address();
        let boot_time = Instant::now();

        let bootstrap = Arc::new(MirrorBootstrap::new(config.drives.clone())?);
        let engine = match bootstrap.initialize().await {
            Ok(engine) => Arc::new(EngineHandle::new(engine)),
            Err(error) => {
                tracing::warn!("Storage not initialized, serving without an engine: {}", error);
                Arc::new(EngineHandle::uninitialized())
            }
        };

        let config_store = Arc::new(ConfigStore::new(config.config_dir.clone())?);
        let document = config_store
            .load_or_init(ConfigDocument::new(
                config.credentials.clone().into(),
                config.region.clone(),
            ))
            .await?;

        let credentials = match config.pinned_credentials() {
            Some(pinned) => {
                pinned.validate()?;
                tracing::info!("Credentials pinned by the environment");
                Arc::new(CredentialStore::new(pinned, true))
            }
            None => Arc::new(CredentialStore::new(document.credential.clone(), false)),
        };

        let signals = ServiceSignals::new();
        let locker = Arc::new(LocalNsLocker::new(address.clone()));
        let bootstrap: Arc<dyn StorageBootstrap> = bootstrap;
        let local = Arc::new(LocalPeer::new(
            address.clone(),
            boot_time,
            config_store,
            credentials.clone(),
            locker,
            engine.clone(),
            bootstrap.clone(),
            signals.clone(),
        ));

        let mut peers = Vec::with_capacity(config.peers.len());
        for peer_address in &config.peers {
            if *peer_address == address {
                peers.push(Peer::new(peer_address.clone(), true, local.clone()));
            } else {
                let remote =
                    RemotePeer::new(peer_address.clone(), credentials.clone(), config.rpc_timeout())?;
                peers.push(Peer::new(peer_address.clone(), false, Arc::new(remote)));
            }
        }
        let registry = Arc::new(PeerRegistry::new(peers)?);
        tracing::info!(
            "Node {} joined a cluster of {} peer(s), write quorum {}",
            address,
            registry.len(),
            registry.quorum()
        );

        let conn_stats = Arc::new(ConnStats::new());
        let admin = AdminState {
            status: Arc::new(StatusAggregator::new(
                registry.clone(),
                engine.clone(),
                conn_stats.clone(),
                document.region.clone(),
            )),
            service: Arc::new(ServiceControl::new(
                registry.clone(),
                local.clone(),
                credentials.clone(),
            )),
            locks: Arc::new(LockInventoryService::new(registry.clone())),
            heal: Arc::new(HealOrchestrator::new(
                engine.clone(),
                bootstrap,
                registry.clone(),
            )),
            config: Arc::new(ConfigCommitProtocol::new(
                registry.clone(),
                Arc::new(QuorumNsLocker::new(registry)),
            )),
            engine: engine.clone(),
        };

        Ok(Self {
            address,
            local,
            credentials,
            signals,
            engine,
            conn_stats,
            admin,
        })
    }

    pub fn router(&self) -> Router {
        admin_router(self.admin.clone(), self.credentials.clone())
            .merge(peer_router(self.local.clone(), self.credentials.clone()))
            .layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(middleware::from_fn_with_state(
                        self.conn_stats.clone(),
                        count_bytes,
                    )),
            )
    }

    /// Serves until a service command or Ctrl-C arrives, then retires the
    /// storage engine and reports which command ended the run.
    pub async fn serve(self, listener: TcpListener) -> Result<ServiceCommand> {
        let app = self.router();
        let mut commands = self.signals.subscribe();
        let (stopped_tx, stopped_rx) = oneshot::channel();

        let shutdown = async move {
            let command = wait_for_command(&mut commands).await;
            tracing::info!("Shutting down for {}", command.as_str());
            let _ = stopped_tx.send(command);
        };

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        if let Ok(engine) = self.engine.current().await {
            if let Err(error) = engine.shutdown().await {
                tracing::warn!("Storage engine shutdown failed: {}", error);
            }
        }

        Ok(stopped_rx.await.unwrap_or(ServiceCommand::Stop))
    }
}

pub async fn run_server(config: Config) -> Result<ServiceCommand> {
    let node = Node::build(&config).await?;

    let listener = TcpListener::bind(&config.node.bind_addr).await?;
    tracing::info!("Server listening on {} as {}", config.node.bind_addr, node.address);

    node.serve(listener).await
}

/// Formats the drives and seeds the configuration document, then returns.
pub async fn init_node(config: &Config) -> Result<()> {
    let bootstrap = MirrorBootstrap::new(config.drives.clone())?;
    let engine = bootstrap.initialize().await?;
    engine.shutdown().await?;

    let config_store = ConfigStore::new(config.config_dir.clone())?;
    config_store
        .load_or_init(ConfigDocument::new(
            config.credentials.clone().into(),
            config.region.clone(),
        ))
        .await?;

    tracing::info!(
        "Initialized {} drive(s) and configuration in {:?}",
        config.drives.len(),
        config.config_dir
    );
    Ok(())
}

async fn wait_for_command(commands: &mut broadcast::Receiver<ServiceCommand>) -> ServiceCommand {
    tokio::select! {
        received = commands.recv() => match received {
            Ok(command) => command,
            Err(error) => {
                tracing::warn!("Service signal channel failed: {}", error);
                ServiceCommand::Stop
            }
        },
        result = tokio::signal::ctrl_c() => {
            if let Err(error) = result {
                tracing::warn!("Failed to listen for Ctrl-C: {}", error);
            }
            ServiceCommand::Stop
        }
    }
}

/// Accumulates request and response `Content-Length` into the node's
/// connection counters.
async fn count_bytes(
    State(stats): State<Arc<ConnStats>>,
    request: Request,
    next: Next,
) -> Response {
    if let Some(length) = content_length(request.headers(), request.body()) {
        stats.add_received(length);
    }

    let response = next.run(request).await;
    if let Some(length) = content_length(response.headers(), response.body()) {
        stats.add_transferred(length);
    }
    response
}

/// The declared `Content-Length`, or the exact body size when the header is
/// only added later by the connection.
fn content_length(headers: &HeaderMap, body: &Body) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok())
        .or_else(|| body.size_hint().exact())
}
