use crate::{
    CredentialStore, Credentials, LocalPeer, PeerRegistry, QuorioError, Result, ServiceCommand,
    invoke_all,
};
use std::sync::Arc;

/// Sends `command` to every peer in the background. The caller never waits
/// on, or learns about, the outcome.
pub fn spawn_service_broadcast(registry: Arc<PeerRegistry>, command: ServiceCommand) {
    tokio::spawn(async move {
        let results = invoke_all(registry.peers(), |peer| peer.client.service(command)).await;
        for result in results {
            if let Err(error) = result.outcome {
                tracing::warn!(
                    "Failed to send {} to {}: {}",
                    command.as_str(),
                    result.address,
                    error
                );
            }
        }
    });
}

/// Process lifecycle and credential rotation across the cluster.
#[derive(Clone)]
pub struct ServiceControl {
    registry: Arc<PeerRegistry>,
    local: Arc<LocalPeer>,
    credentials: Arc<CredentialStore>,
}

impl ServiceControl {
    pub fn new(
        registry: Arc<PeerRegistry>,
        local: Arc<LocalPeer>,
        credentials: Arc<CredentialStore>,
    ) -> Self {
        Self {
            registry,
            local,
            credentials,
        }
    }

    pub fn restart(&self) {
        tracing::info!("Restarting all {} peer(s)", self.registry.len());
        spawn_service_broadcast(self.registry.clone(), ServiceCommand::Restart);
    }

    /// Pushes `credentials` to the remote peers, then applies them here.
    ///
    /// Remote failures are logged; only a local failure fails the call.
    pub async fn set_credentials(&self, credentials: Credentials) -> Result<()> {
        if self.credentials.is_pinned() {
            return Err(QuorioError::CredentialsPinned);
        }
        credentials.validate()?;

        let remote = self.registry.remote_peers();
        let results = invoke_all(&remote, |peer| peer.client.set_credentials(&credentials)).await;
        for result in results {
            if let Err(error) = result.outcome {
                tracing::warn!(
                    "Failed to update credentials on {}: {}",
                    result.address,
                    error
                );
            }
        }

        self.local.apply_credentials(&credentials).await.map_err(|error| {
            tracing::error!("Failed to update credentials locally: {}", error);
            match error {
                QuorioError::CredentialsPinned => error,
                other => QuorioError::Internal(other.to_string()),
            }
        })
    }
}
