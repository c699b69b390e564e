//! Cluster peers and the calls the control plane makes against them.
//!
//! Every node, including this one, is reached through [`AdminPeerClient`]:
//! [`LocalPeer`] answers in-process, [`RemotePeer`] over the peer RPC surface.

pub mod invoke;
pub mod local;
pub mod quorum_lock;
pub mod remote;

#[cfg(test)]
pub(crate) mod testing;

pub use invoke::{PeerOutcome, PeerResult, invoke_all};
pub use local::LocalPeer;
pub use quorum_lock::QuorumNsLocker;
pub use remote::RemotePeer;

use crate::quorum::write_quorum;
use crate::{
    Credentials, LockFilter, LockRecord, LockRequest, QuorioError, Result, ServiceCommand,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;

#[async_trait]
pub trait AdminPeerClient: Send + Sync {
    /// Time since the peer's server process booted.
    async fn uptime(&self) -> PeerOutcome<Duration>;

    async fn service(&self, command: ServiceCommand) -> PeerOutcome<()>;

    async fn set_credentials(&self, credentials: &Credentials) -> PeerOutcome<()>;

    async fn list_locks(&self, filter: &LockFilter) -> PeerOutcome<Vec<LockRecord>>;

    /// Force-releases one record the peer listed. `false` means the record
    /// no longer holds its lock there.
    async fn force_unlock(&self, record: &LockRecord) -> PeerOutcome<bool>;

    /// Takes a lock on the peer's lock table without waiting.
    async fn acquire_lock(&self, request: &LockRequest) -> PeerOutcome<bool>;

    async fn release_lock(&self, request: &LockRequest) -> PeerOutcome<bool>;

    /// Rebuilds the peer's storage engine from its own endpoints.
    async fn reinit_storage(&self) -> PeerOutcome<()>;

    /// Raw bytes of the peer's committed configuration document.
    async fn get_config(&self) -> PeerOutcome<Bytes>;

    async fn stage_config(&self, name: &str, payload: Bytes) -> PeerOutcome<()>;

    async fn commit_config(&self, name: &str) -> PeerOutcome<()>;
}

#[derive(Clone)]
pub struct Peer {
    pub address: String,
    pub is_local: bool,
    pub client: Arc<dyn AdminPeerClient>,
}

impl Peer {
    pub fn new(address: impl Into<String>, is_local: bool, client: Arc<dyn AdminPeerClient>) -> Self {
        Self {
            address: address.into(),
            is_local,
            client,
        }
    }
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("address", &self.address)
            .field("is_local", &self.is_local)
            .finish_non_exhaustive()
    }
}

/// Ordered, immutable set of cluster peers. Index order is the order results
/// are reported in.
#[derive(Debug, Clone)]
pub struct PeerRegistry {
    peers: Vec<Peer>,
}

impl PeerRegistry {
    pub fn new(peers: Vec<Peer>) -> Result<Self> {
        if peers.is_empty() {
            return Err(QuorioError::Config(
                "peer registry requires at least one peer".to_string(),
            ));
        }

        let local_count = peers.iter().filter(|peer| peer.is_local).count();
        if local_count > 1 {
            return Err(QuorioError::Config(format!(
                "peer registry has {} local peers, expected at most one",
                local_count
            )));
        }

        let mut seen = std::collections::HashSet::new();
        if let Some(duplicate) = peers.iter().find(|peer| !seen.insert(peer.address.as_str())) {
            return Err(QuorioError::Config(format!(
                "peer {} is listed more than once",
                duplicate.address
            )));
        }

        Ok(Self { peers })
    }

    pub fn peers(&self) -> &[Peer] {
        &self.peers
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Successes needed for a cluster-wide decision.
    pub fn quorum(&self) -> usize {
        write_quorum(self.peers.len())
    }

    pub fn local(&self) -> Option<&Peer> {
        self.peers.iter().find(|peer| peer.is_local)
    }

    pub fn remote_peers(&self) -> Vec<Peer> {
        self.peers
            .iter()
            .filter(|peer| !peer.is_local)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::testing::MockPeer;
    use super::*;

    #[test]
    fn test_registry_roles() {
        let registry = PeerRegistry::new(vec![
            MockPeer::healthy().into_peer("node-1:9000", true),
            MockPeer::healthy().into_peer("node-2:9000", false),
            MockPeer::healthy().into_peer("node-3:9000", false),
        ])
        .unwrap();

        assert_eq!(registry.len(), 3);
        assert_eq!(registry.quorum(), 2);
        assert_eq!(registry.local().unwrap().address, "node-1:9000");

        let remote: Vec<String> = registry
            .remote_peers()
            .into_iter()
            .map(|peer| peer.address)
            .collect();
        assert_eq!(remote, ["node-2:9000", "node-3:9000"]);
    }

    #[test]
    fn test_registry_rejects_bad_topology() {
        assert!(PeerRegistry::new(Vec::new()).is_err());
        assert!(
            PeerRegistry::new(vec![
                MockPeer::healthy().into_peer("node-1:9000", true),
                MockPeer::healthy().into_peer("node-2:9000", true),
            ])
            .is_err()
        );
        assert!(
            PeerRegistry::new(vec![
                MockPeer::healthy().into_peer("node-1:9000", true),
                MockPeer::healthy().into_peer("node-1:9000", false),
            ])
            .is_err()
        );
    }
}
