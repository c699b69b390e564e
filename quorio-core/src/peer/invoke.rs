use super::Peer;
use crate::PeerError;
use futures_util::future::join_all;
use std::future::Future;

pub type PeerOutcome<T> = std::result::Result<T, PeerError>;

/// Outcome of one call against the peer at `peer_index`.
#[derive(Debug, Clone)]
pub struct PeerResult<T> {
    pub peer_index: usize,
    pub address: String,
    pub outcome: PeerOutcome<T>,
}

impl<T> PeerResult<T> {
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn error(&self) -> Option<&PeerError> {
        self.outcome.as_ref().err()
    }
}

/// Runs `operation` against every peer concurrently.
///
/// The returned slots are aligned with `peers` regardless of completion
/// order; a failing peer only fills its own slot.
pub async fn invoke_all<'a, T, F, Fut>(peers: &'a [Peer], operation: F) -> Vec<PeerResult<T>>
where
    F: Fn(&'a Peer) -> Fut,
    Fut: Future<Output = PeerOutcome<T>>,
{
    let calls = peers.iter().enumerate().map(|(peer_index, peer)| {
        let call = operation(peer);
        async move {
            let outcome = call.await;
            if let Err(error) = &outcome {
                tracing::debug!("Peer {} ({}) failed: {}", peer_index, peer.address, error);
            }
            PeerResult {
                peer_index,
                address: peer.address.clone(),
                outcome,
            }
        }
    });

    join_all(calls).await
}
