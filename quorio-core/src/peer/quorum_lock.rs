//! Namespace lock held on a write quorum of peers.
//!
//! Each attempt asks every peer to hold the lock under one lock id without
//! waiting. A majority of grants wins; anything less is handed back and the
//! attempt is retried with exponential backoff until the timeout.

use super::PeerRegistry;
use crate::{
    LockRequest, NamespaceLocker, NsLockGuard, PeerError, QuorioError, Result, invoke_all,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

const INITIAL_BACKOFF: Duration = Duration::from_millis(10);
const MAX_BACKOFF: Duration = Duration::from_secs(1);

pub struct QuorumNsLocker {
    registry: Arc<PeerRegistry>,
    timeout: Duration,
}

impl QuorumNsLocker {
    pub fn new(registry: Arc<PeerRegistry>) -> Self {
        Self {
            registry,
            timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

async fn release_everywhere(registry: &PeerRegistry, request: &LockRequest) {
    let results = invoke_all(registry.peers(), |peer| peer.client.release_lock(request)).await;
    for result in results {
        if let Err(error) = result.outcome {
            tracing::warn!(
                "Failed to release lock {}/{} on {}: {}",
                request.bucket,
                request.object,
                result.address,
                error
            );
        }
    }
}

fn spawn_release(registry: Arc<PeerRegistry>, request: LockRequest) {
    match tokio::runtime::Handle::try_current() {
        Ok(runtime) => {
            runtime.spawn(async move { release_everywhere(&registry, &request).await });
        }
        Err(_) => tracing::warn!(
            "No runtime to release lock {}/{} ({}); peers keep it until force-unlocked",
            request.bucket,
            request.object,
            request.lock_id
        ),
    }
}

#[async_trait]
impl NamespaceLocker for QuorumNsLocker {
    async fn lock(&self, bucket: &str, object: &str, source: &str) -> Result<NsLockGuard> {
        let request = LockRequest::new(bucket, object, source);
        let required = self.registry.quorum();
        let deadline = Instant::now() + self.timeout;
        let mut backoff = INITIAL_BACKOFF;

        loop {
            let results =
                invoke_all(self.registry.peers(), |peer| peer.client.acquire_lock(&request)).await;
            let granted = results
                .iter()
                .filter(|result| matches!(result.outcome, Ok(true)))
                .count();

            if granted >= required {
                tracing::debug!(
                    "Acquired lock {}/{} ({}) on {}/{} peers",
                    bucket,
                    object,
                    request.lock_id,
                    granted,
                    results.len()
                );
                let registry = self.registry.clone();
                return Ok(NsLockGuard::new((), move || spawn_release(registry, request)));
            }

            release_everywhere(&self.registry, &request).await;

            if Instant::now() + backoff > deadline {
                let cause = results
                    .iter()
                    .find_map(|result| result.error().cloned())
                    .unwrap_or_else(|| {
                        PeerError::Local(format!("{}/{} is locked by another node", bucket, object))
                    });
                tracing::warn!(
                    "Gave up on lock {}/{} after {:?}: {} of {} grants",
                    bucket,
                    object,
                    self.timeout,
                    granted,
                    required
                );
                return Err(QuorioError::NoQuorum {
                    required,
                    succeeded: granted,
                    cause,
                });
            }

            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LockFilter;
    use crate::peer::testing::{MockPeer, peer_of};
    use chrono::Utc;

    fn registry(mocks: &[Arc<MockPeer>]) -> Arc<PeerRegistry> {
        let peers = mocks
            .iter()
            .enumerate()
            .map(|(i, mock)| peer_of(mock, &format!("node-{}:9000", i + 1), false))
            .collect();
        Arc::new(PeerRegistry::new(peers).unwrap())
    }

    fn held(mock: &MockPeer) -> usize {
        let all = LockFilter::new("photos", "", Duration::ZERO).unwrap();
        mock.locker.list(&all, Utc::now()).len()
    }

    async fn wait_until_released(mocks: &[Arc<MockPeer>]) {
        for _ in 0..100 {
            if mocks.iter().all(|mock| held(mock) == 0) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("lock was not released on every peer");
    }

    #[tokio::test]
    async fn test_second_locker_waits_for_the_first() {
        let mocks: Vec<_> = (0..3).map(|_| MockPeer::healthy().shared()).collect();
        let first = QuorumNsLocker::new(registry(&mocks));
        let second = Arc::new(QuorumNsLocker::new(registry(&mocks)));

        let guard = first.lock("photos", "a.jpg", "node-1").await.unwrap();
        assert!(mocks.iter().all(|mock| held(mock) == 1));

        let contender = {
            let second = second.clone();
            tokio::spawn(async move { second.lock("photos", "a.jpg", "node-2").await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!contender.is_finished());

        drop(guard);
        let guard = contender.await.unwrap().unwrap();
        drop(guard);
        wait_until_released(&mocks).await;
    }

    #[tokio::test]
    async fn test_minority_failure_still_grants() {
        let mocks = vec![
            MockPeer::healthy().shared(),
            MockPeer::healthy().shared(),
            MockPeer::failing(PeerError::Unreachable("connection refused".to_string())).shared(),
        ];
        let locker = QuorumNsLocker::new(registry(&mocks));

        let guard = locker.lock("photos", "a.jpg", "node-1").await.unwrap();
        assert_eq!(held(&mocks[0]), 1);
        assert_eq!(held(&mocks[1]), 1);
        drop(guard);
        wait_until_released(&mocks[..2]).await;
    }

    #[tokio::test]
    async fn test_gives_up_without_majority() {
        let refused = PeerError::Unreachable("connection refused".to_string());
        let mocks = vec![
            MockPeer::healthy().shared(),
            MockPeer::failing(refused.clone()).shared(),
            MockPeer::failing(refused).shared(),
        ];
        let locker =
            QuorumNsLocker::new(registry(&mocks)).with_timeout(Duration::from_millis(100));

        match locker.lock("photos", "a.jpg", "node-1").await {
            Err(QuorioError::NoQuorum {
                required,
                succeeded,
                cause,
            }) => {
                assert_eq!(required, 2);
                assert_eq!(succeeded, 1);
                assert!(matches!(cause, PeerError::Unreachable(_)));
            }
            other => panic!("expected no quorum, got {:?}", other),
        }
        // The lone grant was handed back.
        assert_eq!(held(&mocks[0]), 0);
    }
}
