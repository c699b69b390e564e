use crate::{LockFilter, LockRecord, PeerError, PeerRegistry, QuorioError, Result, invoke_all};
use std::collections::HashMap;
use std::sync::Arc;

/// Cluster-wide view of held namespace locks.
///
/// Clearing lists first and asks each peer to force-release exactly the
/// records it listed, so a lock taken after the snapshot survives.
#[derive(Clone)]
pub struct LockInventoryService {
    registry: Arc<PeerRegistry>,
}

impl LockInventoryService {
    pub fn new(registry: Arc<PeerRegistry>) -> Self {
        Self { registry }
    }

    /// Concatenates every peer's matching locks in peer order. Any peer
    /// failure fails the listing: a partial inventory would under-report.
    pub async fn list(&self, filter: &LockFilter) -> Result<Vec<LockRecord>> {
        Ok(self.list_by_peer(filter).await?.concat())
    }

    /// Force-releases every record [`Self::list`] returns, on the peer that
    /// reported it, and reports them.
    pub async fn clear(&self, filter: &LockFilter) -> Result<Vec<LockRecord>> {
        let peers = self.registry.peers();
        let listed = self.list_by_peer(filter).await?;
        let by_peer: HashMap<&str, &[LockRecord]> = peers
            .iter()
            .map(|peer| peer.address.as_str())
            .zip(listed.iter().map(Vec::as_slice))
            .collect();

        let results = invoke_all(peers, |peer| {
            let records = by_peer
                .get(peer.address.as_str())
                .copied()
                .unwrap_or_default();
            async move {
                let mut released = 0;
                for record in records {
                    if peer.client.force_unlock(record).await? {
                        released += 1;
                    }
                }
                Ok::<usize, PeerError>(released)
            }
        })
        .await;

        let mut released = 0;
        for result in results {
            match result.outcome {
                Ok(count) => released += count,
                Err(error) => {
                    tracing::warn!(
                        "Failed to clear locks on {}: {}",
                        result.address,
                        error
                    );
                    return Err(QuorioError::Peer(error));
                }
            }
        }

        let records = listed.concat();
        tracing::info!(
            "Cleared {} lock(s) on bucket {} prefix {:?} ({} released since listing)",
            records.len(),
            filter.bucket,
            filter.prefix,
            records.len() - released
        );
        Ok(records)
    }

    /// Matching locks per peer, aligned with the registry.
    async fn list_by_peer(&self, filter: &LockFilter) -> Result<Vec<Vec<LockRecord>>> {
        let results = invoke_all(self.registry.peers(), |peer| peer.client.list_locks(filter)).await;

        let mut listed = Vec::with_capacity(results.len());
        for result in results {
            match result.outcome {
                Ok(locks) => listed.push(locks),
                Err(error) => {
                    tracing::warn!(
                        "Failed to fetch lock information from {}: {}",
                        result.address,
                        error
                    );
                    return Err(QuorioError::Peer(error));
                }
            }
        }
        Ok(listed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::testing::{MockPeer, peer_of};
    use crate::{LocalNsLocker, LocalPeer, NamespaceLocker, Peer};
    use chrono::Utc;
    use std::time::Duration;

    fn record(object: &str, node: &str) -> LockRecord {
        LockRecord {
            bucket: "photos".to_string(),
            object: object.to_string(),
            lock_id: ulid::Ulid::new().to_string(),
            held_since: Utc::now() - chrono::Duration::seconds(600),
            source: "test".to_string(),
            node: node.to_string(),
        }
    }

    fn filter(prefix: &str, min_age: Duration) -> LockFilter {
        LockFilter::new("photos", prefix, min_age).unwrap()
    }

    #[tokio::test]
    async fn test_list_concatenates_in_peer_order() {
        let first = MockPeer::healthy()
            .with_locks(vec![record("a.jpg", "node-1")])
            .shared();
        let second = MockPeer::healthy()
            .with_locks(vec![record("b.jpg", "node-2"), record("c.jpg", "node-2")])
            .shared();
        let registry = PeerRegistry::new(vec![
            peer_of(&first, "node-1:9000", false),
            peer_of(&second, "node-2:9000", false),
        ])
        .unwrap();
        let service = LockInventoryService::new(Arc::new(registry));

        let wanted = filter("", Duration::from_secs(60));
        let records = service.list(&wanted).await.unwrap();
        let objects: Vec<&str> = records.iter().map(|r| r.object.as_str()).collect();
        assert_eq!(objects, ["a.jpg", "b.jpg", "c.jpg"]);
        assert_eq!(first.calls.lock().unwrap().lock_filters, [wanted.clone()]);
        assert_eq!(second.calls.lock().unwrap().lock_filters, [wanted]);
    }

    #[tokio::test]
    async fn test_list_fails_when_a_peer_fails() {
        let registry = PeerRegistry::new(vec![
            MockPeer::healthy().into_peer("node-1:9000", true),
            MockPeer::failing(PeerError::Unreachable("refused".to_string()))
                .into_peer("node-2:9000", false),
        ])
        .unwrap();
        let service = LockInventoryService::new(Arc::new(registry));

        assert!(matches!(
            service.list(&filter("", Duration::ZERO)).await,
            Err(QuorioError::Peer(PeerError::Unreachable(_)))
        ));
    }

    #[tokio::test]
    async fn test_clear_releases_on_the_holding_peer() {
        let first = MockPeer::healthy().shared();
        let second = MockPeer::healthy().shared();
        let registry = PeerRegistry::new(vec![
            peer_of(&first, "node-1:9000", true),
            peer_of(&second, "node-2:9000", false),
        ])
        .unwrap();
        let service = LockInventoryService::new(Arc::new(registry));

        let _stuck = second.locker.lock("photos", "stuck.jpg", "stuck").await.unwrap();
        let _other = first.locker.lock("videos", "clip.mp4", "other").await.unwrap();

        let wanted = filter("", Duration::ZERO);
        let cleared = service.clear(&wanted).await.unwrap();
        assert_eq!(cleared.len(), 1);
        assert_eq!(cleared[0].object, "stuck.jpg");

        assert!(second.locker.list(&wanted, Utc::now()).is_empty());
        assert_eq!(second.calls.lock().unwrap().force_unlocked, cleared);
        assert!(first.calls.lock().unwrap().force_unlocked.is_empty());
        let videos = LockFilter::new("videos", "", Duration::ZERO).unwrap();
        assert_eq!(first.locker.list(&videos, Utc::now()).len(), 1);
    }

    #[tokio::test]
    async fn test_clear_fails_when_a_release_fails() {
        let refused = PeerError::Remote {
            status: 500,
            message: "lock table unavailable".to_string(),
        };
        let registry = PeerRegistry::new(vec![
            MockPeer::healthy().into_peer("node-1:9000", true),
            MockPeer::healthy()
                .with_locks(vec![record("a.jpg", "node-2:9000")])
                .with_lock_error(refused)
                .into_peer("node-2:9000", false),
        ])
        .unwrap();
        let service = LockInventoryService::new(Arc::new(registry));

        assert!(matches!(
            service.clear(&filter("", Duration::ZERO)).await,
            Err(QuorioError::Peer(PeerError::Remote { status: 500, .. }))
        ));
    }

    #[tokio::test]
    async fn test_clear_releases_exactly_the_listed_locks() {
        let temp_dir = tempfile::tempdir().unwrap();
        let locker = Arc::new(LocalNsLocker::new("node-1:9000"));
        let bootstrap = Arc::new(
            crate::MirrorBootstrap::new(vec![temp_dir.path().join("d0")]).unwrap(),
        );
        let engine = Arc::new(crate::EngineHandle::new(bootstrap.initialize().await.unwrap()));
        let store = Arc::new(crate::ConfigStore::new(temp_dir.path().join("config")).unwrap());
        let credentials = Arc::new(crate::CredentialStore::new(
            crate::Credentials::new("quorioadmin", "quorio-secret-key"),
            false,
        ));
        let local = LocalPeer::new(
            "node-1:9000",
            std::time::Instant::now(),
            store,
            credentials,
            locker.clone(),
            engine,
            bootstrap,
            crate::ServiceSignals::new(),
        );
        let registry =
            PeerRegistry::new(vec![Peer::new("node-1:9000", true, Arc::new(local))]).unwrap();
        let service = LockInventoryService::new(Arc::new(registry));

        let _a = locker.lock("photos", "2024/a.jpg", "stuck").await.unwrap();
        let _b = locker.lock("photos", "2025/b.jpg", "stuck").await.unwrap();
        let _c = locker.lock("videos", "2024/c.mp4", "stuck").await.unwrap();

        let wanted = filter("2024/", Duration::ZERO);
        let listed = service.list(&wanted).await.unwrap();
        let cleared = service.clear(&wanted).await.unwrap();
        assert_eq!(listed, cleared);
        assert_eq!(cleared.len(), 1);
        assert_eq!(cleared[0].object, "2024/a.jpg");

        let remaining = locker.list(&filter("", Duration::ZERO), Utc::now());
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].object, "2025/b.jpg");

        // Clearing again finds nothing and leaves the other bucket alone.
        assert!(service.clear(&wanted).await.unwrap().is_empty());
        let videos = LockFilter::new("videos", "", Duration::ZERO).unwrap();
        assert_eq!(locker.list(&videos, Utc::now()).len(), 1);
    }
}
