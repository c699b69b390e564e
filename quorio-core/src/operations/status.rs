use crate::{
    COMMIT_ID, EngineHandle, PeerError, PeerRegistry, QuorioError, Result, StorageInfo, VERSION,
    invoke_all,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Bytes moved through this node's HTTP surface since boot.
#[derive(Debug, Default)]
pub struct ConnStats {
    transferred: AtomicU64,
    received: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkStats {
    pub transferred: u64,
    pub received: u64,
}

impl ConnStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_received(&self, bytes: u64) {
        self.received.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_transferred(&self, bytes: u64) {
        self.transferred.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> NetworkStats {
        NetworkStats {
            transferred: self.transferred.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerVersion {
    pub version: String,
    #[serde(rename = "commitID")]
    pub commit_id: String,
}

impl ServerVersion {
    fn current() -> Self {
        Self {
            version: VERSION.to_string(),
            commit_id: COMMIT_ID.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    pub server_version: ServerVersion,
    /// Cluster uptime in nanoseconds.
    pub uptime: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerProperties {
    pub uptime: u64,
    pub version: String,
    #[serde(rename = "commitID")]
    pub commit_id: String,
    pub region: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub storage: StorageInfo,
    pub network: NetworkStats,
    pub server: ServerProperties,
}

#[derive(Clone)]
pub struct StatusAggregator {
    registry: Arc<PeerRegistry>,
    engine: Arc<EngineHandle>,
    conn_stats: Arc<ConnStats>,
    region: String,
}

impl StatusAggregator {
    pub fn new(
        registry: Arc<PeerRegistry>,
        engine: Arc<EngineHandle>,
        conn_stats: Arc<ConnStats>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            engine,
            conn_stats,
            region: region.into(),
        }
    }

    /// The uptime at which a majority of peers had been up: successful
    /// uptimes sorted ascending, the `quorum`-th one.
    pub async fn cluster_uptime(&self) -> Result<Duration> {
        let required = self.registry.quorum();
        let results = invoke_all(self.registry.peers(), |peer| peer.client.uptime()).await;

        let mut uptimes: Vec<Duration> = results
            .iter()
            .filter_map(|result| result.outcome.as_ref().ok().copied())
            .collect();
        if uptimes.len() < required {
            let cause = results
                .iter()
                .find_map(|result| result.error().cloned())
                .unwrap_or_else(|| PeerError::Local("no peers responded".to_string()));
            return Err(QuorioError::NoQuorum {
                required,
                succeeded: uptimes.len(),
                cause,
            });
        }

        uptimes.sort_unstable();
        Ok(uptimes[required - 1])
    }

    pub async fn service_status(&self) -> Result<ServiceStatus> {
        let uptime = self.cluster_uptime().await?;
        Ok(ServiceStatus {
            server_version: ServerVersion::current(),
            uptime: duration_nanos(uptime),
        })
    }

    pub async fn server_info(&self) -> Result<ServerInfo> {
        let uptime = self.cluster_uptime().await?;
        let storage = self.engine.current().await?.storage_info().await?;
        let version = ServerVersion::current();

        Ok(ServerInfo {
            storage,
            network: self.conn_stats.snapshot(),
            server: ServerProperties {
                uptime: duration_nanos(uptime),
                version: version.version,
                commit_id: version.commit_id,
                region: self.region.clone(),
            },
        })
    }
}

fn duration_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::testing::MockPeer;

    fn aggregator(uptimes: &[Option<u64>], engine: EngineHandle) -> StatusAggregator {
        let peers = uptimes
            .iter()
            .enumerate()
            .map(|(i, uptime)| {
                let mock = match uptime {
                    Some(secs) => MockPeer::healthy().with_uptime(Duration::from_secs(*secs)),
                    None => MockPeer::healthy()
                        .with_uptime_error(PeerError::Timeout(format!("node-{}", i + 1))),
                };
                mock.into_peer(&format!("node-{}:9000", i + 1), i == 0)
            })
            .collect();
        StatusAggregator::new(
            Arc::new(PeerRegistry::new(peers).unwrap()),
            Arc::new(engine),
            Arc::new(ConnStats::new()),
            "us-east-1",
        )
    }

    #[tokio::test]
    async fn test_uptime_is_quorum_th_smallest() {
        let status = aggregator(
            &[Some(300), Some(100), None, Some(200), Some(50)],
            EngineHandle::uninitialized(),
        );
        // Successes sorted: 50, 100, 200, 300; quorum of 5 is 3.
        assert_eq!(status.cluster_uptime().await.unwrap(), Duration::from_secs(200));

        let reply = status.service_status().await.unwrap();
        assert_eq!(reply.uptime, Duration::from_secs(200).as_nanos() as u64);
        assert_eq!(reply.server_version.version, VERSION);
    }

    #[tokio::test]
    async fn test_uptime_without_quorum_fails() {
        let status = aggregator(&[Some(10), None, None], EngineHandle::uninitialized());
        match status.cluster_uptime().await {
            Err(QuorioError::NoQuorum {
                required,
                succeeded,
                cause,
            }) => {
                assert_eq!(required, 2);
                assert_eq!(succeeded, 1);
                assert_eq!(cause, PeerError::Timeout("node-2".to_string()));
            }
            other => panic!("expected no quorum, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_server_info_composes_parts() {
        let temp_dir = tempfile::tempdir().unwrap();
        let bootstrap =
            crate::MirrorBootstrap::new(vec![temp_dir.path().join("d0"), temp_dir.path().join("d1")])
                .unwrap();
        let engine = EngineHandle::new(bootstrap.initialize().await.unwrap());
        let status = aggregator(&[Some(5)], engine);
        status.conn_stats.add_received(128);
        status.conn_stats.add_transferred(512);

        let info = status.server_info().await.unwrap();
        assert_eq!(info.network, NetworkStats { transferred: 512, received: 128 });
        assert_eq!(info.server.region, "us-east-1");
        assert_eq!(info.storage.backend.online_disks, 2);

        let json = serde_json::to_value(&info).unwrap();
        assert!(json["server"]["commitID"].is_string());
        assert_eq!(json["storage"]["backend"]["type"], "Erasure");
    }

    #[tokio::test]
    async fn test_server_info_requires_engine() {
        let status = aggregator(&[Some(5)], EngineHandle::uninitialized());
        assert!(matches!(
            status.server_info().await,
            Err(QuorioError::ServerNotInitialized)
        ));
    }
}
