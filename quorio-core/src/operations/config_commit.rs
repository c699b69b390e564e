//! Cluster-wide replacement of the configuration document.
//!
//! Stage on every peer, check write quorum, take the configuration lock,
//! commit on every peer, check write quorum again. A failed commit quorum is
//! reported with per-node detail and never rolled back.

use super::service_control::spawn_service_broadcast;
use crate::names::RESERVED_BUCKET;
use crate::quorum::evaluate_results;
use crate::{
    CONFIG_FILE, ConfigDocument, NamespaceLocker, PeerError, PeerRegistry, PeerResult,
    QuorioError, Result, ServiceCommand, compute_hash, invoke_all, staged_config_name,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

const LOCK_SOURCE: &str = "config-commit";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailedPhase {
    Stage,
    Commit,
}

/// Per-peer line of a set-config report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSummary {
    pub name: String,
    pub err_set: bool,
    pub err_msg: String,
}

impl NodeSummary {
    fn from_result<T>(result: &PeerResult<T>) -> Self {
        match result.error() {
            Some(error) => Self {
                name: result.address.clone(),
                err_set: true,
                err_msg: error.to_string(),
            },
            None => Self {
                name: result.address.clone(),
                err_set: false,
                err_msg: String::new(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetConfigResult {
    /// One entry per peer, in registry order.
    pub node_results: Vec<NodeSummary>,
    pub status: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_phase: Option<FailedPhase>,
}

#[derive(Clone)]
pub struct ConfigCommitProtocol {
    registry: Arc<PeerRegistry>,
    locker: Arc<dyn NamespaceLocker>,
}

impl ConfigCommitProtocol {
    pub fn new(registry: Arc<PeerRegistry>, locker: Arc<dyn NamespaceLocker>) -> Self {
        Self { registry, locker }
    }

    /// Runs the stage/commit protocol for `payload`.
    ///
    /// Validation failures return `Err` before any peer is contacted. Quorum
    /// failures return `Ok` with `status == false` and the per-node report.
    pub async fn run(&self, payload: Bytes) -> Result<SetConfigResult> {
        ConfigDocument::parse(&payload)?;

        let peers = self.registry.peers();
        let required = self.registry.quorum();
        let name = staged_config_name();

        let staged = invoke_all(peers, |peer| peer.client.stage_config(&name, payload.clone())).await;

        let decision = evaluate_results(&staged, required);
        if !decision.succeeded {
            tracing::warn!(
                "Staging {} reached {}/{} peers (need {}), not committing",
                name,
                decision.successes,
                peers.len(),
                required
            );
            return Ok(SetConfigResult {
                node_results: staged.iter().map(NodeSummary::from_result).collect(),
                status: false,
                failed_phase: Some(FailedPhase::Stage),
            });
        }

        let guard = self
            .locker
            .lock(RESERVED_BUCKET, CONFIG_FILE, LOCK_SOURCE)
            .await?;
        tracing::debug!("Holding the configuration lock to commit {}", name);

        let stage_errors: HashMap<&str, PeerError> = staged
            .iter()
            .filter_map(|result| Some((result.address.as_str(), result.error()?.clone())))
            .collect();
        let committed = invoke_all(peers, |peer| {
            let stage_error = stage_errors.get(peer.address.as_str()).cloned();
            let name = name.as_str();
            async move {
                match stage_error {
                    // Nothing was staged there; keep the staging failure.
                    Some(error) => Err(error),
                    None => peer.client.commit_config(name).await,
                }
            }
        })
        .await;
        drop(guard);

        let node_results = committed.iter().map(NodeSummary::from_result).collect();
        let decision = evaluate_results(&committed, required);
        if !decision.succeeded {
            tracing::error!(
                "Commit of {} reached {}/{} peers (need {}); configuration may have diverged",
                name,
                decision.successes,
                peers.len(),
                required
            );
            return Ok(SetConfigResult {
                node_results,
                status: false,
                failed_phase: Some(FailedPhase::Commit),
            });
        }

        tracing::info!(
            "Committed configuration {} on {}/{} peers",
            name,
            decision.successes,
            peers.len()
        );
        spawn_service_broadcast(self.registry.clone(), ServiceCommand::Restart);

        Ok(SetConfigResult {
            node_results,
            status: true,
            failed_phase: None,
        })
    }

    /// Majority read of the committed configuration document.
    pub async fn read(&self) -> Result<Bytes> {
        let peers = self.registry.peers();
        let required = self.registry.quorum();
        let results = invoke_all(peers, |peer| peer.client.get_config()).await;

        let mut groups: HashMap<String, (usize, Bytes)> = HashMap::new();
        for result in &results {
            if let Ok(document) = &result.outcome {
                groups
                    .entry(compute_hash(document))
                    .or_insert_with(|| (0, document.clone()))
                    .0 += 1;
            }
        }

        let best = groups.into_values().max_by_key(|(count, _)| *count);
        match best {
            Some((count, document)) if count >= required => Ok(document),
            best => {
                let agreeing = best.map(|(count, _)| count).unwrap_or(0);
                let cause = results
                    .iter()
                    .find_map(|result| result.error().cloned())
                    .unwrap_or_else(|| {
                        PeerError::Local("configuration documents diverge".to_string())
                    });
                Err(QuorioError::NoQuorum {
                    required,
                    succeeded: agreeing,
                    cause,
                })
            }
        }
    }
}
