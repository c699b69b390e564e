//! Format, bucket and object healing.
//!
//! Every task is validated first; dry-run stops there. Format heal rebuilds
//! the engine from freshly healed drives and swaps it in, so a failure before
//! the swap leaves the previous engine serving.

use crate::names::{
    check_bucket_and_object_names, check_bucket_name, is_valid_object_prefix, parse_max_keys,
    validate_list_objects_args,
};
use crate::{
    BackendKind, BucketInfo, EngineHandle, ListObjectsInfo, PeerRegistry, QuorioError, Result,
    StorageBootstrap, invoke_all,
};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealTask {
    Format,
    Bucket { bucket: String },
    Object { bucket: String, object: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealRequest {
    pub task: HealTask,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum HealOutcome {
    /// Validation passed; nothing was changed.
    Validated,
    Healed,
}

/// Raw listing parameters as they arrive on the admin surface.
#[derive(Debug, Clone, Default)]
pub struct ListObjectsHealRequest {
    pub bucket: String,
    pub prefix: String,
    pub marker: String,
    pub delimiter: String,
    pub max_keys: Option<String>,
}

#[derive(Clone)]
pub struct HealOrchestrator {
    engine: Arc<EngineHandle>,
    bootstrap: Arc<dyn StorageBootstrap>,
    registry: Arc<PeerRegistry>,
}

impl HealTask {
    pub fn name(&self) -> &'static str {
        match self {
            HealTask::Format => "format",
            HealTask::Bucket { .. } => "bucket",
            HealTask::Object { .. } => "object",
        }
    }

    /// Checks names and preconditions without changing anything.
    pub async fn validate(&self, orchestrator: &HealOrchestrator) -> Result<()> {
        match self {
            HealTask::Format => {
                if orchestrator.bootstrap.backend_kind() != BackendKind::Erasure {
                    return Err(QuorioError::NotImplemented(
                        "format heal requires a multi-drive erasure deployment".to_string(),
                    ));
                }
                orchestrator.engine.current().await?;
                Ok(())
            }
            HealTask::Bucket { bucket } => {
                check_bucket_name(bucket)?;
                orchestrator
                    .engine
                    .current()
                    .await?
                    .get_bucket_info(bucket)
                    .await?;
                Ok(())
            }
            HealTask::Object { bucket, object } => {
                check_bucket_and_object_names(bucket, object)?;
                orchestrator
                    .engine
                    .current()
                    .await?
                    .get_object_info(bucket, object)
                    .await?;
                Ok(())
            }
        }
    }

    pub async fn apply(&self, orchestrator: &HealOrchestrator) -> Result<()> {
        match self {
            HealTask::Format => orchestrator.heal_format().await,
            HealTask::Bucket { bucket } => {
                orchestrator.engine.current().await?.heal_bucket(bucket).await
            }
            HealTask::Object { bucket, object } => {
                orchestrator
                    .engine
                    .current()
                    .await?
                    .heal_object(bucket, object)
                    .await
            }
        }
    }
}

impl HealOrchestrator {
    pub fn new(
        engine: Arc<EngineHandle>,
        bootstrap: Arc<dyn StorageBootstrap>,
        registry: Arc<PeerRegistry>,
    ) -> Self {
        Self {
            engine,
            bootstrap,
            registry,
        }
    }

    pub async fn run(&self, request: HealRequest) -> Result<HealOutcome> {
        let HealRequest { task, dry_run } = request;

        task.validate(self).await?;
        if dry_run {
            tracing::info!("Dry-run {} heal validated", task.name());
            return Ok(HealOutcome::Validated);
        }

        task.apply(self).await?;
        tracing::info!("Completed {} heal", task.name());
        Ok(HealOutcome::Healed)
    }

    async fn heal_format(&self) -> Result<()> {
        let disks = self.bootstrap.init_disks().await?;
        self.bootstrap.heal_format(&disks).await?;
        let engine = self.bootstrap.open(disks).await?;

        // Authoritative from here on.
        self.engine.replace_and_retire(engine).await;

        let remote = self.registry.remote_peers();
        let results = invoke_all(&remote, |peer| peer.client.reinit_storage()).await;
        for result in results {
            if let Err(error) = result.outcome {
                tracing::warn!(
                    "Peer {} failed to reinitialize storage after format heal: {}",
                    result.address,
                    error
                );
            }
        }
        Ok(())
    }

    pub async fn list_buckets(&self) -> Result<Vec<BucketInfo>> {
        self.engine.current().await?.list_buckets_heal().await
    }

    pub async fn list_objects(&self, request: ListObjectsHealRequest) -> Result<ListObjectsInfo> {
        let ListObjectsHealRequest {
            bucket,
            prefix,
            marker,
            delimiter,
            max_keys,
        } = request;

        check_bucket_name(&bucket)?;
        if !is_valid_object_prefix(&prefix) {
            return Err(QuorioError::InvalidObjectName(prefix));
        }
        let max_keys = parse_max_keys(max_keys.as_deref())?;
        validate_list_objects_args(&prefix, &marker, &delimiter)?;

        self.engine
            .current()
            .await?
            .list_objects_heal(&bucket, &prefix, &marker, &delimiter, max_keys)
            .await
    }
}
