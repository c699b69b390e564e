//! Storage-engine capabilities consumed by the control plane.
//!
//! The engine itself is external; the control plane only needs heal, info and
//! lifecycle operations plus a way to rebuild an instance from raw disks.

pub mod handle;
pub mod mirror;

pub use handle::EngineHandle;
pub use mirror::{MirrorBootstrap, MirrorObjectLayer};

use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendKind {
    /// Single drive, no redundancy.
    #[serde(rename = "FS")]
    Fs,
    /// Multiple drives with redundancy and format descriptors.
    #[serde(rename = "Erasure")]
    Erasure,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendInfo {
    #[serde(rename = "type")]
    pub kind: BackendKind,
    pub online_disks: usize,
    pub offline_disks: usize,
    pub read_quorum: usize,
    pub write_quorum: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageInfo {
    /// Bytes occupied by object data on the reference drive.
    pub used: u64,
    pub backend: BackendInfo,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketInfo {
    pub name: String,
    pub created: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectInfo {
    pub bucket: String,
    pub name: String,
    pub size: u64,
    pub mod_time: DateTime<Utc>,
    pub etag: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListObjectsInfo {
    pub is_truncated: bool,
    pub next_marker: Option<String>,
    pub objects: Vec<ObjectInfo>,
    pub prefixes: Vec<String>,
}

/// Raw storage handle derived from the static endpoint topology.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disk {
    pub endpoint: PathBuf,
    pub online: bool,
}

#[async_trait]
pub trait ObjectLayer: Send + Sync {
    async fn storage_info(&self) -> Result<StorageInfo>;

    async fn get_bucket_info(&self, bucket: &str) -> Result<BucketInfo>;

    async fn get_object_info(&self, bucket: &str, object: &str) -> Result<ObjectInfo>;

    async fn heal_bucket(&self, bucket: &str) -> Result<()>;

    async fn heal_object(&self, bucket: &str, object: &str) -> Result<()>;

    async fn list_buckets_heal(&self) -> Result<Vec<BucketInfo>>;

    async fn list_objects_heal(
        &self,
        bucket: &str,
        prefix: &str,
        marker: &str,
        delimiter: &str,
        max_keys: usize,
    ) -> Result<ListObjectsInfo>;

    /// Releases the instance's resources. Later calls may fail.
    async fn shutdown(&self) -> Result<()>;
}

/// Builds engine instances from the node's static endpoints.
#[async_trait]
pub trait StorageBootstrap: Send + Sync {
    fn backend_kind(&self) -> BackendKind;

    /// Re-opens raw handles for every configured endpoint.
    async fn init_disks(&self) -> Result<Vec<Disk>>;

    /// Repairs or rewrites on-disk format descriptors.
    async fn heal_format(&self, disks: &[Disk]) -> Result<()>;

    /// Constructs a new engine bound to `disks`.
    async fn open(&self, disks: Vec<Disk>) -> Result<Arc<dyn ObjectLayer>>;
}
