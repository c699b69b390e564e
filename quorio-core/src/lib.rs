//! Quorio Core - quorum-coordinated admin control plane for object storage clusters
//!
//! Coordinates cluster-wide changes across a static set of peers:
//! - stage-then-commit replacement of the configuration document
//! - format, bucket and object healing with a safe storage-engine swap
//! - distributed lock inventory and force-release
//! - majority uptime and status aggregation

pub mod auth;
pub mod config_store;
pub mod error;
pub mod locks;
pub mod names;
pub mod operations;
pub mod peer;
pub mod quorum;
pub mod service;
pub mod storage;

pub use auth::{
    AUTH_SCHEME, CONTENT_SHA256_HEADER, CredentialStore, Credentials, DATE_HEADER,
    OPERATION_HEADER, RequestAuth, SignedHeaders, compute_hash, sign_request, verify_request,
};
pub use config_store::{
    CONFIG_FILE, ConfigDocument, ConfigStore, is_staged_config_name, staged_config_name,
};
pub use error::{PeerError, QuorioError, Result};
pub use locks::{
    LocalNsLocker, LockFilter, LockRecord, LockRequest, NamespaceLocker, NsLockGuard,
};
pub use names::{RESERVED_BUCKET, check_bucket_and_object_names, check_bucket_name};
pub use operations::*;
pub use peer::{
    AdminPeerClient, LocalPeer, Peer, PeerOutcome, PeerRegistry, PeerResult, QuorumNsLocker,
    RemotePeer, invoke_all,
};
pub use quorum::{QuorumDecision, evaluate, evaluate_results, write_quorum};
pub use service::{ServiceCommand, ServiceSignals};
pub use storage::{
    BackendInfo, BackendKind, BucketInfo, Disk, EngineHandle, ListObjectsInfo, MirrorBootstrap,
    MirrorObjectLayer, ObjectInfo, ObjectLayer, StorageBootstrap, StorageInfo,
};

/// Version reported by status endpoints.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Commit identifier baked in at build time, if any.
pub const COMMIT_ID: &str = match option_env!("QUORIO_COMMIT_ID") {
    Some(id) => id,
    None => "DEVELOPMENT",
};
