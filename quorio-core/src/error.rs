use thiserror::Error;

/// Failure observed while talking to a single peer.
///
/// Peer failures are data: they are collected per slot by the invoker and
/// turned into a decision by the quorum evaluator, so the type is cheap to
/// clone and carries only what an operator needs to identify the node issue.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PeerError {
    /// The transport gave up waiting for the peer.
    #[error("timeout: {0}")]
    Timeout(String),
    /// The peer could not be reached at all.
    #[error("unreachable: {0}")]
    Unreachable(String),
    /// The peer answered with a failure status.
    #[error("remote error ({status}): {message}")]
    Remote { status: u16, message: String },
    /// The operation failed on this node.
    #[error("{0}")]
    Local(String),
}

impl From<QuorioError> for PeerError {
    fn from(error: QuorioError) -> Self {
        match error {
            QuorioError::Peer(peer) => peer,
            other => PeerError::Local(other.to_string()),
        }
    }
}

#[derive(Error, Debug)]
pub enum QuorioError {
    #[error("Invalid bucket name: {0:?}")]
    InvalidBucketName(String),

    #[error("Invalid object name: {0:?}")]
    InvalidObjectName(String),

    #[error("Invalid duration: {0:?}")]
    InvalidDuration(String),

    #[error("Invalid max-keys: {0:?}")]
    InvalidMaxKeys(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Request signature does not match")]
    SignatureMismatch,

    #[error("Request time too skewed")]
    RequestTimeTooSkewed,

    #[error("Bucket not found: {0}")]
    BucketNotFound(String),

    #[error("Object not found: {bucket}/{object}")]
    ObjectNotFound { bucket: String, object: String },

    #[error("Credentials are pinned by the environment")]
    CredentialsPinned,

    #[error("Method not allowed: {0}")]
    MethodNotAllowed(String),

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    #[error("Server not initialized")]
    ServerNotInitialized,

    #[error("No quorum: required {required}, succeeded {succeeded} ({cause})")]
    NoQuorum {
        required: usize,
        succeeded: usize,
        cause: PeerError,
    },

    #[error("Peer error: {0}")]
    Peer(PeerError),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl QuorioError {
    /// Validation and precondition failures are rejected before any peer is
    /// contacted or any state changes.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            QuorioError::InvalidBucketName(_)
                | QuorioError::InvalidObjectName(_)
                | QuorioError::InvalidDuration(_)
                | QuorioError::InvalidMaxKeys(_)
                | QuorioError::InvalidArgument(_)
                | QuorioError::InvalidCredentials(_)
                | QuorioError::MalformedRequest(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, QuorioError>;
