//! Majority decisions over per-peer outcomes.
//!
//! - **Write quorum**: `N/2 + 1` successes (strict majority)
//! - Reaching exactly the required count is a success; ties are impossible
//!   because the threshold is strictly more than half.

use crate::{PeerError, PeerResult, QuorioError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuorumDecision {
    pub succeeded: bool,
    pub successes: usize,
    pub required: usize,
    /// First error encountered when quorum was not reached. Per-node detail
    /// stays in the original result slice.
    pub representative_error: Option<PeerError>,
}

impl QuorumDecision {
    /// Converts a failed decision into the distinct no-quorum error.
    pub fn into_result(self) -> crate::Result<()> {
        if self.succeeded {
            return Ok(());
        }

        Err(QuorioError::NoQuorum {
            required: self.required,
            succeeded: self.successes,
            cause: self
                .representative_error
                .unwrap_or_else(|| PeerError::Local("no peers responded".to_string())),
        })
    }
}

/// Strict majority of `peer_count`.
pub fn write_quorum(peer_count: usize) -> usize {
    peer_count / 2 + 1
}

/// Decides an outcome from an index-aligned error slice.
pub fn evaluate(errors: &[Option<&PeerError>], required: usize) -> QuorumDecision {
    let successes = errors.iter().filter(|err| err.is_none()).count();
    let succeeded = successes >= required;

    let representative_error = if succeeded {
        None
    } else {
        errors.iter().flatten().next().map(|err| (*err).clone())
    };

    QuorumDecision {
        succeeded,
        successes,
        required,
        representative_error,
    }
}

/// Convenience over [`evaluate`] for fan-out results.
pub fn evaluate_results<T>(results: &[PeerResult<T>], required: usize) -> QuorumDecision {
    let errors: Vec<Option<&PeerError>> = results.iter().map(|r| r.outcome.as_ref().err()).collect();
    evaluate(&errors, required)
}

/// Evaluates `results` against the strict majority of their own length.
pub fn evaluate_write_quorum<T>(results: &[PeerResult<T>]) -> QuorumDecision {
    evaluate_results(results, write_quorum(results.len()))
}
