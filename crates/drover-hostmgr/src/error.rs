//! Error types for the host manager.

use thiserror::Error;

/// Host manager errors.
#[derive(Error, Debug)]
pub enum HostMgrError {
    /// Malformed request: unknown hostname, bad filter, negative quantity.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Claim id presented at launch does not match the host's claim.
    #[error("invalid claim for host {hostname}: {reason}")]
    InvalidClaim { hostname: String, reason: String },

    /// State-machine precondition violated.
    #[error("conflict on host {hostname}: {reason}")]
    Conflict { hostname: String, reason: String },

    /// Rate-limited operation rejected.
    #[error("rate limit exhausted for {0}")]
    ResourceExhausted(String),

    /// Master RPC failed; safe to retry.
    #[error("master unavailable: {0}")]
    Unavailable(String),

    /// No summary for the requested hostname.
    #[error("host {0} does not have any offers")]
    NotFound(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for host manager operations.
pub type Result<T> = std::result::Result<T, HostMgrError>;
