//! Status kinds produced by cluster checks.

use thiserror::Error;

pub type Result<T, E = CheckError> = std::result::Result<T, E>;

/// Terminal outcome of a check phase. Each kind maps to its own process
/// exit code so scripts can tell the failure classes apart.
#[derive(Debug, Error)]
pub enum CheckError {
    /// Filters matched nothing, or the cluster has no tablet servers.
    #[error("not found: {0}")]
    NotFound(String),
    /// No healthy tablet server could serve the request.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    /// Tablet servers were unreachable during the metadata fetch.
    #[error("network error: {0}")]
    NetworkError(String),
    /// The checksum scan phase exceeded its deadline.
    #[error("timed out: {0}")]
    TimedOut(String),
    /// Per-replica scan errors, without checksum mismatches.
    #[error("aborted: {0}")]
    Aborted(String),
    /// Replica checksums disagree, or table metadata failed verification.
    #[error("corruption: {0}")]
    Corruption(String),
    /// Failure from a master or tablet server call.
    #[error(transparent)]
    Remote(#[from] anyhow::Error),
}

impl CheckError {
    /// Process exit code for the CLI. Zero is reserved for success.
    pub fn exit_code(&self) -> u8 {
        match self {
            CheckError::NotFound(_) => 2,
            CheckError::ServiceUnavailable(_) => 3,
            CheckError::NetworkError(_) => 4,
            CheckError::TimedOut(_) => 5,
            CheckError::Aborted(_) => 6,
            CheckError::Corruption(_) => 7,
            CheckError::Remote(_) => 1,
        }
    }

    /// Severity rank when several check phases fail:
    /// timed-out > corruption > aborted > everything else.
    pub fn severity(&self) -> u8 {
        match self {
            CheckError::TimedOut(_) => 3,
            CheckError::Corruption(_) => 2,
            CheckError::Aborted(_) => 1,
            _ => 0,
        }
    }
}
