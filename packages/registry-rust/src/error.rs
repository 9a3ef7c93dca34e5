//! Error types for the operation registry.
//!
//! Ordinary "not found" and "wrong state" outcomes are not errors: the manager
//! reports them through `bool` and `Option` returns. [`RegistryError`] covers
//! configuration mistakes and environment failures; [`LookupError`] is the
//! typed view a protocol layer maps onto its own error responses.

use optrack_core::{OperationStatus, TokenError};

/// Hard failures from the registry.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("token generation failed: {0}")]
    TokenGeneration(#[from] TokenError),
    #[error("token generator produced a token that is already in use")]
    DuplicateToken,
    #[error("keep-alive of {requested}s exceeds the {max}s cap")]
    InvalidKeepAlive { requested: u64, max: u64 },
    #[error("invalid registry configuration: {0}")]
    InvalidConfig(String),
    #[error("reaper requires a running tokio runtime")]
    NoRuntime,
    #[error("reaper is not running")]
    ReaperStopped,
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Why a token could not be served to a poller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LookupError {
    #[error("operation not found")]
    NotFound,
    #[error("operation has expired")]
    Expired,
    #[error("operation was cancelled")]
    Canceled,
    #[error("operation failed: {error}")]
    Failed { error: String },
    #[error("operation is not complete (status: {status})")]
    NotReady { status: OperationStatus },
}
