//! Error kinds surfaced by lockbox operations

use lockbox_core::ConfigError;
use thiserror::Error;

use crate::totp::TotpError;

/// Lockbox-specific errors
#[derive(Error, Debug)]
pub enum LockboxError {
    #[error("invalid path: {0}")]
    BadPath(String),

    #[error("invalid credentials: {0}")]
    BadCredential(String),

    #[error("invalid field: {0}")]
    BadField(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("multiple entries match: {0}")]
    Conflict(String),

    #[error("operation not allowed in readonly mode")]
    ReadOnly,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("container error: {0}")]
    Codec(String),

    #[error("clipboard error: {0}")]
    Clipboard(String),

    #[error("cancelled")]
    Cancelled,

    #[error(transparent)]
    Totp(#[from] TotpError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LockboxError {
    /// Find the lockbox error behind an `anyhow` chain, if any
    pub fn find(err: &anyhow::Error) -> Option<&LockboxError> {
        err.chain().find_map(|cause| cause.downcast_ref::<LockboxError>())
    }
}
