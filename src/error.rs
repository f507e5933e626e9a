use std::io;
use thiserror::Error;

use crate::store::StoreError;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, CacheError>;

/// Errors surfaced by the reference cache.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Filesystem-level failure outside the store backend.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// The ordered key-value backend failed a read or a batch write.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    /// Persisted or in-transit bytes do not match the codec framing.
    /// Distinct from an absent record; never treated as empty.
    #[error("decode error: {0}")]
    Decode(String),
    /// An internal invariant was violated (a worker loop panicked or vanished).
    #[error("internal error: {0}")]
    Internal(&'static str),
}
