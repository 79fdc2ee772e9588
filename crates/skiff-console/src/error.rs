//! Error types for skiff-console.

use thiserror::Error;

/// Result type for skiff-console operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in skiff-console.
#[derive(Debug, Error)]
pub enum Error {
    /// No session is live; start one with `run` or `prewarm`.
    #[error("no active session")]
    NoSession,

    /// Error from the channel or worker layer.
    #[error(transparent)]
    Core(#[from] skiff_core::Error),
}
