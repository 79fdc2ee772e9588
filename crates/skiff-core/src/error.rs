//! Error types for skiff-core.

use thiserror::Error;

/// Result type for skiff-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in skiff-core.
#[derive(Debug, Error)]
pub enum Error {
    /// Input line does not fit in the channel payload region.
    #[error("input line too long ({len} > {capacity} bytes)")]
    LineTooLong { len: usize, capacity: usize },

    /// A pending input line has not been consumed yet.
    #[error("input channel busy: previous line not yet consumed")]
    ChannelBusy,

    /// The channel was closed by the other side.
    #[error("input channel closed")]
    ChannelClosed,

    /// The interpreter failed to load.
    #[error("interpreter failed to load: {0}")]
    InterpreterLoad(String),

    /// The worker thread is no longer receiving requests.
    #[error("worker is gone")]
    WorkerGone,

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
