//! Error types for streamcore
//!
//! Defines the result codes carried across the public API. Every variant
//! corresponds to one failure kind a caller needs to distinguish;
//! `message`/tuple fields hold optional free-text context.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("invalid port: {0}")]
    InvalidPort(String),

    #[error("invalid buffer id: {0}")]
    InvalidBufferId(String),

    #[error("no format negotiated")]
    NoFormat,

    #[error("no buffers allocated")]
    NoBuffers,

    #[error("no common format: {0}")]
    NoCommonFormat(String),

    #[error("incompatible buffers: {0}")]
    IncompatibleBuffers(String),

    #[error("invoke queue full")]
    QueueFull,

    #[error("invoke payload too large: {0} bytes")]
    PayloadTooLarge(usize),

    #[error("operation cancelled")]
    Cancelled,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("operation not implemented")]
    NotImplemented,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type that uses [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Outcome of an operation that may legitimately complete later.
///
/// Mirrors `invoke`'s "async-pending" result: most public operations
/// either resolve immediately or hand back a sequence id the caller can
/// match against a later [`crate::work_queue::WorkQueue`] completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Completed synchronously.
    Ok,
    /// Completed synchronously with an async sequence id that still
    /// produces a [`WorkQueue`](crate::work_queue::WorkQueue) completion.
    Async(u32),
}
