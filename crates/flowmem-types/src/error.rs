//! The closed status-code set (spec §4.1, §7) and the crate-wide error type.

use std::fmt;

/// The closed set of status codes every fallible operation in the workspace
/// resolves to. Kept separate from [`Error`] so callers that only care about
/// "what kind of failure was this" can match on a small `Copy` enum instead
/// of downcasting a boxed error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StatusCode {
    Ok,
    WouldBlock,
    Timeout,
    Closed,
    Full,
    Empty,
    NotFound,
    InvalidArg,
    Exhausted,
    Uninitialized,
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Errors returned by flowmem operations. Every variant maps to exactly one
/// [`StatusCode`] via [`Error::status`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("argument violates a stated precondition: {0}")]
    InvalidArg(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("resource exhausted: {0}")]
    Exhausted(String),

    #[error("queue is full")]
    Full,

    #[error("queue is empty")]
    Empty,

    #[error("operation would block")]
    WouldBlock,

    #[error("deadline exceeded after {0:?}")]
    Timeout(std::time::Duration),

    #[error("queue or runtime is closed")]
    Closed,

    #[error("used before initialize()/bootstrap")]
    Uninitialized,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidArg(_) => StatusCode::InvalidArg,
            Self::NotFound(_) => StatusCode::NotFound,
            Self::Exhausted(_) => StatusCode::Exhausted,
            Self::Full => StatusCode::Full,
            Self::Empty => StatusCode::Empty,
            Self::WouldBlock => StatusCode::WouldBlock,
            Self::Timeout(_) => StatusCode::Timeout,
            Self::Closed => StatusCode::Closed,
            Self::Uninitialized => StatusCode::Uninitialized,
            Self::Io(_) => StatusCode::InvalidArg,
        }
    }

    #[must_use]
    pub fn invalid_arg(msg: impl Into<String>) -> Self {
        Self::InvalidArg(msg.into())
    }

    #[must_use]
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    #[must_use]
    pub fn exhausted(msg: impl Into<String>) -> Self {
        Self::Exhausted(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// The closed result set a `Block::work()` call resolves to (spec §4.8).
///
/// Transient queue states (`Full`/`Empty`/`WouldBlock`) observed *inside* a
/// `work()` call must be translated to `InsufficientInput`/`InsufficientOutput`
/// here, never surfaced as `Error` — only a genuine terminal failure is
/// `ERROR` (spec §7).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkResult {
    /// Made progress; the scheduler should call `work()` again immediately.
    Ok,
    /// At least one input port was empty.
    InsufficientInput,
    /// At least one output port was full.
    InsufficientOutput,
    /// Terminal: the block is done and should be retired.
    Done,
    /// Terminal failure: the block is retired and marked `Error`.
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_is_total() {
        let variants = [
            Error::invalid_arg("x"),
            Error::not_found("x"),
            Error::exhausted("x"),
            Error::Full,
            Error::Empty,
            Error::WouldBlock,
            Error::Timeout(std::time::Duration::from_millis(1)),
            Error::Closed,
            Error::Uninitialized,
        ];
        for e in variants {
            let _ = e.status();
        }
    }
}
