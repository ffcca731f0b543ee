//! A single error enum shared by every fallible operation in this crate.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Bad CLI combination, invalid score parameters, unknown output format.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Cannot open query, output, or index file.
    #[error("cannot open {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// BWT length != annotation length, truncated file, bad header magic/version.
    #[error("index inconsistency: {0}")]
    IndexInconsistent(String),

    /// The caller-supplied working-memory arena overflowed even at its
    /// largest permitted size.
    #[error("working memory exhausted: needed at least {needed} bytes, arena capped at {cap}")]
    WorkingMemoryExhausted { needed: usize, cap: usize },

    /// Malformed `QueryInput` record or a reset connection in server mode.
    #[error("server protocol error: {0}")]
    Protocol(String),

    /// Invalid E-value (<= 0) or inconsistent score configuration.
    #[error("invalid statistics configuration: {0}")]
    Statistics(String),
}

impl Error {
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Error {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}

/// A recoverable signal distinct from [`Error`]: the caller's working-memory
/// arena was too small for this traversal and should be grown and retried.
/// Not an [`Error`] variant because the normal response is "retry", not
/// "abort".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaOverflow {
    pub needed_at_least: usize,
}
