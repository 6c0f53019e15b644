//! Error types for ibis

use std::io;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to open {path}: {source}")]
    OpenFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("corrupt input in {file}: {reason}")]
    Corruption { file: String, reason: String },

    #[error("query error: {0}")]
    Query(String),

    #[error("invalid query id '{0}'")]
    UnknownQueryId(char),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Truncated or malformed record inside a mapped file.
    pub fn corruption(file: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Corruption {
            file: file.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
