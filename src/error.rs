//! Errors reported by the slice accessor.
//!
//! Every variant carries the path of the source and enough of the request to correct it and try again.
//! Nothing is retried automatically.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

//-----------------------------------------------------------------------------

/// Result type for accessor operations.
pub type Result<T> = std::result::Result<T, AccessError>;

/// Errors from opening a source or fetching a slice from it.
#[derive(Debug, Error)]
pub enum AccessError {
    /// The source is missing, unreadable, or not a valid store of the expected kind.
    #[error("Cannot open {}: {message}", path.display())]
    Connection { path: PathBuf, message: String },

    /// The database engine rejected the query.
    #[error("Query failed on {}: {message} (query: {query})", path.display())]
    Query { path: PathBuf, query: String, message: String },

    /// The interval file has no usable index.
    #[error("Missing or stale index {} for {}", index.display(), path.display())]
    IndexMissing { path: PathBuf, index: PathBuf },

    /// The requested group or dataset does not exist.
    #[error("No such {what} {name} in {}", path.display())]
    Layout { path: PathBuf, what: &'static str, name: String },

    /// The requested range falls outside the declared extent.
    #[error("Invalid range {requested} for {name} in {} (extent {extent})", path.display())]
    Range { path: PathBuf, name: String, requested: String, extent: String },

    /// The locator or selector does not match the kind of the source.
    #[error("Invalid request for {}: {message}", path.display())]
    InvalidRequest { path: PathBuf, message: String },

    /// I/O failure while reading an open source.
    #[error("I/O error on {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
}

impl AccessError {
    pub(crate) fn connection<P: AsRef<Path>, M: fmt::Display>(path: P, message: M) -> Self {
        AccessError::Connection { path: path.as_ref().to_path_buf(), message: message.to_string() }
    }

    pub(crate) fn query<P: AsRef<Path>, M: fmt::Display>(path: P, query: &str, message: M) -> Self {
        AccessError::Query {
            path: path.as_ref().to_path_buf(),
            query: query.to_string(),
            message: message.to_string(),
        }
    }

    pub(crate) fn layout<P: AsRef<Path>>(path: P, what: &'static str, name: &str) -> Self {
        AccessError::Layout { path: path.as_ref().to_path_buf(), what, name: name.to_string() }
    }

    pub(crate) fn invalid_request<P: AsRef<Path>, M: fmt::Display>(path: P, message: M) -> Self {
        AccessError::InvalidRequest { path: path.as_ref().to_path_buf(), message: message.to_string() }
    }

    pub(crate) fn io<P: AsRef<Path>>(path: P, source: io::Error) -> Self {
        AccessError::Io { path: path.as_ref().to_path_buf(), source }
    }

    /// Returns the path of the source the error refers to.
    pub fn path(&self) -> &Path {
        match self {
            AccessError::Connection { path, .. } => path,
            AccessError::Query { path, .. } => path,
            AccessError::IndexMissing { path, .. } => path,
            AccessError::Layout { path, .. } => path,
            AccessError::Range { path, .. } => path,
            AccessError::InvalidRequest { path, .. } => path,
            AccessError::Io { path, .. } => path,
        }
    }
}

//-----------------------------------------------------------------------------


//-----------------------------------------------------------------------------
