//! Error taxonomy shared by every store layer.
//!
//! Not-found is always its own variant so callers can branch on it without
//! string matching, even after context has been layered on top.

use thiserror::Error;

/// Result alias used throughout the store crates.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors returned by base stores, table views, and the table store.
#[derive(Debug, Error)]
pub enum Error {
    /// The key is absent.
    #[error("key not found")]
    NotFound,

    /// No live table carries this name.
    #[error("table not found: {0}")]
    TableNotFound(String),

    /// Creating another table would exceed the configured maximum.
    #[error("table limit exceeded (max {0} tables)")]
    TableLimitExceeded(u32),

    /// The persisted schema version differs from the compiled-in one.
    #[error("incompatible schema version: code is at version {code}, data on disk is at version {disk}")]
    IncompatibleSchema {
        /// Version this build writes.
        code: u64,
        /// Version found in the metadata table.
        disk: u64,
    },

    /// Persisted state violates an invariant (malformed entry, count mismatch).
    #[error("corruption: {0}")]
    Corruption(String),

    /// The caller passed arguments the store cannot accept.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The store has been shut down or destroyed.
    #[error("store is shut down")]
    Closed,

    /// An underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The write-ahead log rejected a read or write.
    #[error("wal error: {0}")]
    Wal(#[from] wal::WalError),

    /// Another error with a description of what was being attempted.
    #[error("{context}: {source}")]
    Context {
        /// What the caller was doing.
        context: String,
        /// The underlying failure.
        source: Box<Error>,
    },
}

impl Error {
    /// Wraps `self` with a description of the failed operation.
    pub fn context(self, context: impl Into<String>) -> Error {
        Error::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Returns the innermost error, skipping any [`Error::Context`] layers.
    pub fn root(&self) -> &Error {
        match self {
            Error::Context { source, .. } => source.root(),
            other => other,
        }
    }

    /// True when the root cause is a missing key.
    pub fn is_not_found(&self) -> bool {
        matches!(self.root(), Error::NotFound)
    }

    /// True when the root cause is a missing table.
    pub fn is_table_not_found(&self) -> bool {
        matches!(self.root(), Error::TableNotFound(_))
    }
}

/// Adds context to the error of a [`Result`].
pub trait ResultExt<T> {
    /// Wraps the error, if any, with `context`.
    fn context<C: Into<String>>(self, context: C) -> Result<T>;

    /// Wraps the error, if any, with a lazily built context.
    fn with_context<C: Into<String>, F: FnOnce() -> C>(self, f: F) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context<C: Into<String>>(self, context: C) -> Result<T> {
        self.map_err(|e| e.into().context(context))
    }

    fn with_context<C: Into<String>, F: FnOnce() -> C>(self, f: F) -> Result<T> {
        self.map_err(|e| e.into().context(f()))
    }
}
