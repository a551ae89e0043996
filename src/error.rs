//! Errors surfaced by the node/reading storage layer.
//!
//! Every storage operation returns one of these as a value; nothing is allowed
//! to panic past the storage boundary.

use core::fmt;
use std::error::Error as StdError;
use std::fmt::{Display, Formatter};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug)]
pub enum Error {
    /// No node (or reading) matches the requested ID.
    NotFound(String),
    /// The payload could not be coerced into anything usable.
    Validation(String),
    /// A node with the ID already exists, or more than one document matches it.
    Conflict(String),
    /// Underlying database or filesystem failure.
    Store(StoreFailure),
    /// The node's current reading was updated but appending to its log failed.
    /// The two views now disagree; retrying may duplicate a log entry.
    PartialWrite { node_id: String, cause: Box<Error> },
}

#[derive(Debug)]
pub enum StoreFailure {
    Database(diesel::result::Error),
    Connection(diesel::ConnectionError),
    Io(std::io::Error),
    Migration(String),
    /// A thread panicked while holding a store lock.
    Poisoned(String),
}

impl Error {
    /// `true` for errors caused by the request itself (4xx-equivalent).
    pub fn is_client_error(&self) -> bool {
        matches!(self, Error::NotFound(_) | Error::Validation(_) | Error::Conflict(_))
    }

    /// `false` when repeating the operation could record the same reading twice.
    pub fn is_retry_safe(&self) -> bool {
        !matches!(self, Error::PartialWrite { .. })
    }

    pub(crate) fn poisoned(what: impl Into<String>) -> Self {
        Error::Store(StoreFailure::Poisoned(what.into()))
    }

    pub(crate) fn migration(message: impl Into<String>) -> Self {
        Error::Store(StoreFailure::Migration(message.into()))
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Error::NotFound(what) => write!(f, "not found: {}", what),
            Error::Validation(message) => write!(f, "invalid input: {}", message),
            Error::Conflict(message) => write!(f, "conflict: {}", message),
            Error::Store(failure) => write!(f, "store error: {}", failure),
            Error::PartialWrite { node_id, cause } => write!(
                f,
                "partial write for node {}: current reading updated but history append failed ({})",
                node_id, cause
            ),
        }
    }
}

impl Display for StoreFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            StoreFailure::Database(e) => write!(f, "database: {}", e),
            StoreFailure::Connection(e) => write!(f, "connection: {}", e),
            StoreFailure::Io(e) => write!(f, "i/o: {}", e),
            StoreFailure::Migration(e) => write!(f, "migration: {}", e),
            StoreFailure::Poisoned(what) => write!(f, "lock poisoned: {}", what),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::Store(failure) => Some(failure),
            Error::PartialWrite { cause, .. } => Some(cause.as_ref()),
            _ => None,
        }
    }
}

impl StdError for StoreFailure {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            StoreFailure::Database(e) => Some(e),
            StoreFailure::Connection(e) => Some(e),
            StoreFailure::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<diesel::result::Error> for Error {
    fn from(value: diesel::result::Error) -> Self {
        Error::Store(StoreFailure::Database(value))
    }
}

impl From<diesel::ConnectionError> for Error {
    fn from(value: diesel::ConnectionError) -> Self {
        Error::Store(StoreFailure::Connection(value))
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Error::Store(StoreFailure::Io(value))
    }
}

impl From<serde_path_to_error::Error<serde_json::Error>> for Error {
    fn from(value: serde_path_to_error::Error<serde_json::Error>) -> Self {
        let path = value.path().to_string();
        if path == "." {
            Error::Validation(value.into_inner().to_string())
        } else {
            Error::Validation(format!("{}: {}", path, value.into_inner()))
        }
    }
}
