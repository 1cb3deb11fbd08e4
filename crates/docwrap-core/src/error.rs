//! Error types for docwrap.

use thiserror::Error;

/// Result type alias for facade and pool operations.
pub type DocwrapResult<T> = Result<T, DocwrapError>;

/// Errors reported by a store driver.
///
/// Drivers map their native failures onto these variants; the pool and
/// the facade decide what to do with a connection based on which one
/// comes back.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("connection lost")]
    Disconnected,

    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    #[error("operation failed: {0}")]
    Operation(String),
}

/// Errors surfaced to docwrap callers.
#[derive(Debug, Error)]
pub enum DocwrapError {
    #[error("unknown database: {0}")]
    UnknownDatabase(String),

    #[error("unable to connect to {database} after {attempts} attempt(s): {source}")]
    Connection {
        database: String,
        attempts: u32,
        #[source]
        source: DriverError,
    },

    #[error("{operation} on {database}.{collection} failed: {source}")]
    Store {
        database: String,
        collection: String,
        operation: &'static str,
        #[source]
        source: DriverError,
    },

    #[error(
        "move from {database}.{source_collection} to {database}.{destination_collection} \
         left the document in both collections: {source}"
    )]
    PartialFailure {
        database: String,
        source_collection: String,
        destination_collection: String,
        #[source]
        source: DriverError,
    },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl DocwrapError {
    /// Wrap a driver failure raised while running `operation`.
    pub fn store(
        database: &str,
        collection: &str,
        operation: &'static str,
        source: DriverError,
    ) -> Self {
        Self::Store {
            database: database.to_string(),
            collection: collection.to_string(),
            operation,
            source,
        }
    }

    /// The underlying driver error, if this error came from the store.
    pub fn driver_error(&self) -> Option<&DriverError> {
        match self {
            Self::Connection { source, .. }
            | Self::Store { source, .. }
            | Self::PartialFailure { source, .. } => Some(source),
            Self::UnknownDatabase(_) | Self::Config(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_message_names_target() {
        let err = DocwrapError::store(
            "local",
            "stuff",
            "insert",
            DriverError::DuplicateKey("_id".to_string()),
        );
        let msg = err.to_string();
        assert!(msg.contains("insert on local.stuff"));
        assert!(msg.contains("duplicate key"));
    }

    #[test]
    fn driver_error_accessor() {
        let err = DocwrapError::Connection {
            database: "local".to_string(),
            attempts: 3,
            source: DriverError::Auth("bad password".to_string()),
        };
        assert_eq!(
            err.driver_error(),
            Some(&DriverError::Auth("bad password".to_string()))
        );
        assert!(DocwrapError::UnknownDatabase("x".to_string())
            .driver_error()
            .is_none());
    }
}
