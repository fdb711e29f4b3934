use thiserror::Error;

/// Common error types for the sable node
#[derive(Error, Debug)]
pub enum SableError {
    /// Database related errors
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Network related errors
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Database specific errors
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database corruption detected: {0}")]
    Corruption(String),

    #[error("Database operation failed: {0}")]
    OperationFailed(String),
}

/// Network specific errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("Peer disconnected: {0}")]
    Disconnected(String),

    #[error("Peer send timed out: {0}")]
    Timeout(String),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, SableError>;

impl From<serde_json::Error> for SableError {
    fn from(err: serde_json::Error) -> Self {
        SableError::Serialization(err.to_string())
    }
}

impl From<bincode::Error> for SableError {
    fn from(err: bincode::Error) -> Self {
        SableError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for SableError {
    fn from(err: anyhow::Error) -> Self {
        SableError::Database(DatabaseError::OperationFailed(format!("{:#}", err)))
    }
}

/// Error context helper
pub trait ErrorContext<T> {
    fn with_context(self, context: &str) -> Result<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: Into<SableError>,
{
    fn with_context(self, context: &str) -> Result<T> {
        self.map_err(|e| {
            let err = e.into();
            match err {
                SableError::Internal(msg) => SableError::Internal(format!("{}: {}", context, msg)),
                SableError::Database(db_err) => SableError::Database(DatabaseError::OperationFailed(
                    format!("{}: {}", context, db_err),
                )),
                _ => SableError::Internal(format!("{}: {}", context, err)),
            }
        })
    }
}
