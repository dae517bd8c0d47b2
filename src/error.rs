use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Bad argument: {0}")]
    BadArgument(String),

    #[error("Unexpected: {0}")]
    Unexpected(String),

    #[error("Canceled")]
    Cancel,

    #[error("Lock timeout")]
    LockTimeout,

    #[error("Deadlock detected")]
    Deadlock,

    #[error("Session is busy")]
    SessionBusy,

    #[error("Session does not exist: {0}")]
    SessionNotExist(u64),

    #[error("Connection does not exist: {0}")]
    ConnectionNotExist(u64),

    #[error("Connection ran out")]
    ConnectionRanOut,

    #[error("Database not found: {0}")]
    DatabaseNotFound(String),

    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Database is not available: {0}")]
    Unavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Invalid open mode for operation: {0}")]
    IllegalMode(String),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DbError {
    /// True for errors a background path may swallow after a retry or skip.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DbError::LockTimeout)
    }

    /// True for lifecycle races the merge daemon logs at info and drops.
    pub fn is_vanished_object(&self) -> bool {
        matches!(
            self,
            DbError::DatabaseNotFound(_) | DbError::TableNotFound(_) | DbError::FileNotFound(_)
        )
    }

    /// Errors that mark the owning database unavailable until an
    /// administrator intervenes.
    pub fn is_corrupting(&self) -> bool {
        matches!(self, DbError::Unexpected(_) | DbError::Storage(_))
    }
}

pub type Result<T> = std::result::Result<T, DbError>;

impl From<bincode::error::EncodeError> for DbError {
    fn from(e: bincode::error::EncodeError) -> Self {
        DbError::Serialization(e.to_string())
    }
}

impl From<bincode::error::DecodeError> for DbError {
    fn from(e: bincode::error::DecodeError) -> Self {
        DbError::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for DbError {
    fn from(e: serde_json::Error) -> Self {
        DbError::Serialization(e.to_string())
    }
}
