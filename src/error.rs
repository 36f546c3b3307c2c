//! Error types for document store operations.

use thiserror::Error;

/// Server codes reported for unique index violations.
const DUPLICATE_KEY_CODES: [i32; 3] = [11000, 11001, 12582];

/// One failed document of a bulk insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkWriteFailure {
    /// Position of the document in the submitted batch.
    pub index: usize,
    /// Error code from server.
    pub code: i32,
    /// Error message.
    pub message: String,
}

/// All errors that can occur during document store operations.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The connection could not be established or verified.
    #[error("connection error: {0}")]
    Connection(String),

    /// A per-operation session could not be acquired.
    #[error("session error: {0}")]
    Session(String),

    /// Write error.
    #[error("write error: {message}")]
    Write {
        /// Error code from server.
        code: Option<i32>,
        /// Error message.
        message: String,
    },

    /// Bulk write error.
    #[error("bulk write error: {} failed", .failures.len())]
    BulkWrite {
        /// Failed documents, in batch order.
        failures: Vec<BulkWriteFailure>,
    },

    /// Read or aggregate error.
    #[error("query error: {0}")]
    Query(String),

    /// A returned document does not fit the requested type.
    #[error("decode error: {0}")]
    Decode(String),

    /// Operation timeout.
    #[error("operation timed out")]
    Timeout,

    /// Invalid argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The caller's payload could not be converted to BSON.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Create a connection error.
    pub fn connection(msg: impl Into<String>) -> Self {
        StoreError::Connection(msg.into())
    }

    /// Create a session error.
    pub fn session(msg: impl Into<String>) -> Self {
        StoreError::Session(msg.into())
    }

    /// Create a write error.
    pub fn write(code: Option<i32>, message: impl Into<String>) -> Self {
        StoreError::Write {
            code,
            message: message.into(),
        }
    }

    /// Create a query error.
    pub fn query(msg: impl Into<String>) -> Self {
        StoreError::Query(msg.into())
    }

    /// Create a decode error.
    pub fn decode(msg: impl Into<String>) -> Self {
        StoreError::Decode(msg.into())
    }

    /// Create an invalid argument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        StoreError::InvalidArgument(msg.into())
    }

    /// Check if this is a connection error.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, StoreError::Connection(_))
    }

    /// Check if this is a timeout error.
    pub fn is_timeout(&self) -> bool {
        matches!(self, StoreError::Timeout)
    }

    /// Check if a write was rejected by a unique index.
    pub fn is_duplicate_key(&self) -> bool {
        match self {
            StoreError::Write { code: Some(code), .. } => DUPLICATE_KEY_CODES.contains(code),
            StoreError::BulkWrite { failures } => failures
                .iter()
                .any(|f| DUPLICATE_KEY_CODES.contains(&f.code)),
            _ => false,
        }
    }

    /// Whether the failure is likely to go away on its own.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::Connection(_) | StoreError::Session(_) | StoreError::Timeout
        )
    }

    /// Get the error code if available.
    ///
    /// For bulk writes this is the code of the first failure.
    pub fn code(&self) -> Option<i32> {
        match self {
            StoreError::Write { code, .. } => *code,
            StoreError::BulkWrite { failures } => failures.first().map(|f| f.code),
            _ => None,
        }
    }

    /// Get the error message.
    pub fn message(&self) -> String {
        self.to_string()
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<bson::ser::Error> for StoreError {
    fn from(err: bson::ser::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<bson::de::Error> for StoreError {
    fn from(err: bson::de::Error) -> Self {
        StoreError::Decode(err.to_string())
    }
}

/// Result type alias for document store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Error kind enumeration for pattern matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Connection error.
    Connection,
    /// Session acquisition error.
    Session,
    /// Write error.
    Write,
    /// Query error.
    Query,
    /// Decode error.
    Decode,
    /// Timeout error.
    Timeout,
    /// Caller-supplied input was rejected before reaching the server.
    Validation,
}

impl StoreError {
    /// Get the error kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::Connection(_) => ErrorKind::Connection,
            StoreError::Session(_) => ErrorKind::Session,
            StoreError::Write { .. } | StoreError::BulkWrite { .. } => ErrorKind::Write,
            StoreError::Query(_) => ErrorKind::Query,
            StoreError::Decode(_) => ErrorKind::Decode,
            StoreError::Timeout => ErrorKind::Timeout,
            StoreError::InvalidArgument(_) | StoreError::Serialization(_) => ErrorKind::Validation,
        }
    }
}
