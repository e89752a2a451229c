use std::fmt;

/// Closed taxonomy every [`LimitsError`] maps onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidRequest,
    NotFound,
    Database,
    Internal,
    External,
    Timeout,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::NotFound => "not_found",
            Self::Database => "database",
            Self::Internal => "internal",
            Self::External => "external",
            Self::Timeout => "timeout",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The error type returned by every limits operation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LimitsError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),

    /// The database aborted a serializable transaction (SQLSTATE 40001).
    #[error("Serialization failure: {0}")]
    SerializationFailure(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("External error: {0}")]
    External(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl LimitsError {
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    pub fn serialization_failure(msg: impl Into<String>) -> Self {
        Self::SerializationFailure(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn external(msg: impl Into<String>) -> Self {
        Self::External(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Database(_) | Self::SerializationFailure(_) => ErrorKind::Database,
            Self::Internal(_) => ErrorKind::Internal,
            Self::External(_) => ErrorKind::External,
            Self::Cancelled => ErrorKind::Timeout,
        }
    }

    /// Whether the failed transaction may succeed if attempted again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::SerializationFailure(_))
    }
}

/// Result type alias for limits operations
pub type Result<T> = std::result::Result<T, LimitsError>;

impl From<serde_json::Error> for LimitsError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_syntax() || err.is_eof() {
            LimitsError::InvalidRequest(format!("JSON error: {}", err))
        } else {
            LimitsError::Internal(format!("JSON serialization error: {}", err))
        }
    }
}

#[cfg(feature = "database")]
const SERIALIZATION_FAILURE_CODE: &str = "40001";

#[cfg(feature = "database")]
impl From<sea_orm::DbErr> for LimitsError {
    fn from(err: sea_orm::DbErr) -> Self {
        use sea_orm::{DbErr, RuntimeErr};

        let code = match &err {
            DbErr::Exec(RuntimeErr::SqlxError(e))
            | DbErr::Query(RuntimeErr::SqlxError(e))
            | DbErr::Conn(RuntimeErr::SqlxError(e)) => e
                .as_database_error()
                .and_then(|db| db.code())
                .map(|code| code.into_owned()),
            _ => None,
        };

        if code.as_deref() == Some(SERIALIZATION_FAILURE_CODE) {
            LimitsError::SerializationFailure(err.to_string())
        } else {
            LimitsError::Database(err.to_string())
        }
    }
}
