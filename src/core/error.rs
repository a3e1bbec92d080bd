use thiserror::Error;

/// Errors raised by a single SQL handle or the replica router.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DbError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Table '{0}' not found")]
    TableNotFound(String),

    #[error("Column '{0}' not found in table '{1}'")]
    ColumnNotFound(String, String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Lock error: {0}")]
    LockError(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Deadline exceeded")]
    Timeout,
}

impl DbError {
    /// Caller-driven aborts stop the replica fallback chain.
    pub fn is_abort(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Timeout)
    }
}

pub type Result<T> = std::result::Result<T, DbError>;

impl<T> From<std::sync::PoisonError<T>> for DbError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                Self::ConstraintViolation(db_err.message().to_string())
            }
            sqlx::Error::Io(e) => Self::Connection(e.to_string()),
            sqlx::Error::Tls(e) => Self::Connection(e.to_string()),
            sqlx::Error::PoolTimedOut => Self::Connection("pool timed out".into()),
            sqlx::Error::PoolClosed => Self::Connection("pool closed".into()),
            sqlx::Error::Configuration(e) => Self::Connection(e.to_string()),
            other => Self::Query(other.to_string()),
        }
    }
}

/// Errors returned by the document store and the resource services.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("{kind} \"{key}\" not found")]
    NotFound { kind: String, key: String },

    #[error("{kind} \"{key}\" already exists")]
    AlreadyExists { kind: String, key: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,
}

impl StoreError {
    pub fn not_found(kind: &str, key: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.to_string(),
            key: key.into(),
        }
    }

    pub fn already_exists(kind: &str, key: impl Into<String>) -> Self {
        Self::AlreadyExists {
            kind: kind.to_string(),
            key: key.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }
}

impl From<DbError> for StoreError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Connection(msg) => Self::Unavailable(msg),
            DbError::Cancelled => Self::Cancelled,
            DbError::Timeout => Self::DeadlineExceeded,
            DbError::TypeMismatch(msg) | DbError::InvalidIdentifier(msg) => {
                Self::InvalidArgument(msg)
            }
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("document serialization: {}", err))
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
