use thiserror::Error;

/// SQLSTATE raised by the database when two transactions cannot be
/// serialized. The transaction is expected to succeed when retried.
pub const SERIALIZATION_FAILURE: &str = "40001";

/// Database-layer failure as seen by a wrapped write operation.
///
/// The variants mirror the shapes a driver stack typically produces:
/// a bare SQL failure, a driver error carrying a SQLSTATE, and a data
/// access wrapper that may hold the driver error as its root cause.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DbError {
    /// Generic database operation failure with no further detail.
    #[error("SQL error: {0}")]
    Sql(String),

    /// Driver error carrying a SQLSTATE code.
    #[error("Driver error [{sql_state}]: {message}")]
    Driver { sql_state: String, message: String },

    /// Data access failure, optionally wrapping the error that caused it.
    #[error("Data access error: {message}")]
    DataAccess {
        message: String,
        #[source]
        root_cause: Option<Box<DbError>>,
    },

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Lock error: {0}")]
    LockError(String),

    #[error("I/O error: {0}")]
    IoError(String),
}

impl DbError {
    /// Driver error for a serialization conflict (SQLSTATE 40001).
    pub fn serialization_failure(message: impl Into<String>) -> Self {
        Self::Driver {
            sql_state: SERIALIZATION_FAILURE.to_string(),
            message: message.into(),
        }
    }

    /// Wraps `cause` in a data access error.
    pub fn data_access(message: impl Into<String>, cause: DbError) -> Self {
        Self::DataAccess {
            message: message.into(),
            root_cause: Some(Box::new(cause)),
        }
    }

    /// SQLSTATE carried by this error itself, if any.
    pub fn sql_state(&self) -> Option<&str> {
        match self {
            Self::Driver { sql_state, .. } => Some(sql_state),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, DbError>;

impl<T> From<std::sync::PoisonError<T>> for DbError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

/// What a retry classifier needs to know about an operation error.
///
/// `root_cause` is a borrowed view of the wrapped error. Classifiers walk
/// it link by link, so implementations must not return `self`.
pub trait DatabaseFailure {
    /// Stable error code carried by this error (e.g. a SQLSTATE).
    fn error_code(&self) -> Option<&str> {
        None
    }

    /// `true` for the broad "database operation failed" category.
    fn is_generic_database_error(&self) -> bool {
        false
    }

    /// The error this one wraps, if any.
    fn root_cause(&self) -> Option<&dyn DatabaseFailure> {
        None
    }
}

impl DatabaseFailure for DbError {
    fn error_code(&self) -> Option<&str> {
        self.sql_state()
    }

    fn is_generic_database_error(&self) -> bool {
        matches!(self, Self::Sql(_))
    }

    fn root_cause(&self) -> Option<&dyn DatabaseFailure> {
        match self {
            Self::DataAccess {
                root_cause: Some(cause),
                ..
            } => Some(cause.as_ref()),
            _ => None,
        }
    }
}
