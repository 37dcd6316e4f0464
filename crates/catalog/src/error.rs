//! Catalogue Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction.

use derive_more::{Display, Error};

/// A catalogue error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for catalogue operations.
pub type Result<T> = std::result::Result<T, Error>;

/// `SQLITE_FULL`: insertion failed because the database is full.
const SQLITE_FULL: &str = "13";

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("database error")]
    Database,
    #[display("database migration error")]
    Migration,
    /// The disk holding the database is full. Further writes will fail too.
    #[display("database is full")]
    StorageFull,
    /// A row violates a uniqueness or foreign key constraint.
    #[display("constraint violation")]
    Constraint,
    /// Serialization/deserialization error of a stored column.
    #[display("invalid catalogue data: {_0}")]
    InvalidData(#[error(not(source))] &'static str),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        false
    }

    /// Classify a database error.
    pub(crate) fn from_sqlx(err: &sqlx::Error) -> Self {
        let Some(db_err) = err.as_database_error() else {
            return ErrorKind::Database;
        };
        if db_err.code().as_deref() == Some(SQLITE_FULL) {
            return ErrorKind::StorageFull;
        }
        match db_err.kind() {
            sqlx::error::ErrorKind::UniqueViolation | sqlx::error::ErrorKind::ForeignKeyViolation => {
                ErrorKind::Constraint
            },
            _ => ErrorKind::Database,
        }
    }
}

/// Raise database errors with their [`ErrorKind`] classification, keeping the
/// original error as the child frame.
pub(crate) trait DbResultExt<T> {
    fn or_db(self) -> Result<T>;
}
impl<T> DbResultExt<T> for std::result::Result<T, sqlx::Error> {
    #[track_caller]
    fn or_db(self) -> Result<T> {
        match self {
            Ok(value) => Ok(value),
            Err(err) => {
                let kind = ErrorKind::from_sqlx(&err);
                Err(exn::Exn::new(err).raise(kind))
            },
        }
    }
}
