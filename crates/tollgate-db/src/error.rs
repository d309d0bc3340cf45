//! Database errors

use thiserror::Error;

/// Database errors
#[derive(Error, Debug)]
pub enum DbError {
    /// SQLx error
    #[error("database error: {0}")]
    Sqlx(sqlx::Error),

    /// Record not found
    #[error("record not found")]
    NotFound,

    /// Duplicate key violation
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    /// Foreign key violation
    #[error("foreign key violation: {0}")]
    ForeignKeyViolation(String),

    /// CHECK constraint violation
    #[error("check constraint violation: {0}")]
    CheckViolation(String),

    /// Pool exhausted or connection unreachable
    #[error("database unavailable: {0}")]
    Unavailable(String),

    /// Migration error
    #[error("migration error: {0}")]
    Migration(String),
}

impl DbError {
    /// Check if the error is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }

    /// Check if the error is a duplicate key error
    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, Self::DuplicateKey(_))
    }

    /// Check if the error means the database could not be reached
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Result type alias for database operations
pub type DbResult<T> = Result<T, DbError>;

// Map SQLx errors onto the specific variants callers branch on.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Self::NotFound,
            sqlx::Error::PoolTimedOut => Self::Unavailable("connection pool exhausted".into()),
            sqlx::Error::PoolClosed => Self::Unavailable("connection pool closed".into()),
            sqlx::Error::Io(io) => Self::Unavailable(io.to_string()),
            sqlx::Error::Database(db_err) => {
                // PostgreSQL error codes
                if let Some(code) = db_err.code() {
                    match code.as_ref() {
                        "23505" => {
                            // unique_violation
                            return Self::DuplicateKey(db_err.message().to_string());
                        }
                        "23503" => {
                            // foreign_key_violation
                            return Self::ForeignKeyViolation(db_err.message().to_string());
                        }
                        "23514" => {
                            // check_violation
                            return Self::CheckViolation(db_err.message().to_string());
                        }
                        _ => {}
                    }
                }
                Self::Sqlx(err)
            }
            _ => Self::Sqlx(err),
        }
    }
}
