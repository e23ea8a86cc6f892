//! Storage-layer error type.
//!
//! Repository functions return [`StoreError`] rather than raw `sqlx::Error`
//! so that callers in `nkudo-core` can match on a small, stable set of
//! outcomes instead of reaching into database driver internals.

/// Error raised by a repository function in this crate.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested row does not exist (or is outside the caller's tenant).
    #[error("not found: {0}")]
    NotFound(String),

    /// A uniqueness or check constraint was violated.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Any other database failure.
    #[error("storage error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Self::NotFound("row not found".to_owned()),
            sqlx::Error::Database(db_err) => {
                // PostgreSQL unique_violation / check_violation
                match db_err.code().as_deref() {
                    Some("23505") => Self::Conflict(format!("unique constraint violated: {db_err}")),
                    Some("23514") => Self::Conflict(format!("check constraint violated: {db_err}")),
                    _ => Self::Internal(format!("database error: {db_err}")),
                }
            }
            _ => Self::Internal(format!("database error: {err}")),
        }
    }
}
