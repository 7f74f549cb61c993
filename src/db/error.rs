use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("Database not configured")]
    NotConfigured,

    #[cfg(any(
        feature = "database-sqlite",
        feature = "database-mysql",
        feature = "database-postgres"
    ))]
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Failed to decode column '{column}': {message}")]
    Decode { column: String, message: String },
}

pub type DbResult<T> = Result<T, DbError>;
