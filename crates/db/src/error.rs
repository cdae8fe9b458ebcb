use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Call not found: {0}")]
    CallNotFound(Uuid),

    #[error("Unique constraint violated: {0}")]
    Conflict(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt row for call {id}: {reason}")]
    CorruptRow { id: String, reason: String },
}

impl DbError {
    /// Classify an sqlx error, surfacing unique-index violations as conflicts.
    pub(crate) fn from_write(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                DbError::Conflict(db_err.message().to_string())
            }
            _ => DbError::Sqlx(err),
        }
    }
}
