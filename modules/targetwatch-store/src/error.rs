use targetwatch_common::TargetWatchError;

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("Malformed stored value: {0}")]
    Decode(#[from] serde_json::Error),
}

impl From<StoreError> for TargetWatchError {
    fn from(e: StoreError) -> Self {
        TargetWatchError::Database(e.to_string())
    }
}
