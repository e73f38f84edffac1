use thiserror::Error;

#[derive(Error, Debug)]
pub enum TargetWatchError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unauthorized")]
    Unauthorized,

    /// Network failure, timeout, throttling or 5xx from an upstream service.
    #[error("Transient error: {0}")]
    Transient(String),

    #[error("Generation error: {0}")]
    Generation(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Scan timed out: stalled")]
    Stalled,

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}
