use thiserror::Error;

#[derive(Debug, Error)]
pub enum AiError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    #[error("API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("Parse error: {0}")]
    Parse(String),
}

impl AiError {
    /// Rate limiting and provider overload are worth retrying later; everything
    /// else is a hard failure for the current request.
    pub fn is_transient(&self) -> bool {
        match self {
            AiError::Timeout | AiError::Network(_) => true,
            AiError::Api { status, .. } => matches!(status, 429 | 500..=599),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for AiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            AiError::Timeout
        } else {
            AiError::Network(e.to_string())
        }
    }
}

impl From<serde_json::Error> for AiError {
    fn from(e: serde_json::Error) -> Self {
        AiError::Parse(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overload_and_throttle_are_transient() {
        assert!(AiError::Api { status: 429, body: String::new() }.is_transient());
        assert!(AiError::Api { status: 529, body: String::new() }.is_transient());
        assert!(AiError::Timeout.is_transient());
    }

    #[test]
    fn client_errors_are_not_transient() {
        assert!(!AiError::Api { status: 400, body: String::new() }.is_transient());
        assert!(!AiError::Parse("bad".into()).is_transient());
        assert!(!AiError::Config("no key".into()).is_transient());
    }
}
