use thiserror::Error;

/// Main error type for webseek operations
#[derive(Error, Debug)]
pub enum WebseekError {
    #[error("Invalid URL '{url}': {reason}")]
    BadUrl { url: String, reason: String },

    #[error("Frontier is empty")]
    FrontierEmpty,

    #[error("Document not found: {0}")]
    DocumentNotFound(i64),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Fetch failed for {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for webseek operations
pub type Result<T> = std::result::Result<T, WebseekError>;

impl WebseekError {
    /// Check if this error indicates a transient failure that could be retried
    pub fn is_retriable(&self) -> bool {
        matches!(self, WebseekError::Store(_) | WebseekError::Fetch { .. })
    }

    /// Errors that mean "skip this item and keep going" rather than abort
    pub fn is_skippable(&self) -> bool {
        matches!(
            self,
            WebseekError::BadUrl { .. } | WebseekError::DocumentNotFound(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = WebseekError::DocumentNotFound(42);
        assert_eq!(err.to_string(), "Document not found: 42");

        let err = WebseekError::FrontierEmpty;
        assert_eq!(err.to_string(), "Frontier is empty");
    }

    #[test]
    fn test_retriable_errors() {
        assert!(WebseekError::Store("timeout".to_string()).is_retriable());
        assert!(!WebseekError::FrontierEmpty.is_retriable());
        assert!(!WebseekError::DocumentNotFound(1).is_retriable());
    }

    #[test]
    fn test_skippable_errors() {
        let bad = WebseekError::BadUrl {
            url: "::".to_string(),
            reason: "empty host".to_string(),
        };
        assert!(bad.is_skippable());
        assert!(!WebseekError::Internal("boom".to_string()).is_skippable());
    }
}
