//! Error types for sitekb.

use thiserror::Error;

/// Result type alias using sitekb's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for sitekb operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Embedding generation failed
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Page fetch or crawl bookkeeping failed
    #[error("Crawl error: {0}")]
    Crawl(String),

    /// HTML to Markdown conversion failed
    #[error("Conversion error: {0}")]
    Conversion(String),

    /// Task queue error
    #[error("Task error: {0}")]
    Task(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input. Tasks failing with this are never retried.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error is a validation failure rather than a transient one.
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::InvalidInput(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Request(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_not_found() {
        let err = Error::NotFound("source 42".to_string());
        assert_eq!(err.to_string(), "Not found: source 42");
    }

    #[test]
    fn test_error_display_embedding() {
        let err = Error::Embedding("failed to generate".to_string());
        assert_eq!(err.to_string(), "Embedding error: failed to generate");
    }

    #[test]
    fn test_error_display_crawl() {
        let err = Error::Crawl("https://example.com: HTTP 503".to_string());
        assert_eq!(
            err.to_string(),
            "Crawl error: https://example.com: HTTP 503"
        );
    }

    #[test]
    fn test_error_display_conversion() {
        let err = Error::Conversion("bad html".to_string());
        assert_eq!(err.to_string(), "Conversion error: bad html");
    }

    #[test]
    fn test_error_display_task() {
        let err = Error::Task("no building version".to_string());
        assert_eq!(err.to_string(), "Task error: no building version");
    }

    #[test]
    fn test_error_display_config() {
        let err = Error::Config("missing API key".to_string());
        assert_eq!(err.to_string(), "Configuration error: missing API key");
    }

    #[test]
    fn test_error_display_invalid_input() {
        let err = Error::InvalidInput("unparseable url".to_string());
        assert_eq!(err.to_string(), "Invalid input: unparseable url");
    }

    #[test]
    fn test_error_display_internal() {
        let err = Error::Internal("unexpected state".to_string());
        assert_eq!(err.to_string(), "Internal error: unexpected state");
    }

    #[test]
    fn test_is_validation() {
        assert!(Error::InvalidInput("x".into()).is_validation());
        assert!(!Error::Crawl("x".into()).is_validation());
        assert!(!Error::Embedding("x".into()).is_validation());
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("{ not json").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Serialization(_)));
        assert!(err.to_string().starts_with("Serialization error:"));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "adapter dir missing");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert_eq!(err.to_string(), "I/O error: adapter dir missing");
    }

    #[test]
    fn test_result_type_alias() {
        fn might_fail(ok: bool) -> Result<i32> {
            if ok {
                Ok(7)
            } else {
                Err(Error::Task("nope".into()))
            }
        }
        assert_eq!(might_fail(true).unwrap(), 7);
        assert!(might_fail(false).is_err());
    }
}
