//! Error taxonomy for the token broker
//!
//! Two failure classes matter to callers: a structurally defective sandbox
//! (`BadEnvironment`, sticky and never retried) and everything else that went
//! wrong during a handshake or derivation (`Challenge`, retried at most once
//! by the broker).

use thiserror::Error;

/// Main error type for the application
#[derive(Debug, Error)]
pub enum Error {
    /// HTTP request errors
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML configuration parsing errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing errors
    #[error("URL parsing error: {0}")]
    Url(#[from] url::ParseError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The sandbox implementation itself is unusable. Disables the internal
    /// token path for the rest of the process lifetime.
    #[error("bad sandbox environment: {message}")]
    BadEnvironment {
        /// What the sandbox reported (uncaught console error, construction failure)
        message: String,
    },

    /// Handshake or derivation failure not attributable to a broken sandbox
    #[error("challenge failed at stage '{stage}': {message}")]
    Challenge {
        /// Handshake/derivation stage where the failure occurred
        stage: String,
        /// Error message describing what went wrong
        message: String,
    },

    /// Timeout errors
    #[error("Operation timed out after {duration_secs} seconds: {operation}")]
    Timeout {
        /// The operation that timed out
        operation: String,
        /// Duration in seconds before timing out
        duration_secs: u64,
    },

    /// Configuration errors
    #[error("Configuration error in {field}: {message}")]
    Config {
        /// The configuration field that has an error
        field: String,
        /// Error message describing the issue
        message: String,
    },

    /// HTTP server errors
    #[error("Server error: {0}")]
    Server(String),
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a bad-environment error
    pub fn bad_environment(message: impl Into<String>) -> Self {
        Self::BadEnvironment {
            message: message.into(),
        }
    }

    /// Create a challenge error
    pub fn challenge(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Challenge {
            stage: stage.into(),
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, duration_secs: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration_secs,
        }
    }

    /// Create a configuration error
    pub fn config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a server error
    pub fn server(msg: impl Into<String>) -> Self {
        Self::Server(msg.into())
    }

    /// True for failures that mark the sandbox as permanently unusable
    pub fn is_bad_environment(&self) -> bool {
        matches!(self, Error::BadEnvironment { .. })
    }

    /// Get error category for logging/metrics
    pub fn category(&self) -> &'static str {
        match self {
            Error::Http(..) => "http",
            Error::Json(..) => "json",
            Error::Toml(..) => "toml",
            Error::Url(..) => "url",
            Error::Io(..) => "io",
            Error::BadEnvironment { .. } => "bad_environment",
            Error::Challenge { .. } => "challenge",
            Error::Timeout { .. } => "timeout",
            Error::Config { .. } => "config",
            Error::Server(..) => "server",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = Error::config("field", "test config error");
        assert!(matches!(err, Error::Config { .. }));
        assert_eq!(
            err.to_string(),
            "Configuration error in field: test config error"
        );
    }

    #[test]
    fn test_error_from_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid json");
        assert!(json_err.is_err());

        let err: Error = json_err.unwrap_err().into();
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn test_challenge_error() {
        let err = Error::challenge("integrity_token", "invalid response code: 403");
        assert!(matches!(err, Error::Challenge { .. }));
        assert!(err.to_string().contains("integrity_token"));
        assert!(!err.is_bad_environment());
    }

    #[test]
    fn test_bad_environment_error() {
        let err = Error::bad_environment("Uncaught TypeError: x is not a function");
        assert!(err.is_bad_environment());
        assert_eq!(err.category(), "bad_environment");
    }

    #[test]
    fn test_timeout_error() {
        let err = Error::timeout("executor initialization", 20);
        assert!(err.to_string().contains("20 seconds"));
        assert_eq!(err.category(), "timeout");
    }
}
