//! Error types for machsight-core

use thiserror::Error;

/// Main error type for the machsight-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Input rejected locally, before any request was made
    #[error("validation error: {0}")]
    Validation(String),

    /// Request could not be delivered (connection refused, timeout, DNS)
    #[error("transport error: {0}")]
    Transport(String),

    /// A response arrived but its body could not be decoded
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// The backend answered with a well-formed error response
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Backend process could not be started
    #[error("failed to start backend process: {0}")]
    ProcessStart(String),

    /// Backend never became healthy within the polling budget
    #[error("backend did not answer within {elapsed_secs} seconds ({attempts} attempts)")]
    HealthCheckTimeout { attempts: u32, elapsed_secs: u64 },

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// True for the fatal startup outcomes that must not be retried
    /// automatically.
    pub fn is_fatal_startup(&self) -> bool {
        matches!(
            self,
            Error::ProcessStart(_) | Error::HealthCheckTimeout { .. }
        )
    }
}

/// Result type alias for machsight-core
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message_names_the_bound() {
        let err = Error::HealthCheckTimeout {
            attempts: 60,
            elapsed_secs: 120,
        };
        let msg = err.to_string();
        assert!(msg.contains("120 seconds"));
        assert!(msg.contains("60 attempts"));
    }

    #[test]
    fn test_fatal_startup_classification() {
        assert!(Error::ProcessStart("no such file".into()).is_fatal_startup());
        assert!(Error::HealthCheckTimeout {
            attempts: 60,
            elapsed_secs: 120
        }
        .is_fatal_startup());
        assert!(!Error::Transport("connection refused".into()).is_fatal_startup());
        assert!(!Error::Validation("empty message".into()).is_fatal_startup());
    }
}
