//! Error types shared by the reply pipeline and its collaborators.
//!
//! Only `RunError` ever ends a run early. Everything else is caught at the
//! mention-loop boundary or degraded inside the response generator.

use std::fmt;

/// Failure talking to the social-media API.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceError {
    /// Request never produced a response (DNS, TLS, timeout, connection reset)
    Transport(String),
    /// Non-2xx response
    Api { status: u16, body: String },
    /// Still rate limited after the client exhausted its backoff attempts
    RateLimited { retry_after_secs: u64 },
    /// Response body did not match the expected shape
    Decode(String),
    /// The requested post does not exist or is not visible to the bot
    NotFound(String),
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceError::Transport(e) => write!(f, "Request failed: {}", e),
            SourceError::Api { status, body } => write!(f, "API error ({}): {}", status, body),
            SourceError::RateLimited { retry_after_secs } => {
                write!(f, "Rate limited, retry in {}s", retry_after_secs)
            }
            SourceError::Decode(e) => write!(f, "Failed to parse response: {}", e),
            SourceError::NotFound(id) => write!(f, "Post {} not found", id),
        }
    }
}

impl std::error::Error for SourceError {}

/// Failure of the chat, summarization or rendering service.
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceError {
    Transport(String),
    Api { status: u16, body: String },
    Decode(String),
    Timeout { secs: u64 },
    /// The service answered successfully but with nothing usable
    Empty,
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceError::Transport(e) => write!(f, "Request failed: {}", e),
            ServiceError::Api { status, body } => write!(f, "API error ({}): {}", status, body),
            ServiceError::Decode(e) => write!(f, "Failed to parse response: {}", e),
            ServiceError::Timeout { secs } => write!(f, "Timed out after {}s", secs),
            ServiceError::Empty => write!(f, "Service returned an empty result"),
        }
    }
}

impl std::error::Error for ServiceError {}

/// Failure of the durable ledger or cursor store.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreError {
    /// Backend unreachable or a write was rejected
    Unavailable(String),
    /// Stored data could not be interpreted
    Corrupt(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Unavailable(e) => write!(f, "Store unavailable: {}", e),
            StoreError::Corrupt(e) => write!(f, "Store data corrupt: {}", e),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Unavailable(format!("SQLite error: {}", e))
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        StoreError::Unavailable(format!("Redis error: {}", e))
    }
}

/// Which half of the two-call publish sequence failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishStep {
    UploadMedia,
    CreatePost,
}

impl fmt::Display for PublishStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublishStep::UploadMedia => write!(f, "media upload"),
            PublishStep::CreatePost => write!(f, "post creation"),
        }
    }
}

/// Publishing a reply failed. Never retried text-only after a media upload.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishError {
    pub step: PublishStep,
    pub source: SourceError,
}

impl fmt::Display for PublishError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Publish failed during {}: {}", self.step, self.source)
    }
}

impl std::error::Error for PublishError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Conditions that abort a whole run. The cursor is left where it was.
#[derive(Debug, Clone, PartialEq)]
pub enum RunError {
    /// Another run still holds the run lock
    AlreadyRunning,
    SourceUnavailable(SourceError),
    LedgerUnavailable(StoreError),
    CursorUnavailable(StoreError),
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunError::AlreadyRunning => write!(f, "A previous run is still in progress"),
            RunError::SourceUnavailable(e) => write!(f, "Mention source unavailable: {}", e),
            RunError::LedgerUnavailable(e) => write!(f, "Reply ledger unavailable: {}", e),
            RunError::CursorUnavailable(e) => write!(f, "Cursor store unavailable: {}", e),
        }
    }
}

impl std::error::Error for RunError {}

/// Startup configuration problem.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    Missing(&'static str),
    Invalid { var: &'static str, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Missing(var) => write!(f, "{} is not set", var),
            ConfigError::Invalid { var, value } => write!(f, "{} has invalid value '{}'", var, value),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_error_display_names_step() {
        let err = PublishError {
            step: PublishStep::UploadMedia,
            source: SourceError::Api {
                status: 503,
                body: "unavailable".to_string(),
            },
        };
        assert_eq!(
            err.to_string(),
            "Publish failed during media upload: API error (503): unavailable"
        );
    }

    #[test]
    fn test_run_error_wraps_cause() {
        let err = RunError::CursorUnavailable(StoreError::Unavailable("down".to_string()));
        assert!(err.to_string().contains("Cursor store unavailable"));
        assert!(err.to_string().contains("down"));
    }
}
