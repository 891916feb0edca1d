//! Error types for wikifacts.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Content error: {0}")]
    Content(#[from] ContentError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Broadcast error: {0}")]
    Broadcast(#[from] BroadcastError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Database busy: {0}")]
    Busy(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl DatabaseError {
    /// Classify a libSQL error raised by `op`.
    pub fn from_libsql(op: &str, e: libsql::Error) -> Self {
        let message = format!("{op}: {e}");
        let lower = message.to_ascii_lowercase();
        if lower.contains("unique constraint") || lower.contains("constraint failed") {
            DatabaseError::Constraint(message)
        } else if lower.contains("database is locked") || lower.contains("busy") {
            DatabaseError::Busy(message)
        } else if lower.contains("connection") || lower.contains("disk i/o") {
            DatabaseError::Connection(message)
        } else {
            DatabaseError::Query(message)
        }
    }

    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, DatabaseError::Connection(_) | DatabaseError::Busy(_))
    }

    pub fn is_constraint(&self) -> bool {
        matches!(self, DatabaseError::Constraint(_))
    }
}

/// Delivery channel errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Failed to send on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("Channel {name} rejected message (code {code:?}): {reason}")]
    Rejected {
        name: String,
        code: Option<i64>,
        reason: String,
    },

    #[error("Rate limited on channel {name}")]
    RateLimited { name: String },

    #[error("No eligible delivery path for {kind} message to {address}")]
    NoDeliveryPath { address: String, kind: String },

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("HTTP error: {0}")]
    Http(String),
}

impl ChannelError {
    /// Timeouts, connection resets and provider throttling are worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ChannelError::Http(_) | ChannelError::RateLimited { .. }
        )
    }
}

/// Content source errors.
#[derive(Debug, thiserror::Error)]
pub enum ContentError {
    #[error("Request to {source_name} failed: {reason}")]
    RequestFailed { source_name: String, reason: String },

    #[error("Unsuitable article '{title}': {reason}")]
    Unsuitable { title: String, reason: String },

    #[error("No suitable article after {attempts} attempts")]
    Exhausted { attempts: u32 },

    #[error("Invalid response from {source_name}: {reason}")]
    InvalidResponse { source_name: String, reason: String },
}

impl ContentError {
    /// Unsuitable candidates and failed fetches are retried with a fresh candidate.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ContentError::Unsuitable { .. } | ContentError::RequestFailed { .. }
        )
    }
}

/// Summarizer (LLM provider) errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Empty content for article '{title}'")]
    EmptyInput { title: String },
}

/// Summary validation failure, with the diagnostics that were measured.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{reason} (length={length}, sentences={sentences}, script_ratio={script_ratio:.2})")]
pub struct ValidationError {
    pub reason: String,
    pub length: usize,
    pub sentences: usize,
    pub script_ratio: f64,
}

/// Broadcast pre-condition failures. Individual send failures are never errors.
#[derive(Debug, thiserror::Error)]
pub enum BroadcastError {
    #[error("Broadcast content is empty")]
    EmptyContent,
}

/// Daily production job errors.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Content source failed: {0}")]
    Content(#[from] ContentError),

    #[error("Summarizer failed: {0}")]
    Summarizer(#[from] LlmError),

    #[error("Summary rejected: {0}")]
    Validation(#[from] ValidationError),

    #[error("Storage failed: {0}")]
    Database(#[from] DatabaseError),

    #[error("Broadcast failed: {0}")]
    Broadcast(#[from] BroadcastError),

    #[error("Job {name} not found")]
    UnknownJob { name: String },

    #[error("Job {name} is already running")]
    AlreadyRunning { name: String },
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_transient_classification() {
        assert!(DatabaseError::Connection("reset".into()).is_transient());
        assert!(DatabaseError::Busy("locked".into()).is_transient());
        assert!(!DatabaseError::Constraint("dup".into()).is_transient());
        assert!(!DatabaseError::Query("syntax".into()).is_transient());
    }

    #[test]
    fn channel_transient_classification() {
        assert!(ChannelError::Http("timeout".into()).is_transient());
        assert!(ChannelError::RateLimited { name: "whatsapp".into() }.is_transient());
        assert!(
            !ChannelError::NoDeliveryPath {
                address: "+1".into(),
                kind: "daily_fact".into()
            }
            .is_transient()
        );
    }

    #[test]
    fn validation_error_reports_diagnostics() {
        let err = ValidationError {
            reason: "too short".into(),
            length: 12,
            sentences: 1,
            script_ratio: 0.5,
        };
        let msg = err.to_string();
        assert!(msg.contains("length=12"));
        assert!(msg.contains("script_ratio=0.50"));
    }
}
