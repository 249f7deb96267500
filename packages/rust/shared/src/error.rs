//! Error types for kbforge.
//!
//! Library crates use [`KbForgeError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Longest service body excerpt kept inside an error.
pub const BODY_EXCERPT_LEN: usize = 512;

/// Top-level error type for all kbforge operations.
#[derive(Debug, thiserror::Error)]
pub enum KbForgeError {
    /// The caller passed an empty or malformed incident identifier.
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    /// No incident exists for the given identifier.
    #[error("incident not found: {incident_id}")]
    NotFound { incident_id: String },

    /// The generative service could not be reached (refused, timed out, ...).
    #[error("transport error: {0}")]
    Transport(String),

    /// The generative service answered with a non-200 status.
    #[error("service error: HTTP {status}: {body}")]
    Service { status: u16, body: String },

    /// The service reply was not a usable chat completion.
    #[error("malformed response: {message} (body: {body})")]
    MalformedResponse { message: String, body: String },

    /// The record store rejected the article insert.
    #[error("persistence failure: {0}")]
    Persistence(String),

    /// The record store rejected the relationship insert. Never fatal.
    #[error("link failure: {0}")]
    Link(String),

    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Database error outside the article/relationship writes.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (bad fixture, unexpected column value, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, KbForgeError>;

/// Stable reason code attached to every failed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureReason {
    InvalidInput,
    NotFound,
    TransportError,
    ServiceError,
    MalformedResponse,
    PersistenceFailure,
    LinkFailure,
    ConfigError,
    StorageError,
    IoError,
    ValidationError,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidInput => "invalid_input",
            Self::NotFound => "not_found",
            Self::TransportError => "transport_error",
            Self::ServiceError => "service_error",
            Self::MalformedResponse => "malformed_response",
            Self::PersistenceFailure => "persistence_failure",
            Self::LinkFailure => "link_failure",
            Self::ConfigError => "config_error",
            Self::StorageError => "storage_error",
            Self::IoError => "io_error",
            Self::ValidationError => "validation_error",
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl KbForgeError {
    /// Create an invalid-input error from any displayable message.
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: msg.into(),
        }
    }

    /// Create a not-found error for an incident identifier.
    pub fn not_found(incident_id: impl Into<String>) -> Self {
        Self::NotFound {
            incident_id: incident_id.into(),
        }
    }

    /// Create a service error, keeping only an excerpt of the body.
    pub fn service(status: u16, body: &str) -> Self {
        Self::Service {
            status,
            body: excerpt(body),
        }
    }

    /// Create a malformed-response error, keeping only an excerpt of the body.
    pub fn malformed(msg: impl Into<String>, body: &str) -> Self {
        Self::MalformedResponse {
            message: msg.into(),
            body: excerpt(body),
        }
    }

    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Reason code for logs and run outcomes.
    pub fn reason(&self) -> FailureReason {
        match self {
            Self::InvalidInput { .. } => FailureReason::InvalidInput,
            Self::NotFound { .. } => FailureReason::NotFound,
            Self::Transport(_) => FailureReason::TransportError,
            Self::Service { .. } => FailureReason::ServiceError,
            Self::MalformedResponse { .. } => FailureReason::MalformedResponse,
            Self::Persistence(_) => FailureReason::PersistenceFailure,
            Self::Link(_) => FailureReason::LinkFailure,
            Self::Config { .. } => FailureReason::ConfigError,
            Self::Storage(_) => FailureReason::StorageError,
            Self::Io { .. } => FailureReason::IoError,
            Self::Validation { .. } => FailureReason::ValidationError,
        }
    }

    /// Whether this error aborts a pipeline run.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Link(_))
    }
}

/// Truncate `body` to [`BODY_EXCERPT_LEN`] characters, marking the cut.
pub fn excerpt(body: &str) -> String {
    match body.char_indices().nth(BODY_EXCERPT_LEN) {
        Some((idx, _)) => format!("{}…", &body[..idx]),
        None => body.to_string(),
    }
}
