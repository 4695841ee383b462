use thiserror::Error;

use crate::pipeline::PhaseKey;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Provider error: {0}")]
    Client(#[from] ClientError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

/// A provider payload or internal state value that violates its schema.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    /// Human-readable reason, suitable for display.
    pub message: String,
}

impl ValidationError {
    /// Create a validation error for a field.
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }

    /// A mandatory field is absent or null.
    pub fn missing(field: impl Into<String>) -> Self {
        let field = field.into();
        let message = format!("Missing required field: {}", field);
        Self { field, message }
    }

    /// A mandatory score is outside [1, 9] or not an integer.
    pub fn invalid_score(dimension: &str, field: impl Into<String>, value: impl std::fmt::Display) -> Self {
        Self {
            field: field.into(),
            message: format!("Invalid {} score: {}", dimension, value),
        }
    }
}

/// Errors raised by a remote analysis client.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Transport error: {message}")]
    Transport {
        /// HTTP status when the provider answered with a non-success code.
        status: Option<u16>,
        message: String,
    },

    #[error("Request timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Invalid provider response: {0}")]
    Validation(#[from] ValidationError),

    #[error("Gave up after {attempts} attempts: {last}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        last: Box<ClientError>,
    },

    #[error("Request cancelled")]
    Cancelled,
}

impl ClientError {
    /// Whether a fresh attempt could plausibly succeed.
    ///
    /// Every 4xx response is final. Validation failures and cancellation
    /// are never retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Transport {
                status: Some(status),
                ..
            } => !(400..500).contains(status),
            ClientError::Transport { status: None, .. } => true,
            ClientError::Timeout { .. } => true,
            ClientError::Validation(_) | ClientError::RetryExhausted { .. } | ClientError::Cancelled => {
                false
            }
        }
    }

    /// Whether this error, or the cause it wraps, is a cancellation.
    pub fn is_cancelled(&self) -> bool {
        match self {
            ClientError::Cancelled => true,
            ClientError::RetryExhausted { last, .. } => last.is_cancelled(),
            _ => false,
        }
    }
}

/// Aggregate failure of a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Analysis already in progress")]
    AlreadyRunning,

    #[error("Invalid input: {0}")]
    InvalidInput(ValidationError),

    #[error("{phase} phase failed: {source}")]
    Phase {
        phase: PhaseKey,
        #[source]
        source: ClientError,
    },

    #[error("{phase} phase precondition failed: {message}")]
    Sequencing { phase: PhaseKey, message: String },

    #[error("Analysis cancelled")]
    Cancelled { phase: Option<PhaseKey> },
}

impl PipelineError {
    /// The phase the failure originated in, if any.
    pub fn phase(&self) -> Option<PhaseKey> {
        match self {
            PipelineError::Phase { phase, .. } | PipelineError::Sequencing { phase, .. } => {
                Some(*phase)
            }
            PipelineError::Cancelled { phase } => *phase,
            PipelineError::AlreadyRunning | PipelineError::InvalidInput(_) => None,
        }
    }

    /// A single message for presentation, free of transport detail.
    pub fn user_message(&self) -> String {
        match self {
            PipelineError::AlreadyRunning => "An analysis is already running.".to_string(),
            PipelineError::InvalidInput(e) => e.message.clone(),
            PipelineError::Phase { phase, source } => match source {
                ClientError::Validation(e) => {
                    format!("The {} analysis returned unusable data: {}", phase, e.message)
                }
                ClientError::Timeout { .. } => {
                    format!("The {} analysis took too long to respond.", phase)
                }
                ClientError::Cancelled => "Analysis cancelled.".to_string(),
                ClientError::Transport { .. } | ClientError::RetryExhausted { .. } => {
                    format!("The {} analysis service is unavailable. Please try again.", phase)
                }
            },
            PipelineError::Sequencing { phase, .. } => {
                format!("The {} analysis could not start.", phase)
            }
            PipelineError::Cancelled { .. } => "Analysis cancelled.".to_string(),
        }
    }
}

/// Snapshot persistence errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database connection failed: {message}")]
    Connection { message: String },

    #[error("Migration failed: {message}")]
    Migration { message: String },

    #[error("Corrupt snapshot: {message}")]
    CorruptSnapshot { message: String },

    #[error("Snapshot too large: {size} bytes exceeds {limit}")]
    SnapshotTooLarge { size: usize, limit: usize },

    #[error("Snapshot serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for provider calls
pub type ClientResult<T> = Result<T, ClientError>;

/// Result type alias for pipeline runs
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type alias for schema validation
pub type ValidationResult<T> = Result<T, ValidationError>;
