//! Error types for mailflow.

use std::time::Duration;

/// Top-level error type for the engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Classifier error: {0}")]
    Classifier(#[from] ClassifierError),

    #[error("Match error: {0}")]
    Match(#[from] MatchError),

    #[error("Execute error: {0}")]
    Execute(#[from] ExecuteError),

    #[error("Ingest error: {0}")]
    Ingest(#[from] IngestError),

    #[error("Bulk error: {0}")]
    Bulk(#[from] BulkError),

    #[error("Cron error: {0}")]
    Cron(#[from] CronError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Email provider errors.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: String, id: String },

    #[error("Provider rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Provider authentication failed: {reason}")]
    AuthFailed { reason: String },

    #[error("Provider request failed: {reason}")]
    RequestFailed { reason: String },

    #[error("Invalid provider request: {reason}")]
    InvalidRequest { reason: String },
}

impl ProviderError {
    /// Whether a retry of the same call could reasonably succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited { .. } | ProviderError::RequestFailed { .. }
        )
    }

    /// Convenience constructor for the common not-found case.
    pub fn not_found(kind: &str, id: &str) -> Self {
        ProviderError::NotFound {
            kind: kind.to_string(),
            id: id.to_string(),
        }
    }
}

/// Store (repository) errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Classifier errors. Every variant is retryable by contract: the
/// classifier is an opaque remote collaborator and callers treat any
/// failure as "could not determine".
#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("Classifier request failed: {reason}")]
    RequestFailed { reason: String },

    #[error("Classifier rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Invalid classifier response: {reason}")]
    InvalidResponse { reason: String },

    #[error("Classifier authentication failed")]
    AuthFailed,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Rule-matching errors.
#[derive(Debug, thiserror::Error)]
pub enum MatchError {
    #[error("Classifier error: {0}")]
    Classifier(#[from] ClassifierError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Action-execution errors.
#[derive(Debug, thiserror::Error)]
pub enum ExecuteError {
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Classifier error: {0}")]
    Classifier(#[from] ClassifierError),

    #[error("Webhook call to {url} failed: {reason}")]
    Webhook { url: String, reason: String },

    #[error("Action {action} is not executable: {reason}")]
    InvalidAction { action: String, reason: String },
}

impl ExecuteError {
    /// Retryable failures leave the executed-rule record PENDING so a
    /// redelivery can resume; everything else is recorded as REJECTED.
    pub fn is_retryable(&self) -> bool {
        match self {
            ExecuteError::Provider(e) => e.is_retryable(),
            ExecuteError::Store(_) => true,
            ExecuteError::Classifier(_) => true,
            ExecuteError::Webhook { .. } => false,
            ExecuteError::InvalidAction { .. } => false,
        }
    }
}

/// Event-ingestion errors.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Match error: {0}")]
    Match(#[from] MatchError),

    #[error("Execute error: {0}")]
    Execute(#[from] ExecuteError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl IngestError {
    /// Whether the upstream delivery should be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            IngestError::Provider(e) => e.is_retryable(),
            IngestError::Match(_) => true,
            IngestError::Execute(e) => e.is_retryable(),
            IngestError::Store(_) => true,
        }
    }
}

/// Bulk-processing errors (run-aborting; per-item failures are counted
/// in the summary instead).
#[derive(Debug, thiserror::Error)]
pub enum BulkError {
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Cron parsing and evaluation errors.
#[derive(Debug, thiserror::Error)]
pub enum CronError {
    #[error("Expected 5 cron fields, found {found}")]
    FieldCount { found: usize },

    #[error("The {field} field only supports '*', got '{value}'")]
    WildcardOnly { field: &'static str, value: String },

    #[error("Malformed token '{token}' in {field} field")]
    MalformedToken { field: &'static str, token: String },

    #[error("Value {value} out of range for {field} field (0-{max})")]
    OutOfRange {
        field: &'static str,
        value: u32,
        max: u32,
    },

    #[error("Invalid step in '{token}': step must be at least 1")]
    InvalidStep { token: String },

    #[error("Invalid range in '{token}': start exceeds end")]
    InvalidRange { token: String },

    #[error("Expression never fires within the scan horizon")]
    Unsatisfiable,
}

/// Result type alias for the engine.
pub type Result<T> = std::result::Result<T, Error>;
