// Error handling framework

use thiserror::Error;

/// Trigger evaluation errors
#[derive(Error, Debug)]
pub enum TriggerError {
    #[error("Watermark store failure: {0}")]
    WatermarkFailed(String),

    #[error("Spec lookup failed: {0}")]
    SpecLookupFailed(String),

    #[error("Dispatch failed: {0}")]
    DispatchFailed(String),
}

/// Platform publishing errors, classified per the retry policy:
/// configuration and permanent errors are never retried, transient errors
/// are retried with bounded backoff inside the publisher.
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Permanent platform error: {0}")]
    Permanent(String),

    #[error("Transient platform error: {0}")]
    Transient(String),

    #[error("Malformed platform response: {0}")]
    MalformedResponse(String),

    #[error("Publish timed out after {0} seconds")]
    Timeout(u64),

    #[error("Processing poll budget exhausted after {attempts} attempts")]
    PollBudgetExhausted { attempts: u32 },

    #[error("Retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    #[error("Circuit breaker open for platform: {0}")]
    CircuitOpen(String),
}

impl PublishError {
    /// True when another attempt inside the same call could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, PublishError::Transient(_))
    }

    /// Stable label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            PublishError::Configuration(_) => "configuration",
            PublishError::Permanent(_) => "permanent",
            PublishError::Transient(_) => "transient",
            PublishError::MalformedResponse(_) => "malformed_response",
            PublishError::Timeout(_) => "timeout",
            PublishError::PollBudgetExhausted { .. } => "poll_exhausted",
            PublishError::RetriesExhausted { .. } => "retries_exhausted",
            PublishError::CircuitOpen(_) => "circuit_open",
        }
    }
}

/// Orchestration errors. Empty queues, duplicate triggers, and per-account
/// publish failures are designed no-ops or Failed records, not errors; only
/// storage failures surface here, asking the bus to redeliver.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Storage failure: {0}")]
    Storage(String),
}

/// Credential resolution errors
#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("Credential not found for account: {0}")]
    NotFound(String),

    #[error("Credential expired or revoked for account: {0}")]
    ExpiredOrRevoked(String),

    #[error("Credential resolution failed: {0}")]
    ResolutionFailed(String),
}

/// Bus errors
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Failed to connect to bus: {0}")]
    Connection(String),

    #[error("Failed to create stream: {0}")]
    StreamCreation(String),

    #[error("Stream not found: {0}")]
    StreamNotFound(String),

    #[error("Failed to create consumer: {0}")]
    ConsumerCreation(String),

    #[error("Failed to publish message: {0}")]
    PublishFailed(String),

    #[error("Failed to consume message: {0}")]
    ConsumeFailed(String),

    #[error("Message serialization failed: {0}")]
    SerializationFailed(String),

    #[error("Bus operation timeout: {0}")]
    Timeout(String),

    #[error("Bus health check failed: {0}")]
    HealthCheck(String),
}

/// Redis-backed storage errors (watermarks, locks)
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Redis error: {0}")]
    RedisError(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
}

impl From<redis::RedisError> for StorageError {
    fn from(err: redis::RedisError) -> Self {
        StorageError::RedisError(err.to_string())
    }
}

/// Database errors
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Database health check failed: {0}")]
    HealthCheckFailed(String),

    #[error("Query execution failed: {0}")]
    QueryFailed(String),

    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Duplicate key violation: {0}")]
    DuplicateKey(String),
}

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DatabaseError::NotFound("Record not found".to_string()),
            sqlx::Error::Database(db_err) => {
                if let Some(code) = db_err.code() {
                    match code.as_ref() {
                        "23505" => DatabaseError::DuplicateKey(db_err.message().to_string()),
                        _ => DatabaseError::QueryFailed(db_err.message().to_string()),
                    }
                } else {
                    DatabaseError::QueryFailed(db_err.message().to_string())
                }
            }
            _ => DatabaseError::QueryFailed(err.to_string()),
        }
    }
}

impl From<DatabaseError> for OrchestratorError {
    fn from(err: DatabaseError) -> Self {
        OrchestratorError::Storage(err.to_string())
    }
}

impl From<StorageError> for OrchestratorError {
    fn from(err: StorageError) -> Self {
        OrchestratorError::Storage(err.to_string())
    }
}

impl From<StorageError> for TriggerError {
    fn from(err: StorageError) -> Self {
        TriggerError::WatermarkFailed(err.to_string())
    }
}

impl From<DatabaseError> for TriggerError {
    fn from(err: DatabaseError) -> Self {
        TriggerError::SpecLookupFailed(err.to_string())
    }
}

impl From<QueueError> for TriggerError {
    fn from(err: QueueError) -> Self {
        TriggerError::DispatchFailed(err.to_string())
    }
}
