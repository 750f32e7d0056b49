// Error handling framework for the scan scheduler

use thiserror::Error;

/// Database-specific errors
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Database health check failed: {0}")]
    HealthCheckFailed(String),

    #[error("Query execution failed: {0}")]
    QueryFailed(String),
}

/// Errors surfaced by the durable endpoint store
#[derive(Error, Debug)]
pub enum StoreError {
    /// The store could not be reached or the staleness query failed.
    /// No partial result is ever returned alongside this error.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Required settings that are absent or malformed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("Missing required setting: {0}")]
    Missing(String),

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: String, reason: String },
}

/// Queue transport errors
///
/// The dispatcher treats every variant the same way: the candidate is skipped
/// for the current cycle and reappears on the next one.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Transport configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Message serialization failed: {0}")]
    Serialization(String),

    #[error("Failed to connect to queue: {0}")]
    Connection(String),

    #[error("Failed to publish message: {0}")]
    PublishFailed(String),

    #[error("Queue rejected message with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Queue operation timeout: {0}")]
    Timeout(String),
}

impl TransportError {
    /// Stable label for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            TransportError::Configuration(_) => "configuration",
            TransportError::Serialization(_) => "serialization",
            TransportError::Connection(_) => "connection",
            TransportError::PublishFailed(_) => "publish_failed",
            TransportError::Rejected { .. } => "rejected",
            TransportError::Timeout(_) => "timeout",
        }
    }
}

/// Scheduler-level errors. Only the startup check is fatal.
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Startup connectivity check failed: {0}")]
    StartupCheck(#[source] StoreError),
}

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                DatabaseError::ConnectionFailed(err.to_string())
            }
            sqlx::Error::Database(db_err) => DatabaseError::QueryFailed(db_err.message().to_string()),
            _ => DatabaseError::QueryFailed(err.to_string()),
        }
    }
}

impl From<DatabaseError> for StoreError {
    fn from(err: DatabaseError) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        TransportError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_error_becomes_store_unavailable() {
        let err: StoreError = DatabaseError::QueryFailed("relation missing".to_string()).into();
        assert!(matches!(err, StoreError::Unavailable(_)));
        assert!(err.to_string().contains("relation missing"));
    }

    #[test]
    fn test_missing_queue_url_is_configuration_error() {
        let err: TransportError = ConfigurationError::Missing("QUEUE_URL".to_string()).into();
        assert!(matches!(err, TransportError::Configuration(_)));
        assert!(err.to_string().contains("QUEUE_URL"));
    }

    #[test]
    fn test_rejected_display_includes_status() {
        let err = TransportError::Rejected {
            status: 403,
            body: "AccessDenied".to_string(),
        };
        assert!(err.to_string().contains("403"));
        assert!(err.to_string().contains("AccessDenied"));
    }

    #[test]
    fn test_startup_error_wraps_store_error() {
        let err = SchedulerError::StartupCheck(StoreError::Unavailable("refused".to_string()));
        assert!(err.to_string().contains("refused"));
    }
}
