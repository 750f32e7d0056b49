// PostgreSQL connection pool

use crate::config::DatabaseConfig;
use crate::errors::DatabaseError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument};

/// Database connection pool wrapper
///
/// The pool connects lazily: no connection is opened until the first query,
/// so reachability is decided by [`DbPool::health_check`] rather than by
/// construction.
#[derive(Debug, Clone)]
pub struct DbPool {
    pool: PgPool,
}

impl DbPool {
    /// Create a new lazily-connecting pool
    ///
    /// # Errors
    /// Returns `DatabaseError::ConnectionFailed` if the connection URL cannot be parsed
    #[instrument(skip(config), fields(max_connections = config.max_connections))]
    pub fn new(config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .connect_lazy(&config.url)
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to create database pool");
                DatabaseError::ConnectionFailed(e.to_string())
            })?;

        info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            "Database connection pool configured"
        );

        Ok(Self { pool })
    }

    /// Wrap an already-built pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the underlying pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Perform a health check on the database connection
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), DatabaseError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| DatabaseError::HealthCheckFailed(e.to_string()))?;

        tracing::debug!("Database health check passed");
        Ok(())
    }

    /// Close the connection pool gracefully
    #[instrument(skip(self))]
    pub async fn close(&self) {
        info!("Closing database connection pool");
        self.pool.close().await;
        info!("Database connection pool closed");
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(url: &str) -> DatabaseConfig {
        DatabaseConfig {
            url: url.to_string(),
            max_connections: 2,
            min_connections: 0,
            connect_timeout_seconds: 1,
        }
    }

    #[tokio::test]
    async fn test_lazy_pool_builds_without_server() {
        let pool = DbPool::new(&config("postgresql://nobody@127.0.0.1:1/none")).unwrap();
        assert!(!pool.is_closed());
    }

    #[tokio::test]
    async fn test_unparseable_url_is_rejected() {
        let result = DbPool::new(&config("not a url"));
        assert!(matches!(result, Err(DatabaseError::ConnectionFailed(_))));
    }

    #[tokio::test]
    async fn test_health_check_fails_when_unreachable() {
        let pool = DbPool::new(&config("postgresql://nobody@127.0.0.1:1/none")).unwrap();
        let result = pool.health_check().await;
        assert!(matches!(result, Err(DatabaseError::HealthCheckFailed(_))));
    }

    #[tokio::test]
    async fn test_failed_health_check_does_not_log_error() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;
        use tracing_subscriber::layer::{Context, SubscriberExt};

        struct ErrorCounter(Arc<AtomicUsize>);

        impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for ErrorCounter {
            fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
                if *event.metadata().level() == tracing::Level::ERROR {
                    self.0.fetch_add(1, Ordering::SeqCst);
                }
            }
        }

        let errors = Arc::new(AtomicUsize::new(0));
        let _guard = tracing::subscriber::set_default(
            tracing_subscriber::registry().with(ErrorCounter(errors.clone())),
        );

        let pool = DbPool::new(&config("postgresql://nobody@127.0.0.1:1/none")).unwrap();
        assert!(pool.health_check().await.is_err());
        assert_eq!(errors.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_close_marks_pool_closed() {
        let pool = DbPool::new(&config("postgresql://nobody@127.0.0.1:1/none")).unwrap();
        pool.close().await;
        assert!(pool.is_closed());
    }
}
