// Durable store gateway consumed by the scan scheduler

use crate::errors::StoreError;
use crate::models::ScanCandidate;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

/// Read-only view of the endpoint catalog.
///
/// Implementations own the eligibility rule and the ordering: they return
/// exactly the endpoints for which [`ScanCandidate::is_due`] holds, sorted by
/// [`ScanCandidate::staleness_order`]. Callers never re-filter.
#[async_trait]
pub trait EndpointStore: Send + Sync {
    /// Verify the store is reachable
    async fn health_check(&self) -> Result<(), StoreError>;

    /// Endpoints never scanned or last scanned more than `threshold` before `now`,
    /// oldest first, truncated to `limit` when given
    async fn list_stale_endpoints(
        &self,
        now: DateTime<Utc>,
        threshold: Duration,
        limit: Option<i64>,
    ) -> Result<Vec<ScanCandidate>, StoreError>;

    /// Release held connections. Safe to call more than once.
    async fn close(&self);
}
