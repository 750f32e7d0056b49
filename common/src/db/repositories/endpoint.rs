// Endpoint repository: staleness query over the endpoints table

use crate::db::store::EndpointStore;
use crate::db::DbPool;
use crate::errors::{DatabaseError, StoreError};
use crate::models::ScanCandidate;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::PgRow;
use sqlx::Row;
use tracing::instrument;

// NULLS FIRST keeps never-scanned endpoints ahead of everything else;
// endpoint_id makes the order total.
const STALE_ENDPOINTS_SQL: &str = r#"
    SELECT
        e.endpoint_id::text AS endpoint_id,
        e.org_id::text AS org_id,
        e.name,
        e.provider,
        e.region,
        e.last_scanned_at
    FROM endpoints e
    WHERE e.last_scanned_at IS NULL
       OR e.last_scanned_at < $1
    ORDER BY e.last_scanned_at ASC NULLS FIRST, e.endpoint_id ASC
    LIMIT $2
"#;

/// Repository for endpoint-related database operations
pub struct EndpointRepository {
    pool: DbPool,
}

impl EndpointRepository {
    /// Create a new EndpointRepository
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Find endpoints whose last scan is older than `now - threshold`, or that
    /// have never been scanned
    ///
    /// A `None` limit is sent as SQL `NULL`, which Postgres treats as no limit.
    #[instrument(skip(self))]
    pub async fn find_needing_scan(
        &self,
        now: DateTime<Utc>,
        threshold: Duration,
        limit: Option<i64>,
    ) -> Result<Vec<ScanCandidate>, DatabaseError> {
        let cutoff = staleness_cutoff(now, threshold)?;

        let rows = sqlx::query(STALE_ENDPOINTS_SQL)
            .bind(cutoff)
            .bind(limit)
            .fetch_all(self.pool.pool())
            .await?;

        let candidates = rows
            .iter()
            .map(candidate_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        tracing::debug!(count = candidates.len(), %cutoff, "Found endpoints needing scan");
        Ok(candidates)
    }
}

/// `now - threshold`, or an error when that falls outside the representable range
fn staleness_cutoff(now: DateTime<Utc>, threshold: Duration) -> Result<DateTime<Utc>, DatabaseError> {
    now.checked_sub_signed(threshold).ok_or_else(|| {
        DatabaseError::QueryFailed(format!(
            "Staleness cutoff out of range for threshold of {} hours",
            threshold.num_hours()
        ))
    })
}

fn candidate_from_row(row: &PgRow) -> Result<ScanCandidate, sqlx::Error> {
    Ok(ScanCandidate {
        endpoint_id: row.try_get("endpoint_id")?,
        org_id: row.try_get("org_id")?,
        name: row.try_get("name")?,
        provider: row.try_get("provider")?,
        region: row.try_get("region")?,
        last_scanned_at: row.try_get("last_scanned_at")?,
    })
}

#[async_trait]
impl EndpointStore for EndpointRepository {
    async fn health_check(&self) -> Result<(), StoreError> {
        self.pool.health_check().await.map_err(StoreError::from)
    }

    async fn list_stale_endpoints(
        &self,
        now: DateTime<Utc>,
        threshold: Duration,
        limit: Option<i64>,
    ) -> Result<Vec<ScanCandidate>, StoreError> {
        self.find_needing_scan(now, threshold, limit)
            .await
            .map_err(StoreError::from)
    }

    async fn close(&self) {
        if !self.pool.is_closed() {
            self.pool.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cutoff_is_now_minus_threshold() {
        let now = Utc::now();
        assert_eq!(
            staleness_cutoff(now, Duration::hours(24)).unwrap(),
            now - Duration::hours(24)
        );
    }

    #[test]
    fn test_cutoff_beyond_date_range_is_error_not_panic() {
        let threshold = Duration::try_hours(10_000_000_000).unwrap();
        let result = staleness_cutoff(Utc::now(), threshold);
        assert!(matches!(result, Err(DatabaseError::QueryFailed(_))));
    }

    #[test]
    fn test_query_orders_nulls_first() {
        assert!(STALE_ENDPOINTS_SQL.contains("ORDER BY e.last_scanned_at ASC NULLS FIRST"));
        assert!(STALE_ENDPOINTS_SQL.contains("e.last_scanned_at IS NULL"));
    }
}
