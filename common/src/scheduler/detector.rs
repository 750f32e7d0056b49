// Staleness detection: which endpoints are due for a scan

use crate::db::EndpointStore;
use crate::errors::StoreError;
use crate::models::ScanCandidate;
use crate::scheduler::clock::Clock;
use chrono::Duration;
use std::sync::Arc;
use tracing::instrument;

/// Asks the store for endpoints that are due, as of the clock's "now".
///
/// Filtering and ordering belong to the store; the detector passes its
/// answer through untouched.
pub struct StalenessDetector {
    store: Arc<dyn EndpointStore>,
    clock: Arc<dyn Clock>,
    threshold: Duration,
    limit: Option<i64>,
}

impl StalenessDetector {
    pub fn new(
        store: Arc<dyn EndpointStore>,
        clock: Arc<dyn Clock>,
        threshold: Duration,
        limit: Option<i64>,
    ) -> Self {
        Self {
            store,
            clock,
            threshold,
            limit,
        }
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    #[instrument(skip(self), fields(threshold_hours = self.threshold.num_hours()))]
    pub async fn fetch_candidates(&self) -> Result<Vec<ScanCandidate>, StoreError> {
        let now = self.clock.now();
        self.store
            .list_stale_endpoints(now, self.threshold, self.limit)
            .await
    }
}
