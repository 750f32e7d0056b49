// Dispatcher: turns a candidate into a queued scan job

use crate::errors::TransportError;
use crate::models::{MessageId, ScanCandidate, ScanJobMessage};
use crate::queue::QueueTransport;
use crate::scheduler::clock::Clock;
use crate::telemetry;
use std::sync::Arc;
use tracing::{error, info};

/// Publishes one scan job per call.
///
/// No attempt is made to detect a job already in flight for the same
/// endpoint: delivery is at-least-once and scan workers must be idempotent.
pub struct Dispatcher {
    transport: Arc<dyn QueueTransport>,
    clock: Arc<dyn Clock>,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn QueueTransport>, clock: Arc<dyn Clock>) -> Self {
        Self { transport, clock }
    }

    /// Build the job message for `candidate` and hand it to the transport.
    ///
    /// An error only affects this candidate for this cycle. Its staleness is
    /// untouched, so it is selected again next cycle.
    pub async fn dispatch(&self, candidate: &ScanCandidate) -> Result<MessageId, TransportError> {
        let message = ScanJobMessage::for_candidate(candidate, self.clock.now());

        match self.transport.publish(&message).await {
            Ok(message_id) => {
                info!(
                    endpoint_id = %candidate.endpoint_id,
                    org_id = %candidate.org_id,
                    provider = %candidate.provider,
                    message_id = %message_id,
                    transport = self.transport.name(),
                    "Queued: {} (endpoint_id: {})",
                    candidate.name,
                    candidate.endpoint_id
                );
                telemetry::record_scan_job_queued(&candidate.provider);
                Ok(message_id)
            }
            Err(e) => {
                error!(
                    endpoint_id = %candidate.endpoint_id,
                    org_id = %candidate.org_id,
                    endpoint_name = %candidate.name,
                    transport = self.transport.name(),
                    error_kind = e.kind(),
                    error = %e,
                    "Error queueing endpoint {}: {}",
                    candidate.endpoint_id,
                    e
                );
                telemetry::record_scan_job_skipped(e.kind());
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ConfigurationError;
    use crate::queue::transport::MockQueueTransport;
    use crate::scheduler::clock::ManualClock;
    use chrono::{TimeZone, Utc};

    fn candidate(id: &str) -> ScanCandidate {
        ScanCandidate {
            endpoint_id: id.to_string(),
            org_id: "org-7".to_string(),
            name: "finance-archive".to_string(),
            provider: "aws".to_string(),
            region: None,
            last_scanned_at: None,
        }
    }

    #[tokio::test]
    async fn test_dispatch_publishes_message_stamped_with_clock() {
        let issued = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        let mut transport = MockQueueTransport::new();
        transport.expect_name().return_const("mock");
        transport
            .expect_publish()
            .withf(move |m| m.endpoint_id == "E1" && m.org_id == "org-7" && m.timestamp == issued)
            .times(1)
            .returning(|_| Ok(MessageId("m-1".to_string())));

        let dispatcher = Dispatcher::new(Arc::new(transport), Arc::new(ManualClock::new(issued)));
        let id = dispatcher.dispatch(&candidate("E1")).await.unwrap();
        assert_eq!(id, MessageId("m-1".to_string()));
    }

    #[tokio::test]
    async fn test_dispatch_returns_transport_error() {
        let mut transport = MockQueueTransport::new();
        transport.expect_name().return_const("mock");
        transport.expect_publish().times(1).returning(|_| {
            Err(TransportError::Configuration(ConfigurationError::Missing(
                "QUEUE_URL".to_string(),
            )))
        });

        let dispatcher = Dispatcher::new(Arc::new(transport), Arc::new(ManualClock::new(Utc::now())));
        let result = dispatcher.dispatch(&candidate("E2")).await;
        assert!(matches!(result, Err(TransportError::Configuration(_))));
    }
}
