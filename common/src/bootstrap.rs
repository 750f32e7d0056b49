// Bootstrap utilities for binary initialization

use crate::config::{QueueBackend, Settings};
use crate::db::{DbPool, EndpointRepository, EndpointStore};
use crate::queue::{NatsTransport, QueueTransport, SqsTransport};
use crate::scheduler::{ScanScheduler, SchedulerConfig, SystemClock};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Build the Postgres-backed endpoint store.
///
/// No connection is opened here; reachability is checked when the
/// scheduler starts.
#[tracing::instrument(skip(settings))]
pub fn init_endpoint_store(settings: &Settings) -> Result<Arc<dyn EndpointStore>> {
    let db_pool = DbPool::new(&settings.database).context("Failed to configure database pool")?;
    info!("Endpoint store configured");
    Ok(Arc::new(EndpointRepository::new(db_pool)))
}

/// Build the queue transport selected by `queue.backend`
#[tracing::instrument(skip(settings), fields(backend = ?settings.queue.backend))]
pub fn init_queue_transport(settings: &Settings) -> Result<Arc<dyn QueueTransport>> {
    let timeout = Duration::from_secs(settings.queue.publish_timeout_seconds);

    let transport: Arc<dyn QueueTransport> = match settings.queue.backend {
        QueueBackend::Sqs => {
            if settings.queue.sqs.queue_url.is_none() {
                // Not fatal: reported on every publish until fixed
                tracing::warn!("QUEUE_URL is not set; scan jobs cannot be queued");
            }
            info!(region = %settings.queue.sqs.region, "Using SQS transport");
            Arc::new(SqsTransport::new(settings.queue.sqs.clone(), timeout))
        }
        QueueBackend::Nats => {
            info!(
                url = %settings.queue.nats.url,
                stream_name = %settings.queue.nats.stream_name,
                "Using NATS JetStream transport"
            );
            Arc::new(NatsTransport::new(settings.queue.nats.clone(), timeout))
        }
    };

    Ok(transport)
}

/// Wire a scheduler on the wall clock from loaded settings
pub fn build_scheduler(
    settings: &Settings,
    store: Arc<dyn EndpointStore>,
    transport: Arc<dyn QueueTransport>,
) -> ScanScheduler {
    ScanScheduler::new(
        SchedulerConfig::from(&settings.scheduler),
        store,
        transport,
        Arc::new(SystemClock),
    )
}
