// NATS JetStream transport for scan jobs

use crate::config::NatsConfig;
use crate::errors::TransportError;
use crate::models::{MessageId, ScanJobMessage};
use crate::queue::transport::QueueTransport;
use async_nats::jetstream::context::PublishAckFuture;
use async_nats::jetstream::stream::{Config as StreamConfig, RetentionPolicy};
use async_nats::jetstream::Context as JetStreamContext;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{info, instrument};

/// Publishes scan jobs to a JetStream work-queue stream.
///
/// The connection and stream are established on the first publish and reused
/// afterwards; a failed attempt is retried on the next publish.
pub struct NatsTransport {
    config: NatsConfig,
    publish_timeout: Duration,
    jetstream: OnceCell<JetStreamContext>,
}

impl NatsTransport {
    pub fn new(config: NatsConfig, publish_timeout: Duration) -> Self {
        Self {
            config,
            publish_timeout,
            jetstream: OnceCell::new(),
        }
    }

    /// Subject for one organization's scan jobs
    pub fn subject_for(&self, org_id: &str) -> String {
        let token: String = org_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        format!("{}.{}", self.config.subject_prefix, token)
    }

    #[instrument(skip(self), fields(url = %self.config.url))]
    async fn connect(&self) -> Result<JetStreamContext, TransportError> {
        info!("Connecting to NATS server");

        let client = async_nats::connect(&self.config.url)
            .await
            .map_err(|e| TransportError::Connection(format!("Failed to connect to NATS: {}", e)))?;
        let jetstream = async_nats::jetstream::new(client);

        let stream_config = StreamConfig {
            name: self.config.stream_name.clone(),
            subjects: vec![format!("{}.>", self.config.subject_prefix)],
            // Messages are removed once a scan worker acknowledges them
            retention: RetentionPolicy::WorkQueue,
            max_age: Duration::from_secs(self.config.max_age_seconds),
            ..Default::default()
        };
        jetstream
            .get_or_create_stream(stream_config)
            .await
            .map_err(|e| TransportError::Connection(format!("Failed to create stream: {}", e)))?;

        info!(stream_name = %self.config.stream_name, "JetStream stream ready");
        Ok(jetstream)
    }
}

/// Per-message header id. Two messages for the same endpoint issued at
/// different times get different ids, so JetStream never drops a re-dispatch.
fn message_header_id(message: &ScanJobMessage) -> String {
    format!("{}:{}", message.endpoint_id, message.timestamp.timestamp_millis())
}

#[async_trait]
impl QueueTransport for NatsTransport {
    fn name(&self) -> &'static str {
        "nats"
    }

    #[instrument(skip(self, message), fields(
        endpoint_id = %message.endpoint_id,
        org_id = %message.org_id
    ))]
    async fn publish(&self, message: &ScanJobMessage) -> Result<MessageId, TransportError> {
        let jetstream = self.jetstream.get_or_try_init(|| self.connect()).await?;

        let payload = serde_json::to_vec(message)?;
        let subject = self.subject_for(&message.org_id);

        let mut headers = async_nats::HeaderMap::new();
        headers.insert("Nats-Msg-Id", message_header_id(message).as_str());
        headers.insert("Endpoint-Id", message.endpoint_id.as_str());

        let ack_future: PublishAckFuture = jetstream
            .publish_with_headers(subject.clone(), headers, payload.into())
            .await
            .map_err(|e| TransportError::PublishFailed(format!("Failed to publish message: {}", e)))?;

        match tokio::time::timeout(self.publish_timeout, ack_future).await {
            Ok(Ok(ack)) => {
                info!(subject = %subject, sequence = ack.sequence, "Scan job published to JetStream");
                Ok(MessageId(format!("{}:{}", ack.stream, ack.sequence)))
            }
            Ok(Err(e)) => Err(TransportError::PublishFailed(format!(
                "Failed to get publish acknowledgment: {}",
                e
            ))),
            Err(_) => Err(TransportError::Timeout(format!(
                "Publish acknowledgment timeout after {:?}",
                self.publish_timeout
            ))),
        }
    }
}
