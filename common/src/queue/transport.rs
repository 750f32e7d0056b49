// Queue transport gateway consumed by the dispatcher

use crate::errors::TransportError;
use crate::models::{MessageId, ScanJobMessage};
use async_trait::async_trait;

/// Accepts scan-job messages for asynchronous delivery.
///
/// A successful publish only means the broker accepted the message. Delivery
/// is at-least-once and nothing here suppresses duplicates, so consumers must
/// be idempotent.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QueueTransport: Send + Sync {
    /// Short backend name used in log fields
    fn name(&self) -> &'static str;

    /// Publish one message, returning the broker-assigned identifier
    async fn publish(&self, message: &ScanJobMessage) -> Result<MessageId, TransportError>;
}
