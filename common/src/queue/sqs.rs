// Amazon SQS transport built on the AWS SDK

use crate::config::SqsConfig;
use crate::errors::{ConfigurationError, TransportError};
use crate::models::{MessageId, ScanJobMessage};
use crate::queue::transport::QueueTransport;
use async_trait::async_trait;
use aws_config::retry::RetryConfig;
use aws_config::timeout::TimeoutConfig;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_sqs::config::http::HttpResponse;
use aws_sdk_sqs::config::Credentials;
use aws_sdk_sqs::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_sqs::operation::send_message::SendMessageError;
use aws_sdk_sqs::Client;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument};

const CREDENTIALS_PROVIDER_NAME: &str = "scan-scheduler-config";

/// Publishes scan jobs to an SQS queue.
///
/// The SDK client is built on the first publish. Credentials come from the
/// configured key pair when both halves are set, otherwise from the default
/// provider chain (environment, shared profile, web identity, container and
/// instance roles). The queue URL is checked on every publish, so a missing
/// `QUEUE_URL` surfaces as a configuration error at the first attempt instead
/// of preventing startup.
pub struct SqsTransport {
    config: SqsConfig,
    publish_timeout: Duration,
    client: OnceCell<Client>,
}

impl SqsTransport {
    /// Create a new SQS transport with a per-publish timeout
    pub fn new(config: SqsConfig, publish_timeout: Duration) -> Self {
        Self {
            config,
            publish_timeout,
            client: OnceCell::new(),
        }
    }

    fn queue_url(&self) -> Result<&str, ConfigurationError> {
        self.config
            .queue_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .ok_or_else(|| ConfigurationError::Missing("QUEUE_URL".to_string()))
    }

    /// Static credentials when both the key id and secret are configured
    fn static_credentials(&self) -> Option<Credentials> {
        match (&self.config.access_key_id, &self.config.secret_access_key) {
            (Some(key_id), Some(secret)) => Some(Credentials::new(
                key_id,
                secret,
                self.config.session_token.clone(),
                None,
                CREDENTIALS_PROVIDER_NAME,
            )),
            _ => None,
        }
    }

    #[instrument(skip(self), fields(region = %self.config.region))]
    async fn build_client(&self) -> Client {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(self.config.region.clone()))
            .timeout_config(
                TimeoutConfig::builder()
                    .operation_timeout(self.publish_timeout)
                    .build(),
            )
            .retry_config(RetryConfig::standard().with_max_attempts(self.config.max_attempts));

        if let Some(credentials) = self.static_credentials() {
            loader = loader.credentials_provider(credentials);
        }
        if let Some(endpoint_url) = &self.config.endpoint_url {
            loader = loader.endpoint_url(endpoint_url);
        }

        let sdk_config = loader.load().await;
        info!("SQS client initialized");
        Client::new(&sdk_config)
    }
}

/// Fold an SDK failure into the transport error taxonomy
fn map_send_error(err: SdkError<SendMessageError, HttpResponse>) -> TransportError {
    let detail = DisplayErrorContext(&err).to_string();
    match &err {
        SdkError::TimeoutError(_) => TransportError::Timeout(detail),
        SdkError::DispatchFailure(failure) if failure.is_timeout() => {
            TransportError::Timeout(detail)
        }
        SdkError::DispatchFailure(_) => TransportError::Connection(detail),
        SdkError::ServiceError(service) => TransportError::Rejected {
            status: service.raw().status().as_u16(),
            body: format!(
                "{}: {}",
                service.err().code().unwrap_or("Unknown"),
                service.err().message().unwrap_or_default()
            ),
        },
        _ => TransportError::PublishFailed(detail),
    }
}

#[async_trait]
impl QueueTransport for SqsTransport {
    fn name(&self) -> &'static str {
        "sqs"
    }

    #[instrument(skip(self, message), fields(
        endpoint_id = %message.endpoint_id,
        org_id = %message.org_id
    ))]
    async fn publish(&self, message: &ScanJobMessage) -> Result<MessageId, TransportError> {
        let queue_url = self.queue_url()?;
        let body = message.to_json()?;
        let client = self.client.get_or_init(|| self.build_client()).await;

        let output = client
            .send_message()
            .queue_url(queue_url)
            .message_body(body)
            .send()
            .await
            .map_err(map_send_error)?;

        let message_id = output.message_id().ok_or_else(|| {
            TransportError::PublishFailed("SendMessage response carried no MessageId".to_string())
        })?;

        debug!(message_id = %message_id, "SQS accepted message");
        Ok(MessageId(message_id.to_string()))
    }
}
