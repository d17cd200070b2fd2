use std::sync::Arc;

use crate::config::DeliveryConfig;
use crate::error::DeliveryError;
use crate::signing::signature_for_payload;
use crate::transport::{DeliveryResult, OutboundMessage, TransportKind};
use crate::transport_http::HttpTransport;
use crate::transport_pubsub::{PubSubTransport, RestTopicPublisher, TopicPublisher};
use crate::transport_sqs::{QueueClient, SqsTransport};

/// Routes a signed payload to the adapter matching the target's scheme.
#[derive(Clone)]
pub struct Router {
    http: HttpTransport,
    sqs: SqsTransport,
    pubsub: PubSubTransport,
    config: DeliveryConfig,
}

impl Router {
    /// Router with the default backend for every transport.
    pub fn new(config: DeliveryConfig) -> Self {
        let client = reqwest::Client::new();
        let publisher: Arc<dyn TopicPublisher> = Arc::new(RestTopicPublisher::new(
            client.clone(),
            config.pubsub_endpoint.clone(),
            config.pubsub_token.clone(),
        ));
        Self::with_backends(
            config.clone(),
            HttpTransport::with_client(client, config.header_vendor.clone()),
            default_queue_client(),
            publisher,
        )
    }

    /// Router with explicit transport backends.
    pub fn with_backends(
        config: DeliveryConfig,
        http: HttpTransport,
        queue_client: Arc<dyn QueueClient>,
        publisher: Arc<dyn TopicPublisher>,
    ) -> Self {
        Self {
            http,
            sqs: SqsTransport::new(queue_client, config.timeout),
            pubsub: PubSubTransport::new(publisher, config.timeout),
            config,
        }
    }

    pub fn http(&self) -> &HttpTransport {
        &self.http
    }

    /// Sign and send a payload.
    ///
    /// Transport failures come back as a failed [`DeliveryResult`]; only an
    /// unsupported scheme is an error.
    pub async fn dispatch(
        &self,
        target_url: &str,
        domain: &str,
        secret: Option<&str>,
        event_type: &str,
        payload: &str,
    ) -> Result<DeliveryResult, DeliveryError> {
        let (kind, url) = TransportKind::for_target(target_url)?;
        let body = payload.as_bytes();
        let signature = signature_for_payload(body, secret);
        let message = OutboundMessage {
            body,
            domain,
            signature: signature.as_deref(),
            event_type,
        };

        let sent = match kind {
            TransportKind::Http | TransportKind::Https => {
                self.http.send(target_url, message, self.config.timeout).await
            }
            TransportKind::AwsSqs => self.sqs.send(&url, message).await,
            TransportKind::GcPubSub => self.pubsub.send(&url, message).await,
        };

        Ok(sent.unwrap_or_else(|err| {
            tracing::debug!(
                target: "webhook_delivery",
                transport = %kind,
                error = %err,
                "Transport call failed"
            );
            DeliveryResult::failed(err.to_string())
        }))
    }
}

#[cfg(feature = "sqs")]
fn default_queue_client() -> Arc<dyn QueueClient> {
    Arc::new(crate::transport_sqs::SqsQueueClient::new())
}

#[cfg(not(feature = "sqs"))]
fn default_queue_client() -> Arc<dyn QueueClient> {
    Arc::new(crate::transport_sqs::UnavailableQueueClient)
}
