use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;
use tokio::task::JoinHandle;
use url::Url;

use crate::error::TransportError;
use crate::transport::{DeliveryResult, OutboundMessage};

/// Largest message body Pub/Sub accepts.
pub const MAX_MESSAGE_BYTES: usize = 10 * 1024 * 1024;

/// Message published to a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PubSubMessage {
    pub data: Vec<u8>,
    pub attributes: BTreeMap<String, String>,
}

/// In-flight publish resolving to the broker's message id.
pub type PendingPublish = JoinHandle<Result<String, TransportError>>;

/// Publisher for a pub/sub topic.
pub trait TopicPublisher: Send + Sync {
    /// Start publishing a message. The returned handle completes once the
    /// broker acknowledges it.
    fn publish(&self, topic: &str, message: PubSubMessage) -> Result<PendingPublish, TransportError>;
}

/// Publisher speaking the Pub/Sub REST API.
#[derive(Debug, Clone)]
pub struct RestTopicPublisher {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublishResponse {
    #[serde(default)]
    message_ids: Vec<String>,
}

impl RestTopicPublisher {
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            token,
        }
    }

    fn publish_url(&self, topic: &str) -> String {
        format!("{}/v1/{}:publish", self.endpoint.trim_end_matches('/'), topic)
    }
}

impl TopicPublisher for RestTopicPublisher {
    fn publish(&self, topic: &str, message: PubSubMessage) -> Result<PendingPublish, TransportError> {
        if message.data.len() > MAX_MESSAGE_BYTES {
            return Err(TransportError::MessageTooLarge {
                size: message.data.len(),
                limit: MAX_MESSAGE_BYTES,
            });
        }

        let body = serde_json::json!({
            "messages": [{
                "data": STANDARD.encode(&message.data),
                "attributes": message.attributes,
            }]
        });
        let mut request = self.client.post(self.publish_url(topic)).json(&body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        Ok(tokio::spawn(send_publish(request)))
    }
}

async fn send_publish(request: reqwest::RequestBuilder) -> Result<String, TransportError> {
    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(TransportError::Publish(format!("{status}: {text}")));
    }

    let ack: PublishResponse = response.json().await?;
    ack.message_ids
        .into_iter()
        .next()
        .ok_or_else(|| TransportError::Publish("publish response carried no message id".to_string()))
}

/// Pub/sub adapter.
#[derive(Clone)]
pub struct PubSubTransport {
    publisher: Arc<dyn TopicPublisher>,
    timeout: Duration,
}

impl PubSubTransport {
    pub fn new(publisher: Arc<dyn TopicPublisher>, timeout: Duration) -> Self {
        Self { publisher, timeout }
    }

    /// Topic name: the URL path without its leading `/`.
    pub fn topic_name(url: &Url) -> Result<String, TransportError> {
        let topic = url.path().trim_start_matches('/');
        if topic.is_empty() {
            return Err(TransportError::InvalidTarget(
                "pub/sub url has no topic path".to_string(),
            ));
        }
        Ok(topic.to_string())
    }

    pub fn build_message(message: &OutboundMessage<'_>) -> PubSubMessage {
        let mut attributes = BTreeMap::new();
        attributes.insert("domain".to_string(), message.domain.to_string());
        attributes.insert("eventType".to_string(), message.event_type.to_string());
        if let Some(signature) = message.signature {
            attributes.insert("signature".to_string(), signature.to_string());
        }
        PubSubMessage {
            data: message.body.to_vec(),
            attributes,
        }
    }

    /// Publish and wait for the acknowledgment.
    ///
    /// The reported duration covers the publish call only.
    pub async fn send(
        &self,
        url: &Url,
        message: OutboundMessage<'_>,
    ) -> Result<DeliveryResult, TransportError> {
        let topic = Self::topic_name(url)?;

        let started = Instant::now();
        let pending = self.publisher.publish(&topic, Self::build_message(&message))?;
        let duration = started.elapsed();

        let message_id = tokio::time::timeout(self.timeout, pending)
            .await
            .map_err(|_| TransportError::Timeout(self.timeout))?
            .map_err(|join| TransportError::Runtime(join.to_string()))??;

        Ok(DeliveryResult::success(message_id, duration))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_is_path_without_leading_slash() {
        let url = Url::parse("gcpubsub://cloud.google.com/projects/p/topics/orders").unwrap();
        assert_eq!(PubSubTransport::topic_name(&url).unwrap(), "projects/p/topics/orders");
    }

    #[test]
    fn empty_topic_is_invalid() {
        let url = Url::parse("gcpubsub://cloud.google.com/").unwrap();
        assert!(matches!(
            PubSubTransport::topic_name(&url),
            Err(TransportError::InvalidTarget(_))
        ));
    }

    #[test]
    fn attributes_carry_domain_event_and_signature() {
        let message = PubSubTransport::build_message(&OutboundMessage {
            body: b"{}",
            domain: "shop.example.com",
            signature: Some("abc"),
            event_type: "order_created",
        });
        assert_eq!(message.attributes["domain"], "shop.example.com");
        assert_eq!(message.attributes["eventType"], "order_created");
        assert_eq!(message.attributes["signature"], "abc");
        assert_eq!(message.data, b"{}");
    }

    #[tokio::test]
    async fn oversized_message_is_rejected_before_sending() {
        let publisher = RestTopicPublisher::new(reqwest::Client::new(), "http://127.0.0.1:1", None);
        let message = PubSubMessage {
            data: vec![b'x'; MAX_MESSAGE_BYTES + 1],
            attributes: BTreeMap::new(),
        };
        let err = publisher.publish("projects/p/topics/t", message).unwrap_err();
        assert!(matches!(err, TransportError::MessageTooLarge { .. }));
    }
}
