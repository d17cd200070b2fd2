use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::Instrument;

use crate::config::DeliveryConfig;
use crate::error::DeliveryError;
use crate::registry::{EndpointDirectory, EndpointScope, SiteDomain};
use crate::signing::signature_for_payload;
use crate::storage::Storage;
use crate::telemetry::webhook_span;
use crate::transport::{DeliveryResult, OutboundMessage, TransportKind};
use crate::transport_http::HttpTransport;
use crate::types::{App, EventDelivery, EventDeliveryStatus, EventPayload, Webhook};

/// Single-shot HTTP delivery for callers that need the response.
///
/// There is no retry: the caller blocks on the answer.
pub struct SyncDelivery {
    storage: Arc<dyn Storage>,
    http: HttpTransport,
    directory: Arc<dyn EndpointDirectory>,
    site: Arc<dyn SiteDomain>,
    timeout: Duration,
    prune_successful: bool,
}

impl SyncDelivery {
    pub fn new(
        config: &DeliveryConfig,
        storage: Arc<dyn Storage>,
        directory: Arc<dyn EndpointDirectory>,
        site: Arc<dyn SiteDomain>,
    ) -> Self {
        Self {
            storage,
            http: HttpTransport::new(config.header_vendor.clone()),
            directory,
            site,
            timeout: config.sync_timeout,
            prune_successful: config.prune_successful,
        }
    }

    /// Replace the HTTP transport, e.g. to share a client.
    pub fn with_http(mut self, http: HttpTransport) -> Self {
        self.http = http;
        self
    }

    /// Deliver `data` to the app's first webhook for `event_type` and
    /// return its JSON response.
    ///
    /// `Ok(None)` means the webhook did not answer successfully.
    pub async fn trigger_webhook_sync(
        &self,
        event_type: &str,
        data: &str,
        app: &App,
        timeout: Option<Duration>,
    ) -> Result<Option<Value>, DeliveryError> {
        let webhook = self
            .directory
            .webhooks_for_event(event_type, EndpointScope::App(app.id))
            .await
            .into_iter()
            .next()
            .ok_or_else(|| DeliveryError::NoEndpoint {
                event_type: event_type.to_string(),
            })?;

        let payload = Arc::new(EventPayload::new(data));
        let delivery = EventDelivery::new(event_type, payload.clone(), webhook.id);
        self.storage
            .bulk_create(&[payload], std::slice::from_ref(&delivery))
            .await?;

        self.send_to(&app.name, &webhook, &delivery, timeout)
            .await
    }

    /// Perform the single attempt for a stored delivery.
    ///
    /// A delivery whose webhook was removed or disabled is failed without
    /// an attempt.
    pub async fn send_webhook_request_sync(
        &self,
        app_name: &str,
        delivery: &EventDelivery,
        timeout: Option<Duration>,
    ) -> Result<Option<Value>, DeliveryError> {
        match self.directory.get_webhook(&delivery.webhook_id).await {
            Some(webhook) if webhook.is_active => {
                self.send_to(app_name, &webhook, delivery, timeout).await
            }
            current => {
                tracing::warn!(
                    target: "webhook_delivery",
                    delivery_id = %delivery.id,
                    webhook_id = %delivery.webhook_id,
                    removed = current.is_none(),
                    "Event delivery webhook is disabled"
                );
                self.fail_delivery(delivery).await?;
                Ok(None)
            }
        }
    }

    async fn send_to(
        &self,
        app_name: &str,
        webhook: &Webhook,
        delivery: &EventDelivery,
        timeout: Option<Duration>,
    ) -> Result<Option<Value>, DeliveryError> {
        let domain = self.site.current_domain();

        let kind = match TransportKind::for_target(&webhook.target_url) {
            Ok((kind, _)) if kind.is_http() => kind,
            Ok((kind, _)) => {
                self.fail_delivery(delivery).await?;
                return Err(DeliveryError::UnsupportedScheme {
                    scheme: kind.as_str().to_string(),
                });
            }
            Err(err) => {
                self.fail_delivery(delivery).await?;
                return Err(err);
            }
        };

        tracing::debug!(
            target: "webhook_delivery",
            target_url = %webhook.target_url,
            event_type = %delivery.event_type,
            transport = %kind,
            "Sending payload"
        );

        let attempt = self.storage.create_attempt(&delivery.id, None).await?;
        let body = delivery.payload.payload.as_bytes();
        let signature = signature_for_payload(body, webhook.secret_key.as_deref());
        let message = OutboundMessage {
            body,
            domain: &domain,
            signature: signature.as_deref(),
            event_type: &delivery.event_type,
        };

        let span = webhook_span(&delivery.event_type, &domain, true, app_name);
        let sent = self
            .http
            .send(&webhook.target_url, message, timeout.unwrap_or(self.timeout))
            .instrument(span)
            .await;

        let (result, response_data) = match sent {
            Err(err) => {
                tracing::warn!(
                    target: "webhook_delivery",
                    target_url = %webhook.target_url,
                    attempt_id = %attempt.id,
                    error = %err,
                    "Failed request"
                );
                (DeliveryResult::failed(err.to_string()), None)
            }
            Ok(result) if !result.is_success() => {
                tracing::warn!(
                    target: "webhook_delivery",
                    target_url = %webhook.target_url,
                    attempt_id = %attempt.id,
                    status_code = ?result.response_status_code,
                    "Failed request"
                );
                (result, None)
            }
            Ok(mut result) => match serde_json::from_str::<Value>(&result.content) {
                Ok(data) => {
                    tracing::debug!(
                        target: "webhook_delivery",
                        target_url = %webhook.target_url,
                        attempt_id = %attempt.id,
                        "Success response"
                    );
                    (result, Some(data))
                }
                Err(err) => {
                    tracing::warn!(
                        target: "webhook_delivery",
                        target_url = %webhook.target_url,
                        attempt_id = %attempt.id,
                        error = %err,
                        "Failed parsing JSON response"
                    );
                    result.status = EventDeliveryStatus::Failed;
                    (result, None)
                }
            },
        };

        self.storage.complete_attempt(&attempt.id, &result).await?;
        self.storage
            .finalize_delivery(&delivery.id, result.status)
            .await?;
        if result.is_success() && self.prune_successful {
            self.storage.clear_successful_delivery(&delivery.id).await?;
        }

        Ok(response_data)
    }

    async fn fail_delivery(&self, delivery: &EventDelivery) -> Result<(), DeliveryError> {
        self.storage
            .finalize_delivery(&delivery.id, EventDeliveryStatus::Failed)
            .await?;
        Ok(())
    }
}
