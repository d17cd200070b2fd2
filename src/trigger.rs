use std::sync::Arc;

use serde_json::Value;

use crate::error::DeliveryError;
use crate::queue::{DeliveryJob, JobQueue};
use crate::registry::{
    EndpointDirectory, EndpointScope, RenderContext, SubscribableEvents, SubscriptionRenderer,
};
use crate::storage::Storage;
use crate::telemetry::metric_inc_event;
use crate::types::{DeliveryId, EventDelivery, EventPayload, Webhook};

/// Expands one event into per-webhook deliveries and queues them.
pub struct EventTrigger {
    storage: Arc<dyn Storage>,
    queue: Arc<dyn JobQueue>,
    directory: Arc<dyn EndpointDirectory>,
    subscribable: Arc<dyn SubscribableEvents>,
    renderer: Arc<dyn SubscriptionRenderer>,
}

/// Split webhooks into raw-payload and subscription-driven ones.
pub fn group_webhooks_by_subscription(
    webhooks: &[Arc<Webhook>],
) -> (Vec<Arc<Webhook>>, Vec<Arc<Webhook>>) {
    webhooks
        .iter()
        .cloned()
        .partition(|webhook| !webhook.is_subscription())
}

fn is_empty_payload(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

impl EventTrigger {
    pub fn new(
        storage: Arc<dyn Storage>,
        queue: Arc<dyn JobQueue>,
        directory: Arc<dyn EndpointDirectory>,
        subscribable: Arc<dyn SubscribableEvents>,
        renderer: Arc<dyn SubscriptionRenderer>,
    ) -> Self {
        Self {
            storage,
            queue,
            directory,
            subscribable,
            renderer,
        }
    }

    /// Build one payload and delivery per subscription webhook.
    ///
    /// Webhooks whose query renders nothing are skipped.
    pub async fn create_deliveries_for_subscriptions(
        &self,
        event_type: &str,
        source: Option<&Value>,
        webhooks: &[Arc<Webhook>],
        requestor: Option<&str>,
    ) -> (Vec<Arc<EventPayload>>, Vec<EventDelivery>) {
        let mut payloads = Vec::new();
        let mut deliveries = Vec::new();

        if !self.subscribable.is_subscribable(event_type) {
            tracing::info!(
                target: "webhook_delivery",
                event_type = %event_type,
                "Skipping subscription webhook. Event is not subscribable"
            );
            return (payloads, deliveries);
        }

        let Some(source) = source else {
            tracing::warn!(
                target: "webhook_delivery",
                event_type = %event_type,
                webhooks = webhooks.len(),
                "Skipping subscription webhooks. No subscribable object given"
            );
            return (payloads, deliveries);
        };

        let context = RenderContext::new(requestor);
        for webhook in webhooks {
            let Some(query) = webhook.subscription_query.as_deref() else {
                continue;
            };
            let rendered = self
                .renderer
                .render(event_type, source, query, &context, &webhook.app)
                .await;

            let data = match rendered {
                Some(data) if !is_empty_payload(&data) => data,
                _ => {
                    tracing::warn!(
                        target: "webhook_delivery",
                        event_type = %event_type,
                        webhook_id = %webhook.id,
                        "No payload was generated with subscription"
                    );
                    continue;
                }
            };

            let payload = Arc::new(EventPayload::new(data.to_string()));
            deliveries.push(EventDelivery::new(event_type, payload.clone(), webhook.id));
            payloads.push(payload);
        }

        (payloads, deliveries)
    }

    /// Create deliveries for every given webhook and queue them.
    ///
    /// Raw webhooks share one payload built from `data`; subscription
    /// webhooks each get their own rendered from `source`. Returns the
    /// queued delivery ids. Does not wait for any delivery outcome.
    ///
    /// Deliveries are stored before queueing. If the queue rejects a job,
    /// the error names the delivery ids that were stored but not queued.
    pub async fn trigger_webhooks_async(
        &self,
        data: &str,
        event_type: &str,
        webhooks: &[Arc<Webhook>],
        source: Option<&Value>,
        requestor: Option<&str>,
    ) -> Result<Vec<DeliveryId>, DeliveryError> {
        let (regular, subscription) = group_webhooks_by_subscription(webhooks);
        let mut payloads = Vec::new();
        let mut deliveries = Vec::new();

        if !regular.is_empty() {
            let payload = Arc::new(EventPayload::new(data));
            deliveries.extend(
                regular
                    .iter()
                    .map(|webhook| EventDelivery::new(event_type, payload.clone(), webhook.id)),
            );
            payloads.push(payload);
        }

        if !subscription.is_empty() {
            let (rendered_payloads, rendered_deliveries) = self
                .create_deliveries_for_subscriptions(event_type, source, &subscription, requestor)
                .await;
            payloads.extend(rendered_payloads);
            deliveries.extend(rendered_deliveries);
        }

        if deliveries.is_empty() {
            return Ok(Vec::new());
        }

        self.storage.bulk_create(&payloads, &deliveries).await?;

        let mut queued = Vec::with_capacity(deliveries.len());
        for (index, delivery) in deliveries.iter().enumerate() {
            if let Err(source) = self.queue.submit(DeliveryJob::new(delivery.id), None).await {
                let unqueued: Vec<DeliveryId> = deliveries[index..].iter().map(|d| d.id).collect();
                tracing::error!(
                    target: "webhook_delivery",
                    event_type = %event_type,
                    queued = ?queued,
                    unqueued = ?unqueued,
                    error = %source,
                    "Failed to queue event deliveries; unqueued deliveries stay pending"
                );
                return Err(DeliveryError::PartiallyQueued {
                    queued,
                    unqueued,
                    source,
                });
            }
            queued.push(delivery.id);
        }

        metric_inc_event("webhook.fanout.deliveries", event_type);
        tracing::debug!(
            target: "webhook_delivery",
            event_type = %event_type,
            deliveries = queued.len(),
            "Queued event deliveries"
        );
        Ok(queued)
    }

    /// Resolve the webhooks listening to `event_type` and trigger them.
    pub async fn trigger_for_event(
        &self,
        event_type: &str,
        data: &str,
        source: Option<&Value>,
        requestor: Option<&str>,
    ) -> Result<Vec<DeliveryId>, DeliveryError> {
        let webhooks = self
            .directory
            .webhooks_for_event(event_type, EndpointScope::All)
            .await;
        self.trigger_webhooks_async(data, event_type, &webhooks, source, requestor)
            .await
    }
}
