use std::sync::Arc;

use tracing::Instrument;

use crate::config::DeliveryConfig;
use crate::error::DeliveryError;
use crate::policy::{AttemptOutcome, RetryDecision, RetryPolicy};
use crate::queue::{DeliveryJob, JobQueue};
use crate::registry::{EndpointDirectory, SiteDomain};
use crate::router::Router;
use crate::storage::Storage;
use crate::telemetry::{metric_inc, metric_inc_event, webhook_span};
use crate::transport::DeliveryResult;
use crate::types::{AttemptId, EventDelivery, EventDeliveryStatus, Webhook};

/// Runs one attempt cycle of an asynchronous delivery.
///
/// Each call:
/// - Loads the delivery and skips it if gone or already final
/// - Looks up the webhook's current state and fails the delivery if the
///   webhook was removed or disabled
/// - Records exactly one attempt
/// - Finalizes the delivery, or schedules the next cycle with backoff
pub struct DeliveryWorker {
    storage: Arc<dyn Storage>,
    directory: Arc<dyn EndpointDirectory>,
    router: Router,
    queue: Arc<dyn JobQueue>,
    site: Arc<dyn SiteDomain>,
    policy: RetryPolicy,
    prune_successful: bool,
}

impl DeliveryWorker {
    pub fn new(
        config: &DeliveryConfig,
        storage: Arc<dyn Storage>,
        directory: Arc<dyn EndpointDirectory>,
        router: Router,
        queue: Arc<dyn JobQueue>,
        site: Arc<dyn SiteDomain>,
    ) -> Self {
        Self {
            storage,
            directory,
            router,
            queue,
            site,
            policy: RetryPolicy::from_config(config),
            prune_successful: config.prune_successful,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Process one delivery job.
    ///
    /// Errors are storage or queue failures; transport failures are
    /// recorded on the attempt and drive the retry loop instead.
    pub async fn send_webhook_request_async(
        &self,
        job: &DeliveryJob,
    ) -> Result<AttemptOutcome, DeliveryError> {
        let Some(delivery) = self.storage.get_delivery(&job.delivery_id).await? else {
            tracing::error!(
                target: "webhook_delivery",
                delivery_id = %job.delivery_id,
                job_id = %job.job_id,
                "Event delivery not found"
            );
            return Ok(AttemptOutcome::Missing);
        };

        // Redelivered jobs must not revisit a finished delivery.
        if delivery.status.is_terminal() {
            tracing::info!(
                target: "webhook_delivery",
                delivery_id = %delivery.id,
                status = %delivery.status,
                "Event delivery already finalized"
            );
            return Ok(AttemptOutcome::AlreadyFinal(delivery.status));
        }

        let webhook = match self.directory.get_webhook(&delivery.webhook_id).await {
            Some(webhook) if webhook.is_active => webhook,
            current => {
                self.storage
                    .finalize_delivery(&delivery.id, EventDeliveryStatus::Failed)
                    .await?;
                metric_inc("webhook.delivery.disabled");
                tracing::warn!(
                    target: "webhook_delivery",
                    delivery_id = %delivery.id,
                    webhook_id = %delivery.webhook_id,
                    removed = current.is_none(),
                    "Event delivery webhook is disabled"
                );
                return Ok(AttemptOutcome::Disabled);
            }
        };

        let domain = self.site.current_domain();
        let attempt = self
            .storage
            .create_attempt(&delivery.id, Some(job.job_id.clone()))
            .await?;

        let span = webhook_span(&delivery.event_type, &domain, false, &webhook.app.name);
        let dispatched = self
            .router
            .dispatch(
                &webhook.target_url,
                &domain,
                webhook.secret_key.as_deref(),
                &delivery.event_type,
                &delivery.payload.payload,
            )
            .instrument(span)
            .await;

        let result = match dispatched {
            Ok(result) => result,
            Err(err) => {
                let reason = err.to_string();
                self.storage
                    .complete_attempt(&attempt.id, &DeliveryResult::failed(reason.clone()))
                    .await?;
                self.storage
                    .finalize_delivery(&delivery.id, EventDeliveryStatus::Failed)
                    .await?;
                tracing::warn!(
                    target: "webhook_delivery",
                    delivery_id = %delivery.id,
                    webhook_id = %webhook.id,
                    target_url = %webhook.target_url,
                    error = %reason,
                    "Event delivery rejected"
                );
                return Ok(AttemptOutcome::Rejected(reason));
            }
        };

        self.storage.complete_attempt(&attempt.id, &result).await?;

        let outcome = match self.policy.decide(result.status, job.retries) {
            RetryDecision::Complete => {
                tracing::info!(
                    target: "webhook_delivery",
                    webhook_id = %webhook.id,
                    target_url = %webhook.target_url,
                    event_type = %delivery.event_type,
                    delivery_id = %delivery.id,
                    "Payload sent"
                );
                metric_inc_event("webhook.delivery.success", &delivery.event_type);
                self.storage
                    .finalize_delivery(&delivery.id, EventDeliveryStatus::Success)
                    .await?;
                AttemptOutcome::Delivered
            }
            RetryDecision::Retry { countdown } => {
                self.log_failed_attempt(&delivery, &webhook, &result, &attempt.id);
                let countdown = self.policy.jittered(countdown);
                self.queue.submit(job.retry(), Some(countdown)).await?;
                metric_inc("webhook.delivery.retry_scheduled");
                AttemptOutcome::RetryScheduled {
                    countdown,
                    retries_remaining: self.policy.retries_remaining(job.retries + 1),
                }
            }
            RetryDecision::Exhausted => {
                self.log_failed_attempt(&delivery, &webhook, &result, &attempt.id);
                tracing::warn!(
                    target: "webhook_delivery",
                    webhook_id = %webhook.id,
                    target_url = %webhook.target_url,
                    delivery_id = %delivery.id,
                    retries = job.retries,
                    "Failed request: exceeded retry limit"
                );
                metric_inc("webhook.delivery.exhausted");
                self.storage
                    .finalize_delivery(&delivery.id, EventDeliveryStatus::Failed)
                    .await?;
                AttemptOutcome::Exhausted
            }
        };

        if outcome == AttemptOutcome::Delivered && self.prune_successful {
            self.storage.clear_successful_delivery(&delivery.id).await?;
        }

        Ok(outcome)
    }

    fn log_failed_attempt(
        &self,
        delivery: &EventDelivery,
        webhook: &Webhook,
        result: &DeliveryResult,
        attempt_id: &AttemptId,
    ) {
        metric_inc_event("webhook.delivery.failure", &delivery.event_type);
        tracing::info!(
            target: "webhook_delivery",
            webhook_id = %webhook.id,
            target_url = %webhook.target_url,
            event_type = %delivery.event_type,
            attempt_id = %attempt_id,
            response = %result.content,
            "Failed request"
        );
    }
}
