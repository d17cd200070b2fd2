use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::StorageError;
use crate::transport::DeliveryResult;
use crate::types::{
    AttemptId, DeliveryAttempt, DeliveryId, EventDelivery, EventDeliveryStatus, EventPayload,
    JobId, PayloadId,
};

/// Persistence for payloads, deliveries and attempts.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Persist payloads and the deliveries referencing them.
    /// Either every row becomes visible or none does.
    async fn bulk_create(
        &self,
        payloads: &[Arc<EventPayload>],
        deliveries: &[EventDelivery],
    ) -> Result<(), StorageError>;

    async fn get_delivery(&self, id: &DeliveryId) -> Result<Option<EventDelivery>, StorageError>;

    /// Append a pending attempt to a delivery.
    async fn create_attempt(
        &self,
        delivery_id: &DeliveryId,
        task_id: Option<JobId>,
    ) -> Result<DeliveryAttempt, StorageError>;

    /// Fill an attempt's result fields. Returns `false` if it already had them.
    async fn complete_attempt(
        &self,
        attempt_id: &AttemptId,
        result: &DeliveryResult,
    ) -> Result<bool, StorageError>;

    /// Move a pending delivery to a terminal status.
    /// Returns `false` if the delivery was already terminal.
    async fn finalize_delivery(
        &self,
        id: &DeliveryId,
        status: EventDeliveryStatus,
    ) -> Result<bool, StorageError>;

    /// Attempts of a delivery in creation order.
    async fn attempts_for(&self, delivery_id: &DeliveryId) -> Result<Vec<DeliveryAttempt>, StorageError>;

    /// Remove a successful delivery with its attempts, and its payload when
    /// no other delivery shares it. Returns `false` for non-successful ones.
    async fn clear_successful_delivery(&self, id: &DeliveryId) -> Result<bool, StorageError>;
}

impl DeliveryAttempt {
    /// Copy a transport result into the attempt's result fields.
    pub(crate) fn record(&mut self, result: &DeliveryResult) {
        self.status = result.status;
        self.duration = Some(result.duration);
        self.response = Some(result.content.clone());
        self.request_headers = result.request_headers.clone();
        self.response_headers = result.response_headers.clone();
        self.response_status_code = result.response_status_code;
    }
}

#[derive(Default)]
struct Records {
    payloads: HashMap<PayloadId, Arc<EventPayload>>,
    deliveries: HashMap<DeliveryId, EventDelivery>,
    attempts: HashMap<AttemptId, DeliveryAttempt>,
    attempt_order: HashMap<DeliveryId, Vec<AttemptId>>,
}

/// In-memory storage for lightweight deployments and tests.
#[derive(Default)]
pub struct InMemoryStorage {
    records: Mutex<Records>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn delivery_count(&self) -> usize {
        self.records.lock().await.deliveries.len()
    }

    pub async fn payload_count(&self) -> usize {
        self.records.lock().await.payloads.len()
    }

    /// Every stored delivery, in no particular order.
    pub async fn deliveries(&self) -> Vec<EventDelivery> {
        self.records.lock().await.deliveries.values().cloned().collect()
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn bulk_create(
        &self,
        payloads: &[Arc<EventPayload>],
        deliveries: &[EventDelivery],
    ) -> Result<(), StorageError> {
        let mut records = self.records.lock().await;

        let batch_payloads: HashSet<PayloadId> = payloads.iter().map(|p| p.id).collect();
        for delivery in deliveries {
            if records.deliveries.contains_key(&delivery.id) {
                return Err(StorageError::Backend(format!(
                    "delivery {} already exists",
                    delivery.id
                )));
            }
            let payload_id = delivery.payload.id;
            if !batch_payloads.contains(&payload_id) && !records.payloads.contains_key(&payload_id) {
                return Err(StorageError::Backend(format!(
                    "delivery {} references unsaved payload {}",
                    delivery.id, payload_id
                )));
            }
        }

        for payload in payloads {
            records.payloads.insert(payload.id, payload.clone());
        }
        for delivery in deliveries {
            records.deliveries.insert(delivery.id, delivery.clone());
        }
        Ok(())
    }

    async fn get_delivery(&self, id: &DeliveryId) -> Result<Option<EventDelivery>, StorageError> {
        Ok(self.records.lock().await.deliveries.get(id).cloned())
    }

    async fn create_attempt(
        &self,
        delivery_id: &DeliveryId,
        task_id: Option<JobId>,
    ) -> Result<DeliveryAttempt, StorageError> {
        let mut records = self.records.lock().await;
        if !records.deliveries.contains_key(delivery_id) {
            return Err(StorageError::DeliveryNotFound(*delivery_id));
        }

        let attempt = DeliveryAttempt::new(*delivery_id, task_id);
        records.attempts.insert(attempt.id, attempt.clone());
        records
            .attempt_order
            .entry(*delivery_id)
            .or_default()
            .push(attempt.id);
        Ok(attempt)
    }

    async fn complete_attempt(
        &self,
        attempt_id: &AttemptId,
        result: &DeliveryResult,
    ) -> Result<bool, StorageError> {
        let mut records = self.records.lock().await;
        let attempt = records
            .attempts
            .get_mut(attempt_id)
            .ok_or(StorageError::AttemptNotFound(*attempt_id))?;
        if attempt.is_completed() {
            return Ok(false);
        }
        attempt.record(result);
        Ok(true)
    }

    async fn finalize_delivery(
        &self,
        id: &DeliveryId,
        status: EventDeliveryStatus,
    ) -> Result<bool, StorageError> {
        let mut records = self.records.lock().await;
        let delivery = records
            .deliveries
            .get_mut(id)
            .ok_or(StorageError::DeliveryNotFound(*id))?;
        if !status.is_terminal() || delivery.status.is_terminal() {
            return Ok(false);
        }
        delivery.status = status;
        Ok(true)
    }

    async fn attempts_for(&self, delivery_id: &DeliveryId) -> Result<Vec<DeliveryAttempt>, StorageError> {
        let records = self.records.lock().await;
        let attempts = records
            .attempt_order
            .get(delivery_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| records.attempts.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default();
        Ok(attempts)
    }

    async fn clear_successful_delivery(&self, id: &DeliveryId) -> Result<bool, StorageError> {
        let mut records = self.records.lock().await;
        let payload_id = match records.deliveries.get(id) {
            Some(d) if d.status == EventDeliveryStatus::Success => d.payload.id,
            _ => return Ok(false),
        };

        records.deliveries.remove(id);
        for attempt_id in records.attempt_order.remove(id).unwrap_or_default() {
            records.attempts.remove(&attempt_id);
        }
        let shared = records
            .deliveries
            .values()
            .any(|d| d.payload.id == payload_id);
        if !shared {
            records.payloads.remove(&payload_id);
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::WebhookId;
    use std::time::Duration;

    fn delivery(payload: &Arc<EventPayload>) -> EventDelivery {
        EventDelivery::new("order_created", payload.clone(), WebhookId::new())
    }

    #[tokio::test]
    async fn bulk_create_is_all_or_nothing() {
        let storage = InMemoryStorage::new();
        let saved = Arc::new(EventPayload::new("{}"));
        let unsaved = Arc::new(EventPayload::new("{}"));

        let result = storage
            .bulk_create(&[saved.clone()], &[delivery(&saved), delivery(&unsaved)])
            .await;
        assert!(result.is_err());
        assert_eq!(storage.delivery_count().await, 0);
        assert_eq!(storage.payload_count().await, 0);
    }

    #[tokio::test]
    async fn terminal_status_is_set_once() {
        let storage = InMemoryStorage::new();
        let payload = Arc::new(EventPayload::new("{}"));
        let d = delivery(&payload);
        storage.bulk_create(&[payload], &[d.clone()]).await.unwrap();

        assert!(storage.finalize_delivery(&d.id, EventDeliveryStatus::Success).await.unwrap());
        assert!(!storage.finalize_delivery(&d.id, EventDeliveryStatus::Failed).await.unwrap());
        let stored = storage.get_delivery(&d.id).await.unwrap().unwrap();
        assert_eq!(stored.status, EventDeliveryStatus::Success);
    }

    #[tokio::test]
    async fn attempt_results_are_write_once() {
        let storage = InMemoryStorage::new();
        let payload = Arc::new(EventPayload::new("{}"));
        let d = delivery(&payload);
        storage.bulk_create(&[payload], &[d.clone()]).await.unwrap();

        let attempt = storage.create_attempt(&d.id, None).await.unwrap();
        let first = DeliveryResult::success("ok", Duration::from_millis(5));
        let second = DeliveryResult::failed("late");
        assert!(storage.complete_attempt(&attempt.id, &first).await.unwrap());
        assert!(!storage.complete_attempt(&attempt.id, &second).await.unwrap());

        let attempts = storage.attempts_for(&d.id).await.unwrap();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].response.as_deref(), Some("ok"));
        assert_eq!(attempts[0].status, EventDeliveryStatus::Success);
    }

    #[tokio::test]
    async fn clearing_keeps_shared_payloads() {
        let storage = InMemoryStorage::new();
        let payload = Arc::new(EventPayload::new("{}"));
        let a = delivery(&payload);
        let b = delivery(&payload);
        storage.bulk_create(&[payload], &[a.clone(), b.clone()]).await.unwrap();
        storage.create_attempt(&a.id, None).await.unwrap();

        assert!(!storage.clear_successful_delivery(&a.id).await.unwrap());
        storage.finalize_delivery(&a.id, EventDeliveryStatus::Success).await.unwrap();
        assert!(storage.clear_successful_delivery(&a.id).await.unwrap());

        assert!(storage.get_delivery(&a.id).await.unwrap().is_none());
        assert!(storage.attempts_for(&a.id).await.unwrap().is_empty());
        assert_eq!(storage.payload_count().await, 1);
    }
}
