use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_postgres::{Client, Row};
use uuid::Uuid;

use crate::error::StorageError;
use crate::storage::Storage;
use crate::transport::DeliveryResult;
use crate::types::{
    AttemptId, DeliveryAttempt, DeliveryId, EventDelivery, EventDeliveryStatus, EventPayload,
    JobId, PayloadId, WebhookId,
};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS webhook_event_payloads (
    id UUID PRIMARY KEY,
    payload TEXT NOT NULL,
    created_at BIGINT NOT NULL
);
CREATE TABLE IF NOT EXISTS webhook_event_deliveries (
    id UUID PRIMARY KEY,
    event_type TEXT NOT NULL,
    status TEXT NOT NULL,
    payload_id UUID NOT NULL REFERENCES webhook_event_payloads (id),
    webhook_id UUID NOT NULL,
    created_at BIGINT NOT NULL
);
CREATE TABLE IF NOT EXISTS webhook_delivery_attempts (
    id UUID PRIMARY KEY,
    seq BIGSERIAL,
    delivery_id UUID NOT NULL REFERENCES webhook_event_deliveries (id) ON DELETE CASCADE,
    completed BOOLEAN NOT NULL DEFAULT FALSE,
    record JSONB NOT NULL
);
";

/// Postgres-backed storage.
pub struct PostgresStorage {
    client: Mutex<Client>,
}

fn backend(err: tokio_postgres::Error) -> StorageError {
    StorageError::Backend(err.to_string())
}

impl PostgresStorage {
    /// Wrap a connected client, creating the tables if needed.
    pub async fn new(client: Client) -> Result<Self, tokio_postgres::Error> {
        client.batch_execute(SCHEMA).await?;
        Ok(Self {
            client: Mutex::new(client),
        })
    }

    fn delivery_from_row(row: &Row) -> Result<EventDelivery, StorageError> {
        let status: String = row.try_get(2).map_err(backend)?;
        let status = EventDeliveryStatus::parse(&status)
            .ok_or_else(|| StorageError::Backend(format!("unknown delivery status {status:?}")))?;
        let payload = EventPayload {
            id: PayloadId(row.try_get(5).map_err(backend)?),
            payload: row.try_get(6).map_err(backend)?,
            created_at_secs: row.try_get::<_, i64>(7).map_err(backend)? as u64,
        };

        Ok(EventDelivery {
            id: DeliveryId(row.try_get(0).map_err(backend)?),
            event_type: row.try_get(1).map_err(backend)?,
            status,
            payload: Arc::new(payload),
            webhook_id: WebhookId(row.try_get(3).map_err(backend)?),
            created_at_secs: row.try_get::<_, i64>(4).map_err(backend)? as u64,
        })
    }
}

#[async_trait]
impl Storage for PostgresStorage {
    async fn bulk_create(
        &self,
        payloads: &[Arc<EventPayload>],
        deliveries: &[EventDelivery],
    ) -> Result<(), StorageError> {
        let mut client = self.client.lock().await;
        let tx = client.transaction().await.map_err(backend)?;

        for payload in payloads {
            tx.execute(
                "INSERT INTO webhook_event_payloads (id, payload, created_at)
                 VALUES ($1, $2, $3)
                 ON CONFLICT (id) DO NOTHING",
                &[&payload.id.0, &payload.payload, &(payload.created_at_secs as i64)],
            )
            .await
            .map_err(backend)?;
        }

        for delivery in deliveries {
            tx.execute(
                "INSERT INTO webhook_event_deliveries
                    (id, event_type, status, payload_id, webhook_id, created_at)
                 VALUES ($1, $2, $3, $4, $5, $6)",
                &[
                    &delivery.id.0,
                    &delivery.event_type,
                    &delivery.status.as_str(),
                    &delivery.payload.id.0,
                    &delivery.webhook_id.0,
                    &(delivery.created_at_secs as i64),
                ],
            )
            .await
            .map_err(backend)?;
        }

        tx.commit().await.map_err(backend)
    }

    async fn get_delivery(&self, id: &DeliveryId) -> Result<Option<EventDelivery>, StorageError> {
        let client = self.client.lock().await;
        let row = client
            .query_opt(
                "SELECT d.id, d.event_type, d.status, d.webhook_id, d.created_at,
                        p.id, p.payload, p.created_at
                 FROM webhook_event_deliveries d
                 JOIN webhook_event_payloads p ON p.id = d.payload_id
                 WHERE d.id = $1",
                &[&id.0],
            )
            .await
            .map_err(backend)?;

        row.as_ref().map(Self::delivery_from_row).transpose()
    }

    async fn create_attempt(
        &self,
        delivery_id: &DeliveryId,
        task_id: Option<JobId>,
    ) -> Result<DeliveryAttempt, StorageError> {
        let attempt = DeliveryAttempt::new(*delivery_id, task_id);
        let record = serde_json::to_value(&attempt)?;

        let client = self.client.lock().await;
        let inserted = client
            .execute(
                "INSERT INTO webhook_delivery_attempts (id, delivery_id, completed, record)
                 SELECT $1::uuid, $2::uuid, FALSE, $3::jsonb
                 WHERE EXISTS (SELECT 1 FROM webhook_event_deliveries WHERE id = $2::uuid)",
                &[&attempt.id.0, &delivery_id.0, &record],
            )
            .await
            .map_err(backend)?;

        if inserted == 0 {
            return Err(StorageError::DeliveryNotFound(*delivery_id));
        }
        Ok(attempt)
    }

    async fn complete_attempt(
        &self,
        attempt_id: &AttemptId,
        result: &DeliveryResult,
    ) -> Result<bool, StorageError> {
        let client = self.client.lock().await;
        let row = client
            .query_opt(
                "SELECT record FROM webhook_delivery_attempts WHERE id = $1",
                &[&attempt_id.0],
            )
            .await
            .map_err(backend)?
            .ok_or(StorageError::AttemptNotFound(*attempt_id))?;

        let record: serde_json::Value = row.try_get(0).map_err(backend)?;
        let mut attempt: DeliveryAttempt = serde_json::from_value(record)?;
        if attempt.is_completed() {
            return Ok(false);
        }
        attempt.record(result);

        let updated = client
            .execute(
                "UPDATE webhook_delivery_attempts
                 SET completed = TRUE, record = $2
                 WHERE id = $1 AND NOT completed",
                &[&attempt_id.0, &serde_json::to_value(&attempt)?],
            )
            .await
            .map_err(backend)?;
        Ok(updated == 1)
    }

    async fn finalize_delivery(
        &self,
        id: &DeliveryId,
        status: EventDeliveryStatus,
    ) -> Result<bool, StorageError> {
        let client = self.client.lock().await;
        if status.is_terminal() {
            let updated = client
                .execute(
                    "UPDATE webhook_event_deliveries SET status = $2
                     WHERE id = $1 AND status = 'pending'",
                    &[&id.0, &status.as_str()],
                )
                .await
                .map_err(backend)?;
            if updated == 1 {
                return Ok(true);
            }
        }

        let exists = client
            .query_opt("SELECT 1 FROM webhook_event_deliveries WHERE id = $1", &[&id.0])
            .await
            .map_err(backend)?;
        match exists {
            Some(_) => Ok(false),
            None => Err(StorageError::DeliveryNotFound(*id)),
        }
    }

    async fn attempts_for(&self, delivery_id: &DeliveryId) -> Result<Vec<DeliveryAttempt>, StorageError> {
        let client = self.client.lock().await;
        let rows = client
            .query(
                "SELECT record FROM webhook_delivery_attempts
                 WHERE delivery_id = $1 ORDER BY seq",
                &[&delivery_id.0],
            )
            .await
            .map_err(backend)?;

        rows.iter()
            .map(|row| -> Result<DeliveryAttempt, StorageError> {
                let record: serde_json::Value = row.try_get(0).map_err(backend)?;
                Ok(serde_json::from_value(record)?)
            })
            .collect()
    }

    async fn clear_successful_delivery(&self, id: &DeliveryId) -> Result<bool, StorageError> {
        let mut client = self.client.lock().await;
        let tx = client.transaction().await.map_err(backend)?;

        let removed = tx
            .query_opt(
                "DELETE FROM webhook_event_deliveries
                 WHERE id = $1 AND status = 'success'
                 RETURNING payload_id",
                &[&id.0],
            )
            .await
            .map_err(backend)?;
        let Some(row) = removed else {
            return Ok(false);
        };
        let payload_id: Uuid = row.try_get(0).map_err(backend)?;

        tx.execute(
            "DELETE FROM webhook_event_payloads p
             WHERE p.id = $1
               AND NOT EXISTS (SELECT 1 FROM webhook_event_deliveries d WHERE d.payload_id = p.id)",
            &[&payload_id],
        )
        .await
        .map_err(backend)?;

        tx.commit().await.map_err(backend)?;
        Ok(true)
    }
}
