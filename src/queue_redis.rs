use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use redis::AsyncCommands;

use crate::error::QueueError;
use crate::queue::{DeliveryJob, JobHandle, JobQueue, SEND_WEBHOOK_REQUEST_ASYNC};
use crate::worker::DeliveryWorker;

/// Delayed job queue kept in a Redis sorted set scored by ready time.
///
/// Any number of processes may poll the same set; a job belongs to the
/// poller whose `ZREM` removed it.
pub struct RedisJobQueue {
    client: redis::Client,
    prefix: String,
}

fn backend(err: redis::RedisError) -> QueueError {
    QueueError::Backend(err.to_string())
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

impl RedisJobQueue {
    pub fn new(client: redis::Client, prefix: impl Into<String>) -> Self {
        Self {
            client,
            prefix: prefix.into(),
        }
    }

    fn jobs_key(&self) -> String {
        format!("{}:{}", self.prefix, SEND_WEBHOOK_REQUEST_ASYNC)
    }

    /// Claim up to `limit` jobs whose ready time has passed.
    pub async fn pop_due(&self, limit: usize) -> Result<Vec<DeliveryJob>, QueueError> {
        let mut conn = self.client.get_tokio_connection().await.map_err(backend)?;
        let members: Vec<String> = conn
            .zrangebyscore_limit(self.jobs_key(), 0u64, now_millis(), 0, limit as isize)
            .await
            .map_err(backend)?;

        let mut due = Vec::with_capacity(members.len());
        for member in members {
            let removed: i64 = conn.zrem(self.jobs_key(), &member).await.map_err(backend)?;
            if removed != 1 {
                continue;
            }
            match serde_json::from_str::<DeliveryJob>(&member) {
                Ok(job) => due.push(job),
                Err(err) => tracing::warn!(
                    target: "webhook_delivery",
                    error = %err,
                    "Dropping unreadable job"
                ),
            }
        }
        Ok(due)
    }

    /// Jobs waiting in the set, due or not.
    pub async fn pending(&self) -> Result<usize, QueueError> {
        let mut conn = self.client.get_tokio_connection().await.map_err(backend)?;
        conn.zcard(self.jobs_key()).await.map_err(backend)
    }

    /// Claim due jobs and run them through `worker`. Returns how many ran.
    pub async fn run_due(&self, worker: &DeliveryWorker, limit: usize) -> Result<usize, QueueError> {
        let jobs = self.pop_due(limit).await?;
        for job in &jobs {
            if let Err(err) = worker.send_webhook_request_async(job).await {
                tracing::error!(
                    target: "webhook_delivery",
                    delivery_id = %job.delivery_id,
                    job_id = %job.job_id,
                    error = %err,
                    "Delivery job failed"
                );
            }
        }
        Ok(jobs.len())
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn submit(&self, job: DeliveryJob, delay: Option<Duration>) -> Result<JobHandle, QueueError> {
        let member = serde_json::to_string(&job).map_err(|e| QueueError::Backend(e.to_string()))?;
        let ready_at = now_millis() + delay.unwrap_or_default().as_millis() as u64;

        let mut conn = self.client.get_tokio_connection().await.map_err(backend)?;
        let _: i64 = conn
            .zadd(self.jobs_key(), member, ready_at)
            .await
            .map_err(backend)?;

        Ok(JobHandle {
            name: SEND_WEBHOOK_REQUEST_ASYNC,
            job_id: job.job_id,
        })
    }
}
