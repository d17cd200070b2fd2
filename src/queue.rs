use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::QueueError;
use crate::types::{DeliveryId, JobId};

/// Name under which delivery jobs are submitted.
pub const SEND_WEBHOOK_REQUEST_ASYNC: &str = "send_webhook_request_async";

/// A unit of work: one attempt cycle for one delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryJob {
    /// Stable across retries of the same delivery.
    pub job_id: JobId,
    pub delivery_id: DeliveryId,
    /// Retries already performed before this run.
    pub retries: u32,
}

impl DeliveryJob {
    pub fn new(delivery_id: DeliveryId) -> Self {
        Self {
            job_id: JobId::new(),
            delivery_id,
            retries: 0,
        }
    }

    /// The job re-run after a failed attempt.
    pub fn retry(&self) -> Self {
        Self {
            job_id: self.job_id.clone(),
            delivery_id: self.delivery_id,
            retries: self.retries + 1,
        }
    }
}

/// Handle returned for a submitted job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub name: &'static str,
    pub job_id: JobId,
}

/// Submits delivery jobs, optionally delayed.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Queue a job to run after `delay` (immediately when `None`).
    /// The queue may run it later than requested, never earlier.
    async fn submit(&self, job: DeliveryJob, delay: Option<Duration>) -> Result<JobHandle, QueueError>;
}

/// A submitted job with its requested delay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedJob {
    pub job: DeliveryJob,
    pub delay: Option<Duration>,
}

/// Job queue that only buffers submissions.
///
/// Used when the embedding application drains and runs jobs itself.
#[derive(Default)]
pub struct InMemoryJobQueue {
    jobs: Mutex<VecDeque<QueuedJob>>,
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the oldest submitted job.
    pub async fn pop(&self) -> Option<QueuedJob> {
        self.jobs.lock().await.pop_front()
    }

    /// Take every submitted job.
    pub async fn drain(&self) -> Vec<QueuedJob> {
        self.jobs.lock().await.drain(..).collect()
    }

    pub async fn len(&self) -> usize {
        self.jobs.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.lock().await.is_empty()
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn submit(&self, job: DeliveryJob, delay: Option<Duration>) -> Result<JobHandle, QueueError> {
        let handle = JobHandle {
            name: SEND_WEBHOOK_REQUEST_ASYNC,
            job_id: job.job_id.clone(),
        };
        self.jobs.lock().await.push_back(QueuedJob { job, delay });
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_keeps_job_id() {
        let job = DeliveryJob::new(DeliveryId::new());
        let retried = job.retry().retry();
        assert_eq!(retried.job_id, job.job_id);
        assert_eq!(retried.delivery_id, job.delivery_id);
        assert_eq!(retried.retries, 2);
    }

    #[tokio::test]
    async fn buffers_in_submission_order() {
        let queue = InMemoryJobQueue::new();
        let first = DeliveryJob::new(DeliveryId::new());
        let second = DeliveryJob::new(DeliveryId::new());
        queue.submit(first.clone(), None).await.unwrap();
        queue
            .submit(second.clone(), Some(Duration::from_secs(10)))
            .await
            .unwrap();

        assert_eq!(queue.len().await, 2);
        assert_eq!(queue.pop().await.unwrap().job, first);
        let queued = queue.pop().await.unwrap();
        assert_eq!(queued.job, second);
        assert_eq!(queued.delay, Some(Duration::from_secs(10)));
        assert!(queue.is_empty().await);
    }
}
