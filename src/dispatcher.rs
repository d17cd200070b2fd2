use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

use crate::config::DeliveryConfig;
use crate::error::QueueError;
use crate::queue::{DeliveryJob, JobHandle, JobQueue, SEND_WEBHOOK_REQUEST_ASYNC};
use crate::registry::{EndpointDirectory, SiteDomain};
use crate::router::Router;
use crate::storage::Storage;
use crate::worker::DeliveryWorker;

/// In-process job queue and worker pool.
///
/// Submitted jobs wait in a delay heap until due, then a fixed set of
/// workers runs them through [`DeliveryWorker`]. Retries scheduled by the
/// workers come back through the same queue.
///
/// Delayed jobs still waiting at shutdown are dropped; their deliveries
/// stay `PENDING` in storage.
pub struct Dispatcher {
    queue: LocalQueue,
    worker: Arc<DeliveryWorker>,
    scheduler_handle: Option<JoinHandle<()>>,
    worker_handles: Vec<JoinHandle<()>>,
}

/// Submission side of the dispatcher.
#[derive(Clone)]
struct LocalQueue {
    submit_tx: mpsc::UnboundedSender<TimedJob>,
    is_running: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
    sequence: Arc<AtomicU64>,
}

#[async_trait]
impl JobQueue for LocalQueue {
    async fn submit(&self, job: DeliveryJob, delay: Option<Duration>) -> Result<JobHandle, QueueError> {
        if !self.is_running.load(Ordering::SeqCst) {
            return Err(QueueError::Closed);
        }

        let handle = JobHandle {
            name: SEND_WEBHOOK_REQUEST_ASYNC,
            job_id: job.job_id.clone(),
        };
        let timed = TimedJob {
            ready_at: Instant::now() + delay.unwrap_or_default(),
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
            job,
        };
        self.submit_tx.send(timed).map_err(|_| QueueError::Closed)?;
        Ok(handle)
    }
}

impl Dispatcher {
    /// Start the scheduler and `config.worker_count` workers.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        config: DeliveryConfig,
        storage: Arc<dyn Storage>,
        directory: Arc<dyn EndpointDirectory>,
        router: Router,
        site: Arc<dyn SiteDomain>,
    ) -> Self {
        let (submit_tx, submit_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = mpsc::channel(config.worker_count.max(1) * 4);
        let shared_ready_rx = Arc::new(Mutex::new(ready_rx));

        let queue = LocalQueue {
            submit_tx,
            is_running: Arc::new(AtomicBool::new(true)),
            shutdown: Arc::new(Notify::new()),
            sequence: Arc::new(AtomicU64::new(0)),
        };

        let worker = Arc::new(DeliveryWorker::new(
            &config,
            storage,
            directory,
            router,
            Arc::new(queue.clone()),
            site,
        ));

        let scheduler_handle = tokio::spawn(scheduler_loop(
            submit_rx,
            ready_tx,
            queue.is_running.clone(),
            queue.shutdown.clone(),
        ));

        let worker_handles = (0..config.worker_count.max(1))
            .map(|_| tokio::spawn(worker_loop(shared_ready_rx.clone(), worker.clone())))
            .collect();

        Self {
            queue,
            worker,
            scheduler_handle: Some(scheduler_handle),
            worker_handles,
        }
    }

    /// Queue handle for producers such as the fan-out trigger.
    pub fn queue(&self) -> Arc<dyn JobQueue> {
        Arc::new(self.queue.clone())
    }

    pub fn worker(&self) -> &Arc<DeliveryWorker> {
        &self.worker
    }

    pub fn is_running(&self) -> bool {
        self.queue.is_running.load(Ordering::SeqCst)
    }

    /// Stop accepting jobs, let workers finish the jobs already due, and
    /// wait for every task to exit.
    pub async fn shutdown(&mut self) {
        self.queue.is_running.store(false, Ordering::SeqCst);
        self.queue.shutdown.notify_one();

        if let Some(handle) = self.scheduler_handle.take() {
            let _ = handle.await;
        }

        for handle in self.worker_handles.drain(..) {
            let _ = handle.await;
        }
    }
}

#[async_trait]
impl JobQueue for Dispatcher {
    async fn submit(&self, job: DeliveryJob, delay: Option<Duration>) -> Result<JobHandle, QueueError> {
        self.queue.submit(job, delay).await
    }
}

/// Moves due jobs from the delay heap to the workers.
async fn scheduler_loop(
    mut submit_rx: mpsc::UnboundedReceiver<TimedJob>,
    ready_tx: mpsc::Sender<DeliveryJob>,
    is_running: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
) {
    let mut delay_heap: BinaryHeap<TimedJob> = BinaryHeap::new();
    let mut submissions_open = true;

    loop {
        let now = Instant::now();
        while delay_heap.peek().is_some_and(|t| t.ready_at <= now) {
            let Some(timed) = delay_heap.pop() else { break };
            if ready_tx.send(timed.job).await.is_err() {
                return;
            }
        }

        if !is_running.load(Ordering::SeqCst) {
            // Drain submissions that raced with shutdown so they are counted.
            while let Ok(timed) = submit_rx.try_recv() {
                delay_heap.push(timed);
            }
            if !delay_heap.is_empty() {
                tracing::warn!(
                    target: "webhook_delivery",
                    dropped = delay_heap.len(),
                    "Dispatcher stopped with delayed jobs pending"
                );
            }
            return;
        }

        if !submissions_open && delay_heap.is_empty() {
            return;
        }

        let next_ready = delay_heap.peek().map(|t| t.ready_at);
        tokio::select! {
            _ = shutdown.notified() => {}
            received = submit_rx.recv(), if submissions_open => match received {
                Some(timed) => delay_heap.push(timed),
                None => submissions_open = false,
            },
            _ = sleep_until(next_ready.unwrap_or_else(Instant::now)), if next_ready.is_some() => {}
        }
    }
}

/// Main worker loop.
///
/// Pulls due jobs from the shared channel until the scheduler exits.
async fn worker_loop(
    rx: Arc<Mutex<mpsc::Receiver<DeliveryJob>>>,
    worker: Arc<DeliveryWorker>,
) {
    loop {
        let job = {
            let mut guard = rx.lock().await;
            guard.recv().await
        };

        let Some(job) = job else { break };

        if let Err(err) = worker.send_webhook_request_async(&job).await {
            tracing::error!(
                target: "webhook_delivery",
                delivery_id = %job.delivery_id,
                job_id = %job.job_id,
                error = %err,
                "Delivery job failed"
            );
        }
    }
}

#[derive(Debug)]
struct TimedJob {
    ready_at: Instant,
    sequence: u64,
    job: DeliveryJob,
}

impl Eq for TimedJob {}

impl PartialEq for TimedJob {
    fn eq(&self, other: &Self) -> bool {
        self.ready_at == other.ready_at && self.sequence == other.sequence
    }
}

impl Ord for TimedJob {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Reverse for min-heap behavior
        other
            .ready_at
            .cmp(&self.ready_at)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for TimedJob {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}
