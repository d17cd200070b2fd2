//! Shared fixtures for webhook-delivery integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use webhook_delivery::{
    App, AttemptOutcome, DeliveryConfig, DeliveryJob, DeliveryWorker, InMemoryDirectory,
    InMemoryJobQueue, InMemoryStorage, QueueClient, QueueMessage, QueueTarget, RenderContext,
    Router, StaticDomain, Storage, SubscriptionRenderer, TransportError,
};
use wiremock::{Request, Respond, ResponseTemplate};

pub const DOMAIN: &str = "shop.example.com";
pub const SECRET: &str = "whsec_test_secret_key_12345";

// ---------------------------------------------------------------------------
// Captured requests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub body: Vec<u8>,
    pub headers: HashMap<String, String>,
}

impl CapturedRequest {
    fn from_request(request: &Request) -> Self {
        Self {
            body: request.body.clone(),
            headers: request
                .headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
                .collect(),
        }
    }

    pub fn body_json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap()
    }

    /// Header value by name, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| k.to_lowercase() == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Records every request and answers with a fixed status and body.
#[derive(Clone)]
pub struct CaptureResponder {
    requests: Arc<Mutex<Vec<CapturedRequest>>>,
    status: u16,
    body: Option<String>,
}

impl CaptureResponder {
    pub fn new() -> Self {
        Self::with_status(200)
    }

    pub fn with_status(status: u16) -> Self {
        Self {
            requests: Arc::new(Mutex::new(Vec::new())),
            status,
            body: None,
        }
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn requests(&self) -> Vec<CapturedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl Respond for CaptureResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        self.requests
            .lock()
            .unwrap()
            .push(CapturedRequest::from_request(request));
        let template = ResponseTemplate::new(self.status);
        match &self.body {
            Some(body) => template.set_body_string(body.clone()),
            None => template,
        }
    }
}

/// Fails `n` times with 500, then answers 200.
#[derive(Clone)]
pub struct FailingResponder {
    attempts: Arc<AtomicU32>,
    failures_before_success: u32,
}

impl FailingResponder {
    pub fn fail_times(n: u32) -> Self {
        Self {
            attempts: Arc::new(AtomicU32::new(0)),
            failures_before_success: n,
        }
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Respond for FailingResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.failures_before_success {
            ResponseTemplate::new(500).set_body_string("temporarily unavailable")
        } else {
            ResponseTemplate::new(200).set_body_string("ok")
        }
    }
}

// ---------------------------------------------------------------------------
// Collaborator fakes
// ---------------------------------------------------------------------------

/// Queue client that keeps every message it is asked to send.
#[derive(Default)]
pub struct RecordingQueueClient {
    sent: Mutex<Vec<(QueueTarget, QueueMessage)>>,
}

impl RecordingQueueClient {
    pub fn sent(&self) -> Vec<(QueueTarget, QueueMessage)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl QueueClient for RecordingQueueClient {
    async fn send_message(
        &self,
        target: &QueueTarget,
        message: QueueMessage,
    ) -> Result<String, TransportError> {
        self.sent.lock().unwrap().push((target.clone(), message));
        Ok("message-1".to_string())
    }
}

/// Renders a fixed value per subscription query.
#[derive(Default)]
pub struct StaticRenderer {
    rendered: BTreeMap<String, Value>,
}

impl StaticRenderer {
    pub fn with(mut self, query: &str, value: Value) -> Self {
        self.rendered.insert(query.to_string(), value);
        self
    }
}

#[async_trait]
impl SubscriptionRenderer for StaticRenderer {
    async fn render(
        &self,
        _event_type: &str,
        _source: &Value,
        query: &str,
        _context: &RenderContext,
        _app: &App,
    ) -> Option<Value> {
        self.rendered.get(query).cloned()
    }
}

// ---------------------------------------------------------------------------
// Environment
// ---------------------------------------------------------------------------

/// Config with millisecond backoff so retry chains finish quickly.
pub fn fast_config() -> DeliveryConfig {
    DeliveryConfig::default()
        .with_timeout(Duration::from_secs(2))
        .with_sync_timeout(Duration::from_secs(2))
        .with_retry_policy(Duration::from_millis(1), 5)
}

/// A worker fed from a buffering queue the test drains by hand.
pub struct TestEnv {
    pub config: DeliveryConfig,
    pub storage: Arc<InMemoryStorage>,
    pub queue: Arc<InMemoryJobQueue>,
    pub directory: Arc<InMemoryDirectory>,
    pub worker: DeliveryWorker,
}

impl TestEnv {
    pub fn new(config: DeliveryConfig) -> Self {
        Self::with_router(config.clone(), Router::new(config))
    }

    pub fn with_router(config: DeliveryConfig, router: Router) -> Self {
        let storage = Arc::new(InMemoryStorage::new());
        let queue = Arc::new(InMemoryJobQueue::new());
        let directory = Arc::new(InMemoryDirectory::new());
        let worker = DeliveryWorker::new(
            &config,
            storage.clone(),
            directory.clone(),
            router,
            queue.clone(),
            Arc::new(StaticDomain::new(DOMAIN)),
        );
        Self {
            config,
            storage,
            queue,
            directory,
            worker,
        }
    }

    pub fn storage(&self) -> Arc<dyn Storage> {
        self.storage.clone()
    }

    /// Run queued jobs, including retries they schedule, until none remain.
    /// Requested delays are ignored.
    pub async fn run_queued(&self) -> Vec<AttemptOutcome> {
        let mut outcomes = Vec::new();
        while let Some(queued) = self.queue.pop().await {
            outcomes.push(self.run(&queued.job).await);
        }
        outcomes
    }

    pub async fn run(&self, job: &DeliveryJob) -> AttemptOutcome {
        self.worker.send_webhook_request_async(job).await.unwrap()
    }
}

pub fn test_app() -> App {
    App::new("test-app")
}
