//! An embeddable webhook delivery engine.
//!
//! Events are fanned out into per-webhook deliveries, each delivered over
//! the transport selected by the target URL's scheme: HTTP(S), an AWS SQS
//! queue or a Google Cloud Pub/Sub topic. Every physical try is recorded
//! as an attempt. Asynchronous deliveries retry with exponential backoff;
//! synchronous deliveries make one HTTP call and hand back the response.
//!
//! ## Guarantees
//! - A delivery reaches a terminal status at most once
//! - Attempt records are written once and never rewritten
//! - Payloads are signed with HMAC-SHA256 when the webhook has a secret
//! - Raw payloads are stored once per event and shared by deliveries
//! - Every send uses the webhook's current state: a webhook disabled or
//!   removed while retries are pending stops receiving them
//!
//! ## Non-Guarantees
//! - Exactly-once delivery
//! - Delivery order between webhooks or events
//! - Survival of delayed retries across restarts of the in-process
//!   dispatcher (use the Redis queue for that)
//!
//! Webhook registration, subscription query evaluation and the site domain
//! belong to the embedding application and are consumed through the
//! traits in [`EndpointDirectory`], [`SubscriptionRenderer`],
//! [`SubscribableEvents`] and [`SiteDomain`].

mod config;
mod dispatcher;
mod error;
mod policy;
mod queue;
mod registry;
mod router;
mod signing;
mod storage;
mod sync_delivery;
mod telemetry;
mod transport;
mod transport_http;
mod transport_pubsub;
mod transport_sqs;
mod trigger;
mod types;
mod worker;

#[cfg(feature = "redis")]
mod queue_redis;

#[cfg(feature = "postgres")]
mod storage_postgres;

pub use config::{DeliveryConfig, DEFAULT_PUBSUB_ENDPOINT};
pub use dispatcher::Dispatcher;
pub use error::{ConfigError, DeliveryError, QueueError, StorageError, TransportError};
pub use policy::{AttemptOutcome, RetryDecision, RetryPolicy};
pub use queue::{
    DeliveryJob, InMemoryJobQueue, JobHandle, JobQueue, QueuedJob, SEND_WEBHOOK_REQUEST_ASYNC,
};
pub use registry::{
    EndpointDirectory, EndpointScope, InMemoryDirectory, RenderContext, SiteDomain,
    StaticDomain, SubscribableEvents, SubscriptionRenderer,
};
pub use router::Router;
pub use signing::{compute_signature, signature_for_payload, verify_signature};
pub use storage::{InMemoryStorage, Storage};
pub use sync_delivery::SyncDelivery;
pub use telemetry::webhook_span;
pub use transport::{DeliveryResult, OutboundMessage, TransportKind};
pub use transport_http::HttpTransport;
pub use transport_pubsub::{
    PendingPublish, PubSubMessage, PubSubTransport, RestTopicPublisher, TopicPublisher,
    MAX_MESSAGE_BYTES,
};
pub use transport_sqs::{
    QueueClient, QueueMessage, QueueTarget, SqsTransport, UnavailableQueueClient, DEFAULT_REGION,
};
pub use trigger::{group_webhooks_by_subscription, EventTrigger};
pub use types::{
    App, AppId, AttemptId, DeliveryAttempt, DeliveryId, EventDelivery, EventDeliveryStatus,
    EventPayload, Headers, JobId, PayloadId, Webhook, WebhookId, ANY_EVENTS,
};
pub use worker::DeliveryWorker;

#[cfg(feature = "sqs")]
pub use transport_sqs::SqsQueueClient;

#[cfg(feature = "redis")]
pub use queue_redis::RedisJobQueue;

#[cfg(feature = "postgres")]
pub use storage_postgres::PostgresStorage;
