use crate::types::{AttemptId, DeliveryId};

/// Errors that reach the caller of a delivery operation.
///
/// Transport failures never appear here: they are normalised into a
/// failed [`DeliveryResult`](crate::transport::DeliveryResult) first.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// Target URL uses a scheme no adapter handles.
    /// Configuration fault, never retried.
    #[error("unknown webhook scheme: {scheme:?}")]
    UnsupportedScheme { scheme: String },

    /// No webhook of the requesting app listens to the event type.
    #[error("no webhook found for event: {event_type}")]
    NoEndpoint { event_type: String },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    /// Deliveries were stored but the queue rejected some of their jobs.
    /// The `unqueued` ones stay pending until resubmitted.
    #[error("queued {} of {} deliveries: {source}", .queued.len(), .queued.len() + .unqueued.len())]
    PartiallyQueued {
        queued: Vec<DeliveryId>,
        unqueued: Vec<DeliveryId>,
        #[source]
        source: QueueError,
    },
}

/// Errors raised by a transport adapter.
///
/// Adapters return these at their boundary; the router turns every one
/// of them into a failed delivery result.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Http(String),

    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("queue client error: {0}")]
    Queue(String),

    #[error("message too large: {size} bytes exceeds limit of {limit} bytes")]
    MessageTooLarge { size: usize, limit: usize },

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("transport runtime error: {0}")]
    Runtime(String),

    #[error("invalid target url: {0}")]
    InvalidTarget(String),

    #[error("transport unavailable: {0}")]
    Unavailable(&'static str),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        TransportError::Http(err.to_string())
    }
}

/// Errors returned by a [`Storage`](crate::storage::Storage) backend.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("delivery not found: {0}")]
    DeliveryNotFound(DeliveryId),

    #[error("attempt not found: {0}")]
    AttemptNotFound(AttemptId),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Errors returned when submitting work to a job queue.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// Queue has been shut down.
    #[error("job queue is shut down")]
    Closed,

    #[error("job queue backend error: {0}")]
    Backend(String),
}

/// Invalid configuration value.
#[derive(Debug, thiserror::Error)]
#[error("invalid value {value:?} for {key}")]
pub struct ConfigError {
    pub key: &'static str,
    pub value: String,
}
