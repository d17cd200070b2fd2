use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Event type that matches every event when present in a webhook's event list.
pub const ANY_EVENTS: &str = "any_events";

/// Unique identifier for a webhook.
///
/// This is a strongly-typed wrapper to avoid accidental mixing
/// of webhook IDs with other identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WebhookId(pub Uuid);

/// Unique identifier for an application owning webhooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AppId(pub Uuid);

/// Unique identifier for a stored event payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PayloadId(pub Uuid);

/// Unique identifier for an event delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeliveryId(pub Uuid);

/// Unique identifier for a delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttemptId(pub Uuid);

/// Identifier of the job that carried an attempt.
///
/// A job keeps its identifier across retries, so every attempt of one
/// delivery cycle can be correlated with the queue's own bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub String);

macro_rules! uuid_id {
    ($($name:ident),*) => {
        $(
            impl $name {
                pub fn new() -> Self {
                    Self(Uuid::new_v4())
                }
            }

            impl Default for $name {
                fn default() -> Self {
                    Self::new()
                }
            }

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    self.0.fmt(f)
                }
            }
        )*
    };
}

uuid_id!(WebhookId, AppId, PayloadId, DeliveryId, AttemptId);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Application that owns one or more webhooks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct App {
    pub id: AppId,
    pub name: String,
    pub is_active: bool,
}

impl App {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: AppId::new(),
            name: name.into(),
            is_active: true,
        }
    }
}

/// Subscriber endpoint.
///
/// A `Webhook` describes *where* an event should be delivered and *how*
/// its payload is produced. The delivery core only ever reads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Webhook {
    pub id: WebhookId,

    /// Owning application.
    pub app: App,

    /// Target URL. The scheme selects the transport.
    pub target_url: String,

    /// Optional shared secret used to sign payloads.
    pub secret_key: Option<String>,

    /// Inactive webhooks never receive deliveries.
    pub is_active: bool,

    /// Event types this webhook is subscribed to.
    pub events: Vec<String>,

    /// Presence of a query selects subscription-driven payloads.
    pub subscription_query: Option<String>,
}

impl Webhook {
    /// Create an active webhook with no secret and no subscription query.
    pub fn new(app: App, target_url: impl Into<String>) -> Self {
        Self {
            id: WebhookId::new(),
            app,
            target_url: target_url.into(),
            secret_key: None,
            is_active: true,
            events: Vec::new(),
            subscription_query: None,
        }
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret_key = Some(secret.into());
        self
    }

    pub fn with_events<I, S>(mut self, events: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.events = events.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_subscription_query(mut self, query: impl Into<String>) -> Self {
        self.subscription_query = Some(query.into());
        self
    }

    pub fn with_active(mut self, is_active: bool) -> Self {
        self.is_active = is_active;
        self
    }

    /// Whether payloads for this webhook come from its subscription query.
    pub fn is_subscription(&self) -> bool {
        self.subscription_query
            .as_deref()
            .is_some_and(|q| !q.trim().is_empty())
    }

    pub fn listens_to(&self, event_type: &str) -> bool {
        self.events
            .iter()
            .any(|e| e == event_type || e == ANY_EVENTS)
    }
}

/// Serialized event data shared by one or more deliveries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventPayload {
    pub id: PayloadId,
    pub payload: String,
    pub created_at_secs: u64,
}

impl EventPayload {
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            id: PayloadId::new(),
            payload: payload.into(),
            created_at_secs: now_secs(),
        }
    }
}

/// Lifecycle status shared by deliveries and attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventDeliveryStatus {
    Pending,
    Success,
    Failed,
}

impl EventDeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventDeliveryStatus::Pending => "pending",
            EventDeliveryStatus::Success => "success",
            EventDeliveryStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(EventDeliveryStatus::Pending),
            "success" => Some(EventDeliveryStatus::Success),
            "failed" => Some(EventDeliveryStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, EventDeliveryStatus::Pending)
    }
}

impl fmt::Display for EventDeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One obligation to send one payload to one webhook for one event type.
///
/// The payload is shared and fixed at creation. The webhook is held by id
/// and looked up again on every send, so its current state always applies.
#[derive(Debug, Clone)]
pub struct EventDelivery {
    pub id: DeliveryId,
    pub event_type: String,
    pub status: EventDeliveryStatus,
    pub payload: Arc<EventPayload>,
    pub webhook_id: WebhookId,
    pub created_at_secs: u64,
}

impl EventDelivery {
    /// Create a pending delivery.
    pub fn new(
        event_type: impl Into<String>,
        payload: Arc<EventPayload>,
        webhook_id: WebhookId,
    ) -> Self {
        Self {
            id: DeliveryId::new(),
            event_type: event_type.into(),
            status: EventDeliveryStatus::Pending,
            payload,
            webhook_id,
            created_at_secs: now_secs(),
        }
    }
}

/// Header map recorded on attempts.
pub type Headers = HashMap<String, String>;

/// One physical transmission try.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    pub id: AttemptId,
    pub delivery_id: DeliveryId,
    pub task_id: Option<JobId>,
    pub status: EventDeliveryStatus,
    pub duration: Option<Duration>,
    pub response: Option<String>,
    pub request_headers: Option<Headers>,
    pub response_headers: Option<Headers>,
    pub response_status_code: Option<u16>,
    pub created_at_secs: u64,
}

impl DeliveryAttempt {
    pub fn new(delivery_id: DeliveryId, task_id: Option<JobId>) -> Self {
        Self {
            id: AttemptId::new(),
            delivery_id,
            task_id,
            status: EventDeliveryStatus::Pending,
            duration: None,
            response: None,
            request_headers: None,
            response_headers: None,
            response_status_code: None,
            created_at_secs: now_secs(),
        }
    }

    /// Result fields are filled once; a pending attempt has none.
    pub fn is_completed(&self) -> bool {
        self.status.is_terminal()
    }
}

pub(crate) fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
