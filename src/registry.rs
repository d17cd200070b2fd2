//! Collaborators the delivery core consumes but does not own.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::types::{App, AppId, Webhook, WebhookId};

/// Which webhooks an endpoint lookup considers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointScope {
    /// Every registered webhook.
    All,
    /// Only webhooks owned by one application.
    App(AppId),
}

/// Directory of registered webhooks.
#[async_trait]
pub trait EndpointDirectory: Send + Sync {
    /// Active webhooks of active apps listening to `event_type`, in
    /// registration order.
    async fn webhooks_for_event(&self, event_type: &str, scope: EndpointScope) -> Vec<Arc<Webhook>>;

    /// Current state of one webhook, active or not. `None` once removed.
    async fn get_webhook(&self, id: &WebhookId) -> Option<Arc<Webhook>>;
}

/// In-memory webhook directory.
#[derive(Default)]
pub struct InMemoryDirectory {
    webhooks: RwLock<Vec<Arc<Webhook>>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, webhook: Webhook) -> Arc<Webhook> {
        let webhook = Arc::new(webhook);
        let mut guard = self.webhooks.write().await;
        guard.retain(|w| w.id != webhook.id);
        guard.push(webhook.clone());
        webhook
    }

    pub async fn remove(&self, id: &WebhookId) {
        self.webhooks.write().await.retain(|w| &w.id != id);
    }
}

#[async_trait]
impl EndpointDirectory for InMemoryDirectory {
    async fn webhooks_for_event(&self, event_type: &str, scope: EndpointScope) -> Vec<Arc<Webhook>> {
        let guard = self.webhooks.read().await;
        guard
            .iter()
            .filter(|w| w.is_active && w.app.is_active && w.listens_to(event_type))
            .filter(|w| match scope {
                EndpointScope::All => true,
                EndpointScope::App(app_id) => w.app.id == app_id,
            })
            .cloned()
            .collect()
    }

    async fn get_webhook(&self, id: &WebhookId) -> Option<Arc<Webhook>> {
        let guard = self.webhooks.read().await;
        guard.iter().find(|w| &w.id == id).cloned()
    }
}

/// Registry of event types that support subscription queries.
pub trait SubscribableEvents: Send + Sync {
    fn is_subscribable(&self, event_type: &str) -> bool;
}

impl SubscribableEvents for HashSet<String> {
    fn is_subscribable(&self, event_type: &str) -> bool {
        self.contains(event_type)
    }
}

/// Request context handed to the subscription renderer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderContext {
    /// Identity of whoever caused the event, if known.
    pub requestor: Option<String>,
}

impl RenderContext {
    pub fn new(requestor: Option<&str>) -> Self {
        Self {
            requestor: requestor.map(str::to_string),
        }
    }
}

/// Evaluates a webhook's subscription query against an event source.
#[async_trait]
pub trait SubscriptionRenderer: Send + Sync {
    /// Render the payload, or `None` when the query selects nothing.
    async fn render(
        &self,
        event_type: &str,
        source: &Value,
        query: &str,
        context: &RenderContext,
        app: &App,
    ) -> Option<Value>;
}

/// Accessor for the domain of the current site.
pub trait SiteDomain: Send + Sync {
    fn current_domain(&self) -> String;
}

/// Site domain fixed at construction.
#[derive(Debug, Clone)]
pub struct StaticDomain(pub String);

impl StaticDomain {
    pub fn new(domain: impl Into<String>) -> Self {
        Self(domain.into())
    }
}

impl SiteDomain for StaticDomain {
    fn current_domain(&self) -> String {
        self.0.clone()
    }
}
