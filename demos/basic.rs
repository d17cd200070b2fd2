use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;
use webhook_delivery::{
    App, DeliveryConfig, Dispatcher, EventTrigger, InMemoryDirectory, InMemoryStorage,
    RenderContext, Router, StaticDomain, SubscriptionRenderer, Webhook,
};

/// Echoes the event source back as the subscription payload.
struct EchoRenderer;

#[async_trait]
impl SubscriptionRenderer for EchoRenderer {
    async fn render(
        &self,
        _event_type: &str,
        source: &Value,
        _query: &str,
        _context: &RenderContext,
        _app: &App,
    ) -> Option<Value> {
        Some(json!({ "order": source }))
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = match DeliveryConfig::from_env() {
        Ok(config) => config.with_retry_policy(Duration::from_millis(200), 2),
        Err(err) => {
            eprintln!("{err}");
            return;
        }
    };

    let storage = Arc::new(InMemoryStorage::new());
    let directory = Arc::new(InMemoryDirectory::new());
    let mut dispatcher = Dispatcher::new(
        config.clone(),
        storage.clone(),
        directory.clone(),
        Router::new(config),
        Arc::new(StaticDomain::new("shop.example.com")),
    );

    let app = App::new("orders-app");
    directory
        .register(
            Webhook::new(app.clone(), "https://example.com/webhook")
                .with_secret("supersecret")
                .with_events(["order_created"]),
        )
        .await;
    directory
        .register(
            Webhook::new(app, "https://example.com/subscription")
                .with_events(["order_created"])
                .with_subscription_query("subscription { event { order { id } } }"),
        )
        .await;

    let trigger = EventTrigger::new(
        storage.clone(),
        dispatcher.queue(),
        directory,
        Arc::new(HashSet::from(["order_created".to_string()])),
        Arc::new(EchoRenderer),
    );

    let source = json!({ "id": 123 });
    match trigger
        .trigger_for_event("order_created", r#"{"id":123}"#, Some(&source), None)
        .await
    {
        Ok(queued) => tracing::info!(deliveries = queued.len(), "Event queued"),
        Err(err) => tracing::error!(error = %err, "Failed to queue event"),
    }

    tokio::time::sleep(Duration::from_secs(2)).await;
    for delivery in storage.deliveries().await {
        tracing::info!(
            delivery_id = %delivery.id,
            webhook_id = %delivery.webhook_id,
            status = %delivery.status,
            "Delivery"
        );
    }

    dispatcher.shutdown().await;
}
