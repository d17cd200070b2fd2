use tracing::Span;

#[cfg(feature = "metrics")]
pub(crate) fn metric_inc(name: &'static str) {
    metrics::increment_counter!(name);
}

#[cfg(not(feature = "metrics"))]
pub(crate) fn metric_inc(_name: &'static str) {}

#[cfg(feature = "metrics")]
pub(crate) fn metric_inc_event(name: &'static str, event_type: &str) {
    metrics::increment_counter!(name, "event_type" => event_type.to_string());
}

#[cfg(not(feature = "metrics"))]
pub(crate) fn metric_inc_event(_name: &'static str, _event_type: &str) {}

/// Span wrapping one transport call.
pub fn webhook_span(event_type: &str, domain: &str, sync: bool, app_name: &str) -> Span {
    tracing::info_span!(
        "webhooks",
        event_type = %event_type,
        domain = %domain,
        sync,
        app_name = %app_name,
    )
}
