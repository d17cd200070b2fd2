use std::time::Duration;

use crate::error::ConfigError;

/// Default Pub/Sub REST endpoint.
pub const DEFAULT_PUBSUB_ENDPOINT: &str = "https://pubsub.googleapis.com";

/// Delivery engine configuration.
///
/// Injected into the orchestrators and transports at construction.
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// Timeout for a single asynchronous transport call.
    pub timeout: Duration,

    /// Timeout for a synchronous HTTP call.
    pub sync_timeout: Duration,

    /// Base of the exponential backoff: `retry_backoff * 2^retries`.
    pub retry_backoff: Duration,

    /// Retries allowed after the first attempt.
    pub max_retries: u32,

    /// Upper bound of the random delay added to each backoff.
    pub retry_jitter: Duration,

    /// Vendor name used in HTTP headers (`X-<Vendor>-Event`, `<Vendor>-Event`).
    pub header_vendor: String,

    /// Remove successful deliveries and their attempts once finalized.
    pub prune_successful: bool,

    /// Worker tasks spawned by the in-process dispatcher.
    pub worker_count: usize,

    /// Base URL of the Pub/Sub REST API.
    pub pubsub_endpoint: String,

    /// Bearer token sent to the Pub/Sub REST API.
    pub pubsub_token: Option<String>,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        let worker_count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);

        Self {
            timeout: Duration::from_secs(10),
            sync_timeout: Duration::from_secs(20),
            retry_backoff: Duration::from_secs(10),
            max_retries: 5,
            retry_jitter: Duration::ZERO,
            header_vendor: "Webhook".to_string(),
            prune_successful: false,
            worker_count,
            pubsub_endpoint: DEFAULT_PUBSUB_ENDPOINT.to_string(),
            pubsub_token: None,
        }
    }
}

impl DeliveryConfig {
    /// Build a configuration from `WEBHOOK_*` and `PUBSUB_*` environment
    /// variables, falling back to defaults for unset ones.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(secs) = parse_var::<u64, _>(&lookup, "WEBHOOK_TIMEOUT")? {
            config.timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, "WEBHOOK_SYNC_TIMEOUT")? {
            config.sync_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, "WEBHOOK_RETRY_BACKOFF")? {
            config.retry_backoff = Duration::from_secs(secs);
        }
        if let Some(max) = parse_var::<u32, _>(&lookup, "WEBHOOK_MAX_RETRIES")? {
            config.max_retries = max;
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "WEBHOOK_RETRY_JITTER_MS")? {
            config.retry_jitter = Duration::from_millis(ms);
        }
        if let Some(vendor) = lookup("WEBHOOK_HEADER_VENDOR") {
            if vendor.is_empty() || !vendor.chars().all(|c| c.is_ascii_alphanumeric()) {
                return Err(ConfigError { key: "WEBHOOK_HEADER_VENDOR", value: vendor });
            }
            config.header_vendor = vendor;
        }
        if let Some(prune) = parse_var::<bool, _>(&lookup, "WEBHOOK_PRUNE_SUCCESSFUL")? {
            config.prune_successful = prune;
        }
        if let Some(workers) = parse_var::<usize, _>(&lookup, "WEBHOOK_WORKERS")? {
            config.worker_count = workers.max(1);
        }
        if let Some(host) = lookup("PUBSUB_EMULATOR_HOST") {
            config.pubsub_endpoint = if host.contains("://") {
                host
            } else {
                format!("http://{host}")
            };
        }
        config.pubsub_token = lookup("PUBSUB_ACCESS_TOKEN").filter(|t| !t.is_empty());

        Ok(config)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_sync_timeout(mut self, timeout: Duration) -> Self {
        self.sync_timeout = timeout;
        self
    }

    /// Override backoff base and retry budget.
    pub fn with_retry_policy(mut self, backoff: Duration, max_retries: u32) -> Self {
        self.retry_backoff = backoff;
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_jitter(mut self, jitter: Duration) -> Self {
        self.retry_jitter = jitter;
        self
    }

    pub fn with_header_vendor(mut self, vendor: impl Into<String>) -> Self {
        self.header_vendor = vendor.into();
        self
    }

    pub fn with_prune_successful(mut self, prune: bool) -> Self {
        self.prune_successful = prune;
        self
    }

    pub fn with_worker_count(mut self, workers: usize) -> Self {
        self.worker_count = workers.max(1);
        self
    }

    pub fn with_pubsub_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.pubsub_endpoint = endpoint.into();
        self
    }

    pub fn with_pubsub_token(mut self, token: impl Into<String>) -> Self {
        self.pubsub_token = Some(token.into());
        self
    }
}

fn parse_var<T, F>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError { key, value }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = DeliveryConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.timeout, Duration::from_secs(10));
        assert_eq!(config.sync_timeout, Duration::from_secs(20));
        assert_eq!(config.retry_backoff, Duration::from_secs(10));
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.header_vendor, "Webhook");
        assert_eq!(config.pubsub_endpoint, DEFAULT_PUBSUB_ENDPOINT);
    }

    #[test]
    fn reads_overrides() {
        let config = DeliveryConfig::from_lookup(lookup(&[
            ("WEBHOOK_TIMEOUT", "3"),
            ("WEBHOOK_MAX_RETRIES", "2"),
            ("WEBHOOK_HEADER_VENDOR", "Acme"),
            ("PUBSUB_EMULATOR_HOST", "localhost:8085"),
        ]))
        .unwrap();
        assert_eq!(config.timeout, Duration::from_secs(3));
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.header_vendor, "Acme");
        assert_eq!(config.pubsub_endpoint, "http://localhost:8085");
    }

    #[test]
    fn rejects_garbage() {
        let err = DeliveryConfig::from_lookup(lookup(&[("WEBHOOK_MAX_RETRIES", "many")]))
            .unwrap_err();
        assert_eq!(err.key, "WEBHOOK_MAX_RETRIES");
    }
}
