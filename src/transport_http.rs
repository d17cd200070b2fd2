use std::time::{Duration, Instant};

use crate::error::TransportError;
use crate::transport::{DeliveryResult, OutboundMessage};
use crate::types::{EventDeliveryStatus, Headers};

/// HTTP/HTTPS adapter.
///
/// POSTs the raw payload and reports success for any 2xx response.
/// Every other response is a failure carrying the response body.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    vendor: String,
}

impl HttpTransport {
    pub fn new(vendor: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), vendor)
    }

    pub fn with_client(client: reqwest::Client, vendor: impl Into<String>) -> Self {
        Self {
            client,
            vendor: vendor.into(),
        }
    }

    /// Headers sent with a payload.
    ///
    /// Both the `X-` prefixed legacy names and the current names are sent
    /// while receivers migrate. Signature headers are omitted when the
    /// webhook has no secret.
    pub fn request_headers(&self, message: &OutboundMessage<'_>) -> Headers {
        let vendor = &self.vendor;
        let mut headers = Headers::new();
        headers.insert("Content-Type".to_string(), "application/json".to_string());

        let mut both = |name: &str, value: &str| {
            headers.insert(format!("X-{vendor}-{name}"), value.to_string());
            headers.insert(format!("{vendor}-{name}"), value.to_string());
        };
        both("Event", message.event_type);
        both("Domain", message.domain);
        if let Some(signature) = message.signature {
            both("Signature", signature);
        }

        headers
    }

    pub async fn send(
        &self,
        target_url: &str,
        message: OutboundMessage<'_>,
        timeout: Duration,
    ) -> Result<DeliveryResult, TransportError> {
        let headers = self.request_headers(&message);

        let mut request = self
            .client
            .post(target_url)
            .timeout(timeout)
            .body(message.body.to_vec());
        for (name, value) in &headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let started = Instant::now();
        let response = request
            .send()
            .await
            .map_err(|err| classify(err, timeout))?;
        let duration = started.elapsed();

        let status_code = response.status();
        let response_headers: Headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        let content = response
            .text()
            .await
            .map_err(|err| classify(err, timeout))?;

        Ok(DeliveryResult {
            content,
            request_headers: Some(headers),
            response_headers: Some(response_headers),
            response_status_code: Some(status_code.as_u16()),
            status: if status_code.is_success() {
                EventDeliveryStatus::Success
            } else {
                EventDeliveryStatus::Failed
            },
            duration,
        })
    }
}

fn classify(err: reqwest::Error, timeout: Duration) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(timeout)
    } else {
        TransportError::from(err)
    }
}
