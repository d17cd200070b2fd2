use std::fmt;
use std::time::Duration;

use url::Url;

use crate::error::DeliveryError;
use crate::types::{EventDeliveryStatus, Headers};

/// Transport selected by a target URL's scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    Http,
    Https,
    AwsSqs,
    GcPubSub,
}

impl TransportKind {
    /// Map a scheme to its transport. Matching is case-insensitive.
    pub fn from_scheme(scheme: &str) -> Result<Self, DeliveryError> {
        match scheme.to_ascii_lowercase().as_str() {
            "http" => Ok(TransportKind::Http),
            "https" => Ok(TransportKind::Https),
            "awssqs" => Ok(TransportKind::AwsSqs),
            "gcpubsub" => Ok(TransportKind::GcPubSub),
            _ => Err(DeliveryError::UnsupportedScheme {
                scheme: scheme.to_string(),
            }),
        }
    }

    /// Parse a target URL and resolve its transport.
    ///
    /// Unparseable URLs are reported as an unsupported scheme.
    pub fn for_target(target_url: &str) -> Result<(Self, Url), DeliveryError> {
        let url = Url::parse(target_url).map_err(|_| DeliveryError::UnsupportedScheme {
            scheme: raw_scheme(target_url).to_string(),
        })?;
        let kind = Self::from_scheme(url.scheme())?;
        Ok((kind, url))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Http => "http",
            TransportKind::Https => "https",
            TransportKind::AwsSqs => "awssqs",
            TransportKind::GcPubSub => "gcpubsub",
        }
    }

    pub fn is_http(&self) -> bool {
        matches!(self, TransportKind::Http | TransportKind::Https)
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn raw_scheme(target_url: &str) -> &str {
    target_url.split_once(':').map(|(s, _)| s).unwrap_or(target_url)
}

/// Uniform outcome every transport produces.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryResult {
    /// Response body, broker acknowledgment or error text.
    pub content: String,
    pub request_headers: Option<Headers>,
    pub response_headers: Option<Headers>,
    pub response_status_code: Option<u16>,
    pub status: EventDeliveryStatus,
    pub duration: Duration,
}

impl DeliveryResult {
    pub fn success(content: impl Into<String>, duration: Duration) -> Self {
        Self {
            content: content.into(),
            request_headers: None,
            response_headers: None,
            response_status_code: None,
            status: EventDeliveryStatus::Success,
            duration,
        }
    }

    pub fn failed(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            request_headers: None,
            response_headers: None,
            response_status_code: None,
            status: EventDeliveryStatus::Failed,
            duration: Duration::ZERO,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == EventDeliveryStatus::Success
    }
}

/// Everything a transport needs to place one message on its wire.
#[derive(Debug, Clone, Copy)]
pub struct OutboundMessage<'a> {
    pub body: &'a [u8],
    pub domain: &'a str,
    pub signature: Option<&'a str>,
    pub event_type: &'a str,
}
