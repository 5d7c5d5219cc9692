//! Feed retrieval with an ordered relay fallback chain.
//!
//! A feed URL is fetched directly first. When that fails, each configured
//! relay is tried once, strictly in order, until one returns a non-empty,
//! well-formed document. Per-attempt failures are only logged; exhaustion
//! surfaces the last error.

use futures::StreamExt;
use quick_xml::events::Event;
use quick_xml::Reader;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::util::{validate_url, UrlValidationError};

const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors that can occur while retrieving or decoding a feed.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    #[error("Request timed out")]
    Timeout,
    /// Body was empty after a successful response
    #[error("Empty response body")]
    EmptyResponse,
    /// Body is not a feed document in the shape the source promises
    #[error("Malformed response: {0}")]
    Malformed(String),
    /// Response body exceeded the 10MB size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
    /// Feed document could not be parsed as RSS, Atom or JSON Feed
    #[error("Parse error: {0}")]
    Parse(String),
    #[error(transparent)]
    InvalidUrl(#[from] UrlValidationError),
    /// Direct retrieval and every relay failed
    #[error("All {attempts} sources failed, last error: {last}")]
    AllSourcesExhausted {
        attempts: usize,
        #[source]
        last: Box<FetchError>,
    },
}

/// How a relay wraps the feed URL and what it returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayKind {
    /// `base + encoded url`; the body is the feed itself
    Prefix,
    /// `base + encoded url`; the body is JSON with the feed in `contents`
    JsonEnvelope,
    /// `base + encoded url`; the body is a converter's JSON item schema
    FeedToJson,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayStrategy {
    pub kind: RelayKind,
    pub base: String,
}

impl RelayStrategy {
    pub fn new(kind: RelayKind, base: impl Into<String>) -> Self {
        Self {
            kind,
            base: base.into(),
        }
    }

    /// The relay URL that retrieves `feed_url`.
    pub fn request_url(&self, feed_url: &str) -> String {
        let encoded: String = url::form_urlencoded::byte_serialize(feed_url.as_bytes()).collect();
        format!("{}{}", self.base, encoded)
    }
}

/// Public relays, lowest latency first.
pub fn default_relays() -> Vec<RelayStrategy> {
    vec![
        RelayStrategy::new(RelayKind::Prefix, "https://api.allorigins.win/raw?url="),
        RelayStrategy::new(RelayKind::JsonEnvelope, "https://api.allorigins.win/get?url="),
        RelayStrategy::new(
            RelayKind::FeedToJson,
            "https://api.rss2json.com/v1/api.json?rss_url=",
        ),
    ]
}

/// Feed metadata of a converter response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvertedFeedInfo {
    pub title: String,
    pub description: String,
    pub link: String,
    pub image: String,
}

/// A feed-to-JSON converter response.
///
/// Items stay undecoded so one malformed item cannot fail the whole feed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvertedFeed {
    pub status: String,
    pub message: Option<String>,
    pub feed: ConvertedFeedInfo,
    pub items: Vec<serde_json::Value>,
}

/// A retrieved feed, tagged by shape.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedDocument {
    /// RSS, Atom or JSON Feed bytes
    Xml(Vec<u8>),
    Converted(ConvertedFeed),
}

#[derive(Deserialize)]
struct Envelope {
    contents: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Resolver {
    client: reqwest::Client,
    relays: Vec<RelayStrategy>,
    timeout: Duration,
}

impl Resolver {
    pub fn new(client: reqwest::Client, relays: Vec<RelayStrategy>) -> Self {
        Self {
            client,
            relays,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Per-attempt timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn relays(&self) -> &[RelayStrategy] {
        &self.relays
    }

    /// Retrieves the feed at `url`, falling back through the relays.
    ///
    /// # Errors
    ///
    /// - [`FetchError::InvalidUrl`] before any request when `url` is not
    ///   an absolute http(s) URL
    /// - [`FetchError::AllSourcesExhausted`] wrapping the last attempt's
    ///   error when every source failed
    pub async fn resolve(&self, url: &str) -> Result<FeedDocument, FetchError> {
        let parsed = validate_url(url)?;
        let url = parsed.as_str();

        let mut attempts = 1;
        let mut last = match self.fetch_direct(url).await {
            Ok(document) => return Ok(document),
            Err(e) => {
                tracing::debug!(feed = %url, error = %e, "Direct fetch failed, trying relays");
                e
            }
        };

        for relay in &self.relays {
            attempts += 1;
            match self.fetch_via(relay, url).await {
                Ok(document) => {
                    tracing::debug!(feed = %url, relay = %relay.base, "Feed resolved through relay");
                    return Ok(document);
                }
                Err(e) => {
                    tracing::warn!(feed = %url, relay = %relay.base, error = %e, "Relay failed");
                    last = e;
                }
            }
        }

        Err(FetchError::AllSourcesExhausted {
            attempts,
            last: Box::new(last),
        })
    }

    async fn fetch_direct(&self, url: &str) -> Result<FeedDocument, FetchError> {
        let bytes = self.get_bytes(url).await?;
        check_feed_markup(&bytes)?;
        Ok(FeedDocument::Xml(bytes))
    }

    async fn fetch_via(&self, relay: &RelayStrategy, url: &str) -> Result<FeedDocument, FetchError> {
        let bytes = self.get_bytes(&relay.request_url(url)).await?;

        match relay.kind {
            RelayKind::Prefix => {
                check_feed_markup(&bytes)?;
                Ok(FeedDocument::Xml(bytes))
            }
            RelayKind::JsonEnvelope => {
                let envelope: Envelope = serde_json::from_slice(&bytes)
                    .map_err(|e| FetchError::Malformed(format!("invalid envelope: {e}")))?;
                let contents = envelope.contents.unwrap_or_default();
                if contents.trim().is_empty() {
                    return Err(FetchError::EmptyResponse);
                }
                let bytes = contents.into_bytes();
                check_feed_markup(&bytes)?;
                Ok(FeedDocument::Xml(bytes))
            }
            RelayKind::FeedToJson => {
                let converted: ConvertedFeed = serde_json::from_slice(&bytes)
                    .map_err(|e| FetchError::Malformed(format!("invalid converter response: {e}")))?;
                if converted.status != "ok" {
                    let reason = converted.message.unwrap_or_else(|| {
                        if converted.status.is_empty() {
                            "converter response has no status".to_string()
                        } else {
                            format!("status {}", converted.status)
                        }
                    });
                    return Err(FetchError::Malformed(reason));
                }
                Ok(FeedDocument::Converted(converted))
            }
        }
    }

    async fn get_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = tokio::time::timeout(self.timeout, self.client.get(url).send())
            .await
            .map_err(|_| FetchError::Timeout)?
            .map_err(FetchError::Network)?;

        if !response.status().is_success() {
            return Err(FetchError::HttpStatus(response.status().as_u16()));
        }

        let bytes = read_limited_bytes(response, MAX_FEED_SIZE).await?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Err(FetchError::EmptyResponse);
        }
        Ok(bytes)
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    // Capture Content-Length for completeness check
    let expected_length = response.content_length();

    // Fast path: check Content-Length header
    if let Some(len) = expected_length {
        if len as usize > limit {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    // EDGE-005: Check for incomplete response (received fewer bytes than Content-Length)
    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}

/// Accepts documents whose root is a feed element (`rss`, `feed`, `RDF`)
/// or a JSON object, so relays answering with an HTML error page are
/// skipped instead of returned.
fn check_feed_markup(bytes: &[u8]) -> Result<(), FetchError> {
    let text = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    if text.trim_ascii_start().starts_with(b"{") {
        return serde_json::from_slice::<serde_json::Value>(text)
            .map(|_| ())
            .map_err(|e| FetchError::Malformed(format!("invalid JSON feed: {e}")));
    }

    let mut reader = Reader::from_reader(text);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                let root = e.local_name();
                return match root.as_ref() {
                    b"rss" | b"feed" | b"RDF" => Ok(()),
                    other => Err(FetchError::Malformed(format!(
                        "unexpected root element <{}>",
                        String::from_utf8_lossy(other)
                    ))),
                };
            }
            Ok(Event::Eof) => return Err(FetchError::Malformed("no root element".to_string())),
            Err(e) => return Err(FetchError::Malformed(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
}
