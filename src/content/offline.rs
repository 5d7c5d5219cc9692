use futures::StreamExt;
use std::time::Duration;
use thiserror::Error;

use super::extractor::Extractor;
use super::sanitizer::Sanitizer;
use crate::storage::Article;
use crate::util::{validate_url, UrlValidationError};

const MAX_PAGE_SIZE: usize = 5 * 1024 * 1024; // 5MB

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("Request timed out")]
    Timeout,
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    #[error("Response too large (exceeds {0} bytes)")]
    ResponseTooLarge(usize),
    #[error("Invalid UTF-8 in response")]
    InvalidUtf8,
    #[error("Empty response body")]
    EmptyResponse,
    #[error("Article has no source URL")]
    MissingUrl,
    #[error(transparent)]
    InvalidUrl(#[from] UrlValidationError),
}

impl ContentError {
    /// Returns true if this error is transient and the request should be retried.
    fn is_retryable(&self) -> bool {
        match self {
            ContentError::Timeout | ContentError::Network(_) => true,
            ContentError::HttpStatus(status) => *status >= 500,
            ContentError::ResponseTooLarge(_)
            | ContentError::InvalidUtf8
            | ContentError::EmptyResponse
            | ContentError::MissingUrl
            | ContentError::InvalidUrl(_) => false,
        }
    }
}

/// Reader-mode content prepared for an article.
///
/// `html` is the sanitized markup of the extracted region. `error` is set
/// when the page could not be fetched, or when extraction was rejected and
/// the feed carries no summary to fall back to; `text` then holds the
/// feed-provided summary (possibly empty).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfflineContent {
    pub text: String,
    pub html: String,
    pub error: Option<String>,
}

/// Fetches article pages and turns them into offline reader content.
#[derive(Debug, Clone)]
pub struct OfflineFetcher {
    client: reqwest::Client,
    extractor: Extractor,
    sanitizer: Sanitizer,
    timeout: Duration,
    max_retries: u32,
}

impl OfflineFetcher {
    pub fn new(client: reqwest::Client, sanitizer: Sanitizer, extractor: Extractor) -> Self {
        Self {
            client,
            extractor,
            sanitizer,
            timeout: DEFAULT_TIMEOUT,
            max_retries: 3,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Builds offline content for `article`.
    ///
    /// Never fails: a fetch error is recorded in [`OfflineContent::error`]
    /// and the feed summary is kept, so the article can still be stored as
    /// cached.
    pub async fn prepare(&self, article: &Article) -> OfflineContent {
        let fallback = if article.content.trim().is_empty() {
            article.description.as_str()
        } else {
            article.content.as_str()
        };

        match self.fetch_page(&article.url).await {
            Ok(page) => {
                let extracted = self.extractor.extract(&page);
                match self.extractor.validate(&extracted.text) {
                    Ok(()) => OfflineContent {
                        text: extracted.text,
                        html: extracted.html,
                        error: None,
                    },
                    Err(reason) => {
                        tracing::debug!(article = %article.id, %reason, "Extraction rejected, using feed content");
                        // Nothing readable from either source
                        let error = fallback.trim().is_empty().then(|| reason.to_string());
                        OfflineContent {
                            text: fallback.to_string(),
                            html: article.html_content.clone(),
                            error,
                        }
                    }
                }
            }
            Err(e) => {
                tracing::warn!(article = %article.id, url = %article.url, error = %e, "Offline fetch failed, keeping feed summary");
                OfflineContent {
                    text: fallback.to_string(),
                    html: article.html_content.clone(),
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Fetches the raw page at `url`, retrying transient failures with
    /// exponential backoff (1s, 2s, 4s).
    pub async fn fetch_page(&self, url: &str) -> Result<String, ContentError> {
        if url.trim().is_empty() {
            return Err(ContentError::MissingUrl);
        }
        let parsed = validate_url(url)?;
        let mut retry_count = 0;

        loop {
            match self.fetch_once(parsed.as_str()).await {
                Ok(page) => return Ok(page),
                Err(e) if e.is_retryable() && retry_count < self.max_retries => {
                    let delay = 1u64 << retry_count;
                    tracing::debug!(
                        error = %e,
                        retry = retry_count + 1,
                        delay_secs = delay,
                        "Retrying page fetch after transient error"
                    );
                    tokio::time::sleep(Duration::from_secs(delay)).await;
                    retry_count += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn fetch_once(&self, url: &str) -> Result<String, ContentError> {
        let response = tokio::time::timeout(self.timeout, self.client.get(url).send())
            .await
            .map_err(|_| ContentError::Timeout)?
            .map_err(ContentError::Network)?;

        if !response.status().is_success() {
            return Err(ContentError::HttpStatus(response.status().as_u16()));
        }

        let text = read_limited_text(response, MAX_PAGE_SIZE).await?;
        if text.trim().is_empty() {
            return Err(ContentError::EmptyResponse);
        }
        Ok(text)
    }
}

async fn read_limited_text(
    response: reqwest::Response,
    limit: usize,
) -> Result<String, ContentError> {
    // Fast path: check Content-Length header
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(ContentError::ResponseTooLarge(limit));
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(ContentError::Network)?;
        // SEC-003: Use saturating_add to prevent integer overflow in size check
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(ContentError::ResponseTooLarge(limit));
        }
        bytes.extend_from_slice(&chunk);
    }

    String::from_utf8(bytes).map_err(|_| ContentError::InvalidUtf8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const BODY: &str = "Rail operators confirmed on Monday that the new timetable will add \
        late-night services on three lines, after months of negotiation with the regional \
        transport authority over staffing levels and maintenance windows for the tunnels.";

    fn article(url: &str) -> Article {
        Article {
            id: "a1".into(),
            url: url.into(),
            description: "Feed summary".into(),
            html_content: "<p>Feed summary</p>".into(),
            ..Article::default()
        }
    }

    fn fetcher() -> OfflineFetcher {
        OfflineFetcher::new(
            reqwest::Client::new(),
            Sanitizer::default(),
            Extractor::default(),
        )
        .with_max_retries(0)
    }

    #[tokio::test]
    async fn test_prepare_extracts_article_body() {
        let mock_server = MockServer::start().await;
        let page = format!(
            "<html><body><nav>Menu links</nav><article><p>{BODY}</p></article></body></html>"
        );
        Mock::given(method("GET"))
            .and(path("/story"))
            .respond_with(ResponseTemplate::new(200).set_body_string(page))
            .mount(&mock_server)
            .await;

        let content = fetcher()
            .prepare(&article(&format!("{}/story", mock_server.uri())))
            .await;

        assert_eq!(content.error, None);
        assert_eq!(content.text, BODY);
        assert_eq!(content.html, format!("<p>{BODY}</p>"));
        assert!(!content.html.contains("Menu links"));
    }

    #[tokio::test]
    async fn test_prepare_falls_back_on_thin_page() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string("<html><body><p>Login</p></body></html>"),
            )
            .mount(&mock_server)
            .await;

        let content = fetcher()
            .prepare(&article(&format!("{}/thin", mock_server.uri())))
            .await;

        assert_eq!(content.error, None);
        assert_eq!(content.text, "Feed summary");
        assert_eq!(content.html, "<p>Feed summary</p>");
    }

    #[tokio::test]
    async fn test_prepare_thin_page_without_summary_is_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string("<html><body><p>Login</p></body></html>"),
            )
            .mount(&mock_server)
            .await;

        let bare = Article {
            description: String::new(),
            html_content: String::new(),
            ..article(&format!("{}/thin", mock_server.uri()))
        };
        let content = fetcher().prepare(&bare).await;

        assert_eq!(content.text, "");
        assert!(content
            .error
            .as_deref()
            .is_some_and(|e| e.starts_with("extracted text too short")));
    }

    #[tokio::test]
    async fn test_prepare_records_fetch_failure() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let content = fetcher()
            .prepare(&article(&format!("{}/gone", mock_server.uri())))
            .await;

        assert_eq!(content.text, "Feed summary");
        assert_eq!(content.error.as_deref(), Some("HTTP error: status 404"));
    }

    #[tokio::test]
    async fn test_missing_url() {
        let content = fetcher().prepare(&article("")).await;
        assert_eq!(content.error.as_deref(), Some("Article has no source URL"));
    }

    #[tokio::test]
    async fn test_non_http_url_rejected() {
        let result = fetcher().fetch_page("file:///etc/passwd").await;
        assert!(matches!(result, Err(ContentError::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn test_server_error_retried() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<p>ok</p>"))
            .mount(&mock_server)
            .await;

        let result = fetcher()
            .with_max_retries(1)
            .fetch_page(&format!("{}/flaky", mock_server.uri()))
            .await;
        assert_eq!(result.unwrap(), "<p>ok</p>");
    }

    #[tokio::test]
    async fn test_empty_body_is_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("  "))
            .mount(&mock_server)
            .await;

        let result = fetcher().fetch_page(&mock_server.uri()).await;
        assert!(matches!(result, Err(ContentError::EmptyResponse)));
    }
}
