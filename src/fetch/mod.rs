pub mod guard;
pub mod pacing;
pub mod retry;

use std::time::Duration;

use encoding_rs::{Encoding, UTF_8};
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use reqwest::Client;
use tracing::{debug, warn};
use url::Url;

use crate::config::{DEFAULT_FETCH_DELAY, DEFAULT_REQUEST_TIMEOUT, PipelineConfig};
use pacing::HostPacer;
use retry::{RETRYABLE_STATUSES, RetryPolicy};

pub const MAX_RESPONSE_BYTES: usize = 10_000_000;

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";
const BROWSER_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8";

#[derive(Debug, thiserror::Error)]
pub enum FetchCause {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("unsupported scheme '{0}'")]
    InvalidScheme(String),

    #[error("internal host '{0}' is blocked")]
    BlockedHost(String),

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(#[source] reqwest::Error),

    #[error("response too large (>{} bytes)", MAX_RESPONSE_BYTES)]
    TooLarge,
}

impl FetchCause {
    /// Transient failures under the default retry policy.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Status(code) => RETRYABLE_STATUSES.contains(code),
            Self::Timeout => true,
            Self::Network(e) => !e.is_builder() && !e.is_redirect(),
            Self::InvalidUrl(_) | Self::InvalidScheme(_) | Self::BlockedHost(_) | Self::TooLarge => {
                false
            }
        }
    }
}

impl From<reqwest::Error> for FetchCause {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else {
            Self::Network(e)
        }
    }
}

/// A page that could not be retrieved. `attempts` is zero when the URL was
/// rejected before any request was made.
#[derive(Debug, thiserror::Error)]
#[error("fetch failed for {} after {attempts} attempt(s): {cause}", guard::redact(.url))]
pub struct FetchError {
    pub url: String,
    pub attempts: u32,
    #[source]
    pub cause: FetchCause,
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        self.cause.is_transient()
    }
}

#[derive(Debug, Clone)]
pub struct RawPage {
    /// The URL as requested.
    pub url: String,
    /// The URL after redirects.
    pub final_url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
}

/// HTTP transport for page fetches: per-host pacing, per-attempt timeout,
/// retry with backoff, and browser-like request headers.
pub struct FetchSession {
    client: Client,
    headers: HeaderMap,
    policy: RetryPolicy,
    pacer: HostPacer,
    timeout: Duration,
    block_private_hosts: bool,
}

impl FetchSession {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            headers: browser_headers(),
            policy: RetryPolicy::default(),
            pacer: HostPacer::new(DEFAULT_FETCH_DELAY),
            timeout: DEFAULT_REQUEST_TIMEOUT,
            block_private_hosts: true,
        }
    }

    pub fn from_config(client: Client, config: &PipelineConfig) -> Self {
        Self::new(client)
            .with_retry_policy(
                RetryPolicy::new(config.max_retries, config.backoff_factor)
                    .with_jitter(config.concurrency > 1),
            )
            .with_fetch_delay(config.fetch_delay)
            .with_timeout(config.request_timeout)
            .with_block_private_hosts(config.block_private_hosts)
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.pacer = HostPacer::new(delay);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_block_private_hosts(mut self, block: bool) -> Self {
        self.block_private_hosts = block;
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Fetch `raw_url`, retrying transient failures per the retry policy.
    ///
    /// Every attempt, retries included, waits for the host's pacing slot.
    pub async fn fetch(&self, raw_url: &str) -> Result<RawPage, FetchError> {
        let url = guard::check_url(raw_url, self.block_private_hosts).map_err(|cause| {
            warn!(url = %guard::redact(raw_url), error = %cause, "rejected fetch target");
            FetchError {
                url: raw_url.to_string(),
                attempts: 0,
                cause,
            }
        })?;
        let host = guard::host_of(&url);

        let mut retry = 0;
        loop {
            self.pacer.wait(&host).await;
            let attempt = retry + 1;

            match self.attempt(raw_url, &url).await {
                Ok(page) => {
                    debug!(
                        url = %guard::redact(&page.final_url),
                        attempt,
                        bytes = page.body.len(),
                        "page fetched"
                    );
                    return Ok(page);
                }
                Err(cause) if self.policy.should_retry(retry, &cause) => {
                    let delay = self.policy.backoff(retry);
                    debug!(
                        url = %guard::redact(raw_url),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %cause,
                        "retrying fetch"
                    );
                    tokio::time::sleep(delay).await;
                    retry += 1;
                }
                Err(cause) => {
                    return Err(FetchError {
                        url: raw_url.to_string(),
                        attempts: attempt,
                        cause,
                    });
                }
            }
        }
    }

    async fn attempt(&self, raw_url: &str, url: &Url) -> Result<RawPage, FetchCause> {
        let mut response = self
            .client
            .get(url.clone())
            .headers(self.headers.clone())
            .timeout(self.timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchCause::Status(status.as_u16()));
        }

        // Redirects may land somewhere the requested URL would not be allowed to reach.
        let final_url = response.url().to_string();
        if final_url != url.as_str() {
            guard::check_url(&final_url, self.block_private_hosts)?;
        }

        if let Some(len) = response.content_length()
            && len > MAX_RESPONSE_BYTES as u64
        {
            return Err(FetchCause::TooLarge);
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            body.extend_from_slice(&chunk);
            if body.len() > MAX_RESPONSE_BYTES {
                return Err(FetchCause::TooLarge);
            }
        }

        Ok(RawPage {
            url: raw_url.to_string(),
            final_url,
            status: status.as_u16(),
            body: decode_body(&body, content_type.as_deref()),
            content_type,
        })
    }
}

fn browser_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
    headers.insert(ACCEPT, HeaderValue::from_static(BROWSER_ACCEPT));
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));
    headers.insert("Upgrade-Insecure-Requests", HeaderValue::from_static("1"));
    headers
}

/// Decode with the `Content-Type` charset when it names a known encoding,
/// UTF-8 (lossy) otherwise. A byte-order mark overrides both.
fn decode_body(bytes: &[u8], content_type: Option<&str>) -> String {
    let encoding = content_type
        .and_then(charset)
        .and_then(|label| Encoding::for_label(label.as_bytes()))
        .unwrap_or(UTF_8);
    let (text, _, _) = encoding.decode(bytes);
    text.into_owned()
}

fn charset(content_type: &str) -> Option<&str> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches('"'))
    })
}


#[cfg(test)]
mod http_tests {
    use super::*;
    use wiremock::matchers::{headers, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn session() -> FetchSession {
        FetchSession::new(Client::new())
            .with_retry_policy(RetryPolicy::new(3, 0.0))
            .with_fetch_delay(Duration::ZERO)
            .with_timeout(Duration::from_secs(5))
            .with_block_private_hosts(false)
    }

    #[tokio::test]
    async fn returns_body_and_metadata() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/story"))
            .and(headers("accept-language", vec!["en-US", "en;q=0.5"]))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(
                    "<html><body><p>hello</p></body></html>",
                    "text/html; charset=utf-8",
                ),
            )
            .expect(1)
            .mount(&server)
            .await;

        let url = format!("{}/story", server.uri());
        let page = session().fetch(&url).await.unwrap();

        assert_eq!(page.url, url);
        assert_eq!(page.status, 200);
        assert!(page.body.contains("hello"));
        assert_eq!(page.content_type.as_deref(), Some("text/html; charset=utf-8"));
    }

    #[tokio::test]
    async fn persistent_503_exhausts_retries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(503))
            .expect(4)
            .mount(&server)
            .await;

        let err = session()
            .fetch(&format!("{}/flaky", server.uri()))
            .await
            .unwrap_err();

        assert_eq!(err.attempts, 4);
        assert!(matches!(err.cause, FetchCause::Status(503)));
        assert!(err.url.ends_with("/flaky"));
    }

    #[tokio::test]
    async fn recovers_after_transient_failures() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/recovering"))
            .respond_with(ResponseTemplate::new(502))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/recovering"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;

        let page = session()
            .fetch(&format!("{}/recovering", server.uri()))
            .await
            .unwrap();
        assert_eq!(page.body, "ok");
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let err = session()
            .fetch(&format!("{}/missing", server.uri()))
            .await
            .unwrap_err();
        assert_eq!(err.attempts, 1);
        assert!(matches!(err.cause, FetchCause::Status(404)));
    }

    #[tokio::test]
    async fn slow_responses_time_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .expect(2)
            .mount(&server)
            .await;

        let err = session()
            .with_retry_policy(RetryPolicy::new(1, 0.0))
            .with_timeout(Duration::from_millis(50))
            .fetch(&format!("{}/slow", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err.cause, FetchCause::Timeout), "got: {err}");
        assert_eq!(err.attempts, 2);
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("x".repeat(MAX_RESPONSE_BYTES + 1)))
            .mount(&server)
            .await;

        let err = session()
            .fetch(&format!("{}/huge", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err.cause, FetchCause::TooLarge));
    }

    #[tokio::test]
    async fn internal_hosts_are_rejected_without_a_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let err = session()
            .with_block_private_hosts(true)
            .fetch(&format!("{}/secret", server.uri()))
            .await
            .unwrap_err();
        assert_eq!(err.attempts, 0);
        assert!(matches!(err.cause, FetchCause::BlockedHost(_)));
    }
}
