//! Paginated provider backed by the Custom Search JSON API.
//!
//! The backend caps each request at [`PER_REQUEST_CAP`] items and uses a
//! 1-based `start` offset, so larger requests are split into sequential,
//! paced page requests.

use std::time::Duration;

use reqwest::Client;
use tracing::{debug, warn};

use super::types::{CustomSearchResponse, Item};
use super::{
    ProviderError, ProviderId, ProviderResponse, SearchProvider, SearchResult, decode_response,
    non_empty,
};
use crate::config::{ApiKey, DEFAULT_PAGE_DELAY, DEFAULT_SEARCH_TIMEOUT};

const API_URL: &str = "https://www.googleapis.com/customsearch/v1";

pub const PER_REQUEST_CAP: usize = 10;

#[derive(Clone)]
pub struct CustomSearchProvider {
    http: Client,
    api_key: ApiKey,
    engine_id: String,
    base_url: String,
    timeout: Duration,
    page_delay: Duration,
}

impl CustomSearchProvider {
    pub fn new(http: Client, api_key: ApiKey, engine_id: String) -> Self {
        Self {
            http,
            api_key,
            engine_id,
            base_url: API_URL.to_string(),
            timeout: DEFAULT_SEARCH_TIMEOUT,
            page_delay: DEFAULT_PAGE_DELAY,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Pause between successive page requests. Never applied before the first.
    pub fn with_page_delay(mut self, delay: Duration) -> Self {
        self.page_delay = delay;
        self
    }

    #[cfg(test)]
    pub(crate) fn with_base_url(http: Client, base_url: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            ..Self::new(http, ApiKey::new("test-key"), "test-cx".to_string())
        }
        .with_page_delay(Duration::ZERO)
    }

    async fn fetch_page(&self, query: &str, start: usize, num: usize) -> Result<Vec<Item>, ProviderError> {
        let q = format!("{query} news");
        let start = start.to_string();
        let num = num.to_string();
        let response = self
            .http
            .get(&self.base_url)
            .query(&[
                ("key", self.api_key.expose()),
                ("cx", self.engine_id.as_str()),
                ("q", q.as_str()),
                ("num", num.as_str()),
                ("start", start.as_str()),
                ("sort", "date"),
            ])
            .header("User-Agent", crate::USER_AGENT)
            .timeout(self.timeout)
            .send()
            .await?;

        let body: CustomSearchResponse = decode_response(self.id(), response).await?;
        Ok(body.items)
    }
}

impl SearchProvider for CustomSearchProvider {
    fn id(&self) -> ProviderId {
        ProviderId::CustomSearch
    }

    async fn search(&self, query: &str, max_results: usize) -> ProviderResponse {
        let requests = max_results.div_ceil(PER_REQUEST_CAP);
        let mut results = Vec::new();

        for i in 0..requests {
            let num = PER_REQUEST_CAP.min(max_results.saturating_sub(results.len()));
            if num == 0 {
                break;
            }
            if i > 0 && !self.page_delay.is_zero() {
                tokio::time::sleep(self.page_delay).await;
            }

            let start = page_offset(i);
            match self.fetch_page(query, start, num).await {
                Ok(items) if items.is_empty() => {
                    debug!(start, "backend exhausted");
                    break;
                }
                Ok(items) => results.extend(items.into_iter().filter_map(to_result)),
                Err(e) => {
                    warn!(request = i + 1, start, error = %e, "stopping pagination");
                    return ProviderResponse::partial(results, e);
                }
            }
        }

        debug!(provider = %self.id(), count = results.len(), "custom search complete");
        ProviderResponse::complete(results)
    }
}

/// 1-based backend offset of the `i`-th (0-based) page request.
fn page_offset(i: usize) -> usize {
    i * PER_REQUEST_CAP + 1
}

fn to_result(item: Item) -> Option<SearchResult> {
    let title = non_empty(item.title)?;
    let url = non_empty(item.link)?;
    Some(SearchResult {
        title,
        url,
        snippet: item.snippet.unwrap_or_default(),
        source: source_name(item.display_link.as_deref()),
        published_at: None,
        provider_id: ProviderId::CustomSearch,
    })
}

/// `news.example.com` -> `News`.
fn source_name(display_link: Option<&str>) -> String {
    let Some(link) = display_link.map(str::trim).filter(|l| !l.is_empty()) else {
        return "Unknown".to_string();
    };
    match link.split_once('.') {
        Some((label, _)) => capitalize(label),
        None => link.to_string(),
    }
}

fn capitalize(label: &str) -> String {
    let mut chars = label.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}


#[cfg(test)]
mod http_tests {
    use super::*;
    use wiremock::matchers::{method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn items(start: usize, count: usize) -> serde_json::Value {
        let items: Vec<_> = (start..start + count)
            .map(|n| {
                serde_json::json!({
                    "title": format!("Result {n}"),
                    "link": format!("https://site{n}.example.com/story"),
                    "snippet": "snippet",
                    "displayLink": format!("site{n}.example.com"),
                })
            })
            .collect();
        serde_json::json!({ "items": items })
    }

    async fn mount_page(server: &MockServer, start: &str, num: &str, body: serde_json::Value) {
        Mock::given(method("GET"))
            .and(query_param("start", start))
            .and(query_param("num", num))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .expect(1)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn twenty_five_results_take_three_requests() {
        let server = MockServer::start().await;
        mount_page(&server, "1", "10", items(1, 10)).await;
        mount_page(&server, "11", "10", items(11, 10)).await;
        mount_page(&server, "21", "5", items(21, 5)).await;

        let provider = CustomSearchProvider::with_base_url(Client::new(), &server.uri());
        let response = provider.search("climate", 25).await;

        assert!(response.error.is_none());
        assert_eq!(response.results.len(), 25);
        assert_eq!(response.results[0].source, "Site1");

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 3);
        let q = requests[0]
            .url
            .query_pairs()
            .find(|(k, _)| k == "q")
            .map(|(_, v)| v.into_owned());
        assert_eq!(q.as_deref(), Some("climate news"));
    }

    #[tokio::test]
    async fn empty_page_stops_pagination() {
        let server = MockServer::start().await;
        mount_page(&server, "1", "10", items(1, 10)).await;
        mount_page(&server, "11", "10", serde_json::json!({})).await;

        let provider = CustomSearchProvider::with_base_url(Client::new(), &server.uri());
        let response = provider.search("q", 30).await;

        assert!(response.error.is_none());
        assert_eq!(response.results.len(), 10);
        assert_eq!(server.received_requests().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn failure_keeps_accumulated_results() {
        let server = MockServer::start().await;
        mount_page(&server, "1", "10", items(1, 10)).await;
        Mock::given(method("GET"))
            .and(query_param("start", "11"))
            .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({
                "error": {"code": 500, "message": "Backend Error"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = CustomSearchProvider::with_base_url(Client::new(), &server.uri());
        let response = provider.search("q", 30).await;

        assert_eq!(response.results.len(), 10);
        match response.error {
            Some(ProviderError::Api { code: 500, message }) => assert_eq!(message, "Backend Error"),
            other => panic!("expected Api(500), got: {other:?}"),
        }
        assert_eq!(server.received_requests().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn page_delay_applies_between_requests_only() {
        const DELAY: Duration = Duration::from_millis(300);
        let server = MockServer::start().await;
        mount_page(&server, "1", "10", items(1, 10)).await;
        mount_page(&server, "11", "2", items(11, 2)).await;

        let provider = CustomSearchProvider::with_base_url(Client::new(), &server.uri())
            .with_page_delay(DELAY);
        let started = std::time::Instant::now();
        let response = provider.search("q", 12).await;

        assert_eq!(response.results.len(), 12);
        // One pause for two pages; a pause before the first page would double it.
        let elapsed = started.elapsed();
        assert!(elapsed >= DELAY, "elapsed: {elapsed:?}");
        assert!(elapsed < DELAY * 2, "elapsed: {elapsed:?}");
    }
}
