//! Single-call provider backed by the News API `everything` endpoint.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use tracing::debug;

use super::types::{Article, NewsApiResponse};
use super::{
    ProviderError, ProviderId, ProviderResponse, SearchProvider, SearchResult, decode_response,
    non_empty,
};
use crate::config::{ApiKey, DEFAULT_SEARCH_TIMEOUT};

const API_URL: &str = "https://newsapi.org/v2/everything";

/// Backend page-size cap. Larger requests are clamped, never split.
pub const PAGE_SIZE_CAP: usize = 20;

#[derive(Clone)]
pub struct NewsApiProvider {
    http: Client,
    api_key: ApiKey,
    base_url: String,
    timeout: Duration,
}

impl NewsApiProvider {
    pub fn new(http: Client, api_key: ApiKey) -> Self {
        Self {
            http,
            api_key,
            base_url: API_URL.to_string(),
            timeout: DEFAULT_SEARCH_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[cfg(test)]
    pub(crate) fn with_base_url(http: Client, base_url: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            ..Self::new(http, ApiKey::new("test-key"))
        }
    }

    async fn fetch(&self, query: &str, page_size: usize) -> Result<Vec<SearchResult>, ProviderError> {
        let page_size = page_size.to_string();
        let response = self
            .http
            .get(&self.base_url)
            .query(&[
                ("q", query),
                ("apiKey", self.api_key.expose()),
                ("language", "en"),
                ("sortBy", "relevancy"),
                ("pageSize", page_size.as_str()),
            ])
            .header("User-Agent", crate::USER_AGENT)
            .timeout(self.timeout)
            .send()
            .await?;

        let body: NewsApiResponse = decode_response(self.id(), response).await?;
        let results: Vec<_> = body.articles.into_iter().filter_map(to_result).collect();
        debug!(provider = %self.id(), count = results.len(), "news api search complete");
        Ok(results)
    }
}

impl SearchProvider for NewsApiProvider {
    fn id(&self) -> ProviderId {
        ProviderId::NewsApi
    }

    async fn search(&self, query: &str, max_results: usize) -> ProviderResponse {
        if max_results == 0 {
            return ProviderResponse::default();
        }
        match self.fetch(query, max_results.min(PAGE_SIZE_CAP)).await {
            Ok(results) => ProviderResponse::complete(results),
            Err(e) => ProviderResponse::failed(e),
        }
    }
}

fn to_result(article: Article) -> Option<SearchResult> {
    let title = non_empty(article.title)?;
    let url = non_empty(article.url)?;
    let source = article
        .source
        .and_then(|s| non_empty(s.name))
        .unwrap_or_else(|| "Unknown".to_string());
    let published_at = article
        .published_at
        .as_deref()
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|dt| dt.with_timezone(&Utc));

    Some(SearchResult {
        title,
        url,
        snippet: article.description.unwrap_or_default(),
        source,
        published_at,
        provider_id: ProviderId::NewsApi,
    })
}


#[cfg(test)]
mod http_tests {
    use super::*;
    use wiremock::matchers::{method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn clamps_page_size_to_backend_cap() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("q", "climate summit"))
            .and(query_param("pageSize", "20"))
            .and(query_param("apiKey", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "ok",
                "articles": [
                    {"title": "One", "url": "https://a.com/1", "source": {"name": "A"}},
                    {"title": "", "url": "https://a.com/2", "source": {"name": "A"}},
                    {"title": "Three", "url": "https://a.com/3", "source": null}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = NewsApiProvider::with_base_url(Client::new(), &server.uri());
        let response = provider.search("climate summit", 50).await;

        assert!(response.error.is_none());
        assert_eq!(response.results.len(), 2);
        assert_eq!(response.results[1].source, "Unknown");
        assert!(response.results.iter().all(|r| r.provider_id == ProviderId::NewsApi));
    }

    #[tokio::test]
    async fn unauthorized_is_reported_not_raised() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
                "status": "error",
                "code": "apiKeyInvalid",
                "message": "Your API key is invalid."
            })))
            .mount(&server)
            .await;

        let provider = NewsApiProvider::with_base_url(Client::new(), &server.uri());
        let response = provider.search("q", 5).await;

        assert!(response.results.is_empty());
        match response.error {
            Some(ProviderError::Unauthorized(msg)) => assert!(msg.contains("invalid")),
            other => panic!("expected Unauthorized, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn rate_limit_is_classified() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let provider = NewsApiProvider::with_base_url(Client::new(), &server.uri());
        let response = provider.search("q", 5).await;
        assert!(matches!(response.error, Some(ProviderError::RateLimited)));
    }

    #[tokio::test]
    async fn zero_results_requested_skips_backend() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let provider = NewsApiProvider::with_base_url(Client::new(), &server.uri());
        let response = provider.search("q", 0).await;
        assert!(response.results.is_empty());
        assert!(response.error.is_none());
    }
}
