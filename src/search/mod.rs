//! Search backends, the common result record, and cross-provider aggregation.

pub mod aggregator;
pub mod cache;
pub mod custom_search;
pub mod news_api;
mod types;

pub use aggregator::Aggregator;
pub use cache::{CacheStats, SearchCache};
pub use custom_search::CustomSearchProvider;
pub use news_api::NewsApiProvider;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;

use types::ErrorBody;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderId {
    NewsApi,
    CustomSearch,
}

impl ProviderId {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NewsApi => "news_api",
            Self::CustomSearch => "custom_search",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::NewsApi => "News API",
            Self::CustomSearch => "Google Custom Search",
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One candidate document as reported by a backend.
///
/// `url` is the identity used for deduplication. Providers never emit a
/// result with an empty `url` or an empty `title`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
    /// Display name of the originating site.
    pub source: String,
    pub published_at: Option<DateTime<Utc>>,
    pub provider_id: ProviderId,
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("rate limited by backend")]
    RateLimited,

    #[error("credentials rejected: {0}")]
    Unauthorized(String),

    #[error("backend error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("malformed response: {0}")]
    Decode(String),
}

impl ProviderError {
    /// Whether a later call with the same query could plausibly succeed.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::RateLimited | Self::Network(_) => true,
            Self::Api { code, .. } => *code >= 500,
            Self::Unauthorized(_) | Self::Decode(_) => false,
        }
    }
}

/// Results of one provider call.
///
/// A failed call still carries whatever was accumulated before the failure
/// (relevant for paginated backends).
#[derive(Debug, Default)]
pub struct ProviderResponse {
    pub results: Vec<SearchResult>,
    pub error: Option<ProviderError>,
}

impl ProviderResponse {
    pub fn complete(results: Vec<SearchResult>) -> Self {
        Self {
            results,
            error: None,
        }
    }

    pub fn partial(results: Vec<SearchResult>, error: ProviderError) -> Self {
        Self {
            results,
            error: Some(error),
        }
    }

    pub fn failed(error: ProviderError) -> Self {
        Self::partial(Vec::new(), error)
    }
}

/// A search backend.
///
/// `search` never fails outright: transport and backend errors are returned
/// alongside the (possibly empty) results so the aggregator can report them
/// and carry on with other providers.
#[allow(async_fn_in_trait)]
pub trait SearchProvider {
    fn id(&self) -> ProviderId;

    async fn search(&self, query: &str, max_results: usize) -> ProviderResponse;
}

/// The configured backends.
pub enum Backend {
    NewsApi(NewsApiProvider),
    CustomSearch(CustomSearchProvider),
}

impl SearchProvider for Backend {
    fn id(&self) -> ProviderId {
        match self {
            Self::NewsApi(p) => p.id(),
            Self::CustomSearch(p) => p.id(),
        }
    }

    async fn search(&self, query: &str, max_results: usize) -> ProviderResponse {
        match self {
            Self::NewsApi(p) => p.search(query, max_results).await,
            Self::CustomSearch(p) => p.search(query, max_results).await,
        }
    }
}

/// Decode a successful JSON body, or classify the failure by status code.
pub(crate) async fn decode_response<T: DeserializeOwned>(
    provider: ProviderId,
    response: reqwest::Response,
) -> Result<T, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return response
            .json::<T>()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()));
    }

    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .ok()
        .and_then(ErrorBody::into_message)
        .unwrap_or_else(|| snippet(&text, 200).to_string());

    warn!(%provider, status = status.as_u16(), "search backend returned an error");
    Err(match status.as_u16() {
        429 => ProviderError::RateLimited,
        401 | 403 => ProviderError::Unauthorized(message),
        code => ProviderError::Api { code, message },
    })
}

fn snippet(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Trimmed, non-empty text or `None`.
pub(crate) fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
