use std::collections::HashSet;

use futures::future::join_all;
use reqwest::Client;
use tracing::{debug, info};

use super::{
    Backend, CustomSearchProvider, NewsApiProvider, ProviderResponse, SearchCache, SearchProvider,
    SearchResult,
};
use crate::config::{DEFAULT_PRIMARY_SHARE, PipelineConfig};
use crate::diagnostics::{Diagnostic, DiagnosticSink, TracingSink};

/// Fans a query out to the configured providers and merges their results.
///
/// The primary provider is asked for `floor(max_results * primary_share)`
/// results first. Secondary providers then run concurrently, each asked for
/// whatever the primary left unfilled. Merged results are deduplicated by
/// exact URL (first occurrence wins), truncated to `max_results` and cached
/// per `(query, max_results)`.
pub struct Aggregator<P> {
    primary: Option<P>,
    secondary: Vec<P>,
    primary_share: f64,
    cache: SearchCache,
}

impl Aggregator<Backend> {
    /// Build the active provider set from validated configuration.
    ///
    /// Providers with missing or placeholder credentials are left out and
    /// reported to `sink` as [`Diagnostic::ProviderDisabled`].
    pub fn from_config(http: &Client, config: &PipelineConfig, sink: &dyn DiagnosticSink) -> Self {
        let primary = match config.credentials.news_api() {
            Ok(key) => Some(Backend::NewsApi(
                NewsApiProvider::new(http.clone(), key).with_timeout(config.search_timeout),
            )),
            Err(e) => {
                sink.report(Diagnostic::ProviderDisabled(e));
                None
            }
        };

        let mut secondary = Vec::new();
        match config.credentials.custom_search() {
            Ok((key, engine_id)) => secondary.push(Backend::CustomSearch(
                CustomSearchProvider::new(http.clone(), key, engine_id)
                    .with_timeout(config.search_timeout)
                    .with_page_delay(config.page_delay),
            )),
            Err(e) => sink.report(Diagnostic::ProviderDisabled(e)),
        }

        Self::new(primary, secondary)
            .with_primary_share(config.primary_share)
            .with_cache(SearchCache::new(config.cache_ttl, config.cache_capacity))
    }
}

impl<P: SearchProvider> Aggregator<P> {
    pub fn new(primary: Option<P>, secondary: Vec<P>) -> Self {
        Self {
            primary,
            secondary,
            primary_share: DEFAULT_PRIMARY_SHARE,
            cache: SearchCache::default(),
        }
    }

    /// Clamped to `[0, 1]`.
    pub fn with_primary_share(mut self, share: f64) -> Self {
        self.primary_share = share.clamp(0.0, 1.0);
        self
    }

    pub fn with_cache(mut self, cache: SearchCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn cache(&self) -> &SearchCache {
        &self.cache
    }

    /// Display names of the configured providers, primary first.
    pub fn available_providers(&self) -> Vec<&'static str> {
        self.providers().map(|p| p.id().display_name()).collect()
    }

    pub fn has_providers(&self) -> bool {
        self.providers().next().is_some()
    }

    pub async fn aggregate(&self, query: &str, max_results: usize) -> Vec<SearchResult> {
        self.aggregate_with(query, max_results, &TracingSink).await
    }

    /// Like [`aggregate`](Self::aggregate), reporting provider failures to `sink`.
    ///
    /// Never fails: with no providers, or with every provider failing, the
    /// result is empty.
    pub async fn aggregate_with(
        &self,
        query: &str,
        max_results: usize,
        sink: &dyn DiagnosticSink,
    ) -> Vec<SearchResult> {
        if max_results == 0 || !self.has_providers() {
            return Vec::new();
        }
        self.cache
            .get_or_populate(query, max_results, || self.collect(query, max_results, sink))
            .await
    }

    async fn collect(
        &self,
        query: &str,
        max_results: usize,
        sink: &dyn DiagnosticSink,
    ) -> Vec<SearchResult> {
        let mut merged = Vec::new();

        if let Some(primary) = &self.primary {
            let quota = primary_quota(max_results, self.primary_share);
            if quota > 0 {
                let response = primary.search(query, quota).await;
                merged.extend(take(primary, response, sink));
            }
        }

        let remaining = max_results.saturating_sub(merged.len());
        if remaining > 0 && !self.secondary.is_empty() {
            let responses = join_all(self.secondary.iter().map(|p| p.search(query, remaining))).await;
            for (provider, response) in self.secondary.iter().zip(responses) {
                merged.extend(take(provider, response, sink));
            }
        } else if remaining == 0 {
            debug!("primary provider filled the quota, skipping secondary providers");
        }

        let raw = merged.len();
        let mut results = dedup_by_url(merged);
        results.truncate(max_results);
        info!(query, raw, unique = results.len(), "search aggregated");
        results
    }

    fn providers(&self) -> impl Iterator<Item = &P> {
        self.primary.iter().chain(self.secondary.iter())
    }
}

fn take<P: SearchProvider>(
    provider: &P,
    response: ProviderResponse,
    sink: &dyn DiagnosticSink,
) -> Vec<SearchResult> {
    if let Some(error) = response.error {
        sink.report(Diagnostic::ProviderFailed {
            provider: provider.id(),
            error,
        });
    }
    debug!(provider = %provider.id(), count = response.results.len(), "provider results");
    response.results
}

/// Number of results requested from the primary provider.
pub fn primary_quota(max_results: usize, share: f64) -> usize {
    let quota = (max_results as f64 * share.clamp(0.0, 1.0)).floor() as usize;
    quota.min(max_results)
}

/// Keep the first result for each URL, preserving order. Results with an
/// empty URL are dropped.
pub fn dedup_by_url(results: Vec<SearchResult>) -> Vec<SearchResult> {
    let mut seen = HashSet::new();
    results
        .into_iter()
        .filter(|r| !r.url.is_empty() && seen.insert(r.url.clone()))
        .collect()
}
