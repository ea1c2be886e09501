//! Search, fetch and extract in one run.

pub mod report;

use std::collections::HashSet;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use reqwest::Client;
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::config::{ConfigError, PipelineConfig};
use crate::diagnostics::{Diagnostic, DiagnosticSink, Diagnostics, TracingSink};
use crate::extract::{ContentRecord, ExtractionError, Extractor};
use crate::fetch::{FetchError, FetchSession};
use crate::search::{Aggregator, Backend, SearchProvider, SearchResult};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_REDIRECTS: usize = 10;

/// Placeholder relevance attached to every record; results are not ranked.
const DEFAULT_RELEVANCE: f64 = 1.0;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Why a run produced nothing. Not an error: the caller still gets an
/// (empty) report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Exhaustion {
    #[error("no search providers are configured")]
    NoProviders,

    #[error("search returned no results")]
    NoResults,
}

/// Failure to turn one URL into a record.
#[derive(Debug, thiserror::Error)]
pub enum PageError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("extraction failed for {url}: {error}")]
    Extract {
        url: String,
        #[source]
        error: ExtractionError,
    },
}

impl From<PageError> for Diagnostic {
    fn from(e: PageError) -> Self {
        match e {
            PageError::Fetch(e) => Diagnostic::FetchFailed(e),
            PageError::Extract { url, error } => Diagnostic::ExtractionFailed { url, error },
        }
    }
}

#[derive(Debug, Clone)]
pub struct FailedUrl {
    pub url: String,
    pub reason: String,
}

#[derive(Debug)]
pub struct RunReport {
    pub queries: Vec<String>,
    /// Successfully extracted records, in search-result order.
    pub records: Vec<ContentRecord>,
    /// URLs handed to the fetch stage.
    pub attempted: usize,
    pub failed: Vec<FailedUrl>,
    pub exhausted: Option<Exhaustion>,
    /// The run deadline passed before every URL was processed.
    pub timed_out: bool,
    pub elapsed: Duration,
    pub diagnostics: Vec<Diagnostic>,
}

impl RunReport {
    pub fn succeeded(&self) -> usize {
        self.records.len()
    }

    pub fn into_records(self) -> Vec<ContentRecord> {
        self.records
    }
}

/// A URL queued for fetching, with the metadata its record will carry.
#[derive(Debug, Clone)]
struct Target {
    url: String,
    metadata: Map<String, Value>,
}

impl Target {
    fn new(query: &str, result: SearchResult) -> Self {
        let mut metadata = Map::new();
        metadata.insert("search_query".into(), Value::from(query));
        metadata.insert("source".into(), Value::from(result.source));
        metadata.insert("provider".into(), Value::from(result.provider_id.as_str()));
        metadata.insert("relevance_score".into(), Value::from(DEFAULT_RELEVANCE));
        Self {
            url: result.url,
            metadata,
        }
    }
}

pub struct Pipeline<P = Backend> {
    config: PipelineConfig,
    aggregator: Aggregator<P>,
    session: FetchSession,
    extractor: Extractor,
}

impl Pipeline<Backend> {
    /// Validate `config` and build the provider set, fetch session and
    /// extractor. Providers without usable credentials are logged and left out.
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        let http = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()?;

        let aggregator = Aggregator::from_config(&http, &config, &TracingSink);
        let session = FetchSession::from_config(http, &config);
        Ok(Self::from_parts(config, aggregator, session))
    }
}

impl<P: SearchProvider> Pipeline<P> {
    pub fn from_parts(config: PipelineConfig, aggregator: Aggregator<P>, session: FetchSession) -> Self {
        Self {
            config,
            aggregator,
            session,
            extractor: Extractor::new(),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn aggregator(&self) -> &Aggregator<P> {
        &self.aggregator
    }

    /// Gather up to `max_results` records for `query`.
    ///
    /// Never fails: per-URL and per-provider errors end up in the report's
    /// `failed` list and `diagnostics`.
    pub async fn run(&self, query: &str, max_results: usize) -> RunReport {
        self.run_many(&[query], max_results).await
    }

    /// Like [`run`](Self::run) for several phrasings of one claim.
    ///
    /// Each query is aggregated on its own; URLs already produced by an
    /// earlier query are skipped, so each record's metadata names the first
    /// query that found it.
    pub async fn run_many<S: AsRef<str>>(&self, queries: &[S], max_per_query: usize) -> RunReport {
        let started = Instant::now();
        let deadline = self.config.run_timeout.map(|t| tokio::time::Instant::now() + t);
        let sink = Diagnostics::new();
        let queries: Vec<String> = queries.iter().map(|q| q.as_ref().to_string()).collect();
        info!(queries = ?queries, max_per_query, "pipeline run started");

        let mut report = RunReport {
            queries,
            records: Vec::new(),
            attempted: 0,
            failed: Vec::new(),
            exhausted: None,
            timed_out: false,
            elapsed: Duration::ZERO,
            diagnostics: Vec::new(),
        };

        if !self.aggregator.has_providers() {
            report.exhausted = Some(Exhaustion::NoProviders);
        } else {
            let search = self.collect_targets(&report.queries, max_per_query, &sink);
            let targets = match deadline {
                Some(at) => tokio::time::timeout_at(at, search).await.ok(),
                None => Some(search.await),
            };
            match targets {
                None => {
                    warn!("run deadline reached during search");
                    report.timed_out = true;
                }
                Some(targets) if targets.is_empty() => report.exhausted = Some(Exhaustion::NoResults),
                Some(targets) => self.process_all(targets, deadline, &sink, &mut report).await,
            }
        }

        if let Some(exhaustion) = report.exhausted {
            sink.report(Diagnostic::Exhausted(exhaustion));
        }
        report.elapsed = started.elapsed();
        report.diagnostics = sink.into_entries();

        info!(
            attempted = report.attempted,
            succeeded = report.succeeded(),
            failed = report.failed.len(),
            timed_out = report.timed_out,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "pipeline run finished"
        );
        report
    }

    /// Fetch and extract a single page.
    pub async fn extract_url(&self, url: &str) -> Result<ContentRecord, PageError> {
        self.process(url, Map::new()).await
    }

    async fn collect_targets(
        &self,
        queries: &[String],
        max_per_query: usize,
        sink: &dyn DiagnosticSink,
    ) -> Vec<Target> {
        let mut seen = HashSet::new();
        let mut targets = Vec::new();
        for query in queries {
            let results = self.aggregator.aggregate_with(query, max_per_query, sink).await;
            for result in results {
                if seen.insert(result.url.clone()) {
                    targets.push(Target::new(query, result));
                }
            }
        }
        targets
    }

    async fn process_all(
        &self,
        targets: Vec<Target>,
        deadline: Option<tokio::time::Instant>,
        sink: &dyn DiagnosticSink,
        report: &mut RunReport,
    ) {
        report.attempted = targets.len();
        let urls: Vec<String> = targets.iter().map(|t| t.url.clone()).collect();

        let outcomes = stream::iter(targets.into_iter().enumerate())
            .map(|(index, target)| async move {
                let outcome = self.process(&target.url, target.metadata).await;
                (index, outcome)
            })
            .buffer_unordered(self.config.concurrency.max(1));

        let expired = async {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };
        let mut finished: Vec<_> = outcomes.take_until(expired).collect().await;
        finished.sort_by_key(|(index, _)| *index);

        let mut done = vec![false; urls.len()];
        for (index, outcome) in finished {
            done[index] = true;
            match outcome {
                Ok(record) => report.records.push(record),
                Err(e) => {
                    report.failed.push(FailedUrl {
                        url: urls[index].clone(),
                        reason: e.to_string(),
                    });
                    sink.report(e.into());
                }
            }
        }

        for (url, _) in urls.iter().zip(&done).filter(|(_, done)| !**done) {
            report.timed_out = true;
            report.failed.push(FailedUrl {
                url: url.clone(),
                reason: "abandoned at run deadline".to_string(),
            });
        }
        if report.timed_out {
            warn!(abandoned = done.iter().filter(|d| !**d).count(), "run deadline reached");
        }
    }

    async fn process(&self, url: &str, metadata: Map<String, Value>) -> Result<ContentRecord, PageError> {
        let page = self.session.fetch(url).await?;
        let extractor = self.extractor;
        tokio::task::spawn_blocking(move || extractor.extract_page(&page, metadata))
            .await
            .unwrap_or_else(|e| Err(ExtractionError::Panicked(e.to_string())))
            .map_err(|error| PageError::Extract {
                url: url.to_string(),
                error,
            })
    }
}
