//! Pipeline configuration: credentials, limits, pacing and retry knobs.
//!
//! Built once per run (or once per long-lived service) and handed to
//! [`crate::pipeline::Pipeline::new`]. Values come from [`Default`], the
//! builder-style `with_*` methods, or the environment via
//! [`PipelineConfig::from_env`].

use std::env;
use std::fmt;
use std::time::Duration;

use crate::search::ProviderId;

pub const DEFAULT_MAX_RESULTS: usize = 20;
pub const DEFAULT_FETCH_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_SEARCH_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_BACKOFF_FACTOR: f64 = 1.0;
pub const DEFAULT_PAGE_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_CONCURRENCY: usize = 4;
pub const DEFAULT_PRIMARY_SHARE: f64 = 0.5;
pub const DEFAULT_CACHE_CAPACITY: usize = 1000;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{provider} disabled: {name} not set")]
    MissingCredential {
        provider: ProviderId,
        name: &'static str,
    },

    #[error("{provider} disabled: {name} still holds a placeholder value")]
    PlaceholderCredential {
        provider: ProviderId,
        name: &'static str,
    },

    #[error("invalid configuration: {field} {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Secret credential. Never printed by `Debug`.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub(crate) fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

/// Raw provider credentials as supplied by the caller.
///
/// A provider whose credentials are missing or still hold a template
/// placeholder is inert: it is never constructed, never queried.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub news_api_key: Option<ApiKey>,
    pub search_api_key: Option<ApiKey>,
    pub search_engine_id: Option<String>,
}

impl Credentials {
    pub fn news_api(&self) -> Result<ApiKey, ConfigError> {
        let key = usable(
            self.news_api_key.as_ref().map(ApiKey::expose),
            ProviderId::NewsApi,
            "news API key",
        )?;
        Ok(ApiKey::new(key))
    }

    pub fn custom_search(&self) -> Result<(ApiKey, String), ConfigError> {
        let key = usable(
            self.search_api_key.as_ref().map(ApiKey::expose),
            ProviderId::CustomSearch,
            "search API key",
        )?;
        let engine = usable(
            self.search_engine_id.as_deref(),
            ProviderId::CustomSearch,
            "search engine id",
        )?;
        Ok((ApiKey::new(key), engine.to_string()))
    }
}

fn usable<'a>(
    value: Option<&'a str>,
    provider: ProviderId,
    name: &'static str,
) -> Result<&'a str, ConfigError> {
    match value.map(str::trim) {
        None | Some("") => Err(ConfigError::MissingCredential { provider, name }),
        Some(v) if is_placeholder(v) => Err(ConfigError::PlaceholderCredential { provider, name }),
        Some(v) => Ok(v),
    }
}

/// Template values such as `your_news_api_key_here`.
fn is_placeholder(value: &str) -> bool {
    let lower = value.to_ascii_lowercase();
    lower.starts_with("your_") && lower.ends_with("_here")
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub credentials: Credentials,
    /// Global cap on aggregated results and therefore on returned records.
    pub max_results: usize,
    /// Minimum interval between two requests to the same host.
    pub fetch_delay: Duration,
    /// Per-attempt timeout for page fetches.
    pub request_timeout: Duration,
    /// Per-request timeout for provider calls.
    pub search_timeout: Duration,
    pub max_retries: u32,
    /// Seconds; retry `n` (0-based) waits `backoff_factor * 2^n`.
    pub backoff_factor: f64,
    /// Delay between successive page requests to a paginated provider.
    pub page_delay: Duration,
    /// Fetch worker pool size.
    pub concurrency: usize,
    /// Fraction of `max_results` requested from the primary provider.
    pub primary_share: f64,
    pub cache_ttl: Option<Duration>,
    pub cache_capacity: usize,
    /// Upper bound on a whole pipeline run.
    pub run_timeout: Option<Duration>,
    pub block_private_hosts: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            credentials: Credentials::default(),
            max_results: DEFAULT_MAX_RESULTS,
            fetch_delay: DEFAULT_FETCH_DELAY,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            search_timeout: DEFAULT_SEARCH_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
            page_delay: DEFAULT_PAGE_DELAY,
            concurrency: DEFAULT_CONCURRENCY,
            primary_share: DEFAULT_PRIMARY_SHARE,
            cache_ttl: None,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            run_timeout: None,
            block_private_hosts: true,
        }
    }
}

impl PipelineConfig {
    /// Load credentials and numeric overrides from the process environment.
    ///
    /// Upper-case names win; the lower-case names used by older deployments
    /// are accepted as a fallback.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let first = |names: &[&str]| {
            names
                .iter()
                .find_map(|n| lookup(n))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let credentials = Credentials {
            news_api_key: first(&["NEWS_API_KEY", "news_api_key"]).map(ApiKey::new),
            search_api_key: first(&["SEARCH_API_KEY", "google_api_key"]).map(ApiKey::new),
            search_engine_id: first(&["SEARCH_ENGINE_ID", "google_search_engine_id"]),
        };

        let mut config = Self {
            credentials,
            ..Self::default()
        };

        if let Some(v) = first(&["EVIDENCE_MAX_RESULTS"]) {
            config.max_results = parse_number(&v, "max_results")?;
        }
        if let Some(v) = first(&["EVIDENCE_FETCH_DELAY_SECS"]) {
            config.fetch_delay = parse_seconds(&v, "fetch_delay")?;
        }
        if let Some(v) = first(&["EVIDENCE_REQUEST_TIMEOUT_SECS"]) {
            config.request_timeout = parse_seconds(&v, "request_timeout")?;
        }
        if let Some(v) = first(&["EVIDENCE_MAX_RETRIES"]) {
            config.max_retries = parse_number(&v, "max_retries")?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations no run could honor.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_results == 0 {
            return Err(invalid("max_results", "must be at least 1"));
        }
        if self.concurrency == 0 {
            return Err(invalid("concurrency", "must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.primary_share) {
            return Err(invalid(
                "primary_share",
                format!("must be within [0, 1], got {}", self.primary_share),
            ));
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor < 0.0 {
            return Err(invalid(
                "backoff_factor",
                format!("must be a non-negative number, got {}", self.backoff_factor),
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(invalid("request_timeout", "must be non-zero"));
        }
        Ok(())
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    pub fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = delay;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_search_timeout(mut self, timeout: Duration) -> Self {
        self.search_timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    pub fn with_page_delay(mut self, delay: Duration) -> Self {
        self.page_delay = delay;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_primary_share(mut self, share: f64) -> Self {
        self.primary_share = share;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn with_run_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.run_timeout = timeout;
        self
    }

    pub fn with_block_private_hosts(mut self, block: bool) -> Self {
        self.block_private_hosts = block;
        self
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        reason: reason.into(),
    }
}

fn parse_number<T: std::str::FromStr>(raw: &str, field: &'static str) -> Result<T, ConfigError> {
    raw.parse()
        .map_err(|_| invalid(field, format!("expected an integer, got '{raw}'")))
}

fn parse_seconds(raw: &str, field: &'static str) -> Result<Duration, ConfigError> {
    raw.parse::<f64>()
        .ok()
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .ok_or_else(|| invalid(field, format!("expected seconds, got '{raw}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = PipelineConfig::default();
        assert_eq!(config.max_results, 20);
        assert_eq!(config.fetch_delay, Duration::from_secs(1));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.primary_share, 0.5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn missing_news_key_disables_provider() {
        let creds = Credentials::default();
        assert!(matches!(
            creds.news_api(),
            Err(ConfigError::MissingCredential {
                provider: ProviderId::NewsApi,
                ..
            })
        ));
    }

    #[test]
    fn placeholder_key_counts_as_missing() {
        let creds = Credentials {
            news_api_key: Some(ApiKey::new("your_news_api_key_here")),
            ..Default::default()
        };
        assert!(matches!(
            creds.news_api(),
            Err(ConfigError::PlaceholderCredential { .. })
        ));
    }

    #[test]
    fn custom_search_requires_engine_id() {
        let creds = Credentials {
            search_api_key: Some(ApiKey::new("key")),
            ..Default::default()
        };
        let err = creds.custom_search().unwrap_err();
        assert!(err.to_string().contains("search engine id"), "got: {err}");

        let creds = Credentials {
            search_api_key: Some(ApiKey::new("key")),
            search_engine_id: Some("cx-123".into()),
            ..Default::default()
        };
        let (key, cx) = creds.custom_search().unwrap();
        assert_eq!(key.expose(), "key");
        assert_eq!(cx, "cx-123");
    }

    #[test]
    fn api_key_debug_is_redacted() {
        let creds = Credentials {
            news_api_key: Some(ApiKey::new("super-secret")),
            ..Default::default()
        };
        let printed = format!("{creds:?}");
        assert!(!printed.contains("super-secret"));
        assert!(printed.contains("[REDACTED]"));
    }

    #[test]
    fn from_lookup_reads_upper_and_fallback_names() {
        let config = PipelineConfig::from_lookup(lookup_from(&[
            ("NEWS_API_KEY", " abc "),
            ("google_api_key", "g-key"),
            ("google_search_engine_id", "cx"),
            ("EVIDENCE_MAX_RESULTS", "7"),
            ("EVIDENCE_FETCH_DELAY_SECS", "0.25"),
        ]))
        .unwrap();

        assert_eq!(config.credentials.news_api().unwrap().expose(), "abc");
        assert!(config.credentials.custom_search().is_ok());
        assert_eq!(config.max_results, 7);
        assert_eq!(config.fetch_delay, Duration::from_millis(250));
    }

    #[test]
    fn from_lookup_rejects_garbage_numbers() {
        let err = PipelineConfig::from_lookup(lookup_from(&[("EVIDENCE_MAX_RETRIES", "many")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                field: "max_retries",
                ..
            }
        ));
    }

    #[test]
    fn validate_rejects_out_of_range_values() {
        assert!(PipelineConfig::default().with_max_results(0).validate().is_err());
        assert!(PipelineConfig::default().with_concurrency(0).validate().is_err());
        assert!(PipelineConfig::default().with_primary_share(1.5).validate().is_err());
        assert!(PipelineConfig::default().with_backoff_factor(-1.0).validate().is_err());
        assert!(PipelineConfig::default().with_primary_share(0.0).validate().is_ok());
    }
}
