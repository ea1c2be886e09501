//! Diagnostic sink for errors that are swallowed at their origin.
//!
//! Per-item failures (a disabled provider, a failed search, a dropped URL)
//! never propagate to the caller. They are handed to a [`DiagnosticSink`]
//! instead, which logs them and optionally keeps them for the run report.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, PoisonError};

use tracing::warn;

use crate::config::ConfigError;
use crate::extract::ExtractionError;
use crate::fetch::FetchError;
use crate::pipeline::Exhaustion;
use crate::search::{ProviderError, ProviderId};

#[derive(Debug)]
pub enum Diagnostic {
    ProviderDisabled(ConfigError),
    ProviderFailed {
        provider: ProviderId,
        error: ProviderError,
    },
    FetchFailed(FetchError),
    ExtractionFailed {
        url: String,
        error: ExtractionError,
    },
    Exhausted(Exhaustion),
}

impl Diagnostic {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ProviderDisabled(_) => "provider_disabled",
            Self::ProviderFailed { .. } => "provider_failed",
            Self::FetchFailed(_) => "fetch_failed",
            Self::ExtractionFailed { .. } => "extraction_failed",
            Self::Exhausted(_) => "exhausted",
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProviderDisabled(e) => write!(f, "{e}"),
            Self::ProviderFailed { provider, error } => write!(f, "{provider}: {error}"),
            Self::FetchFailed(e) => write!(f, "{e}"),
            Self::ExtractionFailed { url, error } => write!(f, "extraction failed for {url}: {error}"),
            Self::Exhausted(e) => write!(f, "{e}"),
        }
    }
}

pub trait DiagnosticSink: Send + Sync {
    fn report(&self, diagnostic: Diagnostic);
}

/// Logs each diagnostic as a `warn` event and drops it.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn report(&self, diagnostic: Diagnostic) {
        log(&diagnostic);
    }
}

fn log(diagnostic: &Diagnostic) {
    warn!(kind = diagnostic.kind(), "{diagnostic}");
}

/// Logs and retains diagnostics for one run.
#[derive(Debug, Default)]
pub struct Diagnostics {
    entries: Mutex<Vec<Diagnostic>>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of diagnostics per [`Diagnostic::kind`].
    pub fn counts(&self) -> BTreeMap<&'static str, usize> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let mut counts = BTreeMap::new();
        for d in entries.iter() {
            *counts.entry(d.kind()).or_insert(0) += 1;
        }
        counts
    }

    pub fn into_entries(self) -> Vec<Diagnostic> {
        self.entries
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl DiagnosticSink for Diagnostics {
    fn report(&self, diagnostic: Diagnostic) {
        log(&diagnostic);
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(diagnostic);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_and_counts_by_kind() {
        let diagnostics = Diagnostics::new();
        diagnostics.report(Diagnostic::Exhausted(Exhaustion::NoProviders));
        diagnostics.report(Diagnostic::ProviderFailed {
            provider: ProviderId::NewsApi,
            error: ProviderError::RateLimited,
        });
        diagnostics.report(Diagnostic::ProviderFailed {
            provider: ProviderId::CustomSearch,
            error: ProviderError::RateLimited,
        });

        let counts = diagnostics.counts();
        assert_eq!(counts.get("provider_failed"), Some(&2));
        assert_eq!(counts.get("exhausted"), Some(&1));
        assert_eq!(diagnostics.len(), 3);
    }

    #[test]
    fn display_names_the_provider() {
        let d = Diagnostic::ProviderFailed {
            provider: ProviderId::CustomSearch,
            error: ProviderError::Unauthorized("bad key".into()),
        };
        let text = d.to_string();
        assert!(text.starts_with("custom_search:"), "got: {text}");
        assert!(text.contains("bad key"));
    }
}
