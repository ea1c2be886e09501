//! Structured content extraction from raw page markup.

pub mod document;
pub mod strategies;

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;
use url::Url;

use crate::fetch::RawPage;
use document::Document;
use strategies::{AUTHOR, CONTENT, DESCRIPTION, PUBLISH_DATE, TITLE, TITLE_FALLBACK, first_match};

#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("invalid page URL: {0}")]
    InvalidUrl(String),

    #[error("document has no text")]
    EmptyDocument,

    #[error("unsupported content type '{0}'")]
    UnsupportedContentType(String),

    #[error("extraction panicked: {0}")]
    Panicked(String),
}

/// One extracted page. Immutable once built.
///
/// `word_count` and `content_hash` are always derived from `content`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentRecord {
    pub url: String,
    pub title: String,
    pub content: String,
    pub author: Option<String>,
    pub publish_date: Option<String>,
    pub description: String,
    pub keywords: BTreeSet<String>,
    pub images: Vec<String>,
    pub links: Vec<String>,
    pub source_domain: String,
    pub word_count: usize,
    pub scrape_timestamp: DateTime<Utc>,
    /// Pass-through from the search stage.
    pub metadata: Map<String, Value>,
    pub content_hash: String,
}

/// Hex MD5 digest of `content`.
pub fn content_hash(content: &str) -> String {
    format!("{:x}", Md5::digest(content.as_bytes()))
}

/// Number of whitespace-delimited tokens.
pub fn word_count(content: &str) -> usize {
    content.split_whitespace().count()
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Extractor;

impl Extractor {
    pub fn new() -> Self {
        Self
    }

    /// Extract a record from markup fetched from `url`.
    pub fn extract(
        &self,
        markup: &str,
        url: &str,
        metadata: Map<String, Value>,
    ) -> Result<ContentRecord, ExtractionError> {
        self.extract_with_base(markup, url, url, metadata)
    }

    /// Extract a fetched page. Relative links resolve against the post-redirect
    /// URL while the record keeps the requested one.
    pub fn extract_page(
        &self,
        page: &RawPage,
        metadata: Map<String, Value>,
    ) -> Result<ContentRecord, ExtractionError> {
        if let Some(content_type) = page.content_type.as_deref()
            && !is_markup(content_type)
        {
            return Err(ExtractionError::UnsupportedContentType(content_type.to_string()));
        }
        self.extract_with_base(&page.body, &page.url, &page.final_url, metadata)
    }

    fn extract_with_base(
        &self,
        markup: &str,
        url: &str,
        base: &str,
        metadata: Map<String, Value>,
    ) -> Result<ContentRecord, ExtractionError> {
        let page_url = Url::parse(url).map_err(|e| ExtractionError::InvalidUrl(format!("{url}: {e}")))?;
        let source_domain = page_url
            .host_str()
            .ok_or_else(|| ExtractionError::InvalidUrl(format!("{url}: missing host")))?
            .to_string();
        let base = Url::parse(base).unwrap_or_else(|_| page_url.clone());

        if markup.trim().is_empty() {
            return Err(ExtractionError::EmptyDocument);
        }

        let doc = Document::parse(markup, base).with_page_url(page_url);
        let content = first_match(&doc, CONTENT).ok_or(ExtractionError::EmptyDocument)?;

        let record = ContentRecord {
            url: url.to_string(),
            title: first_match(&doc, TITLE).unwrap_or_else(|| TITLE_FALLBACK.to_string()),
            author: first_match(&doc, AUTHOR),
            publish_date: first_match(&doc, PUBLISH_DATE),
            description: first_match(&doc, DESCRIPTION).unwrap_or_default(),
            keywords: strategies::keywords(&doc),
            images: strategies::images(&doc),
            links: strategies::links(&doc),
            source_domain,
            word_count: word_count(&content),
            content_hash: content_hash(&content),
            content,
            scrape_timestamp: Utc::now(),
            metadata,
        };

        debug!(
            url = %record.url,
            words = record.word_count,
            images = record.images.len(),
            links = record.links.len(),
            "content extracted"
        );
        Ok(record)
    }
}

fn is_markup(content_type: &str) -> bool {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    mime.is_empty() || mime.starts_with("text/") || mime.contains("html") || mime.ends_with("xml")
}
