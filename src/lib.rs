//! Gather evidence for a claim: search news backends, fetch the hits and
//! extract structured article records.

pub mod config;
pub mod diagnostics;
pub mod extract;
pub mod fetch;
pub mod pipeline;
pub mod search;

pub const USER_AGENT: &str = concat!("evidence/", env!("CARGO_PKG_VERSION"));

pub use config::PipelineConfig;
pub use extract::{ContentRecord, Extractor};
pub use pipeline::{Pipeline, RunReport};
