//! Output formats for finished runs.

use std::collections::BTreeMap;
use std::io::{self, Write};

use serde::Serialize;

use super::RunReport;
use crate::extract::ContentRecord;

const PREVIEW_CHARS: usize = 300;

/// Aggregate figures over a set of records.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContentStats {
    pub total_records: usize,
    pub total_words: usize,
    pub average_words: f64,
    /// Records per source domain.
    pub domains: BTreeMap<String, usize>,
    pub unique_domains: usize,
}

impl ContentStats {
    pub fn from_records(records: &[ContentRecord]) -> Self {
        let total_words = records.iter().map(|r| r.word_count).sum();
        let mut domains = BTreeMap::new();
        for record in records {
            *domains.entry(record.source_domain.clone()).or_insert(0) += 1;
        }
        let average_words = if records.is_empty() {
            0.0
        } else {
            total_words as f64 / records.len() as f64
        };
        Self {
            total_records: records.len(),
            total_words,
            average_words,
            unique_domains: domains.len(),
            domains,
        }
    }
}

/// One JSON object per line.
pub fn write_jsonl<W: Write>(records: &[ContentRecord], mut writer: W) -> io::Result<()> {
    for record in records {
        serde_json::to_writer(&mut writer, record)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()
}

/// Pretty-printed JSON array.
pub fn write_json<W: Write>(records: &[ContentRecord], mut writer: W) -> io::Result<()> {
    serde_json::to_writer_pretty(&mut writer, records)?;
    writer.write_all(b"\n")?;
    writer.flush()
}

pub fn format_summary(report: &RunReport) -> String {
    let mut output = format!("# Evidence: {}\n\n", report.queries.join(" | "));

    output.push_str(&format!(
        "{} of {} pages extracted in {:.1}s",
        report.succeeded(),
        report.attempted,
        report.elapsed.as_secs_f64()
    ));
    if report.timed_out {
        output.push_str(" (run deadline reached)");
    }
    output.push_str("\n\n");

    if let Some(exhausted) = report.exhausted {
        output.push_str(&format!("Nothing gathered: {exhausted}\n\n"));
    }

    for record in &report.records {
        output.push_str(&format!("## {}\n\n", record.title));
        output.push_str(&format!("- URL: {}\n", record.url));
        if let Some(author) = &record.author {
            output.push_str(&format!("- Author: {author}\n"));
        }
        if let Some(date) = &record.publish_date {
            output.push_str(&format!("- Published: {date}\n"));
        }
        output.push_str(&format!("- Words: {}\n\n", record.word_count));
        output.push_str(&preview(&record.content));
        output.push_str("\n\n");
    }

    if !report.failed.is_empty() {
        output.push_str("## Failed URLs\n\n");
        for failed in &report.failed {
            output.push_str(&format!("- {} ({})\n", failed.url, failed.reason));
        }
        output.push('\n');
    }

    let stats = ContentStats::from_records(&report.records);
    if stats.total_records > 0 {
        output.push_str("## Sources\n\n");
        for (domain, count) in &stats.domains {
            output.push_str(&format!("- {domain}: {count}\n"));
        }
    }

    output
}

fn preview(content: &str) -> String {
    if content.len() > PREVIEW_CHARS {
        let end = content.floor_char_boundary(PREVIEW_CHARS);
        format!("{}...", &content[..end])
    } else {
        content.to_string()
    }
}
