//! Observability seam between the exporter and its caller.
//!
//! The exporter never configures logging itself. Callers hand it a
//! [`ProgressSink`] and decide what to do with the notifications: log them,
//! drive a progress bar, or ignore them.

use crate::constants::SUMMARY_COLUMN_WIDTH;
use crate::models::{ExportResult, ExportStage, Summary, WriteOutcome};
use crate::utils::{format_duration, mb_from_bytes, per_second, round_two_decimals};
use tracing::{debug, info, warn};

/// Receives progress notifications from an export run.
///
/// Methods may be called from writer threads; the exporter serializes the
/// calls, so implementations never see two notifications at once. Every
/// method defaults to doing nothing.
pub trait ProgressSink: Send + Sync {
    fn on_stage(&self, _stage: ExportStage) {}

    /// Called every `progress_interval` records while parsing.
    fn on_elements_parsed(&self, _records: u64) {}

    /// Called once per tag, in discovery order, when parsing has finished.
    fn on_tag_aggregated(&self, _tag: &str, _row_count: u64) {}

    /// Called as each tag's write finishes, in completion order.
    fn on_tag_written(&self, _result: &ExportResult) {}

    fn on_summary(&self, _summary: &Summary) {}
}

/// Discards every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl ProgressSink for NoopSink {}

/// Emits notifications as `tracing` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn on_stage(&self, stage: ExportStage) {
        debug!(stage = stage.display_name(), "Export stage changed");
    }

    fn on_elements_parsed(&self, records: u64) {
        debug!(records = records, "Parsing XML");
    }

    fn on_tag_aggregated(&self, tag: &str, row_count: u64) {
        info!("{}", summary_line(tag, row_count));
    }

    fn on_tag_written(&self, result: &ExportResult) {
        match &result.outcome {
            WriteOutcome::Written { bytes } => debug!(
                tag = result.tag.as_str(),
                rows = result.row_count,
                bytes = bytes,
                path = %result.output_path.display(),
                "Tag written"
            ),
            WriteOutcome::Failed(error) => warn!(
                tag = result.tag.as_str(),
                path = %result.output_path.display(),
                error = %error,
                "Failed to write tag"
            ),
            WriteOutcome::Cancelled => {
                debug!(tag = result.tag.as_str(), "Tag skipped, export cancelled")
            }
        }
    }

    fn on_summary(&self, summary: &Summary) {
        log_summary(summary);
    }
}

/// One `tag .... rows` line of the summary table.
pub fn summary_line(label: &str, value: u64) -> String {
    format!(
        "{label:<width$} {value:>width$}",
        width = SUMMARY_COLUMN_WIDTH
    )
}

/// Logs the closing summary of a run: totals, throughput, and every tag that
/// was not written.
pub fn log_summary(summary: &Summary) {
    info!("{}", "-".repeat(SUMMARY_COLUMN_WIDTH * 2 + 1));
    info!("{}", summary_line("Total number of rows :", summary.total_rows));

    let size_mb = round_two_decimals(mb_from_bytes(summary.total_bytes()));
    let rows_per_sec = round_two_decimals(per_second(
        summary.total_rows as f64,
        summary.elapsed,
    ));
    info!(
        tags = summary.results.len(),
        written = summary.written().count(),
        failed = summary.failed().count(),
        cancelled = summary.cancelled().count(),
        total_rows = summary.total_rows,
        output_size_mb = size_mb,
        rows_per_sec = rows_per_sec,
        elapsed = format_duration(summary.elapsed),
        "Export completed"
    );

    let written: Vec<&str> = summary.written().map(|r| r.tag.as_str()).collect();
    if !written.is_empty() {
        info!(tags = ?written, "Tags written");
    }
    for result in summary.failed() {
        if let WriteOutcome::Failed(error) = &result.outcome {
            warn!(tag = result.tag.as_str(), error = %error, "Tag not written");
        }
    }
    let cancelled: Vec<&str> = summary.cancelled().map(|r| r.tag.as_str()).collect();
    if !cancelled.is_empty() {
        warn!(tags = ?cancelled, "Tags skipped after cancellation");
    }
}
