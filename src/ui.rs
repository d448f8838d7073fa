use crate::errors::{AppError, AppResult};
use crate::models::{ExportResult, ExportStage, Summary};
use crate::progress::{log_summary, summary_line, ProgressSink};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use tracing::info;

const BAR_TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} {msg}";
const SPINNER_TEMPLATE: &str = "{spinner:.green} [{elapsed_precise}] {msg}";

/// Creates a progress bar with the standard application styling.
///
/// # Arguments
///
/// * `total` - Total number of items to process
///
/// # Example
///
/// ```no_run
/// use vitalis::ui;
///
/// # fn main() -> Result<(), vitalis::errors::AppError> {
/// let pb = ui::create_progress_bar(100)?;
/// pb.inc(1);
/// pb.finish_with_message("Done");
/// # Ok(())
/// # }
/// ```
pub fn create_progress_bar(total: u64) -> AppResult<ProgressBar> {
    let pb = ProgressBar::new(total);
    pb.set_style(bar_style()?);
    Ok(pb)
}

fn bar_style() -> AppResult<ProgressStyle> {
    Ok(ProgressStyle::default_bar()
        .template(BAR_TEMPLATE)
        .map_err(|e| AppError::IoError(format!("Failed to create progress bar template: {e}")))?
        .progress_chars("#>-"))
}

fn spinner_style() -> AppResult<ProgressStyle> {
    ProgressStyle::default_spinner()
        .template(SPINNER_TEMPLATE)
        .map_err(|e| AppError::IoError(format!("Failed to create spinner template: {e}")))
}

/// Terminal progress for the CLI: a spinner while the XML is parsed, then a
/// bar over the tags being written. The closing summary is also logged.
pub struct ProgressBarSink {
    bar: ProgressBar,
    bar_style: ProgressStyle,
}

impl ProgressBarSink {
    pub fn new() -> AppResult<Self> {
        // Length grows as tags are aggregated.
        let bar = create_progress_bar(0)?;
        bar.set_style(spinner_style()?);
        Ok(Self {
            bar,
            bar_style: bar_style()?,
        })
    }
}

impl ProgressSink for ProgressBarSink {
    fn on_stage(&self, stage: ExportStage) {
        match stage {
            ExportStage::Parsing => {
                self.bar.set_message("Parsing XML...");
                self.bar.enable_steady_tick(Duration::from_millis(120));
            }
            ExportStage::Writing => {
                self.bar.disable_steady_tick();
                self.bar.set_style(self.bar_style.clone());
                self.bar.set_position(0);
                self.bar.set_message("Writing CSV files...");
            }
            ExportStage::ParseFailed | ExportStage::IoFailed | ExportStage::Cancelled => {
                self.bar
                    .abandon_with_message(format!("Export {}", stage.display_name()));
            }
            _ => {}
        }
    }

    fn on_elements_parsed(&self, records: u64) {
        self.bar.set_message(format!("Parsed {records} records"));
    }

    fn on_tag_aggregated(&self, tag: &str, row_count: u64) {
        self.bar.inc_length(1);
        self.bar.suspend(|| info!("{}", summary_line(tag, row_count)));
    }

    fn on_tag_written(&self, result: &ExportResult) {
        self.bar.inc(1);
        if result.is_failed() {
            self.bar.set_message(format!("Failed {}", result.tag));
        } else {
            self.bar.set_message(format!("Completed {}", result.tag));
        }
    }

    fn on_summary(&self, summary: &Summary) {
        self.bar.finish_with_message(format!(
            "Exported {} of {} tag(s)",
            summary.written().count(),
            summary.results.len()
        ));
        log_summary(summary);
    }
}
