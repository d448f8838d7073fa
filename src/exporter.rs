use crate::config::ResolvedConfig;
use crate::errors::{AppError, AppResult};
use crate::models::{ExportResult, ExportStage, Summary, WriteOutcome};
use crate::parser::{TabularWriter, TagAggregator, TagGroup, TagStreamParser};
use crate::progress::{ProgressSink, TracingSink};
use rayon::prelude::*;
use std::fs::{self, File};
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Lets a caller abort a running export from another thread.
///
/// Once cancelled, no further tag write is started and parsing stops at its
/// next progress checkpoint. Files already written stay on disk.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Drives one export: prepare the output directory, stream the XML into
/// per-tag groups, write every group, and report a [`Summary`].
///
/// Parsing and aggregation run on the calling thread in document order. Only
/// the write phase is parallel, on a dedicated pool of
/// `writer_threads` threads.
pub struct ExportOrchestrator {
    config: ResolvedConfig,
    writer: TabularWriter,
    sink: Arc<dyn ProgressSink>,
    cancel: CancelHandle,
    stage: ExportStage,
}

impl ExportOrchestrator {
    /// # Errors
    ///
    /// Returns `InvalidInput` if `config` fails validation.
    pub fn new(config: ResolvedConfig, sink: Arc<dyn ProgressSink>) -> AppResult<Self> {
        config.validate()?;
        let writer = TabularWriter::new(config.delimiter_byte(), config.file_extension.clone());
        Ok(Self {
            config,
            writer,
            sink,
            cancel: CancelHandle::default(),
            stage: ExportStage::Idle,
        })
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Current stage; terminal once a run has returned.
    pub fn stage(&self) -> ExportStage {
        self.stage
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    /// Exports the XML file at `input_path`.
    ///
    /// # Errors
    ///
    /// - `ValidationError` if `input_path` is missing or unreadable; nothing is
    ///   touched on disk and the orchestrator stays `Idle`.
    /// - `IoError` if the output directory cannot be prepared or the input
    ///   cannot be read.
    /// - `ParseError` if the document is malformed; no artifact is written.
    /// - `Cancelled` if the run was cancelled while parsing.
    ///
    /// Per-tag write failures are not errors: they are reported in the
    /// returned summary.
    pub fn run(&mut self, input_path: &Path) -> AppResult<Summary> {
        validate_input(input_path)?;
        info!(input = %input_path.display(), "Starting export");
        self.execute(|| TagStreamParser::from_path(input_path))
    }

    /// Exports an XML document read from `source`.
    pub fn run_reader<R: BufRead>(&mut self, source: R) -> AppResult<Summary> {
        self.execute(|| Ok(TagStreamParser::from_reader(source)))
    }

    fn execute<R, F>(&mut self, open: F) -> AppResult<Summary>
    where
        R: BufRead,
        F: FnOnce() -> AppResult<TagStreamParser<R>>,
    {
        let start = Instant::now();
        let result = self.run_stages(open, start);
        if let Err(e) = &result {
            error!(stage = self.stage.display_name(), error = %e, "Export failed");
            self.transition(ExportStage::failed_with(e));
        }
        result
    }

    fn run_stages<R, F>(&mut self, open: F, start: Instant) -> AppResult<Summary>
    where
        R: BufRead,
        F: FnOnce() -> AppResult<TagStreamParser<R>>,
    {
        self.transition(ExportStage::PreparingOutput);
        prepare_output_dir(&self.config.output_dir)?;

        self.transition(ExportStage::Parsing);
        let mut parser = open()?;
        if let Some(tags) = &self.config.include_tags {
            parser = parser.with_include_tags(tags.iter().cloned());
        }
        let aggregator = self.aggregate(parser)?;

        self.transition(ExportStage::Aggregating);
        info!(
            tags = aggregator.tag_count(),
            rows = aggregator.total_rows(),
            "Found {} unique tags in the XML file",
            aggregator.tag_count()
        );
        for group in aggregator.groups() {
            self.sink.on_tag_aggregated(group.tag(), group.row_count());
        }

        self.transition(ExportStage::Writing);
        let results = self.write_groups(aggregator.into_groups())?;

        let total_rows = results
            .iter()
            .filter(|r| r.was_attempted())
            .map(|r| r.row_count)
            .sum();
        let summary = Summary {
            total_rows,
            results,
            elapsed: start.elapsed(),
        };

        self.transition(ExportStage::Done);
        self.sink.on_summary(&summary);
        Ok(summary)
    }

    fn transition(&mut self, stage: ExportStage) {
        debug!(from = self.stage.display_name(), to = stage.display_name(), "Stage transition");
        self.stage = stage;
        self.sink.on_stage(stage);
    }

    /// Streams `parser` into a fresh aggregator, reporting progress and
    /// honouring cancellation every `progress_interval` records.
    fn aggregate<R: BufRead>(&self, mut parser: TagStreamParser<R>) -> AppResult<TagAggregator> {
        let interval = self.config.progress_interval;
        let mut parsed = 0u64;
        let records = parser.by_ref().map(|record| {
            let record = record?;
            parsed += 1;
            if parsed % interval == 0 {
                if self.cancel.is_cancelled() {
                    return Err(AppError::Cancelled);
                }
                self.sink.on_elements_parsed(parsed);
            }
            Ok(record)
        });

        let mut aggregator = TagAggregator::new();
        aggregator.consume(records)?;
        debug!(
            elements = parser.elements_seen(),
            records = parser.records_emitted(),
            "Finished parsing XML"
        );
        Ok(aggregator)
    }

    /// Writes every group on a bounded pool and returns the results in
    /// discovery order.
    fn write_groups(&self, groups: Vec<TagGroup>) -> AppResult<Vec<ExportResult>> {
        if groups.is_empty() {
            return Ok(Vec::new());
        }

        let threads = self.config.effective_writer_threads().min(groups.len());
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("vitalis-writer-{i}"))
            .build()
            .map_err(|e| AppError::IoError(format!("Failed to build writer pool: {e}")))?;

        info!(
            tags = groups.len(),
            threads = threads,
            output_dir = %self.config.output_dir.display(),
            "Writing CSV files"
        );

        // Results land in their discovery slot; the lock also serializes sink calls.
        let slots: Mutex<Vec<Option<ExportResult>>> = Mutex::new(vec![None; groups.len()]);
        pool.install(|| {
            groups
                .into_par_iter()
                .enumerate()
                .for_each(|(index, group)| {
                    let result = self.write_one(group);
                    let mut slots = slots.lock().unwrap_or_else(PoisonError::into_inner);
                    self.sink.on_tag_written(&result);
                    slots[index] = Some(result);
                });
        });

        Ok(slots
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .into_iter()
            .flatten()
            .collect())
    }

    /// Writes one group, consuming it so its rows are freed right after.
    fn write_one(&self, group: TagGroup) -> ExportResult {
        let output_dir = &self.config.output_dir;
        let output_path = self.writer.output_path(output_dir, group.tag());
        let outcome = if self.cancel.is_cancelled() {
            WriteOutcome::Cancelled
        } else {
            match self.writer.write_group(&group, output_dir) {
                Ok((_, bytes)) => WriteOutcome::Written { bytes },
                Err(e) => {
                    warn!(tag = group.tag(), error = %e, "Failed to write CSV file");
                    WriteOutcome::Failed(e)
                }
            }
        };

        ExportResult {
            tag: group.tag().to_string(),
            row_count: group.row_count(),
            output_path,
            outcome,
        }
    }
}

/// Checks that `input_path` names a readable file.
fn validate_input(input_path: &Path) -> AppResult<()> {
    let metadata = fs::metadata(input_path).map_err(|e| {
        AppError::ValidationError(format!(
            "The specified XML file does not exist: {} ({e})",
            input_path.display()
        ))
    })?;
    if !metadata.is_file() {
        return Err(AppError::ValidationError(format!(
            "The specified XML path is not a file: {}",
            input_path.display()
        )));
    }
    File::open(input_path).map_err(|e| {
        AppError::ValidationError(format!(
            "The specified XML file is not readable: {} ({e})",
            input_path.display()
        ))
    })?;
    Ok(())
}

fn prepare_output_dir(output_dir: &Path) -> AppResult<()> {
    if !output_dir.is_dir() {
        warn!(
            output_dir = %output_dir.display(),
            "The output directory does not exist, it will be created"
        );
    }
    fs::create_dir_all(output_dir).map_err(|e| {
        AppError::IoError(format!(
            "Failed to create output directory {}: {e}",
            output_dir.display()
        ))
    })?;
    info!(output_dir = %output_dir.display(), "Output directory is ready");
    Ok(())
}

/// Exports `input_path` into `output_dir` with default settings, logging
/// progress through `tracing`.
///
/// `include_tags` restricts the export to the listed tags; `None` exports
/// every tag.
///
/// # Example
///
/// ```no_run
/// use vitalis::exporter;
///
/// # fn main() -> Result<(), vitalis::errors::AppError> {
/// let summary = exporter::export(
///     "data/apple_health_export/export.xml",
///     "data/apple_health_export/csv_output",
///     Some(&["Record", "Workout"][..]),
/// )?;
/// println!("{} rows in {} files", summary.total_rows, summary.results.len());
/// # Ok(())
/// # }
/// ```
pub fn export(
    input_path: impl AsRef<Path>,
    output_dir: impl AsRef<Path>,
    include_tags: Option<&[&str]>,
) -> AppResult<Summary> {
    let config = ResolvedConfig {
        output_dir: PathBuf::from(output_dir.as_ref()),
        include_tags: include_tags.map(|tags| tags.iter().map(|t| t.to_string()).collect()),
        ..ResolvedConfig::default()
    };
    let mut orchestrator = ExportOrchestrator::new(config, Arc::new(TracingSink))?;
    orchestrator.run(input_path.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoopSink;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn orchestrator(output_dir: &Path) -> ExportOrchestrator {
        let config = ResolvedConfig {
            output_dir: output_dir.to_path_buf(),
            writer_threads: 2,
            ..ResolvedConfig::default()
        };
        ExportOrchestrator::new(config, Arc::new(NoopSink)).unwrap()
    }

    #[test]
    fn test_run_reader_exports_stream() {
        let temp_dir = TempDir::new().unwrap();
        let mut exporter = orchestrator(temp_dir.path());
        let xml = r#"<HealthData><Record type="A"/><Record type="B" unit="km"/></HealthData>"#;

        let summary = exporter.run_reader(Cursor::new(xml)).unwrap();

        assert_eq!(summary.total_rows, 2);
        assert_eq!(exporter.stage(), ExportStage::Done);
        assert_eq!(
            fs::read_to_string(temp_dir.path().join("Record.csv")).unwrap(),
            "type,unit\nA,\nB,km\n"
        );
    }

    #[test]
    fn test_parse_failure_sets_terminal_stage() {
        let temp_dir = TempDir::new().unwrap();
        let mut exporter = orchestrator(temp_dir.path());

        let result = exporter.run_reader(Cursor::new("<HealthData><Record>"));

        assert!(matches!(result, Err(AppError::ParseError { .. })));
        assert_eq!(exporter.stage(), ExportStage::ParseFailed);
        assert_eq!(fs::read_dir(temp_dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_missing_input_is_validation_error_and_stays_idle() {
        let temp_dir = TempDir::new().unwrap();
        let output_dir = temp_dir.path().join("out");
        let mut exporter = orchestrator(&output_dir);

        let result = exporter.run(&temp_dir.path().join("missing.xml"));

        assert!(matches!(result, Err(AppError::ValidationError(_))));
        assert_eq!(exporter.stage(), ExportStage::Idle);
        assert!(!output_dir.exists());
    }

    #[test]
    fn test_directory_input_is_validation_error() {
        let temp_dir = TempDir::new().unwrap();
        let mut exporter = orchestrator(&temp_dir.path().join("out"));

        let result = exporter.run(temp_dir.path());
        assert!(matches!(result, Err(AppError::ValidationError(_))));
    }

    #[test]
    fn test_output_dir_blocked_by_file_is_io_failure() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("out");
        fs::write(&blocker, "not a directory").unwrap();
        let mut exporter = orchestrator(&blocker);

        let result = exporter.run_reader(Cursor::new("<HealthData><Record/></HealthData>"));

        assert!(matches!(result, Err(AppError::IoError(_))));
        assert_eq!(exporter.stage(), ExportStage::IoFailed);
    }

    #[test]
    fn test_cancel_before_writing_skips_every_tag() {
        let temp_dir = TempDir::new().unwrap();
        let config = ResolvedConfig {
            output_dir: temp_dir.path().to_path_buf(),
            // Larger than the document, so parsing never checks the flag.
            progress_interval: 1_000,
            ..ResolvedConfig::default()
        };
        let mut exporter = ExportOrchestrator::new(config, Arc::new(NoopSink)).unwrap();
        exporter.cancel_handle().cancel();

        let summary = exporter
            .run_reader(Cursor::new(
                r#"<HealthData><Record type="A"/><Workout dur="5"/></HealthData>"#,
            ))
            .unwrap();

        assert_eq!(summary.cancelled().count(), 2);
        assert_eq!(summary.total_rows, 0);
        assert_eq!(fs::read_dir(temp_dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_cancel_while_parsing_aborts_run() {
        let temp_dir = TempDir::new().unwrap();
        let config = ResolvedConfig {
            output_dir: temp_dir.path().to_path_buf(),
            progress_interval: 1,
            ..ResolvedConfig::default()
        };
        let mut exporter = ExportOrchestrator::new(config, Arc::new(NoopSink)).unwrap();
        exporter.cancel_handle().cancel();

        let result = exporter.run_reader(Cursor::new("<HealthData><Record/></HealthData>"));

        assert_eq!(result, Err(AppError::Cancelled));
        assert_eq!(exporter.stage(), ExportStage::Cancelled);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = ResolvedConfig {
            delimiter: '\n',
            ..ResolvedConfig::default()
        };
        assert!(ExportOrchestrator::new(config, Arc::new(NoopSink)).is_err());
    }
}
