use crate::errors::AppError;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Attribute name/value pairs of one element, in document order.
pub type Attributes = Vec<(String, String)>;

/// One qualifying XML element: its tag and attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementRecord {
    pub tag: String,
    pub attributes: Attributes,
    /// Zero-based position among the records yielded by the parser.
    pub sequence_index: u64,
}

/// Lifecycle of a single export run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExportStage {
    Idle,
    PreparingOutput,
    Parsing,
    Aggregating,
    Writing,
    Done,
    ParseFailed,
    IoFailed,
    Cancelled,
}

impl ExportStage {
    /// Returns a human-readable name for the stage.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::PreparingOutput => "preparing output",
            Self::Parsing => "parsing",
            Self::Aggregating => "aggregating",
            Self::Writing => "writing",
            Self::Done => "done",
            Self::ParseFailed => "parse failed",
            Self::IoFailed => "io failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Done | Self::ParseFailed | Self::IoFailed | Self::Cancelled
        )
    }

    /// Terminal stage a run ends in when `error` escapes from it.
    pub fn failed_with(error: &AppError) -> ExportStage {
        match error {
            AppError::ParseError { .. } => Self::ParseFailed,
            AppError::Cancelled => Self::Cancelled,
            _ => Self::IoFailed,
        }
    }
}

impl fmt::Display for ExportStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// What happened to one tag during the write phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Written { bytes: u64 },
    Failed(AppError),
    /// Never attempted because the run was cancelled first.
    Cancelled,
}

/// Per-tag result of the write phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportResult {
    pub tag: String,
    pub row_count: u64,
    pub output_path: PathBuf,
    pub outcome: WriteOutcome,
}

impl ExportResult {
    pub fn is_written(&self) -> bool {
        matches!(self.outcome, WriteOutcome::Written { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, WriteOutcome::Failed(_))
    }

    /// Written or failed; cancelled tags were never attempted.
    pub fn was_attempted(&self) -> bool {
        !matches!(self.outcome, WriteOutcome::Cancelled)
    }

    pub fn bytes_written(&self) -> u64 {
        match self.outcome {
            WriteOutcome::Written { bytes } => bytes,
            _ => 0,
        }
    }
}

/// Outcome of a complete export run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary {
    /// Sum of row counts over every attempted tag.
    pub total_rows: u64,
    /// One entry per tag, in tag-discovery order.
    pub results: Vec<ExportResult>,
    pub elapsed: Duration,
}

impl Summary {
    pub fn written(&self) -> impl Iterator<Item = &ExportResult> {
        self.results.iter().filter(|r| r.is_written())
    }

    pub fn failed(&self) -> impl Iterator<Item = &ExportResult> {
        self.results.iter().filter(|r| r.is_failed())
    }

    pub fn cancelled(&self) -> impl Iterator<Item = &ExportResult> {
        self.results.iter().filter(|r| !r.was_attempted())
    }

    /// True when every tag was written.
    pub fn is_complete(&self) -> bool {
        self.results.iter().all(ExportResult::is_written)
    }

    pub fn total_bytes(&self) -> u64 {
        self.results.iter().map(ExportResult::bytes_written).sum()
    }

    /// Looks up the result for `tag`.
    pub fn result(&self, tag: &str) -> Option<&ExportResult> {
        self.results.iter().find(|r| r.tag == tag)
    }
}
