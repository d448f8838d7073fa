use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AppError {
    /// Input rejected before any processing started
    #[error("Validation error: {0}")]
    ValidationError(String),
    /// Malformed XML document
    #[error("Parse error{}: {message}", .position.map(|p| format!(" at byte {p}")).unwrap_or_default())]
    ParseError {
        message: String,
        position: Option<u64>,
    },
    /// IO operation failed
    #[error("IO error: {0}")]
    IoError(String),
    /// Invalid configuration or argument value
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    /// Run aborted by the caller
    #[error("Export cancelled")]
    Cancelled,
    /// Run finished but some tags were not written
    #[error("Export incomplete: {failed} of {total} tag(s) were not written")]
    IncompleteExport { failed: usize, total: usize },
}

impl AppError {
    /// Builds a `ParseError` without position information.
    pub fn parse(message: impl Into<String>) -> Self {
        AppError::ParseError {
            message: message.into(),
            position: None,
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::IoError(err.to_string())
    }
}

impl From<quick_xml::Error> for AppError {
    fn from(err: quick_xml::Error) -> Self {
        match err {
            quick_xml::Error::Io(e) => AppError::IoError(e.to_string()),
            other => AppError::parse(other.to_string()),
        }
    }
}

impl From<csv::Error> for AppError {
    fn from(err: csv::Error) -> Self {
        AppError::IoError(err.to_string())
    }
}

// Custom type alias for Results in this application
pub type AppResult<T> = Result<T, AppError>;
