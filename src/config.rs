use crate::constants::{
    DEFAULT_DELIMITER, DEFAULT_FILE_EXTENSION, DEFAULT_OUTPUT_DIR, DEFAULT_PROGRESS_INTERVAL,
};
use crate::errors::{AppError, AppResult};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Resolved configuration with all values filled in.
///
/// This struct represents the export defaults and can be deserialized by the
/// TOML loader. Every field has a concrete value except `include_tags`, where
/// `None` means "export every tag".
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResolvedConfig {
    /// Directory receiving one CSV file per tag
    pub output_dir: PathBuf,
    /// Tags to export; all tags when unset
    pub include_tags: Option<Vec<String>>,

    // Processing
    /// Number of threads writing CSV files concurrently.
    /// When set to 0 (default), automatically uses available_parallelism().
    /// This also bounds the number of simultaneously open output files.
    pub writer_threads: usize,
    /// Records parsed between two progress notifications.
    pub progress_interval: u64,

    // Output format
    /// Single ASCII field delimiter
    pub delimiter: char,
    /// Extension of the generated files, without the dot
    pub file_extension: String,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            include_tags: None,
            writer_threads: 0, // 0 means auto-detect via available_parallelism()
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            delimiter: DEFAULT_DELIMITER,
            file_extension: DEFAULT_FILE_EXTENSION.to_string(),
        }
    }
}

impl ResolvedConfig {
    /// Checks the values that serde cannot.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the delimiter is not a single ASCII character
    /// usable as a separator, the extension is empty or not alphanumeric, the
    /// progress interval is zero, or the tag list is empty.
    pub fn validate(&self) -> AppResult<()> {
        if !self.delimiter.is_ascii() || matches!(self.delimiter, '"' | '\r' | '\n') {
            return Err(AppError::InvalidInput(format!(
                "Delimiter must be a single ASCII character other than a quote or newline, got {:?}",
                self.delimiter
            )));
        }
        if self.file_extension.is_empty()
            || !self
                .file_extension
                .chars()
                .all(|c| c.is_ascii_alphanumeric())
        {
            return Err(AppError::InvalidInput(format!(
                "File extension must be non-empty and alphanumeric, got {:?}",
                self.file_extension
            )));
        }
        if self.progress_interval == 0 {
            return Err(AppError::InvalidInput(
                "Progress interval must be greater than 0".into(),
            ));
        }
        if matches!(&self.include_tags, Some(tags) if tags.is_empty()) {
            return Err(AppError::InvalidInput(
                "include_tags must list at least one tag when set".into(),
            ));
        }
        Ok(())
    }

    /// Delimiter as the byte the CSV writer expects.
    pub fn delimiter_byte(&self) -> u8 {
        // validate() guarantees ASCII
        self.delimiter as u8
    }

    /// Writer pool size with the 0 = auto rule applied.
    pub fn effective_writer_threads(&self) -> usize {
        if self.writer_threads > 0 {
            self.writer_threads
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        }
    }
}

/// Configuration that can be loaded from a TOML file.
///
/// Deserializes the required `input` path and the optional export settings.
/// The parser rejects unknown keys to catch typos.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResolvedConfigFile {
    /// Path to the Apple Health `export.xml`
    pub input: PathBuf,
    /// Flattened resolved configuration with export defaults
    #[serde(flatten)]
    pub resolved: ResolvedConfig,
}

impl ResolvedConfigFile {
    /// Loads and validates configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns `IoError` if the file cannot be read, and `InvalidInput` if the
    /// TOML is malformed, `input` is missing, unknown keys are present, or a
    /// value fails [`ResolvedConfig::validate`].
    pub fn from_toml_file(path: &Path) -> AppResult<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            AppError::IoError(format!("Failed to read config {}: {e}", path.display()))
        })?;
        let config: ResolvedConfigFile = toml::from_str(&contents)
            .map_err(|e| AppError::InvalidInput(format!("Failed to parse config: {e}")))?;

        config.resolved.validate()?;
        Ok(config)
    }
}
