use super::aggregator::TagGroup;
use crate::constants::{CSV_WRITE_BUFFER, DEFAULT_DELIMITER, DEFAULT_FILE_EXTENSION};
use crate::errors::{AppError, AppResult};
use std::fmt::Write as _;
use std::fs;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tempfile::{Builder, NamedTempFile};
use tracing::debug;

/// Writes one delimited file per [`TagGroup`].
///
/// The writer is stateless across groups: it can be shared between threads and
/// used for several groups at once. Each file is first written to a temporary
/// file next to its destination and then renamed over it, so a reader only ever
/// sees a complete artifact.
#[derive(Debug, Clone)]
pub struct TabularWriter {
    delimiter: u8,
    extension: String,
}

impl Default for TabularWriter {
    fn default() -> Self {
        Self {
            delimiter: DEFAULT_DELIMITER as u8,
            extension: DEFAULT_FILE_EXTENSION.to_string(),
        }
    }
}

impl TabularWriter {
    pub fn new(delimiter: u8, extension: impl Into<String>) -> Self {
        Self {
            delimiter,
            extension: extension.into(),
        }
    }

    /// Destination path for `tag` inside `output_dir`.
    pub fn output_path(&self, output_dir: &Path, tag: &str) -> PathBuf {
        output_dir.join(artifact_file_name(tag, &self.extension))
    }

    /// Writes `group` to `output_dir`, creating the directory when missing.
    ///
    /// The header is the group's column union; each row is padded with empty
    /// cells for the columns it lacks. An existing artifact for the same tag is
    /// replaced. Returns the path written and its size in bytes.
    ///
    /// # Errors
    ///
    /// Returns `IoError` if the directory, temporary file or rename fails, or if
    /// a record cannot be serialized.
    pub fn write_group(&self, group: &TagGroup, output_dir: &Path) -> AppResult<(PathBuf, u64)> {
        fs::create_dir_all(output_dir).map_err(|e| {
            AppError::IoError(format!(
                "Failed to create output directory {}: {e}",
                output_dir.display()
            ))
        })?;

        let path = self.output_path(output_dir, group.tag());
        let temp = new_temp_file(output_dir).map_err(|e| {
            AppError::IoError(format!(
                "Failed to create temporary file in {}: {e}",
                output_dir.display()
            ))
        })?;

        let mut writer = csv::WriterBuilder::new()
            .delimiter(self.delimiter)
            .from_writer(BufWriter::with_capacity(CSV_WRITE_BUFFER, temp));

        writer.write_record(group.columns())?;
        for row in group.padded_rows() {
            writer.write_record(&row)?;
        }

        let temp = writer
            .into_inner()
            .map_err(|e| AppError::IoError(format!("Failed to flush {}: {e}", path.display())))?
            .into_inner()
            .map_err(|e| {
                AppError::IoError(format!("Failed to flush {}: {}", path.display(), e.error()))
            })?;
        temp.as_file().sync_all()?;

        let file = temp.persist(&path).map_err(|e| {
            AppError::IoError(format!("Failed to write {}: {}", path.display(), e.error))
        })?;
        let bytes = file.metadata()?.len();

        debug!(
            tag = group.tag(),
            rows = group.row_count(),
            columns = group.columns().len(),
            path = %path.display(),
            "Wrote artifact"
        );

        Ok((path, bytes))
    }
}

/// Temporary file that ends up with the permissions of a regularly created
/// file once persisted: mode 0666 filtered by the process umask on Unix.
fn new_temp_file(dir: &Path) -> std::io::Result<NamedTempFile> {
    let mut builder = Builder::new();
    builder.prefix(".vitalis-");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        builder.permissions(fs::Permissions::from_mode(0o666));
    }
    builder.tempfile_in(dir)
}

/// Maps a tag name to a file name.
///
/// ASCII letters, digits, `.`, `_` and `-` are kept; every other byte of the
/// UTF-8 tag becomes `%XX`. The mapping is injective, so distinct tags never
/// share a file.
pub fn artifact_file_name(tag: &str, extension: &str) -> String {
    let mut name = String::with_capacity(tag.len() + extension.len() + 1);
    for byte in tag.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'.' | b'_' | b'-' => {
                name.push(byte as char)
            }
            _ => {
                let _ = write!(name, "%{byte:02X}");
            }
        }
    }
    name.push('.');
    name.push_str(extension);
    name
}
