// Output defaults
pub const DEFAULT_OUTPUT_DIR: &str = "data/csv_output";
pub const DEFAULT_FILE_EXTENSION: &str = "csv";
pub const DEFAULT_DELIMITER: char = ',';

// Processing
/// Number of parsed records between progress callbacks.
pub const DEFAULT_PROGRESS_INTERVAL: u64 = 100_000;
/// Initial capacity of the XML event buffer.
pub const XML_BUFFER_CAPACITY: usize = 8192;
/// Capacity of the buffered writer behind each CSV artifact.
pub const CSV_WRITE_BUFFER: usize = 128 * 1024;

// Summary table layout
pub const SUMMARY_COLUMN_WIDTH: usize = 40;
