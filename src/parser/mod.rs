mod aggregator;
mod csv_writer;
mod tag_stream;

// Re-export public API
pub use aggregator::{TagAggregator, TagGroup};
pub use csv_writer::{artifact_file_name, TabularWriter};
pub use tag_stream::TagStreamParser;
