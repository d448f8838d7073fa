//! vitalis library
//!
//! This crate provides the core functionality for the `vitalis` binary: it
//! regroups an Apple Health `export.xml` into one CSV file per element tag.
//! Implementation and tests live in their modules.
//!
//! ## Overview
//!
//! - [`parser`] - Streams XML element records, groups them by tag, writes CSV files
//! - [`exporter`] - Orchestrates a full export run and builds its summary
//! - [`progress`] - Progress sinks receiving per-tag and summary notifications
//! - [`cli`] - Command-line interface over the exporter
//! - [`config`] - Export settings and TOML configuration files
//! - [`models`] - Records, results, summaries and the export stages
//! - [`errors`] - Error types used throughout the application
//!
//! ## Example Usage
//!
//! ```no_run
//! use vitalis::{exporter, errors::AppResult};
//!
//! # fn example() -> AppResult<()> {
//! let summary = exporter::export(
//!     "data/apple_health_export/export.xml",
//!     "data/apple_health_export/csv_output",
//!     None,
//! )?;
//!
//! for result in &summary.results {
//!     println!("{:<40} {:>10}", result.tag, result.row_count);
//! }
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod constants;
pub mod errors;
pub mod exporter;
pub mod models;
pub mod parser;
pub mod progress;
pub mod ui;
pub mod utils;
