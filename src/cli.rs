use crate::config::{ResolvedConfig, ResolvedConfigFile};
use crate::errors::{AppError, AppResult};
use crate::exporter::ExportOrchestrator;
use crate::ui::ProgressBarSink;
use clap::{Arg, ArgAction, ArgMatches, Command};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

// CLI metadata constants
const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
const APP_AUTHOR: &str = env!("CARGO_PKG_AUTHORS");
const APP_ABOUT: &str = env!("CARGO_PKG_DESCRIPTION");

/// Builds the command-line definition.
pub fn build_command() -> Command<'static> {
    Command::new("vitalis")
        .version(APP_VERSION)
        .author(APP_AUTHOR)
        .about(APP_ABOUT)
        .subcommand(
            Command::new("export")
                .about("Convert an Apple Health export.xml into one CSV file per tag")
                .after_help("Example:\n  vitalis export -i apple_health_export/export.xml -o csv_output -t Record,Workout")
                .arg(
                    Arg::new("input")
                        .short('i')
                        .long("input")
                        .help("Path to the Apple Health export.xml")
                        .required(true)
                        .value_parser(clap::value_parser!(PathBuf))
                        .action(ArgAction::Set),
                )
                .arg(
                    Arg::new("output")
                        .short('o')
                        .long("output")
                        .help("Directory receiving the CSV files")
                        .value_parser(clap::value_parser!(PathBuf))
                        .action(ArgAction::Set),
                )
                .arg(
                    Arg::new("tags")
                        .short('t')
                        .long("tag")
                        .help("Only export these tags (repeatable, comma-separated)")
                        .action(ArgAction::Append),
                )
                .arg(
                    Arg::new("delimiter")
                        .short('d')
                        .long("delimiter")
                        .help("Field delimiter of the generated files")
                        .value_parser(clap::value_parser!(char))
                        .action(ArgAction::Set),
                )
                .arg(
                    Arg::new("writer_threads")
                        .short('w')
                        .long("writer-threads")
                        .alias("wt")
                        .help("CSV files written in parallel (0 = one per CPU)")
                        .value_parser(clap::value_parser!(usize))
                        .action(ArgAction::Set),
                ),
        )
        .subcommand(
            Command::new("toml")
                .about("Run using a TOML configuration file")
                .arg(
                    Arg::new("config")
                        .help("Path to the TOML config file")
                        .required(true)
                        .value_parser(clap::value_parser!(PathBuf)),
                ),
        )
}

/// Parses command-line arguments and runs the requested export.
///
/// Two subcommands are available:
/// - `export`: arguments on the command line, defaults for everything else
/// - `toml`: every setting read from a TOML configuration file
///
/// # Errors
///
/// Returns the error of a failed run, or `IncompleteExport` when the run
/// finished but at least one tag was not written.
pub fn cli() -> AppResult<()> {
    let mut cmd_for_help = build_command();
    let matches = build_command().get_matches();

    match resolve_matches(&matches)? {
        Some((input, config)) => run_export(&input, config),
        None => cmd_for_help
            .print_help()
            .map_err(|e| AppError::IoError(format!("Failed to print help: {e}"))),
    }
}

/// Turns parsed arguments into an input path and configuration. `None` when
/// no subcommand was given.
fn resolve_matches(matches: &ArgMatches) -> AppResult<Option<(PathBuf, ResolvedConfig)>> {
    match matches.subcommand() {
        Some(("export", sub)) => {
            let input = sub
                .get_one::<PathBuf>("input")
                .cloned()
                .ok_or_else(|| AppError::InvalidInput("--input is required".into()))?;
            let mut config = ResolvedConfig::default();
            if let Some(output) = sub.get_one::<PathBuf>("output") {
                config.output_dir = output.clone();
            }
            if let Some(values) = sub.get_many::<String>("tags") {
                config.include_tags = Some(split_tags(values.map(String::as_str)));
            }
            if let Some(&delimiter) = sub.get_one::<char>("delimiter") {
                config.delimiter = delimiter;
            }
            if let Some(&threads) = sub.get_one::<usize>("writer_threads") {
                config.writer_threads = threads;
            }
            config.validate()?;
            Ok(Some((input, config)))
        }
        Some(("toml", sub)) => {
            let config_path = sub
                .get_one::<PathBuf>("config")
                .ok_or_else(|| AppError::InvalidInput("config path is required".into()))?;
            let file_config = ResolvedConfigFile::from_toml_file(config_path)?;
            Ok(Some((file_config.input, file_config.resolved)))
        }
        _ => Ok(None),
    }
}

/// Flattens repeated and comma-separated tag values, dropping blanks.
fn split_tags<'a>(values: impl Iterator<Item = &'a str>) -> Vec<String> {
    values
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect()
}

fn run_export(input: &Path, config: ResolvedConfig) -> AppResult<()> {
    let sink = Arc::new(ProgressBarSink::new()?);
    let mut orchestrator = ExportOrchestrator::new(config, sink)?;
    let summary = orchestrator.run(input)?;

    if !summary.is_complete() {
        let failed = summary.results.len() - summary.written().count();
        error!(
            failed = failed,
            written = summary.written().count(),
            "Some tags were not written"
        );
        return Err(AppError::IncompleteExport {
            failed,
            total: summary.results.len(),
        });
    }

    info!(
        tags = summary.results.len(),
        output_dir = %orchestrator.config().output_dir.display(),
        "All tags exported successfully"
    );
    Ok(())
}
