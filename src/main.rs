use tracing_subscriber::EnvFilter;
use vitalis::{cli, errors::AppResult};

fn main() -> AppResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    cli::cli()
}
