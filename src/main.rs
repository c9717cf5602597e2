use anyhow::Result;
use cameraleech::runtime::config::DEFAULT_CONFIG_PATH;
use cameraleech::{init_tracing, Runner};
use clap::Parser;
use std::path::PathBuf;

/// Records camera streams with ffmpeg and serves their statistics over HTTP.
#[derive(Debug, Parser)]
#[command(name = "cameraleech", version, about)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut runner = match Runner::load(&cli.config) {
        Ok(runner) => runner,
        Err(err) => {
            init_tracing("warn");
            tracing::error!(error = %format!("{err:#}"), "cannot read config");
            return Err(err);
        }
    };
    init_tracing(runner.config().log_level().directive());

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "cameraleech started"
    );

    runner.run_until_signalled().await
}
