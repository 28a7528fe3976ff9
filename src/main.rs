#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use alarm_setter::core::config::ConfigManager;

/// Arms a wake alarm once the screen turns off.
#[derive(Debug, Parser)]
#[command(name = "alarm-setter", version)]
struct Cli {
    /// Directory holding settings.json
    #[arg(long, default_value = ".")]
    config_dir: PathBuf,
    /// Overrides where alarm state is stored
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Logs go to stderr, stdout is for the command prompt
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let mut settings = ConfigManager::new(cli.config_dir).load();
    if let Some(data_dir) = cli.data_dir {
        settings.data_dir = data_dir;
    }

    match alarm_setter::run(settings).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
