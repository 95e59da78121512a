mod app;
mod commands;

use clap::Parser;
use color_eyre::Result;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use churchdir_sync::Config;

#[derive(Parser, Debug)]
#[command(name = "churchdir-sync")]
#[command(about = "Offline-first cache and sync for the church directory")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/churchdir-sync/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Also log to stderr
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: commands::Command,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;

  // Keep the guard alive so buffered log lines are flushed on exit
  let _guard = init_logging(&config.log_dir()?, args.verbose)?;

  commands::run(args.command, config).await
}

/// Daily rolling file under the data directory, filtered by `RUST_LOG`.
fn init_logging(log_dir: &Path, verbose: bool) -> Result<WorkerGuard> {
  std::fs::create_dir_all(log_dir)?;
  let (file, guard) =
    tracing_appender::non_blocking(tracing_appender::rolling::daily(log_dir, "churchdir-sync.log"));

  let filter =
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("churchdir_sync=info"));

  let file_layer = fmt::layer().with_writer(file).with_ansi(false).with_target(true);
  let console_layer = verbose.then(|| fmt::layer().with_writer(std::io::stderr).with_target(false));

  tracing_subscriber::registry()
    .with(filter)
    .with(file_layer)
    .with(console_layer)
    .init();

  Ok(guard)
}
