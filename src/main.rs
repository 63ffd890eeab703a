mod app;
mod cache;
mod commands;
mod config;
mod error;
mod event;
mod net;
mod worker;

use clap::Parser;
use color_eyre::Result;
use std::io;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use commands::Command;

#[derive(Parser, Debug)]
#[command(name = "formsync")]
#[command(about = "Offline cache and background resubmission for the client intake form")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/formsync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Origin to talk to, e.g. http://localhost:8000
  #[arg(short, long)]
  origin: Option<String>,

  #[command(subcommand)]
  command: Command,
}

/// Log to stderr, or to a daily file when `log_dir` is set.
/// RUST_LOG overrides the default filter.
fn init_tracing(config: &config::Config) -> WorkerGuard {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("formsync=info"));

  let (writer, guard) = match &config.log_dir {
    Some(dir) => tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, "formsync.log")),
    None => tracing_appender::non_blocking(io::stderr()),
  };

  tracing_subscriber::registry()
    .with(fmt::layer().with_writer(writer).with_ansi(config.log_dir.is_none()))
    .with(filter)
    .init();

  guard
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  let config = config::Config::load(args.config.as_deref())?;

  // Override origin if specified on command line
  let config = if let Some(origin) = args.origin {
    config::Config { origin, ..config }
  } else {
    config
  };

  let _guard = init_tracing(&config);

  let app = app::App::new(config)?;
  app.run(args.command).await
}
