use anyhow::Result;
use clap::{Parser, ValueEnum};
use tracing::info;

mod commands;

use commands::Commands;

#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum LoggingMode {
    #[default]
    Pretty,
    Json,
    Compact,
}

impl From<LoggingMode> for logutil::LoggingMode {
    fn from(mode: LoggingMode) -> Self {
        match mode {
            LoggingMode::Pretty => logutil::LoggingMode::Pretty,
            LoggingMode::Json => logutil::LoggingMode::Json,
            LoggingMode::Compact => logutil::LoggingMode::Compact,
        }
    }
}

#[derive(Parser)]
#[clap(name = "fdwctl")]
#[clap(version)]
#[clap(about = "Inspect sqlite databases the way the foreign data wrapper sees them", long_about = None)]
struct Cli {
    /// Log verbosity.
    #[clap(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Log output format.
    #[clap(long, value_enum, global = true)]
    log_mode: Option<LoggingMode>,

    #[clap(subcommand)]
    command: Commands,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logutil::init(cli.verbose, cli.log_mode.unwrap_or_default().into());

    info!(version = env!("CARGO_PKG_VERSION"), "starting...");

    let mut stdout = std::io::stdout().lock();
    cli.command.run(&mut stdout)
}
