//! metricflow CLI
//!
//! Runs, validates and inspects metricflow pipeline configurations.

mod commands;

use clap::{Parser, Subcommand};
use colored::Colorize;
use commands::{FunctionsCommand, RunCommand, ValidateCommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(
    name = "metricflow",
    version,
    about = "Windowed stream aggregation with multi-sink routing",
    long_about = "Consumes events from Kafka, aggregates them over event-time windows \
                  and routes every result to the configured sinks."
)]
struct Cli {
    /// Default log filter when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info", value_name = "FILTER")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run all pipelines until Ctrl-C
    #[command(name = "run")]
    Run(RunCommand),

    /// Load a configuration and build its pipelines without connecting
    #[command(name = "validate")]
    Validate(ValidateCommand),

    /// List the available aggregate functions
    #[command(name = "functions")]
    Functions(FunctionsCommand),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.log_json);

    let result = match &cli.command {
        Commands::Run(command) => command.execute().await,
        Commands::Validate(command) => command.execute().await,
        Commands::Functions(command) => command.execute(),
    };

    if let Err(e) = result {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

/// Initialize tracing/logging
fn init_tracing(default_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .init();
    }
}
