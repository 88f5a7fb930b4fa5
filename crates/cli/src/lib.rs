pub mod commands;

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use kitwright_core::config::{AppConfig, LogFormat, LoggingConfig};

use commands::{CommandResult, GlobalArgs, SelectionArgs};

#[derive(Debug, Parser)]
#[command(
    name = "kitwright",
    about = "Kitwright product configurator CLI",
    long_about = "Evaluate configuration rules and pricing for a product catalog, re-verify \
                  submitted configurations, and inspect runtime readiness.",
    after_help = "Examples:\n  kitwright seed\n  kitwright evaluate --product ws-pro --select gpu=RTX4090 --select memory=32GB\n  kitwright checkout --product ws-pro --select memory=16GB --price 1050.00\n  kitwright doctor --json"
)]
pub struct Cli {
    #[command(flatten)]
    global: GlobalArgs,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Write the deterministic demo catalog into the data directory")]
    Seed,
    #[command(about = "Run rules and pricing for a selection and print the session snapshot")]
    Evaluate {
        #[command(flatten)]
        selection: SelectionArgs,
        #[arg(long, help = "Apply suggested auto-selections before reporting")]
        accept_auto: bool,
    },
    #[command(about = "List the values each option still allows under the current selection")]
    Available {
        #[command(flatten)]
        selection: SelectionArgs,
    },
    #[command(about = "Re-verify a configuration server side and save it when it checks out")]
    Checkout {
        #[command(flatten)]
        selection: SelectionArgs,
        #[arg(long, help = "Submitted price; defaults to the price the session displays")]
        price: Option<String>,
    },
    #[command(about = "Inspect effective configuration values with source attribution")]
    Config,
    #[command(about = "Validate config, catalog files, rule payloads and inventory")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    // config errors are reported by the command itself
    if let Ok(config) = AppConfig::load(cli.global.load_options()) {
        init_logging(&config.logging);
    }

    let result = match &cli.command {
        Command::Seed => commands::seed::run(&cli.global),
        Command::Evaluate { selection, accept_auto } => {
            commands::evaluate::run(&cli.global, selection, *accept_auto)
        }
        Command::Available { selection } => commands::available::run(&cli.global, selection),
        Command::Checkout { selection, price } => {
            commands::checkout::run(&cli.global, selection, price.as_deref())
        }
        Command::Config => {
            CommandResult { exit_code: 0, output: commands::config::run(&cli.global) }
        }
        Command::Doctor { json } => {
            CommandResult { exit_code: 0, output: commands::doctor::run(&cli.global, *json) }
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

/// Installs the global subscriber, writing to stderr so stdout stays
/// machine-readable. A second call is a no-op.
pub fn init_logging(config: &LoggingConfig) {
    use tracing::Level;

    let log_level = config.level.parse::<Level>().unwrap_or(Level::INFO);
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(log_level)
        .with_writer(std::io::stderr);

    let _ = match config.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}
