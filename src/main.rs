//! buildwright - build orchestration CLI
//!
//! CLI entry point that dispatches to subcommands.

use buildwright::cli::{commands, exit_code, Cli, Commands};
use buildwright::config::ConfigManager;
use buildwright::context::Action;
use buildwright::error::BuildResult;
use clap::Parser;
use console::style;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::from(exit_code(e.kind()))
        }
    }
}

async fn run() -> BuildResult<ExitCode> {
    let cli = Cli::parse();

    let config_manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };
    let config = config_manager.load().await?;

    init_logging(cli.verbose, &config.general.log_format);
    debug!("Loaded configuration from {}", config_manager.path().display());

    match cli.command {
        Commands::Configure(args) => commands::build(Action::Configure, args, &config).await,
        Commands::Build(args) => commands::build(Action::Build, args, &config).await,
        Commands::Clean(args) => commands::build(Action::Clean, args, &config).await,
        Commands::Test(args) => commands::build(Action::Test, args, &config).await,
        Commands::Package(args) => commands::build(Action::Package, args, &config).await,
        Commands::Validate(args) => commands::validate(args, &config).await,
        Commands::Cache(args) => commands::cache(args, &config).await,
    }
}

/// 0 = warn, 1 = info, 2+ = debug; `RUST_LOG` takes precedence
fn init_logging(verbose: u8, format: &str) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("buildwright={}", level)));

    if format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .without_time()
            .with_writer(std::io::stderr)
            .init();
    }
}
