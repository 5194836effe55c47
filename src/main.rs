//! shipcheck - end-to-end release checks
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use shipcheck::cli::{commands, Cli, Commands};
use shipcheck::config::ConfigManager;
use shipcheck::error::{ShipcheckError, ShipcheckResult};
use shipcheck::ui::UiContext;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

/// Initialize logging: 0 = warn (spinners only), 1 = info, 2+ = debug.
/// `RUST_LOG` takes precedence when set.
fn init_logging(verbose: u8, log_format: &str) {
    let default = match verbose {
        0 => "shipcheck=warn",
        1 => "shipcheck=info",
        _ => "shipcheck=debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    if log_format == "json" {
        builder.json().init();
    } else {
        builder.without_time().init();
    }
}

async fn run() -> ShipcheckResult<()> {
    let cli = Cli::parse();
    let ctx = UiContext::detect().with_plain(cli.plain || cli.verbose >= 2);

    let manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => {
            let cwd = std::env::current_dir()
                .map_err(|e| ShipcheckError::io("getting current directory", e))?;
            ConfigManager::discover(&cwd)
        }
    };

    match cli.command {
        Commands::Completions(args) => {
            commands::completions(args);
            Ok(())
        }
        Commands::Config(args) => {
            init_logging(cli.verbose, "text");
            commands::config(args, &manager, &ctx).await
        }
        Commands::Cache(args) => {
            let config = manager.load_or_default().await?;
            init_logging(cli.verbose, &config.general.log_format);
            commands::cache(args, &config, &ctx).await
        }
        Commands::Run(args) => {
            let config = manager.load().await?;
            init_logging(cli.verbose, &config.general.log_format);
            commands::run(args, config, &ctx, cli.verbose >= 2).await
        }
    }
}
