//! CLI argument definitions using clap derive

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use std::path::PathBuf;

/// shipcheck - end-to-end release checks
///
/// Publishes a package to a throwaway local registry and runs the browser
/// test suite of every example project against it.
#[derive(Parser, Debug)]
#[command(name = "shipcheck")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug and child process output)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path (default: nearest shipcheck.toml)
    #[arg(short, long, global = true, env = "SHIPCHECK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Plain output without spinners or progress bars
    #[arg(long, global = true)]
    pub plain: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Publish the package locally and test every example against it
    Run(RunArgs),

    /// Manage the dependency cache
    Cache(CacheArgs),

    /// Show or initialize configuration
    Config(ConfigArgs),

    /// Print shell completions
    Completions(CompletionsArgs),
}

/// Arguments for the run command
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Run only these examples (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub only: Vec<String>,

    /// Skip bump and publish; test against what the registry already serves
    #[arg(long)]
    pub skip_publish: bool,

    /// Always install dependencies, never read or write the cache
    #[arg(long)]
    pub no_cache: bool,

    /// Port for the example dev servers (overrides run.port)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Stop after the first failed example
    #[arg(long)]
    pub fail_fast: bool,

    /// Keep the temporary workspace for inspection
    #[arg(long)]
    pub keep_workspace: bool,

    /// Write the run summary as JSON to this file
    #[arg(long)]
    pub report: Option<PathBuf>,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Subcommand for config
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Write a starter shipcheck.toml
    Init {
        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },
}

/// Output format for list commands
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    Table,
    /// JSON output
    Json,
    /// Simple text (one per line)
    Plain,
}

/// Arguments for the cache command
#[derive(Parser, Debug)]
pub struct CacheArgs {
    /// Subcommand for cache
    #[command(subcommand)]
    pub action: CacheAction,
}

/// Cache subcommands
#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// List cache entries
    List {
        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Remove cache entries (all of them when no key is given)
    Clear {
        /// Entry keys to remove
        keys: Vec<String>,

        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

/// Arguments for the completions command
#[derive(Parser, Debug)]
pub struct CompletionsArgs {
    /// Target shell
    pub shell: Shell,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_run() {
        let cli = Cli::parse_from(["shipcheck", "run", "--only", "basic,gatsby", "--port", "4000"]);
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.only, vec!["basic", "gatsby"]);
                assert_eq!(args.port, Some(4000));
                assert!(!args.skip_publish);
                assert!(!args.fail_fast);
            }
            _ => panic!("expected Run command"),
        }
    }

    #[test]
    fn cli_parses_run_flags() {
        let cli = Cli::parse_from([
            "shipcheck",
            "run",
            "--skip-publish",
            "--no-cache",
            "--fail-fast",
            "--keep-workspace",
            "--report",
            "out.json",
        ]);
        match cli.command {
            Commands::Run(args) => {
                assert!(args.skip_publish);
                assert!(args.no_cache);
                assert!(args.fail_fast);
                assert!(args.keep_workspace);
                assert_eq!(args.report, Some(PathBuf::from("out.json")));
            }
            _ => panic!("expected Run command"),
        }
    }

    #[test]
    fn cli_parses_cache_clear() {
        let cli = Cli::parse_from(["shipcheck", "cache", "clear", "basic", "--yes"]);
        match cli.command {
            Commands::Cache(CacheArgs {
                action: CacheAction::Clear { keys, yes },
            }) => {
                assert_eq!(keys, vec!["basic"]);
                assert!(yes);
            }
            _ => panic!("expected cache clear"),
        }
    }

    #[test]
    fn cli_parses_config_init_force() {
        let cli = Cli::parse_from(["shipcheck", "config", "init", "--force"]);
        match cli.command {
            Commands::Config(ConfigArgs {
                action: Some(ConfigAction::Init { force }),
            }) => assert!(force),
            _ => panic!("expected config init"),
        }
    }

    #[test]
    fn cli_parses_completions() {
        let cli = Cli::parse_from(["shipcheck", "completions", "zsh"]);
        assert!(matches!(
            cli.command,
            Commands::Completions(CompletionsArgs { shell: Shell::Zsh })
        ));
    }

    #[test]
    fn cli_global_flags() {
        let cli = Cli::parse_from(["shipcheck", "cache", "list"]);
        assert_eq!(cli.verbose, 0);
        assert!(!cli.plain);

        let cli = Cli::parse_from(["shipcheck", "-vv", "--plain", "--config", "ci.toml", "cache", "list"]);
        assert_eq!(cli.verbose, 2);
        assert!(cli.plain);
        assert_eq!(cli.config, Some(PathBuf::from("ci.toml")));
    }

    #[test]
    fn cli_rejects_unknown_shell() {
        assert!(Cli::try_parse_from(["shipcheck", "completions", "cmd"]).is_err());
    }
}
