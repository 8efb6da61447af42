//! Harvest CLI — entry point.

mod commands;
mod repl;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use serde_json::Value;

use harvest::{Extractor, HarvestConfig};

use commands::ExtractArgs;

#[derive(Parser)]
#[command(
    name = "harvest",
    about = "Resilient record extraction from HTML pages",
    version
)]
struct Cli {
    /// Path to a JSON config file (else HARVEST_CONFIG, then ./harvest.json).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "warn", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract records from one target and print them as JSON.
    Extract {
        url: String,

        /// Extra query parameter, repeatable.
        #[arg(short, long = "param", value_name = "KEY=VALUE", value_parser = commands::parse_param)]
        params: Vec<(String, String)>,

        /// Bypass the cache read; the fresh result is still stored.
        #[arg(long)]
        refresh: bool,

        /// Do not consult robots.txt before fetching.
        #[arg(long)]
        ignore_robots: bool,

        /// Overall deadline in milliseconds, retries included.
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Extract up to 5 targets concurrently and print them side by side.
    Compare {
        #[arg(required = true, num_args = 1..)]
        urls: Vec<String>,
    },

    /// Result cache operations.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Interactive shell sharing one cache across commands.
    Shell,

    /// Print the effective configuration as JSON.
    Config,

    /// Generate shell completion scripts.
    ///
    /// Examples:
    ///   harvest completions bash > ~/.local/share/bash-completion/completions/harvest
    ///   harvest completions zsh > ~/.zfunc/_harvest
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Drop every cached result.
    Clear,
}

fn print_json(value: &Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn exit_code(ok: bool) -> ExitCode {
    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(shell, &mut cmd, "harvest", &mut std::io::stdout());
        return Ok(ExitCode::SUCCESS);
    }

    let config = HarvestConfig::resolve(cli.config.as_deref())?;
    if let Commands::Config = cli.command {
        print_json(&serde_json::to_value(&config)?)?;
        return Ok(ExitCode::SUCCESS);
    }

    let extractor = Extractor::from_config(config)?;
    tracing::debug!("extractor ready");

    match cli.command {
        Commands::Extract {
            url,
            params,
            refresh,
            ignore_robots,
            timeout_ms,
        } => {
            let args = ExtractArgs {
                url,
                params,
                refresh,
                ignore_robots,
                timeout_ms,
            };
            let (value, ok) = commands::extract(&extractor, &args).await?;
            print_json(&value)?;
            Ok(exit_code(ok))
        }

        Commands::Compare { urls } => {
            let (value, ok) = commands::compare(&extractor, &urls).await?;
            print_json(&value)?;
            Ok(exit_code(ok))
        }

        Commands::Cache {
            action: CacheAction::Clear,
        } => {
            print_json(&commands::clear_cache(&extractor)?)?;
            Ok(ExitCode::SUCCESS)
        }

        Commands::Shell => {
            repl::run(extractor).await?;
            Ok(ExitCode::SUCCESS)
        }

        Commands::Config | Commands::Completions { .. } => Ok(ExitCode::SUCCESS),
    }
}
