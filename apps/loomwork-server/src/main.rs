mod registered_modules;

use std::path::PathBuf;

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};

/// Loomwork Server - configuration-driven workflow engine
#[derive(Parser)]
#[command(name = "loomwork-server")]
#[command(about = "Loomwork Server - configuration-driven workflow engine")]
#[command(version)]
struct Cli {
    /// Path to the specification file
    #[arg(short, long, default_value = "config/loomwork.yaml")]
    config: PathBuf,

    /// Print the effective configuration (JSON) and exit
    #[arg(long)]
    print_config: bool,

    /// Increase log verbosity; repeatable up to three times (-v, -vv, -vvv)
    #[arg(short = 'v', action = ArgAction::Count)]
    verbose: u8,

    /// Force every database-backed module onto an in-memory SQLite
    /// connection, ignoring the spec's configured database
    #[arg(long)]
    mock: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server
    Run,
    /// Validate configuration and exit
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.print_config || matches!(cli.command, Some(Commands::Check)) {
        let spec = match modkit::bootstrap::load_spec(&cli.config) {
            Ok(spec) => spec,
            Err(err) => {
                eprintln!("configuration invalid: {err}");
                std::process::exit(err.exit_code().into());
            }
        };

        if matches!(cli.command, Some(Commands::Check)) {
            let issues = modkit::bootstrap::validate_spec(&spec);
            if !issues.is_empty() {
                eprintln!("configuration invalid:\n{}", modkit::bootstrap::format_issues(&issues));
                std::process::exit(1);
            }
        }

        if cli.print_config {
            let rendered = serde_json::to_string_pretty(&spec)?;
            println!("{rendered}");
        } else {
            println!("configuration OK: {}", cli.config.display());
        }
        return Ok(());
    }

    let overrides = modkit::bootstrap::RunOverrides { verbosity: cli.verbose, mock: cli.mock };
    match modkit::bootstrap::run_server(&cli.config, overrides).await {
        Ok(()) => Ok(()),
        Err(err) => {
            tracing::error!(error = %err, "loomwork-server exiting");
            std::process::exit(err.exit_code().into());
        }
    }
}
