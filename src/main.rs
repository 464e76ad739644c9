use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use fundtrack::cli::setup::{setup, setup_at_path};
use fundtrack::core::log::init_logging;
use fundtrack::core::model::Strategy;
use std::path::PathBuf;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to optional configuration file
    #[arg(short, long, global = true)]
    config_path: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

impl From<Commands> for fundtrack::AppCommand {
    fn from(cmd: Commands) -> fundtrack::AppCommand {
        match cmd {
            Commands::Migrate {
                source,
                target,
                dry_run,
            } => fundtrack::AppCommand::Migrate {
                source,
                target,
                dry_run,
            },
            Commands::Funds { strategy } => fundtrack::AppCommand::Funds { strategy },
            Commands::Investments { fund_id } => fundtrack::AppCommand::Investments { fund_id },
            Commands::Setup => unreachable!("Setup command should be handled separately"),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create default configuration
    Setup,
    /// Copy funds and investments from a JSON document into SQLite
    Migrate {
        /// JSON document to read (defaults to migration.source)
        #[arg(long)]
        source: Option<PathBuf>,
        /// SQLite database to write (defaults to migration.target)
        #[arg(long)]
        target: Option<String>,
        /// Validate and report without writing
        #[arg(long)]
        dry_run: bool,
    },
    /// List funds in the configured store
    Funds {
        /// Only show funds with this strategy
        #[arg(long)]
        strategy: Option<Strategy>,
    },
    /// List investments in the configured store
    Investments {
        /// Only show investments into this fund
        #[arg(long)]
        fund_id: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let result = match cli.command {
        Some(Commands::Setup) => match cli.config_path.as_deref() {
            Some(path) => setup_at_path(path),
            None => setup(),
        },
        Some(cmd) => fundtrack::run_command(cmd.into(), cli.config_path.as_deref()).await,
        None => {
            Cli::command().print_help()?;
            Ok(())
        }
    };

    if let Err(e) = &result {
        tracing::error!(error = %e, "Application failed");
    }
    result
}
