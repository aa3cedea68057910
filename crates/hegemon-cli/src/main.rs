use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hegemon_core::Config;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;

#[derive(Parser)]
#[command(name = "hegemon")]
#[command(about = "Database backup and restore tool", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the configuration file (YAML or JSON)
    #[arg(short, long, global = true, default_value = "hegemon.yaml")]
    config: String,

    /// Enable verbose logging (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a backup now
    Backup {
        /// Backup type label (full, incremental, differential)
        #[arg(short = 't', long = "type", default_value = "full")]
        kind: String,
    },

    /// Restore a backup into the configured database
    Restore {
        /// Ledger entry name or path to a backup file
        #[arg(short, long)]
        artifact: String,
    },

    /// List stored backups
    List {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Verify stored checksums
    Verify {
        /// Verify a single backup (all when omitted)
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Delete a stored backup
    Delete {
        /// Ledger entry name
        #[arg(short, long)]
        name: String,
    },

    /// Apply the retention policy now
    Prune,

    /// Run scheduled backups until interrupted
    Schedule,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::from_file(&cli.config)
        .await
        .with_context(|| format!("Failed to load configuration from {}", cli.config))?;

    // Initialize tracing
    // Priority: RUST_LOG env var > verbose flag > configured level
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        match cli.verbose {
            0 => EnvFilter::try_new(&config.logging.level)
                .unwrap_or_else(|_| EnvFilter::new("info")),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match cli.command {
        Commands::Backup { kind } => {
            commands::backup::run(config, &kind).await?;
        }
        Commands::Restore { artifact } => {
            commands::restore::run(config, &artifact).await?;
        }
        Commands::List { format } => {
            commands::list::run(&config, &format).await?;
        }
        Commands::Verify { name } => {
            commands::verify::run(&config, name.as_deref()).await?;
        }
        Commands::Delete { name } => {
            commands::delete::run(&config, &name).await?;
        }
        Commands::Prune => {
            commands::prune::run(&config).await?;
        }
        Commands::Schedule => {
            commands::schedule::run(config).await?;
        }
    }

    Ok(())
}
