//! Enclave command-line tool
//!
//! Inspects archives and isolation policies without running any work:
//! `scan` lists the packages or units archives contain, `resolve` shows
//! how a policy file routes symbols and where each one is loaded from.

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "enclave")]
#[command(about = "Isolated unit loading toolkit", long_about = None)]
#[command(version)]
struct Cli {
    /// Log filter (e.g. "warn", "debug", "enclave_core=trace")
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the packages (or units) contained in archives
    Scan {
        /// Zip files or directories to scan
        #[arg(required = true)]
        archives: Vec<PathBuf>,
        /// List units instead of packages
        #[arg(long)]
        units: bool,
        /// Skip names starting with this prefix (repeatable)
        #[arg(long = "ignore", value_name = "PREFIX")]
        ignore: Vec<String>,
        /// Print a JSON array instead of one name per line
        #[arg(long)]
        json: bool,
    },

    /// Explain how a policy file routes and resolves symbols
    Resolve {
        /// Policy file (TOML)
        #[arg(short, long)]
        policy: PathBuf,
        /// Symbols to resolve
        #[arg(required = true)]
        symbols: Vec<String>,
        /// Only print the route, do not load anything
        #[arg(long)]
        route_only: bool,
        /// Print JSON objects instead of text
        #[arg(long)]
        json: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    match cli.command {
        Commands::Scan {
            archives,
            units,
            ignore,
            json,
        } => commands::scan::execute(&archives, units, &ignore, json),
        Commands::Resolve {
            policy,
            symbols,
            route_only,
            json,
        } => commands::resolve::execute(&policy, &symbols, route_only, json),
    }
}
