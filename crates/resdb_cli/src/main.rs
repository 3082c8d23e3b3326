//! ResDB CLI
//!
//! Offline tools for ResDB store directories.
//!
//! # Commands
//!
//! - `inspect` - Display generations, the selected directory and garbage
//! - `verify` - Validate every directory generation and its entries
//! - `dump` - Print the decoded entries of the selected generation

mod commands;

use clap::{Parser, Subcommand};
use commands::store::Store;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// ResDB command-line store tools.
#[derive(Parser)]
#[command(name = "resdb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store directory
    #[arg(global = true, short, long, default_value = "./data/persistence/")]
    path: PathBuf,

    /// File name prefix of directory generations
    #[arg(global = true, long, default_value = "resMap")]
    directory_prefix: String,

    /// File name prefix of data log generations
    #[arg(global = true, long, default_value = "resData")]
    data_prefix: String,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display generations, the selected directory and garbage
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Validate every directory generation and decode every entry
    Verify,

    /// Print the decoded entries of the selected generation
    Dump {
        /// Maximum number of entries to dump
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let open = || Store::scan(&cli.path, &cli.directory_prefix, &cli.data_prefix);
    match &cli.command {
        Commands::Inspect { format } => commands::inspect::run(&open()?, format)?,
        Commands::Verify => commands::verify::run(&open()?)?,
        Commands::Dump { limit, format } => commands::dump::run(&open()?, *limit, format)?,
        Commands::Version => {
            println!("ResDB CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("ResDB Core v{}", resdb_core::VERSION);
        }
    }

    Ok(())
}
