//! unibase CLI
//!
//! Command-line tools for unibase databases.
//!
//! # Commands
//!
//! - `info` - Display backend health and configuration
//! - `export` - Write an export archive
//! - `import` - Load an export archive
//! - `count` - Count the records of a table

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use unibase::Config;

/// unibase command-line database tools.
#[derive(Parser)]
#[command(name = "unibase")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// JSON configuration file
    #[arg(global = true, short, long)]
    config: Option<PathBuf>,

    /// Connection string, overriding the configuration
    #[arg(global = true, short, long)]
    database: Option<String>,

    /// Export directory, overriding the configuration
    #[arg(global = true, long)]
    export_dir: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display backend health and configuration
    Info {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Write an export archive into the export directory
    Export,

    /// Load an export archive
    Import {
        /// Archive produced by `export`
        archive: PathBuf,

        /// Replace existing contents instead of merging
        #[arg(long)]
        drop: bool,
    },

    /// Count the records of a table
    Count {
        /// Table or collection name
        table: String,

        /// Filter tree as JSON over base record fields; repeat to conjoin
        #[arg(short = 'w', long = "where")]
        filters: Vec<String>,
    },

    /// Show version information
    Version,
}

fn load_config(cli: &Cli) -> Result<Config, Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => Config::from_json_file(path)?,
        None => Config::new(),
    };
    if let Some(database) = &cli.database {
        config = config.database_string(database.clone());
    }
    if let Some(dir) = &cli.export_dir {
        config = config.export_directory(dir.clone());
    }
    Ok(config)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(&cli)?;
    match cli.command {
        Commands::Info { format } => commands::info::run(config, &format)?,
        Commands::Export => commands::maintenance::export(config)?,
        Commands::Import { archive, drop } => commands::maintenance::import(config, &archive, drop)?,
        Commands::Count { table, filters } => {
            let count = commands::count::run(&config, &table, &filters)?;
            println!("{count}");
        }
        Commands::Version => {
            println!("unibase CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
