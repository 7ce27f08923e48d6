//! # Sieve CLI
//!
//! Command-line interface for querying JSON row files with Sieve.
//!
//! ## Commands
//!
//! - `sieve query <rows.json>` - Filter and sort rows with predicates
//! - `sieve describe <rows.json>` - Show the inferred schema and column statistics
//!
//! ## Example Usage
//!
//! ```bash
//! # People aged 30 or over whose name contains "jo", oldest first
//! sieve query people.json --where age ">=" 30 --where name like jo --sort age:desc
//!
//! # Any of several predicates, as JSON
//! sieve query people.json --any --where city = Oslo --where city = Bergen --output json
//! ```

mod app;
mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Sieve - indexed queries over in-memory rows
#[derive(Parser)]
#[command(name = "sieve")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Filter and sort the rows of a JSON file
    Query {
        /// JSON file holding an array of objects
        file: PathBuf,

        /// Predicate as three words: property, operator, value (repeatable)
        #[arg(
            short,
            long = "where",
            num_args = 3,
            value_names = ["PROP", "OP", "VALUE"],
            action = clap::ArgAction::Append
        )]
        predicates: Vec<String>,

        /// Join predicates with "or" instead of "and"
        #[arg(long)]
        any: bool,

        /// Build an index on a property before querying (repeatable)
        #[arg(short, long)]
        index: Vec<String>,

        /// Sort by a property, `PROP` or `PROP:desc` (repeatable)
        #[arg(short, long)]
        sort: Vec<String>,

        /// Maximum number of rows to show
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        output: OutputFormat,
    },

    /// Show the inferred schema and per-column statistics
    Describe {
        /// JSON file holding an array of objects
        file: PathBuf,
    },
}

#[derive(Clone, Debug, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Unknown output format: {}", s)),
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = match &cli.config {
        Some(path) => sieve_core::Config::load_from(path)?,
        None => sieve_core::Config::load()?,
    };

    // Setup logging; stdout is reserved for results
    let log_level = if cli.quiet {
        "error".to_string()
    } else {
        match cli.verbose {
            0 => config.general.log_level.clone(),
            1 => "debug".to_string(),
            _ => "trace".to_string(),
        }
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_level)))
        .init();

    match cli.command {
        Commands::Query {
            file,
            predicates,
            any,
            index,
            sort,
            limit,
            output,
        } => commands::query::run(
            config,
            &file,
            &predicates,
            any,
            &index,
            &sort,
            limit,
            output,
        ),
        Commands::Describe { file } => commands::describe::run(config, &file),
    }
}
