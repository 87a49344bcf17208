//! Tailfeed CLI
//!
//! Command-line tools for recorded antenna tails.
//!
//! # Commands
//!
//! - `replay` - Replay a recorded tail through the pipeline and print snapshots
//! - `inspect` - Summarise a recorded tail
//! - `classify` - Print the health class of a performance value

mod commands;
mod recording;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tailfeed_engine::{ClassThresholds, DEFAULT_VIEW};
use tracing_subscriber::EnvFilter;

/// Tailfeed command-line tools.
#[derive(Parser)]
#[command(name = "tailfeed")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a JSON-lines tail recording and print each snapshot
    Replay {
        /// Path to the recording
        path: PathBuf,

        /// View name used in the tail statement
        #[arg(long, default_value = DEFAULT_VIEW)]
        view: String,

        /// Performance strictly above this value is high
        #[arg(long, default_value_t = 5.0)]
        high_above: f64,

        /// Performance strictly below this value is low
        #[arg(long, default_value_t = 4.75)]
        low_below: f64,

        /// Matching retractions before a helper antenna is evicted
        #[arg(long, default_value_t = 3)]
        helper_misses: u32,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Summarise a JSON-lines tail recording
    Inspect {
        /// Path to the recording
        path: PathBuf,

        /// List antenna ids
        #[arg(short, long)]
        keys: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Print the health class of a performance value
    Classify {
        /// Performance value
        performance: f64,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Replay {
            path,
            view,
            high_above,
            low_below,
            helper_misses,
            format,
        } => {
            let options = commands::replay::ReplayOptions {
                view,
                high_above,
                low_below,
                helper_misses,
                format,
            };
            commands::replay::run(&path, &options).await?;
        }
        Commands::Inspect { path, keys, format } => {
            commands::inspect::run(&path, keys, &format)?;
        }
        Commands::Classify { performance } => {
            println!("{}", ClassThresholds::default().classify(performance));
        }
        Commands::Version => {
            println!("Tailfeed CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
