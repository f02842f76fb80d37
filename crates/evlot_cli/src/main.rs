//! EVLOT CLI
//!
//! Command-line tools for organizers and auditors working from exported
//! JSON snapshots.
//!
//! # Commands
//!
//! - `draw` - Run a draw offline against a snapshot
//! - `verify` - Replay stored draw records
//! - `stats` - Show per-event statistics
//! - `export` - Write the final list as CSV
//! - `token` - Issue a session token

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// EVLOT command-line lottery tools.
#[derive(Parser)]
#[command(name = "evlot")]
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
    /// Run a draw offline against a snapshot
    Draw {
        /// Snapshot file
        #[arg(short, long)]
        input: PathBuf,

        /// Event id
        #[arg(short, long)]
        event: String,

        /// Draw seed (random if omitted)
        #[arg(short, long)]
        seed: Option<u64>,

        /// Draw time in Unix milliseconds (now if omitted)
        #[arg(long)]
        at: Option<u64>,

        /// Write the updated snapshot here
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Replay stored draw records
    Verify {
        /// A draw record or a snapshot containing draws
        #[arg(short, long)]
        record: PathBuf,

        /// Only verify this event's draw
        #[arg(short, long)]
        event: Option<String>,
    },

    /// Show per-event statistics
    Stats {
        /// Snapshot file
        #[arg(short, long)]
        input: PathBuf,

        /// Event id
        #[arg(short, long)]
        event: String,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Write the final list of accepted entrants as CSV
    Export {
        /// Snapshot file
        #[arg(short, long)]
        input: PathBuf,

        /// Event id
        #[arg(short, long)]
        event: String,

        /// Directory for the CSV file
        #[arg(short, long, default_value = ".")]
        out_dir: PathBuf,
    },

    /// Issue a session token
    Token {
        /// Signing secret
        #[arg(short, long)]
        secret: String,

        /// User id
        #[arg(short, long)]
        user: String,

        /// Token lifetime in hours
        #[arg(long, default_value = "24")]
        hours: u64,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Draw {
            input,
            event,
            seed,
            at,
            output,
            format,
        } => {
            commands::draw::run(&input, &event, seed, at, output.as_deref(), &format)?;
        }
        Commands::Verify { record, event } => {
            commands::verify::run(&record, event.as_deref())?;
        }
        Commands::Stats {
            input,
            event,
            format,
        } => {
            commands::stats::run(&input, &event, &format)?;
        }
        Commands::Export {
            input,
            event,
            out_dir,
        } => {
            commands::export::run(&input, &event, &out_dir)?;
        }
        Commands::Token {
            secret,
            user,
            hours,
        } => {
            commands::token::run(&secret, &user, hours)?;
        }
        Commands::Version => {
            println!("EVLOT CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("EVLOT Core v{}", evlot_core::VERSION);
        }
    }

    Ok(())
}
