//! Tidemark CLI
//!
//! Command-line tools for exercising Tidemark sync.
//!
//! # Usage
//!
//! ```bash
//! # Run a three-device sync simulation with a forced conflict
//! tidemark simulate --devices 3 --conflict
//!
//! # Decode a captured protocol message
//! tidemark decode push-request ./capture.cbor
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{MessageKind, OutputFormat, ResolveStrategy};

/// Tidemark sync command-line tool
#[derive(Parser)]
#[command(name = "tidemark")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Simulate devices syncing through an in-process server
    Simulate {
        /// Number of devices
        #[arg(short, long, default_value = "2")]
        devices: usize,

        /// Notes created by each device
        #[arg(short, long, default_value = "3")]
        notes: usize,

        /// Edit one note on two devices while offline
        #[arg(long)]
        conflict: bool,

        /// How the losing device resolves the conflict
        #[arg(long, value_enum, default_value = "remote")]
        resolve: ResolveStrategy,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Decode a CBOR protocol message and print it as JSON
    Decode {
        /// Message kind
        #[arg(value_enum)]
        kind: MessageKind,

        /// File holding the encoded message
        path: PathBuf,
    },

    /// Show protocol version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Simulate {
            devices,
            notes,
            conflict,
            resolve,
            format,
        } => {
            let options = commands::simulate::SimulateOptions {
                devices,
                notes,
                conflict,
                resolve,
            };
            commands::simulate::run(&options, format)?;
        }
        Commands::Decode { kind, path } => {
            commands::decode::run(kind, &path)?;
        }
        Commands::Version => {
            println!("tidemark {}", env!("CARGO_PKG_VERSION"));
            println!(
                "sync protocol version {}",
                tidemark_sync_protocol::PROTOCOL_VERSION
            );
        }
    }

    Ok(())
}
