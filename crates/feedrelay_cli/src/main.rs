//! FeedRelay CLI
//!
//! Serves a feed built from a text document over WebSocket replication.
//!
//! # Commands
//!
//! - `serve` - Load a document into a feed and relay it
//! - `inspect` - Load a document and report storage statistics
//! - `keygen` - Print a random feed key

mod commands;
mod feed;

use clap::{Parser, Subcommand};
use commands::serve::ServeOptions;
use commands::StorageKind;
use feedrelay_relay::FeedKey;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// FeedRelay command-line tools.
#[derive(Parser)]
#[command(name = "feedrelay")]
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
    /// Load a document into a feed and relay it to peers
    Serve {
        /// Address to listen on
        #[arg(short, long, default_value = "127.0.0.1:9000")]
        bind: SocketAddr,

        /// Document whose lines become feed entries
        #[arg(short, long, default_value = "README.md")]
        file: PathBuf,

        /// Storage kind
        #[arg(short, long, value_enum, default_value_t = StorageKind::Memory)]
        storage: StorageKind,

        /// Directory for device storage
        #[arg(short, long)]
        data_dir: Option<PathBuf>,

        /// Feed key as 64 hex characters (random if omitted)
        #[arg(short, long)]
        key_hex: Option<FeedKey>,

        /// Maximum concurrent replication connections
        #[arg(short, long, default_value_t = 64)]
        max_connections: usize,
    },

    /// Load a document and report storage statistics
    Inspect {
        /// Document whose lines become feed entries
        #[arg(short, long, default_value = "README.md")]
        file: PathBuf,

        /// Storage kind
        #[arg(short, long, value_enum, default_value_t = StorageKind::Memory)]
        storage: StorageKind,

        /// Directory for device storage
        #[arg(short, long)]
        data_dir: Option<PathBuf>,

        /// Feed key as 64 hex characters (random if omitted)
        #[arg(short, long)]
        key_hex: Option<FeedKey>,

        /// Output format (text, json)
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// Print a random feed key
    Keygen,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Serve {
            bind,
            file,
            storage,
            data_dir,
            key_hex,
            max_connections,
        } => {
            commands::serve::run(ServeOptions {
                bind,
                file,
                storage,
                data_dir,
                key: key_hex,
                max_connections,
            })
            .await?;
        }
        Commands::Inspect {
            file,
            storage,
            data_dir,
            key_hex,
            format,
        } => {
            commands::inspect::run(&file, storage, data_dir.as_deref(), key_hex, &format).await?;
        }
        Commands::Keygen => {
            commands::keygen::run();
        }
    }

    Ok(())
}
