//! DriftKV CLI
//!
//! Command-line access to a store directory.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use driftkv::{Config, Engine};
use tracing_subscriber::{fmt, EnvFilter};

/// DriftKV CLI
#[derive(Parser, Debug)]
#[command(name = "driftkv")]
#[command(about = "Embedded append-only key-value store")]
#[command(version)]
struct Args {
    /// Base directory of the store
    #[arg(short, long, default_value = "./driftkv_data")]
    base_dir: PathBuf,

    /// Rotate the active segment once it exceeds this many bytes
    #[arg(short, long)]
    max_segment_bytes: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Get a value by key
    Get {
        /// The key to get
        key: String,
    },

    /// Set a key-value pair
    Put {
        /// The key to set
        key: String,

        /// The value to set
        value: String,
    },

    /// Merge sealed segments now
    Compact,

    /// Print store counters
    Stats,
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,driftkv=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    if let Err(e) = run(args) {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> driftkv::Result<()> {
    let mut builder = Config::builder().base_dir(&args.base_dir);
    if let Some(bytes) = args.max_segment_bytes {
        builder = builder.max_segment_bytes(bytes);
    }

    let engine = Engine::open(builder.build())?;

    match args.command {
        Commands::Get { key } => match engine.read(&key)? {
            Some(value) => println!("{}", value),
            None => {
                tracing::info!("Key {:?} not found", key);
                engine.close()?;
                std::process::exit(2);
            }
        },
        Commands::Put { key, value } => {
            engine.write(&key, &value)?;
            println!("OK");
        }
        Commands::Compact => {
            let stats = engine.compact()?;
            println!(
                "merged {} segments into {}, copied {} entries, reclaimed {} bytes",
                stats.segments_merged,
                stats.segments_written,
                stats.entries_copied,
                stats.bytes_reclaimed
            );
        }
        Commands::Stats => {
            let stats = engine.stats()?;
            println!("active segment:  {}", stats.active_segment);
            println!("segments:        {}", stats.segment_count);
            println!("keys:            {}", stats.key_count);
            println!("live bytes:      {}", stats.live_bytes);
            println!("total bytes:     {}", stats.total_bytes);
        }
    }

    engine.close()
}
