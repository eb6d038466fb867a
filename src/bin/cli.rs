//! SegKV CLI
//!
//! Command-line interface over a local SegKV data directory.

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use segkv::{Config, Engine};
use tracing_subscriber::{fmt, EnvFilter};

/// SegKV CLI
#[derive(Parser, Debug)]
#[command(name = "segkv-cli")]
#[command(about = "CLI for the SegKV log-structured key-value store")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./segkv_data")]
    data_dir: String,

    /// Rotate the active segment past this many KB
    #[arg(short, long, default_value = "4096")]
    rotation_kb: u64,

    /// Closed segments that trigger compaction
    #[arg(short = 'c', long, default_value = "4")]
    compaction_segments: usize,

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
    Set {
        /// The key to set
        key: String,

        /// The value to set
        value: String,
    },

    /// Delete a key
    Del {
        /// The key to delete
        key: String,
    },

    /// Run one compaction now
    Compact,

    /// Print segment statistics
    Stats,
}

fn main() -> ExitCode {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,segkv=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config = Config::builder()
        .data_dir(&args.data_dir)
        .rotation_threshold_bytes(args.rotation_kb * 1024)
        .compaction_trigger_segment_count(args.compaction_segments)
        .background_compaction(false)
        .build();

    let engine = match Engine::open(config) {
        Ok(e) => e,
        Err(e) => {
            tracing::error!("Failed to open engine: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let outcome = run(&engine, args.command);
    let closed = engine.close();

    match (outcome, closed) {
        (Ok(code), Ok(())) => code,
        (Err(e), _) | (Ok(_), Err(e)) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(engine: &Engine, command: Commands) -> segkv::Result<ExitCode> {
    match command {
        Commands::Get { key } => match engine.get(key.as_bytes())? {
            Some(value) => {
                println!("{}", String::from_utf8_lossy(&value));
                Ok(ExitCode::SUCCESS)
            }
            None => {
                println!("(nil)");
                Ok(ExitCode::from(1))
            }
        },
        Commands::Set { key, value } => {
            engine.set(key.as_bytes(), value.as_bytes())?;
            println!("OK");
            Ok(ExitCode::SUCCESS)
        }
        Commands::Del { key } => {
            engine.delete(key.as_bytes())?;
            println!("OK");
            Ok(ExitCode::SUCCESS)
        }
        Commands::Compact => {
            match engine.compact()? {
                Some(report) => println!(
                    "compacted {:?} into {} ({} -> {} bytes, {} records)",
                    report.inputs,
                    report.output,
                    report.bytes_before,
                    report.bytes_after,
                    report.stats.records_written
                ),
                None => println!("nothing to compact"),
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Stats => {
            let stats = engine.stats();
            println!("active segment:   {}", stats.active_segment);
            println!("active bytes:     {}", stats.active_bytes);
            println!("closed segments:  {}", stats.closed_segments);
            println!("total bytes:      {}", stats.total_bytes);
            Ok(ExitCode::SUCCESS)
        }
    }
}
