//! caskstore CLI
//!
//! Offline administration of a store directory.

use std::path::PathBuf;

use caskstore::segment;
use caskstore::{ExpectedVersion, Store};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

/// caskstore CLI
#[derive(Parser, Debug)]
#[command(name = "caskstore-cli")]
#[command(about = "Inspect and append to a caskstore directory")]
#[command(version)]
struct Args {
    /// Store directory
    #[arg(short, long, default_value = "./caskstore_data")]
    data_dir: PathBuf,

    /// Log store internals to stderr
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Append a payload to a stream
    Append {
        /// Stream name
        stream: String,

        /// Payload (stored as UTF-8 bytes)
        payload: String,

        /// Required current version of the stream
        #[arg(short, long)]
        expected: Option<u32>,
    },

    /// Print a stream's history
    Read {
        /// Stream name
        stream: String,

        /// Only versions after this one
        #[arg(long, default_value = "0")]
        after: u32,

        /// Maximum entries to print
        #[arg(long)]
        max: Option<usize>,
    },

    /// Print a window of the global feed
    Scan {
        /// Start just after this 1-based position
        #[arg(long, default_value = "0")]
        after: u64,

        /// Maximum entries to print
        #[arg(long, default_value = "100")]
        max: usize,
    },

    /// Check every segment without taking the directory lock
    Verify,
}

fn main() {
    let args = Args::parse();

    let default_filter = if args.verbose { "info,caskstore=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(args) {
        tracing::error!("{}", e);
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> caskstore::Result<()> {
    if let Commands::Verify = args.command {
        let report = segment::verify(&args.data_dir)?;
        println!("segments scanned:   {}", report.segments_scanned);
        println!("records recovered:  {}", report.records_recovered);
        println!("malformed segments: {}", report.malformed_segments);
        return Ok(());
    }

    let store = Store::open_path(&args.data_dir)?;

    match args.command {
        Commands::Append {
            stream,
            payload,
            expected,
        } => {
            let expected = expected.map(ExpectedVersion::Exact).unwrap_or_default();
            let version = store.append(&stream, payload.into_bytes(), expected)?;
            println!("{}", version);
        }
        Commands::Read { stream, after, max } => {
            for entry in store.read_stream_from(&stream, after, max.unwrap_or(usize::MAX)) {
                println!("{}\t{}", entry.version, String::from_utf8_lossy(&entry.payload));
            }
        }
        Commands::Scan { after, max } => {
            for (i, entry) in store.read_all(after, max).into_iter().enumerate() {
                println!(
                    "{}\t{}\t{}",
                    after + i as u64 + 1,
                    entry.stream,
                    String::from_utf8_lossy(&entry.payload)
                );
            }
        }
        Commands::Verify => {}
    }

    store.close()
}
