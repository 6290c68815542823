//! regionstore CLI
//!
//! Operator tool for inspecting and maintaining a region directory.

use std::fs;
use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use regionstore::document::{CollectFields, ScanOutcome};
use regionstore::{ChunkPos, Config, RegionId, RegionStorage, WriteOutcome};
use tracing_subscriber::{fmt, EnvFilter};

/// regionstore CLI
#[derive(Parser, Debug)]
#[command(name = "regionstore-cli")]
#[command(about = "Inspect and maintain region-file chunk storage")]
#[command(version)]
struct Args {
    /// Region directory
    #[arg(short, long, default_value = "./region")]
    dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List region files in the directory
    Regions,

    /// Print the document stored for a chunk
    Get {
        #[arg(allow_hyphen_values = true)]
        x: i32,
        #[arg(allow_hyphen_values = true)]
        z: i32,
    },

    /// Check whether a chunk is stored
    Exists {
        #[arg(allow_hyphen_values = true)]
        x: i32,
        #[arg(allow_hyphen_values = true)]
        z: i32,
    },

    /// Print selected fields of a chunk without decoding the rest
    Scan {
        #[arg(allow_hyphen_values = true)]
        x: i32,
        #[arg(allow_hyphen_values = true)]
        z: i32,

        /// Dotted field paths, e.g. Level.Status
        #[arg(short, long, required = true)]
        field: Vec<String>,
    },

    /// Remove a chunk
    Delete {
        #[arg(allow_hyphen_values = true)]
        x: i32,
        #[arg(allow_hyphen_values = true)]
        z: i32,
    },

    /// Rewrite legacy oversized chunks in the current layout
    Migrate,
}

fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,regionstore=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    let config = Config::builder().region_dir(&args.dir).build();
    let storage = match RegionStorage::open(config) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("Failed to open region storage: {}", e);
            process::exit(1);
        }
    };

    let result = run(&storage, args.command);

    if let Err(e) = storage.close() {
        tracing::error!("Failed to close region storage: {}", e);
        process::exit(1);
    }
    if let Err(e) = result {
        tracing::error!("{}", e);
        process::exit(1);
    }
}

fn run(storage: &RegionStorage, command: Commands) -> regionstore::Result<()> {
    match command {
        Commands::Regions => {
            for region in list_regions(storage)? {
                println!("{}\t{}", region, storage.region_path(region).display());
            }
        }
        Commands::Get { x, z } => match storage.read(ChunkPos::new(x, z))? {
            Some(document) => println!("{:#?}", document),
            None => println!("(no chunk)"),
        },
        Commands::Exists { x, z } => {
            println!("{}", storage.chunk_exists(ChunkPos::new(x, z))?);
        }
        Commands::Scan { x, z, field } => {
            let mut collector = CollectFields::new(field);
            match storage.scan_chunk(ChunkPos::new(x, z), &mut collector)? {
                None => println!("(no chunk)"),
                Some(outcome) => {
                    for (path, value) in collector.found() {
                        println!("{} = {:?}", path, value);
                    }
                    if outcome == ScanOutcome::Completed {
                        tracing::debug!("scanned the whole document");
                    }
                }
            }
        }
        Commands::Delete { x, z } => match storage.write(ChunkPos::new(x, z), None) {
            WriteOutcome::Cleared => println!("deleted"),
            WriteOutcome::NothingToClear => println!("(no region)"),
            other => {
                if let Some(e) = other.error() {
                    tracing::error!("Delete failed: {}", e);
                }
            }
        },
        Commands::Migrate => {
            let mut total = 0;
            for region in list_regions(storage)? {
                total += storage.migrate_oversized(region)?;
            }
            println!("migrated {} chunk(s)", total);
        }
    }
    Ok(())
}

/// Region ids of every container file in the storage directory
fn list_regions(storage: &RegionStorage) -> regionstore::Result<Vec<RegionId>> {
    if !storage.region_dir().exists() {
        return Ok(Vec::new());
    }
    let mut regions = Vec::new();
    for entry in fs::read_dir(storage.region_dir())? {
        let entry = entry?;
        if let Some(region) = RegionId::from_file_name(&entry.path()) {
            regions.push(region);
        }
    }
    regions.sort_by_key(|r| (r.x(), r.z()));
    Ok(regions)
}
