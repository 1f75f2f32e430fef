//! protodig - Dump Protocol Buffer definitions embedded in compiled binaries
//!
//! This tool scans a binary for embedded protobuf file descriptors, builds
//! them dependencies first, and writes both the reconstructed `.proto` text
//! and the original compiled bytes to an output directory.

use anyhow::{bail, Context, Result};
use clap::error::ErrorKind;
use clap::Parser;
use protodig_core::{
    dumper, extract, manifest, DumpOptions, Extraction, ReflectPool, Scanner, ScannerConfig,
};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

/// Exit code used when the command line cannot be parsed
const USAGE_EXIT_CODE: i32 = -1;

/// Dump Protocol Buffer definitions embedded in compiled binaries
#[derive(Parser, Debug)]
#[command(name = "protodig")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Binary file to scan
    input: PathBuf,

    /// Output directory; receives `text/` and `compiled/` subdirectories
    output: PathBuf,

    /// Write the load order as a JSON array to this file inside the output directory
    manifest: Option<PathBuf>,

    /// Keep the previous version of changed text files as `<name>.old`
    #[arg(long)]
    backup: bool,

    /// Only log the load order without writing anything
    #[arg(long)]
    list_only: bool,

    /// Maximum number of descriptors to extract (0 = unlimited)
    #[arg(long, default_value = "0")]
    max_descriptors: usize,

    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            e.exit()
        }
        Err(e) => {
            print!("{}", e.render());
            std::process::exit(USAGE_EXIT_CODE);
        }
    };

    // Initialize tracing
    let level = match cli.verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_target(false)
        .init();

    run(&cli)
}

/// Read the whole input file into memory
fn read_input(path: &Path) -> Result<Vec<u8>> {
    if !path.is_file() {
        bail!("Input path is not a file: {}", path.display());
    }
    fs::read(path).with_context(|| format!("Failed to read input file: {}", path.display()))
}

fn run(cli: &Cli) -> Result<()> {
    let data = read_input(&cli.input)?;
    info!("Read {} bytes from {}", data.len(), cli.input.display());

    let scanner = Scanner::with_config(ScannerConfig::new().max_results(cli.max_descriptors));
    let mut pool = ReflectPool::new();
    let Extraction {
        descriptors,
        load_order,
    } = extract(data.into(), &scanner, &mut pool)
        .with_context(|| format!("Failed to resolve descriptors in {}", cli.input.display()))?;

    if load_order.is_empty() {
        info!("No descriptors found in {}", cli.input.display());
    }

    if cli.list_only {
        for (i, name) in load_order.iter().enumerate() {
            info!("{:>4} {}", i + 1, name);
        }
        return Ok(());
    }

    let options = DumpOptions::new().backup(cli.backup);
    dumper::dump_all(&load_order, &descriptors, &cli.output, options)
        .with_context(|| format!("Failed to dump into {}", cli.output.display()))?;

    if let Some(manifest_name) = &cli.manifest {
        let path = cli.output.join(manifest_name);
        manifest::write(&path, &load_order, &descriptors)
            .with_context(|| format!("Failed to write manifest {}", path.display()))?;
    }

    Ok(())
}
