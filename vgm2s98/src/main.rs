//! CLI tool to convert VGM files to S98 files.
use std::path::PathBuf;

use clap::Parser;
use snafu::prelude::*;
use snafu::{report, Whatever};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = env!("CARGO_PKG_NAME"),
    version = env!("CARGO_PKG_VERSION"),
    about = env!("CARGO_PKG_DESCRIPTION"),
)]
struct Cli {
    /// VGM file to read
    #[arg(value_name = "INPUT")]
    input: PathBuf,
    /// S98 file to write
    #[arg(value_name = "OUTPUT")]
    output: PathBuf,
    /// Log every step of the conversion
    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,
    /// Only log warnings and errors
    #[arg(short, long)]
    quiet: bool,
}

#[report]
fn main() -> Result<(), Whatever> {
    let cli = Cli::parse();

    let default_level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    info!("Converting {} to {}", cli.input.display(), cli.output.display());

    let stats = s98kit::convert_file(&cli.input, &cli.output).with_whatever_context(|_| {
        format!(
            "Failed to convert {} to {}",
            cli.input.display(),
            cli.output.display()
        )
    })?;

    if stats.register_writes == 0 {
        warn!("No supported chip commands found in VGM file");
    }
    if stats.dropped_writes > 0 {
        warn!(
            "{} register writes had no S98 device and were dropped",
            stats.dropped_writes
        );
    }
    if stats.data_blocks + stats.pcm_seeks + stats.unknown_commands > 0 {
        info!(
            "Skipped {} data blocks, {} PCM seeks and {} unknown commands",
            stats.data_blocks, stats.pcm_seeks, stats.unknown_commands
        );
    }
    Ok(())
}
