//! autopack-cli - Command-line interface for the autopack streaming archiver
//!
//! Packs a directory into a tar/tar.gz stream on a file or stdout, and
//! unpacks a stream from a file or stdin into a directory with format
//! auto-detection.

use anyhow::{Context, Result};
use autopack::{Behavior, Config, Packer, StreamOptions, Unpacker};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

/// autopack - Stream directories into archives and back
#[derive(Parser)]
#[command(name = "autopack")]
#[command(author, version, about = "Stream directories into tar/tar.gz archives and back", long_about = None)]
struct Cli {
    /// Enable verbose output for debugging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Configuration file (defaults to the user config directory)
    #[arg(long, global = true, env = "AUTOPACK_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pack a directory into an archive stream
    Pack {
        /// Directory to pack
        source: PathBuf,

        /// Output archive file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Archive format (auto, tar, tar.gz)
        #[arg(short, long)]
        format: Option<String>,

        /// Show progress bar while packing
        #[arg(long)]
        progress: bool,
    },

    /// Unpack an archive stream into a directory
    Unpack {
        /// Destination directory
        dest: PathBuf,

        /// Input archive file (stdin when omitted)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Archive format (auto, tar, tar.gz)
        #[arg(short, long)]
        format: Option<String>,
    },
}

fn setup_logging(verbose: bool, quiet: bool) {
    if quiet {
        return;
    }

    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(verbose)
        .with_writer(io::stderr)
        .init();
}

fn main() {
    let result = run();

    match result {
        Ok(_) => process::exit(0),
        Err(e) => {
            error!("Error: {:#}", e);
            process::exit(map_error_to_exit_code(&e));
        }
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    debug!(?config, "Loaded configuration");
    let options = StreamOptions::from(&config);

    match cli.command {
        Commands::Pack {
            source,
            output,
            format,
            progress,
        } => {
            let behavior = match format {
                Some(name) => autopack::resolve_behavior_name(&name)?,
                None => config.pack_behavior()?,
            };
            info!("Packing {:?} as {}", source, behavior);

            let packer = Packer::with_options(&source, behavior, options);
            match output {
                Some(path) => {
                    let file = File::create(&path)
                        .with_context(|| format!("creating {}", path.display()))?;
                    pack_into(packer, file, options.chunk_size, progress)?;
                }
                None => pack_into(packer, io::stdout().lock(), options.chunk_size, progress)?,
            }
            info!("Packing complete");
        }

        Commands::Unpack {
            dest,
            input,
            format,
        } => {
            let behavior = match format {
                Some(name) => autopack::resolve_behavior_name(&name)?,
                None => config.unpack_behavior()?,
            };
            info!("Unpacking into {:?}", dest);
            std::fs::create_dir_all(&dest)
                .with_context(|| format!("creating {}", dest.display()))?;

            let unpacker = Unpacker::with_options(&dest, behavior, options);
            let detected = match input {
                Some(path) => {
                    let file = File::open(&path)
                        .with_context(|| format!("opening {}", path.display()))?;
                    unpack_from(unpacker, file)?
                }
                None => unpack_from(unpacker, io::stdin().lock())?,
            };
            info!("Unpacking complete ({})", detected);
        }
    }

    Ok(())
}

/// Copy the packer into `out`, drawing a byte bar when requested
fn pack_into(mut packer: Packer, mut out: impl Write, chunk_size: usize, progress: bool) -> Result<()> {
    let bar = progress.then(|| {
        let bar = ProgressBar::new(packer.size());
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec})")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        bar
    });

    let mut buf = vec![0u8; chunk_size.max(512)];
    let copied = loop {
        let n = match packer.read(&mut buf) {
            Ok(0) => break Ok(()),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => break Err(lift(e)),
        };
        if let Err(e) = out.write_all(&buf[..n]) {
            break Err(anyhow::Error::new(e).context("writing archive output"));
        }
        if let Some(bar) = &bar {
            bar.set_length(packer.size());
            bar.set_position(packer.bytes_complete());
        }
    };

    if let Some(bar) = &bar {
        bar.finish_and_clear();
    }
    let closed = packer.close();
    copied?;
    closed?;
    out.flush().context("flushing archive output")?;
    Ok(())
}

/// Copy `input` into the unpacker and close it; returns the detected format
fn unpack_from(mut unpacker: Unpacker, mut input: impl Read) -> Result<Behavior> {
    let copied = io::copy(&mut input, &mut unpacker).map_err(lift);
    let closed = unpacker.close();
    copied?;
    closed?;
    Ok(unpacker.behavior())
}

/// Surface an autopack error carried inside an `io::Error` as itself
fn lift(err: io::Error) -> anyhow::Error {
    match autopack::Error::from_io(&err) {
        Some(inner) => anyhow::Error::new(inner.clone()),
        None => anyhow::Error::new(err),
    }
}

fn map_error_to_exit_code(err: &anyhow::Error) -> i32 {
    if let Some(autopack_err) = err.downcast_ref::<autopack::Error>() {
        match autopack_err {
            autopack::Error::Io { .. } => 2,
            autopack::Error::UnknownFormat(_) | autopack::Error::Config(_) => 3,
            autopack::Error::UnableToDetect
            | autopack::Error::NotImplemented(_)
            | autopack::Error::UnsupportedPlatform(_) => 3,
            autopack::Error::PathTraversal { .. } => 4,
            autopack::Error::Incomplete(_) => 4,
            autopack::Error::NotInitialized(_)
            | autopack::Error::StreamInvariant(_)
            | autopack::Error::Closed => 1,
        }
    } else if err.is::<io::Error>() {
        2
    } else {
        1
    }
}
