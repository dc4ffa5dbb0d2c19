use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use vmax::extract::{ExtractOptions, Extractor};
use vmax::writeback::DEFAULT_MAX_IN_FLIGHT;
use vmax::ArchiveInfo;

#[derive(Parser)]
#[command(name = "vmax", about = "Extract disk images and configs from VMA backup archives")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconstruct every device image and config file into a directory
    Extract {
        input:       PathBuf,
        destination: PathBuf,
        /// Extract into an existing destination directory
        #[arg(short, long)]
        force: bool,
        /// Skip MD5 validation of the header and extents
        #[arg(long)]
        skip_hash: bool,
        /// Writer threads (default: number of CPUs)
        #[arg(short, long)]
        jobs: Option<usize>,
        /// Clusters buffered for writing before reading pauses
        #[arg(long, default_value_t = DEFAULT_MAX_IN_FLIGHT)]
        max_in_flight: usize,
        /// Do not draw a progress bar
        #[arg(short, long)]
        quiet: bool,
    },
    /// Show archive header metadata
    Info {
        input: PathBuf,
        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
        #[arg(long)]
        skip_hash: bool,
    },
    /// Check every extent's identity and checksum without writing anything
    Verify {
        input: PathBuf,
        #[arg(short, long)]
        quiet: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {

        // ── Extract ──────────────────────────────────────────────────────────
        Commands::Extract { input, destination, force, skip_hash, jobs, max_in_flight, quiet } => {
            let opts = ExtractOptions {
                verify_checksums: !skip_hash,
                overwrite:        force,
                workers:          jobs,
                max_in_flight,
            };
            let mut ex = Extractor::open(&input, opts)?;
            let pb = progress_bar(ex.archive_len(), quiet, "Extracting");
            let mut report = |done: u64, _total: u64| pb.set_position(done);
            let stats = ex.extract_to(&destination, Some(&mut report));
            pb.finish_and_clear();
            let stats = stats?;
            println!(
                "Extracted {} clusters ({} zero) from {} extents into {}",
                stats.clusters, stats.zero_clusters, stats.extents, destination.display()
            );
        }

        // ── Info ─────────────────────────────────────────────────────────────
        Commands::Info { input, json, skip_hash } => {
            let opts = ExtractOptions { verify_checksums: !skip_hash, ..Default::default() };
            let ex   = Extractor::open(&input, opts)?;
            let info = ArchiveInfo::from_header(ex.header())?;

            if json {
                println!("{}", serde_json::to_string_pretty(&info)?);
                return Ok(());
            }

            println!("── VMA Archive ──────────────────────────────────────────");
            println!("  Path           {}", input.display());
            println!("  UUID           {}", info.uuid);
            println!("  Created        {}", info.created
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "unknown".into()));
            println!("  Checksum       {}", info.checksum);
            println!("  Header size    {} B", info.header_size);
            println!("  Archive size   {} B", ex.archive_len());
            println!("  Devices ({}, {} B total):", info.devices.len(), info.total_device_bytes());
            for dev in &info.devices {
                println!("    {:>3}  {:<24} {:>16}", dev.id, dev.name, dev.size);
            }
            println!("  Configs ({}):", info.configs.len());
            for cfg in &info.configs {
                println!("         {:<24} {:>16}", cfg.name, cfg.bytes);
            }
        }

        // ── Verify ───────────────────────────────────────────────────────────
        Commands::Verify { input, quiet } => {
            let mut ex = Extractor::open(&input, ExtractOptions::default())?;
            let pb = progress_bar(ex.archive_len(), quiet, "Verifying");
            let mut report = |done: u64, _total: u64| pb.set_position(done);
            let stats = ex.verify(Some(&mut report));
            pb.finish_and_clear();
            let stats = stats?;
            println!(
                "OK: {} extents, {} clusters ({} zero), {} B checked",
                stats.extents, stats.clusters, stats.zero_clusters, stats.bytes_read
            );
        }
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn progress_bar(total: u64, quiet: bool, message: &'static str) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(total);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
    {
        pb.set_style(style.progress_chars("=> "));
    }
    pb.set_message(message);
    pb
}
