use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use clustershred::ui::progress::ProgressBar;
use clustershred::{self as core, WipeOptions};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "clustershred")]
#[command(about = "Cluster-level secure file erasure for NTFS/FAT volumes")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose logging (equivalent to RUST_LOG=debug)
    #[arg(long, global = true)]
    debug: bool,

    /// Enable content-overwrite before unlink wherever the wipe falls back
    #[arg(long, global = true)]
    shred: bool,

    /// Display byte counts in IEC units (KiB/MiB) instead of SI (kB/MB)
    #[arg(long, global = true)]
    units_iec: bool,

    /// Load options from a specific config file instead of the platform default
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Wipe a single file at the cluster level and unlink it
    WipeFile {
        /// Path to the file
        path: PathBuf,

        /// Volume root used to open the raw volume device (e.g. "C:")
        #[arg(long)]
        drive: Option<String>,
    },

    /// Overwrite all free space in a directory's partition
    WipeFreeSpace {
        /// Directory whose partition should be filled
        dir: PathBuf,
    },

    /// Rename a file through two passes of random names, then unlink it
    WipeName { path: PathBuf },

    /// Portable content overwrite (no cluster-level access required)
    WipeContents {
        path: PathBuf,

        /// Leave the file at its original length instead of truncating to zero
        #[arg(long)]
        no_truncate: bool,
    },
}

fn init_logging(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn setup_signal_handlers() -> Result<()> {
    #[cfg(unix)]
    {
        use signal_hook::{consts::SIGINT, iterator::Signals};
        let mut signals = Signals::new([SIGINT])?;
        std::thread::spawn(move || {
            for sig in signals.forever() {
                if sig == SIGINT {
                    eprintln!("\ninterrupt received, finishing current block before exit...");
                    core::set_interrupted();
                }
            }
        });
    }
    Ok(())
}

fn load_options(cli: &Cli) -> Result<WipeOptions> {
    let mut opts = match &cli.config {
        Some(path) => WipeOptions::from_file(path).context("loading config file")?,
        None => WipeOptions::load().context("loading options store")?,
    };
    opts.shred |= cli.shred;
    opts.units_iec |= cli.units_iec;
    Ok(opts)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);
    setup_signal_handlers()?;
    let options = load_options(&cli)?;

    match cli.command {
        Commands::WipeFile { path, drive } => {
            let drive_root = drive.unwrap_or_else(|| default_drive_root(&path));
            let tmp_dir = path
                .parent()
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("."));
            let outcome = tokio::task::spawn_blocking(move || {
                let volume = core::engine::volume::platform_volume_io();
                core::file_wipe(volume.as_ref(), &drive_root, &path, &tmp_dir, None)
            })
            .await
            .context("wipe task panicked")??;
            println!(
                "wiped via {:?}, {} residual cluster(s) left allocated elsewhere",
                outcome.strategy, outcome.residue_clusters
            );
        }

        Commands::WipeFreeSpace { dir } => {
            let units_iec = options.units_iec;
            let outcome = tokio::task::spawn_blocking(move || {
                let mut bar = ProgressBar::new(40);
                core::wipe_path(&dir, |progress| {
                    bar.render(progress.done_fraction * 100.0, None, None);
                    if let Some(eta) = progress.eta_seconds {
                        eprintln!(" eta ~{eta}s");
                    }
                })
            })
            .await
            .context("free-space fill task panicked")??;
            println!(
                "wrote {} of zeros to free space",
                core::fs_ops::bytes_to_human(outcome, units_iec)
            );
        }

        Commands::WipeName { path } => {
            let new_path = tokio::task::spawn_blocking(move || core::wipe_name(&path))
                .await
                .context("name-wipe task panicked")??;
            println!("removed as {}", new_path.display());
        }

        Commands::WipeContents { path, no_truncate } => {
            let truncate = !no_truncate;
            let written = tokio::task::spawn_blocking(move || core::wipe_contents(&path, truncate))
                .await
                .context("content-wipe task panicked")??;
            println!("overwrote {written} bytes");
        }
    }

    Ok(())
}

fn default_drive_root(path: &std::path::Path) -> String {
    path.components()
        .next()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .unwrap_or_else(|| "C:".to_string())
}
