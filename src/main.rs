//! # snapsweep CLI
//!
//! ```bash
//! snapsweep --config ./config/snapsweep.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `snapsweep init` | Create the index database |
//! | `snapsweep index --dir DIR` | Scan, hash and embed new images |
//! | `snapsweep pairs --dir DIR` | List near-duplicate pairs |
//! | `snapsweep sweep --dir DIR` | Rank pairs and set aside the worse copy |
//! | `snapsweep stats` | Show index statistics |

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use snap_sweep::commands::{self, OutputFormat};
use snap_sweep::config::{self, Config};
use snap_sweep::pipeline::SweepOptions;
use snap_sweep::progress::ProgressMode;

const DEFAULT_CONFIG: &str = "./config/snapsweep.toml";

/// snapsweep: find near-duplicate images and set aside the worse copy.
///
/// Settings come from a TOML file (see `config/snapsweep.example.toml`);
/// flags override individual values.
#[derive(Parser)]
#[command(name = "snapsweep", version)]
struct Cli {
    /// Path to configuration file (TOML). Defaults to `./config/snapsweep.toml`
    /// when present, otherwise built-in defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug-level logging (overridden by RUST_LOG).
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Progress on stderr.
    #[arg(long, global = true, value_enum, default_value = "auto")]
    progress: ProgressMode,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the index database. Safe to run repeatedly.
    Init,

    /// Scan, hash and index a directory without mining.
    Index {
        #[arg(long)]
        dir: PathBuf,

        /// Only look at the top level of `--dir`.
        #[arg(long)]
        no_subdirs: bool,

        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// List valid near-duplicate pairs without scoring or moving anything.
    Pairs {
        #[arg(long)]
        dir: PathBuf,

        /// Maximum number of pairs.
        #[arg(long)]
        limit: Option<usize>,

        /// Candidates kept per image.
        #[arg(long)]
        top_k: Option<usize>,

        /// Minimum similarity in [0, 1], compared after rounding to two decimals.
        #[arg(long)]
        threshold: Option<f64>,

        #[arg(long)]
        no_subdirs: bool,

        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Find duplicates, rank each pair by quality, and set aside the losers.
    Sweep {
        #[arg(long)]
        dir: PathBuf,

        /// Maximum number of pairs.
        #[arg(long)]
        limit: Option<usize>,

        /// Candidates kept per image.
        #[arg(long)]
        top_k: Option<usize>,

        /// Minimum similarity in [0, 1], compared after rounding to two decimals.
        #[arg(long)]
        threshold: Option<f64>,

        /// Report what would be set aside without touching any file.
        #[arg(long)]
        dry_run: bool,

        /// Copy discarded files instead of moving them.
        #[arg(long)]
        copy: bool,

        #[arg(long)]
        no_subdirs: bool,

        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Show index statistics.
    Stats {
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

fn setup_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn load(path: Option<&Path>) -> anyhow::Result<Config> {
    match path {
        Some(path) => config::load_or_default(path, true),
        None => config::load_or_default(Path::new(DEFAULT_CONFIG), false),
    }
}

/// Apply mining flags, then re-check ranges.
fn override_mining(
    cfg: &mut Config,
    top_k: Option<usize>,
    threshold: Option<f64>,
    no_subdirs: bool,
) -> anyhow::Result<()> {
    if let Some(top_k) = top_k {
        cfg.mining.top_k = top_k;
    }
    if let Some(threshold) = threshold {
        cfg.mining.threshold = threshold;
    }
    if no_subdirs {
        cfg.scan.include_subdirs = false;
    }
    config::validate(cfg)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let started = Instant::now();
    let mut cfg = load(cli.config.as_deref())?;
    let progress = cli.progress.reporter();

    match cli.command {
        Commands::Init => commands::run_init(&cfg).await?,
        Commands::Stats { format } => commands::run_stats(&cfg, format).await?,
        Commands::Index {
            dir,
            no_subdirs,
            format,
        } => {
            override_mining(&mut cfg, None, None, no_subdirs)?;
            commands::run_index(&cfg, &dir, format, progress, started).await?;
        }
        Commands::Pairs {
            dir,
            limit,
            top_k,
            threshold,
            no_subdirs,
            format,
        } => {
            override_mining(&mut cfg, top_k, threshold, no_subdirs)?;
            commands::run_pairs(&cfg, &dir, limit, format, progress, started).await?;
        }
        Commands::Sweep {
            dir,
            limit,
            top_k,
            threshold,
            dry_run,
            copy,
            no_subdirs,
            format,
        } => {
            override_mining(&mut cfg, top_k, threshold, no_subdirs)?;
            if copy {
                cfg.relocate.mode = "copy".to_string();
            }
            let options = SweepOptions {
                dir,
                limit,
                dry_run,
            };
            commands::run_sweep(&cfg, &options, format, progress, started).await?;
        }
    }

    Ok(())
}
