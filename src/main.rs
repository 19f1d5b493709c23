//! # Synapse Upload CLI (`synapse-upload`)
//!
//! Uploads Synapse data files (behavior movies, SPIM images, crops, synapse
//! and nucleus lists) to the object store and records their URLs in the
//! catalog.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `synapse-upload upload <dir>` | Scan a directory, upload matching files, reconcile the catalog |
//! | `synapse-upload upload <dir> --dry-run` | Show which rule each file matches, without network calls |
//! | `synapse-upload rules` | List asset mappings in dispatch order |
//! | `synapse-upload servers` | List known Synapse deployments |
//! | `synapse-upload init` | Write the default configuration |
//!
//! ## Examples
//!
//! ```bash
//! # First use: write ~/.deriva/synapse/synapse-upload/config.toml
//! synapse-upload init
//!
//! # Check classification of a data directory
//! synapse-upload upload /data/fish42 --dry-run
//!
//! # Upload against staging with JSON progress on stderr
//! SYNAPSE_COOKIE="webauthn=..." synapse-upload --server synapse-staging.isrd.isi.edu \
//!     --progress json upload /data/fish42
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use synapse_upload::config;
use synapse_upload::logging;
use synapse_upload::mapping;
use synapse_upload::progress::ProgressMode;
use synapse_upload::servers;
use synapse_upload::upload;

/// Synapse data upload utility.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. Without it, `~/.deriva/synapse/synapse-upload/config.toml` is used
/// and created from the built-in default when missing.
#[derive(Parser)]
#[command(
    name = "synapse-upload",
    about = "Synapse data upload utility",
    version,
    long_about = "Matches data files against asset mapping rules, finds each file's accession \
    record in the Synapse catalog, uploads the bytes once to the object store, and binds the \
    resulting URL to the record. An accession already bound to a different URL is reported \
    as a conflict and never overwritten."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Server host to use instead of `[server].host`.
    #[arg(long, global = true)]
    server: Option<String>,

    /// Progress output on stderr: `off`, `human`, or `json`.
    ///
    /// Defaults to `human` when stderr is a terminal, `off` otherwise.
    #[arg(long, global = true, value_parser = parse_progress)]
    progress: Option<ProgressMode>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a data directory.
    ///
    /// Every file is matched against the asset mappings in order. Matching
    /// files are looked up in the catalog, uploaded, and their catalog
    /// record updated. Failures are reported per file; the command exits
    /// non-zero if any file failed.
    Upload {
        /// Path to the input directory.
        data_path: PathBuf,

        /// Only classify files; make no catalog or store calls.
        #[arg(long)]
        dry_run: bool,
    },

    /// List the configured asset mappings in dispatch order.
    Rules,

    /// List known Synapse servers.
    Servers,

    /// Write the built-in default configuration to the config path.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

fn parse_progress(s: &str) -> Result<ProgressMode, String> {
    ProgressMode::parse(s)
        .ok_or_else(|| format!("invalid progress mode '{}': expected off, human, or json", s))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init_tracing();

    let config_path = cli.config.unwrap_or_else(config::default_config_path);

    // Commands that don't require config
    if let Commands::Init { force } = cli.command {
        config::write_default_config(&config_path, force)?;
        println!("Wrote default configuration to {}", config_path.display());
        return Ok(());
    }

    let mut cfg = config::load_or_create_config(&config_path)?;
    if let Some(host) = &cli.server {
        servers::apply_server_override(&mut cfg, host);
    }

    match cli.command {
        Commands::Upload { data_path, dry_run } => {
            let data_path = std::fs::canonicalize(&data_path)
                .with_context(|| format!("Input directory not found: {}", data_path.display()))?;
            let mode = cli.progress.unwrap_or_else(ProgressMode::default_for_tty);
            let reporter = mode.reporter();
            upload::run_upload(&cfg, &data_path, dry_run, reporter.as_ref()).await?;
        }
        Commands::Rules => {
            mapping::list_rules(&cfg)?;
        }
        Commands::Servers => {
            servers::list_servers(&cfg);
        }
        Commands::Init { .. } => {
            // Handled above (before config loading)
            unreachable!()
        }
    }

    Ok(())
}
