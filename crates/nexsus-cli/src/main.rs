//! Nexsus CLI
//!
//! Command-line front-end for the semantic-data gateway:
//! - `sync model|schema|knowledge`: mirror ERP data into the store
//! - `validate-fk`: FK integrity reports (optionally written to edges)
//! - `fix-orphans`: targeted resync of missing FK targets
//! - `cleanup`: drop data points the source no longer has
//! - `status` / `dlq`: operational visibility
//!
//! Exit codes: 0 success, 1 fatal error, 2 usage/config error.

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::process::ExitCode;

use nexsus_core::error::NexsusError;
use nexsus_core::NexsusConfig;

mod app;
mod commands;

#[derive(Parser)]
#[command(name = "nexsus")]
#[command(
    author,
    version,
    about = "Nexsus: semantic-data gateway mirroring an ERP into one vector collection"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mirror data, schema, or knowledge into the store.
    Sync {
        #[command(subcommand)]
        command: SyncCommands,
    },

    /// Validate FK integrity without syncing.
    ValidateFk {
        /// Restrict to one source model (default: all known models).
        #[arg(long)]
        model: Option<String>,
        /// Run orphan repair for whatever the validation finds.
        #[arg(long)]
        auto_sync: bool,
        /// Write orphan counts and integrity scores onto graph edges.
        #[arg(long)]
        store_orphans: bool,
        /// Keep a bounded history of validation snapshots per edge.
        #[arg(long)]
        track_history: bool,
        /// Also validate the FK target models of the selected model.
        #[arg(long)]
        bidirectional: bool,
    },

    /// Resync FK targets that are referenced but missing.
    FixOrphans {
        /// Source model to scan; omit with --all to scan everything.
        model: Option<String>,
        /// Scan every known model.
        #[arg(long)]
        all: bool,
        /// Per-model cap on targeted resync size.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Remove data points whose records no longer exist in the source.
    Cleanup {
        model: String,
        /// Report what would be deleted without deleting.
        #[arg(long)]
        dry_run: bool,
    },

    /// Store, breaker, DLQ, and watermark overview.
    Status,

    /// Inspect or clear the dead-letter queue.
    Dlq {
        #[command(subcommand)]
        command: DlqCommands,
    },
}

#[derive(Subcommand)]
enum SyncCommands {
    /// Sync one model (cascading through FK references by default).
    Model {
        name: String,
        /// Only records written on/after this date (YYYY-MM-DD).
        #[arg(long)]
        date_from: Option<String>,
        /// Only records written on/before this date (YYYY-MM-DD).
        #[arg(long)]
        date_to: Option<String>,
        /// Do not follow FK references into other models.
        #[arg(long)]
        no_cascade: bool,
        /// Drop this model's data points before syncing.
        #[arg(long)]
        force: bool,
        /// Count and report without writing anything.
        #[arg(long)]
        dry_run: bool,
    },

    /// Sync schema metadata (the registry's source of truth).
    Schema {
        /// Where to read schema from.
        #[arg(long, value_parser = ["odoo", "excel"], default_value = "odoo")]
        source: String,
        /// Export file for `--source excel`.
        #[arg(long)]
        file: Option<PathBuf>,
        /// Drop all schema points first.
        #[arg(long)]
        force: bool,
    },

    /// Index instance/model/field knowledge documents.
    Knowledge {
        /// Knowledge catalog JSON file.
        #[arg(long, default_value = "data/knowledge.json")]
        catalog: PathBuf,
        /// Drop existing knowledge points first.
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand)]
enum DlqCommands {
    /// List queued failures with per-model and per-stage counts.
    Show,
    /// Drop entries, optionally scoped to one model.
    Clear {
        #[arg(long)]
        model: Option<String>,
    },
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let config = match NexsusConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{} {err}", "configuration error:".red().bold());
            return ExitCode::from(2);
        }
    };

    match dispatch(cli, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:#}", "error:".red().bold());
            let code: u8 = match err.downcast_ref::<NexsusError>() {
                Some(NexsusError::Config(_))
                | Some(NexsusError::ModelNotFound(_))
                | Some(NexsusError::FieldNotFound { .. }) => 2,
                _ => 1,
            };
            ExitCode::from(code)
        }
    }
}

async fn dispatch(cli: Cli, config: NexsusConfig) -> Result<()> {
    match cli.command {
        Commands::Sync { command } => match command {
            SyncCommands::Model {
                name,
                date_from,
                date_to,
                no_cascade,
                force,
                dry_run,
            } => {
                commands::sync_model(
                    &config,
                    commands::SyncModelArgs {
                        model: name,
                        date_from,
                        date_to,
                        no_cascade,
                        force,
                        dry_run,
                    },
                )
                .await
            }
            SyncCommands::Schema { source, file, force } => {
                commands::sync_schema(&config, &source, file.as_deref(), force).await
            }
            SyncCommands::Knowledge { catalog, force } => {
                commands::sync_knowledge(&config, &catalog, force).await
            }
        },
        Commands::ValidateFk {
            model,
            auto_sync,
            store_orphans,
            track_history,
            bidirectional,
        } => {
            commands::validate_fk(
                &config,
                commands::ValidateArgs {
                    model,
                    auto_sync,
                    store_orphans,
                    track_history,
                    bidirectional,
                },
            )
            .await
        }
        Commands::FixOrphans { model, all, limit } => {
            if model.is_none() && !all {
                anyhow::bail!(NexsusError::Config(
                    "fix-orphans needs a model name or --all".into()
                ));
            }
            commands::fix_orphans(&config, model.as_deref(), limit).await
        }
        Commands::Cleanup { model, dry_run } => commands::cleanup(&config, &model, dry_run).await,
        Commands::Status => commands::status(&config).await,
        Commands::Dlq { command } => match command {
            DlqCommands::Show => commands::dlq_show(&config),
            DlqCommands::Clear { model } => commands::dlq_clear(&config, model.as_deref()),
        },
    }
}
