//! `regsync` — incremental change detection and entity resolution for a
//! provider registry.
//!
//! # Usage
//!
//! ```
//! regsync load npidata.csv        # replace the stored snapshot
//! regsync run --preview           # show what a run would write
//! regsync run                     # apply it
//! regsync runs --limit 5
//! regsync errors --id 1234567890
//! regsync verify
//! ```

mod config;
mod snapshot_csv;

use std::path::PathBuf;

use anyhow::{Context as _, bail};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::EnvFilter;

use regsync_core::{
  audit::{ProcessedCounts, ProcessingRun, RunId, RunStats},
  store::RegistryStore,
};
use regsync_pipeline::{Pipeline, PipelineOptions, RunReport};
use regsync_store_sqlite::SqliteStore;

use crate::config::Settings;

// ─── CLI args ─────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "regsync", version, about = "Registry change detection and entity resolution")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "regsync.toml")]
  config: PathBuf,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Replace the stored snapshot with the rows of a registry CSV.
  Load {
    /// Dissemination-format CSV with a header row.
    csv: PathBuf,
  },
  /// Run the pipeline against the stored snapshot.
  Run {
    /// Execute every phase without writing anything.
    #[arg(long)]
    preview: bool,
    /// Source description recorded on the run.
    #[arg(long)]
    source:  Option<String>,
    /// Print the full report, including every change, instead of a summary.
    #[arg(long)]
    full:    bool,
  },
  /// List recent processing runs, newest first.
  Runs {
    #[arg(short, long, default_value_t = 10)]
    limit: usize,
  },
  /// List resolution errors.
  Errors {
    /// Only the errors of this identifier.
    #[arg(long)]
    id: Option<String>,
  },
  /// Check link integrity; exits non-zero on any violation.
  Verify,
}

/// The counts of a [`RunReport`], without the per-record lists.
#[derive(Serialize)]
struct RunSummary {
  run_id:               RunId,
  preview:              bool,
  snapshot_rows:        usize,
  source_digest:        String,
  stats:                RunStats,
  carried_over:         usize,
  entities_upserted:    usize,
  individuals_created:  usize,
  individual_links:     usize,
  authorized_officials: usize,
  individual_changes:   usize,
  parent_changes:       usize,
  resolution_errors:    usize,
  processed:            ProcessedCounts,
  run:                  Option<ProcessingRun>,
}

impl From<RunReport> for RunSummary {
  fn from(report: RunReport) -> Self {
    Self {
      run_id:               report.run_id,
      preview:              report.preview,
      snapshot_rows:        report.snapshot_rows,
      source_digest:        report.source_digest,
      stats:                report.stats,
      carried_over:         report.carried_over,
      entities_upserted:    report.entities_upserted,
      individuals_created:  report.individuals_created,
      individual_links:     report.individual_links,
      authorized_officials: report.authorized_officials,
      individual_changes:   report.individual_changes.len(),
      parent_changes:       report.parent_changes.len(),
      resolution_errors:    report.resolution_errors.len(),
      processed:            report.processed,
      run:                  report.run,
    }
  }
}

// ─── Entry point ──────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .with_writer(std::io::stderr)
    .init();

  let cli = Cli::parse();
  let settings = Settings::load(&cli.config)?;

  if let Some(dir) = settings.store_path.parent()
    && !dir.as_os_str().is_empty()
  {
    std::fs::create_dir_all(dir)
      .with_context(|| format!("failed to create {}", dir.display()))?;
  }
  let store = SqliteStore::open(&settings.store_path)
    .await
    .with_context(|| format!("failed to open store at {:?}", settings.store_path))?;

  match cli.command {
    Command::Load { csv } => {
      let records = snapshot_csv::read_path(&csv)?;
      let rows = store
        .replace_snapshot(records)
        .await
        .context("failed to store snapshot")?;
      info!(rows, path = %csv.display(), "snapshot loaded");
    }
    Command::Run { preview, source, full } => {
      let pipeline = Pipeline::new(store);
      let report = pipeline
        .run(PipelineOptions {
          source: source.unwrap_or(settings.source),
          preview,
        })
        .await
        .context("pipeline run failed")?;
      if full {
        print_json(&report)?;
      } else {
        print_json(&RunSummary::from(report))?;
      }
    }
    Command::Runs { limit } => {
      let runs = store.list_runs(limit).await.context("failed to list runs")?;
      print_json(&runs)?;
    }
    Command::Errors { id } => {
      let errors = store
        .resolution_errors(id.map(Into::into))
        .await
        .context("failed to list resolution errors")?;
      print_json(&errors)?;
    }
    Command::Verify => {
      let report = store
        .verify_integrity()
        .await
        .context("failed to verify integrity")?;
      print_json(&report)?;
      if !report.is_clean() {
        bail!("integrity violations found");
      }
    }
  }

  Ok(())
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(value).context("failed to encode output")?;
  println!("{json}");
  Ok(())
}
