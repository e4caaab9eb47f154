//! The incremental change-detection and entity-resolution pipeline.
//!
//! A [`Pipeline`] drives one run against any [`RegistryStore`]:
//!
//! 1. open a processing run,
//! 2. load the snapshot and target state into a per-run arena,
//! 3. detect changes,
//! 4. upsert entities,
//! 5. resolve individuals and their links,
//! 6. resolve organizational parents,
//! 7. replace resolution errors,
//! 8. mark the audit trail processed,
//! 9. finalize the run.
//!
//! Any error after the run opens marks it FAILED and leaves its change-log
//! entries unprocessed, so the next run picks them up again.

pub mod arena;
pub mod error;
pub mod phases;

pub use error::{Error, Result};
pub use phases::Phase;

use serde::Serialize;
use tracing::error;

use regsync_core::{
  audit::{
    ChangeLogEntry, ErrorRecord, NewIndividualChange, NewParentChange, ProcessedCounts,
    ProcessingRun, RunId, RunStats,
  },
  store::RegistryStore,
};

use phases::{
  RunContext, audit, detect, entities, errors, hierarchy, identity, run_tracker, snapshot,
};

// ─── Options & report ────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct PipelineOptions {
  /// Recorded on the run row.
  pub source:  String,
  /// Run every phase against the arena only; write nothing.
  pub preview: bool,
}

/// What one run did (or, in preview, would have done).
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
  pub run_id:               RunId,
  pub preview:              bool,
  pub snapshot_rows:        usize,
  pub source_digest:        String,
  /// Changes this run classified itself.
  pub stats:                RunStats,
  pub carried_over:         usize,
  /// Every change applied: this run's plus those carried over.
  pub changes:              Vec<ChangeLogEntry>,
  pub entities_upserted:    usize,
  pub individuals_created:  usize,
  pub individual_links:     usize,
  pub authorized_officials: usize,
  pub individual_changes:   Vec<NewIndividualChange>,
  pub parent_changes:       Vec<NewParentChange>,
  pub resolution_errors:    Vec<ErrorRecord>,
  pub processed:            ProcessedCounts,
  /// The finalized run row; `None` in preview.
  pub run:                  Option<ProcessingRun>,
}

// ─── Pipeline ────────────────────────────────────────────────────────────────

/// Runs the phases in order against one store. Concurrent runs against the
/// same store are not supported; callers serialize invocations.
pub struct Pipeline<S> {
  store: S,
}

impl<S: RegistryStore> Pipeline<S> {
  pub fn new(store: S) -> Self { Self { store } }

  pub fn store(&self) -> &S { &self.store }

  pub async fn run(&self, options: PipelineOptions) -> Result<RunReport> {
    let mut ctx = run_tracker::open(&self.store, &options.source, options.preview).await?;

    match execute(&mut ctx).await {
      Ok(report) => Ok(report),
      Err(err) => {
        error!(run_id = %ctx.run_id, phase = %err.phase(), error = %err, "run failed");
        if !ctx.preview
          && let Err(fail_err) = run_tracker::fail(&ctx, &err).await
        {
          error!(run_id = %ctx.run_id, error = %fail_err, "could not mark run FAILED");
        }
        Err(err)
      }
    }
  }
}

async fn execute<S: RegistryStore>(ctx: &mut RunContext<'_, S>) -> Result<RunReport> {
  let loaded = snapshot::run(ctx).await?;
  let work = detect::run(ctx).await?;
  let entities_upserted = entities::run(ctx, &work).await?;
  let identities = identity::run(ctx, &work).await?;
  let hierarchy = hierarchy::run(ctx, &work).await?;
  errors::run(ctx, &hierarchy).await?;
  let processed = audit::run(ctx, &work, &identities, &hierarchy).await?;
  let run = run_tracker::finalize(ctx, &loaded, &work).await?;

  Ok(RunReport {
    run_id: ctx.run_id,
    preview: ctx.preview,
    snapshot_rows: loaded.rows,
    source_digest: loaded.digest,
    stats: work.stats,
    carried_over: work.carried_over,
    changes: work.changes.into_values().collect(),
    entities_upserted,
    individuals_created: identities.individuals_created,
    individual_links: identities.individual_links,
    authorized_officials: identities.authorized_officials,
    individual_changes: identities.changes,
    parent_changes: hierarchy.changes,
    resolution_errors: hierarchy.errors,
    processed,
    run,
  })
}
