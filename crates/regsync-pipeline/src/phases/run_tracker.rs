//! Run lifecycle: open, finalize, fail.

use tracing::{info, warn};

use regsync_core::{
  audit::{ProcessingRun, RunCompletion, RunId},
  store::RegistryStore,
};

use super::{Phase, RunContext, WorkSet, snapshot::LoadedSnapshot};
use crate::{Error, Result};

/// Open a run. A preview run never writes a run row and stamps its staged
/// entries with [`RunId::PREVIEW`].
pub async fn open<'a, S: RegistryStore>(
  store: &'a S,
  source: &str,
  preview: bool,
) -> Result<RunContext<'a, S>> {
  if preview {
    info!(source, "opening preview run");
    return Ok(RunContext::new(store, RunId::PREVIEW, true));
  }

  let stale = store.current_run().await.map_err(Error::store(Phase::OpenRun))?;
  if let Some(stale) = stale {
    warn!(
      run_id = %stale.run_id,
      started_at = %stale.started_at,
      "previous run never finished; marking it FAILED"
    );
  }

  let run = store
    .start_run(source.to_owned())
    .await
    .map_err(Error::store(Phase::OpenRun))?;
  info!(run_id = %run.run_id, source, "opened run");
  Ok(RunContext::new(store, run.run_id, false))
}

/// Transition the run to COMPLETED with its aggregate counts.
pub async fn finalize<S: RegistryStore>(
  ctx: &RunContext<'_, S>,
  snapshot: &LoadedSnapshot,
  work: &WorkSet,
) -> Result<Option<ProcessingRun>> {
  if ctx.preview {
    return Ok(None);
  }

  let notes = (work.skipped_missing_id > 0).then(|| {
    format!(
      "{} source rows skipped: missing identifier",
      work.skipped_missing_id
    )
  });
  let run = ctx
    .store
    .complete_run(ctx.run_id, RunCompletion {
      skipped_missing_id: work.skipped_missing_id,
      source_digest:      Some(snapshot.digest.clone()),
      notes,
    })
    .await
    .map_err(Error::store(Phase::FinalizeRun))?;

  info!(
    run_id = %run.run_id,
    total = run.stats.total_classified,
    new = run.stats.new,
    updated = run.stats.updated,
    deactivated = run.stats.deactivated,
    reactivated = run.stats.reactivated,
    "run completed"
  );
  Ok(Some(run))
}

/// Transition the run to FAILED, noting the error (and its phase).
pub async fn fail<S: RegistryStore>(ctx: &RunContext<'_, S>, err: &Error) -> Result<()> {
  ctx
    .store
    .fail_run(ctx.run_id, err.to_string())
    .await
    .map_err(Error::store(Phase::FinalizeRun))?;
  Ok(())
}
