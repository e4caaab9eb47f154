//! Mark-as-processed. Runs only after every earlier phase succeeded.

use tracing::info;

use regsync_core::{audit::ProcessedCounts, store::RegistryStore};

use super::{Phase, RunContext, WorkSet, hierarchy::HierarchyOutput, identity::IdentityOutput};
use crate::{Error, Result};

pub async fn run<S: RegistryStore>(
  ctx: &RunContext<'_, S>,
  work: &WorkSet,
  identities: &IdentityOutput,
  hierarchy: &HierarchyOutput,
) -> Result<ProcessedCounts> {
  let counts = if ctx.preview {
    // What this run staged; pending individual and parent entries from an
    // unfinished run are not counted.
    ProcessedCounts {
      changes:            work.changes.len() as u64,
      individual_changes: identities.changes.len() as u64,
      parent_changes:     hierarchy.changes.len() as u64,
    }
  } else {
    ctx
      .store
      .mark_processed()
      .await
      .map_err(Error::store(Phase::MarkProcessed))?
  };

  info!(
    run_id = %ctx.run_id,
    preview = ctx.preview,
    changes = counts.changes,
    individual_changes = counts.individual_changes,
    parent_changes = counts.parent_changes,
    "marked changes processed"
  );
  Ok(counts)
}
