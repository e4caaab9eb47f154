//! Error reporting: replace the resolution errors of every touched
//! organization with this run's findings.

use tracing::{info, warn};

use regsync_core::store::RegistryStore;

use super::{Phase, RunContext, hierarchy::HierarchyOutput};
use crate::{Error, Result};

pub async fn run<S: RegistryStore>(
  ctx: &RunContext<'_, S>,
  hierarchy: &HierarchyOutput,
) -> Result<usize> {
  for error in &hierarchy.errors {
    warn!(registry_id = %error.registry_id, kind = %error.kind, "{}", error.reason);
  }

  if !ctx.preview && !hierarchy.touched.is_empty() {
    ctx
      .store
      .replace_resolution_errors(hierarchy.touched.clone(), hierarchy.errors.clone())
      .await
      .map_err(Error::store(Phase::ReportErrors))?;
  }

  info!(
    run_id = %ctx.run_id,
    preview = ctx.preview,
    touched = hierarchy.touched.len(),
    errors = hierarchy.errors.len(),
    "reported resolution errors"
  );
  Ok(hierarchy.errors.len())
}
