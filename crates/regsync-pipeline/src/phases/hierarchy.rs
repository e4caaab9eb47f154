//! Hierarchy resolution for changed organization records.

use serde::Serialize;
use tracing::{debug, info};

use regsync_core::{
  audit::{ErrorRecord, NewParentChange},
  entity::RegistryId,
  hierarchy::{MatchCount, ParentResolution, classify_parent_change},
  store::RegistryStore,
};

use super::{Phase, RunContext, WorkSet};
use crate::{Error, Result};

#[derive(Debug, Clone, Default, Serialize)]
pub struct HierarchyOutput {
  /// Every changed organization; their prior resolution errors are replaced.
  pub touched:     Vec<RegistryId>,
  pub resolutions: Vec<ParentResolution>,
  pub changes:     Vec<NewParentChange>,
  pub errors:      Vec<ErrorRecord>,
}

pub async fn run<S: RegistryStore>(
  ctx: &mut RunContext<'_, S>,
  work: &WorkSet,
) -> Result<HierarchyOutput> {
  let mut output = HierarchyOutput::default();

  for record in &work.records {
    let Some(child_id) = &record.registry_id else { continue };
    if !record.is_organization() || !ctx.arena.entities.contains_key(child_id) {
      continue;
    }
    output.touched.push(child_id.clone());

    // An organization that is no longer a subpart naming a parent keeps no
    // parent link.
    let resolution = ParentResolution::for_record(record, &ctx.arena.candidates).map(
      |mut resolution| {
        // A parent link may only point at a stored entity.
        resolution.retain_candidates(|id| ctx.arena.entities.contains_key(id));
        resolution
      },
    );

    let new_parent = match &resolution {
      Some(resolution) => {
        debug!(
          registry_id = %child_id,
          declared_parent = %resolution.declared_parent,
          match_count = %resolution.match_count,
          "resolved parent"
        );
        match resolution.match_count {
          MatchCount::None => output.errors.push(ErrorRecord::no_parent(
            child_id.clone(),
            &resolution.declared_parent,
            ctx.run_id,
          )),
          MatchCount::Many => output.errors.push(ErrorRecord::multi_parent(
            child_id.clone(),
            &resolution.declared_parent,
            resolution.candidates.len(),
            ctx.run_id,
          )),
          MatchCount::One => {}
        }
        resolution.resolved_parent.clone()
      }
      None => None,
    };

    let old_parent = ctx.arena.parent_of(child_id).cloned();
    if let Some(change_type) = classify_parent_change(old_parent.as_ref(), new_parent.as_ref()) {
      output.changes.push(NewParentChange {
        child_id: child_id.clone(),
        old_parent_id: old_parent,
        new_parent_id: new_parent,
        change_type,
      });
    }
    output.resolutions.extend(resolution);
  }

  // The link and its log row land together, so a retry after a failure
  // re-derives the same changes.
  if !ctx.preview && !output.changes.is_empty() {
    ctx
      .store
      .apply_parent_changes(ctx.run_id, output.changes.clone())
      .await
      .map_err(Error::store(Phase::ResolveHierarchy))?;
  }
  for change in &output.changes {
    ctx.arena.set_parent(&change.child_id, change.new_parent_id.clone());
  }

  info!(
    run_id = %ctx.run_id,
    preview = ctx.preview,
    subparts = output.resolutions.len(),
    parent_changes = output.changes.len(),
    unresolved = output.errors.len(),
    "resolved hierarchy"
  );
  Ok(output)
}
