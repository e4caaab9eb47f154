//! Identity resolution: dedupe person-name payloads into canonical
//! individuals and point the entity links at them.

use serde::Serialize;
use tracing::{debug, info, warn};

use regsync_core::{
  audit::NewIndividualChange,
  entity::{Individual, IndividualId},
  identity::{
    IdentityApplied, IdentityAssignment, IdentityBatch, IdentityMatch, IndividualIndex,
    resolve_individual, subject_name_drift,
  },
  source::PersonRole,
  store::RegistryStore,
};

use super::{Phase, RunContext, WorkSet};
use crate::{Error, Result};

#[derive(Debug, Clone, Default, Serialize)]
pub struct IdentityOutput {
  pub individuals_created:  usize,
  pub individual_links:     usize,
  pub authorized_officials: usize,
  pub changes:              Vec<NewIndividualChange>,
}

pub async fn run<S: RegistryStore>(
  ctx: &mut RunContext<'_, S>,
  work: &WorkSet,
) -> Result<IdentityOutput> {
  let mut batch = IdentityBatch::default();

  for record in &work.records {
    let Some(registry_id) = &record.registry_id else { continue };
    if !ctx.arena.entities.contains_key(registry_id) {
      continue;
    }

    let Some((role, name)) = record.person() else {
      // An organization without an official loses any stale one.
      if record.is_organization() {
        batch.vacated_officials.push(registry_id.clone());
      }
      continue;
    };

    let mut assignment =
      IdentityAssignment::for_record(registry_id.clone(), role, name.key(), record);
    match resolve_individual(&assignment.key, &ctx.arena.individuals) {
      IdentityMatch::Existing(id) => {
        debug!(registry_id = %registry_id, individual_id = %id, "reused individual");
      }
      IdentityMatch::Missing => assignment.created = true,
    }

    if role == PersonRole::Subject {
      let prior = ctx
        .arena
        .individual_links
        .get(registry_id)
        .and_then(|link| ctx.arena.individuals.get_by_id(link.individual_id));
      assignment.renamed_from = subject_name_drift(prior, &assignment.key);
      if assignment.renamed_from.is_some() {
        debug!(registry_id = %registry_id, "subject name changed");
      }
    }
    batch.assignments.push(assignment);
  }

  let applied = if ctx.preview {
    stage(&batch, &ctx.arena.individuals)
  } else if batch.is_empty() {
    IdentityApplied::default()
  } else {
    ctx
      .store
      .apply_identities(ctx.run_id, batch.clone())
      .await
      .map_err(Error::store(Phase::ResolveIdentities))?
  };

  for individual in applied.individuals {
    ctx.arena.individuals.insert(individual);
  }

  let mut output = IdentityOutput {
    individuals_created: applied.created,
    changes: applied.changes,
    ..Default::default()
  };
  for assignment in &batch.assignments {
    let Some(individual_id) = ctx
      .arena
      .individuals
      .get(&assignment.key)
      .map(|i| i.individual_id)
    else {
      warn!(registry_id = %assignment.registry_id, "name key did not resolve after insert");
      continue;
    };
    match assignment.link(individual_id) {
      Some(link) => {
        ctx.arena.link_individual(link);
        output.individual_links += 1;
      }
      None => {
        ctx
          .arena
          .set_authorized_official(&assignment.registry_id, Some(individual_id));
        output.authorized_officials += 1;
      }
    }
  }
  for registry_id in &batch.vacated_officials {
    ctx.arena.set_authorized_official(registry_id, None);
    output.authorized_officials += 1;
  }

  info!(
    run_id = %ctx.run_id,
    preview = ctx.preview,
    created = output.individuals_created,
    individual_links = output.individual_links,
    authorized_officials = output.authorized_officials,
    "resolved identities"
  );
  Ok(output)
}

/// What the store would write for `batch`, with provisional ids above every
/// known individual standing in for the ones it would create.
fn stage(batch: &IdentityBatch, index: &IndividualIndex) -> IdentityApplied {
  let mut next = index.next_provisional_id().0;
  let mut applied = IdentityApplied::default();

  for key in batch.keys() {
    let individual = match index.get(&key) {
      Some(found) => found.clone(),
      None => {
        let staged = Individual::from_key(IndividualId(next), &key);
        next += 1;
        applied.created += 1;
        staged
      }
    };
    applied.individuals.push(individual);
  }
  applied.changes = batch.changes(&applied.individuals);
  applied
}
