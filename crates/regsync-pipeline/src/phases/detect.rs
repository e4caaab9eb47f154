//! Change detection: classify every snapshot row against the prior entity
//! state and log one change per classified identifier.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::Utc;
use tracing::{debug, info, warn};

use regsync_core::{
  audit::{ChangeDetails, ChangeLogEntry, NewChange, RunId, RunStats},
  classify::classify_change,
  entity::RegistryId,
  store::RegistryStore,
};

use super::{Phase, RunContext, WorkSet};
use crate::{Error, Result};

pub async fn run<S: RegistryStore>(ctx: &mut RunContext<'_, S>) -> Result<WorkSet> {
  let phase = Phase::DetectChanges;

  let pending = ctx
    .store
    .unprocessed_changes()
    .await
    .map_err(Error::store(phase))?;
  let pending_ids: HashSet<&RegistryId> = pending.iter().map(|c| &c.registry_id).collect();

  // Index of the first snapshot row per identifier.
  let mut first_row: HashMap<RegistryId, usize> = HashMap::new();
  let mut skipped_missing_id = 0_u64;
  let mut fresh = Vec::new();
  let mut placeholders = Vec::new();

  for (row, record) in ctx.arena.snapshot.iter().enumerate() {
    let Some(id) = &record.registry_id else {
      skipped_missing_id += 1;
      continue;
    };
    if first_row.contains_key(id) {
      warn!(registry_id = %id, row, "duplicate identifier in snapshot; keeping the first row");
      continue;
    }
    first_row.insert(id.clone(), row);

    // Already pending from an unfinished run; it will be re-applied as is.
    if pending_ids.contains(id) {
      continue;
    }

    let prior = ctx.arena.entities.get(id);
    let Some(change_type) = classify_change(record, prior) else {
      continue;
    };
    if record.entity_type().is_none() {
      placeholders.push(id.clone());
    }
    debug!(registry_id = %id, %change_type, "classified");
    fresh.push(NewChange {
      registry_id: id.clone(),
      change_type,
      old_last_update_date: prior.and_then(|p| p.last_update_date),
      new_last_update_date: record.last_update_date,
      details: ChangeDetails::from_source(record),
    });
  }

  if skipped_missing_id > 0 {
    warn!(
      run_id = %ctx.run_id,
      skipped = skipped_missing_id,
      "source rows without an identifier were skipped"
    );
  }

  // Placeholder rows never become entities, so they classify the same way
  // every run. Log one only when its payload moved since the last entry.
  if !placeholders.is_empty() {
    let latest = ctx
      .store
      .latest_change_details(placeholders)
      .await
      .map_err(Error::store(phase))?;
    fresh.retain(|c| latest.get(&c.registry_id) != Some(&c.details));
  }

  let mut stats = RunStats::default();
  for change in &fresh {
    stats.record(change.change_type);
  }

  let logged = if ctx.preview {
    stage(ctx.run_id, fresh)
  } else if fresh.is_empty() {
    Vec::new()
  } else {
    ctx
      .store
      .record_changes(ctx.run_id, fresh)
      .await
      .map_err(Error::store(phase))?
  };

  let carried_over = pending.len();
  let mut changes = BTreeMap::new();
  for entry in pending.into_iter().chain(logged) {
    changes.insert(entry.registry_id.clone(), entry);
  }

  let mut records = Vec::with_capacity(changes.len());
  for id in changes.keys() {
    match first_row.get(id) {
      Some(&row) => records.push(ctx.arena.snapshot[row].clone()),
      None => debug!(registry_id = %id, "pending change has no row in the current snapshot"),
    }
  }

  info!(
    run_id = %ctx.run_id,
    preview = ctx.preview,
    new = stats.new,
    updated = stats.updated,
    deactivated = stats.deactivated,
    reactivated = stats.reactivated,
    carried_over,
    "detected changes"
  );

  Ok(WorkSet {
    changes,
    records,
    stats,
    carried_over,
    skipped_missing_id,
  })
}

/// Preview entries exist only in the arena.
fn stage(run_id: RunId, changes: Vec<NewChange>) -> Vec<ChangeLogEntry> {
  let logged_at = Utc::now();
  changes
    .into_iter()
    .map(|c| ChangeLogEntry {
      change_id: 0,
      run_id,
      registry_id: c.registry_id,
      change_type: c.change_type,
      old_last_update_date: c.old_last_update_date,
      new_last_update_date: c.new_last_update_date,
      details: c.details,
      processed: false,
      logged_at,
    })
    .collect()
}
