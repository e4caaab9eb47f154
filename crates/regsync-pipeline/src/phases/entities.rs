//! Entity upsert for every changed identifier.

use tracing::info;

use regsync_core::{entity::Entity, store::RegistryStore};

use super::{Phase, RunContext, WorkSet};
use crate::{Error, Result};

/// Returns the number of entity rows written (or staged).
pub async fn run<S: RegistryStore>(ctx: &mut RunContext<'_, S>, work: &WorkSet) -> Result<usize> {
  // Placeholder rows yield no entity.
  let entities: Vec<Entity> = work.records.iter().filter_map(Entity::from_source).collect();
  let count = entities.len();

  if !ctx.preview && !entities.is_empty() {
    ctx
      .store
      .upsert_entities(entities.clone())
      .await
      .map_err(Error::store(Phase::UpsertEntities))?;
  }
  for entity in entities {
    ctx.arena.upsert_entity(entity);
  }

  info!(run_id = %ctx.run_id, preview = ctx.preview, upserted = count, "upserted entities");
  Ok(count)
}
