//! Load the source snapshot and the target state into the run arena.

use tracing::info;

use regsync_core::{snapshot::snapshot_digest, store::RegistryStore};

use super::{Phase, RunContext};
use crate::{Error, Result, arena::RunArena};

#[derive(Debug, Clone)]
pub struct LoadedSnapshot {
  pub rows:   usize,
  pub digest: String,
}

pub async fn run<S: RegistryStore>(ctx: &mut RunContext<'_, S>) -> Result<LoadedSnapshot> {
  let phase = Phase::LoadSnapshot;
  let snapshot = ctx.store.load_snapshot().await.map_err(Error::store(phase))?;
  let target = ctx.store.load_target().await.map_err(Error::store(phase))?;
  let digest = snapshot_digest(&snapshot).map_err(Error::core(phase))?;

  info!(
    run_id = %ctx.run_id,
    rows = snapshot.len(),
    entities = target.entities.len(),
    individuals = target.individuals.len(),
    digest = %digest,
    "loaded snapshot"
  );

  let rows = snapshot.len();
  ctx.arena = RunArena::new(snapshot, target);
  Ok(LoadedSnapshot { rows, digest })
}
