//! The ordered phases of one run.
//!
//! Each phase takes the shared [`RunContext`] plus the typed output of the
//! phase before it. Phases run strictly in [`Phase`] order: entity upsert
//! before identity and hierarchy resolution, resolution before error
//! reporting, error reporting before mark-as-processed.

use std::collections::BTreeMap;

use serde::Serialize;
use strum::{AsRefStr, Display};

use regsync_core::{
  audit::{ChangeLogEntry, RunId, RunStats},
  entity::RegistryId,
  source::SourceRecord,
  store::RegistryStore,
};

use crate::arena::RunArena;

pub mod audit;
pub mod detect;
pub mod entities;
pub mod errors;
pub mod hierarchy;
pub mod identity;
pub mod run_tracker;
pub mod snapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Phase {
  OpenRun,
  LoadSnapshot,
  DetectChanges,
  UpsertEntities,
  ResolveIdentities,
  ResolveHierarchy,
  ReportErrors,
  MarkProcessed,
  FinalizeRun,
}

/// State shared by every phase of one run.
pub struct RunContext<'a, S> {
  pub store:   &'a S,
  pub run_id:  RunId,
  /// Stage everything in the arena; write nothing to the store.
  pub preview: bool,
  pub arena:   RunArena,
}

impl<'a, S: RegistryStore> RunContext<'a, S> {
  pub fn new(store: &'a S, run_id: RunId, preview: bool) -> Self {
    Self {
      store,
      run_id,
      preview,
      arena: RunArena::default(),
    }
  }
}

/// Output of change detection: every identifier with an unprocessed change,
/// whether logged by this run or carried over from an aborted one.
#[derive(Debug, Default)]
pub struct WorkSet {
  /// Latest unprocessed change per identifier.
  pub changes:            BTreeMap<RegistryId, ChangeLogEntry>,
  /// Current snapshot rows for the changed identifiers, in identifier order.
  /// Identifiers missing from the snapshot have no row here.
  pub records:            Vec<SourceRecord>,
  /// Counts of the changes this run logged itself.
  pub stats:              RunStats,
  /// Changes picked up from earlier, unfinished runs.
  pub carried_over:       usize,
  pub skipped_missing_id: u64,
}
