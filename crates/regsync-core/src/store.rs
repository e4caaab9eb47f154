//! The `RegistryStore` trait and supporting types.
//!
//! The trait is implemented by storage backends (e.g. `regsync-store-sqlite`).
//! The pipeline depends on this abstraction, not on any concrete backend.
//!
//! Every write method is applied atomically: either all of its rows land or
//! none do. The pipeline is a single-writer batch job; concurrent runs against
//! the same store are not supported and must be serialized by the caller.

use std::{collections::HashMap, future::Future};

use serde::{Deserialize, Serialize};

use crate::{
  audit::{
    ChangeDetails, ChangeLogEntry, ErrorRecord, IndividualChangeLogEntry, NewChange,
    NewParentChange, ParentChangeLogEntry, ProcessedCounts, ProcessingRun, RunCompletion,
    RunId,
  },
  entity::{Entity, Individual, IndividualLink, OrganizationLink, RegistryId},
  identity::{IdentityApplied, IdentityBatch},
  source::SourceRecord,
};

// ─── Read models ─────────────────────────────────────────────────────────────

/// A consistent read of every target table the resolvers consult, taken once
/// per run before any phase writes.
#[derive(Debug, Clone, Default)]
pub struct TargetState {
  pub entities:           Vec<Entity>,
  pub individuals:        Vec<Individual>,
  pub individual_links:   Vec<IndividualLink>,
  pub organization_links: Vec<OrganizationLink>,
}

/// Violation counts from [`RegistryStore::verify_integrity`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityReport {
  /// Individual links attached to entities that are not individuals.
  pub individual_links_on_organizations: u64,
  /// Organization links attached to entities that are not organizations.
  pub organization_links_on_individuals: u64,
  /// Identifiers holding both an individual and an organization link.
  pub entities_with_both_links:          u64,
  /// Links whose entity, individual or parent reference does not exist.
  pub dangling_links:                    u64,
}

impl IntegrityReport {
  pub fn is_clean(&self) -> bool { *self == Self::default() }
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over the backing relational store.
///
/// All methods return `Send` futures so the pipeline can run on a
/// multi-threaded tokio runtime.
pub trait RegistryStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Runs ──────────────────────────────────────────────────────────────

  /// Open a new run in `IN_PROGRESS`. Any run still `IN_PROGRESS` (left by a
  /// crashed or cancelled invocation) is transitioned to `FAILED` first.
  fn start_run(
    &self,
    source: String,
  ) -> impl Future<Output = Result<ProcessingRun, Self::Error>> + Send + '_;

  /// The most recent `IN_PROGRESS` run, if any.
  fn current_run(
    &self,
  ) -> impl Future<Output = Result<Option<ProcessingRun>, Self::Error>> + Send + '_;

  /// Compute the run's aggregate counts from its change-log rows, write them
  /// back and transition the run to `COMPLETED`. Fails for a run that is not
  /// `IN_PROGRESS`.
  fn complete_run(
    &self,
    run_id: RunId,
    completion: RunCompletion,
  ) -> impl Future<Output = Result<ProcessingRun, Self::Error>> + Send + '_;

  /// Transition the run to `FAILED` with `reason` as its note. Fails for a
  /// run that is not `IN_PROGRESS`.
  fn fail_run(
    &self,
    run_id: RunId,
    reason: String,
  ) -> impl Future<Output = Result<ProcessingRun, Self::Error>> + Send + '_;

  fn get_run(
    &self,
    run_id: RunId,
  ) -> impl Future<Output = Result<Option<ProcessingRun>, Self::Error>> + Send + '_;

  /// Most recent runs first.
  fn list_runs(
    &self,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<ProcessingRun>, Self::Error>> + Send + '_;

  // ── Source snapshot ───────────────────────────────────────────────────

  /// Replace the stored snapshot wholesale. Returns the number of rows.
  fn replace_snapshot(
    &self,
    records: Vec<SourceRecord>,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + '_;

  fn load_snapshot(
    &self,
  ) -> impl Future<Output = Result<Vec<SourceRecord>, Self::Error>> + Send + '_;

  // ── Target state ──────────────────────────────────────────────────────

  fn load_target(
    &self,
  ) -> impl Future<Output = Result<TargetState, Self::Error>> + Send + '_;

  fn get_entity(
    &self,
    registry_id: RegistryId,
  ) -> impl Future<Output = Result<Option<Entity>, Self::Error>> + Send + '_;

  /// Insert or update entity rows keyed by identifier. An entity whose type
  /// changed loses the link of the other kind, so an identifier never holds
  /// both an individual and an organization link.
  fn upsert_entities(
    &self,
    entities: Vec<Entity>,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + '_;

  fn list_individuals(
    &self,
  ) -> impl Future<Output = Result<Vec<Individual>, Self::Error>> + Send + '_;

  /// Apply a run's identity writes in one transaction:
  ///
  /// 1. insert an individual for every batch key that has none;
  /// 2. upsert the individual link of each subject assignment, removing any
  ///    organization link on the identifier;
  /// 3. set the authorized official of each official assignment, and clear
  ///    it on every vacated organization, leaving the parent untouched and
  ///    removing any individual link on the identifier;
  /// 4. append each assignment's individual change-log rows, stamped with
  ///    `run_id`.
  fn apply_identities(
    &self,
    run_id: RunId,
    batch: IdentityBatch,
  ) -> impl Future<Output = Result<IdentityApplied, Self::Error>> + Send + '_;

  /// Set the parent of each change's child, creating its organization link
  /// when absent and leaving the authorized official untouched, and append
  /// the parent change-log rows stamped with `run_id`, in one transaction.
  fn apply_parent_changes(
    &self,
    run_id: RunId,
    changes: Vec<NewParentChange>,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + '_;

  fn get_individual_link(
    &self,
    registry_id: RegistryId,
  ) -> impl Future<Output = Result<Option<IndividualLink>, Self::Error>> + Send + '_;

  fn get_organization_link(
    &self,
    registry_id: RegistryId,
  ) -> impl Future<Output = Result<Option<OrganizationLink>, Self::Error>> + Send + '_;

  // ── Audit trail ───────────────────────────────────────────────────────

  /// Append entity-level changes stamped with `run_id`.
  fn record_changes(
    &self,
    run_id: RunId,
    changes: Vec<NewChange>,
  ) -> impl Future<Output = Result<Vec<ChangeLogEntry>, Self::Error>> + Send + '_;

  /// Every change not yet marked processed, from any run, oldest first.
  fn unprocessed_changes(
    &self,
  ) -> impl Future<Output = Result<Vec<ChangeLogEntry>, Self::Error>> + Send + '_;

  /// The payload of the most recent change logged for each identifier.
  fn latest_change_details(
    &self,
    registry_ids: Vec<RegistryId>,
  ) -> impl Future<Output = Result<HashMap<RegistryId, ChangeDetails>, Self::Error>>
  + Send
  + '_;

  /// Entity-level changes, optionally restricted to one run.
  fn change_log(
    &self,
    run_id: Option<RunId>,
  ) -> impl Future<Output = Result<Vec<ChangeLogEntry>, Self::Error>> + Send + '_;

  fn individual_change_log(
    &self,
    run_id: Option<RunId>,
  ) -> impl Future<Output = Result<Vec<IndividualChangeLogEntry>, Self::Error>> + Send + '_;

  fn parent_change_log(
    &self,
    run_id: Option<RunId>,
  ) -> impl Future<Output = Result<Vec<ParentChangeLogEntry>, Self::Error>> + Send + '_;

  /// Flip `processed` to `true` on every unprocessed row of all three logs.
  fn mark_processed(
    &self,
  ) -> impl Future<Output = Result<ProcessedCounts, Self::Error>> + Send + '_;

  // ── Resolution errors ─────────────────────────────────────────────────

  /// Delete the `NO_PARENT` / `MULTI_PARENT` errors of every `touched`
  /// identifier, then insert `errors`. Returns the number inserted.
  fn replace_resolution_errors(
    &self,
    touched: Vec<RegistryId>,
    errors: Vec<ErrorRecord>,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + '_;

  /// All resolution errors, or those of one identifier.
  fn resolution_errors(
    &self,
    registry_id: Option<RegistryId>,
  ) -> impl Future<Output = Result<Vec<ErrorRecord>, Self::Error>> + Send + '_;

  // ── Integrity ─────────────────────────────────────────────────────────

  fn verify_integrity(
    &self,
  ) -> impl Future<Output = Result<IntegrityReport, Self::Error>> + Send + '_;
}
