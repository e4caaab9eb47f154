//! Processing runs and the append-only audit trail.
//!
//! Every detected change is logged against the run that detected it. Log rows
//! carry a `processed` flag that flips to `true` exactly once, after every
//! phase of a run has succeeded; phases gate on unprocessed rows, which is
//! what makes re-running a snapshot a no-op.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::{
  Error, Result,
  entity::{IndividualId, RegistryId},
  normalize::NameKey,
  source::{PersonRole, SourceRecord},
};

// ─── Runs ────────────────────────────────────────────────────────────────────

/// Store-assigned key of a [`ProcessingRun`].
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  PartialOrd,
  Ord,
  Serialize,
  Deserialize,
)]
#[serde(transparent)]
pub struct RunId(pub i64);

impl RunId {
  /// Stamped on log entries staged by a preview run, which never persists a
  /// run row of its own.
  pub const PREVIEW: RunId = RunId(0);
}

impl fmt::Display for RunId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
  InProgress,
  Completed,
  Failed,
}

impl RunStatus {
  /// Validate a state-machine step. Only `IN_PROGRESS → COMPLETED` and
  /// `IN_PROGRESS → FAILED` exist; finished runs are immutable.
  pub fn transition(self, next: RunStatus) -> Result<RunStatus> {
    match (self, next) {
      (Self::InProgress, Self::Completed | Self::Failed) => Ok(next),
      (from, to) => Err(Error::InvalidTransition { from, to }),
    }
  }

  pub fn is_finished(self) -> bool { !matches!(self, Self::InProgress) }
}

/// Aggregate counts written back when a run completes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
  pub total_classified:   u64,
  pub new:                u64,
  pub updated:            u64,
  pub deactivated:        u64,
  pub reactivated:        u64,
  /// Source rows without an identifier; surfaced as a run-level warning.
  pub skipped_missing_id: u64,
}

impl RunStats {
  pub fn record(&mut self, change_type: ChangeType) {
    self.total_classified += 1;
    match change_type {
      ChangeType::New => self.new += 1,
      ChangeType::Updated => self.updated += 1,
      ChangeType::Deactivated => self.deactivated += 1,
      ChangeType::Reactivated => self.reactivated += 1,
    }
  }
}

/// One row per pipeline invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingRun {
  pub run_id:        RunId,
  pub started_at:    DateTime<Utc>,
  pub completed_at:  Option<DateTime<Utc>>,
  pub source:        String,
  /// Digest of the snapshot the run processed; set on completion.
  pub source_digest: Option<String>,
  pub status:        RunStatus,
  pub stats:         RunStats,
  pub notes:         Option<String>,
}

/// What the run tracker hands the store when finalizing a successful run.
/// Per-change-type counts are computed by the store from the run's own
/// change-log rows.
#[derive(Debug, Clone, Default)]
pub struct RunCompletion {
  pub skipped_missing_id: u64,
  pub source_digest:      Option<String>,
  pub notes:              Option<String>,
}

// ─── Entity change log ───────────────────────────────────────────────────────

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeType {
  New,
  Updated,
  Deactivated,
  Reactivated,
}

/// Structured payload stored with every entity-level change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeDetails {
  pub entity_type_code:  Option<String>,
  pub deactivation_date: Option<NaiveDate>,
  pub reactivation_date: Option<NaiveDate>,
  pub replacement_id:    Option<RegistryId>,
}

impl ChangeDetails {
  pub fn from_source(record: &SourceRecord) -> Self {
    Self {
      entity_type_code:  record.entity_type_code.clone(),
      deactivation_date: record.deactivation_date,
      reactivation_date: record.reactivation_date,
      replacement_id:    record.replacement_id.clone(),
    }
  }
}

/// Input to [`crate::store::RegistryStore::record_changes`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewChange {
  pub registry_id:          RegistryId,
  pub change_type:          ChangeType,
  pub old_last_update_date: Option<NaiveDate>,
  pub new_last_update_date: Option<NaiveDate>,
  pub details:              ChangeDetails,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeLogEntry {
  pub change_id:            i64,
  pub run_id:               RunId,
  pub registry_id:          RegistryId,
  pub change_type:          ChangeType,
  pub old_last_update_date: Option<NaiveDate>,
  pub new_last_update_date: Option<NaiveDate>,
  pub details:              ChangeDetails,
  pub processed:            bool,
  pub logged_at:            DateTime<Utc>,
}

// ─── Individual change log ───────────────────────────────────────────────────

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum IndividualChangeType {
  New,
  Updated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewIndividualChange {
  pub individual_id: IndividualId,
  pub registry_id:   RegistryId,
  pub role:          PersonRole,
  pub change_type:   IndividualChangeType,
  /// Name fields as stored before the change; `None` for NEW.
  pub old_values:    Option<NameKey>,
  pub new_values:    NameKey,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndividualChangeLogEntry {
  pub change_id:     i64,
  pub run_id:        RunId,
  pub individual_id: IndividualId,
  pub registry_id:   RegistryId,
  pub role:          PersonRole,
  pub change_type:   IndividualChangeType,
  pub old_values:    Option<NameKey>,
  pub new_values:    NameKey,
  pub processed:     bool,
  pub logged_at:     DateTime<Utc>,
}

// ─── Parent change log ───────────────────────────────────────────────────────

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ParentChangeType {
  NewParent,
  ParentChanged,
  ParentRemoved,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewParentChange {
  pub child_id:      RegistryId,
  pub old_parent_id: Option<RegistryId>,
  pub new_parent_id: Option<RegistryId>,
  pub change_type:   ParentChangeType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentChangeLogEntry {
  pub change_id:     i64,
  pub run_id:        RunId,
  pub child_id:      RegistryId,
  pub old_parent_id: Option<RegistryId>,
  pub new_parent_id: Option<RegistryId>,
  pub change_type:   ParentChangeType,
  pub processed:     bool,
  pub logged_at:     DateTime<Utc>,
}

// ─── Resolution errors ───────────────────────────────────────────────────────

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
  NoParent,
  MultiParent,
}

/// A data-quality failure for one organization identifier. Not a fault: the
/// run proceeds and the affected parent link stays unresolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
  pub registry_id: RegistryId,
  pub kind:        ErrorKind,
  pub reason:      String,
  pub run_id:      RunId,
}

impl ErrorRecord {
  pub fn no_parent(registry_id: RegistryId, declared_parent: &str, run_id: RunId) -> Self {
    Self {
      registry_id,
      kind: ErrorKind::NoParent,
      reason: format!(
        "Organizational subpart has no matching parent organization. \
         Declared parent name: \"{declared_parent}\", but no non-subpart \
         organization found with a matching legal business name."
      ),
      run_id,
    }
  }

  pub fn multi_parent(
    registry_id: RegistryId,
    declared_parent: &str,
    candidates: usize,
    run_id: RunId,
  ) -> Self {
    Self {
      registry_id,
      kind: ErrorKind::MultiParent,
      reason: format!(
        "Organizational subpart has multiple potential parent organizations. \
         Declared parent name: \"{declared_parent}\" matched {candidates} \
         non-subpart organizations with the same legal business name."
      ),
      run_id,
    }
  }
}

/// Rows flipped to `processed = true` by a mark-as-processed pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedCounts {
  pub changes:            u64,
  pub individual_changes: u64,
  pub parent_changes:     u64,
}
