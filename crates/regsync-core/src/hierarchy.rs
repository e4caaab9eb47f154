//! Organizational parent resolution from freeform declared-parent names.
//!
//! A subpart names its parent by legal business name only. The name is
//! normalized and matched exactly against the normalized legal names of
//! organizations that are explicitly *not* subparts. A parent link is set
//! only when exactly one candidate matches; ties are never broken.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display};

use crate::{
  audit::ParentChangeType,
  entity::RegistryId,
  normalize::normalize_org_name,
  source::SourceRecord,
};

// ─── Candidates ──────────────────────────────────────────────────────────────

/// Normalized legal name → identifiers of non-subpart organizations bearing it.
#[derive(Debug, Clone, Default)]
pub struct CandidateIndex {
  by_name: HashMap<String, BTreeSet<RegistryId>>,
}

impl CandidateIndex {
  /// Index every organization record with an identifier, a non-empty
  /// normalized legal name, and an explicit non-subpart flag.
  pub fn build<'a>(records: impl IntoIterator<Item = &'a SourceRecord>) -> Self {
    let mut by_name: HashMap<String, BTreeSet<RegistryId>> = HashMap::new();
    for record in records {
      if !record.is_organization() || record.subpart != Some(false) {
        continue;
      }
      let Some(id) = &record.registry_id else { continue };
      let key = normalize_org_name(record.legal_name.as_deref().unwrap_or_default());
      if key.is_empty() {
        continue;
      }
      by_name.entry(key).or_default().insert(id.clone());
    }
    Self { by_name }
  }

  /// Distinct candidates for a normalized parent name, excluding `child`.
  pub fn candidates(&self, parent_key: &str, child: &RegistryId) -> Vec<RegistryId> {
    self
      .by_name
      .get(parent_key)
      .map(|ids| ids.iter().filter(|id| *id != child).cloned().collect())
      .unwrap_or_default()
  }
}

// ─── Resolution ──────────────────────────────────────────────────────────────

/// How many distinct candidates matched a declared parent name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchCount {
  None,
  One,
  Many,
}

impl MatchCount {
  pub fn of(n: usize) -> Self {
    match n {
      0 => Self::None,
      1 => Self::One,
      _ => Self::Many,
    }
  }
}

/// Resolve a parent from its distinct candidates: the single candidate when
/// there is exactly one, otherwise nothing.
pub fn resolve_parent(candidates: &[RegistryId]) -> (MatchCount, Option<RegistryId>) {
  match candidates {
    [only] => (MatchCount::One, Some(only.clone())),
    other => (MatchCount::of(other.len()), None),
  }
}

/// The resolution outcome for one subpart, grouped by subpart and declared
/// parent name. Lives only for the duration of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentResolution {
  pub child_id:        RegistryId,
  pub declared_parent: String,
  pub candidates:      Vec<RegistryId>,
  pub match_count:     MatchCount,
  pub resolved_parent: Option<RegistryId>,
}

impl ParentResolution {
  /// Resolve `record` against `index`. Returns `None` when the record does
  /// not take part in matching: not an organization, not an explicit
  /// subpart, or a declared parent name that normalizes to nothing.
  pub fn for_record(record: &SourceRecord, index: &CandidateIndex) -> Option<Self> {
    if !record.is_organization() || !record.is_subpart() {
      return None;
    }
    let child_id = record.registry_id.clone()?;
    let declared_parent = record.parent_legal_name.clone().unwrap_or_default();
    let parent_key = normalize_org_name(&declared_parent);
    if parent_key.is_empty() {
      return None;
    }

    let candidates = index.candidates(&parent_key, &child_id);
    let (match_count, resolved_parent) = resolve_parent(&candidates);
    Some(Self {
      child_id,
      declared_parent,
      candidates,
      match_count,
      resolved_parent,
    })
  }

  /// Keep only candidates accepted by `keep`, re-deriving the outcome.
  pub fn retain_candidates(&mut self, keep: impl Fn(&RegistryId) -> bool) {
    self.candidates.retain(|id| keep(id));
    let (match_count, resolved_parent) = resolve_parent(&self.candidates);
    self.match_count = match_count;
    self.resolved_parent = resolved_parent;
  }
}

/// Classify a parent-link change between the stored and newly resolved
/// parent. An unchanged link is not a change.
pub fn classify_parent_change(
  old: Option<&RegistryId>,
  new: Option<&RegistryId>,
) -> Option<ParentChangeType> {
  match (old, new) {
    (None, Some(_)) => Some(ParentChangeType::NewParent),
    (Some(_), None) => Some(ParentChangeType::ParentRemoved),
    (Some(a), Some(b)) if a != b => Some(ParentChangeType::ParentChanged),
    _ => None,
  }
}
