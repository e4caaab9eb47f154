//! Person-name deduplication against the canonical individual table.

use std::collections::{BTreeSet, HashMap};

use serde::Serialize;

use crate::{
  audit::{IndividualChangeType, NewIndividualChange},
  entity::{Individual, IndividualId, IndividualLink, RegistryId},
  normalize::NameKey,
  source::{PersonRole, SourceRecord},
};

/// Exact-key index over the individuals known to a run.
#[derive(Debug, Clone, Default)]
pub struct IndividualIndex {
  by_key: HashMap<NameKey, Individual>,
  by_id:  HashMap<IndividualId, NameKey>,
  max_id: i64,
}

impl IndividualIndex {
  pub fn new(individuals: impl IntoIterator<Item = Individual>) -> Self {
    let mut index = Self::default();
    for individual in individuals {
      index.insert(individual);
    }
    index
  }

  pub fn insert(&mut self, individual: Individual) {
    let key = individual.key();
    self.max_id = self.max_id.max(individual.individual_id.0);
    self.by_id.insert(individual.individual_id, key.clone());
    self.by_key.insert(key, individual);
  }

  pub fn get(&self, key: &NameKey) -> Option<&Individual> { self.by_key.get(key) }

  pub fn get_by_id(&self, id: IndividualId) -> Option<&Individual> {
    self.by_id.get(&id).and_then(|key| self.by_key.get(key))
  }

  pub fn len(&self) -> usize { self.by_key.len() }

  pub fn is_empty(&self) -> bool { self.by_key.is_empty() }

  /// The next id above everything indexed; used for provisional ids in
  /// preview runs where the store never assigns one.
  pub fn next_provisional_id(&self) -> IndividualId { IndividualId(self.max_id + 1) }
}

/// Outcome of looking a name key up in the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityMatch {
  /// An individual with exactly this key exists.
  Existing(IndividualId),
  /// No individual has this key; one must be created.
  Missing,
}

/// Resolve a name key to a canonical individual. The same key always
/// resolves to the same id regardless of role or source record.
pub fn resolve_individual(key: &NameKey, index: &IndividualIndex) -> IdentityMatch {
  match index.get(key) {
    Some(found) => IdentityMatch::Existing(found.individual_id),
    None => IdentityMatch::Missing,
  }
}

/// The name a subject record was previously linked under, when its new name
/// key differs from it. `prior` is the individual its stored link points at.
pub fn subject_name_drift(prior: Option<&Individual>, key: &NameKey) -> Option<NameKey> {
  prior.map(Individual::key).filter(|old| old != key)
}

// ─── Write batch ─────────────────────────────────────────────────────────────

/// One changed record's person-name payload, resolved and ready to write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdentityAssignment {
  pub registry_id:     RegistryId,
  pub role:            PersonRole,
  pub key:             NameKey,
  /// Link attributes; only meaningful for [`PersonRole::Subject`].
  pub sole_proprietor: bool,
  pub sex_code:        String,
  /// The key had no individual before this run.
  pub created:         bool,
  /// The subject's previous name, when it changed.
  pub renamed_from:    Option<NameKey>,
}

impl IdentityAssignment {
  pub fn for_record(
    registry_id: RegistryId,
    role: PersonRole,
    key: NameKey,
    record: &SourceRecord,
  ) -> Self {
    Self {
      registry_id,
      role,
      key,
      sole_proprietor: record.sole_proprietor.unwrap_or(false),
      sex_code: record.sex_code.clone().unwrap_or_default(),
      created: false,
      renamed_from: None,
    }
  }

  /// The individual link a subject assignment writes.
  pub fn link(&self, individual_id: IndividualId) -> Option<IndividualLink> {
    (self.role == PersonRole::Subject).then(|| IndividualLink {
      registry_id: self.registry_id.clone(),
      individual_id,
      sole_proprietor: self.sole_proprietor,
      sex_code: self.sex_code.clone(),
    })
  }

  /// The change-log kinds this assignment produces, each with the prior name
  /// it records: NEW when the key was created, UPDATED when a subject was
  /// renamed.
  pub fn change_kinds(&self) -> Vec<(IndividualChangeType, Option<&NameKey>)> {
    let mut kinds = Vec::new();
    if self.created {
      kinds.push((IndividualChangeType::New, None));
    }
    if let Some(old) = &self.renamed_from {
      kinds.push((IndividualChangeType::Updated, Some(old)));
    }
    kinds
  }

  pub fn changes(&self, individual_id: IndividualId) -> Vec<NewIndividualChange> {
    self
      .change_kinds()
      .into_iter()
      .map(|(change_type, old)| NewIndividualChange {
        individual_id,
        registry_id: self.registry_id.clone(),
        role: self.role,
        change_type,
        old_values: old.cloned(),
        new_values: self.key.clone(),
      })
      .collect()
  }
}

/// Every identity write of one run. A store applies a batch atomically:
/// individuals, links, officials and change-log rows land together or not at
/// all, so a retried run sees either none of it or all of it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IdentityBatch {
  pub assignments:       Vec<IdentityAssignment>,
  /// Organizations whose record names no authorized official.
  pub vacated_officials: Vec<RegistryId>,
}

impl IdentityBatch {
  pub fn is_empty(&self) -> bool {
    self.assignments.is_empty() && self.vacated_officials.is_empty()
  }

  /// The change-log rows of every assignment, given the individuals the
  /// batch's keys resolved to.
  pub fn changes(&self, individuals: &[Individual]) -> Vec<NewIndividualChange> {
    let ids: HashMap<NameKey, IndividualId> = individuals
      .iter()
      .map(|i| (i.key(), i.individual_id))
      .collect();
    self
      .assignments
      .iter()
      .filter_map(|a| ids.get(&a.key).map(|id| a.changes(*id)))
      .flatten()
      .collect()
  }

  /// Distinct name keys, in a stable order.
  pub fn keys(&self) -> Vec<NameKey> {
    let keys: BTreeSet<&NameKey> = self.assignments.iter().map(|a| &a.key).collect();
    keys.into_iter().cloned().collect()
  }
}

/// What a store wrote for an [`IdentityBatch`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityApplied {
  /// One row per distinct key in the batch, existing or new.
  pub individuals: Vec<Individual>,
  /// How many of them the batch inserted.
  pub created:     usize,
  pub changes:     Vec<NewIndividualChange>,
}

#[cfg(test)]
mod tests {
  use super::*;

  fn key(last: &str, first: &str) -> NameKey {
    NameKey::from_parts(Some(last), Some(first), None, None, None)
  }

  #[test]
  fn identical_keys_resolve_to_the_same_individual() {
    let index = IndividualIndex::new([
      Individual::from_key(IndividualId(7), &key("Smith", "Ann")),
      Individual::from_key(IndividualId(9), &key("Jones", "Bob")),
    ]);
    assert_eq!(
      resolve_individual(&key("Smith", "Ann"), &index),
      IdentityMatch::Existing(IndividualId(7))
    );
    assert_eq!(
      resolve_individual(&key("Smith", "Ann"), &index),
      resolve_individual(&key("Smith", "Ann"), &index)
    );
  }

  #[test]
  fn unknown_key_is_missing() {
    let index = IndividualIndex::new([Individual::from_key(
      IndividualId(1),
      &key("Smith", "Ann"),
    )]);
    assert_eq!(
      resolve_individual(&key("Smith", "Anne"), &index),
      IdentityMatch::Missing
    );
  }

  #[test]
  fn provisional_ids_follow_the_highest_known() {
    let mut index = IndividualIndex::default();
    assert_eq!(index.next_provisional_id(), IndividualId(1));
    index.insert(Individual::from_key(IndividualId(41), &key("A", "B")));
    index.insert(Individual::from_key(IndividualId(5), &key("C", "D")));
    assert_eq!(index.next_provisional_id(), IndividualId(42));
    assert_eq!(index.len(), 2);
  }

  #[test]
  fn individuals_are_found_by_id() {
    let index = IndividualIndex::new([Individual::from_key(
      IndividualId(3),
      &key("Smith", "Ann"),
    )]);
    assert_eq!(index.get_by_id(IndividualId(3)).map(Individual::key), Some(key("Smith", "Ann")));
    assert!(index.get_by_id(IndividualId(4)).is_none());
  }

  #[test]
  fn renamed_subject_reports_its_previous_name() {
    let prior = Individual::from_key(IndividualId(3), &key("Smith", "Ann"));
    assert_eq!(
      subject_name_drift(Some(&prior), &key("Smith-Jones", "Ann")),
      Some(key("Smith", "Ann"))
    );
    assert_eq!(subject_name_drift(Some(&prior), &key("Smith", "Ann")), None);
    assert_eq!(subject_name_drift(None, &key("Smith", "Ann")), None);
  }

  fn assignment(created: bool, renamed_from: Option<NameKey>) -> IdentityAssignment {
    IdentityAssignment {
      registry_id: "111".into(),
      role: PersonRole::Subject,
      key: key("Smith-Jones", "Ann"),
      sole_proprietor: true,
      sex_code: "F".into(),
      created,
      renamed_from,
    }
  }

  #[test]
  fn assignment_changes_follow_creation_and_rename() {
    assert!(assignment(false, None).changes(IndividualId(5)).is_empty());

    let changes = assignment(true, Some(key("Smith", "Ann"))).changes(IndividualId(5));
    let kinds: Vec<_> = changes.iter().map(|c| c.change_type).collect();
    assert_eq!(kinds, [IndividualChangeType::New, IndividualChangeType::Updated]);
    assert!(changes.iter().all(|c| c.individual_id == IndividualId(5)));
    assert_eq!(changes[1].old_values, Some(key("Smith", "Ann")));
    assert_eq!(changes[1].new_values, key("Smith-Jones", "Ann"));
  }

  #[test]
  fn only_subjects_produce_links() {
    let subject = assignment(false, None);
    let link = subject.link(IndividualId(5)).unwrap();
    assert!(link.sole_proprietor);
    assert_eq!(link.sex_code, "F");

    let official = IdentityAssignment {
      role: PersonRole::AuthorizedOfficial,
      ..subject
    };
    assert!(official.link(IndividualId(5)).is_none());
  }

  #[test]
  fn batch_keys_are_distinct() {
    let batch = IdentityBatch {
      assignments:       vec![
        assignment(true, None),
        IdentityAssignment { registry_id: "222".into(), ..assignment(true, None) },
      ],
      vacated_officials: Vec::new(),
    };
    assert_eq!(batch.keys(), [key("Smith-Jones", "Ann")]);
    assert!(!batch.is_empty());
    assert!(IdentityBatch::default().is_empty());
  }
}
