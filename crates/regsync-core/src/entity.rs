//! Target model — canonical entities, deduplicated individuals, and the
//! link rows joining them.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::{
  normalize::NameKey,
  source::{EntityType, SourceRecord},
};

// ─── Identifiers ─────────────────────────────────────────────────────────────

/// A registry identifier as issued upstream (e.g. a 10-digit provider number).
#[derive(
  Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct RegistryId(String);

impl RegistryId {
  pub fn new(id: impl Into<String>) -> Self { Self(id.into()) }

  pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for RegistryId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl From<&str> for RegistryId {
  fn from(s: &str) -> Self { Self(s.to_owned()) }
}

impl From<String> for RegistryId {
  fn from(s: String) -> Self { Self(s) }
}

/// Store-assigned key of an [`Individual`].
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
pub struct IndividualId(pub i64);

impl fmt::Display for IndividualId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

// ─── Entity ──────────────────────────────────────────────────────────────────

/// Canonical record per registry identifier. Created on first sight, mutated
/// on later changes, never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
  pub registry_id:         RegistryId,
  pub entity_type:         EntityType,
  pub replacement_id:      Option<RegistryId>,
  pub enumeration_date:    Option<NaiveDate>,
  pub last_update_date:    Option<NaiveDate>,
  /// Empty when the upstream reason code is blank.
  pub deactivation_reason: String,
  pub deactivation_date:   Option<NaiveDate>,
  pub reactivation_date:   Option<NaiveDate>,
  pub certification_date:  Option<NaiveDate>,
}

impl Entity {
  /// Build the entity row a source record upserts to. Returns `None` for rows
  /// without an identifier and for placeholder rows with an invalid entity
  /// type, neither of which may be written to the entity table.
  pub fn from_source(record: &SourceRecord) -> Option<Self> {
    Some(Self {
      registry_id:         record.registry_id.clone()?,
      entity_type:         record.entity_type()?,
      replacement_id:      record.replacement_id.clone(),
      enumeration_date:    record.enumeration_date,
      last_update_date:    record.last_update_date,
      deactivation_reason: record.deactivation_reason.clone().unwrap_or_default(),
      deactivation_date:   record.deactivation_date,
      reactivation_date:   record.reactivation_date,
      certification_date:  record.certification_date,
    })
  }
}

// ─── Individual ──────────────────────────────────────────────────────────────

/// A canonical, deduplicated person. The name 5-tuple is unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Individual {
  pub individual_id: IndividualId,
  pub last_name:     String,
  pub first_name:    String,
  pub middle_name:   String,
  pub name_prefix:   String,
  pub name_suffix:   String,
}

impl Individual {
  pub fn from_key(individual_id: IndividualId, key: &NameKey) -> Self {
    Self {
      individual_id,
      last_name: key.last.clone(),
      first_name: key.first.clone(),
      middle_name: key.middle.clone(),
      name_prefix: key.prefix.clone(),
      name_suffix: key.suffix.clone(),
    }
  }

  pub fn key(&self) -> NameKey {
    NameKey {
      last:   self.last_name.clone(),
      first:  self.first_name.clone(),
      middle: self.middle_name.clone(),
      prefix: self.name_prefix.clone(),
      suffix: self.name_suffix.clone(),
    }
  }
}

// ─── Links ───────────────────────────────────────────────────────────────────

/// Joins an individual-type entity to its [`Individual`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndividualLink {
  pub registry_id:     RegistryId,
  pub individual_id:   IndividualId,
  pub sole_proprietor: bool,
  pub sex_code:        String,
}

/// Joins an organization-type entity to its authorized official and, once
/// resolved, its parent organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizationLink {
  pub registry_id:            RegistryId,
  pub authorized_official_id: Option<IndividualId>,
  pub parent_id:              Option<RegistryId>,
}
