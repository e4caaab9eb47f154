//! Source snapshot rows — the flat, periodically refreshed input.
//!
//! A [`SourceRecord`] is immutable within a run and replaced wholesale by the
//! next snapshot. Every field except the discriminants is optional because the
//! upstream file leaves columns blank freely.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::{entity::RegistryId, normalize::NameKey};

// ─── Discriminants ───────────────────────────────────────────────────────────

/// Whether a registry identifier belongs to a person or an organization.
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
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum EntityType {
  Individual,
  Organization,
}

impl EntityType {
  /// Parse the upstream entity-type code. Blank or unknown codes mark
  /// placeholder rows (fully deactivated identifiers) and yield `None`.
  pub fn from_code(code: &str) -> Option<Self> {
    match code.trim() {
      "1" => Some(Self::Individual),
      "2" => Some(Self::Organization),
      _ => None,
    }
  }

  pub fn code(self) -> &'static str {
    match self {
      Self::Individual => "1",
      Self::Organization => "2",
    }
  }
}

/// The role a person-name payload plays on a source record.
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
pub enum PersonRole {
  /// The provider themself, on individual records.
  Subject,
  /// The organization's authorized official, on organization records.
  AuthorizedOfficial,
}

// ─── Person names ────────────────────────────────────────────────────────────

/// A freeform person-name payload as it appears in the snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonName {
  pub last:   Option<String>,
  pub first:  Option<String>,
  pub middle: Option<String>,
  pub prefix: Option<String>,
  pub suffix: Option<String>,
}

impl PersonName {
  /// A payload is usable only when both last and first name are present.
  pub fn is_present(&self) -> bool {
    non_blank(&self.last) && non_blank(&self.first)
  }

  pub fn key(&self) -> NameKey {
    NameKey::from_parts(
      self.last.as_deref(),
      self.first.as_deref(),
      self.middle.as_deref(),
      self.prefix.as_deref(),
      self.suffix.as_deref(),
    )
  }
}

fn non_blank(field: &Option<String>) -> bool {
  field.as_deref().is_some_and(|s| !s.trim().is_empty())
}

// ─── SourceRecord ────────────────────────────────────────────────────────────

/// One row of the periodic source snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRecord {
  /// Rows without an identifier cannot be tracked and are skipped.
  pub registry_id:         Option<RegistryId>,
  /// Raw entity-type code; see [`EntityType::from_code`].
  pub entity_type_code:    Option<String>,
  pub replacement_id:      Option<RegistryId>,
  pub enumeration_date:    Option<NaiveDate>,
  pub last_update_date:    Option<NaiveDate>,
  pub deactivation_reason: Option<String>,
  pub deactivation_date:   Option<NaiveDate>,
  pub reactivation_date:   Option<NaiveDate>,
  pub certification_date:  Option<NaiveDate>,

  pub provider_name:       PersonName,
  pub sole_proprietor:     Option<bool>,
  pub sex_code:            Option<String>,

  pub authorized_official: PersonName,

  pub legal_name:          Option<String>,
  pub parent_legal_name:   Option<String>,
  /// `Some(true)` for an explicit subpart, `Some(false)` for an explicit
  /// non-subpart, `None` when the flag is blank.
  pub subpart:             Option<bool>,
}

impl SourceRecord {
  pub fn entity_type(&self) -> Option<EntityType> {
    self.entity_type_code.as_deref().and_then(EntityType::from_code)
  }

  /// The person-name payload this record carries, if any, with its role.
  ///
  /// Individual records carry a subject name; organization records carry an
  /// authorized-official name. Placeholder rows carry neither.
  pub fn person(&self) -> Option<(PersonRole, &PersonName)> {
    let (role, name) = match self.entity_type()? {
      EntityType::Individual => (PersonRole::Subject, &self.provider_name),
      EntityType::Organization => {
        (PersonRole::AuthorizedOfficial, &self.authorized_official)
      }
    };
    name.is_present().then_some((role, name))
  }

  pub fn is_organization(&self) -> bool {
    self.entity_type() == Some(EntityType::Organization)
  }

  pub fn is_subpart(&self) -> bool { self.subpart == Some(true) }
}
