//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as RFC 3339 strings and calendar dates as
//! `YYYY-MM-DD`. Enums are stored in their `strum` spelling. Structured
//! payloads (change details, name snapshots, whole source rows) are stored as
//! compact JSON.

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use regsync_core::{
  audit::{
    ChangeLogEntry, ErrorRecord, IndividualChangeLogEntry, ParentChangeLogEntry,
    ProcessingRun, RunId, RunStats,
  },
  entity::{
    Entity, Individual, IndividualId, IndividualLink, OrganizationLink, RegistryId,
  },
};
use rusqlite::Row;

use crate::{Error, Result};

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::Decode(format!("timestamp {s:?}: {e}")))
}

// ─── NaiveDate ───────────────────────────────────────────────────────────────

const DATE_FORMAT: &str = "%Y-%m-%d";

pub fn encode_date(d: Option<NaiveDate>) -> Option<String> {
  d.map(|d| d.format(DATE_FORMAT).to_string())
}

pub fn decode_date(s: Option<String>) -> Result<Option<NaiveDate>> {
  s.map(|s| {
    NaiveDate::parse_from_str(&s, DATE_FORMAT)
      .map_err(|e| Error::Decode(format!("date {s:?}: {e}")))
  })
  .transpose()
}

// ─── Enums ───────────────────────────────────────────────────────────────────

/// Parse a `strum`-spelled enum column.
pub fn decode_enum<T: FromStr>(kind: &str, s: &str) -> Result<T> {
  s.parse()
    .map_err(|_| Error::Decode(format!("unknown {kind}: {s:?}")))
}

// ─── Counters ────────────────────────────────────────────────────────────────

pub fn encode_count(n: u64) -> i64 { i64::try_from(n).unwrap_or(i64::MAX) }

pub fn decode_count(n: i64) -> u64 { u64::try_from(n).unwrap_or_default() }

// ─── Column lists ────────────────────────────────────────────────────────────

pub const RUN_COLUMNS: &str = "run_id, started_at, completed_at, source, source_digest, status,
   total_classified, new_count, updated_count, deactivated_count, reactivated_count,
   skipped_missing_id, notes";

pub const ENTITY_COLUMNS: &str = "registry_id, entity_type, replacement_id, enumeration_date,
   last_update_date, deactivation_reason, deactivation_date, reactivation_date,
   certification_date";

pub const INDIVIDUAL_COLUMNS: &str =
  "individual_id, last_name, first_name, middle_name, name_prefix, name_suffix";

pub const CHANGE_COLUMNS: &str = "change_id, run_id, registry_id, change_type, old_last_update_date,
   new_last_update_date, change_details, processed, logged_at";

pub const INDIVIDUAL_CHANGE_COLUMNS: &str = "change_id, run_id, individual_id, registry_id, role,
   change_type, old_values, new_values, processed, logged_at";

pub const PARENT_CHANGE_COLUMNS: &str =
  "change_id, run_id, child_id, old_parent_id, new_parent_id, change_type, processed, logged_at";

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw values read directly from a `processing_runs` row.
pub struct RawRun {
  pub run_id:             i64,
  pub started_at:         String,
  pub completed_at:       Option<String>,
  pub source:             String,
  pub source_digest:      Option<String>,
  pub status:             String,
  pub total_classified:   i64,
  pub new_count:          i64,
  pub updated_count:      i64,
  pub deactivated_count:  i64,
  pub reactivated_count:  i64,
  pub skipped_missing_id: i64,
  pub notes:              Option<String>,
}

impl RawRun {
  /// Map a row selected with [`RUN_COLUMNS`].
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      run_id:             row.get(0)?,
      started_at:         row.get(1)?,
      completed_at:       row.get(2)?,
      source:             row.get(3)?,
      source_digest:      row.get(4)?,
      status:             row.get(5)?,
      total_classified:   row.get(6)?,
      new_count:          row.get(7)?,
      updated_count:      row.get(8)?,
      deactivated_count:  row.get(9)?,
      reactivated_count:  row.get(10)?,
      skipped_missing_id: row.get(11)?,
      notes:              row.get(12)?,
    })
  }

  pub fn into_run(self) -> Result<ProcessingRun> {
    Ok(ProcessingRun {
      run_id:        RunId(self.run_id),
      started_at:    decode_dt(&self.started_at)?,
      completed_at:  self.completed_at.as_deref().map(decode_dt).transpose()?,
      source:        self.source,
      source_digest: self.source_digest,
      status:        decode_enum("run status", &self.status)?,
      stats:         RunStats {
        total_classified:   decode_count(self.total_classified),
        new:                decode_count(self.new_count),
        updated:            decode_count(self.updated_count),
        deactivated:        decode_count(self.deactivated_count),
        reactivated:        decode_count(self.reactivated_count),
        skipped_missing_id: decode_count(self.skipped_missing_id),
      },
      notes:         self.notes,
    })
  }
}

/// Raw values read directly from an `entities` row.
pub struct RawEntity {
  pub registry_id:         String,
  pub entity_type:         String,
  pub replacement_id:      Option<String>,
  pub enumeration_date:    Option<String>,
  pub last_update_date:    Option<String>,
  pub deactivation_reason: String,
  pub deactivation_date:   Option<String>,
  pub reactivation_date:   Option<String>,
  pub certification_date:  Option<String>,
}

impl RawEntity {
  /// Map a row selected with [`ENTITY_COLUMNS`].
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      registry_id:         row.get(0)?,
      entity_type:         row.get(1)?,
      replacement_id:      row.get(2)?,
      enumeration_date:    row.get(3)?,
      last_update_date:    row.get(4)?,
      deactivation_reason: row.get(5)?,
      deactivation_date:   row.get(6)?,
      reactivation_date:   row.get(7)?,
      certification_date:  row.get(8)?,
    })
  }

  pub fn into_entity(self) -> Result<Entity> {
    Ok(Entity {
      registry_id:         RegistryId::new(self.registry_id),
      entity_type:         decode_enum("entity type", &self.entity_type)?,
      replacement_id:      self.replacement_id.map(RegistryId::new),
      enumeration_date:    decode_date(self.enumeration_date)?,
      last_update_date:    decode_date(self.last_update_date)?,
      deactivation_reason: self.deactivation_reason,
      deactivation_date:   decode_date(self.deactivation_date)?,
      reactivation_date:   decode_date(self.reactivation_date)?,
      certification_date:  decode_date(self.certification_date)?,
    })
  }
}

/// Individuals hold only plain columns and decode directly.
pub fn individual_from_row(row: &Row<'_>) -> rusqlite::Result<Individual> {
  Ok(Individual {
    individual_id: IndividualId(row.get(0)?),
    last_name:     row.get(1)?,
    first_name:    row.get(2)?,
    middle_name:   row.get(3)?,
    name_prefix:   row.get(4)?,
    name_suffix:   row.get(5)?,
  })
}

pub fn individual_link_from_row(row: &Row<'_>) -> rusqlite::Result<IndividualLink> {
  Ok(IndividualLink {
    registry_id:     RegistryId::new(row.get::<_, String>(0)?),
    individual_id:   IndividualId(row.get(1)?),
    sole_proprietor: row.get(2)?,
    sex_code:        row.get(3)?,
  })
}

pub fn organization_link_from_row(row: &Row<'_>) -> rusqlite::Result<OrganizationLink> {
  Ok(OrganizationLink {
    registry_id:            RegistryId::new(row.get::<_, String>(0)?),
    authorized_official_id: row.get::<_, Option<i64>>(1)?.map(IndividualId),
    parent_id:              row.get::<_, Option<String>>(2)?.map(RegistryId::new),
  })
}

/// Raw values read directly from a `change_log` row.
pub struct RawChange {
  pub change_id:            i64,
  pub run_id:               i64,
  pub registry_id:          String,
  pub change_type:          String,
  pub old_last_update_date: Option<String>,
  pub new_last_update_date: Option<String>,
  pub change_details:       String,
  pub processed:            bool,
  pub logged_at:            String,
}

impl RawChange {
  /// Map a row selected with [`CHANGE_COLUMNS`].
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      change_id:            row.get(0)?,
      run_id:               row.get(1)?,
      registry_id:          row.get(2)?,
      change_type:          row.get(3)?,
      old_last_update_date: row.get(4)?,
      new_last_update_date: row.get(5)?,
      change_details:       row.get(6)?,
      processed:            row.get(7)?,
      logged_at:            row.get(8)?,
    })
  }

  pub fn into_entry(self) -> Result<ChangeLogEntry> {
    Ok(ChangeLogEntry {
      change_id:            self.change_id,
      run_id:               RunId(self.run_id),
      registry_id:          RegistryId::new(self.registry_id),
      change_type:          decode_enum("change type", &self.change_type)?,
      old_last_update_date: decode_date(self.old_last_update_date)?,
      new_last_update_date: decode_date(self.new_last_update_date)?,
      details:              serde_json::from_str(&self.change_details)?,
      processed:            self.processed,
      logged_at:            decode_dt(&self.logged_at)?,
    })
  }
}

/// Raw values read directly from an `individual_change_log` row.
pub struct RawIndividualChange {
  pub change_id:     i64,
  pub run_id:        i64,
  pub individual_id: i64,
  pub registry_id:   String,
  pub role:          String,
  pub change_type:   String,
  pub old_values:    Option<String>,
  pub new_values:    String,
  pub processed:     bool,
  pub logged_at:     String,
}

impl RawIndividualChange {
  /// Map a row selected with [`INDIVIDUAL_CHANGE_COLUMNS`].
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      change_id:     row.get(0)?,
      run_id:        row.get(1)?,
      individual_id: row.get(2)?,
      registry_id:   row.get(3)?,
      role:          row.get(4)?,
      change_type:   row.get(5)?,
      old_values:    row.get(6)?,
      new_values:    row.get(7)?,
      processed:     row.get(8)?,
      logged_at:     row.get(9)?,
    })
  }

  pub fn into_entry(self) -> Result<IndividualChangeLogEntry> {
    Ok(IndividualChangeLogEntry {
      change_id:     self.change_id,
      run_id:        RunId(self.run_id),
      individual_id: IndividualId(self.individual_id),
      registry_id:   RegistryId::new(self.registry_id),
      role:          decode_enum("person role", &self.role)?,
      change_type:   decode_enum("individual change type", &self.change_type)?,
      old_values:    self
        .old_values
        .as_deref()
        .map(serde_json::from_str)
        .transpose()?,
      new_values:    serde_json::from_str(&self.new_values)?,
      processed:     self.processed,
      logged_at:     decode_dt(&self.logged_at)?,
    })
  }
}

/// Raw values read directly from a `parent_change_log` row.
pub struct RawParentChange {
  pub change_id:     i64,
  pub run_id:        i64,
  pub child_id:      String,
  pub old_parent_id: Option<String>,
  pub new_parent_id: Option<String>,
  pub change_type:   String,
  pub processed:     bool,
  pub logged_at:     String,
}

impl RawParentChange {
  /// Map a row selected with [`PARENT_CHANGE_COLUMNS`].
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      change_id:     row.get(0)?,
      run_id:        row.get(1)?,
      child_id:      row.get(2)?,
      old_parent_id: row.get(3)?,
      new_parent_id: row.get(4)?,
      change_type:   row.get(5)?,
      processed:     row.get(6)?,
      logged_at:     row.get(7)?,
    })
  }

  pub fn into_entry(self) -> Result<ParentChangeLogEntry> {
    Ok(ParentChangeLogEntry {
      change_id:     self.change_id,
      run_id:        RunId(self.run_id),
      child_id:      RegistryId::new(self.child_id),
      old_parent_id: self.old_parent_id.map(RegistryId::new),
      new_parent_id: self.new_parent_id.map(RegistryId::new),
      change_type:   decode_enum("parent change type", &self.change_type)?,
      processed:     self.processed,
      logged_at:     decode_dt(&self.logged_at)?,
    })
  }
}

/// Raw values read directly from a `resolution_errors` row.
pub struct RawErrorRecord {
  pub registry_id: String,
  pub error_kind:  String,
  pub reason:      String,
  pub run_id:      i64,
}

impl RawErrorRecord {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      registry_id: row.get(0)?,
      error_kind:  row.get(1)?,
      reason:      row.get(2)?,
      run_id:      row.get(3)?,
    })
  }

  pub fn into_record(self) -> Result<ErrorRecord> {
    Ok(ErrorRecord {
      registry_id: RegistryId::new(self.registry_id),
      kind:        decode_enum("error kind", &self.error_kind)?,
      reason:      self.reason,
      run_id:      RunId(self.run_id),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn dates_use_iso_calendar_form() {
    let d = NaiveDate::from_ymd_opt(2024, 3, 7);
    let encoded = encode_date(d);
    assert_eq!(encoded.as_deref(), Some("2024-03-07"));
    assert_eq!(decode_date(encoded).unwrap(), d);
    assert_eq!(decode_date(None).unwrap(), None);
    assert!(decode_date(Some("03/07/2024".into())).is_err());
  }

  #[test]
  fn unknown_enum_spelling_is_a_decode_error() {
    use regsync_core::audit::ChangeType;
    assert_eq!(
      decode_enum::<ChangeType>("change type", "UPDATED").unwrap(),
      ChangeType::Updated
    );
    assert!(matches!(
      decode_enum::<ChangeType>("change type", "updated"),
      Err(Error::Decode(_))
    ));
  }
}
