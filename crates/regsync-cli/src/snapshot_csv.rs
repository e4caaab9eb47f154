//! Registry dissemination CSV → [`SourceRecord`] rows.
//!
//! Columns are matched by header name; any column not listed here is ignored,
//! so the full dissemination file loads as is. Dates are `MM/DD/YYYY` (as
//! disseminated) or ISO `YYYY-MM-DD`. Flags are `Y`/`N`; anything else reads
//! as unknown.

use std::{io::Read, path::Path};

use anyhow::{Context as _, bail};
use chrono::NaiveDate;
use serde::Deserialize;

use regsync_core::source::{PersonName, SourceRecord};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CsvRow {
  #[serde(rename = "NPI")]
  registry_id:         Option<String>,
  #[serde(rename = "Entity Type Code")]
  entity_type_code:    Option<String>,
  #[serde(rename = "Replacement NPI")]
  replacement_id:      Option<String>,
  #[serde(rename = "Provider Enumeration Date")]
  enumeration_date:    Option<String>,
  #[serde(rename = "Last Update Date")]
  last_update_date:    Option<String>,
  #[serde(rename = "NPI Deactivation Reason Code")]
  deactivation_reason: Option<String>,
  #[serde(rename = "NPI Deactivation Date")]
  deactivation_date:   Option<String>,
  #[serde(rename = "NPI Reactivation Date")]
  reactivation_date:   Option<String>,
  #[serde(rename = "Certification Date")]
  certification_date:  Option<String>,

  #[serde(rename = "Provider Last Name (Legal Name)")]
  last:                Option<String>,
  #[serde(rename = "Provider First Name")]
  first:               Option<String>,
  #[serde(rename = "Provider Middle Name")]
  middle:              Option<String>,
  #[serde(rename = "Provider Name Prefix Text")]
  prefix:              Option<String>,
  #[serde(rename = "Provider Name Suffix Text")]
  suffix:              Option<String>,
  #[serde(rename = "Is Sole Proprietor")]
  sole_proprietor:     Option<String>,
  #[serde(rename = "Provider Sex Code", alias = "Provider Gender Code")]
  sex_code:            Option<String>,

  #[serde(rename = "Authorized Official Last Name")]
  official_last:       Option<String>,
  #[serde(rename = "Authorized Official First Name")]
  official_first:      Option<String>,
  #[serde(rename = "Authorized Official Middle Name")]
  official_middle:     Option<String>,
  #[serde(rename = "Authorized Official Name Prefix Text")]
  official_prefix:     Option<String>,
  #[serde(rename = "Authorized Official Name Suffix Text")]
  official_suffix:     Option<String>,

  #[serde(rename = "Provider Organization Name (Legal Business Name)")]
  legal_name:          Option<String>,
  #[serde(rename = "Parent Organization LBN")]
  parent_legal_name:   Option<String>,
  #[serde(rename = "Is Organization Subpart")]
  subpart:             Option<String>,
}

impl CsvRow {
  fn into_record(self) -> anyhow::Result<SourceRecord> {
    Ok(SourceRecord {
      registry_id:         text(self.registry_id).map(Into::into),
      entity_type_code:    text(self.entity_type_code),
      replacement_id:      text(self.replacement_id).map(Into::into),
      enumeration_date:    date(self.enumeration_date)
        .context("Provider Enumeration Date")?,
      last_update_date:    date(self.last_update_date).context("Last Update Date")?,
      deactivation_reason: text(self.deactivation_reason),
      deactivation_date:   date(self.deactivation_date).context("NPI Deactivation Date")?,
      reactivation_date:   date(self.reactivation_date).context("NPI Reactivation Date")?,
      certification_date:  date(self.certification_date).context("Certification Date")?,

      provider_name:       PersonName {
        last:   text(self.last),
        first:  text(self.first),
        middle: text(self.middle),
        prefix: text(self.prefix),
        suffix: text(self.suffix),
      },
      sole_proprietor:     flag(self.sole_proprietor),
      sex_code:            text(self.sex_code),

      authorized_official: PersonName {
        last:   text(self.official_last),
        first:  text(self.official_first),
        middle: text(self.official_middle),
        prefix: text(self.official_prefix),
        suffix: text(self.official_suffix),
      },

      legal_name:          text(self.legal_name),
      parent_legal_name:   text(self.parent_legal_name),
      subpart:             flag(self.subpart),
    })
  }
}

/// Blank cells are absent.
fn text(cell: Option<String>) -> Option<String> {
  cell.filter(|s| !s.trim().is_empty())
}

fn flag(cell: Option<String>) -> Option<bool> {
  match cell.as_deref().map(str::trim) {
    Some("Y" | "y") => Some(true),
    Some("N" | "n") => Some(false),
    _ => None,
  }
}

fn date(cell: Option<String>) -> anyhow::Result<Option<NaiveDate>> {
  let Some(cell) = text(cell) else {
    return Ok(None);
  };
  let cell = cell.trim();
  for format in ["%m/%d/%Y", "%Y-%m-%d"] {
    if let Ok(date) = NaiveDate::parse_from_str(cell, format) {
      return Ok(Some(date));
    }
  }
  bail!("unrecognised date {cell:?}")
}

/// Parse every row of a snapshot CSV.
pub fn from_reader(reader: impl Read) -> anyhow::Result<Vec<SourceRecord>> {
  let mut reader = csv::Reader::from_reader(reader);
  let mut records = Vec::new();
  for (index, row) in reader.deserialize::<CsvRow>().enumerate() {
    // Data rows start on line 2, after the header.
    let line = index + 2;
    let record = row
      .with_context(|| format!("malformed row on line {line}"))?
      .into_record()
      .with_context(|| format!("invalid value on line {line}"))?;
    records.push(record);
  }
  Ok(records)
}

pub fn read_path(path: &Path) -> anyhow::Result<Vec<SourceRecord>> {
  let file = std::fs::File::open(path)
    .with_context(|| format!("failed to open snapshot {}", path.display()))?;
  from_reader(file).with_context(|| format!("failed to parse snapshot {}", path.display()))
}
