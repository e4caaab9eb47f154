//! Snapshot fingerprints.
//!
//! Each row is hashed over its canonical JSON form; the snapshot digest is a
//! SHA-256 over the sorted row hashes, so row order in the upstream file does
//! not matter.

use sha2::{Digest, Sha256};

use crate::{Result, source::SourceRecord};

/// Hex SHA-256 of one row's canonical JSON form.
pub fn row_hash(record: &SourceRecord) -> Result<String> {
  let bytes = serde_json::to_vec(record)?;
  Ok(hex::encode(Sha256::digest(&bytes)))
}

/// Order-independent digest of a whole snapshot.
pub fn snapshot_digest<'a>(records: impl IntoIterator<Item = &'a SourceRecord>) -> Result<String> {
  let mut hashes = records
    .into_iter()
    .map(row_hash)
    .collect::<Result<Vec<_>>>()?;
  hashes.sort_unstable();

  let mut hasher = Sha256::new();
  for hash in &hashes {
    hasher.update(hash.as_bytes());
  }
  Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
  use super::*;

  fn record(id: &str, name: &str) -> SourceRecord {
    SourceRecord {
      registry_id: Some(id.into()),
      legal_name: Some(name.into()),
      ..Default::default()
    }
  }

  #[test]
  fn row_order_does_not_matter() {
    let a = record("1", "Alpha");
    let b = record("2", "Beta");
    assert_eq!(
      snapshot_digest([&a, &b]).unwrap(),
      snapshot_digest([&b, &a]).unwrap()
    );
  }

  #[test]
  fn any_field_change_changes_the_digest() {
    let a = record("1", "Alpha");
    let b = record("1", "Alpha Health");
    assert_ne!(row_hash(&a).unwrap(), row_hash(&b).unwrap());
    assert_ne!(snapshot_digest([&a]).unwrap(), snapshot_digest([&b]).unwrap());
  }
}
