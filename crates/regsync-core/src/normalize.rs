//! Exact-match join keys.
//!
//! Matching is exact on a normalized key; there is no fuzzy matching.

use serde::{Deserialize, Serialize};

/// Strip every character that is not an ASCII letter or digit, then
/// lower-case. Used to compare organization legal names.
pub fn normalize_org_name(name: &str) -> String {
  name
    .chars()
    .filter(char::is_ascii_alphanumeric)
    .map(|c| c.to_ascii_lowercase())
    .collect()
}

/// The identity key of an [`Individual`](crate::entity::Individual): the five
/// name fields with missing values coerced to the empty string. No further
/// case folding or trimming is applied.
#[derive(
  Debug,
  Clone,
  Default,
  PartialEq,
  Eq,
  Hash,
  PartialOrd,
  Ord,
  Serialize,
  Deserialize,
)]
pub struct NameKey {
  pub last:   String,
  pub first:  String,
  pub middle: String,
  pub prefix: String,
  pub suffix: String,
}

impl NameKey {
  pub fn from_parts(
    last: Option<&str>,
    first: Option<&str>,
    middle: Option<&str>,
    prefix: Option<&str>,
    suffix: Option<&str>,
  ) -> Self {
    let own = |s: Option<&str>| s.unwrap_or_default().to_owned();
    Self {
      last:   own(last),
      first:  own(first),
      middle: own(middle),
      prefix: own(prefix),
      suffix: own(suffix),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn org_names_ignore_punctuation_and_case() {
    assert_eq!(normalize_org_name("General Hospital"), "generalhospital");
    assert_eq!(
      normalize_org_name("GENERAL-HOSPITAL, Inc."),
      "generalhospitalinc"
    );
    assert_eq!(normalize_org_name("St. Mary's #2"), "stmarys2");
  }

  #[test]
  fn non_ascii_letters_are_dropped() {
    assert_eq!(normalize_org_name("Clínica Sur"), "clnicasur");
    assert_eq!(normalize_org_name("  --  "), "");
  }

  #[test]
  fn name_key_coerces_missing_fields() {
    let key = NameKey::from_parts(Some("Smith"), Some("Ann"), None, None, Some("MD"));
    assert_eq!(key.middle, "");
    assert_eq!(key.prefix, "");
    assert_eq!(key.suffix, "MD");
  }

  #[test]
  fn name_key_is_case_sensitive() {
    let a = NameKey::from_parts(Some("Smith"), Some("Ann"), None, None, None);
    let b = NameKey::from_parts(Some("SMITH"), Some("Ann"), None, None, None);
    assert_ne!(a, b);
  }
}
