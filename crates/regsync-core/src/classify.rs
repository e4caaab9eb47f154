//! Entity-level change classification.

use crate::{audit::ChangeType, entity::Entity, source::SourceRecord};

/// Classify a source row against the stored entity for the same identifier.
///
/// The rules are evaluated in order and the first match wins:
///
/// 1. no stored entity → `NEW`
/// 2. source last-update strictly later than the stored one → `UPDATED`
///    (a missing date on either side never compares as later)
/// 3. source deactivation date present, none stored → `DEACTIVATED`
/// 4. source reactivation date present, none stored → `REACTIVATED`
///
/// Anything else is unchanged (`None`) and takes no further part in the run.
/// The result depends only on its two arguments, so an unchanged snapshot
/// against an unchanged target always classifies to `None`.
pub fn classify_change(record: &SourceRecord, prior: Option<&Entity>) -> Option<ChangeType> {
  let Some(prior) = prior else {
    return Some(ChangeType::New);
  };

  if let (Some(new), Some(old)) = (record.last_update_date, prior.last_update_date)
    && new > old
  {
    return Some(ChangeType::Updated);
  }
  if record.deactivation_date.is_some() && prior.deactivation_date.is_none() {
    return Some(ChangeType::Deactivated);
  }
  if record.reactivation_date.is_some() && prior.reactivation_date.is_none() {
    return Some(ChangeType::Reactivated);
  }
  None
}
