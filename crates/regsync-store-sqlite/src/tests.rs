//! Integration tests for `SqliteStore` against an in-memory database.

use chrono::NaiveDate;
use regsync_core::{
  audit::{
    ChangeDetails, ChangeType, ErrorKind, ErrorRecord, IndividualChangeType,
    NewChange, NewParentChange, ParentChangeType, RunCompletion, RunId, RunStatus,
  },
  entity::{Entity, RegistryId},
  identity::{IdentityAssignment, IdentityBatch},
  normalize::NameKey,
  source::{EntityType, PersonRole, SourceRecord},
  store::RegistryStore,
};

use crate::{Error, SqliteStore};

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

fn date(y: i32, m: u32, d: u32) -> Option<NaiveDate> { NaiveDate::from_ymd_opt(y, m, d) }

fn entity(id: &str, entity_type: EntityType) -> Entity {
  Entity {
    registry_id: id.into(),
    entity_type,
    replacement_id: None,
    enumeration_date: date(2010, 1, 1),
    last_update_date: date(2020, 6, 1),
    deactivation_reason: String::new(),
    deactivation_date: None,
    reactivation_date: None,
    certification_date: None,
  }
}

fn change(id: &str, change_type: ChangeType) -> NewChange {
  NewChange {
    registry_id: id.into(),
    change_type,
    old_last_update_date: None,
    new_last_update_date: date(2020, 6, 1),
    details: ChangeDetails {
      entity_type_code: Some("1".into()),
      ..Default::default()
    },
  }
}

fn key(last: &str, first: &str) -> NameKey {
  NameKey::from_parts(Some(last), Some(first), None, None, None)
}

fn assign(id: &str, role: PersonRole, key: NameKey) -> IdentityAssignment {
  IdentityAssignment {
    registry_id: id.into(),
    role,
    key,
    sole_proprietor: false,
    sex_code: String::new(),
    created: false,
    renamed_from: None,
  }
}

fn batch(assignments: Vec<IdentityAssignment>) -> IdentityBatch {
  IdentityBatch { assignments, vacated_officials: Vec::new() }
}

fn parent_change(
  child: &str,
  parent: Option<&str>,
  change_type: ParentChangeType,
) -> NewParentChange {
  NewParentChange {
    child_id: child.into(),
    old_parent_id: None,
    new_parent_id: parent.map(Into::into),
    change_type,
  }
}

// ─── Runs ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn complete_run_counts_its_own_changes() {
  let s = store().await;
  let run = s.start_run("test".into()).await.unwrap();
  assert_eq!(run.status, RunStatus::InProgress);

  s.record_changes(run.run_id, vec![
    change("1000000001", ChangeType::New),
    change("1000000002", ChangeType::New),
    change("1000000003", ChangeType::Updated),
  ])
  .await
  .unwrap();

  let done = s
    .complete_run(run.run_id, RunCompletion {
      skipped_missing_id: 4,
      source_digest:      Some("abc".into()),
      notes:              None,
    })
    .await
    .unwrap();

  assert_eq!(done.status, RunStatus::Completed);
  assert!(done.completed_at.is_some());
  assert_eq!(done.stats.total_classified, 3);
  assert_eq!(done.stats.new, 2);
  assert_eq!(done.stats.updated, 1);
  assert_eq!(done.stats.deactivated, 0);
  assert_eq!(done.stats.skipped_missing_id, 4);
  assert_eq!(done.source_digest.as_deref(), Some("abc"));
  assert!(s.current_run().await.unwrap().is_none());
}

#[tokio::test]
async fn starting_a_run_fails_stale_ones() {
  let s = store().await;
  let stale = s.start_run("crashed".into()).await.unwrap();
  let fresh = s.start_run("retry".into()).await.unwrap();

  let stale = s.get_run(stale.run_id).await.unwrap().unwrap();
  assert_eq!(stale.status, RunStatus::Failed);
  assert!(stale.notes.is_some());

  let current = s.current_run().await.unwrap().unwrap();
  assert_eq!(current.run_id, fresh.run_id);
  assert_eq!(current.source, "retry");
}

#[tokio::test]
async fn finished_runs_cannot_be_finished_again() {
  let s = store().await;
  let run = s.start_run("test".into()).await.unwrap();
  let failed = s.fail_run(run.run_id, "phase blew up".into()).await.unwrap();
  assert_eq!(failed.status, RunStatus::Failed);
  assert_eq!(failed.notes.as_deref(), Some("phase blew up"));

  let err = s
    .complete_run(run.run_id, RunCompletion::default())
    .await
    .unwrap_err();
  assert!(matches!(
    err,
    Error::RunNotInProgress { status: RunStatus::Failed, .. }
  ));

  let err = s.fail_run(RunId(999), "nope".into()).await.unwrap_err();
  assert!(matches!(err, Error::RunNotFound(RunId(999))));
}

#[tokio::test]
async fn finished_run_rows_reject_raw_updates() {
  let s = store().await;
  let run = s.start_run("test".into()).await.unwrap();
  s.complete_run(run.run_id, RunCompletion::default())
    .await
    .unwrap();

  let result = s
    .execute_raw("UPDATE processing_runs SET status = 'IN_PROGRESS'")
    .await;
  assert!(result.is_err());
}

#[tokio::test]
async fn list_runs_newest_first() {
  let s = store().await;
  for source in ["a", "b", "c"] {
    let run = s.start_run(source.into()).await.unwrap();
    s.complete_run(run.run_id, RunCompletion::default())
      .await
      .unwrap();
  }
  let runs = s.list_runs(2).await.unwrap();
  assert_eq!(runs.len(), 2);
  assert_eq!(runs[0].source, "c");
  assert_eq!(runs[1].source, "b");
}

// ─── Snapshot ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn snapshot_is_replaced_wholesale() {
  let s = store().await;
  let a = SourceRecord {
    registry_id: Some("1000000001".into()),
    entity_type_code: Some("2".into()),
    legal_name: Some("General Hospital".into()),
    subpart: Some(false),
    last_update_date: date(2021, 2, 3),
    ..Default::default()
  };
  let b = SourceRecord {
    registry_id: None,
    entity_type_code: Some("1".into()),
    ..Default::default()
  };

  assert_eq!(s.replace_snapshot(vec![a.clone(), b.clone()]).await.unwrap(), 2);
  assert_eq!(s.load_snapshot().await.unwrap(), vec![a.clone(), b]);

  assert_eq!(s.replace_snapshot(vec![a.clone()]).await.unwrap(), 1);
  assert_eq!(s.load_snapshot().await.unwrap(), vec![a]);
}

// ─── Entities & individuals ──────────────────────────────────────────────────

#[tokio::test]
async fn upsert_entities_inserts_then_updates() {
  let s = store().await;
  let mut e = entity("1000000001", EntityType::Individual);
  s.upsert_entities(vec![e.clone()]).await.unwrap();
  assert_eq!(s.get_entity("1000000001".into()).await.unwrap(), Some(e.clone()));

  e.deactivation_date = date(2022, 1, 1);
  e.deactivation_reason = "DT".into();
  s.upsert_entities(vec![e.clone()]).await.unwrap();

  let target = s.load_target().await.unwrap();
  assert_eq!(target.entities, vec![e]);
  assert!(s.get_entity("9999999999".into()).await.unwrap().is_none());
}

#[tokio::test]
async fn apply_identities_reuses_existing_keys() {
  let s = store().await;
  s.upsert_entities(vec![
    entity("1000000001", EntityType::Individual),
    entity("1000000002", EntityType::Organization),
    entity("1000000003", EntityType::Organization),
  ])
  .await
  .unwrap();
  let run = s.start_run("test".into()).await.unwrap();

  let first = s
    .apply_identities(run.run_id, batch(vec![
      assign("1000000001", PersonRole::Subject, key("Smith", "Ann")),
      assign("1000000002", PersonRole::AuthorizedOfficial, key("Jones", "Bob")),
      assign("1000000003", PersonRole::AuthorizedOfficial, key("Smith", "Ann")),
    ]))
    .await
    .unwrap();
  assert_eq!(first.individuals.len(), 2);
  assert_eq!(first.created, 2);

  let ann = s.get_individual_link("1000000001".into()).await.unwrap().unwrap();
  let org = s.get_organization_link("1000000003".into()).await.unwrap().unwrap();
  assert_eq!(org.authorized_official_id, Some(ann.individual_id));

  let again = s
    .apply_identities(run.run_id, batch(vec![assign(
      "1000000001",
      PersonRole::Subject,
      key("Smith", "Ann"),
    )]))
    .await
    .unwrap();
  assert_eq!(again.created, 0);
  assert_eq!(again.individuals[0].individual_id, ann.individual_id);
  assert_eq!(s.list_individuals().await.unwrap().len(), 2);
}

#[tokio::test]
async fn identity_batch_logs_with_assigned_ids() {
  let s = store().await;
  s.upsert_entities(vec![
    entity("1000000001", EntityType::Individual),
    entity("1000000002", EntityType::Organization),
  ])
  .await
  .unwrap();
  let run = s.start_run("test".into()).await.unwrap();

  let applied = s
    .apply_identities(run.run_id, batch(vec![
      IdentityAssignment {
        created: true,
        sole_proprietor: true,
        sex_code: "F".into(),
        ..assign("1000000001", PersonRole::Subject, key("Smith", "Ann"))
      },
      IdentityAssignment {
        created: true,
        ..assign("1000000002", PersonRole::AuthorizedOfficial, key("Jones", "Bob"))
      },
    ]))
    .await
    .unwrap();

  let link = s.get_individual_link("1000000001".into()).await.unwrap().unwrap();
  assert!(link.sole_proprietor);
  assert_eq!(link.sex_code, "F");

  let logged = s.individual_change_log(Some(run.run_id)).await.unwrap();
  assert_eq!(logged.len(), 2);
  assert_eq!(applied.changes.len(), 2);
  for (entry, change) in logged.iter().zip(&applied.changes) {
    assert_eq!(entry.individual_id, change.individual_id);
    assert_eq!(entry.registry_id, change.registry_id);
    assert_eq!(entry.change_type, IndividualChangeType::New);
  }
  assert_eq!(logged[0].individual_id, link.individual_id);
  assert_eq!(logged[1].role, PersonRole::AuthorizedOfficial);
}

#[tokio::test]
async fn failed_identity_batch_writes_nothing() {
  let s = store().await;
  s.upsert_entities(vec![entity("1000000001", EntityType::Individual)])
    .await
    .unwrap();

  // No such run: the change-log insert violates its foreign key.
  let result = s
    .apply_identities(RunId(999), batch(vec![IdentityAssignment {
      created: true,
      ..assign("1000000001", PersonRole::Subject, key("Smith", "Ann"))
    }]))
    .await;
  assert!(result.is_err());

  assert!(s.list_individuals().await.unwrap().is_empty());
  assert!(s.get_individual_link("1000000001".into()).await.unwrap().is_none());
  assert!(s.individual_change_log(None).await.unwrap().is_empty());
}

// ─── Links ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn link_kinds_are_mutually_exclusive() {
  let s = store().await;
  s.upsert_entities(vec![entity("1000000001", EntityType::Individual)])
    .await
    .unwrap();
  let run = s.start_run("test".into()).await.unwrap();

  s.apply_identities(run.run_id, batch(vec![IdentityAssignment {
    sole_proprietor: true,
    sex_code: "F".into(),
    ..assign("1000000001", PersonRole::Subject, key("Smith", "Ann"))
  }]))
  .await
  .unwrap();
  let link = s.get_individual_link("1000000001".into()).await.unwrap().unwrap();
  assert!(link.sole_proprietor);

  // The identifier flips to an organization in a later snapshot.
  s.upsert_entities(vec![entity("1000000001", EntityType::Organization)])
    .await
    .unwrap();
  assert!(s.get_individual_link("1000000001".into()).await.unwrap().is_none());

  s.apply_identities(run.run_id, batch(vec![assign(
    "1000000001",
    PersonRole::AuthorizedOfficial,
    key("Smith", "Ann"),
  )]))
  .await
  .unwrap();
  let org = s.get_organization_link("1000000001".into()).await.unwrap().unwrap();
  assert_eq!(org.authorized_official_id, Some(link.individual_id));
  assert!(s.verify_integrity().await.unwrap().is_clean());
}

#[tokio::test]
async fn retyped_entity_drops_its_organization_link() {
  let s = store().await;
  s.upsert_entities(vec![
    entity("1000000001", EntityType::Organization),
    entity("1000000002", EntityType::Organization),
  ])
  .await
  .unwrap();
  let run = s.start_run("test".into()).await.unwrap();
  s.apply_identities(run.run_id, batch(vec![assign(
    "1000000001",
    PersonRole::AuthorizedOfficial,
    key("Jones", "Bob"),
  )]))
  .await
  .unwrap();
  s.apply_parent_changes(run.run_id, vec![parent_change(
    "1000000001",
    Some("1000000002"),
    ParentChangeType::NewParent,
  )])
  .await
  .unwrap();

  // Re-typed without a usable name: nothing relinks it.
  s.upsert_entities(vec![entity("1000000001", EntityType::Individual)])
    .await
    .unwrap();

  assert!(s.get_organization_link("1000000001".into()).await.unwrap().is_none());
  assert!(s.verify_integrity().await.unwrap().is_clean());
}

#[tokio::test]
async fn parent_and_official_columns_are_set_independently() {
  let s = store().await;
  s.upsert_entities(vec![
    entity("1000000001", EntityType::Organization),
    entity("1000000002", EntityType::Organization),
  ])
  .await
  .unwrap();
  let run = s.start_run("test".into()).await.unwrap();

  let bob = s
    .apply_identities(run.run_id, batch(vec![assign(
      "1000000001",
      PersonRole::AuthorizedOfficial,
      key("Jones", "Bob"),
    )]))
    .await
    .unwrap()
    .individuals[0]
    .clone();
  s.apply_parent_changes(run.run_id, vec![parent_change(
    "1000000001",
    Some("1000000002"),
    ParentChangeType::NewParent,
  )])
  .await
  .unwrap();

  let link = s.get_organization_link("1000000001".into()).await.unwrap().unwrap();
  assert_eq!(link.authorized_official_id, Some(bob.individual_id));
  assert_eq!(link.parent_id, Some(RegistryId::from("1000000002")));

  s.apply_identities(run.run_id, IdentityBatch {
    assignments:       Vec::new(),
    vacated_officials: vec!["1000000001".into()],
  })
  .await
  .unwrap();
  let link = s.get_organization_link("1000000001".into()).await.unwrap().unwrap();
  assert_eq!(link.authorized_official_id, None);
  assert_eq!(link.parent_id, Some(RegistryId::from("1000000002")));
}

#[tokio::test]
async fn failed_parent_changes_write_nothing() {
  let s = store().await;
  s.upsert_entities(vec![
    entity("1000000001", EntityType::Organization),
    entity("1000000002", EntityType::Organization),
  ])
  .await
  .unwrap();

  let result = s
    .apply_parent_changes(RunId(999), vec![parent_change(
      "1000000001",
      Some("1000000002"),
      ParentChangeType::NewParent,
    )])
    .await;
  assert!(result.is_err());

  assert!(s.get_organization_link("1000000001".into()).await.unwrap().is_none());
  assert!(s.parent_change_log(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn verify_integrity_flags_links_on_the_wrong_entity_type() {
  let s = store().await;
  s.upsert_entities(vec![entity("1000000001", EntityType::Organization)])
    .await
    .unwrap();
  let run = s.start_run("test".into()).await.unwrap();
  s.apply_identities(run.run_id, batch(vec![assign(
    "1000000001",
    PersonRole::Subject,
    key("Smith", "Ann"),
  )]))
  .await
  .unwrap();

  let report = s.verify_integrity().await.unwrap();
  assert_eq!(report.individual_links_on_organizations, 1);
  assert_eq!(report.entities_with_both_links, 0);
  assert!(!report.is_clean());
}

// ─── Audit trail ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn processed_flag_is_sticky() {
  let s = store().await;
  let run = s.start_run("test".into()).await.unwrap();
  s.record_changes(run.run_id, vec![change("1000000001", ChangeType::New)])
    .await
    .unwrap();
  assert_eq!(s.unprocessed_changes().await.unwrap().len(), 1);

  let counts = s.mark_processed().await.unwrap();
  assert_eq!(counts.changes, 1);
  assert!(s.unprocessed_changes().await.unwrap().is_empty());
  assert_eq!(s.mark_processed().await.unwrap().changes, 0);

  let result = s.execute_raw("UPDATE change_log SET processed = 0").await;
  assert!(result.is_err());
}

#[tokio::test]
async fn change_log_filters_by_run() {
  let s = store().await;
  let first = s.start_run("a".into()).await.unwrap();
  s.record_changes(first.run_id, vec![change("1000000001", ChangeType::New)])
    .await
    .unwrap();
  s.complete_run(first.run_id, RunCompletion::default())
    .await
    .unwrap();

  let second = s.start_run("b".into()).await.unwrap();
  let logged = s
    .record_changes(second.run_id, vec![change("1000000001", ChangeType::Updated)])
    .await
    .unwrap();
  assert_eq!(logged[0].run_id, second.run_id);
  assert!(!logged[0].processed);

  assert_eq!(s.change_log(None).await.unwrap().len(), 2);
  let only = s.change_log(Some(second.run_id)).await.unwrap();
  assert_eq!(only.len(), 1);
  assert_eq!(only[0].change_type, ChangeType::Updated);
  assert_eq!(only[0].details, logged[0].details);
}

#[tokio::test]
async fn latest_change_details_returns_most_recent() {
  let s = store().await;
  let run = s.start_run("test".into()).await.unwrap();
  let mut later = change("1000000001", ChangeType::Deactivated);
  later.details.deactivation_date = date(2023, 5, 5);
  s.record_changes(run.run_id, vec![change("1000000001", ChangeType::New), later.clone()])
    .await
    .unwrap();

  let latest = s
    .latest_change_details(vec!["1000000001".into(), "1000000002".into()])
    .await
    .unwrap();
  assert_eq!(latest.len(), 1);
  assert_eq!(latest[&RegistryId::from("1000000001")], later.details);
}

#[tokio::test]
async fn individual_and_parent_logs_round_trip() {
  let s = store().await;
  s.upsert_entities(vec![
    entity("1000000001", EntityType::Individual),
    entity("1000000002", EntityType::Organization),
    entity("1000000003", EntityType::Organization),
  ])
  .await
  .unwrap();
  let run = s.start_run("test".into()).await.unwrap();
  let ann = s
    .apply_identities(run.run_id, batch(vec![assign(
      "1000000001",
      PersonRole::Subject,
      key("Smith", "Ann"),
    )]))
    .await
    .unwrap()
    .individuals
    .remove(0);

  s.apply_identities(run.run_id, batch(vec![IdentityAssignment {
    created: true,
    renamed_from: Some(key("Smith", "Ann")),
    ..assign("1000000001", PersonRole::Subject, key("Smith-Jones", "Ann"))
  }]))
  .await
  .unwrap();
  s.apply_parent_changes(run.run_id, vec![parent_change(
    "1000000002",
    Some("1000000003"),
    ParentChangeType::NewParent,
  )])
  .await
  .unwrap();

  let logged = s.individual_change_log(Some(run.run_id)).await.unwrap();
  assert_eq!(logged.len(), 2);
  assert_eq!(logged[0].change_type, IndividualChangeType::New);
  assert_eq!(logged[0].old_values, None);
  assert_eq!(logged[1].change_type, IndividualChangeType::Updated);
  assert_eq!(logged[1].old_values, Some(key("Smith", "Ann")));
  assert_eq!(logged[1].new_values, key("Smith-Jones", "Ann"));
  assert_ne!(logged[1].individual_id, ann.individual_id);

  let parents = s.parent_change_log(None).await.unwrap();
  assert_eq!(parents.len(), 1);
  assert_eq!(parents[0].change_type, ParentChangeType::NewParent);
  assert_eq!(parents[0].new_parent_id, Some("1000000003".into()));

  let counts = s.mark_processed().await.unwrap();
  assert_eq!(counts.individual_changes, 2);
  assert_eq!(counts.parent_changes, 1);
}

// ─── Resolution errors ───────────────────────────────────────────────────────

#[tokio::test]
async fn resolution_errors_are_replaced_for_touched_ids_only() {
  let s = store().await;
  let run = s.start_run("test".into()).await.unwrap();
  let a = RegistryId::from("1000000001");
  let b = RegistryId::from("1000000002");

  s.replace_resolution_errors(vec![a.clone(), b.clone()], vec![
    ErrorRecord::no_parent(a.clone(), "General Hospital", run.run_id),
    ErrorRecord::multi_parent(b.clone(), "County Clinic", 2, run.run_id),
  ])
  .await
  .unwrap();
  assert_eq!(s.resolution_errors(None).await.unwrap().len(), 2);

  // Re-processing `a` resolves it; `b` is untouched.
  s.replace_resolution_errors(vec![a.clone()], vec![]).await.unwrap();
  let remaining = s.resolution_errors(None).await.unwrap();
  assert_eq!(remaining.len(), 1);
  assert_eq!(remaining[0].registry_id, b);
  assert_eq!(remaining[0].kind, ErrorKind::MultiParent);
  assert!(s.resolution_errors(Some(a)).await.unwrap().is_empty());
}

// ─── Persistence ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn file_store_survives_reopen() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("registry.db");

  {
    let s = SqliteStore::open(&path).await.unwrap();
    s.upsert_entities(vec![entity("1000000001", EntityType::Individual)])
      .await
      .unwrap();
  }

  let s = SqliteStore::open(&path).await.unwrap();
  assert!(s.get_entity("1000000001".into()).await.unwrap().is_some());
}
