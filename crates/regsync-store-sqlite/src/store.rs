//! [`SqliteStore`] — the SQLite implementation of [`RegistryStore`].

use std::{collections::HashMap, path::Path};

use chrono::Utc;
use rusqlite::{OptionalExtension as _, params};

use regsync_core::{
  audit::{
    ChangeDetails, ChangeLogEntry, ErrorRecord, IndividualChangeLogEntry, NewChange,
    NewParentChange, ParentChangeLogEntry, ProcessedCounts, ProcessingRun, RunCompletion,
    RunId, RunStats, RunStatus,
  },
  entity::{Entity, Individual, IndividualLink, OrganizationLink, RegistryId},
  identity::{IdentityApplied, IdentityBatch},
  source::{EntityType, PersonRole, SourceRecord},
  store::{IntegrityReport, RegistryStore, TargetState},
};

use crate::{
  Error, Result,
  encode::{
    CHANGE_COLUMNS, ENTITY_COLUMNS, INDIVIDUAL_CHANGE_COLUMNS, INDIVIDUAL_COLUMNS,
    PARENT_CHANGE_COLUMNS, RUN_COLUMNS, RawChange, RawEntity, RawErrorRecord,
    RawIndividualChange, RawParentChange, RawRun, decode_count, decode_enum,
    encode_count, encode_date, encode_dt, individual_from_row,
    individual_link_from_row, organization_link_from_row,
  },
  schema::SCHEMA,
};

const STALE_RUN_NOTE: &str = "abandoned while IN_PROGRESS; superseded by a newer run";

// ─── Store ───────────────────────────────────────────────────────────────────

/// A registry store backed by a single SQLite file.
///
/// Cloning is cheap — the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store — useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Move an `IN_PROGRESS` run to `status`, recomputing its counts from its
  /// own change-log rows.
  async fn finish_run(
    &self,
    run_id: RunId,
    status: RunStatus,
    completion: RunCompletion,
  ) -> Result<ProcessingRun> {
    let id         = run_id.0;
    let status_str = status.as_ref().to_owned();
    let at_str     = encode_dt(Utc::now());
    let digest     = completion.source_digest;
    let skipped    = encode_count(completion.skipped_missing_id);
    let notes      = completion.notes;

    let prior: Option<String> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let prior: Option<String> = tx
          .query_row(
            "SELECT status FROM processing_runs WHERE run_id = ?1",
            params![id],
            |r| r.get(0),
          )
          .optional()?;

        if prior.as_deref() == Some(RunStatus::InProgress.as_ref()) {
          tx.execute(
            "UPDATE processing_runs SET
               (total_classified, new_count, updated_count,
                deactivated_count, reactivated_count) = (
                 SELECT COUNT(*),
                        COUNT(*) FILTER (WHERE change_type = 'NEW'),
                        COUNT(*) FILTER (WHERE change_type = 'UPDATED'),
                        COUNT(*) FILTER (WHERE change_type = 'DEACTIVATED'),
                        COUNT(*) FILTER (WHERE change_type = 'REACTIVATED')
                 FROM change_log WHERE run_id = ?1
               ),
               status             = ?2,
               completed_at       = ?3,
               source_digest      = COALESCE(?4, source_digest),
               skipped_missing_id = ?5,
               notes              = ?6
             WHERE run_id = ?1",
            params![id, status_str, at_str, digest, skipped, notes],
          )?;
        }
        tx.commit()?;
        Ok(prior)
      })
      .await?;

    let Some(prior) = prior else {
      return Err(Error::RunNotFound(run_id));
    };
    let prior: RunStatus = decode_enum("run status", &prior)?;
    prior
      .transition(status)
      .map_err(|_| Error::RunNotInProgress { run_id, status: prior })?;

    self.get_run(run_id).await?.ok_or(Error::RunNotFound(run_id))
  }

  async fn query_runs(&self, sql: String, limit: i64) -> Result<Vec<ProcessingRun>> {
    let raws: Vec<RawRun> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(params![limit], RawRun::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawRun::into_run).collect()
  }
}

#[cfg(test)]
impl SqliteStore {
  /// Run one raw statement, bypassing the store API.
  pub(crate) async fn execute_raw(&self, sql: &'static str) -> Result<usize> {
    Ok(self.conn.call(move |conn| Ok(conn.execute(sql, [])?)).await?)
  }
}

// ─── RegistryStore impl ──────────────────────────────────────────────────────

impl RegistryStore for SqliteStore {
  type Error = Error;

  // ── Runs ──────────────────────────────────────────────────────────────────

  async fn start_run(&self, source: String) -> Result<ProcessingRun> {
    let started_at = Utc::now();
    let at_str     = encode_dt(started_at);
    let src        = source.clone();

    let run_id = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute(
          "UPDATE processing_runs
           SET status = 'FAILED', completed_at = ?1, notes = ?2
           WHERE status = 'IN_PROGRESS'",
          params![at_str, STALE_RUN_NOTE],
        )?;
        tx.execute(
          "INSERT INTO processing_runs (started_at, source, status)
           VALUES (?1, ?2, 'IN_PROGRESS')",
          params![at_str, src],
        )?;
        let run_id = tx.last_insert_rowid();
        tx.commit()?;
        Ok(run_id)
      })
      .await?;

    Ok(ProcessingRun {
      run_id: RunId(run_id),
      started_at,
      completed_at: None,
      source,
      source_digest: None,
      status: RunStatus::InProgress,
      stats: RunStats::default(),
      notes: None,
    })
  }

  async fn current_run(&self) -> Result<Option<ProcessingRun>> {
    let sql = format!(
      "SELECT {RUN_COLUMNS} FROM processing_runs
       WHERE status = 'IN_PROGRESS' ORDER BY run_id DESC LIMIT ?1"
    );
    Ok(self.query_runs(sql, 1).await?.into_iter().next())
  }

  async fn complete_run(
    &self,
    run_id: RunId,
    completion: RunCompletion,
  ) -> Result<ProcessingRun> {
    self.finish_run(run_id, RunStatus::Completed, completion).await
  }

  async fn fail_run(&self, run_id: RunId, reason: String) -> Result<ProcessingRun> {
    let completion = RunCompletion {
      notes: Some(reason),
      ..Default::default()
    };
    self.finish_run(run_id, RunStatus::Failed, completion).await
  }

  async fn get_run(&self, run_id: RunId) -> Result<Option<ProcessingRun>> {
    let id = run_id.0;

    let raw: Option<RawRun> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            &format!("SELECT {RUN_COLUMNS} FROM processing_runs WHERE run_id = ?1"),
            params![id],
            RawRun::from_row,
          )
          .optional()?)
      })
      .await?;

    raw.map(RawRun::into_run).transpose()
  }

  async fn list_runs(&self, limit: usize) -> Result<Vec<ProcessingRun>> {
    let sql = format!(
      "SELECT {RUN_COLUMNS} FROM processing_runs ORDER BY run_id DESC LIMIT ?1"
    );
    self
      .query_runs(sql, i64::try_from(limit).unwrap_or(i64::MAX))
      .await
  }

  // ── Source snapshot ───────────────────────────────────────────────────────

  async fn replace_snapshot(&self, records: Vec<SourceRecord>) -> Result<usize> {
    let rows = records
      .iter()
      .map(|r| {
        Ok((
          r.registry_id.as_ref().map(|id| id.as_str().to_owned()),
          r.entity_type_code.clone(),
          encode_date(r.last_update_date),
          serde_json::to_string(r)?,
        ))
      })
      .collect::<Result<Vec<_>>>()?;

    let count = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM source_records", [])?;
        {
          let mut stmt = tx.prepare(
            "INSERT INTO source_records
               (row_no, registry_id, entity_type_code, last_update_date, record_json)
             VALUES (?1, ?2, ?3, ?4, ?5)",
          )?;
          for (row_no, (id, type_code, updated, json)) in (1_i64..).zip(&rows) {
            stmt.execute(params![row_no, id, type_code, updated, json])?;
          }
        }
        tx.commit()?;
        Ok(rows.len())
      })
      .await?;

    Ok(count)
  }

  async fn load_snapshot(&self) -> Result<Vec<SourceRecord>> {
    let rows: Vec<String> = self
      .conn
      .call(|conn| {
        let mut stmt =
          conn.prepare("SELECT record_json FROM source_records ORDER BY row_no")?;
        let rows = stmt
          .query_map([], |r| r.get(0))?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    rows
      .iter()
      .map(|json| Ok(serde_json::from_str(json)?))
      .collect()
  }

  // ── Target state ──────────────────────────────────────────────────────────

  async fn load_target(&self) -> Result<TargetState> {
    let (raw_entities, individuals, individual_links, organization_links) = self
      .conn
      .call(|conn| {
        // One read transaction so all four tables come from the same state.
        let tx = conn.transaction()?;
        let entities = tx
          .prepare(&format!(
            "SELECT {ENTITY_COLUMNS} FROM entities ORDER BY registry_id"
          ))?
          .query_map([], RawEntity::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        let individuals = tx
          .prepare(&format!(
            "SELECT {INDIVIDUAL_COLUMNS} FROM individuals ORDER BY individual_id"
          ))?
          .query_map([], individual_from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        let individual_links = tx
          .prepare(
            "SELECT registry_id, individual_id, sole_proprietor, sex_code
             FROM individual_links ORDER BY registry_id",
          )?
          .query_map([], individual_link_from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        let organization_links = tx
          .prepare(
            "SELECT registry_id, authorized_official_id, parent_id
             FROM organization_links ORDER BY registry_id",
          )?
          .query_map([], organization_link_from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        tx.commit()?;
        Ok((entities, individuals, individual_links, organization_links))
      })
      .await?;

    Ok(TargetState {
      entities: raw_entities
        .into_iter()
        .map(RawEntity::into_entity)
        .collect::<Result<_>>()?,
      individuals,
      individual_links,
      organization_links,
    })
  }

  async fn get_entity(&self, registry_id: RegistryId) -> Result<Option<Entity>> {
    let id = registry_id.as_str().to_owned();

    let raw: Option<RawEntity> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            &format!("SELECT {ENTITY_COLUMNS} FROM entities WHERE registry_id = ?1"),
            params![id],
            RawEntity::from_row,
          )
          .optional()?)
      })
      .await?;

    raw.map(RawEntity::into_entity).transpose()
  }

  async fn upsert_entities(&self, entities: Vec<Entity>) -> Result<usize> {
    let count = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        {
          let mut stmt = tx.prepare(
            "INSERT INTO entities (
               registry_id, entity_type, replacement_id, enumeration_date,
               last_update_date, deactivation_reason, deactivation_date,
               reactivation_date, certification_date
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT (registry_id) DO UPDATE SET
               entity_type         = excluded.entity_type,
               replacement_id      = excluded.replacement_id,
               enumeration_date    = excluded.enumeration_date,
               last_update_date    = excluded.last_update_date,
               deactivation_reason = excluded.deactivation_reason,
               deactivation_date   = excluded.deactivation_date,
               reactivation_date   = excluded.reactivation_date,
               certification_date  = excluded.certification_date",
          )?;
          // Only the link kind matching the entity type may survive.
          let mut clear_org =
            tx.prepare("DELETE FROM organization_links WHERE registry_id = ?1")?;
          let mut clear_individual =
            tx.prepare("DELETE FROM individual_links WHERE registry_id = ?1")?;
          for e in &entities {
            let clear = match e.entity_type {
              EntityType::Individual => &mut clear_org,
              EntityType::Organization => &mut clear_individual,
            };
            clear.execute(params![e.registry_id.as_str()])?;
            stmt.execute(params![
              e.registry_id.as_str(),
              e.entity_type.as_ref(),
              e.replacement_id.as_ref().map(RegistryId::as_str),
              encode_date(e.enumeration_date),
              encode_date(e.last_update_date),
              e.deactivation_reason,
              encode_date(e.deactivation_date),
              encode_date(e.reactivation_date),
              encode_date(e.certification_date),
            ])?;
          }
        }
        tx.commit()?;
        Ok(entities.len())
      })
      .await?;

    Ok(count)
  }

  // ── Individuals ───────────────────────────────────────────────────────────

  async fn list_individuals(&self) -> Result<Vec<Individual>> {
    let individuals = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {INDIVIDUAL_COLUMNS} FROM individuals ORDER BY individual_id"
        ))?;
        let rows = stmt
          .query_map([], individual_from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    Ok(individuals)
  }

  async fn apply_identities(
    &self,
    run_id: RunId,
    batch: IdentityBatch,
  ) -> Result<IdentityApplied> {
    let at_str = encode_dt(Utc::now());
    let run    = run_id.0;
    let keys   = batch.keys();
    let logged = batch
      .assignments
      .iter()
      .map(|a| {
        let new_values = serde_json::to_string(&a.key)?;
        a.change_kinds()
          .into_iter()
          .map(|(change_type, old)| {
            Ok((
              change_type.as_ref().to_owned(),
              old.map(serde_json::to_string).transpose()?,
              new_values.clone(),
            ))
          })
          .collect::<Result<Vec<_>>>()
      })
      .collect::<Result<Vec<_>>>()?;
    let rows: Vec<_> = batch
      .assignments
      .iter()
      .zip(logged)
      .map(|(a, logged)| {
        (
          a.registry_id.as_str().to_owned(),
          a.role,
          a.role.as_ref().to_owned(),
          keys.binary_search(&a.key),
          a.sole_proprietor,
          a.sex_code.clone(),
          logged,
        )
      })
      .collect();
    let vacated: Vec<String> = batch
      .vacated_officials
      .iter()
      .map(|id| id.as_str().to_owned())
      .collect();

    let (individuals, created) = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let mut individuals = Vec::with_capacity(keys.len());
        let mut created = 0;
        {
          let mut insert = tx.prepare(
            "INSERT INTO individuals
               (last_name, first_name, middle_name, name_prefix, name_suffix)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (last_name, first_name, middle_name, name_prefix, name_suffix)
             DO NOTHING",
          )?;
          let mut select = tx.prepare(&format!(
            "SELECT {INDIVIDUAL_COLUMNS} FROM individuals
             WHERE last_name = ?1 AND first_name = ?2 AND middle_name = ?3
               AND name_prefix = ?4 AND name_suffix = ?5"
          ))?;
          for key in &keys {
            created += insert.execute(params![
              key.last, key.first, key.middle, key.prefix, key.suffix
            ])?;
            individuals.push(select.query_row(
              params![key.last, key.first, key.middle, key.prefix, key.suffix],
              individual_from_row,
            )?);
          }

          let mut clear_org =
            tx.prepare("DELETE FROM organization_links WHERE registry_id = ?1")?;
          let mut clear_individual =
            tx.prepare("DELETE FROM individual_links WHERE registry_id = ?1")?;
          let mut link = tx.prepare(
            "INSERT INTO individual_links
               (registry_id, individual_id, sole_proprietor, sex_code)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (registry_id) DO UPDATE SET
               individual_id   = excluded.individual_id,
               sole_proprietor = excluded.sole_proprietor,
               sex_code        = excluded.sex_code",
          )?;
          let mut official = tx.prepare(
            "INSERT INTO organization_links (registry_id, authorized_official_id)
             VALUES (?1, ?2)
             ON CONFLICT (registry_id) DO UPDATE SET
               authorized_official_id = excluded.authorized_official_id",
          )?;
          let mut log = tx.prepare(
            "INSERT INTO individual_change_log (
               run_id, individual_id, registry_id, role, change_type,
               old_values, new_values, logged_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
          )?;

          for (id, role, role_str, slot, sole_proprietor, sex_code, logged) in &rows {
            let Some(individual) = slot.ok().and_then(|i| individuals.get(i)) else {
              continue;
            };
            let individual_id = individual.individual_id.0;
            match role {
              PersonRole::Subject => {
                clear_org.execute(params![id])?;
                link.execute(params![id, individual_id, sole_proprietor, sex_code])?;
              }
              PersonRole::AuthorizedOfficial => {
                clear_individual.execute(params![id])?;
                official.execute(params![id, individual_id])?;
              }
            }
            for (change_type, old, new) in logged {
              log.execute(params![
                run,
                individual_id,
                id,
                role_str,
                change_type,
                old,
                new,
                at_str
              ])?;
            }
          }

          for id in &vacated {
            clear_individual.execute(params![id])?;
            official.execute(params![id, Option::<i64>::None])?;
          }
        }
        tx.commit()?;
        Ok((individuals, created))
      })
      .await?;

    let changes = batch.changes(&individuals);
    Ok(IdentityApplied { individuals, created, changes })
  }

  async fn apply_parent_changes(
    &self,
    run_id: RunId,
    changes: Vec<NewParentChange>,
  ) -> Result<usize> {
    let at_str = encode_dt(Utc::now());
    let run    = run_id.0;

    let count = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        {
          let mut clear =
            tx.prepare("DELETE FROM individual_links WHERE registry_id = ?1")?;
          let mut upsert = tx.prepare(
            "INSERT INTO organization_links (registry_id, parent_id)
             VALUES (?1, ?2)
             ON CONFLICT (registry_id) DO UPDATE SET parent_id = excluded.parent_id",
          )?;
          let mut log = tx.prepare(
            "INSERT INTO parent_change_log (
               run_id, child_id, old_parent_id, new_parent_id, change_type, logged_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
          )?;
          for c in &changes {
            let child = c.child_id.as_str();
            let new_parent = c.new_parent_id.as_ref().map(RegistryId::as_str);
            clear.execute(params![child])?;
            upsert.execute(params![child, new_parent])?;
            log.execute(params![
              run,
              child,
              c.old_parent_id.as_ref().map(RegistryId::as_str),
              new_parent,
              c.change_type.as_ref(),
              at_str,
            ])?;
          }
        }
        tx.commit()?;
        Ok(changes.len())
      })
      .await?;

    Ok(count)
  }

  // ── Links ─────────────────────────────────────────────────────────────────

  async fn get_individual_link(
    &self,
    registry_id: RegistryId,
  ) -> Result<Option<IndividualLink>> {
    let id = registry_id.as_str().to_owned();

    let link = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            "SELECT registry_id, individual_id, sole_proprietor, sex_code
             FROM individual_links WHERE registry_id = ?1",
            params![id],
            individual_link_from_row,
          )
          .optional()?)
      })
      .await?;

    Ok(link)
  }

  async fn get_organization_link(
    &self,
    registry_id: RegistryId,
  ) -> Result<Option<OrganizationLink>> {
    let id = registry_id.as_str().to_owned();

    let link = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            "SELECT registry_id, authorized_official_id, parent_id
             FROM organization_links WHERE registry_id = ?1",
            params![id],
            organization_link_from_row,
          )
          .optional()?)
      })
      .await?;

    Ok(link)
  }

  // ── Audit trail ───────────────────────────────────────────────────────────

  async fn record_changes(
    &self,
    run_id: RunId,
    changes: Vec<NewChange>,
  ) -> Result<Vec<ChangeLogEntry>> {
    let logged_at = Utc::now();
    let at_str    = encode_dt(logged_at);
    let details   = changes
      .iter()
      .map(|c| serde_json::to_string(&c.details))
      .collect::<Result<Vec<_>, _>>()?;
    let rows: Vec<_> = changes
      .iter()
      .zip(details)
      .map(|(c, json)| {
        (
          c.registry_id.as_str().to_owned(),
          c.change_type.as_ref().to_owned(),
          encode_date(c.old_last_update_date),
          encode_date(c.new_last_update_date),
          json,
        )
      })
      .collect();
    let run = run_id.0;

    let ids: Vec<i64> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let mut ids = Vec::with_capacity(rows.len());
        {
          let mut stmt = tx.prepare(
            "INSERT INTO change_log (
               run_id, registry_id, change_type, old_last_update_date,
               new_last_update_date, change_details, logged_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
          )?;
          for (id, change_type, old, new, json) in &rows {
            stmt.execute(params![run, id, change_type, old, new, json, at_str])?;
            ids.push(tx.last_insert_rowid());
          }
        }
        tx.commit()?;
        Ok(ids)
      })
      .await?;

    Ok(
      changes
        .into_iter()
        .zip(ids)
        .map(|(c, change_id)| ChangeLogEntry {
          change_id,
          run_id,
          registry_id: c.registry_id,
          change_type: c.change_type,
          old_last_update_date: c.old_last_update_date,
          new_last_update_date: c.new_last_update_date,
          details: c.details,
          processed: false,
          logged_at,
        })
        .collect(),
    )
  }

  async fn unprocessed_changes(&self) -> Result<Vec<ChangeLogEntry>> {
    let raws: Vec<RawChange> = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {CHANGE_COLUMNS} FROM change_log WHERE processed = 0 ORDER BY change_id"
        ))?;
        let rows = stmt
          .query_map([], RawChange::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawChange::into_entry).collect()
  }

  async fn latest_change_details(
    &self,
    registry_ids: Vec<RegistryId>,
  ) -> Result<HashMap<RegistryId, ChangeDetails>> {
    let rows: Vec<(String, String)> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT change_details FROM change_log
           WHERE registry_id = ?1 ORDER BY change_id DESC LIMIT 1",
        )?;
        let mut rows = Vec::new();
        for id in &registry_ids {
          let details: Option<String> = stmt
            .query_row(params![id.as_str()], |r| r.get(0))
            .optional()?;
          if let Some(details) = details {
            rows.push((id.as_str().to_owned(), details));
          }
        }
        Ok(rows)
      })
      .await?;

    rows
      .into_iter()
      .map(|(id, json)| Ok((RegistryId::new(id), serde_json::from_str(&json)?)))
      .collect()
  }

  async fn change_log(&self, run_id: Option<RunId>) -> Result<Vec<ChangeLogEntry>> {
    let run = run_id.map(|r| r.0);

    let raws: Vec<RawChange> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {CHANGE_COLUMNS} FROM change_log
           WHERE (?1 IS NULL OR run_id = ?1) ORDER BY change_id"
        ))?;
        let rows = stmt
          .query_map(params![run], RawChange::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawChange::into_entry).collect()
  }

  async fn individual_change_log(
    &self,
    run_id: Option<RunId>,
  ) -> Result<Vec<IndividualChangeLogEntry>> {
    let run = run_id.map(|r| r.0);

    let raws: Vec<RawIndividualChange> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {INDIVIDUAL_CHANGE_COLUMNS} FROM individual_change_log
           WHERE (?1 IS NULL OR run_id = ?1) ORDER BY change_id"
        ))?;
        let rows = stmt
          .query_map(params![run], RawIndividualChange::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawIndividualChange::into_entry).collect()
  }

  async fn parent_change_log(
    &self,
    run_id: Option<RunId>,
  ) -> Result<Vec<ParentChangeLogEntry>> {
    let run = run_id.map(|r| r.0);

    let raws: Vec<RawParentChange> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {PARENT_CHANGE_COLUMNS} FROM parent_change_log
           WHERE (?1 IS NULL OR run_id = ?1) ORDER BY change_id"
        ))?;
        let rows = stmt
          .query_map(params![run], RawParentChange::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawParentChange::into_entry).collect()
  }

  async fn mark_processed(&self) -> Result<ProcessedCounts> {
    let (changes, individual_changes, parent_changes) = self
      .conn
      .call(|conn| {
        let tx = conn.transaction()?;
        let changes = tx.execute(
          "UPDATE change_log SET processed = 1 WHERE processed = 0",
          [],
        )?;
        let individual_changes = tx.execute(
          "UPDATE individual_change_log SET processed = 1 WHERE processed = 0",
          [],
        )?;
        let parent_changes = tx.execute(
          "UPDATE parent_change_log SET processed = 1 WHERE processed = 0",
          [],
        )?;
        tx.commit()?;
        Ok((changes, individual_changes, parent_changes))
      })
      .await?;

    Ok(ProcessedCounts {
      changes:            changes as u64,
      individual_changes: individual_changes as u64,
      parent_changes:     parent_changes as u64,
    })
  }

  // ── Resolution errors ─────────────────────────────────────────────────────

  async fn replace_resolution_errors(
    &self,
    touched: Vec<RegistryId>,
    errors: Vec<ErrorRecord>,
  ) -> Result<usize> {
    let count = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        {
          let mut clear = tx.prepare(
            "DELETE FROM resolution_errors
             WHERE registry_id = ?1 AND error_kind IN ('NO_PARENT', 'MULTI_PARENT')",
          )?;
          for id in &touched {
            clear.execute(params![id.as_str()])?;
          }
          let mut insert = tx.prepare(
            "INSERT INTO resolution_errors (run_id, registry_id, error_kind, reason)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (registry_id, error_kind) DO UPDATE SET
               run_id = excluded.run_id,
               reason = excluded.reason",
          )?;
          for e in &errors {
            insert.execute(params![
              e.run_id.0,
              e.registry_id.as_str(),
              e.kind.as_ref(),
              e.reason,
            ])?;
          }
        }
        tx.commit()?;
        Ok(errors.len())
      })
      .await?;

    Ok(count)
  }

  async fn resolution_errors(
    &self,
    registry_id: Option<RegistryId>,
  ) -> Result<Vec<ErrorRecord>> {
    let id = registry_id.map(|id| id.as_str().to_owned());

    let raws: Vec<RawErrorRecord> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT registry_id, error_kind, reason, run_id FROM resolution_errors
           WHERE (?1 IS NULL OR registry_id = ?1)
           ORDER BY registry_id, error_kind",
        )?;
        let rows = stmt
          .query_map(params![id], RawErrorRecord::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawErrorRecord::into_record).collect()
  }

  // ── Integrity ─────────────────────────────────────────────────────────────

  async fn verify_integrity(&self) -> Result<IntegrityReport> {
    let counts: [i64; 4] = self
      .conn
      .call(|conn| {
        Ok(conn.query_row(
          "SELECT
             (SELECT COUNT(*) FROM individual_links l
                JOIN entities e ON e.registry_id = l.registry_id
               WHERE e.entity_type != 'individual'),
             (SELECT COUNT(*) FROM organization_links l
                JOIN entities e ON e.registry_id = l.registry_id
               WHERE e.entity_type != 'organization'),
             (SELECT COUNT(*) FROM individual_links i
                JOIN organization_links o ON o.registry_id = i.registry_id),
             (SELECT COUNT(*) FROM individual_links l
               WHERE NOT EXISTS (SELECT 1 FROM entities e WHERE e.registry_id = l.registry_id)
                  OR NOT EXISTS (SELECT 1 FROM individuals i
                                  WHERE i.individual_id = l.individual_id))
             + (SELECT COUNT(*) FROM organization_links l
               WHERE NOT EXISTS (SELECT 1 FROM entities e WHERE e.registry_id = l.registry_id)
                  OR (l.authorized_official_id IS NOT NULL
                      AND NOT EXISTS (SELECT 1 FROM individuals i
                                       WHERE i.individual_id = l.authorized_official_id))
                  OR (l.parent_id IS NOT NULL
                      AND NOT EXISTS (SELECT 1 FROM entities p
                                       WHERE p.registry_id = l.parent_id)))",
          [],
          |r| Ok([r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?]),
        )?)
      })
      .await?;

    Ok(IntegrityReport {
      individual_links_on_organizations: decode_count(counts[0]),
      organization_links_on_individuals: decode_count(counts[1]),
      entities_with_both_links:          decode_count(counts[2]),
      dangling_links:                    decode_count(counts[3]),
    })
  }
}
