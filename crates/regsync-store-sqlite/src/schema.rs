//! SQL schema for the registry SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- The current source snapshot, replaced wholesale on each load.
-- Key columns are broken out for querying; the full row is JSON.
CREATE TABLE IF NOT EXISTS source_records (
    row_no           INTEGER PRIMARY KEY,
    registry_id      TEXT,
    entity_type_code TEXT,
    last_update_date TEXT,
    record_json      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS entities (
    registry_id         TEXT PRIMARY KEY,
    entity_type         TEXT NOT NULL CHECK (entity_type IN ('individual', 'organization')),
    replacement_id      TEXT,
    enumeration_date    TEXT,            -- ISO 8601 date
    last_update_date    TEXT,
    deactivation_reason TEXT NOT NULL DEFAULT '',
    deactivation_date   TEXT,
    reactivation_date   TEXT,
    certification_date  TEXT
);

CREATE TABLE IF NOT EXISTS individuals (
    individual_id INTEGER PRIMARY KEY AUTOINCREMENT,
    last_name     TEXT NOT NULL,
    first_name    TEXT NOT NULL,
    middle_name   TEXT NOT NULL DEFAULT '',
    name_prefix   TEXT NOT NULL DEFAULT '',
    name_suffix   TEXT NOT NULL DEFAULT '',
    UNIQUE (last_name, first_name, middle_name, name_prefix, name_suffix)
);

CREATE TABLE IF NOT EXISTS individual_links (
    registry_id     TEXT PRIMARY KEY REFERENCES entities(registry_id),
    individual_id   INTEGER NOT NULL REFERENCES individuals(individual_id),
    sole_proprietor INTEGER NOT NULL DEFAULT 0,
    sex_code        TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS organization_links (
    registry_id            TEXT PRIMARY KEY REFERENCES entities(registry_id),
    authorized_official_id INTEGER REFERENCES individuals(individual_id),
    parent_id              TEXT REFERENCES entities(registry_id),
    CHECK (parent_id IS NULL OR parent_id != registry_id)
);

CREATE TABLE IF NOT EXISTS processing_runs (
    run_id             INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at         TEXT NOT NULL,   -- RFC 3339 UTC
    completed_at       TEXT,
    source             TEXT NOT NULL,
    source_digest      TEXT,
    status             TEXT NOT NULL
                       CHECK (status IN ('IN_PROGRESS', 'COMPLETED', 'FAILED')),
    total_classified   INTEGER NOT NULL DEFAULT 0,
    new_count          INTEGER NOT NULL DEFAULT 0,
    updated_count      INTEGER NOT NULL DEFAULT 0,
    deactivated_count  INTEGER NOT NULL DEFAULT 0,
    reactivated_count  INTEGER NOT NULL DEFAULT 0,
    skipped_missing_id INTEGER NOT NULL DEFAULT 0,
    notes              TEXT
);

-- Finished runs are immutable.
CREATE TRIGGER IF NOT EXISTS processing_runs_finished_immutable
BEFORE UPDATE ON processing_runs
WHEN OLD.status != 'IN_PROGRESS'
BEGIN
    SELECT RAISE(ABORT, 'finished runs are immutable');
END;

-- Change logs are append-only apart from the processed flag.
-- registry_id is deliberately not a foreign key: placeholder rows are
-- logged but never become entities.
CREATE TABLE IF NOT EXISTS change_log (
    change_id            INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id               INTEGER NOT NULL REFERENCES processing_runs(run_id),
    registry_id          TEXT NOT NULL,
    change_type          TEXT NOT NULL
                         CHECK (change_type IN ('NEW', 'UPDATED', 'DEACTIVATED', 'REACTIVATED')),
    old_last_update_date TEXT,
    new_last_update_date TEXT,
    change_details       TEXT NOT NULL,   -- JSON ChangeDetails
    processed            INTEGER NOT NULL DEFAULT 0,
    logged_at            TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS individual_change_log (
    change_id     INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id        INTEGER NOT NULL REFERENCES processing_runs(run_id),
    individual_id INTEGER NOT NULL REFERENCES individuals(individual_id),
    registry_id   TEXT NOT NULL,
    role          TEXT NOT NULL,
    change_type   TEXT NOT NULL CHECK (change_type IN ('NEW', 'UPDATED')),
    old_values    TEXT,                   -- JSON NameKey or NULL
    new_values    TEXT NOT NULL,          -- JSON NameKey
    processed     INTEGER NOT NULL DEFAULT 0,
    logged_at     TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS parent_change_log (
    change_id     INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id        INTEGER NOT NULL REFERENCES processing_runs(run_id),
    child_id      TEXT NOT NULL,
    old_parent_id TEXT,
    new_parent_id TEXT,
    change_type   TEXT NOT NULL
                  CHECK (change_type IN ('NEW_PARENT', 'PARENT_CHANGED', 'PARENT_REMOVED')),
    processed     INTEGER NOT NULL DEFAULT 0,
    logged_at     TEXT NOT NULL
);

-- A processed flag, once set, is never reset.
CREATE TRIGGER IF NOT EXISTS change_log_processed_sticky
BEFORE UPDATE OF processed ON change_log
WHEN OLD.processed = 1 AND NEW.processed = 0
BEGIN
    SELECT RAISE(ABORT, 'processed flag cannot be reset');
END;

CREATE TRIGGER IF NOT EXISTS individual_change_log_processed_sticky
BEFORE UPDATE OF processed ON individual_change_log
WHEN OLD.processed = 1 AND NEW.processed = 0
BEGIN
    SELECT RAISE(ABORT, 'processed flag cannot be reset');
END;

CREATE TRIGGER IF NOT EXISTS parent_change_log_processed_sticky
BEFORE UPDATE OF processed ON parent_change_log
WHEN OLD.processed = 1 AND NEW.processed = 0
BEGIN
    SELECT RAISE(ABORT, 'processed flag cannot be reset');
END;

-- Cleared and re-derived each run for the identifiers that run touched.
CREATE TABLE IF NOT EXISTS resolution_errors (
    error_id    INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id      INTEGER NOT NULL REFERENCES processing_runs(run_id),
    registry_id TEXT NOT NULL,
    error_kind  TEXT NOT NULL CHECK (error_kind IN ('NO_PARENT', 'MULTI_PARENT')),
    reason      TEXT NOT NULL,
    UNIQUE (registry_id, error_kind)
);

CREATE INDEX IF NOT EXISTS source_records_id_idx    ON source_records(registry_id);
CREATE INDEX IF NOT EXISTS change_log_processed_idx ON change_log(processed);
CREATE INDEX IF NOT EXISTS change_log_registry_idx  ON change_log(registry_id);
CREATE INDEX IF NOT EXISTS change_log_run_idx       ON change_log(run_id);
CREATE INDEX IF NOT EXISTS org_links_parent_idx     ON organization_links(parent_id);
CREATE INDEX IF NOT EXISTS processing_runs_status   ON processing_runs(status);

PRAGMA user_version = 1;
";
