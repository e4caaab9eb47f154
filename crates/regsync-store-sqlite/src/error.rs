//! Error type for `regsync-store-sqlite`.

use regsync_core::audit::{RunId, RunStatus};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] regsync_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  /// A stored column could not be decoded into its domain type.
  #[error("decode error: {0}")]
  Decode(String),

  #[error("run not found: {0}")]
  RunNotFound(RunId),

  /// Finished runs are immutable.
  #[error("run {run_id} is {status}, not IN_PROGRESS")]
  RunNotInProgress { run_id: RunId, status: RunStatus },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
