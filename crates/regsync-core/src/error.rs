//! Error types for `regsync-core`.

use thiserror::Error;

use crate::audit::RunStatus;

#[derive(Debug, Error)]
pub enum Error {
  #[error("invalid run transition: {from} -> {to}")]
  InvalidTransition { from: RunStatus, to: RunStatus },

  #[error("unknown {kind} discriminant: {value:?}")]
  UnknownDiscriminant { kind: &'static str, value: String },

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
