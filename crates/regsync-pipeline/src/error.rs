//! Error type for `regsync-pipeline`.

use thiserror::Error;

use crate::phases::Phase;

#[derive(Debug, Error)]
pub enum Error {
  /// A store call failed; the run is marked FAILED with this message.
  #[error("{phase} phase failed: {source}")]
  Store {
    phase:  Phase,
    source: Box<dyn std::error::Error + Send + Sync>,
  },

  /// A domain computation failed; the run is marked FAILED the same way.
  #[error("{phase} phase failed: {source}")]
  Core {
    phase:  Phase,
    source: regsync_core::Error,
  },
}

impl Error {
  /// Adapter for `map_err` that tags a store error with the failing phase.
  pub fn store<E>(phase: Phase) -> impl FnOnce(E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    move |source| Self::Store {
      phase,
      source: Box::new(source),
    }
  }

  /// Adapter for `map_err` that tags a core error with the failing phase.
  pub fn core(phase: Phase) -> impl FnOnce(regsync_core::Error) -> Self {
    move |source| Self::Core { phase, source }
  }

  pub fn phase(&self) -> Phase {
    match self {
      Self::Store { phase, .. } | Self::Core { phase, .. } => *phase,
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
