use crate::cache::KeyError;

/// Why a fetch did not produce a payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
  /// Superseded by a newer request or torn down. Never user-facing.
  #[error("request was superseded")]
  Cancelled,
  /// The transport has no such operation wired up
  #[error("operation `{operation}` is not available")]
  Unavailable { operation: String },
  /// Every attempt failed
  #[error("{operation} failed after {attempts} attempt(s): {message}")]
  Failed {
    operation: String,
    attempts: u32,
    message: String,
  },
  #[error(transparent)]
  InvalidKey(#[from] KeyError),
}

impl FetchError {
  pub fn is_cancelled(&self) -> bool {
    matches!(self, FetchError::Cancelled)
  }

  /// Short title for a user-facing notification.
  pub fn title(&self) -> &'static str {
    match self {
      FetchError::Cancelled => "Request cancelled",
      FetchError::Unavailable { .. } => "Data source unavailable",
      FetchError::Failed { .. } => "Failed to load data",
      FetchError::InvalidKey(_) => "Invalid filters",
    }
  }
}
