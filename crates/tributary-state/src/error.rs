use crate::data::CapturedError;
use crate::state::StateType;

/// Errors raised when resolving a state's data.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ResultError {
  /// The callable raised; this is the original error.
  #[error(transparent)]
  Raised(CapturedError),

  #[error("run was cancelled: {message}")]
  CancelledRun { message: String },

  #[error("run is paused, its result is not available")]
  PausedRun,

  #[error("run crashed: {message}")]
  CrashedRun { message: String },

  /// A failed state that carries no captured error.
  #[error("run failed: {message}")]
  FailedRun { message: String },

  #[error("run is not finished; current state is {state_type}")]
  UnfinishedRun { state_type: StateType },

  #[error("result '{storage_key}' is persisted and not cached; fetch it from the result store")]
  MissingResult { storage_key: String },
}
