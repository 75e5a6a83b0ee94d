//! Tributary Store
//!
//! The orchestration authority as seen by the engine.
//!
//! The [`OrchestrationClient`] trait is the whole contract: create a run,
//! propose state transitions, read runs back, attach logs to runs. The authority owns the canonical,
//! append-only state history and may refuse a proposal; a refused proposal
//! returns the run's current state instead of the candidate, and the engine
//! reconciles from there.
//!
//! Two authorities ship with the crate:
//! - [`InMemoryAuthority`] keeps everything in process memory.
//! - [`SqliteAuthority`] persists runs and their state history with SQLite.
//!
//! Both apply the same [`evaluate_transition`] policy.

mod codec;
mod logs;
mod memory;
mod policy;
mod sqlite;
mod types;

pub use logs::{LogFilter, LogLevel, LogRecord};
pub use memory::InMemoryAuthority;
pub use policy::{Transition, evaluate_transition};
pub use sqlite::SqliteAuthority;
pub use types::{Run, RunCreate, RunFilter, RunInput, RunKind, TaskInputs};

use async_trait::async_trait;
use tributary_state::State;
use uuid::Uuid;

/// Error type for authority operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
  /// The requested run does not exist.
  #[error("run not found: {0}")]
  NotFound(Uuid),

  /// The authority could not be reached.
  #[error("orchestration authority unavailable: {message}")]
  Unavailable { message: String },

  /// A database error occurred.
  #[error("database error: {0}")]
  Database(#[from] sqlx::Error),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  /// A stored record could not be decoded.
  #[error("corrupt record: {message}")]
  Corrupt { message: String },
}

impl ClientError {
  pub fn unavailable(message: impl Into<String>) -> Self {
    Self::Unavailable {
      message: message.into(),
    }
  }

  /// Whether repeating the request may succeed.
  pub fn is_retryable(&self) -> bool {
    matches!(
      self,
      ClientError::Unavailable { .. }
        | ClientError::Database(
          sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_)
        )
    )
  }
}

/// Contract between the engine and the orchestration authority.
#[async_trait]
pub trait OrchestrationClient: Send + Sync {
  /// Create a run in the request's initial state.
  async fn create_run(&self, request: RunCreate) -> Result<Run, ClientError>;

  /// Propose a transition.
  ///
  /// Returns the accepted state, or the run's current state when the
  /// authority rejects the candidate.
  async fn propose_state(&self, run_id: Uuid, candidate: State) -> Result<State, ClientError>;

  /// Write a state without consulting the transition policy.
  ///
  /// Used for out-of-band changes such as an operator cancelling a run.
  async fn force_state(&self, run_id: Uuid, state: State) -> Result<State, ClientError>;

  async fn read_run(&self, run_id: Uuid) -> Result<Run, ClientError>;

  /// Every state the run has been in, oldest first.
  async fn read_states(&self, run_id: Uuid) -> Result<Vec<State>, ClientError>;

  async fn list_runs(&self, filter: &RunFilter) -> Result<Vec<Run>, ClientError>;

  /// Store log records emitted while runs executed.
  async fn create_logs(&self, logs: Vec<LogRecord>) -> Result<(), ClientError>;

  /// Records matching `filter`, in the order they were created.
  async fn read_logs(&self, filter: &LogFilter) -> Result<Vec<LogRecord>, ClientError>;
}
