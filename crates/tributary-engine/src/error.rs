use std::path::PathBuf;

use tributary_params::{BindError, SignatureError};
use tributary_state::{CapturedError, ResultError, State};
use tributary_storage::StorageError;
use uuid::Uuid;

/// Malformed flow or task configuration, raised when a definition is built.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DefinitionError {
  #[error("name '{name}' contains an invalid character; '/', '%', '&', '>' and '<' are not allowed")]
  InvalidName { name: String },

  #[error("'{name}' is a reserved argument name and cannot be used as a parameter")]
  ReservedArgument { name: String },

  #[error("Empty list passed for '{hook}'")]
  EmptyHookList { hook: &'static str },

  #[error("duplicate parameter name '{name}'")]
  DuplicateParameter { name: String },

  #[error("invalid signature for '{name}'")]
  InvalidSignature {
    name: String,
    #[source]
    source: SignatureError,
  },

  #[error("'{name}' has no body; call `.sync(..)` or `.asynchronous(..)` before building")]
  MissingBody { name: String },

  #[error("invalid retry delay: {message}")]
  InvalidRetryDelay { message: String },
}

/// Errors raised by the engine itself rather than by user code.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
  /// The process was asked to terminate while a run was active. The run has
  /// already been resolved to Cancelled or Crashed.
  #[error("termination signal received")]
  TerminationSignal,

  #[error("no active run; nested calls must be made from inside a flow or task")]
  NoActiveRun,

  #[error("no tokio runtime is available for a blocking call")]
  NoRuntime,

  #[error("failed to bind arguments for '{name}'")]
  Bind {
    name: String,
    #[source]
    source: BindError,
  },

  #[error("failed to render run name for '{name}': {message}")]
  RunName { name: String, message: String },

  /// A nested call was refused because the enclosing run stopped executing.
  #[error("run {run_id} was interrupted: {reason}")]
  RunInterrupted { run_id: Uuid, reason: String },

  #[error("failed to read persisted result")]
  Storage {
    #[source]
    source: StorageError,
  },
}

/// Error returned by calls that resolve the run's result.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
  #[error(transparent)]
  Engine(#[from] EngineError),

  /// The run finished without a result; `source` is what resolving the
  /// state raised.
  #[error("call ended in state {}", state.name)]
  Run {
    state: Box<State>,
    #[source]
    source: ResultError,
  },
}

impl CallError {
  /// The final state of the run, when the run got that far.
  pub fn state(&self) -> Option<&State> {
    match self {
      CallError::Run { state, .. } => Some(state),
      CallError::Engine(_) => None,
    }
  }
}

/// A result that cannot be passed on as a body's output.
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
  #[error("result '{storage_key}' is persisted and not cached; resolve it with the engine first")]
  Unresolved { storage_key: String },

  #[error("a captured error is not a value")]
  Captured(#[source] CapturedError),
}

/// Raised by user code to end its run as Cancelled.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct Cancellation {
  pub message: String,
}

impl Cancellation {
  pub fn new(message: impl Into<String>) -> Self {
    Self {
      message: message.into(),
    }
  }
}

/// Data of a TimedOut state.
#[derive(Debug, Clone, thiserror::Error)]
#[error("run exceeded timeout of {seconds} seconds")]
pub struct RunTimeout {
  pub seconds: f64,
}

/// A source file could not be read or parsed.
#[derive(Debug, thiserror::Error)]
#[error("failed to load script at '{}'", path.display())]
pub struct ScriptError {
  pub path: PathBuf,
  #[source]
  pub source: Box<dyn std::error::Error + Send + Sync>,
}

/// Errors loading a definition from an entrypoint.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
  #[error(transparent)]
  Script(#[from] ScriptError),

  #[error("invalid entrypoint '{entrypoint}': expected 'path:object' or 'module.object'")]
  InvalidEntrypoint { entrypoint: String },

  #[error("'{object}' not found in '{location}'")]
  MissingObject { location: String, object: String },

  #[error("no callable registered as '{target}'")]
  UnknownCallable { target: String },

  #[error("invalid configuration for '{object}': {message}")]
  InvalidConfig { object: String, message: String },

  #[error("failed to pull code")]
  Storage {
    #[source]
    source: StorageError,
  },

  #[error("invalid definition '{object}'")]
  Definition {
    object: String,
    #[source]
    source: DefinitionError,
  },
}
