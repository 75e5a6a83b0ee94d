use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::state::State;
use crate::value::Value;

/// Payload carried by a state.
#[derive(Debug, Clone, Default)]
pub enum StateData {
  #[default]
  Empty,
  /// A value returned in memory.
  Value(Value),
  /// A single state returned by the callable.
  State(Box<State>),
  /// A collection of states returned by the callable.
  States(Vec<State>),
  /// An error captured from user code.
  Error(CapturedError),
  /// A result written to a result store.
  Persisted(ResultRef),
}

impl StateData {
  pub fn is_empty(&self) -> bool {
    matches!(self, StateData::Empty)
  }

  pub fn as_value(&self) -> Option<&Value> {
    match self {
      StateData::Value(value) => Some(value),
      _ => None,
    }
  }

  /// JSON payload, from an in-memory value or a cached persisted result.
  pub fn as_json(&self) -> Option<&serde_json::Value> {
    match self {
      StateData::Value(value) => value.as_json(),
      StateData::Persisted(reference) => reference.cached.as_ref(),
      _ => None,
    }
  }

  pub fn as_state(&self) -> Option<&State> {
    match self {
      StateData::State(state) => Some(state),
      _ => None,
    }
  }

  pub fn as_states(&self) -> Option<&[State]> {
    match self {
      StateData::States(states) => Some(states),
      _ => None,
    }
  }

  pub fn as_error(&self) -> Option<&CapturedError> {
    match self {
      StateData::Error(error) => Some(error),
      _ => None,
    }
  }
}

impl From<Value> for StateData {
  fn from(value: Value) -> Self {
    StateData::Value(value)
  }
}

impl From<State> for StateData {
  fn from(state: State) -> Self {
    StateData::State(Box::new(state))
  }
}

impl From<Vec<State>> for StateData {
  fn from(states: Vec<State>) -> Self {
    StateData::States(states)
  }
}

impl From<CapturedError> for StateData {
  fn from(error: CapturedError) -> Self {
    StateData::Error(error)
  }
}

impl From<ResultRef> for StateData {
  fn from(reference: ResultRef) -> Self {
    StateData::Persisted(reference)
  }
}

/// Pointer to a persisted result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRef {
  pub storage_key: String,
  /// The value as written, while it is still held in memory.
  #[serde(skip)]
  pub cached: Option<serde_json::Value>,
}

impl ResultRef {
  pub fn new(storage_key: impl Into<String>) -> Self {
    Self {
      storage_key: storage_key.into(),
      cached: None,
    }
  }
}

/// An error raised by user code, shared so states stay cheap to clone.
#[derive(Clone)]
pub struct CapturedError(Arc<anyhow::Error>);

impl CapturedError {
  pub fn new(error: anyhow::Error) -> Self {
    Self(Arc::new(error))
  }

  /// A captured error that only carries a message, e.g. one read back from storage.
  pub fn from_message(message: impl Into<String>) -> Self {
    Self::new(anyhow::anyhow!(message.into()))
  }

  pub fn downcast_ref<E>(&self) -> Option<&E>
  where
    E: fmt::Display + fmt::Debug + Send + Sync + 'static,
  {
    self.0.downcast_ref::<E>()
  }

  pub fn is<E>(&self) -> bool
  where
    E: fmt::Display + fmt::Debug + Send + Sync + 'static,
  {
    self.0.is::<E>()
  }

  pub fn inner(&self) -> &anyhow::Error {
    &self.0
  }
}

impl fmt::Debug for CapturedError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    fmt::Debug::fmt(&*self.0, f)
  }
}

impl fmt::Display for CapturedError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    fmt::Display::fmt(&*self.0, f)
  }
}

impl std::error::Error for CapturedError {
  fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
    self.0.source()
  }
}
