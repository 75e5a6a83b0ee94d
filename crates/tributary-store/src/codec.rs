//! Durable form of state payloads.
//!
//! In-memory values are written through their JSON description; opaque values
//! come back as their `{"$opaque": type}` marker and errors come back as their
//! message.

use serde::{Deserialize, Serialize};
use tributary_state::{CapturedError, ResultRef, State, StateData, StateDetails, StateType, Value};

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub(crate) enum StoredData {
  Empty,
  Value { value: serde_json::Value },
  State { state: Box<StoredState> },
  States { states: Vec<StoredState> },
  Error { message: String },
  Persisted { storage_key: String },
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct StoredState {
  id: uuid::Uuid,
  state_type: StateType,
  name: String,
  message: Option<String>,
  timestamp: chrono::DateTime<chrono::Utc>,
  data: StoredData,
  #[serde(default)]
  state_details: StateDetails,
}

impl From<&StateData> for StoredData {
  fn from(data: &StateData) -> Self {
    match data {
      StateData::Empty => StoredData::Empty,
      StateData::Value(value) => StoredData::Value {
        value: value.describe(),
      },
      StateData::State(state) => StoredData::State {
        state: Box::new(StoredState::from(state.as_ref())),
      },
      StateData::States(states) => StoredData::States {
        states: states.iter().map(StoredState::from).collect(),
      },
      StateData::Error(error) => StoredData::Error {
        message: format!("{error:#}"),
      },
      StateData::Persisted(reference) => StoredData::Persisted {
        storage_key: reference.storage_key.clone(),
      },
    }
  }
}

impl From<StoredData> for StateData {
  fn from(data: StoredData) -> Self {
    match data {
      StoredData::Empty => StateData::Empty,
      StoredData::Value { value } => StateData::Value(Value::Json(value)),
      StoredData::State { state } => StateData::State(Box::new(State::from(*state))),
      StoredData::States { states } => {
        StateData::States(states.into_iter().map(State::from).collect())
      }
      StoredData::Error { message } => StateData::Error(CapturedError::from_message(message)),
      StoredData::Persisted { storage_key } => StateData::Persisted(ResultRef::new(storage_key)),
    }
  }
}

impl From<&State> for StoredState {
  fn from(state: &State) -> Self {
    Self {
      id: state.id,
      state_type: state.state_type,
      name: state.name.clone(),
      message: state.message.clone(),
      timestamp: state.timestamp,
      data: StoredData::from(&state.data),
      state_details: state.state_details.clone(),
    }
  }
}

impl From<StoredState> for State {
  fn from(stored: StoredState) -> Self {
    State {
      id: stored.id,
      state_type: stored.state_type,
      name: stored.name,
      message: stored.message,
      timestamp: stored.timestamp,
      data: StateData::from(stored.data),
      state_details: stored.state_details,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_opaque_values_are_stored_as_markers() {
    struct Handle;
    let data = StateData::Value(Value::opaque(Handle));

    let stored = serde_json::to_value(StoredData::from(&data)).unwrap();
    assert_eq!(stored["kind"], "value");
    assert!(stored["value"]["$opaque"].is_string());
  }

  #[test]
  fn test_nested_states_survive_storage() {
    let inner = State::failed("boom").with_data(Value::json(json!(1)));
    let data = StateData::States(vec![State::completed(), inner]);

    let text = serde_json::to_string(&StoredData::from(&data)).unwrap();
    let restored = StateData::from(serde_json::from_str::<StoredData>(&text).unwrap());

    let states = restored.as_states().unwrap();
    assert_eq!(states.len(), 2);
    assert_eq!(states[1].message.as_deref(), Some("boom"));
    assert_eq!(states[1].data().as_json(), Some(&json!(1)));
  }

  #[test]
  fn test_errors_are_stored_by_message() {
    let data = StateData::Error(CapturedError::from_message("bad input"));
    let text = serde_json::to_string(&StoredData::from(&data)).unwrap();
    let restored = StateData::from(serde_json::from_str::<StoredData>(&text).unwrap());

    assert_eq!(restored.as_error().unwrap().to_string(), "bad input");
  }
}
