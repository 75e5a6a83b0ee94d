use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::data::StateData;
use crate::error::ResultError;

/// Lifecycle position of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StateType {
  Scheduled,
  Pending,
  Running,
  Completed,
  Failed,
  Cancelled,
  Cancelling,
  Crashed,
  Paused,
}

impl StateType {
  /// Completed, Failed, Cancelled and Crashed end a run for good.
  pub fn is_final(self) -> bool {
    matches!(
      self,
      StateType::Completed | StateType::Failed | StateType::Cancelled | StateType::Crashed
    )
  }

  /// States an attempt may end in once user code has run.
  pub fn is_terminal(self) -> bool {
    self.is_final() || self == StateType::Paused
  }

  pub fn as_str(self) -> &'static str {
    match self {
      StateType::Scheduled => "SCHEDULED",
      StateType::Pending => "PENDING",
      StateType::Running => "RUNNING",
      StateType::Completed => "COMPLETED",
      StateType::Failed => "FAILED",
      StateType::Cancelled => "CANCELLED",
      StateType::Cancelling => "CANCELLING",
      StateType::Crashed => "CRASHED",
      StateType::Paused => "PAUSED",
    }
  }

  /// Display name used when a state is built without an explicit name.
  pub fn default_name(self) -> &'static str {
    match self {
      StateType::Scheduled => "Scheduled",
      StateType::Pending => "Pending",
      StateType::Running => "Running",
      StateType::Completed => "Completed",
      StateType::Failed => "Failed",
      StateType::Cancelled => "Cancelled",
      StateType::Cancelling => "Cancelling",
      StateType::Crashed => "Crashed",
      StateType::Paused => "Paused",
    }
  }
}

impl fmt::Display for StateType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for StateType {
  type Err = UnknownStateType;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let state_type = match s.to_ascii_uppercase().as_str() {
      "SCHEDULED" => StateType::Scheduled,
      "PENDING" => StateType::Pending,
      "RUNNING" => StateType::Running,
      "COMPLETED" => StateType::Completed,
      "FAILED" => StateType::Failed,
      "CANCELLED" => StateType::Cancelled,
      "CANCELLING" => StateType::Cancelling,
      "CRASHED" => StateType::Crashed,
      "PAUSED" => StateType::Paused,
      _ => return Err(UnknownStateType(s.to_string())),
    };
    Ok(state_type)
  }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown state type '{0}'")]
pub struct UnknownStateType(pub String);

/// Links a state to the run it belongs to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateDetails {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub flow_run_id: Option<Uuid>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub task_run_id: Option<Uuid>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub parent_task_run_id: Option<Uuid>,
  /// Set on a tracking task run whose state mirrors a subflow.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub child_flow_run_id: Option<Uuid>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub scheduled_time: Option<DateTime<Utc>>,
}

impl StateDetails {
  /// The run this state was recorded for, if any.
  pub fn owning_run_id(&self) -> Option<Uuid> {
    self.task_run_id.or(self.flow_run_id)
  }
}

/// An immutable snapshot of a run's lifecycle position.
#[derive(Debug, Clone)]
pub struct State {
  pub id: Uuid,
  pub state_type: StateType,
  pub name: String,
  pub message: Option<String>,
  pub timestamp: DateTime<Utc>,
  pub data: StateData,
  pub state_details: StateDetails,
}

impl State {
  pub fn new(state_type: StateType) -> Self {
    Self {
      id: Uuid::new_v4(),
      state_type,
      name: state_type.default_name().to_string(),
      message: None,
      timestamp: Utc::now(),
      data: StateData::Empty,
      state_details: StateDetails::default(),
    }
  }

  pub fn scheduled() -> Self {
    Self::new(StateType::Scheduled)
  }

  pub fn pending() -> Self {
    Self::new(StateType::Pending)
  }

  pub fn running() -> Self {
    Self::new(StateType::Running)
  }

  pub fn completed() -> Self {
    Self::new(StateType::Completed)
  }

  pub fn failed(message: impl Into<String>) -> Self {
    Self::new(StateType::Failed).with_message(message)
  }

  pub fn cancelled(message: impl Into<String>) -> Self {
    Self::new(StateType::Cancelled).with_message(message)
  }

  pub fn cancelling(message: impl Into<String>) -> Self {
    Self::new(StateType::Cancelling).with_message(message)
  }

  pub fn crashed(message: impl Into<String>) -> Self {
    Self::new(StateType::Crashed).with_message(message)
  }

  pub fn paused() -> Self {
    Self::new(StateType::Paused)
  }

  /// A failed state named `TimedOut`.
  pub fn timed_out(message: impl Into<String>) -> Self {
    Self::failed(message).with_name("TimedOut")
  }

  /// A scheduled state named `AwaitingRetry`.
  pub fn awaiting_retry(scheduled_time: DateTime<Utc>) -> Self {
    let mut state = Self::scheduled().with_name("AwaitingRetry");
    state.state_details.scheduled_time = Some(scheduled_time);
    state
  }

  pub fn with_name(mut self, name: impl Into<String>) -> Self {
    self.name = name.into();
    self
  }

  pub fn with_message(mut self, message: impl Into<String>) -> Self {
    self.message = Some(message.into());
    self
  }

  pub fn with_data(mut self, data: impl Into<StateData>) -> Self {
    self.data = data.into();
    self
  }

  pub fn with_details(mut self, details: StateDetails) -> Self {
    self.state_details = details;
    self
  }

  /// A copy carrying a new id and timestamp.
  pub fn fresh(&self) -> Self {
    Self {
      id: Uuid::new_v4(),
      timestamp: Utc::now(),
      ..self.clone()
    }
  }

  pub fn is_scheduled(&self) -> bool {
    self.state_type == StateType::Scheduled
  }

  pub fn is_pending(&self) -> bool {
    self.state_type == StateType::Pending
  }

  pub fn is_running(&self) -> bool {
    self.state_type == StateType::Running
  }

  pub fn is_completed(&self) -> bool {
    self.state_type == StateType::Completed
  }

  pub fn is_failed(&self) -> bool {
    self.state_type == StateType::Failed
  }

  pub fn is_cancelled(&self) -> bool {
    self.state_type == StateType::Cancelled
  }

  pub fn is_cancelling(&self) -> bool {
    self.state_type == StateType::Cancelling
  }

  pub fn is_crashed(&self) -> bool {
    self.state_type == StateType::Crashed
  }

  pub fn is_paused(&self) -> bool {
    self.state_type == StateType::Paused
  }

  pub fn is_final(&self) -> bool {
    self.state_type.is_final()
  }

  /// True when the state was built by hand rather than recorded for a run.
  pub fn is_detached(&self) -> bool {
    self.state_details.owning_run_id().is_none()
  }

  pub fn data(&self) -> &StateData {
    &self.data
  }

  /// Resolve the payload of this state.
  ///
  /// Completed states yield their data. Every other type yields an error:
  /// captured user errors are re-raised as [`ResultError::Raised`], failed
  /// collections surface the first inner failure, and non-final states
  /// report that the run is unfinished.
  pub fn result(&self) -> Result<StateData, ResultError> {
    match self.state_type {
      StateType::Completed => match &self.data {
        StateData::Error(error) => Err(ResultError::Raised(error.clone())),
        StateData::Persisted(reference) => match &reference.cached {
          Some(value) => Ok(StateData::Value(value.clone().into())),
          None => Err(ResultError::MissingResult {
            storage_key: reference.storage_key.clone(),
          }),
        },
        data => Ok(data.clone()),
      },
      StateType::Failed => Err(match &self.data {
        StateData::Error(error) => ResultError::Raised(error.clone()),
        StateData::State(inner) if !inner.is_completed() => inner
          .result()
          .err()
          .unwrap_or_else(|| self.failed_run()),
        StateData::States(states) => first_failure(states).unwrap_or_else(|| self.failed_run()),
        _ => self.failed_run(),
      }),
      StateType::Crashed => Err(match &self.data {
        StateData::Error(error) => ResultError::Raised(error.clone()),
        _ => ResultError::CrashedRun {
          message: self.message_or("Run crashed."),
        },
      }),
      StateType::Cancelled | StateType::Cancelling => Err(match &self.data {
        StateData::Error(error) => ResultError::Raised(error.clone()),
        _ => ResultError::CancelledRun {
          message: self.message_or("Run was cancelled."),
        },
      }),
      StateType::Paused => Err(ResultError::PausedRun),
      StateType::Scheduled | StateType::Pending | StateType::Running => {
        Err(ResultError::UnfinishedRun {
          state_type: self.state_type,
        })
      }
    }
  }

  fn failed_run(&self) -> ResultError {
    ResultError::FailedRun {
      message: self.message_or("Run failed."),
    }
  }

  fn message_or(&self, fallback: &str) -> String {
    self
      .message
      .clone()
      .unwrap_or_else(|| fallback.to_string())
  }
}

fn first_failure(states: &[State]) -> Option<ResultError> {
  states
    .iter()
    .filter(|state| !state.is_completed())
    .find_map(|state| state.result().err())
}

impl fmt::Display for State {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.message {
      Some(message) => write!(f, "{}('{}')", self.name, message),
      None => write!(f, "{}()", self.name),
    }
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;
  use crate::data::{CapturedError, ResultRef};
  use crate::value::Value;

  #[derive(Debug, thiserror::Error)]
  #[error("bad input: {0}")]
  struct BadInput(String);

  #[test]
  fn test_completed_value_resolves() {
    let state = State::completed().with_data(Value::json(json!({ "rows": 3 })));
    let data = state.result().unwrap();
    assert_eq!(data.as_json(), Some(&json!({ "rows": 3 })));
  }

  #[test]
  fn test_failed_state_reraises_original_error() {
    let error = CapturedError::new(BadInput("x".into()).into());
    let state = State::failed("boom").with_data(error);

    let ResultError::Raised(raised) = state.result().unwrap_err() else {
      panic!("expected raised error");
    };
    assert_eq!(raised.to_string(), "bad input: x");
    assert!(raised.downcast_ref::<BadInput>().is_some());
  }

  #[test]
  fn test_failed_state_without_error_keeps_data() {
    let state = State::failed("Test returned state").with_data(Value::json("hello!"));

    assert!(matches!(
      state.result(),
      Err(ResultError::FailedRun { ref message }) if message == "Test returned state"
    ));
    assert_eq!(state.data().as_json(), Some(&json!("hello!")));
  }

  #[test]
  fn test_failed_collection_surfaces_first_inner_failure() {
    let inner_error = CapturedError::new(BadInput("inner".into()).into());
    let states = vec![
      State::completed(),
      State::failed("inner failed").with_data(inner_error),
    ];
    let state = State::failed("1/2 states failed.").with_data(states);

    let ResultError::Raised(raised) = state.result().unwrap_err() else {
      panic!("expected raised error");
    };
    assert_eq!(raised.to_string(), "bad input: inner");
  }

  #[test]
  fn test_cancelled_and_paused_states_do_not_resolve() {
    assert!(matches!(
      State::cancelled("stop").result(),
      Err(ResultError::CancelledRun { .. })
    ));
    let paused = State::paused().result().unwrap_err();
    assert!(paused.to_string().contains("result is not available"));
  }

  #[test]
  fn test_running_state_is_unfinished() {
    assert!(matches!(
      State::running().result(),
      Err(ResultError::UnfinishedRun {
        state_type: StateType::Running
      })
    ));
  }

  #[test]
  fn test_persisted_result_requires_cache() {
    let cached = State::completed().with_data(ResultRef {
      storage_key: "abc".into(),
      cached: Some(json!(1)),
    });
    assert_eq!(cached.result().unwrap().as_json(), Some(&json!(1)));

    let uncached = State::completed().with_data(ResultRef::new("abc"));
    assert!(matches!(
      uncached.result(),
      Err(ResultError::MissingResult { ref storage_key }) if storage_key == "abc"
    ));
  }

  #[test]
  fn test_fresh_copy_has_new_identity() {
    let state = State::failed("x").with_name("TimedOut");
    let copy = state.fresh();
    assert_ne!(state.id, copy.id);
    assert_eq!(copy.name, "TimedOut");
    assert_eq!(copy.message.as_deref(), Some("x"));
  }

  #[test]
  fn test_detached_until_linked_to_a_run() {
    let mut state = State::completed();
    assert!(state.is_detached());
    state.state_details.task_run_id = Some(Uuid::new_v4());
    assert!(!state.is_detached());
  }

  #[test]
  fn test_state_type_round_trips_through_text() {
    assert_eq!("cancelling".parse::<StateType>(), Ok(StateType::Cancelling));
    assert_eq!(StateType::Crashed.as_str().parse::<StateType>(), Ok(StateType::Crashed));
    assert!("DONE".parse::<StateType>().is_err());
  }

  #[test]
  fn test_display() {
    assert_eq!(State::timed_out("late").to_string(), "TimedOut('late')");
    assert_eq!(State::completed().to_string(), "Completed()");
  }
}
