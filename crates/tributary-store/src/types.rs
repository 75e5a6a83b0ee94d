use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tributary_params::Parameters;
use tributary_state::{State, StateType};
use uuid::Uuid;

/// Whether a run belongs to a flow or a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum RunKind {
  Flow,
  Task,
}

impl RunKind {
  /// Capitalized label used in state messages.
  pub fn label(self) -> &'static str {
    match self {
      RunKind::Flow => "Flow",
      RunKind::Task => "Task",
    }
  }
}

impl fmt::Display for RunKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      RunKind::Flow => f.write_str("flow"),
      RunKind::Task => f.write_str("task"),
    }
  }
}

/// An upstream run whose state was passed to a run as a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunInput {
  pub kind: RunKind,
  pub id: Uuid,
}

impl RunInput {
  /// The run `state` was recorded for; `None` for hand-built states.
  pub fn of(state: &State) -> Option<Self> {
    let details = &state.state_details;
    match (details.task_run_id, details.flow_run_id) {
      (Some(id), _) => Some(Self {
        kind: RunKind::Task,
        id,
      }),
      (None, Some(id)) => Some(Self {
        kind: RunKind::Flow,
        id,
      }),
      (None, None) => None,
    }
  }
}

/// Upstream runs per parameter name.
pub type TaskInputs = BTreeMap<String, Vec<RunInput>>;

/// Request to create a run.
#[derive(Debug, Clone)]
pub struct RunCreate {
  pub kind: RunKind,
  pub name: String,
  pub definition_name: String,
  pub version: Option<String>,
  pub tags: BTreeSet<String>,
  pub parameters: Parameters,
  /// Enclosing flow run, for task runs.
  pub flow_run_id: Option<Uuid>,
  /// Task run this run was called from, if nested.
  pub parent_task_run_id: Option<Uuid>,
  pub dynamic_key: Option<String>,
  pub task_inputs: TaskInputs,
  /// Initial state, normally Pending.
  pub state: State,
}

impl RunCreate {
  pub fn new(kind: RunKind, definition_name: impl Into<String>) -> Self {
    let definition_name = definition_name.into();
    Self {
      kind,
      name: definition_name.clone(),
      definition_name,
      version: None,
      tags: BTreeSet::new(),
      parameters: Parameters::new(),
      flow_run_id: None,
      parent_task_run_id: None,
      dynamic_key: None,
      task_inputs: TaskInputs::new(),
      state: State::pending(),
    }
  }
}

/// A tracked run as recorded by the authority.
#[derive(Debug, Clone)]
pub struct Run {
  pub id: Uuid,
  pub kind: RunKind,
  pub name: String,
  pub definition_name: String,
  pub version: Option<String>,
  pub tags: BTreeSet<String>,
  pub parameters: Parameters,
  pub state: State,
  /// Times the run has entered Running.
  pub run_count: u32,
  pub flow_run_id: Option<Uuid>,
  pub parent_task_run_id: Option<Uuid>,
  pub dynamic_key: Option<String>,
  pub task_inputs: TaskInputs,
  pub created: DateTime<Utc>,
  pub start_time: Option<DateTime<Utc>>,
  pub end_time: Option<DateTime<Utc>>,
}

impl Run {
  /// Build a new run from a request; the initial state is stamped and recorded.
  pub fn from_request(id: Uuid, request: RunCreate) -> Self {
    let RunCreate {
      kind,
      name,
      definition_name,
      version,
      tags,
      parameters,
      flow_run_id,
      parent_task_run_id,
      dynamic_key,
      task_inputs,
      state,
    } = request;

    let mut run = Self {
      id,
      kind,
      name,
      definition_name,
      version,
      tags,
      parameters,
      state: State::pending(),
      run_count: 0,
      flow_run_id,
      parent_task_run_id,
      dynamic_key,
      task_inputs,
      created: Utc::now(),
      start_time: None,
      end_time: None,
    };
    let mut initial = state;
    run.stamp(&mut initial);
    run.record(initial);
    run
  }

  /// Link a state to this run.
  pub fn stamp(&self, state: &mut State) {
    let details = &mut state.state_details;
    match self.kind {
      RunKind::Flow => {
        details.flow_run_id = Some(self.id);
        details.task_run_id = None;
      }
      RunKind::Task => {
        details.flow_run_id = self.flow_run_id;
        details.task_run_id = Some(self.id);
      }
    }
    details.parent_task_run_id = self.parent_task_run_id;
  }

  /// Make `state` current, updating counters and timestamps.
  pub fn record(&mut self, state: State) {
    match state.state_type {
      StateType::Running => {
        self.run_count += 1;
        if self.start_time.is_none() {
          self.start_time = Some(state.timestamp);
        }
      }
      state_type if state_type.is_final() => self.end_time = Some(state.timestamp),
      _ => {}
    }
    self.state = state;
  }
}

/// Selects runs for [`crate::OrchestrationClient::list_runs`].
#[derive(Debug, Clone, Default)]
pub struct RunFilter {
  pub kind: Option<RunKind>,
  pub definition_name: Option<String>,
  pub flow_run_id: Option<Uuid>,
  pub parent_task_run_id: Option<Uuid>,
}

impl RunFilter {
  pub fn kind(mut self, kind: RunKind) -> Self {
    self.kind = Some(kind);
    self
  }

  pub fn definition_name(mut self, name: impl Into<String>) -> Self {
    self.definition_name = Some(name.into());
    self
  }

  pub fn flow_run_id(mut self, id: Uuid) -> Self {
    self.flow_run_id = Some(id);
    self
  }

  pub fn parent_task_run_id(mut self, id: Uuid) -> Self {
    self.parent_task_run_id = Some(id);
    self
  }

  pub fn matches(&self, run: &Run) -> bool {
    self.kind.is_none_or(|k| k == run.kind)
      && self
        .definition_name
        .as_deref()
        .is_none_or(|n| n == run.definition_name)
      && self.flow_run_id.is_none_or(|id| Some(id) == run.flow_run_id)
      && self
        .parent_task_run_id
        .is_none_or(|id| Some(id) == run.parent_task_run_id)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_stamp_links_task_states_to_their_flow() {
    let flow_run_id = Uuid::new_v4();
    let mut request = RunCreate::new(RunKind::Task, "fetch");
    request.flow_run_id = Some(flow_run_id);
    let run = Run::from_request(Uuid::new_v4(), request);

    assert_eq!(run.state.state_details.task_run_id, Some(run.id));
    assert_eq!(run.state.state_details.flow_run_id, Some(flow_run_id));
  }

  #[test]
  fn test_record_counts_running_entries() {
    let mut run = Run::from_request(Uuid::new_v4(), RunCreate::new(RunKind::Flow, "etl"));
    run.record(State::running());
    let first_start = run.start_time;
    run.record(State::failed("x"));
    run.record(State::running());

    assert_eq!(run.run_count, 2);
    assert_eq!(run.start_time, first_start);
    assert!(run.end_time.is_some());
  }

  #[test]
  fn test_run_input_prefers_the_task_run() {
    let flow_run_id = Uuid::new_v4();
    let mut request = RunCreate::new(RunKind::Task, "fetch");
    request.flow_run_id = Some(flow_run_id);
    let task_run = Run::from_request(Uuid::new_v4(), request);
    let flow_run = Run::from_request(flow_run_id, RunCreate::new(RunKind::Flow, "etl"));

    assert_eq!(
      RunInput::of(&task_run.state),
      Some(RunInput {
        kind: RunKind::Task,
        id: task_run.id
      })
    );
    assert_eq!(
      RunInput::of(&flow_run.state).map(|input| input.kind),
      Some(RunKind::Flow)
    );
    assert_eq!(RunInput::of(&State::completed()), None);
  }

  #[test]
  fn test_filter_matches() {
    let parent = Uuid::new_v4();
    let mut request = RunCreate::new(RunKind::Flow, "child");
    request.parent_task_run_id = Some(parent);
    let run = Run::from_request(Uuid::new_v4(), request);

    assert!(RunFilter::default().matches(&run));
    assert!(RunFilter::default().parent_task_run_id(parent).matches(&run));
    assert!(!RunFilter::default().kind(RunKind::Task).matches(&run));
    assert!(!RunFilter::default().definition_name("other").matches(&run));
  }
}
