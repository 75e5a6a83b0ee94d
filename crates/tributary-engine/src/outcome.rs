//! Turns an execution into the state proposed for the run.

use tributary_state::{CapturedError, ResultError, State, StateData, StateGroup, Value};
use tributary_store::RunKind;

use crate::adapter::Execution;
use crate::definition::Output;
use crate::error::{CallError, Cancellation, EngineError, RunTimeout};

/// Result of classification.
pub(crate) enum Disposition {
  /// A plain value; the engine decides whether to persist it.
  Value(Value),
  State(State),
  Terminated,
}

pub(crate) fn classify(kind: RunKind, execution: Execution) -> Disposition {
  match execution {
    Execution::Returned(Output::Value(value)) => Disposition::Value(value),
    // A hand-built final state is adopted as the run's own outcome. States
    // recorded for other runs are aggregated and carried as data.
    Execution::Returned(Output::State(state)) if state.is_final() && state.is_detached() => {
      Disposition::State(state.fresh())
    }
    Execution::Returned(Output::State(state)) => Disposition::State(aggregate(
      std::slice::from_ref(&state),
      StateData::State(Box::new(state.clone())),
    )),
    Execution::Returned(Output::States(states)) => {
      let data = StateData::States(states.clone());
      Disposition::State(aggregate(&states, data))
    }
    Execution::Raised(error) => classify_error(kind, error),
    Execution::Panicked(message) => Disposition::State(
      State::crashed(format!("{} run panicked: {message}", kind.label()))
        .with_data(CapturedError::from_message(message)),
    ),
    Execution::TimedOut(timeout) => {
      let seconds = timeout.as_secs_f64();
      Disposition::State(
        State::timed_out(format!(
          "{} run exceeded timeout of {seconds} seconds",
          kind.label()
        ))
        .with_data(CapturedError::new(RunTimeout { seconds }.into())),
      )
    }
    Execution::Terminated => Disposition::Terminated,
  }
}

/// Final state for a body that returned run states.
///
/// All completed yields Completed. Otherwise cancellation dominates failure;
/// states that are not final count against the run.
fn aggregate(states: &[State], data: StateData) -> State {
  let group = StateGroup::new(states);
  let total = group.total;

  if group.all_completed() {
    State::completed()
      .with_message("All states completed.")
      .with_data(data)
  } else if group.any_cancelled() {
    State::cancelled(format!("{}/{total} states cancelled.", group.cancelled)).with_data(data)
  } else if group.any_failed() {
    State::failed(format!("{}/{total} states failed.", group.failed)).with_data(data)
  } else {
    State::failed(format!("{}/{total} states are not final.", group.not_final)).with_data(data)
  }
}

fn classify_error(kind: RunKind, error: anyhow::Error) -> Disposition {
  let engine_error = error.downcast_ref::<EngineError>().or_else(|| {
    match error.downcast_ref::<CallError>() {
      Some(CallError::Engine(inner)) => Some(inner),
      _ => None,
    }
  });

  match engine_error {
    Some(EngineError::TerminationSignal) => return Disposition::Terminated,
    Some(EngineError::RunInterrupted { reason, .. }) => {
      let message = format!("{} run was interrupted: {reason}", kind.label());
      return Disposition::State(
        State::cancelled(message).with_data(CapturedError::new(error)),
      );
    }
    _ => {}
  }

  if let Some(cancellation) = error.downcast_ref::<Cancellation>() {
    let message = cancellation.message.clone();
    return Disposition::State(State::cancelled(message).with_data(CapturedError::new(error)));
  }

  // A nested call that raised: fail with the child's original error.
  if let Some(CallError::Run {
    state,
    source: ResultError::Raised(captured),
  }) = error.downcast_ref::<CallError>()
  {
    let mut failed = State::failed(format!(
      "{} run encountered an exception: {captured:#}",
      kind.label()
    ))
    .with_data(captured.clone());
    failed.state_details.child_flow_run_id = child_flow_run_id(state);
    return Disposition::State(failed);
  }

  let mut failed = State::failed(format!(
    "{} run encountered an exception: {error:#}",
    kind.label()
  ));
  if let Some(CallError::Run { state, .. }) = error.downcast_ref::<CallError>() {
    failed.state_details.child_flow_run_id = child_flow_run_id(state);
  }
  Disposition::State(failed.with_data(CapturedError::new(error)))
}

/// The flow run a nested call's state belongs to, when it was a subflow.
fn child_flow_run_id(state: &State) -> Option<uuid::Uuid> {
  match state.state_details.task_run_id {
    None => state.state_details.flow_run_id,
    Some(_) => None,
  }
}
