use tributary_state::StateType;

/// Outcome of evaluating a proposed transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
  Accept,
  Reject,
}

/// Decide whether a run in `current` may move to `proposed`.
///
/// Running is entered only from Pending or Scheduled. Terminal types are
/// entered only from Running or Cancelling, so a completion proposed after an
/// out-of-band Cancelling write still lands. Cancelling is accepted from any
/// state that is not final. Scheduled is re-entered only from Failed, which is
/// how retries start over.
pub fn evaluate_transition(current: StateType, proposed: StateType) -> Transition {
  use StateType::*;

  let allowed = match proposed {
    Running => matches!(current, Pending | Scheduled),
    Completed | Failed | Crashed | Cancelled | Paused => matches!(current, Running | Cancelling),
    Cancelling => !current.is_final() && current != Cancelling,
    Scheduled => current == Failed,
    Pending => matches!(current, Scheduled | Paused),
  };

  if allowed {
    Transition::Accept
  } else {
    Transition::Reject
  }
}
