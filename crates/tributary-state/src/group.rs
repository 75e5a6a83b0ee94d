use crate::state::{State, StateType};

/// Counts over a collection of states returned by a callable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateGroup {
  pub total: usize,
  pub completed: usize,
  /// Failed and crashed states.
  pub failed: usize,
  pub cancelled: usize,
  pub not_final: usize,
}

impl StateGroup {
  pub fn new(states: &[State]) -> Self {
    let mut group = StateGroup {
      total: states.len(),
      ..Default::default()
    };
    for state in states {
      match state.state_type {
        StateType::Completed => group.completed += 1,
        StateType::Failed | StateType::Crashed => group.failed += 1,
        StateType::Cancelled => group.cancelled += 1,
        _ => {}
      }
      if !state.is_final() {
        group.not_final += 1;
      }
    }
    group
  }

  pub fn all_completed(&self) -> bool {
    self.completed == self.total
  }

  pub fn any_cancelled(&self) -> bool {
    self.cancelled > 0
  }

  pub fn any_failed(&self) -> bool {
    self.failed > 0
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_counts_by_type() {
    let states = vec![
      State::cancelled("x"),
      State::completed(),
      State::failed("y"),
      State::crashed("z"),
      State::running(),
    ];
    let group = StateGroup::new(&states);
    assert_eq!(group.total, 5);
    assert_eq!(group.completed, 1);
    assert_eq!(group.failed, 2);
    assert_eq!(group.cancelled, 1);
    assert_eq!(group.not_final, 1);
    assert!(!group.all_completed());
  }

  #[test]
  fn test_empty_collection_is_all_completed() {
    assert!(StateGroup::new(&[]).all_completed());
  }
}
