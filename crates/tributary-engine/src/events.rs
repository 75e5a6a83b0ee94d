//! Run events and notifiers for observability.
//!
//! Events are emitted as runs move through their lifecycle so consumers can
//! observe progress, mirror state, stream to UIs, etc.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tributary_state::StateType;
use tributary_store::RunKind;
use uuid::Uuid;

/// Events emitted while runs execute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RunEvent {
  /// The authority created a run.
  RunCreated {
    run_id: Uuid,
    kind: RunKind,
    name: String,
  },

  /// The authority accepted a proposed state.
  StateChanged {
    run_id: Uuid,
    state_type: StateType,
    name: String,
  },

  /// A failed attempt will be retried.
  RunRetrying {
    run_id: Uuid,
    attempt: u32,
    delay_ms: u64,
  },

  /// A lifecycle hook raised; the run's state is unaffected.
  HookFailed {
    run_id: Uuid,
    hook: String,
    error: String,
  },

  /// The run reached its final disposition and its hooks have run.
  RunFinished {
    run_id: Uuid,
    state_type: StateType,
    name: String,
  },
}

/// Receives run events.
///
/// The engine calls `notify` for each event; implementations decide what to
/// do with them.
pub trait ExecutionNotifier: Send + Sync {
  fn notify(&self, event: RunEvent);
}

/// A no-op notifier that discards all events.
#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

impl ExecutionNotifier for NoopNotifier {
  fn notify(&self, _event: RunEvent) {}
}

/// A notifier that sends events to an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
  // Unbounded so a slow consumer never stalls a run.
  sender: mpsc::UnboundedSender<RunEvent>,
}

impl ChannelNotifier {
  pub fn new(sender: mpsc::UnboundedSender<RunEvent>) -> Self {
    Self { sender }
  }
}

impl ExecutionNotifier for ChannelNotifier {
  fn notify(&self, event: RunEvent) {
    // Receiver may have been dropped
    let _ = self.sender.send(event);
  }
}
