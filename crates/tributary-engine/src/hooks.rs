//! Lifecycle hooks.
//!
//! Hooks run after a run reaches a disposition, in declaration order. A hook
//! that fails or panics is logged and reported as [`RunEvent::HookFailed`];
//! later hooks still run and the run's state is unchanged.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use tracing::{debug, instrument, warn};
use tributary_state::{State, StateType};
use tributary_store::Run;

use crate::definition::Definition;
use crate::events::{ExecutionNotifier, RunEvent};

/// What a hook receives.
#[derive(Debug, Clone)]
pub struct HookInvocation {
  pub definition: Definition,
  pub run: Run,
  pub state: State,
}

type SyncHookFn = dyn Fn(&HookInvocation) -> anyhow::Result<()> + Send + Sync;
type AsyncHookFn = dyn Fn(HookInvocation) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync;

#[derive(Clone)]
enum HookFn {
  Sync(Arc<SyncHookFn>),
  Async(Arc<AsyncHookFn>),
}

/// A named lifecycle callback.
#[derive(Clone)]
pub struct Hook {
  name: String,
  call: HookFn,
}

impl Hook {
  /// A synchronous hook. It runs on the blocking pool.
  pub fn new<F>(name: impl Into<String>, f: F) -> Self
  where
    F: Fn(&HookInvocation) -> anyhow::Result<()> + Send + Sync + 'static,
  {
    Self {
      name: name.into(),
      call: HookFn::Sync(Arc::new(f)),
    }
  }

  pub fn new_async<F, Fut>(name: impl Into<String>, f: F) -> Self
  where
    F: Fn(HookInvocation) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
  {
    Self {
      name: name.into(),
      call: HookFn::Async(Arc::new(move |invocation| f(invocation).boxed())),
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub(crate) fn ptr_eq(&self, other: &Hook) -> bool {
    match (&self.call, &other.call) {
      (HookFn::Sync(a), HookFn::Sync(b)) => Arc::ptr_eq(a, b),
      (HookFn::Async(a), HookFn::Async(b)) => Arc::ptr_eq(a, b),
      _ => false,
    }
  }

  async fn invoke(&self, invocation: HookInvocation) -> anyhow::Result<()> {
    match &self.call {
      HookFn::Sync(f) => {
        let f = Arc::clone(f);
        tokio::task::spawn_blocking(move || f(&invocation))
          .await
          .map_err(|e| anyhow::anyhow!("hook panicked: {e}"))?
      }
      HookFn::Async(f) => AssertUnwindSafe(f(invocation))
        .catch_unwind()
        .await
        .map_err(|_| anyhow::anyhow!("hook panicked"))?,
    }
  }
}

impl fmt::Debug for Hook {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Hook").field("name", &self.name).finish()
  }
}

/// Which hook list a disposition selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
  Completion,
  Failure,
  Cancellation,
  Crashed,
  Running,
}

impl HookKind {
  pub fn label(self) -> &'static str {
    match self {
      HookKind::Completion => "on_completion",
      HookKind::Failure => "on_failure",
      HookKind::Cancellation => "on_cancellation",
      HookKind::Crashed => "on_crashed",
      HookKind::Running => "on_running",
    }
  }

  /// Hooks dispatched when a run ends in `state_type`.
  pub fn for_final(state_type: StateType) -> Option<Self> {
    match state_type {
      StateType::Completed => Some(HookKind::Completion),
      StateType::Failed => Some(HookKind::Failure),
      StateType::Cancelled | StateType::Cancelling => Some(HookKind::Cancellation),
      StateType::Crashed => Some(HookKind::Crashed),
      _ => None,
    }
  }

  /// Whether the hooks-enabled setting gates this kind.
  pub fn is_signal_triggered(self) -> bool {
    matches!(self, HookKind::Cancellation | HookKind::Crashed)
  }
}

/// Hook lists of a definition.
#[derive(Debug, Clone, Default)]
pub struct Hooks {
  pub(crate) on_completion: Vec<Hook>,
  pub(crate) on_failure: Vec<Hook>,
  pub(crate) on_cancellation: Vec<Hook>,
  pub(crate) on_crashed: Vec<Hook>,
  pub(crate) on_running: Vec<Hook>,
}

impl Hooks {
  pub fn get(&self, kind: HookKind) -> &[Hook] {
    match kind {
      HookKind::Completion => &self.on_completion,
      HookKind::Failure => &self.on_failure,
      HookKind::Cancellation => &self.on_cancellation,
      HookKind::Crashed => &self.on_crashed,
      HookKind::Running => &self.on_running,
    }
  }

  pub(crate) fn get_mut(&mut self, kind: HookKind) -> &mut Vec<Hook> {
    match kind {
      HookKind::Completion => &mut self.on_completion,
      HookKind::Failure => &mut self.on_failure,
      HookKind::Cancellation => &mut self.on_cancellation,
      HookKind::Crashed => &mut self.on_crashed,
      HookKind::Running => &mut self.on_running,
    }
  }
}

impl PartialEq for Hooks {
  fn eq(&self, other: &Self) -> bool {
    let same = |a: &[Hook], b: &[Hook]| a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.ptr_eq(y));
    same(&self.on_completion, &other.on_completion)
      && same(&self.on_failure, &other.on_failure)
      && same(&self.on_cancellation, &other.on_cancellation)
      && same(&self.on_crashed, &other.on_crashed)
      && same(&self.on_running, &other.on_running)
  }
}

/// Run every hook of `kind` in order, isolating failures.
#[instrument(skip_all, fields(run_id = %invocation.run.id, hooks = kind.label()))]
pub(crate) async fn dispatch(
  kind: HookKind,
  invocation: HookInvocation,
  notifier: &dyn ExecutionNotifier,
) {
  let hooks = invocation.definition.hooks().get(kind).to_vec();
  for hook in hooks {
    debug!(hook = hook.name(), "hook_started");
    if let Err(error) = hook.invoke(invocation.clone()).await {
      warn!(hook = hook.name(), error = %format!("{error:#}"), "hook_failed");
      notifier.notify(RunEvent::HookFailed {
        run_id: invocation.run.id,
        hook: hook.name().to_string(),
        error: format!("{error:#}"),
      });
    }
  }
}
