//! Run context.
//!
//! Each executing run gets a [`RunFrame`] that is visible to the code it runs
//! through [`current`]. Frames live in tokio task-local storage, scoped to the
//! future (or blocking closure) executing the body, so sibling runs polled
//! concurrently each see their own frame. Nested calls read the top frame to
//! find their parent; they never modify it.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tributary_params::Parameters;
use tributary_store::{LogRecord, Run, RunKind};
use uuid::Uuid;

use crate::definition::Definition;
use crate::engine::Engine;

tokio::task_local! {
  static CURRENT_FRAME: Arc<RunFrame>;
  static TAG_SCOPE: BTreeSet<String>;
}

/// The run a piece of code is executing inside.
pub struct RunFrame {
  run: Run,
  parameters: Parameters,
  definition: Definition,
  engine: Engine,
  parent: Option<Arc<RunFrame>>,
  token: CancellationToken,
  task_calls: AtomicU64,
  /// Nested runs currently executing under this frame.
  children: watch::Sender<usize>,
  /// Logs waiting to be sent; `None` once the attempt has ended.
  logs: Mutex<Option<Vec<LogRecord>>>,
}

impl RunFrame {
  pub(crate) fn new(
    run: Run,
    parameters: Parameters,
    definition: Definition,
    engine: Engine,
    parent: Option<Arc<RunFrame>>,
  ) -> Self {
    let token = match &parent {
      Some(parent) => parent.token.child_token(),
      None => CancellationToken::new(),
    };
    Self {
      run,
      parameters,
      definition,
      engine,
      parent,
      token,
      task_calls: AtomicU64::new(0),
      children: watch::channel(0).0,
      logs: Mutex::new(Some(Vec::new())),
    }
  }

  /// The run as it was when this attempt entered Running.
  pub fn run(&self) -> &Run {
    &self.run
  }

  pub fn run_id(&self) -> Uuid {
    self.run.id
  }

  pub fn kind(&self) -> RunKind {
    self.run.kind
  }

  pub fn parameters(&self) -> &Parameters {
    &self.parameters
  }

  pub fn definition(&self) -> &Definition {
    &self.definition
  }

  pub fn engine(&self) -> &Engine {
    &self.engine
  }

  pub fn parent(&self) -> Option<&Arc<RunFrame>> {
    self.parent.as_ref()
  }

  pub fn tags(&self) -> &BTreeSet<String> {
    &self.run.tags
  }

  /// The flow run this frame belongs to.
  pub fn flow_run_id(&self) -> Option<Uuid> {
    match self.run.kind {
      RunKind::Flow => Some(self.run.id),
      RunKind::Task => self.run.flow_run_id,
    }
  }

  /// Cancelled when this attempt stops executing.
  pub fn cancellation_token(&self) -> &CancellationToken {
    &self.token
  }

  pub(crate) fn next_dynamic_key(&self) -> u64 {
    self.task_calls.fetch_add(1, Ordering::Relaxed)
  }

  /// Queue a record for the authority. Returns false once the attempt ended.
  pub(crate) fn push_log(&self, record: LogRecord) -> bool {
    let mut logs = self.logs.lock().unwrap_or_else(PoisonError::into_inner);
    match logs.as_mut() {
      Some(pending) => {
        pending.push(record);
        true
      }
      None => false,
    }
  }

  /// Take queued records and stop accepting new ones.
  pub(crate) fn close_logs(&self) -> Vec<LogRecord> {
    let mut logs = self.logs.lock().unwrap_or_else(PoisonError::into_inner);
    logs.take().unwrap_or_default()
  }

  /// Count a nested run as active until the returned guard drops.
  pub(crate) fn enter_child(self: &Arc<Self>) -> ActiveChild {
    self.children.send_modify(|count| *count += 1);
    ActiveChild(Arc::clone(self))
  }

  /// Completes once no nested run is executing under this frame.
  pub(crate) async fn children_settled(&self) {
    let mut active = self.children.subscribe();
    // The sender lives in `self`, so the channel cannot close here.
    let _ = active.wait_for(|count| *count == 0).await;
  }
}

/// Marks a nested run as active in its parent frame.
pub(crate) struct ActiveChild(Arc<RunFrame>);

impl Drop for ActiveChild {
  fn drop(&mut self) {
    self
      .0
      .children
      .send_modify(|count| *count = count.saturating_sub(1));
  }
}

/// The innermost active frame, if any.
pub fn current() -> Option<Arc<RunFrame>> {
  CURRENT_FRAME.try_with(Arc::clone).ok()
}

pub(crate) async fn scope<F: Future>(frame: Arc<RunFrame>, fut: F) -> F::Output {
  CURRENT_FRAME.scope(frame, fut).await
}

pub(crate) fn sync_scope<R>(frame: Arc<RunFrame>, f: impl FnOnce() -> R) -> R {
  CURRENT_FRAME.sync_scope(frame, f)
}

/// Tags added by enclosing [`with_tags`] scopes.
pub fn tags() -> BTreeSet<String> {
  TAG_SCOPE.try_with(Clone::clone).unwrap_or_default()
}

fn extended<I, S>(tags: I) -> BTreeSet<String>
where
  I: IntoIterator<Item = S>,
  S: Into<String>,
{
  let mut scoped = self::tags();
  scoped.extend(tags.into_iter().map(Into::into));
  scoped
}

/// Add `tags` to every run started while `fut` executes.
pub async fn with_tags<I, S, F>(tags: I, fut: F) -> F::Output
where
  I: IntoIterator<Item = S>,
  S: Into<String>,
  F: Future,
{
  TAG_SCOPE.scope(extended(tags), fut).await
}

/// [`with_tags`] for synchronous code.
pub fn with_tags_sync<I, S, R>(tags: I, f: impl FnOnce() -> R) -> R
where
  I: IntoIterator<Item = S>,
  S: Into<String>,
{
  TAG_SCOPE.sync_scope(extended(tags), f)
}
