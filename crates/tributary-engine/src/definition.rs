//! Flow and task definitions.
//!
//! A [`Definition`] wraps a callable body with the configuration the engine
//! needs to run it: signature, retry policy, timeout, tags, hooks and naming.
//! Definitions are built with [`flow`] or [`task`] and validated eagerly, so a
//! malformed definition never reaches the engine.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use tributary_params::{CallArgs, Param, Parameters, Signature, SignatureError};
use tributary_state::{State, StateData, Value};
use tributary_store::RunKind;

use crate::context;
use crate::error::{CallError, DefinitionError, EngineError, OutputError};
use crate::hooks::{Hook, HookKind, Hooks};
use crate::retry::RetryDelay;

const INVALID_NAME_CHARACTERS: [char; 5] = ['/', '%', '&', '>', '<'];
const RESERVED_ARGUMENTS: [&str; 2] = ["return_state", "wait_for"];

/// What a body returned.
#[derive(Debug, Clone)]
pub enum Output {
  Value(Value),
  /// The body built its own outcome.
  State(State),
  States(Vec<State>),
}

impl From<Value> for Output {
  fn from(value: Value) -> Self {
    Output::Value(value)
  }
}

impl From<serde_json::Value> for Output {
  fn from(value: serde_json::Value) -> Self {
    Output::Value(Value::Json(value))
  }
}

impl From<()> for Output {
  fn from(_: ()) -> Self {
    Output::Value(Value::null())
  }
}

impl From<i64> for Output {
  fn from(value: i64) -> Self {
    Output::Value(value.into())
  }
}

impl From<bool> for Output {
  fn from(value: bool) -> Self {
    Output::Value(value.into())
  }
}

impl From<String> for Output {
  fn from(value: String) -> Self {
    Output::Value(value.into())
  }
}

impl From<&str> for Output {
  fn from(value: &str) -> Self {
    Output::Value(value.into())
  }
}

impl From<State> for Output {
  fn from(state: State) -> Self {
    Output::State(state)
  }
}

impl From<Vec<State>> for Output {
  fn from(states: Vec<State>) -> Self {
    Output::States(states)
  }
}

/// Pass a resolved result on as a body's output.
///
/// Persisted results must be resolved with [`crate::Engine::fetch_result`]
/// first; an uncached reference is refused rather than read as null.
impl TryFrom<StateData> for Output {
  type Error = OutputError;

  fn try_from(data: StateData) -> Result<Self, Self::Error> {
    match data {
      StateData::Value(value) => Ok(Output::Value(value)),
      StateData::State(state) => Ok(Output::State(*state)),
      StateData::States(states) => Ok(Output::States(states)),
      StateData::Persisted(reference) => match reference.cached {
        Some(json) => Ok(Output::Value(Value::Json(json))),
        None => Err(OutputError::Unresolved {
          storage_key: reference.storage_key,
        }),
      },
      StateData::Error(error) => Err(OutputError::Captured(error)),
      StateData::Empty => Ok(Output::Value(Value::null())),
    }
  }
}

type SyncFn = dyn Fn(Parameters) -> anyhow::Result<Output> + Send + Sync;
type AsyncFn = dyn Fn(Parameters) -> BoxFuture<'static, anyhow::Result<Output>> + Send + Sync;

/// The user code a definition runs.
#[derive(Clone)]
pub enum Body {
  /// Runs on the blocking pool; nested calls use the `*_blocking` forms.
  Sync(Arc<SyncFn>),
  /// Runs on the caller's runtime.
  Async(Arc<AsyncFn>),
}

impl Body {
  pub fn sync<F>(f: F) -> Self
  where
    F: Fn(Parameters) -> anyhow::Result<Output> + Send + Sync + 'static,
  {
    Body::Sync(Arc::new(f))
  }

  pub fn asynchronous<F, Fut>(f: F) -> Self
  where
    F: Fn(Parameters) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Output>> + Send + 'static,
  {
    Body::Async(Arc::new(move |parameters| f(parameters).boxed()))
  }

  fn ptr_eq(&self, other: &Body) -> bool {
    match (self, other) {
      (Body::Sync(a), Body::Sync(b)) => Arc::ptr_eq(a, b),
      (Body::Async(a), Body::Async(b)) => Arc::ptr_eq(a, b),
      _ => false,
    }
  }
}

impl fmt::Debug for Body {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Body::Sync(_) => f.write_str("Body::Sync"),
      Body::Async(_) => f.write_str("Body::Async"),
    }
  }
}

/// How runs of a definition are named.
#[derive(Clone)]
pub enum RunName {
  /// A minijinja template rendered against the bound parameters, e.g.
  /// `"hi-{{ name }}"`.
  Template(String),
  Generator(Arc<dyn Fn(&Parameters) -> String + Send + Sync>),
}

impl RunName {
  pub fn generator<F>(f: F) -> Self
  where
    F: Fn(&Parameters) -> String + Send + Sync + 'static,
  {
    RunName::Generator(Arc::new(f))
  }
}

impl PartialEq for RunName {
  fn eq(&self, other: &Self) -> bool {
    match (self, other) {
      (RunName::Template(a), RunName::Template(b)) => a == b,
      (RunName::Generator(a), RunName::Generator(b)) => Arc::ptr_eq(a, b),
      _ => false,
    }
  }
}

impl fmt::Debug for RunName {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      RunName::Template(template) => f.debug_tuple("Template").field(template).finish(),
      RunName::Generator(_) => f.write_str("Generator"),
    }
  }
}

#[derive(Debug, PartialEq)]
struct DefinitionInner {
  kind: RunKind,
  name: String,
  description: Option<String>,
  version: Option<String>,
  signature: Signature,
  tags: BTreeSet<String>,
  retries: Option<u32>,
  retry_delay: Option<RetryDelay>,
  timeout: Option<Duration>,
  validate_parameters: bool,
  persist_result: Option<bool>,
  run_name: Option<RunName>,
  hooks: Hooks,
  body: Body,
}

impl PartialEq for Body {
  fn eq(&self, other: &Self) -> bool {
    self.ptr_eq(other)
  }
}

/// A validated flow or task.
///
/// Cheap to clone; clones are the same definition. Equality compares every
/// observable field, so a definition rebuilt through
/// [`Definition::with_options`] equals its original without being
/// [the same](Definition::is_same).
#[derive(Clone, PartialEq)]
pub struct Definition(Arc<DefinitionInner>);

/// Start building a flow.
pub fn flow(name: impl Into<String>) -> DefinitionBuilder {
  DefinitionBuilder::new(RunKind::Flow, name)
}

/// Start building a task.
pub fn task(name: impl Into<String>) -> DefinitionBuilder {
  DefinitionBuilder::new(RunKind::Task, name)
}

impl Definition {
  pub fn kind(&self) -> RunKind {
    self.0.kind
  }

  pub fn name(&self) -> &str {
    &self.0.name
  }

  pub fn description(&self) -> Option<&str> {
    self.0.description.as_deref()
  }

  pub fn version(&self) -> Option<&str> {
    self.0.version.as_deref()
  }

  pub fn signature(&self) -> &Signature {
    &self.0.signature
  }

  pub fn tags(&self) -> &BTreeSet<String> {
    &self.0.tags
  }

  /// Explicit retry budget; `None` uses the settings default for the kind.
  pub fn retries(&self) -> Option<u32> {
    self.0.retries
  }

  pub fn retry_delay(&self) -> Option<&RetryDelay> {
    self.0.retry_delay.as_ref()
  }

  pub fn timeout(&self) -> Option<Duration> {
    self.0.timeout
  }

  pub fn validate_parameters(&self) -> bool {
    self.0.validate_parameters
  }

  pub fn persist_result(&self) -> Option<bool> {
    self.0.persist_result
  }

  pub fn run_name(&self) -> Option<&RunName> {
    self.0.run_name.as_ref()
  }

  pub fn hooks(&self) -> &Hooks {
    &self.0.hooks
  }

  pub fn body(&self) -> &Body {
    &self.0.body
  }

  /// Whether both handles point at the same definition.
  pub fn is_same(&self, other: &Definition) -> bool {
    Arc::ptr_eq(&self.0, &other.0)
  }

  /// A builder holding this definition's configuration.
  pub fn to_builder(&self) -> DefinitionBuilder {
    let inner = &self.0;
    let hook_list = |kind: HookKind| {
      let hooks = inner.hooks.get(kind);
      (!hooks.is_empty()).then(|| hooks.to_vec())
    };

    DefinitionBuilder {
      kind: inner.kind,
      name: inner.name.clone(),
      description: inner.description.clone(),
      version: inner.version.clone(),
      signature: inner.signature.clone(),
      tags: inner.tags.clone(),
      retries: inner.retries,
      retry_delay: inner.retry_delay.clone(),
      timeout: inner.timeout,
      validate_parameters: inner.validate_parameters,
      persist_result: inner.persist_result,
      run_name: inner.run_name.clone(),
      on_completion: hook_list(HookKind::Completion),
      on_failure: hook_list(HookKind::Failure),
      on_cancellation: hook_list(HookKind::Cancellation),
      on_crashed: hook_list(HookKind::Crashed),
      on_running: hook_list(HookKind::Running),
      body: Some(inner.body.clone()),
    }
  }

  /// A new definition with overrides applied, validated again.
  pub fn with_options(
    &self,
    configure: impl FnOnce(DefinitionBuilder) -> DefinitionBuilder,
  ) -> Result<Definition, DefinitionError> {
    configure(self.to_builder()).build()
  }

  /// Call from inside a running flow or task and resolve the result.
  pub async fn call(&self, args: CallArgs) -> Result<StateData, CallError> {
    let frame = context::current().ok_or(EngineError::NoActiveRun)?;
    let engine = frame.engine().clone();
    let state = engine.call_state_in(self, args, Some(frame)).await?;
    engine.fetch_result(&state).await
  }

  /// Call from inside a running flow or task and return the final state.
  pub async fn call_state(&self, args: CallArgs) -> Result<State, EngineError> {
    let frame = context::current().ok_or(EngineError::NoActiveRun)?;
    let engine = frame.engine().clone();
    engine.call_state_in(self, args, Some(frame)).await
  }

  /// [`Definition::call`] for synchronous bodies.
  ///
  /// Blocks the current thread, so it must not be used from async code.
  pub fn call_blocking(&self, args: CallArgs) -> Result<StateData, CallError> {
    let frame = context::current().ok_or(EngineError::NoActiveRun)?;
    let handle = tokio::runtime::Handle::try_current().map_err(|_| EngineError::NoRuntime)?;
    let engine = frame.engine().clone();
    handle.block_on(async move {
      let state = engine.call_state_in(self, args, Some(frame)).await?;
      engine.fetch_result(&state).await
    })
  }

  /// [`Definition::call_state`] for synchronous bodies.
  pub fn call_state_blocking(&self, args: CallArgs) -> Result<State, EngineError> {
    let frame = context::current().ok_or(EngineError::NoActiveRun)?;
    let handle = tokio::runtime::Handle::try_current().map_err(|_| EngineError::NoRuntime)?;
    let engine = frame.engine().clone();
    handle.block_on(engine.call_state_in(self, args, Some(frame)))
  }
}

impl fmt::Debug for Definition {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Definition")
      .field("kind", &self.0.kind)
      .field("name", &self.0.name)
      .field("version", &self.0.version)
      .field("tags", &self.0.tags)
      .field("retries", &self.0.retries)
      .field("timeout", &self.0.timeout)
      .finish_non_exhaustive()
  }
}

/// Configures a [`Definition`].
#[derive(Clone)]
pub struct DefinitionBuilder {
  kind: RunKind,
  name: String,
  description: Option<String>,
  version: Option<String>,
  signature: Signature,
  tags: BTreeSet<String>,
  retries: Option<u32>,
  retry_delay: Option<RetryDelay>,
  timeout: Option<Duration>,
  validate_parameters: bool,
  persist_result: Option<bool>,
  run_name: Option<RunName>,
  on_completion: Option<Vec<Hook>>,
  on_failure: Option<Vec<Hook>>,
  on_cancellation: Option<Vec<Hook>>,
  on_crashed: Option<Vec<Hook>>,
  on_running: Option<Vec<Hook>>,
  body: Option<Body>,
}

impl DefinitionBuilder {
  fn new(kind: RunKind, name: impl Into<String>) -> Self {
    Self {
      kind,
      name: name.into(),
      description: None,
      version: None,
      signature: Signature::new(),
      tags: BTreeSet::new(),
      retries: None,
      retry_delay: None,
      timeout: None,
      validate_parameters: true,
      persist_result: None,
      run_name: None,
      on_completion: None,
      on_failure: None,
      on_cancellation: None,
      on_crashed: None,
      on_running: None,
      body: None,
    }
  }

  pub fn name(mut self, name: impl Into<String>) -> Self {
    self.name = name.into();
    self
  }

  pub fn description(mut self, description: impl Into<String>) -> Self {
    self.description = Some(description.into());
    self
  }

  pub fn version(mut self, version: impl Into<String>) -> Self {
    self.version = Some(version.into());
    self
  }

  pub fn param(mut self, param: Param) -> Self {
    self.signature = self.signature.param(param);
    self
  }

  pub fn signature(mut self, signature: Signature) -> Self {
    self.signature = signature;
    self
  }

  pub fn tags<I, S>(mut self, tags: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.tags.extend(tags.into_iter().map(Into::into));
    self
  }

  pub fn retries(mut self, retries: u32) -> Self {
    self.retries = Some(retries);
    self
  }

  pub fn retry_delay(mut self, delay: RetryDelay) -> Self {
    self.retry_delay = Some(delay);
    self
  }

  /// A zero duration clears the timeout.
  pub fn timeout(mut self, timeout: impl Into<Option<Duration>>) -> Self {
    self.timeout = timeout.into().filter(|t| !t.is_zero());
    self
  }

  pub fn validate_parameters(mut self, validate: bool) -> Self {
    self.validate_parameters = validate;
    self
  }

  pub fn persist_result(mut self, persist: bool) -> Self {
    self.persist_result = Some(persist);
    self
  }

  pub fn run_name(mut self, run_name: RunName) -> Self {
    self.run_name = Some(run_name);
    self
  }

  pub fn on_completion(self, hooks: impl IntoIterator<Item = Hook>) -> Self {
    self.hooks(HookKind::Completion, hooks)
  }

  pub fn on_failure(self, hooks: impl IntoIterator<Item = Hook>) -> Self {
    self.hooks(HookKind::Failure, hooks)
  }

  pub fn on_cancellation(self, hooks: impl IntoIterator<Item = Hook>) -> Self {
    self.hooks(HookKind::Cancellation, hooks)
  }

  pub fn on_crashed(self, hooks: impl IntoIterator<Item = Hook>) -> Self {
    self.hooks(HookKind::Crashed, hooks)
  }

  pub fn on_running(self, hooks: impl IntoIterator<Item = Hook>) -> Self {
    self.hooks(HookKind::Running, hooks)
  }

  fn hooks(mut self, kind: HookKind, hooks: impl IntoIterator<Item = Hook>) -> Self {
    let slot = match kind {
      HookKind::Completion => &mut self.on_completion,
      HookKind::Failure => &mut self.on_failure,
      HookKind::Cancellation => &mut self.on_cancellation,
      HookKind::Crashed => &mut self.on_crashed,
      HookKind::Running => &mut self.on_running,
    };
    *slot = Some(hooks.into_iter().collect());
    self
  }

  pub fn body(mut self, body: Body) -> Self {
    self.body = Some(body);
    self
  }

  pub fn sync<F>(self, f: F) -> Self
  where
    F: Fn(Parameters) -> anyhow::Result<Output> + Send + Sync + 'static,
  {
    self.body(Body::sync(f))
  }

  pub fn asynchronous<F, Fut>(self, f: F) -> Self
  where
    F: Fn(Parameters) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Output>> + Send + 'static,
  {
    self.body(Body::asynchronous(f))
  }

  /// Validate and build.
  pub fn build(self) -> Result<Definition, DefinitionError> {
    if self.name.contains(INVALID_NAME_CHARACTERS) {
      return Err(DefinitionError::InvalidName { name: self.name });
    }

    if let Some(reserved) = self
      .signature
      .names()
      .find(|name| RESERVED_ARGUMENTS.contains(name))
    {
      return Err(DefinitionError::ReservedArgument {
        name: reserved.to_string(),
      });
    }

    self.signature.check().map_err(|source| match source {
      SignatureError::Duplicate { name } => DefinitionError::DuplicateParameter { name },
      source => DefinitionError::InvalidSignature {
        name: self.name.clone(),
        source,
      },
    })?;

    let mut hooks = Hooks::default();
    for (kind, list) in [
      (HookKind::Completion, self.on_completion),
      (HookKind::Failure, self.on_failure),
      (HookKind::Cancellation, self.on_cancellation),
      (HookKind::Crashed, self.on_crashed),
      (HookKind::Running, self.on_running),
    ] {
      match list {
        Some(list) if list.is_empty() => {
          return Err(DefinitionError::EmptyHookList { hook: kind.label() });
        }
        Some(list) => *hooks.get_mut(kind) = list,
        None => {}
      }
    }

    let body = self
      .body
      .ok_or_else(|| DefinitionError::MissingBody {
        name: self.name.clone(),
      })?;

    Ok(Definition(Arc::new(DefinitionInner {
      kind: self.kind,
      name: self.name,
      description: self.description,
      version: self.version,
      signature: self.signature,
      tags: self.tags,
      retries: self.retries,
      retry_delay: self.retry_delay,
      timeout: self.timeout,
      validate_parameters: self.validate_parameters,
      persist_result: self.persist_result,
      run_name: self.run_name,
      hooks,
      body,
    })))
  }
}
