//! The run-state engine.
//!
//! The `Engine` turns a call of a [`Definition`] into a tracked run:
//! create the run, move it to Running, execute the body, classify the outcome,
//! propose the terminal state, retry per policy, then dispatch hooks.
//!
//! # Ordering
//! Within one run every proposal is awaited before the next is made, so the
//! authority sees create, running, terminal (and any retry cycles) in order.
//! Sibling runs are independent.
//!
//! # Rejections
//! The authority may refuse a proposal. A refused Running proposal means the
//! run must not execute; the engine returns the authority's state without
//! running hooks. A refused terminal proposal settles the run in whatever
//! state the authority holds.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::Utc;
use minijinja::Environment;
use tokio::task::JoinHandle;
use tracing::{Span, debug, error, info, instrument, warn};
use tributary_config::Settings;
use tributary_params::{CallArgs, Parameters, bind, validate};
use tributary_state::{CapturedError, ResultError, ResultRef, State, StateData, Value};
use tributary_storage::{FsResultStore, ResultStore};
use tributary_store::{
  ClientError, OrchestrationClient, Run, RunCreate, RunInput, RunKind, TaskInputs,
};
use uuid::Uuid;

use crate::adapter;
use crate::context::{self, RunFrame};
use crate::definition::{Definition, RunName};
use crate::error::{CallError, EngineError};
use crate::events::{ExecutionNotifier, NoopNotifier, RunEvent};
use crate::hooks::{self, HookInvocation, HookKind};
use crate::outcome::{self, Disposition};
use crate::signals::Termination;

const DROPPED_MESSAGE: &str = "Execution was cancelled by the runtime environment.";

/// Drives flow and task runs against an orchestration authority.
///
/// Cheap to clone; clones share the client, notifier and termination handle.
#[derive(Clone)]
pub struct Engine {
  client: Arc<dyn OrchestrationClient>,
  settings: Arc<Settings>,
  notifier: Arc<dyn ExecutionNotifier>,
  result_store: Option<Arc<dyn ResultStore>>,
  termination: Termination,
}

/// How the attempt loop ended.
enum Finish {
  /// A terminal proposal was made; hooks run for the returned state.
  Settled(State),
  /// The authority refused to let the run execute.
  Rejected(State),
  Terminated,
}

/// Authority response to a proposal.
struct Proposal {
  state: State,
  accepted: bool,
}

impl Engine {
  /// Create an engine with no-op notifications.
  ///
  /// When `settings.local_storage_path` is set, results are persisted there.
  pub fn new(client: Arc<dyn OrchestrationClient>, settings: Settings) -> Self {
    let result_store = settings
      .local_storage_path
      .as_ref()
      .map(|path| Arc::new(FsResultStore::new(path.clone())) as Arc<dyn ResultStore>);

    Self {
      client,
      settings: Arc::new(settings),
      notifier: Arc::new(NoopNotifier),
      result_store,
      termination: Termination::new(),
    }
  }

  pub fn with_notifier(mut self, notifier: impl ExecutionNotifier + 'static) -> Self {
    self.notifier = Arc::new(notifier);
    self
  }

  pub fn with_result_store(mut self, store: Arc<dyn ResultStore>) -> Self {
    self.result_store = Some(store);
    self
  }

  /// Share a termination handle with other engines or the caller.
  pub fn with_termination(mut self, termination: Termination) -> Self {
    self.termination = termination;
    self
  }

  pub fn client(&self) -> &Arc<dyn OrchestrationClient> {
    &self.client
  }

  pub fn settings(&self) -> &Settings {
    &self.settings
  }

  pub fn termination(&self) -> &Termination {
    &self.termination
  }

  /// Route SIGINT and SIGTERM into this engine's termination handle.
  pub fn listen_for_signals(&self) -> JoinHandle<()> {
    self.termination.listen_for_signals()
  }

  /// Call a definition and resolve its result.
  ///
  /// Inside a running flow or task the call is nested under it.
  pub async fn call(&self, definition: &Definition, args: CallArgs) -> Result<StateData, CallError> {
    let state = self.call_state(definition, args).await?;
    self.fetch_result(&state).await
  }

  /// Call a definition and return its final state without raising.
  pub async fn call_state(
    &self,
    definition: &Definition,
    args: CallArgs,
  ) -> Result<State, EngineError> {
    self
      .call_state_in(definition, args, context::current())
      .await
  }

  /// Resolve a state's result, reading persisted results from the result store.
  pub async fn fetch_result(&self, state: &State) -> Result<StateData, CallError> {
    match (state.result(), &self.result_store) {
      (Ok(data), _) => Ok(data),
      (Err(ResultError::MissingResult { storage_key }), Some(store)) => {
        let value = store
          .read(&storage_key)
          .await
          .map_err(|source| EngineError::Storage { source })?;
        Ok(StateData::Value(Value::Json(value)))
      }
      (Err(source), _) => Err(CallError::Run {
        state: Box::new(state.clone()),
        source,
      }),
    }
  }

  pub(crate) async fn call_state_in(
    &self,
    definition: &Definition,
    args: CallArgs,
    parent: Option<Arc<RunFrame>>,
  ) -> Result<State, EngineError> {
    if let Some(parent) = &parent {
      self.check_parent(parent).await?;
    }

    let parameters = bind(definition.signature(), args).map_err(|source| EngineError::Bind {
      name: definition.name().to_string(),
      source,
    })?;

    self.run(definition, parameters, parent).await
  }

  /// Refuse nested calls once the enclosing run stopped executing.
  async fn check_parent(&self, parent: &RunFrame) -> Result<(), EngineError> {
    let interrupted = |reason: &str| EngineError::RunInterrupted {
      run_id: parent.run_id(),
      reason: reason.to_string(),
    };

    if parent.cancellation_token().is_cancelled() {
      return Err(interrupted("the enclosing attempt is no longer executing"));
    }

    match self.client.read_run(parent.run_id()).await {
      Ok(run) if run.state.is_cancelling() || run.state.is_cancelled() => {
        Err(interrupted("the enclosing run is being cancelled"))
      }
      Ok(_) => Ok(()),
      Err(error) => {
        warn!(run_id = %parent.run_id(), error = %error, "parent_state_unavailable");
        Ok(())
      }
    }
  }

  /// Run a definition with already bound parameters.
  ///
  /// Returns the run's final state. Fails only when the run name cannot be
  /// rendered, and with [`EngineError::TerminationSignal`] once a termination
  /// has been resolved.
  #[instrument(
    skip_all,
    fields(kind = %definition.kind(), definition = definition.name(), run_id = tracing::field::Empty)
  )]
  pub async fn run(
    &self,
    definition: &Definition,
    parameters: Parameters,
    parent: Option<Arc<RunFrame>>,
  ) -> Result<State, EngineError> {
    if self.termination.is_terminated() {
      return Err(EngineError::TerminationSignal);
    }
    let _active = parent.as_ref().map(RunFrame::enter_child);

    let kind = definition.kind();
    let dynamic_key = match (kind, &parent) {
      (RunKind::Task, Some(frame)) => Some(frame.next_dynamic_key().to_string()),
      _ => None,
    };
    let inputs = task_inputs(&parameters);
    let parameters = resolve_inputs(parameters);
    let name = render_run_name(definition, &parameters, dynamic_key.as_deref())?;
    let tags = resolve_tags(definition, parent.as_deref());

    let mut guard = RunGuard::new(self.clone(), definition.clone());

    // A subflow is mirrored by a task run in the parent flow.
    let tracking = match (kind, &parent) {
      (RunKind::Flow, Some(frame)) => {
        match self
          .start_tracking_run(definition, frame, &name, &tags, inputs.clone())
          .await
        {
          Ok(run) => {
            guard.watch_tracking(run.id);
            Some(run)
          }
          Err(error) => {
            let mut request = RunCreate::new(kind, definition.name());
            request.name = name;
            let mut local = Run::from_request(Uuid::new_v4(), request);
            let state = self.crash_locally(&mut local, &error);
            self.dispatch_final_hooks(definition, &local, &state).await;
            return Ok(state);
          }
        }
      }
      _ => None,
    };

    let mut request = RunCreate::new(kind, definition.name());
    request.name = name;
    request.version = definition.version().map(str::to_string);
    request.tags = tags;
    request.parameters = parameters.clone();
    request.dynamic_key = dynamic_key;
    match kind {
      RunKind::Flow => {
        request.parent_task_run_id = tracking.as_ref().map(|run| run.id);
      }
      RunKind::Task => {
        request.task_inputs = inputs;
        request.flow_run_id = parent.as_ref().and_then(|frame| frame.flow_run_id());
        request.parent_task_run_id = parent
          .as_ref()
          .filter(|frame| frame.kind() == RunKind::Task)
          .map(|frame| frame.run_id());
      }
    }

    let validation = if definition.validate_parameters() {
      validate(definition.signature(), &parameters)
    } else {
      Ok(parameters)
    };
    let parameters = match validation {
      Ok(parameters) => {
        request.parameters = parameters.clone();
        Some(parameters)
      }
      Err(error) => {
        request.state = State::failed(format!(
          "Validation of parameters failed with error: {error}"
        ))
        .with_data(CapturedError::new(error.into()));
        None
      }
    };

    let mut run = match self.create_run(request.clone()).await {
      Ok(run) => run,
      Err(error) => {
        guard.release();
        let mut local = Run::from_request(Uuid::new_v4(), request);
        let state = self.crash_locally(&mut local, &error);
        self.dispatch_final_hooks(definition, &local, &state).await;
        self.finish_tracking(tracking, &local, &state).await;
        return Ok(state);
      }
    };
    guard.watch(run.id);
    Span::current().record("run_id", tracing::field::display(run.id));

    // Invalid parameters: the run was created Failed and never executes.
    let Some(parameters) = parameters else {
      guard.release();
      let state = run.state.clone();
      info!(run_id = %run.id, message = ?state.message, "run_parameters_invalid");
      self.finish(&run, &state, tracking).await;
      return Ok(state);
    };

    let finish = self
      .attempts(definition, &mut run, &parameters, parent.as_ref())
      .await;
    guard.release();

    let (state, terminated) = match finish {
      Ok(Finish::Settled(state)) => {
        self.dispatch_final_hooks(definition, &run, &state).await;
        (state, false)
      }
      Ok(Finish::Rejected(state)) => {
        info!(run_id = %run.id, state = %state.state_type, "run_aborted");
        (state, false)
      }
      Ok(Finish::Terminated) => {
        let state = match self.resolve_termination(&mut run).await {
          Ok(state) => state,
          Err(error) => self.crash_locally(&mut run, &error),
        };
        self.dispatch_final_hooks(definition, &run, &state).await;
        (state, true)
      }
      Err(error) => {
        let state = self.crash_locally(&mut run, &error);
        self.dispatch_final_hooks(definition, &run, &state).await;
        (state, false)
      }
    };

    self.finish(&run, &state, tracking).await;

    if terminated {
      Err(EngineError::TerminationSignal)
    } else {
      Ok(state)
    }
  }

  /// Execute attempts until one settles or no retries remain.
  async fn attempts(
    &self,
    definition: &Definition,
    run: &mut Run,
    parameters: &Parameters,
    parent: Option<&Arc<RunFrame>>,
  ) -> Result<Finish, ClientError> {
    let retries = definition.retries().unwrap_or(match definition.kind() {
      RunKind::Flow => self.settings.flow_default_retries,
      RunKind::Task => self.settings.task_default_retries,
    });

    loop {
      let running = self.propose(run, State::running()).await?;
      if !running.accepted {
        return Ok(Finish::Rejected(running.state));
      }
      self
        .dispatch_hooks(HookKind::Running, definition, run, &running.state)
        .await;

      let frame = Arc::new(RunFrame::new(
        run.clone(),
        parameters.clone(),
        definition.clone(),
        self.clone(),
        parent.cloned(),
      ));
      let execution = adapter::execute(
        definition.body(),
        parameters.clone(),
        Arc::clone(&frame),
        definition.timeout(),
        &self.termination,
      )
      .await;
      // Abandoned sync bodies stop at their next nested call.
      frame.cancellation_token().cancel();
      self.send_logs(&frame).await;

      let candidate = match outcome::classify(definition.kind(), execution) {
        Disposition::Terminated => return Ok(Finish::Terminated),
        Disposition::Value(value) => self.completed(definition, value).await,
        Disposition::State(state) => state,
      };
      let candidate = self.observe_cancelling(run, candidate).await?;

      let terminal = self.propose(run, candidate).await?;
      if !(terminal.accepted && terminal.state.is_failed() && run.run_count <= retries) {
        return Ok(Finish::Settled(terminal.state));
      }

      let retry = run.run_count;
      let delay = definition
        .retry_delay()
        .map(|delay| delay.for_retry(retry))
        .unwrap_or_else(|| match definition.kind() {
          RunKind::Flow => self.settings.flow_default_retry_delay(),
          RunKind::Task => self.settings.task_default_retry_delay(),
        });
      let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
      info!(run_id = %run.id, retry, retries, delay_ms, "run_retrying");
      self.notifier.notify(RunEvent::RunRetrying {
        run_id: run.id,
        attempt: retry + 1,
        delay_ms,
      });

      let scheduled_time =
        Utc::now() + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
      let awaiting = self
        .propose(run, State::awaiting_retry(scheduled_time))
        .await?;
      if !awaiting.accepted {
        return Ok(Finish::Settled(awaiting.state));
      }

      tokio::select! {
        _ = tokio::time::sleep(delay) => {}
        _ = self.termination.terminated() => return Ok(Finish::Terminated),
      }
    }
  }

  /// Prefer Cancelled over a natural outcome when the authority already holds
  /// Cancelling for the run.
  async fn observe_cancelling(&self, run: &Run, candidate: State) -> Result<State, ClientError> {
    if !(candidate.is_completed() || candidate.is_failed()) {
      return Ok(candidate);
    }

    let current = self
      .with_retries("read_run", || self.client.read_run(run.id))
      .await?
      .state;
    if !current.is_cancelling() {
      return Ok(candidate);
    }

    info!(run_id = %run.id, "run_cancelling_observed");
    let message = current
      .message
      .clone()
      .unwrap_or_else(|| "The run was cancelled.".to_string());
    Ok(State::cancelled(message))
  }

  /// Resolve an active run after a termination signal.
  async fn resolve_termination(&self, run: &mut Run) -> Result<State, ClientError> {
    let current = self
      .with_retries("read_run", || self.client.read_run(run.id))
      .await?
      .state;

    let state = if current.is_cancelling() {
      State::cancelled("The run was cancelled while the process was terminating.")
    } else {
      State::crashed("Execution was interrupted by a termination signal.")
    };
    warn!(run_id = %run.id, state = %state.state_type, "run_terminated");

    let run_id = run.id;
    let forced = self
      .with_retries("force_state", || self.client.force_state(run_id, state.clone()))
      .await?;
    self.accepted(run, &forced);
    Ok(forced)
  }

  /// Send the attempt's queued logs; the run does not depend on their delivery.
  async fn send_logs(&self, frame: &RunFrame) {
    let logs = frame.close_logs();
    if logs.is_empty() {
      return;
    }
    let count = logs.len();
    if let Err(error) = self
      .with_retries("create_logs", || self.client.create_logs(logs.clone()))
      .await
    {
      warn!(run_id = %frame.run_id(), count, error = %error, "run_logs_dropped");
    }
  }

  async fn completed(&self, definition: &Definition, value: Value) -> State {
    let persist = definition
      .persist_result()
      .unwrap_or(self.settings.persist_results_by_default);

    let (Some(store), true, Some(json)) = (&self.result_store, persist, value.to_json()) else {
      return State::completed().with_data(value);
    };

    let key = Uuid::new_v4().simple().to_string();
    match store.write(&key, &json).await {
      Ok(()) => {
        let mut reference = ResultRef::new(key);
        reference.cached = Some(json);
        State::completed().with_data(reference)
      }
      Err(error) => {
        warn!(error = %error, "result_persist_failed");
        State::completed().with_data(value)
      }
    }
  }

  async fn start_tracking_run(
    &self,
    definition: &Definition,
    frame: &RunFrame,
    name: &str,
    tags: &BTreeSet<String>,
    task_inputs: TaskInputs,
  ) -> Result<Run, ClientError> {
    let mut request = RunCreate::new(RunKind::Task, definition.name());
    request.name = name.to_string();
    request.tags = tags.clone();
    request.task_inputs = task_inputs;
    request.flow_run_id = frame.flow_run_id();
    request.parent_task_run_id = (frame.kind() == RunKind::Task).then(|| frame.run_id());
    request.dynamic_key = Some(frame.next_dynamic_key().to_string());

    let mut run = self.create_run(request).await?;
    self.propose(&mut run, State::running()).await?;
    debug!(run_id = %run.id, "tracking_run_started");
    Ok(run)
  }

  /// Mirror a subflow's final state onto its tracking task run.
  async fn finish_tracking(&self, tracking: Option<Run>, child: &Run, state: &State) {
    let Some(mut tracking) = tracking else {
      return;
    };

    let mut candidate = State::new(state.state_type)
      .with_name(state.name.clone())
      .with_data(state.data.clone());
    candidate.message = state.message.clone();
    candidate.state_details.child_flow_run_id = Some(child.id);

    if let Err(error) = self.propose(&mut tracking, candidate).await {
      warn!(run_id = %tracking.id, error = %error, "tracking_run_update_failed");
    }
  }

  async fn finish(&self, run: &Run, state: &State, tracking: Option<Run>) {
    self.finish_tracking(tracking, run, state).await;
    info!(run_id = %run.id, state = %state.state_type, name = %state.name, "run_finished");
    self.notifier.notify(RunEvent::RunFinished {
      run_id: run.id,
      state_type: state.state_type,
      name: state.name.clone(),
    });
  }

  async fn dispatch_final_hooks(&self, definition: &Definition, run: &Run, state: &State) {
    if let Some(kind) = HookKind::for_final(state.state_type) {
      self.dispatch_hooks(kind, definition, run, state).await;
    }
  }

  async fn dispatch_hooks(&self, kind: HookKind, definition: &Definition, run: &Run, state: &State) {
    if definition.hooks().get(kind).is_empty() {
      return;
    }
    if kind.is_signal_triggered() && !self.settings.enable_cancellation_and_crashed_hooks {
      debug!(run_id = %run.id, hooks = kind.label(), "hooks_disabled");
      return;
    }

    let invocation = HookInvocation {
      definition: definition.clone(),
      run: run.clone(),
      state: state.clone(),
    };
    hooks::dispatch(kind, invocation, self.notifier.as_ref()).await;
  }

  async fn create_run(&self, request: RunCreate) -> Result<Run, ClientError> {
    let run = self
      .with_retries("create_run", || self.client.create_run(request.clone()))
      .await?;
    info!(run_id = %run.id, kind = %run.kind, name = %run.name, "run_created");
    self.notifier.notify(RunEvent::RunCreated {
      run_id: run.id,
      kind: run.kind,
      name: run.name.clone(),
    });
    Ok(run)
  }

  async fn propose(&self, run: &mut Run, candidate: State) -> Result<Proposal, ClientError> {
    let run_id = run.id;
    let candidate_id = candidate.id;
    let state = self
      .with_retries("propose_state", || {
        self.client.propose_state(run_id, candidate.clone())
      })
      .await?;

    // Accepted proposals come back with the candidate's id, including when a
    // retried request had already been applied.
    let accepted = state.id == candidate_id;
    if accepted {
      self.accepted(run, &state);
    } else {
      debug!(
        run_id = %run_id,
        proposed = %candidate.state_type,
        current = %state.state_type,
        "proposal_rejected"
      );
      run.state = state.clone();
    }
    Ok(Proposal { state, accepted })
  }

  fn accepted(&self, run: &mut Run, state: &State) {
    run.record(state.clone());
    info!(run_id = %run.id, state = %state.state_type, name = %state.name, "run_state_changed");
    self.notifier.notify(RunEvent::StateChanged {
      run_id: run.id,
      state_type: state.state_type,
      name: state.name.clone(),
    });
  }

  fn crash_locally(&self, run: &mut Run, error: &ClientError) -> State {
    error!(run_id = %run.id, error = %error, "authority_unavailable");
    let mut state = State::crashed(format!(
      "Crashed while communicating with the orchestration authority: {error}"
    ));
    run.stamp(&mut state);
    run.record(state.clone());
    state
  }

  /// Repeat retryable authority failures up to the configured limit.
  async fn with_retries<T, F, Fut>(&self, operation: &'static str, mut request: F) -> Result<T, ClientError>
  where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ClientError>>,
  {
    let mut attempt = 0;
    loop {
      match request().await {
        Err(error) if error.is_retryable() && attempt < self.settings.client_max_retries => {
          attempt += 1;
          warn!(operation, attempt, error = %error, "authority_request_retrying");
          tokio::time::sleep(self.settings.client_retry_delay()).await;
        }
        result => return result,
      }
    }
  }
}

fn render_run_name(
  definition: &Definition,
  parameters: &Parameters,
  dynamic_key: Option<&str>,
) -> Result<String, EngineError> {
  match definition.run_name() {
    Some(RunName::Template(template)) => Environment::new()
      .render_str(template, parameters.describe())
      .map_err(|e| EngineError::RunName {
        name: definition.name().to_string(),
        message: e.to_string(),
      }),
    Some(RunName::Generator(generate)) => Ok(generate(parameters)),
    None => Ok(match dynamic_key {
      Some(key) => format!("{}-{key}", definition.name()),
      None => {
        let id = Uuid::new_v4().simple().to_string();
        format!("{}-{}", definition.name(), &id[..8])
      }
    }),
  }
}

/// Upstream runs whose states were passed in, per parameter.
fn task_inputs(parameters: &Parameters) -> TaskInputs {
  let mut inputs = BTreeMap::new();
  for (name, value) in parameters.iter() {
    let mut found = Vec::new();
    collect_inputs(value, &mut found);
    if !found.is_empty() {
      inputs.insert(name.to_string(), found);
    }
  }
  inputs
}

fn collect_inputs(value: &Value, found: &mut Vec<RunInput>) {
  match value {
    Value::Opaque(opaque) => {
      let states = opaque
        .downcast_ref::<State>()
        .map(std::slice::from_ref)
        .or_else(|| opaque.downcast_ref::<Vec<State>>().map(Vec::as_slice))
        .unwrap_or_default();
      for input in states.iter().filter_map(RunInput::of) {
        if !found.contains(&input) {
          found.push(input);
        }
      }
    }
    Value::List(items) => items.iter().for_each(|item| collect_inputs(item, found)),
    Value::Map(entries) => entries
      .iter()
      .for_each(|(_, item)| collect_inputs(item, found)),
    Value::Json(_) => {}
  }
}

/// Replace completed upstream states with their values.
///
/// Other states are passed through for the body to inspect.
fn resolve_inputs(parameters: Parameters) -> Parameters {
  parameters
    .into_iter()
    .map(|(name, value)| {
      let resolved = match value.as_opaque().and_then(|o| o.downcast_ref::<State>()) {
        Some(state) if state.is_completed() => match state.result() {
          Ok(StateData::Value(resolved)) => Some(resolved),
          _ => None,
        },
        _ => None,
      };
      (name, resolved.unwrap_or(value))
    })
    .collect()
}

/// Definition tags, the enclosing run's tags and any active tag scope.
fn resolve_tags(definition: &Definition, parent: Option<&RunFrame>) -> BTreeSet<String> {
  let mut tags = definition.tags().clone();
  if let Some(parent) = parent {
    tags.extend(parent.tags().iter().cloned());
  }
  tags.extend(context::tags());
  tags
}

/// Settles runs whose future is dropped before they do.
///
/// A dropped run that the authority holds as Cancelling becomes Cancelled;
/// anything else becomes Crashed. Hooks run for the run itself, not for the
/// tracking run of a subflow.
struct RunGuard {
  engine: Engine,
  definition: Definition,
  runs: Vec<Watched>,
}

struct Watched {
  run_id: Uuid,
  tracking: bool,
}

impl RunGuard {
  fn new(engine: Engine, definition: Definition) -> Self {
    Self {
      engine,
      definition,
      runs: Vec::new(),
    }
  }

  fn watch(&mut self, run_id: Uuid) {
    self.runs.push(Watched {
      run_id,
      tracking: false,
    });
  }

  fn watch_tracking(&mut self, run_id: Uuid) {
    self.runs.push(Watched {
      run_id,
      tracking: true,
    });
  }

  fn release(&mut self) {
    self.runs.clear();
  }
}

impl Drop for RunGuard {
  fn drop(&mut self) {
    if self.runs.is_empty() {
      return;
    }
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
      return;
    };

    let engine = self.engine.clone();
    let definition = self.definition.clone();
    let runs = std::mem::take(&mut self.runs);
    handle.spawn(async move {
      // Children first; a tracking run is watched before its subflow.
      for watched in runs.into_iter().rev() {
        warn!(run_id = %watched.run_id, "run_dropped");
        if let Err(error) = engine.settle_dropped(&definition, &watched).await {
          warn!(run_id = %watched.run_id, error = %error, "run_dropped_update_failed");
        }
      }
    });
  }
}

impl Engine {
  async fn settle_dropped(&self, definition: &Definition, watched: &Watched) -> Result<(), ClientError> {
    let mut run = self.client.read_run(watched.run_id).await?;
    let candidate = if run.state.is_cancelling() {
      State::cancelled(DROPPED_MESSAGE)
    } else {
      State::crashed(DROPPED_MESSAGE)
    };

    let proposal = self.propose(&mut run, candidate).await?;
    if proposal.accepted && !watched.tracking {
      self
        .dispatch_final_hooks(definition, &run, &proposal.state)
        .await;
    }
    Ok(())
  }
}
