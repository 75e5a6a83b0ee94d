//! Cancellation, termination and authority failures.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tributary_config::Settings;
use tributary_engine::{
  CallArgs, Definition, Engine, EngineError, Hook, Output, State, StateType, current, flow, task,
};
use tributary_store::{
  ClientError, InMemoryAuthority, LogFilter, LogRecord, OrchestrationClient, Run, RunCreate,
  RunFilter,
};
use uuid::Uuid;

fn engine() -> (Engine, Arc<InMemoryAuthority>) {
  let authority = Arc::new(InMemoryAuthority::new());
  (Engine::new(authority.clone(), Settings::default()), authority)
}

async fn runs_of(authority: &InMemoryAuthority, definition: &str) -> Vec<Run> {
  authority
    .list_runs(&RunFilter::default().definition_name(definition))
    .await
    .unwrap()
}

/// Wait until the first run of `definition` satisfies `ready`.
async fn wait_for(
  authority: &InMemoryAuthority,
  definition: &str,
  ready: impl Fn(&State) -> bool,
) -> Run {
  tokio::time::timeout(Duration::from_secs(5), async {
    loop {
      if let Some(run) = runs_of(authority, definition).await.into_iter().next() {
        if ready(&run.state) {
          return run;
        }
      }
      tokio::time::sleep(Duration::from_millis(10)).await;
    }
  })
  .await
  .expect("run never reached the expected state")
}

fn counting_hook(name: &str, count: &Arc<AtomicU32>) -> Hook {
  let count = Arc::clone(count);
  Hook::new(name, move |_| {
    count.fetch_add(1, Ordering::SeqCst);
    Ok(())
  })
}

fn sleeper(name: &str, crashed: &Arc<AtomicU32>, cancelled: &Arc<AtomicU32>) -> Definition {
  flow(name)
    .on_crashed([counting_hook("crashed", crashed)])
    .on_cancellation([counting_hook("cancelled", cancelled)])
    .asynchronous(|_| async {
      tokio::time::sleep(Duration::from_secs(30)).await;
      anyhow::Ok(Output::from(()))
    })
    .build()
    .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_termination_crashes_the_active_run() {
  let (engine, authority) = engine();
  let crashed = Arc::new(AtomicU32::new(0));
  let cancelled = Arc::new(AtomicU32::new(0));
  let definition = sleeper("sleeper", &crashed, &cancelled);

  let handle = tokio::spawn({
    let engine = engine.clone();
    async move { engine.call_state(&definition, CallArgs::new()).await }
  });
  wait_for(&authority, "sleeper", State::is_running).await;

  engine.termination().terminate();
  let result = handle.await.unwrap();
  assert!(matches!(result, Err(EngineError::TerminationSignal)));

  let run = &runs_of(&authority, "sleeper").await[0];
  assert!(run.state.is_crashed());
  assert_eq!(
    run.state.message.as_deref(),
    Some("Execution was interrupted by a termination signal.")
  );
  assert_eq!(crashed.load(Ordering::SeqCst), 1);
  assert_eq!(cancelled.load(Ordering::SeqCst), 0);

  // Nothing new starts once the process is terminating.
  let quick = flow("quick").sync(|_| Ok(Output::from(()))).build().unwrap();
  let result = engine.call_state(&quick, CallArgs::new()).await;
  assert!(matches!(result, Err(EngineError::TerminationSignal)));
  assert!(runs_of(&authority, "quick").await.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_termination_of_a_cancelling_run_resolves_cancelled() {
  let (engine, authority) = engine();
  let crashed = Arc::new(AtomicU32::new(0));
  let cancelled = Arc::new(AtomicU32::new(0));
  let definition = sleeper("sleeper", &crashed, &cancelled);

  let handle = tokio::spawn({
    let engine = engine.clone();
    async move { engine.call_state(&definition, CallArgs::new()).await }
  });
  let run = wait_for(&authority, "sleeper", State::is_running).await;

  authority
    .force_state(run.id, State::cancelling("operator stop"))
    .await
    .unwrap();
  engine.termination().terminate();

  let result = handle.await.unwrap();
  assert!(matches!(result, Err(EngineError::TerminationSignal)));

  let run = authority.read_run(run.id).await.unwrap();
  assert!(run.state.is_cancelled());
  assert_eq!(cancelled.load(Ordering::SeqCst), 1);
  assert_eq!(crashed.load(Ordering::SeqCst), 0);
}

async fn flow_run_of(authority: &InMemoryAuthority, definition: &str) -> Option<Run> {
  authority
    .list_runs(
      &RunFilter::default()
        .kind(tributary_store::RunKind::Flow)
        .definition_name(definition),
    )
    .await
    .unwrap()
    .into_iter()
    .next()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_termination_resolves_nested_runs_innermost_first() {
  let (engine, authority) = engine();
  let child_crashed = Arc::new(AtomicU32::new(0));
  let child_cancelled = Arc::new(AtomicU32::new(0));
  let parent_crashed = Arc::new(AtomicU32::new(0));
  let child = sleeper("child", &child_crashed, &child_cancelled);

  let parent = flow("parent")
    .on_crashed([counting_hook("crashed", &parent_crashed)])
    .asynchronous(move |_| {
      let child = child.clone();
      async move {
        child.call_state(CallArgs::new()).await?;
        anyhow::Ok(Output::from(()))
      }
    })
    .build()
    .unwrap();

  let handle = tokio::spawn({
    let engine = engine.clone();
    async move { engine.call_state(&parent, CallArgs::new()).await }
  });

  let child_run = tokio::time::timeout(Duration::from_secs(5), async {
    loop {
      if let Some(run) = flow_run_of(&authority, "child").await {
        if run.state.is_running() {
          return run;
        }
      }
      tokio::time::sleep(Duration::from_millis(10)).await;
    }
  })
  .await
  .unwrap();

  authority
    .force_state(child_run.id, State::cancelling("operator stop"))
    .await
    .unwrap();
  engine.termination().terminate();

  let result = handle.await.unwrap();
  assert!(matches!(result, Err(EngineError::TerminationSignal)));

  let child_run = authority.read_run(child_run.id).await.unwrap();
  assert!(child_run.state.is_cancelled());
  assert_eq!(child_cancelled.load(Ordering::SeqCst), 1);
  assert_eq!(child_crashed.load(Ordering::SeqCst), 0);

  let parent_run = flow_run_of(&authority, "parent").await.unwrap();
  assert!(parent_run.state.is_crashed());
  assert_eq!(parent_crashed.load(Ordering::SeqCst), 1);

  // The subflow's tracking run mirrors its final state.
  let tracking = authority
    .read_run(child_run.parent_task_run_id.unwrap())
    .await
    .unwrap();
  assert!(tracking.state.is_cancelled());
}

#[tokio::test]
async fn test_out_of_band_cancelling_wins_over_completion() {
  let (engine, authority) = engine();
  let cancelled = Arc::new(AtomicU32::new(0));
  let completed = Arc::new(AtomicU32::new(0));

  let interrupted = {
    let authority = Arc::clone(&authority);
    flow("interrupted")
      .on_cancellation([counting_hook("cancelled", &cancelled)])
      .on_completion([counting_hook("completed", &completed)])
      .asynchronous(move |_| {
        let authority = Arc::clone(&authority);
        async move {
          let run_id = current()
            .map(|frame| frame.run_id())
            .ok_or_else(|| anyhow::anyhow!("no active run"))?;
          authority
            .force_state(run_id, State::cancelling("operator stop"))
            .await?;
          anyhow::Ok(Output::from(1i64))
        }
      })
      .build()
      .unwrap()
  };

  let state = engine.call_state(&interrupted, CallArgs::new()).await.unwrap();
  assert!(state.is_cancelled());
  assert_eq!(state.message.as_deref(), Some("operator stop"));
  assert_eq!(cancelled.load(Ordering::SeqCst), 1);
  assert_eq!(completed.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_nested_calls_are_refused_while_cancelling() {
  let (engine, authority) = engine();
  let leaf = task("leaf").sync(|_| Ok(Output::from(()))).build().unwrap();

  let parent = {
    let authority = Arc::clone(&authority);
    flow("parent")
      .asynchronous(move |_| {
        let authority = Arc::clone(&authority);
        let leaf = leaf.clone();
        async move {
          let run_id = current()
            .map(|frame| frame.run_id())
            .ok_or_else(|| anyhow::anyhow!("no active run"))?;
          authority
            .force_state(run_id, State::cancelling("operator stop"))
            .await?;
          leaf.call_state(CallArgs::new()).await?;
          anyhow::Ok(Output::from(()))
        }
      })
      .build()
      .unwrap()
  };

  let state = engine.call_state(&parent, CallArgs::new()).await.unwrap();
  assert_eq!(state.state_type, StateType::Cancelled);
  assert_eq!(
    state.message.as_deref(),
    Some("Flow run was interrupted: the enclosing run is being cancelled")
  );
  assert!(runs_of(&authority, "leaf").await.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_dropped_run_is_marked_crashed() {
  let (engine, authority) = engine();
  let crashed = Arc::new(AtomicU32::new(0));
  let cancelled = Arc::new(AtomicU32::new(0));
  let definition = sleeper("sleeper", &crashed, &cancelled);

  let handle = tokio::spawn({
    let engine = engine.clone();
    async move { engine.call_state(&definition, CallArgs::new()).await }
  });
  wait_for(&authority, "sleeper", State::is_running).await;

  handle.abort();
  let _ = handle.await;

  let run = wait_for(&authority, "sleeper", State::is_crashed).await;
  assert_eq!(
    run.state.message.as_deref(),
    Some("Execution was cancelled by the runtime environment.")
  );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_parent_timeout_crashes_awaited_subflow() {
  let (engine, authority) = engine();
  let crashed = Arc::new(AtomicU32::new(0));
  let cancelled = Arc::new(AtomicU32::new(0));
  let child = sleeper("child", &crashed, &cancelled);

  let parent = flow("parent")
    .timeout(Duration::from_millis(200))
    .asynchronous(move |_| {
      let child = child.clone();
      async move {
        child.call_state(CallArgs::new()).await?;
        anyhow::Ok(Output::from(()))
      }
    })
    .build()
    .unwrap();

  let state = engine.call_state(&parent, CallArgs::new()).await.unwrap();
  assert_eq!(state.name, "TimedOut");

  let child_run = authority
    .list_runs(&RunFilter::default().kind(tributary_store::RunKind::Flow).definition_name("child"))
    .await
    .unwrap()
    .remove(0);
  let child_run = tokio::time::timeout(Duration::from_secs(5), async {
    loop {
      let run = authority.read_run(child_run.id).await.unwrap();
      if run.state.is_crashed() {
        return run;
      }
      tokio::time::sleep(Duration::from_millis(10)).await;
    }
  })
  .await
  .unwrap();
  assert!(child_run.parent_task_run_id.is_some());
}

/// Cancels every run just before it would enter Running.
struct CancelBeforeStart {
  inner: InMemoryAuthority,
}

#[async_trait]
impl OrchestrationClient for CancelBeforeStart {
  async fn create_run(&self, request: RunCreate) -> Result<Run, ClientError> {
    self.inner.create_run(request).await
  }

  async fn propose_state(&self, run_id: Uuid, candidate: State) -> Result<State, ClientError> {
    if candidate.is_running() {
      self
        .inner
        .force_state(run_id, State::cancelled("cancelled before start"))
        .await?;
    }
    self.inner.propose_state(run_id, candidate).await
  }

  async fn force_state(&self, run_id: Uuid, state: State) -> Result<State, ClientError> {
    self.inner.force_state(run_id, state).await
  }

  async fn read_run(&self, run_id: Uuid) -> Result<Run, ClientError> {
    self.inner.read_run(run_id).await
  }

  async fn read_states(&self, run_id: Uuid) -> Result<Vec<State>, ClientError> {
    self.inner.read_states(run_id).await
  }

  async fn list_runs(&self, filter: &RunFilter) -> Result<Vec<Run>, ClientError> {
    self.inner.list_runs(filter).await
  }

  async fn create_logs(&self, logs: Vec<LogRecord>) -> Result<(), ClientError> {
    self.inner.create_logs(logs).await
  }

  async fn read_logs(&self, filter: &LogFilter) -> Result<Vec<LogRecord>, ClientError> {
    self.inner.read_logs(filter).await
  }
}

#[tokio::test]
async fn test_rejected_running_never_executes() {
  let authority = Arc::new(CancelBeforeStart {
    inner: InMemoryAuthority::new(),
  });
  let engine = Engine::new(authority.clone(), Settings::default());
  let calls = Arc::new(AtomicU32::new(0));
  let cancelled = Arc::new(AtomicU32::new(0));

  let guarded = {
    let calls = Arc::clone(&calls);
    flow("guarded")
      .on_cancellation([counting_hook("cancelled", &cancelled)])
      .sync(move |_| {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(Output::from(()))
      })
      .build()
      .unwrap()
  };

  let state = engine.call_state(&guarded, CallArgs::new()).await.unwrap();
  assert!(state.is_cancelled());
  assert_eq!(state.message.as_deref(), Some("cancelled before start"));
  assert_eq!(calls.load(Ordering::SeqCst), 0);
  assert_eq!(cancelled.load(Ordering::SeqCst), 0);

  let run = &authority.list_runs(&RunFilter::default()).await.unwrap()[0];
  assert_eq!(run.run_count, 0);
}

/// An authority that cannot be reached.
#[derive(Default)]
struct Unreachable {
  requests: AtomicU32,
}

impl Unreachable {
  fn refuse<T>(&self) -> Result<T, ClientError> {
    self.requests.fetch_add(1, Ordering::SeqCst);
    Err(ClientError::unavailable("connection refused"))
  }
}

#[async_trait]
impl OrchestrationClient for Unreachable {
  async fn create_run(&self, _request: RunCreate) -> Result<Run, ClientError> {
    self.refuse()
  }

  async fn propose_state(&self, _run_id: Uuid, _candidate: State) -> Result<State, ClientError> {
    self.refuse()
  }

  async fn force_state(&self, _run_id: Uuid, _state: State) -> Result<State, ClientError> {
    self.refuse()
  }

  async fn read_run(&self, _run_id: Uuid) -> Result<Run, ClientError> {
    self.refuse()
  }

  async fn read_states(&self, _run_id: Uuid) -> Result<Vec<State>, ClientError> {
    self.refuse()
  }

  async fn list_runs(&self, _filter: &RunFilter) -> Result<Vec<Run>, ClientError> {
    self.refuse()
  }

  async fn create_logs(&self, _logs: Vec<LogRecord>) -> Result<(), ClientError> {
    self.refuse()
  }

  async fn read_logs(&self, _filter: &LogFilter) -> Result<Vec<LogRecord>, ClientError> {
    self.refuse()
  }
}

#[tokio::test]
async fn test_unreachable_authority_crashes_after_retries() {
  let authority = Arc::new(Unreachable::default());
  let settings = Settings {
    client_max_retries: 2,
    client_retry_delay_ms: 1,
    ..Settings::default()
  };
  let engine = Engine::new(authority.clone(), settings);
  let crashed_states = Arc::new(Mutex::new(Vec::new()));
  let hook = {
    let crashed_states = Arc::clone(&crashed_states);
    Hook::new("crashed", move |invocation| {
      crashed_states.lock().unwrap().push(invocation.state.clone());
      Ok(())
    })
  };

  let isolated = flow("isolated")
    .on_crashed([hook])
    .sync(|_| Ok(Output::from(())))
    .build()
    .unwrap();

  let state = engine.call_state(&isolated, CallArgs::new()).await.unwrap();
  assert!(state.is_crashed());
  assert!(
    state
      .message
      .as_deref()
      .unwrap()
      .starts_with("Crashed while communicating with the orchestration authority")
  );
  assert_eq!(authority.requests.load(Ordering::SeqCst), 3);
  assert_eq!(crashed_states.lock().unwrap().len(), 1);
}
