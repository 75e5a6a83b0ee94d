//! Contract tests run against both authority implementations.

use std::sync::Arc;

use serde_json::json;
use tributary_state::{State, StateType, Value};
use tributary_store::{
  ClientError, InMemoryAuthority, LogFilter, LogLevel, LogRecord, OrchestrationClient, RunCreate,
  RunFilter, RunInput, RunKind, SqliteAuthority,
};
use uuid::Uuid;

async fn authorities() -> Vec<(&'static str, Arc<dyn OrchestrationClient>)> {
  let sqlite = SqliteAuthority::connect("sqlite::memory:")
    .await
    .expect("failed to open sqlite authority");
  vec![
    ("memory", Arc::new(InMemoryAuthority::new())),
    ("sqlite", Arc::new(sqlite)),
  ]
}

fn flow_request(name: &str) -> RunCreate {
  let mut request = RunCreate::new(RunKind::Flow, name);
  request.parameters.insert("x", 1i64);
  request.tags.insert("nightly".to_string());
  request
}

#[tokio::test]
async fn test_create_run_starts_pending() {
  for (label, client) in authorities().await {
    let run = client.create_run(flow_request("etl")).await.unwrap();

    assert_eq!(run.state.state_type, StateType::Pending, "{label}");
    assert_eq!(run.state.state_details.flow_run_id, Some(run.id), "{label}");
    assert_eq!(run.run_count, 0, "{label}");

    let read = client.read_run(run.id).await.unwrap();
    assert_eq!(read.name, "etl", "{label}");
    assert_eq!(read.parameters.json("x"), Some(&json!(1)), "{label}");
    assert!(read.tags.contains("nightly"), "{label}");
  }
}

#[tokio::test]
async fn test_accepted_transitions_are_appended_in_order() {
  for (label, client) in authorities().await {
    let run = client.create_run(flow_request("etl")).await.unwrap();

    let running = client.propose_state(run.id, State::running()).await.unwrap();
    assert!(running.is_running(), "{label}");

    let completed = State::completed().with_data(Value::json(json!({"rows": 3})));
    let accepted = client.propose_state(run.id, completed).await.unwrap();
    assert!(accepted.is_completed(), "{label}");
    assert_eq!(accepted.state_details.flow_run_id, Some(run.id), "{label}");

    let history = client.read_states(run.id).await.unwrap();
    let types: Vec<StateType> = history.iter().map(|s| s.state_type).collect();
    assert_eq!(
      types,
      vec![StateType::Pending, StateType::Running, StateType::Completed],
      "{label}"
    );
    assert_eq!(
      history[2].data().as_json(),
      Some(&json!({"rows": 3})),
      "{label}"
    );

    let read = client.read_run(run.id).await.unwrap();
    assert_eq!(read.run_count, 1, "{label}");
    assert!(read.start_time.is_some(), "{label}");
    assert!(read.end_time.is_some(), "{label}");
  }
}

#[tokio::test]
async fn test_rejected_proposal_returns_current_state() {
  for (label, client) in authorities().await {
    let run = client.create_run(flow_request("etl")).await.unwrap();
    client
      .force_state(run.id, State::cancelled("stopped by operator"))
      .await
      .unwrap();

    let returned = client.propose_state(run.id, State::running()).await.unwrap();
    assert!(returned.is_cancelled(), "{label}");
    assert_eq!(
      returned.message.as_deref(),
      Some("stopped by operator"),
      "{label}"
    );
    assert_eq!(client.read_states(run.id).await.unwrap().len(), 2, "{label}");
  }
}

#[tokio::test]
async fn test_completion_after_cancelling_is_accepted() {
  for (label, client) in authorities().await {
    let run = client.create_run(flow_request("etl")).await.unwrap();
    client.propose_state(run.id, State::running()).await.unwrap();
    client
      .force_state(run.id, State::cancelling("requested"))
      .await
      .unwrap();

    let state = client.propose_state(run.id, State::completed()).await.unwrap();
    assert!(state.is_completed(), "{label}");
  }
}

#[tokio::test]
async fn test_retry_cycle_counts_runs() {
  for (label, client) in authorities().await {
    let run = client.create_run(flow_request("etl")).await.unwrap();
    client.propose_state(run.id, State::running()).await.unwrap();
    client.propose_state(run.id, State::failed("x")).await.unwrap();
    let retry = client
      .propose_state(run.id, State::awaiting_retry(chrono::Utc::now()))
      .await
      .unwrap();
    assert_eq!(retry.name, "AwaitingRetry", "{label}");
    client.propose_state(run.id, State::running()).await.unwrap();
    client.propose_state(run.id, State::completed()).await.unwrap();

    let read = client.read_run(run.id).await.unwrap();
    assert_eq!(read.run_count, 2, "{label}");
    assert!(read.state.is_completed(), "{label}");
  }
}

#[tokio::test]
async fn test_task_runs_link_to_their_flow() {
  for (label, client) in authorities().await {
    let flow = client.create_run(flow_request("etl")).await.unwrap();

    let mut request = RunCreate::new(RunKind::Task, "extract");
    request.flow_run_id = Some(flow.id);
    request.dynamic_key = Some("0".to_string());
    let task = client.create_run(request).await.unwrap();

    assert_eq!(task.state.state_details.task_run_id, Some(task.id), "{label}");
    assert_eq!(task.state.state_details.flow_run_id, Some(flow.id), "{label}");

    let tasks = client
      .list_runs(&RunFilter::default().kind(RunKind::Task).flow_run_id(flow.id))
      .await
      .unwrap();
    assert_eq!(tasks.len(), 1, "{label}");
    assert_eq!(tasks[0].id, task.id, "{label}");

    let all = client.list_runs(&RunFilter::default()).await.unwrap();
    assert_eq!(all.len(), 2, "{label}");
  }
}

#[tokio::test]
async fn test_unknown_run_is_not_found() {
  for (label, client) in authorities().await {
    let missing = Uuid::new_v4();
    let err = client.read_run(missing).await.unwrap_err();
    assert!(matches!(err, ClientError::NotFound(id) if id == missing), "{label}");

    let err = client
      .propose_state(missing, State::running())
      .await
      .unwrap_err();
    assert!(matches!(err, ClientError::NotFound(_)), "{label}");
    assert!(!err.is_retryable(), "{label}");
  }
}

#[tokio::test]
async fn test_sqlite_history_survives_reopen() {
  let dir = tempfile::tempdir().expect("failed to create temp dir");
  let path = dir.path().join("runs.db");

  let run_id = {
    let authority = SqliteAuthority::open(&path).await.unwrap();
    let run = authority.create_run(flow_request("etl")).await.unwrap();
    authority.propose_state(run.id, State::running()).await.unwrap();
    authority
      .propose_state(run.id, State::failed("disk full"))
      .await
      .unwrap();
    run.id
  };

  let authority = SqliteAuthority::open(&path).await.unwrap();
  let run = authority.read_run(run_id).await.unwrap();
  assert!(run.state.is_failed());
  assert_eq!(run.state.message.as_deref(), Some("disk full"));
  assert_eq!(run.run_count, 1);
}

#[tokio::test]
async fn test_task_inputs_are_recorded() {
  for (label, client) in authorities().await {
    let flow_run = client.create_run(flow_request("etl")).await.unwrap();
    let upstream = Uuid::new_v4();

    let mut request = RunCreate::new(RunKind::Task, "load");
    request.flow_run_id = Some(flow_run.id);
    request.task_inputs.insert(
      "rows".to_string(),
      vec![RunInput {
        kind: RunKind::Task,
        id: upstream,
      }],
    );
    let run = client.create_run(request).await.unwrap();

    let read = client.read_run(run.id).await.unwrap();
    assert_eq!(read.task_inputs.len(), 1, "{label}");
    assert_eq!(read.task_inputs["rows"][0].id, upstream, "{label}");
    assert!(client.read_run(flow_run.id).await.unwrap().task_inputs.is_empty(), "{label}");
  }
}

#[tokio::test]
async fn test_logs_are_read_back_per_run_in_order() {
  for (label, client) in authorities().await {
    let flow_run_id = Uuid::new_v4();
    let task_run_id = Uuid::new_v4();
    let log = |level: LogLevel, message: &str, task_run_id: Option<Uuid>| LogRecord {
      name: "tributary.flow_runs".to_string(),
      level,
      message: message.to_string(),
      timestamp: chrono::Utc::now(),
      flow_run_id: Some(flow_run_id),
      task_run_id,
    };

    client
      .create_logs(vec![
        log(LogLevel::Info, "first", None),
        log(LogLevel::Debug, "second", None),
        log(LogLevel::Error, "from the task", Some(task_run_id)),
      ])
      .await
      .unwrap();
    client.create_logs(Vec::new()).await.unwrap();

    let flow_logs = client
      .read_logs(&LogFilter::default().flow_run_id(flow_run_id))
      .await
      .unwrap();
    let messages: Vec<&str> = flow_logs.iter().map(|log| log.message.as_str()).collect();
    assert_eq!(messages, vec!["first", "second", "from the task"], "{label}");

    let task_logs = client
      .read_logs(&LogFilter::default().task_run_id(task_run_id))
      .await
      .unwrap();
    assert_eq!(task_logs.len(), 1, "{label}");
    assert_eq!(task_logs[0].level, LogLevel::Error, "{label}");

    let important = client
      .read_logs(&LogFilter::default().flow_run_id(flow_run_id).min_level(LogLevel::Info))
      .await
      .unwrap();
    assert_eq!(important.len(), 2, "{label}");
  }
}
