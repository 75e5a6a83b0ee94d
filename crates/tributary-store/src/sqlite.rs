use std::collections::BTreeSet;
use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::types::Json;
use sqlx::{FromRow, SqliteConnection, SqlitePool};
use tokio::sync::Mutex;
use tracing::debug;
use tributary_params::Parameters;
use tributary_state::{State, StateDetails, StateType};
use uuid::Uuid;

use crate::codec::StoredData;
use crate::policy::{Transition, evaluate_transition};
use crate::{
  ClientError, LogFilter, LogLevel, LogRecord, OrchestrationClient, Run, RunCreate, RunFilter,
  RunKind, TaskInputs,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS runs (
  id TEXT PRIMARY KEY NOT NULL,
  kind TEXT NOT NULL,
  name TEXT NOT NULL,
  definition_name TEXT NOT NULL,
  version TEXT,
  tags TEXT NOT NULL,
  parameters TEXT NOT NULL,
  run_count INTEGER NOT NULL DEFAULT 0,
  flow_run_id TEXT,
  parent_task_run_id TEXT,
  dynamic_key TEXT,
  task_inputs TEXT NOT NULL DEFAULT '{}',
  created TEXT NOT NULL,
  start_time TEXT,
  end_time TEXT
);

CREATE TABLE IF NOT EXISTS run_states (
  position INTEGER PRIMARY KEY AUTOINCREMENT,
  id TEXT NOT NULL,
  run_id TEXT NOT NULL REFERENCES runs (id),
  state_type TEXT NOT NULL,
  name TEXT NOT NULL,
  message TEXT,
  timestamp TEXT NOT NULL,
  data TEXT NOT NULL,
  details TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS run_states_run_id ON run_states (run_id, position);

CREATE TABLE IF NOT EXISTS logs (
  position INTEGER PRIMARY KEY AUTOINCREMENT,
  name TEXT NOT NULL,
  level TEXT NOT NULL,
  message TEXT NOT NULL,
  timestamp TEXT NOT NULL,
  flow_run_id TEXT,
  task_run_id TEXT
);
"#;

const RUN_COLUMNS: &str = r#"
  r.id, r.kind, r.name, r.definition_name, r.version, r.tags, r.parameters,
  r.run_count, r.flow_run_id, r.parent_task_run_id, r.dynamic_key, r.task_inputs,
  r.created, r.start_time, r.end_time,
  s.id AS state_id, s.state_type, s.name AS state_name, s.message AS state_message,
  s.timestamp AS state_timestamp, s.data AS state_data, s.details AS state_details
FROM runs r
JOIN run_states s
  ON s.position = (SELECT MAX(position) FROM run_states WHERE run_id = r.id)
"#;

/// Authority that persists runs and their state history with SQLite.
///
/// Accepted proposals return the candidate as given; states read back from
/// the database carry the stored form of their payload.
pub struct SqliteAuthority {
  pool: SqlitePool,
  writes: Mutex<()>,
}

impl SqliteAuthority {
  /// Create an authority over an existing pool. Call [`Self::migrate`] before use.
  pub fn new(pool: SqlitePool) -> Self {
    Self {
      pool,
      writes: Mutex::new(()),
    }
  }

  /// Connect to `url` (e.g. `sqlite::memory:`) and create the schema.
  pub async fn connect(url: &str) -> Result<Self, ClientError> {
    let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
    Self::connect_with(options).await
  }

  /// Open or create the database file at `path`.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self, ClientError> {
    let options = SqliteConnectOptions::new()
      .filename(path)
      .create_if_missing(true);
    Self::connect_with(options).await
  }

  async fn connect_with(options: SqliteConnectOptions) -> Result<Self, ClientError> {
    // A single long-lived connection keeps `sqlite::memory:` databases alive.
    let pool = SqlitePoolOptions::new()
      .max_connections(1)
      .idle_timeout(None)
      .max_lifetime(None)
      .connect_with(options)
      .await?;

    let authority = Self::new(pool);
    authority.migrate().await?;
    Ok(authority)
  }

  /// Create tables if they do not exist.
  pub async fn migrate(&self) -> Result<(), ClientError> {
    sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
    Ok(())
  }

  async fn append(
    conn: &mut SqliteConnection,
    run: &mut Run,
    state: State,
  ) -> Result<(), ClientError> {
    let data = serde_json::to_string(&StoredData::from(&state.data))?;
    let details = serde_json::to_string(&state.state_details)?;

    sqlx::query(
      r#"
      INSERT INTO run_states (id, run_id, state_type, name, message, timestamp, data, details)
      VALUES (?, ?, ?, ?, ?, ?, ?, ?)
      "#,
    )
    .bind(state.id.to_string())
    .bind(run.id.to_string())
    .bind(state.state_type.as_str())
    .bind(&state.name)
    .bind(&state.message)
    .bind(state.timestamp)
    .bind(data)
    .bind(details)
    .execute(&mut *conn)
    .await?;

    run.record(state);

    sqlx::query(
      r#"
      UPDATE runs
      SET run_count = ?, start_time = ?, end_time = ?
      WHERE id = ?
      "#,
    )
    .bind(i64::from(run.run_count))
    .bind(run.start_time)
    .bind(run.end_time)
    .bind(run.id.to_string())
    .execute(&mut *conn)
    .await?;

    Ok(())
  }

  async fn fetch_run(conn: &mut SqliteConnection, run_id: Uuid) -> Result<Run, ClientError> {
    let query = format!("SELECT {RUN_COLUMNS} WHERE r.id = ?");
    let row: Option<RunRow> = sqlx::query_as(&query)
      .bind(run_id.to_string())
      .fetch_optional(&mut *conn)
      .await?;

    row.ok_or(ClientError::NotFound(run_id))?.into_run()
  }
}

#[async_trait]
impl OrchestrationClient for SqliteAuthority {
  async fn create_run(&self, request: RunCreate) -> Result<Run, ClientError> {
    let _guard = self.writes.lock().await;
    let mut tx = self.pool.begin().await?;

    let initial = request.state.clone();
    let mut run = Run::from_request(Uuid::new_v4(), request);
    let mut state = initial;
    run.stamp(&mut state);

    sqlx::query(
      r#"
      INSERT INTO runs (id, kind, name, definition_name, version, tags, parameters,
                        run_count, flow_run_id, parent_task_run_id, dynamic_key,
                        task_inputs, created)
      VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?, ?, ?, ?, ?)
      "#,
    )
    .bind(run.id.to_string())
    .bind(run.kind)
    .bind(&run.name)
    .bind(&run.definition_name)
    .bind(&run.version)
    .bind(Json(&run.tags))
    .bind(Json(run.parameters.describe()))
    .bind(run.flow_run_id.map(|id| id.to_string()))
    .bind(run.parent_task_run_id.map(|id| id.to_string()))
    .bind(&run.dynamic_key)
    .bind(Json(&run.task_inputs))
    .bind(run.created)
    .execute(&mut *tx)
    .await?;

    // `from_request` already counted the initial state; start from zero again.
    run.run_count = 0;
    run.start_time = None;
    run.end_time = None;
    Self::append(&mut *tx, &mut run, state).await?;

    tx.commit().await?;
    Ok(run)
  }

  async fn propose_state(&self, run_id: Uuid, candidate: State) -> Result<State, ClientError> {
    let _guard = self.writes.lock().await;
    let mut tx = self.pool.begin().await?;

    let mut run = Self::fetch_run(&mut *tx, run_id).await?;
    let current = run.state.state_type;

    match evaluate_transition(current, candidate.state_type) {
      Transition::Accept => {
        let mut state = candidate;
        run.stamp(&mut state);
        Self::append(&mut *tx, &mut run, state.clone()).await?;
        tx.commit().await?;
        Ok(state)
      }
      Transition::Reject => {
        debug!(
          run_id = %run_id,
          current = %current,
          proposed = %candidate.state_type,
          "transition_rejected"
        );
        tx.rollback().await?;
        Ok(run.state)
      }
    }
  }

  async fn force_state(&self, run_id: Uuid, state: State) -> Result<State, ClientError> {
    let _guard = self.writes.lock().await;
    let mut tx = self.pool.begin().await?;

    let mut run = Self::fetch_run(&mut *tx, run_id).await?;
    let mut state = state;
    run.stamp(&mut state);
    Self::append(&mut *tx, &mut run, state.clone()).await?;

    tx.commit().await?;
    Ok(state)
  }

  async fn read_run(&self, run_id: Uuid) -> Result<Run, ClientError> {
    let mut conn = self.pool.acquire().await?;
    Self::fetch_run(&mut *conn, run_id).await
  }

  async fn read_states(&self, run_id: Uuid) -> Result<Vec<State>, ClientError> {
    let rows: Vec<StateRow> = sqlx::query_as(
      r#"
      SELECT id, state_type, name, message, timestamp, data, details
      FROM run_states
      WHERE run_id = ?
      ORDER BY position ASC
      "#,
    )
    .bind(run_id.to_string())
    .fetch_all(&self.pool)
    .await?;

    if rows.is_empty() {
      return Err(ClientError::NotFound(run_id));
    }

    rows.into_iter().map(StateRow::into_state).collect()
  }

  async fn list_runs(&self, filter: &RunFilter) -> Result<Vec<Run>, ClientError> {
    let query = format!("SELECT {RUN_COLUMNS} ORDER BY r.created ASC");
    let rows: Vec<RunRow> = sqlx::query_as(&query).fetch_all(&self.pool).await?;

    let mut runs = Vec::with_capacity(rows.len());
    for row in rows {
      let run = row.into_run()?;
      if filter.matches(&run) {
        runs.push(run);
      }
    }
    Ok(runs)
  }

  async fn create_logs(&self, logs: Vec<LogRecord>) -> Result<(), ClientError> {
    if logs.is_empty() {
      return Ok(());
    }

    let _guard = self.writes.lock().await;
    let mut tx = self.pool.begin().await?;
    for log in logs {
      sqlx::query(
        r#"
        INSERT INTO logs (name, level, message, timestamp, flow_run_id, task_run_id)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
      )
      .bind(&log.name)
      .bind(log.level)
      .bind(&log.message)
      .bind(log.timestamp)
      .bind(log.flow_run_id.map(|id| id.to_string()))
      .bind(log.task_run_id.map(|id| id.to_string()))
      .execute(&mut *tx)
      .await?;
    }
    tx.commit().await?;
    Ok(())
  }

  async fn read_logs(&self, filter: &LogFilter) -> Result<Vec<LogRecord>, ClientError> {
    let rows: Vec<LogRow> = sqlx::query_as(
      r#"
      SELECT name, level, message, timestamp, flow_run_id, task_run_id
      FROM logs
      ORDER BY position ASC
      "#,
    )
    .fetch_all(&self.pool)
    .await?;

    let mut logs = Vec::with_capacity(rows.len());
    for row in rows {
      let log = row.into_record()?;
      if filter.matches(&log) {
        logs.push(log);
      }
    }
    Ok(logs)
  }
}

#[derive(FromRow)]
struct LogRow {
  name: String,
  level: LogLevel,
  message: String,
  timestamp: DateTime<Utc>,
  flow_run_id: Option<String>,
  task_run_id: Option<String>,
}

impl LogRow {
  fn into_record(self) -> Result<LogRecord, ClientError> {
    Ok(LogRecord {
      name: self.name,
      level: self.level,
      message: self.message,
      timestamp: self.timestamp,
      flow_run_id: self.flow_run_id.as_deref().map(parse_uuid).transpose()?,
      task_run_id: self.task_run_id.as_deref().map(parse_uuid).transpose()?,
    })
  }
}

#[derive(FromRow)]
struct StateRow {
  id: String,
  state_type: String,
  name: String,
  message: Option<String>,
  timestamp: DateTime<Utc>,
  data: Json<StoredData>,
  details: Json<StateDetails>,
}

impl StateRow {
  fn into_state(self) -> Result<State, ClientError> {
    decode_state(
      &self.id,
      &self.state_type,
      self.name,
      self.message,
      self.timestamp,
      self.data.0,
      self.details.0,
    )
  }
}

#[derive(FromRow)]
struct RunRow {
  id: String,
  kind: RunKind,
  name: String,
  definition_name: String,
  version: Option<String>,
  tags: Json<BTreeSet<String>>,
  parameters: Json<serde_json::Value>,
  run_count: i64,
  flow_run_id: Option<String>,
  parent_task_run_id: Option<String>,
  dynamic_key: Option<String>,
  task_inputs: Json<TaskInputs>,
  created: DateTime<Utc>,
  start_time: Option<DateTime<Utc>>,
  end_time: Option<DateTime<Utc>>,
  state_id: String,
  state_type: String,
  state_name: String,
  state_message: Option<String>,
  state_timestamp: DateTime<Utc>,
  state_data: Json<StoredData>,
  state_details: Json<StateDetails>,
}

impl RunRow {
  fn into_run(self) -> Result<Run, ClientError> {
    let state = decode_state(
      &self.state_id,
      &self.state_type,
      self.state_name,
      self.state_message,
      self.state_timestamp,
      self.state_data.0,
      self.state_details.0,
    )?;

    Ok(Run {
      id: parse_uuid(&self.id)?,
      kind: self.kind,
      name: self.name,
      definition_name: self.definition_name,
      version: self.version,
      tags: self.tags.0,
      parameters: Parameters::from_json(&self.parameters.0),
      state,
      run_count: u32::try_from(self.run_count).map_err(|_| ClientError::Corrupt {
        message: format!("run_count out of range: {}", self.run_count),
      })?,
      flow_run_id: self.flow_run_id.as_deref().map(parse_uuid).transpose()?,
      parent_task_run_id: self
        .parent_task_run_id
        .as_deref()
        .map(parse_uuid)
        .transpose()?,
      dynamic_key: self.dynamic_key,
      task_inputs: self.task_inputs.0,
      created: self.created,
      start_time: self.start_time,
      end_time: self.end_time,
    })
  }
}

fn decode_state(
  id: &str,
  state_type: &str,
  name: String,
  message: Option<String>,
  timestamp: DateTime<Utc>,
  data: StoredData,
  state_details: StateDetails,
) -> Result<State, ClientError> {
  let state_type = StateType::from_str(state_type).map_err(|e| ClientError::Corrupt {
    message: e.to_string(),
  })?;

  Ok(State {
    id: parse_uuid(id)?,
    state_type,
    name,
    message,
    timestamp,
    data: data.into(),
    state_details,
  })
}

fn parse_uuid(text: &str) -> Result<Uuid, ClientError> {
  Uuid::parse_str(text).map_err(|e| ClientError::Corrupt {
    message: format!("invalid id '{text}': {e}"),
  })
}
