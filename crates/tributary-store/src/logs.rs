//! Log records attached to runs.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum LogLevel {
  Debug,
  Info,
  Warning,
  Error,
  Critical,
}

impl fmt::Display for LogLevel {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let label = match self {
      LogLevel::Debug => "DEBUG",
      LogLevel::Info => "INFO",
      LogLevel::Warning => "WARNING",
      LogLevel::Error => "ERROR",
      LogLevel::Critical => "CRITICAL",
    };
    f.write_str(label)
  }
}

/// A message emitted by user code while a run was executing.
///
/// Task run logs carry both their task run and the flow run it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
  /// Logger that emitted the record, e.g. `tributary.flow_runs`.
  pub name: String,
  pub level: LogLevel,
  pub message: String,
  pub timestamp: DateTime<Utc>,
  pub flow_run_id: Option<Uuid>,
  pub task_run_id: Option<Uuid>,
}

/// Selects records for [`crate::OrchestrationClient::read_logs`].
#[derive(Debug, Clone, Default)]
pub struct LogFilter {
  pub flow_run_id: Option<Uuid>,
  pub task_run_id: Option<Uuid>,
  pub min_level: Option<LogLevel>,
}

impl LogFilter {
  pub fn flow_run_id(mut self, id: Uuid) -> Self {
    self.flow_run_id = Some(id);
    self
  }

  pub fn task_run_id(mut self, id: Uuid) -> Self {
    self.task_run_id = Some(id);
    self
  }

  pub fn min_level(mut self, level: LogLevel) -> Self {
    self.min_level = Some(level);
    self
  }

  /// Matches records of the given run, whether it is a flow or a task run.
  pub fn run_id(self, id: Uuid, kind: crate::RunKind) -> Self {
    match kind {
      crate::RunKind::Flow => self.flow_run_id(id),
      crate::RunKind::Task => self.task_run_id(id),
    }
  }

  pub fn matches(&self, record: &LogRecord) -> bool {
    self
      .flow_run_id
      .is_none_or(|id| Some(id) == record.flow_run_id)
      && self
        .task_run_id
        .is_none_or(|id| Some(id) == record.task_run_id)
      && self.min_level.is_none_or(|level| record.level >= level)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn record(level: LogLevel, task_run_id: Option<Uuid>) -> LogRecord {
    LogRecord {
      name: "tributary.task_runs".to_string(),
      level,
      message: "hello".to_string(),
      timestamp: Utc::now(),
      flow_run_id: Some(Uuid::new_v4()),
      task_run_id,
    }
  }

  #[test]
  fn test_filter_by_run_and_level() {
    let task_run_id = Uuid::new_v4();
    let info = record(LogLevel::Info, Some(task_run_id));
    let debug = record(LogLevel::Debug, None);

    assert!(LogFilter::default().matches(&debug));
    assert!(LogFilter::default().task_run_id(task_run_id).matches(&info));
    assert!(!LogFilter::default().task_run_id(task_run_id).matches(&debug));
    assert!(!LogFilter::default().min_level(LogLevel::Info).matches(&debug));
    assert!(LogFilter::default().min_level(LogLevel::Info).matches(&info));
  }

  #[test]
  fn test_levels_serialize_snake_case() {
    assert_eq!(
      serde_json::to_string(&LogLevel::Warning).unwrap(),
      "\"warning\""
    );
    assert_eq!(LogLevel::Critical.to_string(), "CRITICAL");
  }
}
