//! Logs attached to the run that emitted them.
//!
//! A [`RunLogger`] writes every record to `tracing` and queues it on the
//! current frame. The engine sends the queue to the authority when the
//! attempt ends; records emitted after that (by an abandoned sync body) are
//! only traced.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};
use tributary_store::{LogLevel, LogRecord, RunKind};

use crate::context::{self, RunFrame};
use crate::error::EngineError;

/// Logger bound to one run.
#[derive(Clone)]
pub struct RunLogger {
  frame: Arc<RunFrame>,
}

/// A logger for the innermost active run.
pub fn run_logger() -> Result<RunLogger, EngineError> {
  context::current()
    .map(|frame| RunLogger { frame })
    .ok_or(EngineError::NoActiveRun)
}

impl RunLogger {
  /// Logger name recorded with each message.
  pub fn name(&self) -> &'static str {
    match self.frame.kind() {
      RunKind::Flow => "tributary.flow_runs",
      RunKind::Task => "tributary.task_runs",
    }
  }

  pub fn debug(&self, message: impl Into<String>) {
    self.log(LogLevel::Debug, message);
  }

  pub fn info(&self, message: impl Into<String>) {
    self.log(LogLevel::Info, message);
  }

  pub fn warning(&self, message: impl Into<String>) {
    self.log(LogLevel::Warning, message);
  }

  pub fn error(&self, message: impl Into<String>) {
    self.log(LogLevel::Error, message);
  }

  pub fn log(&self, level: LogLevel, message: impl Into<String>) {
    let message = message.into();
    let run_id = self.frame.run_id();
    let run_name = &self.frame.run().name;
    match level {
      LogLevel::Debug => debug!(%run_id, run_name = %run_name, "{message}"),
      LogLevel::Info => info!(%run_id, run_name = %run_name, "{message}"),
      LogLevel::Warning => warn!(%run_id, run_name = %run_name, "{message}"),
      LogLevel::Error | LogLevel::Critical => error!(%run_id, run_name = %run_name, "{message}"),
    }

    let record = LogRecord {
      name: self.name().to_string(),
      level,
      message,
      timestamp: Utc::now(),
      flow_run_id: self.frame.flow_run_id(),
      task_run_id: (self.frame.kind() == RunKind::Task).then_some(run_id),
    };
    if !self.frame.push_log(record) {
      debug!(%run_id, "run_log_after_attempt");
    }
  }
}
