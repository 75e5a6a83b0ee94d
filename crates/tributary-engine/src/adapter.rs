//! Runs a body under a deadline and the termination channel.
//!
//! Async bodies run inline in the caller's task. When the deadline fires, the
//! body future is dropped, which cancels it at its current await point along
//! with any nested runs it is awaiting.
//!
//! On termination the body keeps running until every nested run under it has
//! resolved its own termination, so runs settle innermost first.
//!
//! Sync bodies run on the blocking pool. There is no way to stop a thread, so
//! on timeout the thread is abandoned and keeps running; it only stops when it
//! reaches its next nested call, which is refused once the attempt's token is
//! cancelled.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tributary_params::Parameters;

use crate::context::{self, RunFrame};
use crate::definition::{Body, Output};
use crate::signals::Termination;

/// How a body invocation ended.
pub(crate) enum Execution {
  Returned(Output),
  Raised(anyhow::Error),
  Panicked(String),
  TimedOut(Duration),
  Terminated,
}

pub(crate) async fn execute(
  body: &Body,
  parameters: Parameters,
  frame: Arc<RunFrame>,
  timeout: Option<Duration>,
  termination: &Termination,
) -> Execution {
  let watched = Arc::clone(&frame);
  let work = async {
    match body {
      Body::Sync(f) => {
        let f = Arc::clone(f);
        let handle = tokio::task::spawn_blocking(move || {
          context::sync_scope(frame, || catch_unwind(AssertUnwindSafe(|| f(parameters))))
        });
        match handle.await {
          Ok(Ok(result)) => returned(result),
          Ok(Err(payload)) => Execution::Panicked(panic_message(payload.as_ref())),
          Err(error) => Execution::Panicked(error.to_string()),
        }
      }
      Body::Async(f) => {
        let f = Arc::clone(f);
        let fut = async move { f(parameters).await };
        match AssertUnwindSafe(context::scope(frame, fut))
          .catch_unwind()
          .await
        {
          Ok(result) => returned(result),
          Err(payload) => Execution::Panicked(panic_message(payload.as_ref())),
        }
      }
    }
  };
  tokio::pin!(work);

  let deadline = async {
    match timeout {
      Some(timeout) => {
        tokio::time::sleep(timeout).await;
        timeout
      }
      None => std::future::pending().await,
    }
  };

  tokio::select! {
    biased;
    _ = termination.terminated() => {}
    execution = &mut work => return execution,
    timeout = deadline => return Execution::TimedOut(timeout),
  }

  // Nested runs observe the same termination and resolve themselves first;
  // keep polling the body until they have.
  tokio::select! {
    _ = &mut work => {}
    _ = watched.children_settled() => {}
  }
  Execution::Terminated
}

fn returned(result: anyhow::Result<Output>) -> Execution {
  match result {
    Ok(output) => Execution::Returned(output),
    Err(error) => Execution::Raised(error),
  }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
  payload
    .downcast_ref::<&str>()
    .map(|s| s.to_string())
    .or_else(|| payload.downcast_ref::<String>().cloned())
    .unwrap_or_else(|| "unknown panic".to_string())
}
