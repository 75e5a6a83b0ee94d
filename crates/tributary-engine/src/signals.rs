//! Process termination.
//!
//! A [`Termination`] is a second cancellation channel next to the per-run
//! tokens: run timeouts and interrupted sub-calls flow through the tokens,
//! operator signals flow through here. Active runs race their body against
//! [`Termination::terminated`] and resolve to Cancelled or Crashed when it
//! fires.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Shared handle marking the process as terminating.
#[derive(Debug, Clone, Default)]
pub struct Termination {
  token: CancellationToken,
}

impl Termination {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn terminate(&self) {
    self.token.cancel();
  }

  pub fn is_terminated(&self) -> bool {
    self.token.is_cancelled()
  }

  /// Completes once [`Termination::terminate`] is called.
  pub async fn terminated(&self) {
    self.token.cancelled().await
  }

  /// Terminate on SIGINT (ctrl-c) or, on unix, SIGTERM.
  pub fn listen_for_signals(&self) -> JoinHandle<()> {
    let termination = self.clone();
    tokio::spawn(async move {
      wait_for_signal().await;
      info!("termination_signal_received");
      termination.terminate();
    })
  }
}

#[cfg(unix)]
async fn wait_for_signal() {
  use tokio::signal::unix::{SignalKind, signal};

  match signal(SignalKind::terminate()) {
    Ok(mut sigterm) => {
      tokio::select! {
        _ = sigterm.recv() => {}
        result = tokio::signal::ctrl_c() => log_ctrl_c_error(result),
      }
    }
    Err(error) => {
      warn!(error = %error, "sigterm_handler_unavailable");
      log_ctrl_c_error(tokio::signal::ctrl_c().await);
    }
  }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
  log_ctrl_c_error(tokio::signal::ctrl_c().await);
}

fn log_ctrl_c_error(result: std::io::Result<()>) {
  if let Err(error) = result {
    warn!(error = %error, "ctrl_c_handler_unavailable");
  }
}
