use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;
use tributary_state::State;
use uuid::Uuid;

use crate::policy::{Transition, evaluate_transition};
use crate::{ClientError, LogFilter, LogRecord, OrchestrationClient, Run, RunCreate, RunFilter};

struct Record {
  run: Run,
  history: Vec<State>,
}

/// Authority that keeps runs in process memory.
///
/// States are held as given, so values returned by user code keep their
/// identity when read back. Clones share the same records.
#[derive(Clone, Default)]
pub struct InMemoryAuthority {
  records: Arc<RwLock<HashMap<Uuid, Record>>>,
  logs: Arc<RwLock<Vec<LogRecord>>>,
}

impl InMemoryAuthority {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl OrchestrationClient for InMemoryAuthority {
  async fn create_run(&self, request: RunCreate) -> Result<Run, ClientError> {
    let run = Run::from_request(Uuid::new_v4(), request);
    let record = Record {
      history: vec![run.state.clone()],
      run: run.clone(),
    };
    self.records.write().await.insert(run.id, record);
    Ok(run)
  }

  async fn propose_state(&self, run_id: Uuid, candidate: State) -> Result<State, ClientError> {
    let mut records = self.records.write().await;
    let record = records.get_mut(&run_id).ok_or(ClientError::NotFound(run_id))?;

    let current = record.run.state.state_type;
    match evaluate_transition(current, candidate.state_type) {
      Transition::Accept => {
        let mut state = candidate;
        record.run.stamp(&mut state);
        record.history.push(state.clone());
        record.run.record(state.clone());
        Ok(state)
      }
      Transition::Reject => {
        debug!(
          run_id = %run_id,
          current = %current,
          proposed = %candidate.state_type,
          "transition_rejected"
        );
        Ok(record.run.state.clone())
      }
    }
  }

  async fn force_state(&self, run_id: Uuid, state: State) -> Result<State, ClientError> {
    let mut records = self.records.write().await;
    let record = records.get_mut(&run_id).ok_or(ClientError::NotFound(run_id))?;

    let mut state = state;
    record.run.stamp(&mut state);
    record.history.push(state.clone());
    record.run.record(state.clone());
    Ok(state)
  }

  async fn read_run(&self, run_id: Uuid) -> Result<Run, ClientError> {
    let records = self.records.read().await;
    records
      .get(&run_id)
      .map(|r| r.run.clone())
      .ok_or(ClientError::NotFound(run_id))
  }

  async fn read_states(&self, run_id: Uuid) -> Result<Vec<State>, ClientError> {
    let records = self.records.read().await;
    records
      .get(&run_id)
      .map(|r| r.history.clone())
      .ok_or(ClientError::NotFound(run_id))
  }

  async fn list_runs(&self, filter: &RunFilter) -> Result<Vec<Run>, ClientError> {
    let records = self.records.read().await;
    let mut runs: Vec<Run> = records
      .values()
      .map(|r| &r.run)
      .filter(|run| filter.matches(run))
      .cloned()
      .collect();
    runs.sort_by_key(|run| run.created);
    Ok(runs)
  }

  async fn create_logs(&self, logs: Vec<LogRecord>) -> Result<(), ClientError> {
    self.logs.write().await.extend(logs);
    Ok(())
  }

  async fn read_logs(&self, filter: &LogFilter) -> Result<Vec<LogRecord>, ClientError> {
    let logs = self.logs.read().await;
    Ok(logs.iter().filter(|log| filter.matches(log)).cloned().collect())
  }
}
