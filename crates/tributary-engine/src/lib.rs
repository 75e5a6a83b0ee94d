//! Tributary Engine
//!
//! Runs flows and tasks as tracked runs against an orchestration authority.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Definition                            │
//! │  - body + signature + retry/timeout/hook configuration      │
//! │  - call(args) nests under the current run                   │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Engine                              │
//! │  - bind + validate parameters                               │
//! │  - create run, propose Running, execute, propose terminal   │
//! │  - retries, hooks, termination, subflow tracking            │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   OrchestrationClient                       │
//! │  - owns run history, accepts or rejects proposals           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use tributary_engine::{Engine, flow, task, CallArgs, Output};
//!
//! let add = task("add")
//!   .param(Param::new("x"))
//!   .sync(|params| Ok(Output::from(params.extract::<i64>("x")? + 1)))
//!   .build()?;
//!
//! let pipeline = flow("pipeline")
//!   .asynchronous(move |_| {
//!     let add = add.clone();
//!     async move { Ok(add.call(CallArgs::new().arg(1)).await?.try_into()?) }
//!   })
//!   .build()?;
//!
//! let engine = Engine::new(Arc::new(InMemoryAuthority::new()), Settings::default());
//! let state = engine.call_state(&pipeline, CallArgs::new()).await?;
//! ```

mod adapter;
mod context;
mod definition;
mod engine;
mod error;
mod events;
mod hooks;
mod loader;
mod logger;
mod outcome;
mod retry;
mod signals;

pub use context::{RunFrame, current, tags, with_tags, with_tags_sync};
pub use definition::{Body, Definition, DefinitionBuilder, Output, RunName, flow, task};
pub use engine::Engine;
pub use error::{
  CallError, Cancellation, DefinitionError, EngineError, LoadError, OutputError, RunTimeout,
  ScriptError,
};
pub use events::{ChannelNotifier, ExecutionNotifier, NoopNotifier, RunEvent};
pub use hooks::{Hook, HookInvocation, HookKind, Hooks};
pub use loader::{Catalog, Entrypoint, load_from_entrypoint, load_from_source};
pub use logger::{RunLogger, run_logger};
pub use retry::RetryDelay;
pub use signals::Termination;

pub use tributary_params::{CallArgs, Param, Parameters, SchemaType, Signature};
pub use tributary_state::{State, StateData, StateType, Value};
pub use tributary_store::{LogLevel, RunKind};
