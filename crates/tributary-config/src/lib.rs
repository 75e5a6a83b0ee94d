//! Tributary Config
//!
//! This crate contains the serializable configuration types for tributary.
//!
//! - [`Settings`] carries process-wide defaults for the engine (default retry
//!   budgets, authority retry limits, hook gating, result persistence). They are
//!   loaded from `TRIBUTARY_*` environment variables.
//! - [`SourceFile`] describes flows and tasks in JSON so they can be loaded from
//!   an entrypoint such as `flows.json:etl` and bound to registered callables.

mod settings;
mod source;

pub use settings::{ConfigError, ENV_PREFIX, Settings};
pub use source::{DefinitionConfig, DefinitionKind, RetryDelayConfig, SourceFile};
