//! Tributary State
//!
//! The typed representation of where a run is in its lifecycle.
//!
//! A [`State`] is an immutable snapshot: a [`StateType`], a display name that
//! may differ from the type (a failed state named `TimedOut`), an optional
//! message, [`StateDetails`] linking it to its run, and a [`StateData`]
//! payload. Engines never mutate a state in place; each transition proposes a
//! new one.
//!
//! Resolving a state with [`State::result`] returns the payload for completed
//! runs and a [`ResultError`] otherwise. Failures captured from user code
//! come back as [`ResultError::Raised`], which downcasts to the original error.

mod data;
mod error;
mod group;
mod state;
mod value;

pub use data::{CapturedError, ResultRef, StateData};
pub use error::ResultError;
pub use group::StateGroup;
pub use state::{State, StateDetails, StateType, UnknownStateType};
pub use value::{Opaque, Value};
