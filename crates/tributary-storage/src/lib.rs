//! Tributary Storage
//!
//! Two filesystem-facing collaborators of the engine:
//!
//! - [`ResultStore`] persists JSON results under generated keys so a
//!   completed state can carry a reference instead of the value.
//! - [`CodeStorage`] materializes the source a definition is loaded from into
//!   a local directory. The loader pulls once, then resolves entrypoints
//!   relative to [`CodeStorage::destination`].

mod code;
mod results;

pub use code::{CodeStorage, LocalDirectory};
pub use results::{FsResultStore, ResultStore};

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
  /// Nothing is stored under the key.
  #[error("not found: {0}")]
  NotFound(String),

  #[error("invalid storage key '{key}'")]
  InvalidKey { key: String },

  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}
