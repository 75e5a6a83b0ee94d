use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs;
use tracing::debug;

use crate::StorageError;

/// Persists run results by key.
#[async_trait]
pub trait ResultStore: Send + Sync {
  async fn write(&self, key: &str, value: &serde_json::Value) -> Result<(), StorageError>;

  async fn read(&self, key: &str) -> Result<serde_json::Value, StorageError>;

  async fn delete(&self, key: &str) -> Result<(), StorageError>;
}

/// Filesystem-based result store.
///
/// Each result is stored at `{base_path}/{key}.json`. The base directory is
/// created on first write.
pub struct FsResultStore {
  base_path: PathBuf,
}

impl FsResultStore {
  pub fn new(base_path: impl Into<PathBuf>) -> Self {
    Self {
      base_path: base_path.into(),
    }
  }

  fn key_to_path(&self, key: &str) -> Result<PathBuf, StorageError> {
    let valid = !key.is_empty()
      && key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'));
    if !valid {
      return Err(StorageError::InvalidKey {
        key: key.to_string(),
      });
    }
    Ok(self.base_path.join(format!("{key}.json")))
  }
}

fn not_found(key: &str, e: std::io::Error) -> StorageError {
  if e.kind() == std::io::ErrorKind::NotFound {
    StorageError::NotFound(key.to_string())
  } else {
    StorageError::Io(e)
  }
}

#[async_trait]
impl ResultStore for FsResultStore {
  async fn write(&self, key: &str, value: &serde_json::Value) -> Result<(), StorageError> {
    let path = self.key_to_path(key)?;
    fs::create_dir_all(&self.base_path).await?;
    fs::write(&path, serde_json::to_vec(value)?).await?;
    debug!(key, path = %path.display(), "result_written");
    Ok(())
  }

  async fn read(&self, key: &str) -> Result<serde_json::Value, StorageError> {
    let path = self.key_to_path(key)?;
    let bytes = fs::read(&path).await.map_err(|e| not_found(key, e))?;
    Ok(serde_json::from_slice(&bytes)?)
  }

  async fn delete(&self, key: &str) -> Result<(), StorageError> {
    let path = self.key_to_path(key)?;
    fs::remove_file(&path).await.map_err(|e| not_found(key, e))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[tokio::test]
  async fn test_write_then_read() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsResultStore::new(dir.path().join("results"));

    store.write("abc-1", &json!({"rows": [1, 2]})).await.unwrap();
    assert_eq!(store.read("abc-1").await.unwrap(), json!({"rows": [1, 2]}));

    store.delete("abc-1").await.unwrap();
    assert!(matches!(
      store.read("abc-1").await,
      Err(StorageError::NotFound(key)) if key == "abc-1"
    ));
  }

  #[tokio::test]
  async fn test_rejects_path_like_keys() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsResultStore::new(dir.path());

    let err = store.write("../escape", &json!(1)).await.unwrap_err();
    assert!(matches!(err, StorageError::InvalidKey { .. }));
  }
}
