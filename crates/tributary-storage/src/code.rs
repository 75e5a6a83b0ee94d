use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, instrument};

use crate::StorageError;

/// Makes the source of a definition available on the local filesystem.
#[async_trait]
pub trait CodeStorage: Send + Sync {
  /// Populate [`Self::destination`].
  async fn pull_code(&self) -> Result<(), StorageError>;

  /// Directory the code is available in after [`Self::pull_code`].
  fn destination(&self) -> &Path;
}

/// Code storage backed by a local directory tree.
///
/// Pulling copies `source` into `destination`. When both are the same
/// directory, pulling is a no-op.
pub struct LocalDirectory {
  source: PathBuf,
  destination: PathBuf,
}

impl LocalDirectory {
  /// Use `path` in place.
  pub fn new(path: impl Into<PathBuf>) -> Self {
    let path = path.into();
    Self {
      source: path.clone(),
      destination: path,
    }
  }

  /// Copy `source` into `destination` on pull.
  pub fn copied(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
    Self {
      source: source.into(),
      destination: destination.into(),
    }
  }
}

#[async_trait]
impl CodeStorage for LocalDirectory {
  #[instrument(skip(self), fields(source = %self.source.display(), destination = %self.destination.display()))]
  async fn pull_code(&self) -> Result<(), StorageError> {
    if fs::metadata(&self.source).await.is_err() {
      return Err(StorageError::NotFound(self.source.display().to_string()));
    }
    if self.source == self.destination {
      return Ok(());
    }

    let copied = copy_tree(&self.source, &self.destination).await?;
    debug!(files = copied, "code_pulled");
    Ok(())
  }

  fn destination(&self) -> &Path {
    &self.destination
  }
}

async fn copy_tree(source: &Path, destination: &Path) -> Result<usize, StorageError> {
  let mut copied = 0;
  let mut pending = vec![(source.to_path_buf(), destination.to_path_buf())];

  while let Some((from, to)) = pending.pop() {
    fs::create_dir_all(&to).await?;
    let mut entries = fs::read_dir(&from).await?;
    while let Some(entry) = entries.next_entry().await? {
      let target = to.join(entry.file_name());
      if entry.file_type().await?.is_dir() {
        pending.push((entry.path(), target));
      } else {
        fs::copy(entry.path(), &target).await?;
        copied += 1;
      }
    }
  }

  Ok(copied)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_pull_copies_nested_files() {
    let source = tempfile::tempdir().unwrap();
    let destination = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(source.path().join("flows/nested")).unwrap();
    std::fs::write(source.path().join("flows/nested/etl.json"), "{}").unwrap();
    std::fs::write(source.path().join("top.json"), "{}").unwrap();

    let storage = LocalDirectory::copied(source.path(), destination.path().join("code"));
    storage.pull_code().await.unwrap();

    assert!(storage.destination().join("flows/nested/etl.json").exists());
    assert!(storage.destination().join("top.json").exists());
  }

  #[tokio::test]
  async fn test_missing_source_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let storage = LocalDirectory::new(dir.path().join("missing"));

    assert!(matches!(
      storage.pull_code().await,
      Err(StorageError::NotFound(_))
    ));
  }
}
