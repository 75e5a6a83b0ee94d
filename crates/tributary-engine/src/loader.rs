//! Loading definitions from entrypoints.
//!
//! An entrypoint is either `path:object`, naming an object in a JSON source
//! file, or `module.object`, naming a definition registered in a [`Catalog`].
//! Source files only describe configuration; the bodies they wrap are
//! callables registered in the catalog under their `target` name.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use tracing::{debug, instrument};
use tributary_config::{DefinitionConfig, DefinitionKind, SourceFile};
use tributary_params::Signature;
use tributary_storage::CodeStorage;

use crate::definition::{Body, Definition, RunName, flow, task};
use crate::error::{LoadError, ScriptError};
use crate::retry::RetryDelay;

/// Where a definition lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entrypoint {
  /// `path/to/flows.json:object`
  File { path: PathBuf, object: String },
  /// `package.module.object`
  Module { path: String, object: String },
}

impl Entrypoint {
  pub fn object(&self) -> &str {
    match self {
      Entrypoint::File { object, .. } | Entrypoint::Module { object, .. } => object,
    }
  }

  /// Resolve relative file paths against `root`.
  pub fn relative_to(&self, root: &Path) -> Entrypoint {
    match self {
      Entrypoint::File { path, object } if path.is_relative() => Entrypoint::File {
        path: root.join(path),
        object: object.clone(),
      },
      other => other.clone(),
    }
  }
}

impl FromStr for Entrypoint {
  type Err = LoadError;

  fn from_str(entrypoint: &str) -> Result<Self, Self::Err> {
    let invalid = || LoadError::InvalidEntrypoint {
      entrypoint: entrypoint.to_string(),
    };

    if let Some((path, object)) = entrypoint.rsplit_once(':') {
      if path.is_empty() || object.is_empty() {
        return Err(invalid());
      }
      return Ok(Entrypoint::File {
        path: PathBuf::from(path),
        object: object.to_string(),
      });
    }

    match entrypoint.rsplit_once('.') {
      Some((path, object)) if !path.is_empty() && !object.is_empty() => Ok(Entrypoint::Module {
        path: path.to_string(),
        object: object.to_string(),
      }),
      _ => Err(invalid()),
    }
  }
}

impl fmt::Display for Entrypoint {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Entrypoint::File { path, object } => write!(f, "{}:{object}", path.display()),
      Entrypoint::Module { path, object } => write!(f, "{path}.{object}"),
    }
  }
}

#[derive(Clone)]
struct Callable {
  signature: Signature,
  body: Body,
}

/// Callables and definitions available to the loader.
#[derive(Clone, Default)]
pub struct Catalog {
  callables: HashMap<String, Callable>,
  definitions: HashMap<String, Definition>,
}

impl Catalog {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a body that source files can reference as `target`.
  pub fn register_callable(&mut self, target: impl Into<String>, signature: Signature, body: Body) {
    self
      .callables
      .insert(target.into(), Callable { signature, body });
  }

  /// Register a built definition under its qualified `module.object` name.
  pub fn register_definition(&mut self, qualified_name: impl Into<String>, definition: Definition) {
    self.definitions.insert(qualified_name.into(), definition);
  }
}

/// Load the definition an entrypoint names.
#[instrument(skip(catalog), fields(entrypoint = %entrypoint))]
pub async fn load_from_entrypoint(
  entrypoint: &Entrypoint,
  catalog: &Catalog,
) -> Result<Definition, LoadError> {
  match entrypoint {
    Entrypoint::Module { path, object } => catalog
      .definitions
      .get(&format!("{path}.{object}"))
      .cloned()
      .ok_or_else(|| LoadError::MissingObject {
        location: path.clone(),
        object: object.clone(),
      }),
    Entrypoint::File { path, object } => {
      let script_error = |source: Box<dyn std::error::Error + Send + Sync>| ScriptError {
        path: path.clone(),
        source,
      };
      let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| script_error(Box::new(e)))?;
      let source = SourceFile::from_json(&content).map_err(|e| script_error(Box::new(e)))?;

      let config = source.get(object).ok_or_else(|| LoadError::MissingObject {
        location: path.display().to_string(),
        object: object.clone(),
      })?;
      let definition = build(object, config, catalog)?;
      debug!(name = definition.name(), kind = %definition.kind(), "definition_loaded");
      Ok(definition)
    }
  }
}

/// Pull code from `storage`, then load `entrypoint` relative to it.
#[instrument(skip(storage, catalog), fields(entrypoint = %entrypoint, destination = %storage.destination().display()))]
pub async fn load_from_source(
  storage: &dyn CodeStorage,
  entrypoint: &Entrypoint,
  catalog: &Catalog,
) -> Result<Definition, LoadError> {
  storage
    .pull_code()
    .await
    .map_err(|source| LoadError::Storage { source })?;
  load_from_entrypoint(&entrypoint.relative_to(storage.destination()), catalog).await
}

fn build(object: &str, config: &DefinitionConfig, catalog: &Catalog) -> Result<Definition, LoadError> {
  let callable = catalog
    .callables
    .get(&config.target)
    .ok_or_else(|| LoadError::UnknownCallable {
      target: config.target.clone(),
    })?;
  let invalid = |message: String| LoadError::InvalidConfig {
    object: object.to_string(),
    message,
  };

  let name = config.name.clone().unwrap_or_else(|| object.to_string());
  let mut builder = match config.kind {
    DefinitionKind::Flow => flow(name),
    DefinitionKind::Task => task(name),
  }
  .signature(callable.signature.clone())
  .body(callable.body.clone())
  .tags(config.tags.iter().cloned())
  .validate_parameters(config.validate_parameters);

  if let Some(description) = &config.description {
    builder = builder.description(description.clone());
  }
  if let Some(version) = &config.version {
    builder = builder.version(version.clone());
  }
  if let Some(retries) = config.retries {
    builder = builder.retries(retries);
  }
  if let Some(delay) = &config.retry_delay {
    let delay = RetryDelay::from_config(delay).map_err(|e| invalid(e.to_string()))?;
    builder = builder.retry_delay(delay);
  }
  if let Some(seconds) = config.timeout_seconds {
    let timeout = Duration::try_from_secs_f64(seconds)
      .map_err(|e| invalid(format!("timeout_seconds: {e}")))?;
    builder = builder.timeout(timeout);
  }
  if let Some(persist) = config.persist_result {
    builder = builder.persist_result(persist);
  }
  if let Some(template) = &config.run_name {
    builder = builder.run_name(RunName::Template(template.clone()));
  }

  builder.build().map_err(|source| LoadError::Definition {
    object: object.to_string(),
    source,
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_file_entrypoint() {
    let entrypoint: Entrypoint = "flows/etl.json:nightly".parse().unwrap();
    assert_eq!(
      entrypoint,
      Entrypoint::File {
        path: PathBuf::from("flows/etl.json"),
        object: "nightly".to_string(),
      }
    );
    assert_eq!(entrypoint.to_string(), "flows/etl.json:nightly");
  }

  #[test]
  fn test_parse_module_entrypoint() {
    let entrypoint: Entrypoint = "pipelines.etl.nightly".parse().unwrap();
    assert_eq!(
      entrypoint,
      Entrypoint::Module {
        path: "pipelines.etl".to_string(),
        object: "nightly".to_string(),
      }
    );
  }

  #[test]
  fn test_parse_invalid_entrypoint() {
    for raw in ["nightly", "flows.json:", ":nightly", ".nightly"] {
      let result = raw.parse::<Entrypoint>();
      assert!(
        matches!(result, Err(LoadError::InvalidEntrypoint { .. })),
        "{raw} should be invalid"
      );
    }
  }

  #[test]
  fn test_relative_to_leaves_absolute_paths() {
    let root = Path::new("/srv/code");
    let relative: Entrypoint = "etl.json:nightly".parse().unwrap();
    let absolute: Entrypoint = "/opt/etl.json:nightly".parse().unwrap();

    assert_eq!(
      relative.relative_to(root),
      Entrypoint::File {
        path: PathBuf::from("/srv/code/etl.json"),
        object: "nightly".to_string(),
      }
    );
    assert_eq!(absolute.relative_to(root), absolute);
  }
}
