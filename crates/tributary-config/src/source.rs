use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefinitionKind {
  #[default]
  Flow,
  Task,
}

/// Declarative retry delay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "backoff", rename_all = "snake_case")]
pub enum RetryDelayConfig {
  Constant {
    seconds: f64,
  },
  /// One delay per retry; the last value repeats once the list runs out.
  Sequence {
    seconds: Vec<f64>,
  },
  Exponential {
    base_seconds: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    jitter_factor: Option<f64>,
  },
}

/// A flow or task described in a source file.
///
/// `target` names a callable registered with the loader; everything else
/// configures the definition wrapped around it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefinitionConfig {
  #[serde(default)]
  pub kind: DefinitionKind,
  pub target: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub version: Option<String>,
  #[serde(default)]
  pub tags: Vec<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub retries: Option<u32>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub retry_delay: Option<RetryDelayConfig>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub timeout_seconds: Option<f64>,
  #[serde(default = "default_validate_parameters")]
  pub validate_parameters: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub persist_result: Option<bool>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub run_name: Option<String>,
}

fn default_validate_parameters() -> bool {
  true
}

/// A source file: named definitions addressable as `path:object`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceFile {
  #[serde(default)]
  pub definitions: BTreeMap<String, DefinitionConfig>,
}

impl SourceFile {
  pub fn from_json(content: &str) -> Result<Self, serde_json::Error> {
    serde_json::from_str(content)
  }

  pub fn get(&self, object: &str) -> Option<&DefinitionConfig> {
    self.definitions.get(object)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_source_file() {
    let source = SourceFile::from_json(
      r#"{
        "definitions": {
          "dog": { "target": "bark", "retries": 2, "tags": ["pets"] },
          "fetch": {
            "kind": "task",
            "target": "fetch_rows",
            "retry_delay": { "backoff": "sequence", "seconds": [1, 2] },
            "validate_parameters": false
          }
        }
      }"#,
    )
    .unwrap();

    let dog = source.get("dog").unwrap();
    assert_eq!(dog.kind, DefinitionKind::Flow);
    assert_eq!(dog.retries, Some(2));
    assert!(dog.validate_parameters);

    let fetch = source.get("fetch").unwrap();
    assert_eq!(fetch.kind, DefinitionKind::Task);
    assert_eq!(
      fetch.retry_delay,
      Some(RetryDelayConfig::Sequence {
        seconds: vec![1.0, 2.0]
      })
    );
    assert!(!fetch.validate_parameters);
  }

  #[test]
  fn test_missing_target_is_an_error() {
    let result = SourceFile::from_json(r#"{ "definitions": { "dog": { "retries": 1 } } }"#);
    assert!(result.is_err());
  }
}
