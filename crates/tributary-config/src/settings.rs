use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Prefix shared by every settings environment variable.
pub const ENV_PREFIX: &str = "TRIBUTARY_";

/// Errors raised while loading settings.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  /// A variable was present but could not be parsed.
  #[error("invalid value for {key}: '{value}'")]
  InvalidValue { key: String, value: String },
}

/// Process-wide engine settings.
///
/// Every field has a default, so a partial JSON document or an empty
/// environment both produce a usable value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
  /// Retries for flows that do not declare their own.
  pub flow_default_retries: u32,
  pub flow_default_retry_delay_seconds: f64,
  /// Retries for tasks that do not declare their own.
  pub task_default_retries: u32,
  pub task_default_retry_delay_seconds: f64,
  /// Attempts made against the orchestration authority before a run is
  /// resolved as crashed.
  pub client_max_retries: u32,
  pub client_retry_delay_ms: u64,
  /// Gates on-cancellation and on-crashed hooks.
  pub enable_cancellation_and_crashed_hooks: bool,
  pub persist_results_by_default: bool,
  /// Base directory for persisted results.
  pub local_storage_path: Option<PathBuf>,
}

impl Default for Settings {
  fn default() -> Self {
    Self {
      flow_default_retries: 0,
      flow_default_retry_delay_seconds: 0.0,
      task_default_retries: 0,
      task_default_retry_delay_seconds: 0.0,
      client_max_retries: 3,
      client_retry_delay_ms: 100,
      enable_cancellation_and_crashed_hooks: true,
      persist_results_by_default: false,
      local_storage_path: None,
    }
  }
}

impl Settings {
  /// Load settings from the process environment.
  pub fn from_env() -> Result<Self, ConfigError> {
    Self::from_lookup(|key| std::env::var(key).ok())
  }

  /// Load settings from an arbitrary key lookup.
  ///
  /// Keys are the full variable names, e.g. `TRIBUTARY_CLIENT_MAX_RETRIES`.
  pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
    let mut settings = Self::default();

    if let Some(value) = read(&lookup, "FLOW_DEFAULT_RETRIES")? {
      settings.flow_default_retries = value;
    }
    if let Some(value) = read_seconds(&lookup, "FLOW_DEFAULT_RETRY_DELAY_SECONDS")? {
      settings.flow_default_retry_delay_seconds = value;
    }
    if let Some(value) = read(&lookup, "TASK_DEFAULT_RETRIES")? {
      settings.task_default_retries = value;
    }
    if let Some(value) = read_seconds(&lookup, "TASK_DEFAULT_RETRY_DELAY_SECONDS")? {
      settings.task_default_retry_delay_seconds = value;
    }
    if let Some(value) = read(&lookup, "CLIENT_MAX_RETRIES")? {
      settings.client_max_retries = value;
    }
    if let Some(value) = read(&lookup, "CLIENT_RETRY_DELAY_MS")? {
      settings.client_retry_delay_ms = value;
    }
    if let Some(value) = read_flag(&lookup, "ENABLE_CANCELLATION_AND_CRASHED_HOOKS")? {
      settings.enable_cancellation_and_crashed_hooks = value;
    }
    if let Some(value) = read_flag(&lookup, "PERSIST_RESULTS_BY_DEFAULT")? {
      settings.persist_results_by_default = value;
    }
    if let Some(value) = lookup(&format!("{ENV_PREFIX}LOCAL_STORAGE_PATH")) {
      if !value.trim().is_empty() {
        settings.local_storage_path = Some(PathBuf::from(value));
      }
    }

    Ok(settings)
  }

  pub fn flow_default_retry_delay(&self) -> Duration {
    seconds(self.flow_default_retry_delay_seconds)
  }

  pub fn task_default_retry_delay(&self) -> Duration {
    seconds(self.task_default_retry_delay_seconds)
  }

  pub fn client_retry_delay(&self) -> Duration {
    Duration::from_millis(self.client_retry_delay_ms)
  }
}

fn seconds(value: f64) -> Duration {
  if value.is_finite() && value > 0.0 {
    Duration::from_secs_f64(value)
  } else {
    Duration::ZERO
  }
}

fn read<T: FromStr>(
  lookup: &impl Fn(&str) -> Option<String>,
  name: &str,
) -> Result<Option<T>, ConfigError> {
  let key = format!("{ENV_PREFIX}{name}");
  match lookup(&key) {
    None => Ok(None),
    Some(raw) => raw
      .trim()
      .parse::<T>()
      .map(Some)
      .map_err(|_| ConfigError::InvalidValue { key, value: raw }),
  }
}

fn read_seconds(
  lookup: &impl Fn(&str) -> Option<String>,
  name: &str,
) -> Result<Option<f64>, ConfigError> {
  let key = format!("{ENV_PREFIX}{name}");
  match read::<f64>(lookup, name)? {
    Some(value) if !value.is_finite() || value < 0.0 => Err(ConfigError::InvalidValue {
      key,
      value: value.to_string(),
    }),
    other => Ok(other),
  }
}

fn read_flag(
  lookup: &impl Fn(&str) -> Option<String>,
  name: &str,
) -> Result<Option<bool>, ConfigError> {
  let key = format!("{ENV_PREFIX}{name}");
  match lookup(&key) {
    None => Ok(None),
    Some(raw) => match raw.trim().to_lowercase().as_str() {
      "1" | "true" | "yes" | "on" => Ok(Some(true)),
      "0" | "false" | "no" | "off" => Ok(Some(false)),
      _ => Err(ConfigError::InvalidValue { key, value: raw }),
    },
  }
}

#[cfg(test)]
mod tests {
  use std::collections::HashMap;

  use super::*;

  fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = pairs
      .iter()
      .map(|(k, v)| (k.to_string(), v.to_string()))
      .collect();
    move |key| vars.get(key).cloned()
  }

  #[test]
  fn test_defaults_when_environment_is_empty() {
    let settings = Settings::from_lookup(lookup_from(&[])).unwrap();
    assert_eq!(settings, Settings::default());
    assert!(settings.enable_cancellation_and_crashed_hooks);
    assert_eq!(settings.client_max_retries, 3);
  }

  #[test]
  fn test_reads_prefixed_variables() {
    let settings = Settings::from_lookup(lookup_from(&[
      ("TRIBUTARY_FLOW_DEFAULT_RETRIES", "2"),
      ("TRIBUTARY_TASK_DEFAULT_RETRY_DELAY_SECONDS", "0.5"),
      ("TRIBUTARY_ENABLE_CANCELLATION_AND_CRASHED_HOOKS", "False"),
      ("TRIBUTARY_LOCAL_STORAGE_PATH", "/tmp/results"),
    ]))
    .unwrap();

    assert_eq!(settings.flow_default_retries, 2);
    assert_eq!(settings.task_default_retry_delay(), Duration::from_millis(500));
    assert!(!settings.enable_cancellation_and_crashed_hooks);
    assert_eq!(settings.local_storage_path, Some(PathBuf::from("/tmp/results")));
  }

  #[test]
  fn test_invalid_number_is_rejected() {
    let err = Settings::from_lookup(lookup_from(&[("TRIBUTARY_CLIENT_MAX_RETRIES", "many")]))
      .unwrap_err();
    assert!(matches!(
      err,
      ConfigError::InvalidValue { ref key, .. } if key == "TRIBUTARY_CLIENT_MAX_RETRIES"
    ));
  }

  #[test]
  fn test_invalid_flag_is_rejected() {
    let result = Settings::from_lookup(lookup_from(&[(
      "TRIBUTARY_PERSIST_RESULTS_BY_DEFAULT",
      "maybe",
    )]));
    assert!(result.is_err());
  }

  #[test]
  fn test_negative_delay_is_rejected() {
    let result = Settings::from_lookup(lookup_from(&[(
      "TRIBUTARY_FLOW_DEFAULT_RETRY_DELAY_SECONDS",
      "-1",
    )]));
    assert!(result.is_err());
  }

  #[test]
  fn test_partial_json_uses_defaults() {
    let settings: Settings = serde_json::from_str(r#"{ "task_default_retries": 4 }"#).unwrap();
    assert_eq!(settings.task_default_retries, 4);
    assert_eq!(settings.client_retry_delay(), Duration::from_millis(100));
  }
}
