use serde::de::DeserializeOwned;
use tributary_state::Value;

use crate::error::ParameterAccessError;

/// Bound parameters, in signature order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Parameters {
  entries: Vec<(String, Value)>,
}

impl Parameters {
  pub fn new() -> Self {
    Self::default()
  }

  /// Insert or replace a value, keeping the original position on replace.
  pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
    let name = name.into();
    let value = value.into();
    match self.entries.iter_mut().find(|(n, _)| *n == name) {
      Some(entry) => entry.1 = value,
      None => self.entries.push((name, value)),
    }
  }

  pub fn get(&self, name: &str) -> Option<&Value> {
    self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| v)
  }

  pub fn json(&self, name: &str) -> Option<&serde_json::Value> {
    self.get(name).and_then(Value::as_json)
  }

  /// Borrow an opaque parameter as its concrete type.
  pub fn opaque<T: std::any::Any>(&self, name: &str) -> Option<&T> {
    self
      .get(name)
      .and_then(Value::as_opaque)
      .and_then(|o| o.downcast_ref::<T>())
  }

  /// Deserialize a JSON parameter.
  pub fn extract<T: DeserializeOwned>(&self, name: &str) -> Result<T, ParameterAccessError> {
    let value = self.get(name).ok_or_else(|| ParameterAccessError::Missing {
      name: name.to_string(),
    })?;
    let json = value.to_json().ok_or_else(|| ParameterAccessError::NotJson {
      name: name.to_string(),
    })?;
    serde_json::from_value(json).map_err(|source| ParameterAccessError::Invalid {
      name: name.to_string(),
      source,
    })
  }

  pub fn contains(&self, name: &str) -> bool {
    self.get(name).is_some()
  }

  pub fn names(&self) -> impl Iterator<Item = &str> {
    self.entries.iter().map(|(n, _)| n.as_str())
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
    self.entries.iter().map(|(n, v)| (n.as_str(), v))
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// JSON object rendering, with opaque values marked by type.
  pub fn describe(&self) -> serde_json::Value {
    serde_json::Value::Object(
      self
        .entries
        .iter()
        .map(|(n, v)| (n.clone(), v.describe()))
        .collect(),
    )
  }

  /// Build parameters from a JSON object; other JSON values yield nothing.
  pub fn from_json(value: &serde_json::Value) -> Self {
    value
      .as_object()
      .map(|object| {
        object
          .iter()
          .map(|(k, v)| (k.clone(), Value::Json(v.clone())))
          .collect()
      })
      .unwrap_or_default()
  }
}

impl FromIterator<(String, Value)> for Parameters {
  fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
    let mut parameters = Parameters::new();
    for (name, value) in iter {
      parameters.insert(name, value);
    }
    parameters
  }
}

impl IntoIterator for Parameters {
  type Item = (String, Value);
  type IntoIter = std::vec::IntoIter<(String, Value)>;

  fn into_iter(self) -> Self::IntoIter {
    self.entries.into_iter()
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  #[test]
  fn test_insert_replaces_in_place() {
    let mut params = Parameters::new();
    params.insert("x", 1i64);
    params.insert("y", 2i64);
    params.insert("x", 3i64);

    assert_eq!(params.names().collect::<Vec<_>>(), vec!["x", "y"]);
    assert_eq!(params.json("x"), Some(&json!(3)));
  }

  #[test]
  fn test_extract_typed_value() {
    let mut params = Parameters::new();
    params.insert("ids", Value::json(json!([1, 2, 3])));

    let ids: Vec<u32> = params.extract("ids").unwrap();
    assert_eq!(ids, vec![1, 2, 3]);

    assert!(matches!(
      params.extract::<String>("ids"),
      Err(ParameterAccessError::Invalid { .. })
    ));
    assert!(matches!(
      params.extract::<String>("missing"),
      Err(ParameterAccessError::Missing { .. })
    ));
  }

  #[test]
  fn test_opaque_access() {
    let mut params = Parameters::new();
    params.insert("pool", Value::opaque(vec![1u8, 2]));

    assert_eq!(params.opaque::<Vec<u8>>("pool"), Some(&vec![1u8, 2]));
    assert!(matches!(
      params.extract::<Vec<u8>>("pool"),
      Err(ParameterAccessError::NotJson { .. })
    ));
  }

  #[test]
  fn test_from_json_object() {
    let params = Parameters::from_json(&json!({ "a": 1, "b": "two" }));
    assert_eq!(params.len(), 2);
    assert_eq!(params.describe(), json!({ "a": 1, "b": "two" }));
  }
}
