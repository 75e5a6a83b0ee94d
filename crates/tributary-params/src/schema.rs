//! Schema-driven coercion of bound parameters.

use std::fmt;

use tributary_state::Value;

use crate::error::{ParameterFailure, ParameterTypeError};
use crate::parameters::Parameters;
use crate::signature::{ParamKind, Signature};

/// Declared type of a parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaType {
  /// Accepts anything, including opaque values.
  Any,
  String,
  Number,
  Integer,
  Boolean,
  Null,
  Array,
  ArrayOf(Box<SchemaType>),
  Object,
  /// `null`, or the inner type.
  Optional(Box<SchemaType>),
}

impl SchemaType {
  pub fn array_of(item: SchemaType) -> Self {
    SchemaType::ArrayOf(Box::new(item))
  }

  pub fn optional(inner: SchemaType) -> Self {
    SchemaType::Optional(Box::new(inner))
  }

  fn from_type_name(name: &str) -> Self {
    match name {
      "string" => SchemaType::String,
      "number" => SchemaType::Number,
      "integer" => SchemaType::Integer,
      "boolean" => SchemaType::Boolean,
      "null" => SchemaType::Null,
      "array" => SchemaType::Array,
      "object" => SchemaType::Object,
      _ => SchemaType::Any,
    }
  }

  /// Parse a single property schema.
  fn from_property(schema: &serde_json::Value) -> Self {
    let base = match schema.get("type") {
      Some(serde_json::Value::String(name)) => Self::from_type_name(name),
      Some(serde_json::Value::Array(names)) => {
        let names: Vec<&str> = names.iter().filter_map(|n| n.as_str()).collect();
        let non_null: Vec<&str> = names.iter().copied().filter(|n| *n != "null").collect();
        match (non_null.as_slice(), names.len() > non_null.len()) {
          ([single], true) => {
            return SchemaType::optional(Self::from_property_with_type(schema, single));
          }
          ([single], false) => Self::from_type_name(single),
          _ => SchemaType::Any,
        }
      }
      _ => SchemaType::Any,
    };

    match base {
      SchemaType::Array => Self::from_property_with_type(schema, "array"),
      other => other,
    }
  }

  fn from_property_with_type(schema: &serde_json::Value, name: &str) -> Self {
    match (name, schema.get("items")) {
      ("array", Some(items)) => SchemaType::array_of(Self::from_property(items)),
      _ => Self::from_type_name(name),
    }
  }
}

impl fmt::Display for SchemaType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      SchemaType::Any => f.write_str("any"),
      SchemaType::String => f.write_str("string"),
      SchemaType::Number => f.write_str("number"),
      SchemaType::Integer => f.write_str("integer"),
      SchemaType::Boolean => f.write_str("boolean"),
      SchemaType::Null => f.write_str("null"),
      SchemaType::Array => f.write_str("array"),
      SchemaType::ArrayOf(item) => write!(f, "array of {item}"),
      SchemaType::Object => f.write_str("object"),
      SchemaType::Optional(inner) => write!(f, "{inner} or null"),
    }
  }
}

/// Extract parameter types from a JSON Schema object.
///
/// Reads `properties` in document order. `"type": ["integer", "null"]` becomes
/// an optional integer and `items` on an array becomes its element type.
/// Anything else the parser does not understand is treated as [`SchemaType::Any`].
pub fn extract_schema_types(json_schema: &serde_json::Value) -> Vec<(String, SchemaType)> {
  json_schema
    .get("properties")
    .and_then(|p| p.as_object())
    .map(|properties| {
      properties
        .iter()
        .map(|(name, schema)| (name.clone(), SchemaType::from_property(schema)))
        .collect()
    })
    .unwrap_or_default()
}

/// Coerce every annotated parameter against its declared type.
///
/// Variadic parameters are coerced element by element. All failures are
/// collected before returning.
pub fn validate(
  signature: &Signature,
  parameters: &Parameters,
) -> Result<Parameters, ParameterTypeError> {
  let mut validated = parameters.clone();
  let mut failures = Vec::new();

  for param in signature.params() {
    let (Some(schema), Some(value)) = (&param.annotation, parameters.get(&param.name)) else {
      continue;
    };

    let coerced = match (param.kind, value) {
      (ParamKind::VarPositional, Value::List(items)) => items
        .iter()
        .enumerate()
        .map(|(i, item)| coerce_value(&format!("{}[{i}]", param.name), item, schema))
        .collect::<Result<Vec<_>, _>>()
        .map(Value::List),
      (ParamKind::VarKeyword, Value::Map(entries)) => entries
        .iter()
        .map(|(key, item)| {
          coerce_value(&format!("{}.{key}", param.name), item, schema).map(|v| (key.clone(), v))
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Value::Map),
      _ => coerce_value(&param.name, value, schema),
    };

    match coerced {
      Ok(value) => validated.insert(param.name.clone(), value),
      Err(failure) => failures.push(failure),
    }
  }

  if failures.is_empty() {
    Ok(validated)
  } else {
    Err(ParameterTypeError { failures })
  }
}

/// Coerce a single value to a declared type.
pub fn coerce_value(
  parameter: &str,
  value: &Value,
  schema: &SchemaType,
) -> Result<Value, ParameterFailure> {
  let fail = |message: String| ParameterFailure {
    parameter: parameter.to_string(),
    message,
  };

  match (schema, value) {
    (SchemaType::Any, value) => Ok(value.clone()),
    (_, Value::Opaque(opaque)) => Err(fail(format!(
      "expected {schema}, got an object of type {}",
      opaque.type_name()
    ))),
    (SchemaType::ArrayOf(item), Value::List(items)) => items
      .iter()
      .enumerate()
      .map(|(i, v)| coerce_value(&format!("{parameter}[{i}]"), v, item))
      .collect::<Result<Vec<_>, _>>()
      .map(Value::List),
    (SchemaType::Array, Value::List(_)) | (SchemaType::Object, Value::Map(_)) => Ok(value.clone()),
    (_, Value::List(_) | Value::Map(_)) => match value.to_json() {
      Some(json) => coerce_json(&json, schema).map(Value::Json).map_err(fail),
      None => Err(fail(format!("expected {schema}, got a collection"))),
    },
    (_, Value::Json(json)) => coerce_json(json, schema).map(Value::Json).map_err(fail),
  }
}

fn coerce_json(value: &serde_json::Value, schema: &SchemaType) -> Result<serde_json::Value, String> {
  use serde_json::Value as Json;

  let mismatch = || format!("expected {schema}, got {value}");

  match schema {
    SchemaType::Any => Ok(value.clone()),

    SchemaType::String => match value {
      Json::String(_) => Ok(value.clone()),
      _ => Err(mismatch()),
    },

    SchemaType::Integer => match value {
      Json::Number(n) if n.is_i64() || n.is_u64() => Ok(value.clone()),
      Json::Number(n) => match n.as_f64() {
        Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Ok(Json::from(f as i64)),
        _ => Err(mismatch()),
      },
      Json::String(s) => s
        .trim()
        .parse::<i64>()
        .map(Json::from)
        .map_err(|_| mismatch()),
      _ => Err(mismatch()),
    },

    SchemaType::Number => match value {
      Json::Number(_) => Ok(value.clone()),
      Json::String(s) => s
        .trim()
        .parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map(Json::Number)
        .ok_or_else(mismatch),
      _ => Err(mismatch()),
    },

    SchemaType::Boolean => match value {
      Json::Bool(_) => Ok(value.clone()),
      Json::String(s) => match s.to_lowercase().as_str() {
        "true" => Ok(Json::Bool(true)),
        "false" => Ok(Json::Bool(false)),
        _ => Err(mismatch()),
      },
      _ => Err(mismatch()),
    },

    SchemaType::Null => match value {
      Json::Null => Ok(Json::Null),
      Json::String(s) if s.is_empty() || s == "null" => Ok(Json::Null),
      _ => Err(mismatch()),
    },

    SchemaType::Array => match parse_embedded(value) {
      Some(array @ Json::Array(_)) => Ok(array),
      _ => Err(mismatch()),
    },

    SchemaType::ArrayOf(item) => match parse_embedded(value) {
      Some(Json::Array(items)) => items
        .iter()
        .map(|v| coerce_json(v, item))
        .collect::<Result<Vec<_>, _>>()
        .map(Json::Array),
      _ => Err(mismatch()),
    },

    SchemaType::Object => match parse_embedded(value) {
      Some(object @ Json::Object(_)) => Ok(object),
      _ => Err(mismatch()),
    },

    SchemaType::Optional(inner) => match value {
      Json::Null => Ok(Json::Null),
      _ => coerce_json(value, inner),
    },
  }
}

/// The value itself, or the JSON document inside a string.
fn parse_embedded(value: &serde_json::Value) -> Option<serde_json::Value> {
  match value {
    serde_json::Value::String(s) => serde_json::from_str(s).ok(),
    other => Some(other.clone()),
  }
}
