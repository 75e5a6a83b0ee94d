use std::collections::HashSet;

use tributary_state::Value;

use crate::error::SignatureError;
use crate::schema::{SchemaType, extract_schema_types};

/// How a parameter accepts arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
  PositionalOrKeyword,
  KeywordOnly,
  /// Collects extra positional arguments into a list.
  VarPositional,
  /// Collects extra keyword arguments into a map.
  VarKeyword,
}

/// A declared parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
  pub name: String,
  pub kind: ParamKind,
  pub annotation: Option<SchemaType>,
  pub default: Option<Value>,
}

impl Param {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      kind: ParamKind::PositionalOrKeyword,
      annotation: None,
      default: None,
    }
  }

  pub fn var_positional(name: impl Into<String>) -> Self {
    Self {
      kind: ParamKind::VarPositional,
      ..Self::new(name)
    }
  }

  pub fn var_keyword(name: impl Into<String>) -> Self {
    Self {
      kind: ParamKind::VarKeyword,
      ..Self::new(name)
    }
  }

  pub fn keyword_only(mut self) -> Self {
    self.kind = ParamKind::KeywordOnly;
    self
  }

  pub fn typed(mut self, annotation: SchemaType) -> Self {
    self.annotation = Some(annotation);
    self
  }

  pub fn default(mut self, value: impl Into<Value>) -> Self {
    self.default = Some(value.into());
    self
  }

  pub fn is_variadic(&self) -> bool {
    matches!(self.kind, ParamKind::VarPositional | ParamKind::VarKeyword)
  }

  pub fn is_required(&self) -> bool {
    self.default.is_none() && !self.is_variadic()
  }
}

/// An ordered list of declared parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Signature {
  params: Vec<Param>,
}

impl Signature {
  pub fn new() -> Self {
    Self::default()
  }

  /// Build a signature from the `properties` of a JSON Schema object.
  ///
  /// Properties listed in `required` have no default; the rest default to
  /// `null`, or to the property's own `default` when present.
  pub fn from_json_schema(schema: &serde_json::Value) -> Self {
    let required: HashSet<&str> = schema
      .get("required")
      .and_then(|r| r.as_array())
      .map(|names| names.iter().filter_map(|n| n.as_str()).collect())
      .unwrap_or_default();

    let params = extract_schema_types(schema)
      .into_iter()
      .map(|(name, annotation)| {
        let default = schema
          .get("properties")
          .and_then(|p| p.get(&name))
          .and_then(|p| p.get("default"))
          .cloned();
        let param = Param::new(name.clone()).typed(annotation);
        match (required.contains(name.as_str()), default) {
          (_, Some(default)) => param.default(Value::Json(default)),
          (true, None) => param,
          (false, None) => param.default(Value::null()),
        }
      })
      .collect();

    Self { params }
  }

  pub fn param(mut self, param: Param) -> Self {
    self.params.push(param);
    self
  }

  pub fn params(&self) -> &[Param] {
    &self.params
  }

  pub fn get(&self, name: &str) -> Option<&Param> {
    self.params.iter().find(|p| p.name == name)
  }

  pub fn names(&self) -> impl Iterator<Item = &str> {
    self.params.iter().map(|p| p.name.as_str())
  }

  /// Check names are unique and kinds appear in call order:
  /// positional-or-keyword, variadic positional, keyword-only, variadic keyword.
  pub fn check(&self) -> Result<(), SignatureError> {
    let mut seen = HashSet::new();
    let mut rank = 0;
    let mut seen_default = false;

    for param in &self.params {
      if !seen.insert(param.name.as_str()) {
        return Err(SignatureError::Duplicate {
          name: param.name.clone(),
        });
      }

      let param_rank = match param.kind {
        ParamKind::PositionalOrKeyword => 0,
        ParamKind::VarPositional => 1,
        ParamKind::KeywordOnly => 2,
        ParamKind::VarKeyword => 3,
      };
      if param_rank < rank {
        return Err(SignatureError::OutOfOrder {
          name: param.name.clone(),
          message: "parameters must be ordered positional, *args, keyword-only, **kwargs".into(),
        });
      }
      // Each variadic may appear once.
      if param.is_variadic() {
        rank = param_rank + 1;
      } else {
        rank = param_rank;
      }

      if param.kind == ParamKind::PositionalOrKeyword {
        if param.default.is_some() {
          seen_default = true;
        } else if seen_default {
          return Err(SignatureError::OutOfOrder {
            name: param.name.clone(),
            message: "a parameter without a default follows one with a default".into(),
          });
        }
      }
    }

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  #[test]
  fn test_valid_signature() {
    let signature = Signature::new()
      .param(Param::new("x"))
      .param(Param::new("y").default(2i64))
      .param(Param::var_positional("args"))
      .param(Param::new("flag").keyword_only())
      .param(Param::var_keyword("kwargs"));
    assert!(signature.check().is_ok());
  }

  #[test]
  fn test_duplicate_names_rejected() {
    let signature = Signature::new().param(Param::new("x")).param(Param::new("x"));
    assert_eq!(
      signature.check(),
      Err(SignatureError::Duplicate { name: "x".into() })
    );
  }

  #[test]
  fn test_two_variadic_positionals_rejected() {
    let signature = Signature::new()
      .param(Param::var_positional("a"))
      .param(Param::var_positional("b"));
    assert!(matches!(
      signature.check(),
      Err(SignatureError::OutOfOrder { ref name, .. }) if name == "b"
    ));
  }

  #[test]
  fn test_positional_after_keyword_only_rejected() {
    let signature = Signature::new()
      .param(Param::new("a").keyword_only())
      .param(Param::new("b"));
    assert!(signature.check().is_err());
  }

  #[test]
  fn test_required_after_default_rejected() {
    let signature = Signature::new()
      .param(Param::new("a").default(1i64))
      .param(Param::new("b"));
    assert!(signature.check().is_err());
  }

  #[test]
  fn test_from_json_schema() {
    let signature = Signature::from_json_schema(&json!({
      "type": "object",
      "properties": {
        "name": { "type": "string" },
        "count": { "type": "integer", "default": 3 },
        "note": { "type": "string" }
      },
      "required": ["name"]
    }));

    let name = signature.get("name").unwrap();
    assert!(name.is_required());
    assert_eq!(name.annotation, Some(SchemaType::String));
    assert_eq!(
      signature.get("count").unwrap().default,
      Some(Value::json(3))
    );
    assert_eq!(signature.get("note").unwrap().default, Some(Value::null()));
  }
}
