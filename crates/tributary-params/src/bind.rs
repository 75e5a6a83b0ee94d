use tributary_state::Value;

use crate::error::BindError;
use crate::parameters::Parameters;
use crate::signature::{ParamKind, Signature};

/// Arguments supplied at call time.
#[derive(Debug, Clone, Default)]
pub struct CallArgs {
  pub positional: Vec<Value>,
  pub keyword: Vec<(String, Value)>,
}

impl CallArgs {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn arg(mut self, value: impl Into<Value>) -> Self {
    self.positional.push(value.into());
    self
  }

  pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
    self.keyword.push((name.into(), value.into()));
    self
  }

  /// Keyword arguments from a JSON object.
  pub fn from_json(object: &serde_json::Value) -> Self {
    Self {
      positional: Vec::new(),
      keyword: object
        .as_object()
        .map(|o| {
          o.iter()
            .map(|(k, v)| (k.clone(), Value::Json(v.clone())))
            .collect()
        })
        .unwrap_or_default(),
    }
  }
}

/// Bind call arguments to a signature.
///
/// Positional arguments fill positional-or-keyword parameters in order, with
/// any surplus collected by a variadic positional parameter. Keyword arguments
/// bind by name, with unknown names collected by a variadic keyword parameter.
/// Missing parameters take their defaults. The result is in signature order.
pub fn bind(signature: &Signature, args: CallArgs) -> Result<Parameters, BindError> {
  let params = signature.params();
  let mut slots: Vec<Option<Value>> = vec![None; params.len()];

  let positional_slots: Vec<usize> = params
    .iter()
    .enumerate()
    .filter(|(_, p)| p.kind == ParamKind::PositionalOrKeyword)
    .map(|(i, _)| i)
    .collect();
  let var_positional = params
    .iter()
    .position(|p| p.kind == ParamKind::VarPositional);
  let var_keyword = params.iter().position(|p| p.kind == ParamKind::VarKeyword);

  let got = args.positional.len();
  let mut extra_positional = Vec::new();
  for (i, value) in args.positional.into_iter().enumerate() {
    match positional_slots.get(i) {
      Some(&slot) => slots[slot] = Some(value),
      None if var_positional.is_some() => extra_positional.push(value),
      None => {
        return Err(BindError::TooManyPositional {
          expected: positional_slots.len(),
          got,
        });
      }
    }
  }

  let mut extra_keyword = Vec::new();
  for (name, value) in args.keyword {
    let slot = params
      .iter()
      .position(|p| p.name == name && !p.is_variadic());
    match slot {
      Some(slot) if slots[slot].is_some() => return Err(BindError::MultipleValues { name }),
      Some(slot) => slots[slot] = Some(value),
      None if var_keyword.is_some() => extra_keyword.push((name, value)),
      None => return Err(BindError::UnexpectedKeyword { name }),
    }
  }

  if let Some(slot) = var_positional {
    slots[slot] = Some(Value::List(extra_positional));
  }
  if let Some(slot) = var_keyword {
    slots[slot] = Some(Value::Map(extra_keyword));
  }

  let mut bound = Parameters::new();
  for (param, slot) in params.iter().zip(slots) {
    let value = match (slot, &param.default) {
      (Some(value), _) => value,
      (None, Some(default)) => default.clone(),
      (None, None) => {
        return Err(BindError::MissingArgument {
          name: param.name.clone(),
        });
      }
    };
    bound.insert(param.name.clone(), value);
  }

  Ok(bound)
}
