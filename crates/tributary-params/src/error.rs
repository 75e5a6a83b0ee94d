/// Errors raised while binding call arguments to a signature.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BindError {
  #[error("missing a required argument: '{name}'")]
  MissingArgument { name: String },

  #[error("too many positional arguments: expected at most {expected}, got {got}")]
  TooManyPositional { expected: usize, got: usize },

  #[error("got an unexpected keyword argument '{name}'")]
  UnexpectedKeyword { name: String },

  #[error("got multiple values for argument '{name}'")]
  MultipleValues { name: String },
}

/// A malformed signature.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
  #[error("duplicate parameter name '{name}'")]
  Duplicate { name: String },

  #[error("parameter '{name}' is out of order: {message}")]
  OutOfOrder { name: String, message: String },
}

/// One parameter that failed coercion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterFailure {
  pub parameter: String,
  pub message: String,
}

/// Bound values that could not be coerced to their declared types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid parameters: {}", render_failures(.failures))]
pub struct ParameterTypeError {
  pub failures: Vec<ParameterFailure>,
}

impl ParameterTypeError {
  pub fn parameters(&self) -> impl Iterator<Item = &str> {
    self.failures.iter().map(|f| f.parameter.as_str())
  }
}

fn render_failures(failures: &[ParameterFailure]) -> String {
  failures
    .iter()
    .map(|f| format!("{}: {}", f.parameter, f.message))
    .collect::<Vec<_>>()
    .join("; ")
}

/// Errors reading a bound parameter from inside a callable.
#[derive(Debug, thiserror::Error)]
pub enum ParameterAccessError {
  #[error("parameter '{name}' is not bound")]
  Missing { name: String },

  #[error("parameter '{name}' is not a JSON value")]
  NotJson { name: String },

  #[error("parameter '{name}' has an unexpected shape")]
  Invalid {
    name: String,
    #[source]
    source: serde_json::Error,
  },
}
