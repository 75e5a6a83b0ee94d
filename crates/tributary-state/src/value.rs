use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// A value passed into or returned from a run.
///
/// Values are not required to be serializable. [`Value::Opaque`] carries any
/// `Send + Sync` object by shared reference, so the object a caller passes in
/// is exactly the object the callable sees.
#[derive(Debug, Clone)]
pub enum Value {
  Json(serde_json::Value),
  Opaque(Opaque),
  /// Collected variadic positional arguments.
  List(Vec<Value>),
  /// Collected variadic keyword arguments, in call order.
  Map(Vec<(String, Value)>),
}

/// A shared, type-erased object.
#[derive(Clone)]
pub struct Opaque {
  inner: Arc<dyn Any + Send + Sync>,
  type_name: &'static str,
}

impl Opaque {
  pub fn new<T: Any + Send + Sync>(value: T) -> Self {
    Self::from_arc(Arc::new(value))
  }

  pub fn from_arc<T: Any + Send + Sync>(value: Arc<T>) -> Self {
    Self {
      inner: value,
      type_name: std::any::type_name::<T>(),
    }
  }

  pub fn type_name(&self) -> &'static str {
    self.type_name
  }

  pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
    self.inner.downcast_ref::<T>()
  }

  pub fn downcast_arc<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
    Arc::clone(&self.inner).downcast::<T>().ok()
  }

  /// True when both handles point at the same object.
  pub fn ptr_eq(&self, other: &Opaque) -> bool {
    Arc::ptr_eq(&self.inner, &other.inner)
  }
}

impl fmt::Debug for Opaque {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "Opaque({})", self.type_name)
  }
}

impl Value {
  pub fn null() -> Self {
    Value::Json(serde_json::Value::Null)
  }

  pub fn json(value: impl Into<serde_json::Value>) -> Self {
    Value::Json(value.into())
  }

  pub fn opaque<T: Any + Send + Sync>(value: T) -> Self {
    Value::Opaque(Opaque::new(value))
  }

  pub fn as_json(&self) -> Option<&serde_json::Value> {
    match self {
      Value::Json(value) => Some(value),
      _ => None,
    }
  }

  pub fn as_opaque(&self) -> Option<&Opaque> {
    match self {
      Value::Opaque(value) => Some(value),
      _ => None,
    }
  }

  /// Convert to plain JSON, or `None` if any part is opaque.
  pub fn to_json(&self) -> Option<serde_json::Value> {
    match self {
      Value::Json(value) => Some(value.clone()),
      Value::Opaque(_) => None,
      Value::List(items) => items
        .iter()
        .map(Value::to_json)
        .collect::<Option<Vec<_>>>()
        .map(serde_json::Value::Array),
      Value::Map(entries) => entries
        .iter()
        .map(|(k, v)| v.to_json().map(|v| (k.clone(), v)))
        .collect::<Option<serde_json::Map<_, _>>>()
        .map(serde_json::Value::Object),
    }
  }

  /// A JSON rendering where opaque objects become `{"$opaque": "<type>"}`.
  ///
  /// Used wherever a value has to be stored or displayed without losing the
  /// fact that it existed.
  pub fn describe(&self) -> serde_json::Value {
    match self {
      Value::Json(value) => value.clone(),
      Value::Opaque(opaque) => serde_json::json!({ "$opaque": opaque.type_name() }),
      Value::List(items) => serde_json::Value::Array(items.iter().map(Value::describe).collect()),
      Value::Map(entries) => serde_json::Value::Object(
        entries
          .iter()
          .map(|(k, v)| (k.clone(), v.describe()))
          .collect(),
      ),
    }
  }

  /// Text used when a value is interpolated into a name.
  pub fn render(&self) -> String {
    match self {
      Value::Json(serde_json::Value::String(s)) => s.clone(),
      Value::Json(value) => value.to_string(),
      Value::Opaque(opaque) => format!("<{}>", opaque.type_name()),
      other => other.describe().to_string(),
    }
  }
}

impl PartialEq for Value {
  fn eq(&self, other: &Self) -> bool {
    match (self, other) {
      (Value::Json(a), Value::Json(b)) => a == b,
      (Value::Opaque(a), Value::Opaque(b)) => a.ptr_eq(b),
      (Value::List(a), Value::List(b)) => a == b,
      (Value::Map(a), Value::Map(b)) => a == b,
      _ => false,
    }
  }
}

impl From<serde_json::Value> for Value {
  fn from(value: serde_json::Value) -> Self {
    Value::Json(value)
  }
}

impl From<Opaque> for Value {
  fn from(value: Opaque) -> Self {
    Value::Opaque(value)
  }
}

/// A run's state passed on as an argument, e.g. to record it as an upstream input.
impl From<crate::state::State> for Value {
  fn from(state: crate::state::State) -> Self {
    Value::opaque(state)
  }
}

impl From<&str> for Value {
  fn from(value: &str) -> Self {
    Value::Json(value.into())
  }
}

impl From<String> for Value {
  fn from(value: String) -> Self {
    Value::Json(value.into())
  }
}

impl From<i64> for Value {
  fn from(value: i64) -> Self {
    Value::Json(value.into())
  }
}

impl From<bool> for Value {
  fn from(value: bool) -> Self {
    Value::Json(value.into())
  }
}

impl From<f64> for Value {
  fn from(value: f64) -> Self {
    Value::Json(value.into())
  }
}
