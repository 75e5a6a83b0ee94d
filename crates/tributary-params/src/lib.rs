//! Tributary Params
//!
//! Turns call-time arguments into the parameter mapping a run records.
//!
//! # Flow
//! 1. Binding: [`bind`] matches a [`CallArgs`] against a [`Signature`],
//!    applies declared defaults and collects variadic arguments. Binding
//!    failures are [`BindError`]s.
//! 2. Validation: [`validate`] coerces each bound value against its declared
//!    [`SchemaType`] (`"1"` becomes `1` for an integer parameter). Every
//!    offending parameter is reported in a single [`ParameterTypeError`].
//!
//! Values without an annotation, or annotated [`SchemaType::Any`], pass through
//! untouched, including opaque objects.

mod bind;
mod error;
mod parameters;
mod schema;
mod signature;

pub use bind::{CallArgs, bind};
pub use error::{BindError, ParameterAccessError, ParameterFailure, ParameterTypeError, SignatureError};
pub use parameters::Parameters;
pub use schema::{SchemaType, coerce_value, extract_schema_types, validate};
pub use signature::{Param, ParamKind, Signature};
