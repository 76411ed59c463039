//! Descriptor-driven JSON → typed value graph transform.
//!
//! Materialization runs in two separate phases:
//!
//! 1. [`materialize`] applies a shape's statically declared [`Schema`] to a
//!    JSON object. It is a pure function of `(schema, json)` and knows nothing
//!    about the client.
//! 2. [`Binder`] walks the produced graph and binds the owning client into
//!    every reachable [`Materialized`] value, invoking each value's
//!    post-initialization hook once.
//!
//! ```rust,ignore
//! static SCHEMA: LazyLock<Schema> = LazyLock::new(|| {
//!     Schema::new("Quote", vec![
//!         FieldDescriptor::new("price", ValueTransform::Decimal).from_path(&["output", "stck_prpr"]),
//!     ])
//! });
//! ```

mod context;
mod engine;
mod record;
mod schema;

use thiserror::Error;

pub use context::{BindContext, Binder, Materialized, Owner};
pub use engine::{decode_record, materialize};
pub use record::{FieldValue, Record};
pub use schema::{
    CodeTable, FieldDescriptor, Schema, Shape, TimeFormat, ValueTransform, KST, VENDOR_DATE,
    VENDOR_DATETIME,
};

/// Materialization failure. Always names the field and, where one exists,
/// the raw value that was rejected.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DecodeError {
    #[error("{shape}: required field '{field}' is missing at '{path}'")]
    MissingField {
        shape: &'static str,
        field: &'static str,
        path: String,
    },

    #[error("{shape}: field '{field}' rejected value '{raw}': {reason}")]
    InvalidValue {
        shape: &'static str,
        field: &'static str,
        raw: String,
        reason: String,
    },

    #[error("{shape}: field '{field}' has unknown {table} code '{raw}'")]
    UnknownCode {
        shape: &'static str,
        field: &'static str,
        raw: String,
        table: &'static str,
    },

    #[error("{shape}: expected a JSON object, found {found}")]
    NotAnObject { shape: &'static str, found: String },

    #[error("{shape}: field '{field}' holds {actual}, read as {expected}")]
    TypeMismatch {
        shape: &'static str,
        field: &'static str,
        expected: &'static str,
        actual: &'static str,
    },
}

impl DecodeError {
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::MissingField { field, .. }
            | Self::InvalidValue { field, .. }
            | Self::UnknownCode { field, .. }
            | Self::TypeMismatch { field, .. } => Some(field),
            Self::NotAnObject { .. } => None,
        }
    }

    pub fn raw(&self) -> Option<&str> {
        match self {
            Self::InvalidValue { raw, .. } | Self::UnknownCode { raw, .. } => Some(raw),
            _ => None,
        }
    }
}
