use std::collections::BTreeMap;

use serde_json::Value;
use time::{Date, OffsetDateTime};

use super::schema::Shape;
use super::DecodeError;

/// One decoded field, already converted by its descriptor's transform.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Optional field with no source value and no default.
    Absent,
    Json(Value),
    Integer(i64),
    Decimal(f64),
    Text(String),
    Flag(bool),
    Timestamp(OffsetDateTime),
    Date(Date),
    Object(Record),
    List(Vec<FieldValue>),
    Map(BTreeMap<String, FieldValue>),
}

impl FieldValue {
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Absent => "absent",
            Self::Json(_) => "json",
            Self::Integer(_) => "integer",
            Self::Decimal(_) => "decimal",
            Self::Text(_) => "text",
            Self::Flag(_) => "flag",
            Self::Timestamp(_) => "timestamp",
            Self::Date(_) => "date",
            Self::Object(_) => "object",
            Self::List(_) => "list",
            Self::Map(_) => "map",
        }
    }

    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }
}

/// Decoded field set for one shape, consumed by [`Shape::from_record`].
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    shape: &'static str,
    fields: BTreeMap<&'static str, FieldValue>,
}

impl Record {
    pub(crate) fn new(shape: &'static str, fields: BTreeMap<&'static str, FieldValue>) -> Self {
        Self { shape, fields }
    }

    pub const fn shape(&self) -> &'static str {
        self.shape
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    /// Take a field out of the record. `Absent` maps to `None`.
    fn extract<T>(
        &mut self,
        field: &'static str,
        expected: &'static str,
        pick: impl FnOnce(FieldValue) -> Result<T, FieldValue>,
    ) -> Result<Option<T>, DecodeError> {
        match self.fields.remove(field) {
            None => Err(DecodeError::TypeMismatch {
                shape: self.shape,
                field,
                expected,
                actual: "undeclared",
            }),
            Some(FieldValue::Absent) => Ok(None),
            Some(value) => pick(value).map(Some).map_err(|other| DecodeError::TypeMismatch {
                shape: self.shape,
                field,
                expected,
                actual: other.kind(),
            }),
        }
    }

    fn require<T>(&self, field: &'static str, value: Option<T>) -> Result<T, DecodeError> {
        value.ok_or_else(|| DecodeError::MissingField {
            shape: self.shape,
            field,
            path: field.to_owned(),
        })
    }

    pub fn opt_text(&mut self, field: &'static str) -> Result<Option<String>, DecodeError> {
        self.extract(field, "text", |value| match value {
            FieldValue::Text(text) => Ok(text),
            other => Err(other),
        })
    }

    pub fn text(&mut self, field: &'static str) -> Result<String, DecodeError> {
        let value = self.opt_text(field)?;
        self.require(field, value)
    }

    pub fn opt_integer(&mut self, field: &'static str) -> Result<Option<i64>, DecodeError> {
        self.extract(field, "integer", |value| match value {
            FieldValue::Integer(number) => Ok(number),
            other => Err(other),
        })
    }

    pub fn integer(&mut self, field: &'static str) -> Result<i64, DecodeError> {
        let value = self.opt_integer(field)?;
        self.require(field, value)
    }

    pub fn opt_decimal(&mut self, field: &'static str) -> Result<Option<f64>, DecodeError> {
        self.extract(field, "decimal", |value| match value {
            FieldValue::Decimal(number) => Ok(number),
            FieldValue::Integer(number) => Ok(number as f64),
            other => Err(other),
        })
    }

    pub fn decimal(&mut self, field: &'static str) -> Result<f64, DecodeError> {
        let value = self.opt_decimal(field)?;
        self.require(field, value)
    }

    pub fn opt_flag(&mut self, field: &'static str) -> Result<Option<bool>, DecodeError> {
        self.extract(field, "flag", |value| match value {
            FieldValue::Flag(flag) => Ok(flag),
            other => Err(other),
        })
    }

    pub fn flag(&mut self, field: &'static str) -> Result<bool, DecodeError> {
        let value = self.opt_flag(field)?;
        self.require(field, value)
    }

    pub fn opt_timestamp(
        &mut self,
        field: &'static str,
    ) -> Result<Option<OffsetDateTime>, DecodeError> {
        self.extract(field, "timestamp", |value| match value {
            FieldValue::Timestamp(ts) => Ok(ts),
            other => Err(other),
        })
    }

    pub fn timestamp(&mut self, field: &'static str) -> Result<OffsetDateTime, DecodeError> {
        let value = self.opt_timestamp(field)?;
        self.require(field, value)
    }

    pub fn opt_date(&mut self, field: &'static str) -> Result<Option<Date>, DecodeError> {
        self.extract(field, "date", |value| match value {
            FieldValue::Date(date) => Ok(date),
            other => Err(other),
        })
    }

    pub fn opt_json(&mut self, field: &'static str) -> Result<Option<Value>, DecodeError> {
        self.extract(field, "json", |value| match value {
            FieldValue::Json(json) => Ok(json),
            other => Err(other),
        })
    }

    pub fn opt_object<T: Shape>(&mut self, field: &'static str) -> Result<Option<T>, DecodeError> {
        let record = self.extract(field, T::schema().name(), |value| match value {
            FieldValue::Object(record) if record.shape == T::schema().name() => Ok(record),
            other => Err(other),
        })?;
        record.map(T::from_record).transpose()
    }

    pub fn object<T: Shape>(&mut self, field: &'static str) -> Result<T, DecodeError> {
        let value = self.opt_object(field)?;
        self.require(field, value)
    }

    /// Sequence of nested shapes, order preserved. An absent list is empty.
    pub fn list<T: Shape>(&mut self, field: &'static str) -> Result<Vec<T>, DecodeError> {
        let shape = self.shape;
        let items = self.extract(field, "list", |value| match value {
            FieldValue::List(items) => Ok(items),
            other => Err(other),
        })?;

        items
            .unwrap_or_default()
            .into_iter()
            .map(|item| nested::<T>(shape, field, item))
            .collect()
    }

    /// Keyed mapping of nested shapes. An absent mapping is empty.
    pub fn map<T: Shape>(
        &mut self,
        field: &'static str,
    ) -> Result<BTreeMap<String, T>, DecodeError> {
        let shape = self.shape;
        let entries = self.extract(field, "map", |value| match value {
            FieldValue::Map(entries) => Ok(entries),
            other => Err(other),
        })?;

        entries
            .unwrap_or_default()
            .into_iter()
            .map(|(key, item)| nested::<T>(shape, field, item).map(|value| (key, value)))
            .collect()
    }
}

fn nested<T: Shape>(
    shape: &'static str,
    field: &'static str,
    value: FieldValue,
) -> Result<T, DecodeError> {
    match value {
        FieldValue::Object(record) if record.shape == T::schema().name() => T::from_record(record),
        other => Err(DecodeError::TypeMismatch {
            shape,
            field,
            expected: T::schema().name(),
            actual: other.kind(),
        }),
    }
}
