use std::collections::BTreeMap;

use serde_json::{Map, Value};

use super::record::{FieldValue, Record};
use super::schema::{parse_date, FieldDescriptor, Schema, Shape, ValueTransform};
use super::DecodeError;

/// Decode `json` into `T` through `T`'s declared schema.
///
/// Top-level keys listed in `ignore_keys` are treated as absent by every
/// descriptor, so they never make a field required.
pub fn materialize<T: Shape>(json: &Value, ignore_keys: &[&str]) -> Result<T, DecodeError> {
    let record = decode_record(T::schema(), json, ignore_keys)?;
    T::from_record(record)
}

/// Pure schema application: `(schema, json) -> record`.
pub fn decode_record(
    schema: &Schema,
    json: &Value,
    ignore_keys: &[&str],
) -> Result<Record, DecodeError> {
    let object = json.as_object().ok_or_else(|| DecodeError::NotAnObject {
        shape: schema.name(),
        found: json_kind(json),
    })?;

    let mut fields = BTreeMap::new();
    for descriptor in schema.fields() {
        let ignored = descriptor
            .path()
            .first()
            .is_some_and(|key| ignore_keys.contains(key));

        let raw = if ignored {
            None
        } else {
            lookup(object, descriptor.path()).filter(|value| !is_blank(value, descriptor))
        };

        let value = match raw {
            Some(raw) => apply(schema.name(), descriptor, descriptor.transform(), raw)?,
            None => match descriptor.default() {
                Some(default) => default.clone(),
                None if descriptor.required() && !ignored => {
                    return Err(DecodeError::MissingField {
                        shape: schema.name(),
                        field: descriptor.name(),
                        path: descriptor.path_string(),
                    });
                }
                None => FieldValue::Absent,
            },
        };

        fields.insert(descriptor.name(), value);
    }

    Ok(Record::new(schema.name(), fields))
}

fn lookup<'a>(object: &'a Map<String, Value>, path: &[&str]) -> Option<&'a Value> {
    let (first, rest) = path.split_first()?;
    let mut current = object.get(*first)?;
    for key in rest {
        current = current.as_object()?.get(*key)?;
    }

    (!current.is_null()).then_some(current)
}

/// The vendor sends `""` for unset numbers, flags and codes.
fn is_blank(value: &Value, descriptor: &FieldDescriptor) -> bool {
    let blank = value.as_str().is_some_and(|text| text.trim().is_empty());
    blank
        && !matches!(
            descriptor.transform(),
            ValueTransform::Text | ValueTransform::Identity
        )
}

// -2^63 is exact as f64; 2^63 is the first value past i64::MAX.
const I64_LOWER: f64 = -9_223_372_036_854_775_808.0;
const I64_UPPER: f64 = 9_223_372_036_854_775_808.0;

fn apply(
    shape: &'static str,
    descriptor: &FieldDescriptor,
    transform: &ValueTransform,
    raw: &Value,
) -> Result<FieldValue, DecodeError> {
    let invalid = |reason: &str| DecodeError::InvalidValue {
        shape,
        field: descriptor.name(),
        raw: raw_text(raw),
        reason: reason.to_owned(),
    };

    match transform {
        ValueTransform::Identity => Ok(FieldValue::Json(raw.clone())),
        ValueTransform::Integer => match raw {
            Value::Number(number) => {
                if let Some(value) = number.as_i64() {
                    return Ok(FieldValue::Integer(value));
                }
                if number.is_u64() {
                    return Err(invalid("out of range for a 64-bit integer"));
                }
                number
                    .as_f64()
                    .filter(|value| value.fract() == 0.0)
                    .filter(|value| (I64_LOWER..I64_UPPER).contains(value))
                    .map(|value| FieldValue::Integer(value as i64))
                    .ok_or_else(|| invalid("not a whole number in 64-bit range"))
            }
            Value::String(text) => text
                .trim()
                .replace(',', "")
                .parse::<i64>()
                .map(FieldValue::Integer)
                .map_err(|e| invalid(&e.to_string())),
            _ => Err(invalid("expected a number")),
        },
        ValueTransform::Decimal => match raw {
            Value::Number(number) => number
                .as_f64()
                .map(FieldValue::Decimal)
                .ok_or_else(|| invalid("not representable as f64")),
            Value::String(text) => text
                .trim()
                .replace(',', "")
                .parse::<f64>()
                .ok()
                .filter(|value| value.is_finite())
                .map(FieldValue::Decimal)
                .ok_or_else(|| invalid("not a decimal number")),
            _ => Err(invalid("expected a number")),
        },
        ValueTransform::Text => match raw {
            Value::String(text) => Ok(FieldValue::Text(text.clone())),
            Value::Number(number) => Ok(FieldValue::Text(number.to_string())),
            Value::Bool(flag) => Ok(FieldValue::Text(flag.to_string())),
            _ => Err(invalid("expected a string")),
        },
        ValueTransform::Flag => match raw {
            Value::Bool(flag) => Ok(FieldValue::Flag(*flag)),
            Value::String(text) => match text.trim().to_ascii_uppercase().as_str() {
                "Y" | "TRUE" => Ok(FieldValue::Flag(true)),
                "N" | "FALSE" => Ok(FieldValue::Flag(false)),
                _ => Err(invalid("expected Y or N")),
            },
            _ => Err(invalid("expected Y or N")),
        },
        ValueTransform::Timestamp(format) => {
            let text = raw.as_str().ok_or_else(|| invalid("expected a timestamp string"))?;
            format
                .parse(text)
                .map(FieldValue::Timestamp)
                .map_err(|e| invalid(&e.to_string()))
        }
        ValueTransform::Date(pattern) => {
            let text = raw.as_str().ok_or_else(|| invalid("expected a date string"))?;
            parse_date(pattern, text)
                .map(FieldValue::Date)
                .map_err(|e| invalid(&e.to_string()))
        }
        ValueTransform::Code(table) => {
            let code = match raw {
                Value::String(text) => text.clone(),
                Value::Number(number) => number.to_string(),
                _ => return Err(invalid("expected a code string")),
            };
            table
                .lookup(&code)
                .map(FieldValue::text)
                .ok_or_else(|| DecodeError::UnknownCode {
                    shape,
                    field: descriptor.name(),
                    raw: code,
                    table: table.name(),
                })
        }
        ValueTransform::Object(schema) => {
            decode_record(schema(), raw, &[]).map(FieldValue::Object)
        }
        ValueTransform::List(inner) => {
            let items = raw.as_array().ok_or_else(|| invalid("expected an array"))?;
            items
                .iter()
                .map(|item| apply(shape, descriptor, inner, item))
                .collect::<Result<Vec<_>, _>>()
                .map(FieldValue::List)
        }
        ValueTransform::Map(inner) => {
            let entries = raw.as_object().ok_or_else(|| invalid("expected an object"))?;
            entries
                .iter()
                .map(|(key, item)| {
                    apply(shape, descriptor, inner, item).map(|value| (key.clone(), value))
                })
                .collect::<Result<BTreeMap<_, _>, _>>()
                .map(FieldValue::Map)
        }
    }
}

fn raw_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn json_kind(value: &Value) -> String {
    let kind = match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    };
    kind.to_owned()
}
