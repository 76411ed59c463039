use time::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime, UtcOffset};

use super::record::{FieldValue, Record};
use super::DecodeError;

/// Korea Standard Time, the vendor's wall clock.
pub const KST: UtcOffset = time::macros::offset!(+9);

/// Vendor timestamp layout, e.g. `2030-01-01 00:00:00`.
pub const VENDOR_DATETIME: TimeFormat =
    TimeFormat::new("[year]-[month]-[day] [hour]:[minute]:[second]", KST);

/// Compact vendor date layout, e.g. `20240102`.
pub const VENDOR_DATE: &str = "[year][month][day]";

/// A typed target that can be built from a decoded [`Record`].
pub trait Shape: Sized {
    /// Declared field descriptors, registered once per type.
    fn schema() -> &'static Schema;

    fn from_record(record: Record) -> Result<Self, DecodeError>;
}

/// Wall-clock timestamp layout with the offset the vendor writes it in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeFormat {
    pattern: &'static str,
    offset: UtcOffset,
}

impl TimeFormat {
    pub const fn new(pattern: &'static str, offset: UtcOffset) -> Self {
        Self { pattern, offset }
    }

    pub fn parse(&self, input: &str) -> Result<OffsetDateTime, time::Error> {
        let description = format_description::parse(self.pattern)?;
        let local = PrimitiveDateTime::parse(input.trim(), &description)?;
        Ok(local.assume_offset(self.offset))
    }

    pub fn format(&self, value: OffsetDateTime) -> Result<String, time::Error> {
        let description = format_description::parse(self.pattern)?;
        Ok(value.to_offset(self.offset).format(&description)?)
    }
}

pub(crate) fn parse_date(pattern: &str, input: &str) -> Result<Date, time::Error> {
    let description = format_description::parse(pattern)?;
    Ok(Date::parse(input.trim(), &description)?)
}

/// Enumerated vendor code → identifier lookup.
#[derive(Debug)]
pub struct CodeTable {
    name: &'static str,
    entries: &'static [(&'static str, &'static str)],
}

impl CodeTable {
    pub const fn new(name: &'static str, entries: &'static [(&'static str, &'static str)]) -> Self {
        Self { name, entries }
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }

    pub const fn entries(&self) -> &'static [(&'static str, &'static str)] {
        self.entries
    }

    pub fn lookup(&self, code: &str) -> Option<&'static str> {
        let code = code.trim();
        self.entries
            .iter()
            .find(|(candidate, _)| candidate.eq_ignore_ascii_case(code))
            .map(|(_, identifier)| *identifier)
    }
}

/// How a raw JSON value turns into a [`FieldValue`].
#[derive(Debug, Clone)]
pub enum ValueTransform {
    /// Keep the raw JSON.
    Identity,
    /// Whole number from a JSON number or numeric string.
    Integer,
    /// Floating number from a JSON number or numeric string (`,` separators allowed).
    Decimal,
    /// String from a JSON string, number or boolean.
    Text,
    /// `Y`/`N` (or boolean) flag.
    Flag,
    Timestamp(TimeFormat),
    /// Date-only layout.
    Date(&'static str),
    Code(&'static CodeTable),
    /// Nested shape, decoded with its own schema.
    Object(fn() -> &'static Schema),
    /// JSON array decoded element-wise.
    List(Box<ValueTransform>),
    /// JSON object decoded value-wise, keys preserved.
    Map(Box<ValueTransform>),
}

impl ValueTransform {
    pub fn object<T: Shape>() -> Self {
        Self::Object(T::schema)
    }

    pub fn list_of<T: Shape>() -> Self {
        Self::List(Box::new(Self::object::<T>()))
    }

    pub fn map_of<T: Shape>() -> Self {
        Self::Map(Box::new(Self::object::<T>()))
    }
}

/// Declarative mapping unit: where a field lives and how it is converted.
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    name: &'static str,
    path: Vec<&'static str>,
    transform: ValueTransform,
    default: Option<FieldValue>,
    required: bool,
}

impl FieldDescriptor {
    /// Required field read from the source key of the same name.
    pub fn new(name: &'static str, transform: ValueTransform) -> Self {
        Self {
            name,
            path: vec![name],
            transform,
            default: None,
            required: true,
        }
    }

    /// Read from a different source key, or a nested key path.
    pub fn from_path(mut self, path: &[&'static str]) -> Self {
        if !path.is_empty() {
            self.path = path.to_vec();
        }
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn with_default(mut self, default: FieldValue) -> Self {
        self.default = Some(default);
        self
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }

    pub fn path(&self) -> &[&'static str] {
        &self.path
    }

    pub const fn transform(&self) -> &ValueTransform {
        &self.transform
    }

    pub const fn default(&self) -> Option<&FieldValue> {
        self.default.as_ref()
    }

    pub const fn required(&self) -> bool {
        self.required
    }

    pub fn path_string(&self) -> String {
        self.path.join(".")
    }
}

/// Ordered descriptor list for one target shape.
#[derive(Debug, Clone)]
pub struct Schema {
    name: &'static str,
    fields: Vec<FieldDescriptor>,
}

impl Schema {
    pub fn new(name: &'static str, fields: Vec<FieldDescriptor>) -> Self {
        Self { name, fields }
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }
}
