//! Dynamic cell values and the type lattice used for schema inference.
//!
//! Raw source data is loosely typed: the same logical column can arrive as a
//! number in one object and as text in another. [`Value`] carries a single
//! cell, [`DataType`] describes a column, and [`DataType::merge`] folds the
//! observed representations of a column into one type, producing
//! [`DataType::Choice`] when they disagree.

use std::collections::BTreeMap;
use std::fmt;

/// A single cell.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Boolean(bool),
    Long(i64),
    Double(f64),
    String(String),
    Struct(BTreeMap<String, Value>),
}

/// A named column in a [`Schema`](crate::dataset::Schema).
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub data_type: DataType,
}

impl Field {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

/// Column type.
///
/// `Null` is the type of a column that has only ever been observed as null.
/// `Choice` lists the distinct representations of an ambiguous column in
/// canonical order (see [`DataType::rank`]) and never nests another `Choice`.
#[derive(Debug, Clone, PartialEq)]
pub enum DataType {
    Null,
    Boolean,
    Long,
    Double,
    String,
    Struct(Vec<Field>),
    Choice(Vec<DataType>),
}

impl DataType {
    /// Lower-case name, also used as the sub-field name when a choice is
    /// turned into a struct.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Boolean => "boolean",
            Self::Long => "long",
            Self::Double => "double",
            Self::String => "string",
            Self::Struct(_) => "struct",
            Self::Choice(_) => "choice",
        }
    }

    /// Parse the type names used in catalog definitions and mapping tables.
    #[must_use]
    pub fn parse_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "string" | "varchar" | "text" => Some(Self::String),
            "long" | "bigint" | "int" | "integer" => Some(Self::Long),
            "double" | "float" => Some(Self::Double),
            "boolean" | "bool" => Some(Self::Boolean),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Boolean => 1,
            Self::Long => 2,
            Self::Double => 3,
            Self::String => 4,
            Self::Struct(_) => 5,
            Self::Choice(_) => 6,
        }
    }

    /// True if this type or any nested struct field is a `Choice`.
    #[must_use]
    pub fn contains_choice(&self) -> bool {
        match self {
            Self::Choice(_) => true,
            Self::Struct(fields) => fields.iter().any(|f| f.data_type.contains_choice()),
            _ => false,
        }
    }

    /// Least upper bound of two observed types.
    ///
    /// `Null` is the identity, equal types collapse, structs merge field-wise
    /// and anything else becomes a `Choice` holding both representations.
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        match (self, other) {
            (Self::Null, t) | (t, Self::Null) => t,
            (Self::Struct(a), Self::Struct(b)) => Self::Struct(merge_fields(a, b)),
            (Self::Choice(a), Self::Choice(b)) => Self::choice_of(a.into_iter().chain(b)),
            (Self::Choice(a), t) | (t, Self::Choice(a)) => {
                Self::choice_of(a.into_iter().chain(std::iter::once(t)))
            }
            (a, b) if a == b => a,
            (a, b) => Self::choice_of([a, b]),
        }
    }

    fn choice_of(types: impl IntoIterator<Item = DataType>) -> Self {
        let mut members: Vec<DataType> = Vec::new();
        for t in types {
            match members.iter_mut().find(|m| m.rank() == t.rank()) {
                Some(existing) => {
                    let merged = std::mem::replace(existing, DataType::Null).merge(t);
                    *existing = merged;
                }
                None => members.push(t),
            }
        }
        members.sort_by_key(DataType::rank);
        if members.len() == 1 {
            members.remove(0)
        } else {
            Self::Choice(members)
        }
    }
}

fn merge_fields(mut left: Vec<Field>, right: Vec<Field>) -> Vec<Field> {
    for field in right {
        match left.iter_mut().find(|f| f.name == field.name) {
            Some(existing) => {
                let merged = std::mem::replace(&mut existing.data_type, DataType::Null)
                    .merge(field.data_type);
                existing.data_type = merged;
            }
            None => left.push(field),
        }
    }
    left
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Struct(fields) => {
                write!(f, "struct<")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}:{}", field.name, field.data_type)?;
                }
                write!(f, ">")
            }
            Self::Choice(types) => {
                write!(f, "choice<")?;
                for (i, t) in types.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{t}")?;
                }
                write!(f, ">")
            }
            other => f.write_str(other.name()),
        }
    }
}

impl Value {
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Observed type of this cell.
    #[must_use]
    pub fn data_type(&self) -> DataType {
        match self {
            Self::Null => DataType::Null,
            Self::Boolean(_) => DataType::Boolean,
            Self::Long(_) => DataType::Long,
            Self::Double(_) => DataType::Double,
            Self::String(_) => DataType::String,
            Self::Struct(map) => DataType::Struct(
                map.iter()
                    .map(|(k, v)| Field::new(k.clone(), v.data_type()))
                    .collect(),
            ),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Cast to `target`.
    ///
    /// `None` means the value has no representation in `target`; callers
    /// substitute `Null`. A null input always casts to `Some(Null)`.
    #[must_use]
    pub fn cast(&self, target: &DataType) -> Option<Value> {
        if self.is_null() {
            return Some(Value::Null);
        }
        match target {
            DataType::Null => Some(Value::Null),
            DataType::Choice(_) => Some(self.clone()),
            DataType::String => Some(Value::String(self.to_text())),
            DataType::Long => self.cast_long().map(Value::Long),
            DataType::Double => self.cast_double().map(Value::Double),
            DataType::Boolean => self.cast_bool().map(Value::Boolean),
            DataType::Struct(fields) => match self {
                Value::Struct(map) => {
                    let mut out = BTreeMap::new();
                    for field in fields {
                        let v = match map.get(&field.name) {
                            Some(v) => v.cast(&field.data_type).unwrap_or(Value::Null),
                            None => Value::Null,
                        };
                        out.insert(field.name.clone(), v);
                    }
                    Some(Value::Struct(out))
                }
                _ => None,
            },
        }
    }

    fn cast_long(&self) -> Option<i64> {
        match self {
            Self::Long(v) => Some(*v),
            Self::Boolean(b) => Some(i64::from(*b)),
            Self::Double(d) => double_to_long(*d),
            Self::String(s) => {
                let s = s.trim();
                s.parse::<i64>()
                    .ok()
                    .or_else(|| s.parse::<f64>().ok().and_then(double_to_long))
            }
            Self::Null | Self::Struct(_) => None,
        }
    }

    fn cast_double(&self) -> Option<f64> {
        match self {
            #[allow(clippy::cast_precision_loss)]
            Self::Long(v) => Some(*v as f64),
            Self::Double(d) => Some(*d),
            Self::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            Self::String(s) => s.trim().parse::<f64>().ok().filter(|d| d.is_finite()),
            Self::Null | Self::Struct(_) => None,
        }
    }

    fn cast_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            Self::Long(0) => Some(false),
            Self::Long(1) => Some(true),
            Self::String(s) => parse_bool(s),
            _ => None,
        }
    }

    /// Text rendering used for string casts and predicate comparison.
    #[must_use]
    pub fn to_text(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Boolean(b) => b.to_string(),
            Self::Long(v) => v.to_string(),
            Self::Double(d) => d.to_string(),
            Self::String(s) => s.clone(),
            Self::Struct(_) => self.to_json().to_string(),
        }
    }

    /// Convert to a JSON value. Non-finite doubles become `null`.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Boolean(b) => serde_json::Value::Bool(*b),
            Self::Long(v) => serde_json::Value::from(*v),
            Self::Double(d) => serde_json::Number::from_f64(*d)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Self::String(s) => serde_json::Value::String(s.clone()),
            Self::Struct(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Boolean(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Long(i),
                None => n.as_f64().map_or(Self::Null, Self::Double),
            },
            serde_json::Value::String(s) => Self::String(s),
            // Arrays have no column type of their own; keep their JSON text.
            serde_json::Value::Array(_) => Self::String(v.to_string()),
            serde_json::Value::Object(map) => {
                Self::Struct(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Long(v)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl From<f64> for Value {
    fn from(d: f64) -> Self {
        Self::Double(d)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn double_to_long(d: f64) -> Option<i64> {
    if d.is_finite() && d.fract() == 0.0 && d >= i64::MIN as f64 && d < i64::MAX as f64 {
        Some(d as i64)
    } else {
        None
    }
}

/// Parse the boolean spellings found in raw exports.
#[must_use]
pub fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "1" => Some(true),
        "false" | "f" | "no" | "n" | "0" => Some(false),
        _ => None,
    }
}
