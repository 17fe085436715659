//! Canonical scalar value representation shared by row sets, filter literals,
//! and result rows.
use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use time::macros::{date, format_description};
use time::Date;

const UNIX_EPOCH_DATE: Date = date!(1970-01-01);

/// Typed value tagged with explicit type information so the JSON form remains
/// unambiguous for every collaborator feeding rows or literals into the engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum Value {
    /// Missing or null-filled value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Numeric value; integers and decimals share one representation.
    Number(f64),
    /// UTF-8 string value.
    String(String),
    /// Calendar date stored as days since the Unix epoch.
    Date(i32),
    /// Literal sequence. Only meaningful as the operand of an `in` filter.
    List(Vec<Value>),
}

impl Value {
    /// Parses a `YYYY-MM-DD` string into a [`Value::Date`].
    pub fn date(text: &str) -> Option<Value> {
        parse_date(text).map(Value::Date)
    }

    /// Returns `true` when the value is [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns the numeric payload when the value is a number.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Short name of the variant, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Date(_) => "date",
            Value::List(_) => "list",
        }
    }

    /// Equality used by join predicates: nulls never match, variants must agree.
    pub(crate) fn join_matches(&self, other: &Value) -> bool {
        if self.is_null() || other.is_null() {
            return false;
        }
        self.key() == other.key()
    }

    /// Hashable identity of the value, used for grouping partitions.
    pub(crate) fn key(&self) -> ValueKey {
        match self {
            Value::Null => ValueKey::Null,
            Value::Bool(b) => ValueKey::Bool(*b),
            // -0.0 and 0.0 must land in the same partition.
            Value::Number(n) if *n == 0.0 => ValueKey::Number(0f64.to_bits()),
            Value::Number(n) => ValueKey::Number(n.to_bits()),
            Value::String(s) => ValueKey::String(s.clone()),
            Value::Date(d) => ValueKey::Date(*d),
            Value::List(items) => ValueKey::List(items.iter().map(Value::key).collect()),
        }
    }
}

/// Hashable projection of a [`Value`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) enum ValueKey {
    Null,
    Bool(bool),
    Number(u64),
    String(String),
    Date(i32),
    List(Vec<ValueKey>),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => f.write_str(&format_number(*n)),
            Value::String(s) => f.write_str(s),
            Value::Date(d) => f.write_str(&format_date(*d)),
            Value::List(items) => {
                f.write_str("[")?;
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
        }
    }
}

/// Parses `YYYY-MM-DD` into days since the Unix epoch.
pub(crate) fn parse_date(text: &str) -> Option<i32> {
    let format = format_description!("[year]-[month]-[day]");
    let date = Date::parse(text.trim(), &format).ok()?;
    Some(date.to_julian_day() - UNIX_EPOCH_DATE.to_julian_day())
}

/// Formats days since the Unix epoch as `YYYY-MM-DD`.
pub(crate) fn format_date(days: i32) -> String {
    let format = format_description!("[year]-[month]-[day]");
    UNIX_EPOCH_DATE
        .to_julian_day()
        .checked_add(days)
        .and_then(|julian| Date::from_julian_day(julian).ok())
        .and_then(|date| date.format(&format).ok())
        .unwrap_or_else(|| days.to_string())
}

/// Integral numbers render without a trailing `.0`.
pub(crate) fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

/// Total order across mixed values: null first, then booleans, numbers,
/// dates, strings, lists. Used for sorting result rows.
pub(crate) fn total_cmp(left: &Value, right: &Value) -> Ordering {
    let rank = |value: &Value| match value {
        Value::Null => 0u8,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::Date(_) => 3,
        Value::String(_) => 4,
        Value::List(_) => 5,
    };
    let (left_rank, right_rank) = (rank(left), rank(right));
    if left_rank != right_rank {
        return left_rank.cmp(&right_rank);
    }
    match (left, right) {
        (Value::Bool(l), Value::Bool(r)) => l.cmp(r),
        (Value::Number(l), Value::Number(r)) => cmp_f64_total(*l, *r),
        (Value::Date(l), Value::Date(r)) => l.cmp(r),
        (Value::String(l), Value::String(r)) => l.cmp(r),
        (Value::List(l), Value::List(r)) => {
            for (a, b) in l.iter().zip(r.iter()) {
                let ord = total_cmp(a, b);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            l.len().cmp(&r.len())
        }
        _ => Ordering::Equal,
    }
}

/// NaN sorts after every number and equal to itself.
pub(crate) fn cmp_f64_total(left: f64, right: f64) -> Ordering {
    match (left.is_nan(), right.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => left.partial_cmp(&right).unwrap_or(Ordering::Equal),
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Number(value as f64)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Number(f64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::List(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}
