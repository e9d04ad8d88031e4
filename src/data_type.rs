use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use crate::error::{Error, Result};
use crate::value::{DATE_FORMAT, TIME_FORMAT, TIMESTAMP_FORMAT, Value};

/// Represents the supported data types in the database schema.
/// These types define the structure of columns and the expected format of values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    /// A 64-bit signed integer.
    Int,
    /// A 64-bit floating-point number.
    Float,
    /// A boolean value (true or false).
    Bool,
    /// Exactly one character.
    Char,
    /// A variable-length UTF-8 character string, validated on insert.
    Varchar,
    /// A variable-length UTF-8 character string that accepts any input.
    Text,
    /// A calendar date (`YYYY-MM-DD`).
    Date,
    /// A time of day (`HH:MM:SS`).
    Time,
    /// A date and time (`YYYY-MM-DD HH:MM:SS`).
    Timestamp,
    /// An integer filled from a per-column counter when omitted.
    Serial,
}

/// Type names understood by the lexer and by [DataType::from_str].
const TYPE_NAMES: &[(&str, DataType)] = &[
    ("INT", DataType::Int),
    ("INTEGER", DataType::Int),
    ("FLOAT", DataType::Float),
    ("REAL", DataType::Float),
    ("BOOL", DataType::Bool),
    ("BOOLEAN", DataType::Bool),
    ("CHAR", DataType::Char),
    ("VARCHAR", DataType::Varchar),
    ("TEXT", DataType::Text),
    ("DATE", DataType::Date),
    ("TIME", DataType::Time),
    ("TIMESTAMP", DataType::Timestamp),
    ("SERIAL", DataType::Serial),
    ("AUTO_INT", DataType::Serial),
];

impl DataType {
    /// Canonical SQL name of the type.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Int => "INT",
            Self::Float => "FLOAT",
            Self::Bool => "BOOLEAN",
            Self::Char => "CHAR",
            Self::Varchar => "VARCHAR",
            Self::Text => "TEXT",
            Self::Date => "DATE",
            Self::Time => "TIME",
            Self::Timestamp => "TIMESTAMP",
            Self::Serial => "SERIAL",
        }
    }

    /// Looks up a type keyword, ignoring case.
    pub fn from_keyword(word: &str) -> Option<Self> {
        TYPE_NAMES
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(word))
            .map(|(_, t)| *t)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Int | Self::Float | Self::Serial)
    }

    /// Converts a raw value into this type.
    ///
    /// `NULL` passes through unchanged. Conversions are strict: a float with a
    /// fractional part is not an `INT`, and temporal strings must match their
    /// canonical format exactly.
    ///
    /// # Errors
    /// Returns [Error::DataType] naming the offending value when it cannot be
    /// represented in this type.
    pub fn parse(&self, raw: &Value) -> Result<Value> {
        if raw.is_null() {
            return Ok(Value::Null);
        }
        match self {
            Self::Int | Self::Serial => self.parse_int(raw),
            Self::Float => self.parse_float(raw),
            Self::Bool => parse_bool(raw),
            Self::Char => {
                let text = raw.to_string();
                let mut chars = text.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Ok(Value::Char(c)),
                    _ => Err(Error::DataType(format!(
                        "CHAR expects exactly one character, got '{text}'"
                    ))),
                }
            }
            Self::Varchar | Self::Text => match raw {
                Value::Text(_) => Ok(raw.clone()),
                other => Ok(Value::text(other.to_string())),
            },
            Self::Date => match raw {
                Value::Date(_) => Ok(raw.clone()),
                Value::Text(s) if has_shape(s, "dddd-dd-dd") => {
                    NaiveDate::parse_from_str(s, DATE_FORMAT)
                        .map(Value::Date)
                        .map_err(|_| self.format_error(raw))
                }
                _ => Err(self.format_error(raw)),
            },
            Self::Time => match raw {
                Value::Time(_) => Ok(raw.clone()),
                Value::Text(s) if has_shape(s, "dd:dd:dd") => {
                    NaiveTime::parse_from_str(s, TIME_FORMAT)
                        .map(Value::Time)
                        .map_err(|_| self.format_error(raw))
                }
                _ => Err(self.format_error(raw)),
            },
            Self::Timestamp => match raw {
                Value::Timestamp(_) => Ok(raw.clone()),
                Value::Text(s) if has_shape(s, "dddd-dd-dd dd:dd:dd") => {
                    NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
                        .map(Value::Timestamp)
                        .map_err(|_| self.format_error(raw))
                }
                _ => Err(self.format_error(raw)),
            },
        }
    }

    /// Checks that an already-typed value belongs to this type.
    ///
    /// `TEXT` admits every value, the other types require the matching variant.
    pub fn validate(&self, value: &Value) -> Result<()> {
        let ok = match (self, value) {
            (_, Value::Null) => true,
            (Self::Int | Self::Serial, Value::Int(_)) => true,
            (Self::Float, Value::Float(_)) => true,
            (Self::Bool, Value::Bool(_)) => true,
            (Self::Char, Value::Char(_)) => true,
            (Self::Varchar, Value::Text(_)) => true,
            (Self::Text, _) => true,
            (Self::Date, Value::Date(_)) => true,
            (Self::Time, Value::Time(_)) => true,
            (Self::Timestamp, Value::Timestamp(_)) => true,
            _ => false,
        };
        if ok {
            Ok(())
        } else {
            Err(Error::DataType(format!(
                "{} value {value} does not match column type {self}",
                value.type_name()
            )))
        }
    }

    /// Validates `value` and returns the form it is stored in.
    ///
    /// Permissive `TEXT` stringifies whatever it receives.
    pub fn admit(&self, value: Value) -> Result<Value> {
        self.validate(&value)?;
        match (self, &value) {
            (Self::Text, Value::Null | Value::Text(_)) => Ok(value),
            (Self::Text, other) => Ok(Value::text(other.to_string())),
            _ => Ok(value),
        }
    }

    fn parse_int(&self, raw: &Value) -> Result<Value> {
        match raw {
            Value::Int(i) => Ok(Value::Int(*i)),
            Value::Float(f) => integral_float(*f)
                .map(Value::Int)
                .ok_or_else(|| Error::DataType(format!("{self} expects an integer, got {f}"))),
            Value::Text(s) => {
                let trimmed = s.trim();
                if !is_decimal_literal(trimmed) {
                    return Err(Error::DataType(format!("{self} expects an integer, got '{s}'")));
                }
                if trimmed.contains('.') {
                    trimmed
                        .parse::<f64>()
                        .ok()
                        .and_then(integral_float)
                        .map(Value::Int)
                        .ok_or_else(|| {
                            Error::DataType(format!("{self} expects an integer, got '{s}'"))
                        })
                } else {
                    trimmed.parse::<i64>().map(Value::Int).map_err(|_| {
                        Error::DataType(format!("{self} value '{s}' is out of range"))
                    })
                }
            }
            Value::Char(c) => c
                .to_digit(10)
                .map(|d| Value::Int(i64::from(d)))
                .ok_or_else(|| Error::DataType(format!("{self} expects an integer, got '{c}'"))),
            other => Err(Error::DataType(format!(
                "{self} does not accept {} value {other}",
                other.type_name()
            ))),
        }
    }

    fn parse_float(&self, raw: &Value) -> Result<Value> {
        match raw {
            Value::Float(f) => Ok(Value::Float(*f)),
            Value::Int(i) => Ok(Value::Float(*i as f64)),
            Value::Text(s) if is_decimal_literal(s.trim()) => s
                .trim()
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| Error::DataType(format!("FLOAT expects a number, got '{s}'"))),
            Value::Char(c) => c
                .to_digit(10)
                .map(|d| Value::Float(f64::from(d)))
                .ok_or_else(|| Error::DataType(format!("FLOAT expects a number, got '{c}'"))),
            other => Err(Error::DataType(format!(
                "FLOAT does not accept {} value {other}",
                other.type_name()
            ))),
        }
    }

    fn format_error(&self, raw: &Value) -> Error {
        let expected = match self {
            Self::Date => "YYYY-MM-DD",
            Self::Time => "HH:MM:SS",
            _ => "YYYY-MM-DD HH:MM:SS",
        };
        Error::DataType(format!("{self} expects format {expected}, got '{raw}'"))
    }
}

fn parse_bool(raw: &Value) -> Result<Value> {
    match raw {
        Value::Bool(b) => Ok(Value::Bool(*b)),
        Value::Int(0) => Ok(Value::Bool(false)),
        Value::Int(1) => Ok(Value::Bool(true)),
        Value::Text(_) | Value::Char(_) => {
            match raw.to_string().trim().to_ascii_lowercase().as_str() {
                "true" | "t" | "1" => Ok(Value::Bool(true)),
                "false" | "f" | "0" => Ok(Value::Bool(false)),
                _ => Err(Error::DataType(format!("BOOLEAN cannot parse '{raw}'"))),
            }
        }
        other => Err(Error::DataType(format!(
            "BOOLEAN does not accept {} value {other}",
            other.type_name()
        ))),
    }
}

fn integral_float(f: f64) -> Option<i64> {
    // i64::MAX as f64 rounds up to 2^63, which is already out of range
    if f.is_finite() && f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

/// Optional sign, digits, at most one decimal point.
fn is_decimal_literal(s: &str) -> bool {
    let body = s.strip_prefix(['-', '+']).unwrap_or(s);
    let mut digits = 0;
    let mut dots = 0;
    for c in body.chars() {
        match c {
            '0'..='9' => digits += 1,
            '.' => dots += 1,
            _ => return false,
        }
    }
    digits > 0 && dots <= 1
}

/// `d` in the shape matches an ASCII digit, anything else matches itself.
fn has_shape(s: &str, shape: &str) -> bool {
    s.len() == shape.len()
        && s.chars().zip(shape.chars()).all(|(c, p)| match p {
            'd' => c.is_ascii_digit(),
            _ => c == p,
        })
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DataType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_keyword(s).ok_or_else(|| Error::DataType(format!("unknown data type: {s}")))
    }
}
