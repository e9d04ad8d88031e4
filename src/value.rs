use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use crate::data_type::DataType;
use crate::error::{Error, Result};

pub(crate) const DATE_FORMAT: &str = "%Y-%m-%d";
pub(crate) const TIME_FORMAT: &str = "%H:%M:%S";
pub(crate) const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Represents a single data value stored in the database.
///
/// This enum wraps all supported Rust types into a single type that can be
/// passed around the engine. It includes support for SQL `NULL` values.
/// SERIAL columns hold [Value::Int]; their counter lives in the owning table.
#[derive(Debug, Clone)]
pub enum Value {
    /// represents an empty or missing value.
    Null,
    /// A 64-bit signed integer value.
    Int(i64),
    /// A 64-bit floating-point value.
    Float(f64),
    /// A boolean value.
    Bool(bool),
    /// A single character, stored by `CHAR` columns.
    Char(char),
    /// A UTF-8 string value, wrapped in an [Arc] for efficient,
    /// thread-safe sharing and cheap cloning.
    Text(Arc<str>),
    /// A calendar date.
    Date(NaiveDate),
    /// A wall-clock time without date.
    Time(NaiveTime),
    /// A date and time without timezone.
    Timestamp(NaiveDateTime),
}

/// The arithmetic operators that numeric values support.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithmeticOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl Value {
    /// Builds a [Value::Text] from anything string-like.
    pub fn text(s: impl AsRef<str>) -> Self {
        Self::Text(Arc::from(s.as_ref()))
    }

    /// Returns `true` if the value is [Value::Null].
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns the inner integer value if this is a [Value::Int].
    /// Otherwise, returns `None`.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the inner float value if this is a [Value::Float].
    /// Otherwise, returns `None`.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Returns a reference to the inner string slice if this is a [Value::Text].
    /// Otherwise, returns `None`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the inner boolean value if this is a [Value::Bool].
    /// Otherwise, returns `None`.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Numeric view of the value, for `Int` and `Float` only.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Returns the logical [DataType] corresponding to this value.
    ///
    /// Returns `None` if the value is [Value::Null], because a standalone NULL
    /// value is untyped until it is placed in a column.
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Self::Null => None,
            Self::Int(_) => Some(DataType::Int),
            Self::Float(_) => Some(DataType::Float),
            Self::Bool(_) => Some(DataType::Bool),
            Self::Char(_) => Some(DataType::Char),
            Self::Text(_) => Some(DataType::Text),
            Self::Date(_) => Some(DataType::Date),
            Self::Time(_) => Some(DataType::Time),
            Self::Timestamp(_) => Some(DataType::Timestamp),
        }
    }

    /// Short SQL name of the value's type, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self.data_type() {
            Some(t) => t.name(),
            None => "NULL",
        }
    }

    fn is_text_like(&self) -> bool {
        matches!(self, Self::Text(_) | Self::Char(_))
    }

    /// Truth value of a condition result. `NULL` is unknown.
    ///
    /// # Errors
    /// Returns an error for values that have no boolean reading (strings, dates).
    pub fn truth(&self) -> Result<Option<bool>> {
        match self {
            Self::Null => Ok(None),
            Self::Bool(b) => Ok(Some(*b)),
            Self::Int(i) => Ok(Some(*i != 0)),
            Self::Float(f) => Ok(Some(*f != 0.0)),
            other => Err(Error::DataType(format!(
                "expected a boolean condition, found {} value {other}",
                other.type_name()
            ))),
        }
    }

    /// SQL ordering between two values.
    ///
    /// Returns `None` when either side is `NULL` or the types cannot be compared.
    /// Integers and floats compare numerically, characters compare with strings.
    pub fn sql_cmp(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Self::Null, _) | (_, Self::Null) => None,
            (Self::Int(l), Self::Int(r)) => Some(l.cmp(r)),
            (Self::Int(_) | Self::Float(_), Self::Int(_) | Self::Float(_)) => {
                self.as_f64()?.partial_cmp(&other.as_f64()?)
            }
            (Self::Bool(l), Self::Bool(r)) => Some(l.cmp(r)),
            (l, r) if l.is_text_like() && r.is_text_like() => {
                Some(l.to_string().cmp(&r.to_string()))
            }
            (Self::Date(l), Self::Date(r)) => Some(l.cmp(r)),
            (Self::Time(l), Self::Time(r)) => Some(l.cmp(r)),
            (Self::Timestamp(l), Self::Timestamp(r)) => Some(l.cmp(r)),
            _ => None,
        }
    }

    /// SQL equality as used by `=`, `IN` and `NULLIF`.
    ///
    /// String comparisons ignore case. Returns `None` when either side is `NULL`.
    ///
    /// # Errors
    /// Returns an error when the two types cannot be compared.
    pub fn sql_eq(&self, other: &Value) -> Result<Option<bool>> {
        if self.is_null() || other.is_null() {
            return Ok(None);
        }
        if self.is_text_like() && other.is_text_like() {
            return Ok(Some(
                self.to_string().to_lowercase() == other.to_string().to_lowercase(),
            ));
        }
        match self.sql_cmp(other) {
            Some(ord) => Ok(Some(ord == Ordering::Equal)),
            None => Err(Error::DataType(format!(
                "cannot compare {} with {}",
                self.type_name(),
                other.type_name()
            ))),
        }
    }

    /// Applies an arithmetic operator.
    ///
    /// `NULL` on either side yields `NULL`. Two integers stay integers
    /// (division truncates), any float operand makes the result a float.
    ///
    /// # Errors
    /// Returns an error on non-numeric operands, overflow, or division by zero.
    pub fn arithmetic(&self, op: ArithmeticOp, other: &Value) -> Result<Value> {
        match (self, other) {
            (Self::Null, _) | (_, Self::Null) => Ok(Self::Null),
            (Self::Int(l), Self::Int(r)) => {
                let result = match op {
                    ArithmeticOp::Add => l.checked_add(*r),
                    ArithmeticOp::Sub => l.checked_sub(*r),
                    ArithmeticOp::Mul => l.checked_mul(*r),
                    ArithmeticOp::Div => {
                        if *r == 0 {
                            return Err(Error::InvalidOperation("division by zero".into()));
                        }
                        l.checked_div(*r)
                    }
                };
                result.map(Self::Int).ok_or_else(|| {
                    Error::DataType(format!("integer overflow in {l} {op} {r}"))
                })
            }
            (l, r) => {
                let (Some(a), Some(b)) = (l.as_f64(), r.as_f64()) else {
                    return Err(Error::DataType(format!(
                        "cannot apply {op} to {} and {}",
                        l.type_name(),
                        r.type_name()
                    )));
                };
                let result = match op {
                    ArithmeticOp::Add => a + b,
                    ArithmeticOp::Sub => a - b,
                    ArithmeticOp::Mul => a * b,
                    ArithmeticOp::Div => {
                        if b == 0.0 {
                            return Err(Error::InvalidOperation("division by zero".into()));
                        }
                        a / b
                    }
                };
                Ok(Self::Float(result))
            }
        }
    }

    /// Unary minus.
    ///
    /// # Errors
    /// Returns an error for non-numeric values or on overflow.
    pub fn negate(&self) -> Result<Value> {
        match self {
            Self::Null => Ok(Self::Null),
            Self::Int(i) => i
                .checked_neg()
                .map(Self::Int)
                .ok_or_else(|| Error::DataType(format!("integer overflow negating {i}"))),
            Self::Float(f) => Ok(Self::Float(-f)),
            other => Err(Error::DataType(format!(
                "cannot negate {} value {other}",
                other.type_name()
            ))),
        }
    }

    /// Rank used to order values of unrelated types.
    fn rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Bool(_) => 1,
            Self::Int(_) | Self::Float(_) => 2,
            Self::Char(_) | Self::Text(_) => 3,
            Self::Date(_) => 4,
            Self::Time(_) => 5,
            Self::Timestamp(_) => 6,
        }
    }

    /// Tie breaker between variants sharing a rank (Int/Float, Char/Text).
    fn variant_index(&self) -> u8 {
        match self {
            Self::Int(_) | Self::Char(_) => 0,
            _ => 1,
        }
    }
}

impl fmt::Display for ArithmeticOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
        };
        f.write_str(symbol)
    }
}

impl std::str::FromStr for ArithmeticOp {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "+" => Ok(Self::Add),
            "-" => Ok(Self::Sub),
            "*" => Ok(Self::Mul),
            "/" => Ok(Self::Div),
            _ => Err(Error::Storage(format!("unknown arithmetic operator {s:?}"))),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Char(c) => write!(f, "{c}"),
            Self::Text(s) => write!(f, "{s}"),
            Self::Date(d) => write!(f, "{}", d.format(DATE_FORMAT)),
            Self::Time(t) => write!(f, "{}", t.format(TIME_FORMAT)),
            Self::Timestamp(ts) => write!(f, "{}", ts.format(TIMESTAMP_FORMAT)),
        }
    }
}

// Total ordering so rows can be sorted and grouped. Floats use their bit
// pattern, so equality stays reflexive and consistent with hashing.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        let by_rank = self.rank().cmp(&other.rank());
        if by_rank != Ordering::Equal {
            return by_rank;
        }
        let by_value = match (self, other) {
            (Self::Null, Self::Null) => Ordering::Equal,
            (Self::Bool(l), Self::Bool(r)) => l.cmp(r),
            (Self::Int(l), Self::Int(r)) => l.cmp(r),
            (Self::Float(l), Self::Float(r)) => l.total_cmp(r),
            (Self::Int(l), Self::Float(r)) => (*l as f64).total_cmp(r),
            (Self::Float(l), Self::Int(r)) => l.total_cmp(&(*r as f64)),
            (Self::Char(l), Self::Char(r)) => l.cmp(r),
            (Self::Text(l), Self::Text(r)) => l.cmp(r),
            (Self::Char(l), Self::Text(r)) => l.to_string().as_str().cmp(r),
            (Self::Text(l), Self::Char(r)) => l.as_ref().cmp(r.to_string().as_str()),
            (Self::Date(l), Self::Date(r)) => l.cmp(r),
            (Self::Time(l), Self::Time(r)) => l.cmp(r),
            (Self::Timestamp(l), Self::Timestamp(r)) => l.cmp(r),
            _ => Ordering::Equal,
        };
        by_value.then_with(|| self.variant_index().cmp(&other.variant_index()))
    }
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Null => {}
            Self::Int(i) => i.hash(state),
            Self::Float(f) => f.to_bits().hash(state),
            Self::Bool(b) => b.hash(state),
            Self::Char(c) => c.hash(state),
            Self::Text(s) => s.hash(state),
            Self::Date(d) => d.hash(state),
            Self::Time(t) => t.hash(state),
            Self::Timestamp(ts) => ts.hash(state),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_type::DataType;

    // ─────────────────────────────────────────────────────────────
    // Test 1 : is_null
    // ─────────────────────────────────────────────────────────────
    #[test]
    fn test_is_null() {
        assert!(Value::Null.is_null());
        assert!(!Value::Int(1).is_null());
        assert!(!Value::Float(1.0).is_null());
        assert!(!Value::text("x").is_null());
        assert!(!Value::Bool(true).is_null());
    }

    // ─────────────────────────────────────────────────────────────
    // Test 2 : accessors
    // ─────────────────────────────────────────────────────────────
    #[test]
    fn test_accessors() {
        assert_eq!(Value::Int(42).as_int(), Some(42));
        assert_eq!(Value::Float(1.0).as_int(), None);
        assert_eq!(Value::Float(3.5).as_float(), Some(3.5));
        assert_eq!(Value::text("hello").as_str(), Some("hello"));
        assert_eq!(Value::Bool(false).as_bool(), Some(false));
        assert_eq!(Value::Int(2).as_f64(), Some(2.0));
        assert_eq!(Value::text("2").as_f64(), None);
    }

    // ─────────────────────────────────────────────────────────────
    // Test 3 : data_type
    // ─────────────────────────────────────────────────────────────
    #[test]
    fn test_data_type() {
        assert_eq!(Value::Null.data_type(), None);
        assert_eq!(Value::Int(1).data_type(), Some(DataType::Int));
        assert_eq!(Value::Float(1.0).data_type(), Some(DataType::Float));
        assert_eq!(Value::text("x").data_type(), Some(DataType::Text));
        assert_eq!(Value::Char('x').data_type(), Some(DataType::Char));
        assert_eq!(Value::Bool(true).data_type(), Some(DataType::Bool));
    }

    // ─────────────────────────────────────────────────────────────
    // Test 4 : equality and ordering
    // ─────────────────────────────────────────────────────────────
    #[test]
    fn test_value_equality() {
        assert_eq!(Value::Null, Value::Null);
        assert_eq!(Value::Int(10), Value::Int(10));
        assert_ne!(Value::Int(10), Value::Int(20));
        assert_eq!(Value::Float(1.5), Value::Float(1.5));
        assert_eq!(Value::text("abc"), Value::text("abc"));
        assert_ne!(Value::Bool(true), Value::Bool(false));
        // same number, different tag
        assert_ne!(Value::Int(1), Value::Float(1.0));
    }

    #[test]
    fn test_total_order_puts_null_first() {
        let mut values = vec![
            Value::Int(3),
            Value::Null,
            Value::Float(1.5),
            Value::Int(-2),
        ];
        values.sort();
        assert_eq!(
            values,
            vec![Value::Null, Value::Int(-2), Value::Float(1.5), Value::Int(3)]
        );
    }

    #[test]
    fn test_sql_cmp() {
        assert_eq!(Value::Int(2).sql_cmp(&Value::Float(2.5)), Some(Ordering::Less));
        assert_eq!(Value::Null.sql_cmp(&Value::Int(1)), None);
        assert_eq!(Value::text("a").sql_cmp(&Value::Int(1)), None);
        assert_eq!(
            Value::Char('b').sql_cmp(&Value::text("a")),
            Some(Ordering::Greater)
        );
    }

    #[test]
    fn test_sql_eq_ignores_case_for_strings() {
        assert_eq!(
            Value::text("Bob").sql_eq(&Value::text("bOB")).unwrap(),
            Some(true)
        );
        assert_eq!(Value::Int(1).sql_eq(&Value::Null).unwrap(), None);
        assert!(Value::Int(1).sql_eq(&Value::text("1")).is_err());
    }

    // ─────────────────────────────────────────────────────────────
    // Test 5 : arithmetic
    // ─────────────────────────────────────────────────────────────
    #[test]
    fn test_arithmetic_keeps_integer_tag() {
        let v = Value::Int(7).arithmetic(ArithmeticOp::Div, &Value::Int(2)).unwrap();
        assert_eq!(v, Value::Int(3));

        let v = Value::Int(7).arithmetic(ArithmeticOp::Add, &Value::Float(0.5)).unwrap();
        assert_eq!(v, Value::Float(7.5));

        let v = Value::Null.arithmetic(ArithmeticOp::Mul, &Value::Int(3)).unwrap();
        assert!(v.is_null());
    }

    #[test]
    fn test_arithmetic_errors() {
        assert!(Value::Int(1).arithmetic(ArithmeticOp::Div, &Value::Int(0)).is_err());
        assert!(Value::Int(i64::MAX).arithmetic(ArithmeticOp::Add, &Value::Int(1)).is_err());
        assert!(Value::text("a").arithmetic(ArithmeticOp::Add, &Value::Int(1)).is_err());
    }

    #[test]
    fn test_truth() {
        assert_eq!(Value::Bool(true).truth().unwrap(), Some(true));
        assert_eq!(Value::Null.truth().unwrap(), None);
        assert_eq!(Value::Int(0).truth().unwrap(), Some(false));
        assert!(Value::text("yes").truth().is_err());
    }

    #[test]
    fn test_display() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        assert_eq!(Value::Date(date).to_string(), "2024-03-09");
        assert_eq!(Value::Null.to_string(), "NULL");
        assert_eq!(Value::Bool(true).to_string(), "true");
    }
}
