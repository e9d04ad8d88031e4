//! Scalar functions, aggregates, `EXTRACT` and `LIKE` matching.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};

use chrono::{Datelike, Local, Timelike};
use regex::Regex;

use crate::ast::{AggregateFunc, DateField, ScalarFunc};
use crate::data_type::DataType;
use crate::error::{Error, Result};
use crate::value::Value;

thread_local! {
    static LIKE_CACHE: RefCell<HashMap<String, Regex>> = RefCell::new(HashMap::new());
}

/// Compiled LIKE patterns kept per thread.
const LIKE_CACHE_LIMIT: usize = 100;

/// Translates a LIKE pattern into an anchored regular expression.
/// `%` matches any run of characters and `_` exactly one.
fn like_regex(pattern: &str) -> Result<Regex> {
    let mut source = String::with_capacity(pattern.len() + 8);
    source.push_str("(?s)^");
    let mut literal = String::new();
    for c in pattern.chars() {
        match c {
            '%' | '_' => {
                source.push_str(&regex::escape(&literal));
                literal.clear();
                source.push_str(if c == '%' { ".*" } else { "." });
            }
            _ => literal.push(c),
        }
    }
    source.push_str(&regex::escape(&literal));
    source.push('$');
    Regex::new(&source).map_err(|e| Error::InvalidOperation(format!("invalid LIKE pattern: {e}")))
}

/// Case-sensitive SQL `LIKE`. Compiled patterns are cached per thread.
pub fn like_match(text: &str, pattern: &str) -> Result<bool> {
    LIKE_CACHE.with(|cache| {
        if let Some(regex) = cache.borrow().get(pattern) {
            return Ok(regex.is_match(text));
        }
        let regex = like_regex(pattern)?;
        let matched = regex.is_match(text);
        let mut cache = cache.borrow_mut();
        if cache.len() >= LIKE_CACHE_LIMIT {
            let evicted: Vec<String> = cache.keys().take(LIKE_CACHE_LIMIT / 2).cloned().collect();
            for key in evicted {
                cache.remove(&key);
            }
        }
        cache.insert(pattern.to_string(), regex);
        Ok(matched)
    })
}

fn numeric_arg(func: ScalarFunc, value: &Value) -> Result<f64> {
    value.as_f64().ok_or_else(|| {
        Error::DataType(format!(
            "{func} expects a numeric argument, got {} value {value}",
            value.type_name()
        ))
    })
}

fn int_arg(func: ScalarFunc, value: &Value) -> Result<i64> {
    match DataType::Int.parse(value) {
        Ok(Value::Int(i)) => Ok(i),
        _ => Err(Error::DataType(format!(
            "{func} expects an integer argument, got {value}"
        ))),
    }
}

/// Evaluates a scalar function over already-evaluated arguments.
///
/// Any `NULL` argument makes the result `NULL`.
pub fn call_scalar(func: ScalarFunc, args: &[Value]) -> Result<Value> {
    if args.iter().any(Value::is_null) {
        return Ok(Value::Null);
    }
    let now = Local::now().naive_local();
    let now = now.with_nanosecond(0).unwrap_or(now);

    let first = args.first().unwrap_or(&Value::Null);
    let second = args.get(1).unwrap_or(&Value::Null);
    let value = match func {
        ScalarFunc::Upper => Value::text(first.to_string().to_uppercase()),
        ScalarFunc::Lower => Value::text(first.to_string().to_lowercase()),
        ScalarFunc::Length => Value::Int(first.to_string().chars().count() as i64),
        ScalarFunc::Trim => Value::text(first.to_string().trim()),
        ScalarFunc::Ltrim => Value::text(first.to_string().trim_start()),
        ScalarFunc::Rtrim => Value::text(first.to_string().trim_end()),
        ScalarFunc::Substring => {
            let text = first.to_string();
            let start = int_arg(func, second)?;
            let begin = start.saturating_sub(1);
            let end = match args.get(2) {
                Some(len) => {
                    let len = int_arg(func, len)?;
                    if len < 0 {
                        return Err(Error::InvalidOperation(
                            "negative SUBSTRING length".into(),
                        ));
                    }
                    Some(begin.saturating_add(len))
                }
                None => None,
            };
            let skip = begin.max(0) as usize;
            let take = match end {
                Some(end) => (end.max(0) as usize).saturating_sub(skip),
                None => usize::MAX,
            };
            Value::text(text.chars().skip(skip).take(take).collect::<String>())
        }
        ScalarFunc::Abs => match first {
            Value::Int(i) => i
                .checked_abs()
                .map(Value::Int)
                .ok_or_else(|| Error::DataType(format!("integer overflow in ABS({i})")))?,
            other => Value::Float(numeric_arg(func, other)?.abs()),
        },
        ScalarFunc::Round => {
            let digits = match args.get(1) {
                Some(d) => int_arg(func, d)?,
                None => 0,
            };
            match first {
                Value::Int(i) if digits >= 0 => Value::Int(*i),
                other => {
                    let x = numeric_arg(func, other)?;
                    let scale = 10f64.powi(digits.clamp(-300, 300) as i32);
                    Value::Float((x * scale).round() / scale)
                }
            }
        }
        ScalarFunc::Ceil | ScalarFunc::Floor => match first {
            Value::Int(i) => Value::Int(*i),
            other => {
                let x = numeric_arg(func, other)?;
                Value::Float(if func == ScalarFunc::Ceil { x.ceil() } else { x.floor() })
            }
        },
        ScalarFunc::Sqrt => {
            let x = numeric_arg(func, first)?;
            if x < 0.0 {
                return Err(Error::InvalidOperation(format!(
                    "cannot take the square root of {first}"
                )));
            }
            Value::Float(x.sqrt())
        }
        ScalarFunc::Power => match (first, second) {
            (Value::Int(base), Value::Int(exp)) if (0..=u32::MAX as i64).contains(exp) => base
                .checked_pow(*exp as u32)
                .map(Value::Int)
                .ok_or_else(|| Error::DataType(format!("integer overflow in POWER({base}, {exp})")))?,
            (base, exp) => Value::Float(numeric_arg(func, base)?.powf(numeric_arg(func, exp)?)),
        },
        ScalarFunc::Mod => match (first, second) {
            (_, Value::Int(0)) => {
                return Err(Error::InvalidOperation("division by zero".into()));
            }
            (Value::Int(a), Value::Int(b)) => Value::Int(a.wrapping_rem(*b)),
            (a, b) => {
                let divisor = numeric_arg(func, b)?;
                if divisor == 0.0 {
                    return Err(Error::InvalidOperation("division by zero".into()));
                }
                Value::Float(numeric_arg(func, a)? % divisor)
            }
        },
        ScalarFunc::Now | ScalarFunc::CurrentTimestamp => Value::Timestamp(now),
        ScalarFunc::CurrentDate => Value::Date(now.date()),
        ScalarFunc::CurrentTime => Value::Time(now.time()),
    };
    Ok(value)
}

/// `EXTRACT(field FROM value)`. Strings are read as timestamps, dates or times.
pub fn extract(field: DateField, value: &Value) -> Result<Value> {
    let value = match value {
        Value::Null => return Ok(Value::Null),
        Value::Text(_) => [DataType::Timestamp, DataType::Date, DataType::Time]
            .iter()
            .find_map(|t| t.parse(value).ok())
            .ok_or_else(|| {
                Error::DataType(format!("cannot extract {field} from '{value}'"))
            })?,
        other => other.clone(),
    };
    let part = match (&value, field) {
        (Value::Date(d), DateField::Year) => d.year() as i64,
        (Value::Date(d), DateField::Month) => d.month() as i64,
        (Value::Date(d), DateField::Day) => d.day() as i64,
        (Value::Timestamp(ts), DateField::Year) => ts.year() as i64,
        (Value::Timestamp(ts), DateField::Month) => ts.month() as i64,
        (Value::Timestamp(ts), DateField::Day) => ts.day() as i64,
        (Value::Timestamp(ts), DateField::Hour) => ts.hour() as i64,
        (Value::Timestamp(ts), DateField::Minute) => ts.minute() as i64,
        (Value::Timestamp(ts), DateField::Second) => ts.second() as i64,
        (Value::Time(t), DateField::Hour) => t.hour() as i64,
        (Value::Time(t), DateField::Minute) => t.minute() as i64,
        (Value::Time(t), DateField::Second) => t.second() as i64,
        _ => {
            return Err(Error::DataType(format!(
                "cannot extract {field} from {} value {value}",
                value.type_name()
            )));
        }
    };
    Ok(Value::Int(part))
}

/// Folds the values of one group. `NULL`s are skipped; `COUNT` of nothing is
/// 0 and every other aggregate of nothing is `NULL`.
pub fn aggregate(func: AggregateFunc, values: Vec<Value>, distinct: bool) -> Result<Value> {
    let mut values: Vec<Value> = values.into_iter().filter(|v| !v.is_null()).collect();
    if distinct {
        let mut seen = HashSet::new();
        values.retain(|v| seen.insert(v.clone()));
    }

    match func {
        AggregateFunc::Count => Ok(Value::Int(values.len() as i64)),
        AggregateFunc::Min => Ok(values.into_iter().min().unwrap_or(Value::Null)),
        AggregateFunc::Max => Ok(values.into_iter().max().unwrap_or(Value::Null)),
        AggregateFunc::Sum | AggregateFunc::Avg => {
            if values.is_empty() {
                return Ok(Value::Null);
            }
            if let Some(bad) = values.iter().find(|v| v.as_f64().is_none()) {
                return Err(Error::DataType(format!(
                    "{func} requires numeric values, got {} value {bad}",
                    bad.type_name()
                )));
            }
            let count = values.len() as f64;
            let all_ints = values.iter().all(|v| matches!(v, Value::Int(_)));
            if func == AggregateFunc::Sum && all_ints {
                return values
                    .iter()
                    .filter_map(Value::as_int)
                    .try_fold(0i64, |acc, i| acc.checked_add(i))
                    .map(Value::Int)
                    .ok_or_else(|| Error::DataType("integer overflow in SUM".into()));
            }
            let total: f64 = values.iter().filter_map(Value::as_f64).sum();
            if func == AggregateFunc::Sum {
                Ok(Value::Float(total))
            } else {
                Ok(Value::Float(total / count))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_like_wildcards() {
        assert!(like_match("Alice", "A%").unwrap());
        assert!(like_match("Alice", "_lice").unwrap());
        assert!(!like_match("alice", "A%").unwrap());
        assert!(like_match("a.b", "a.b").unwrap());
        assert!(!like_match("axb", "a.b").unwrap());
        assert!(like_match("100%", "100%").unwrap());
        assert!(like_match("", "%").unwrap());
        // cached pattern, different input
        assert!(!like_match("Bob", "A%").unwrap());
    }

    #[test]
    fn test_like_cache_stays_bounded() {
        for i in 0..250 {
            assert!(like_match(&format!("row{i}"), &format!("row{i}%")).unwrap());
        }
        LIKE_CACHE.with(|cache| assert!(cache.borrow().len() <= LIKE_CACHE_LIMIT));
    }

    #[test]
    fn test_string_functions() {
        let hello = Value::text("  Hello ");
        assert_eq!(call_scalar(ScalarFunc::Trim, &[hello.clone()]).unwrap(), Value::text("Hello"));
        assert_eq!(call_scalar(ScalarFunc::Upper, &[Value::text("abc")]).unwrap(), Value::text("ABC"));
        assert_eq!(call_scalar(ScalarFunc::Length, &[hello]).unwrap(), Value::Int(8));
        assert_eq!(
            call_scalar(ScalarFunc::Substring, &[Value::text("hello"), Value::Int(2), Value::Int(3)]).unwrap(),
            Value::text("ell")
        );
        assert_eq!(
            call_scalar(ScalarFunc::Substring, &[Value::text("hello"), Value::Int(0), Value::Int(3)]).unwrap(),
            Value::text("he")
        );
        assert_eq!(
            call_scalar(ScalarFunc::Substring, &[Value::text("hello"), Value::Int(4)]).unwrap(),
            Value::text("lo")
        );
        assert!(call_scalar(ScalarFunc::Lower, &[Value::Null]).unwrap().is_null());
    }

    #[test]
    fn test_numeric_functions() {
        assert_eq!(call_scalar(ScalarFunc::Abs, &[Value::Int(-3)]).unwrap(), Value::Int(3));
        assert_eq!(
            call_scalar(ScalarFunc::Round, &[Value::Float(2.345), Value::Int(1)]).unwrap(),
            Value::Float(2.3)
        );
        assert_eq!(call_scalar(ScalarFunc::Ceil, &[Value::Float(1.2)]).unwrap(), Value::Float(2.0));
        assert_eq!(call_scalar(ScalarFunc::Power, &[Value::Int(2), Value::Int(10)]).unwrap(), Value::Int(1024));
        assert_eq!(call_scalar(ScalarFunc::Mod, &[Value::Int(7), Value::Int(3)]).unwrap(), Value::Int(1));
        assert!(call_scalar(ScalarFunc::Mod, &[Value::Int(7), Value::Int(0)]).is_err());
        assert!(call_scalar(ScalarFunc::Sqrt, &[Value::Int(-1)]).is_err());
        assert!(call_scalar(ScalarFunc::Abs, &[Value::text("x")]).is_err());
    }

    #[test]
    fn test_current_date_matches_now() {
        let date = call_scalar(ScalarFunc::CurrentDate, &[]).unwrap();
        assert!(matches!(date, Value::Date(_)));
    }

    #[test]
    fn test_extract() {
        let d = Value::Date(NaiveDate::from_ymd_opt(2024, 7, 14).unwrap());
        assert_eq!(extract(DateField::Month, &d).unwrap(), Value::Int(7));
        assert!(extract(DateField::Hour, &d).is_err());
        assert_eq!(
            extract(DateField::Minute, &Value::text("2024-01-01 10:42:00")).unwrap(),
            Value::Int(42)
        );
        assert!(extract(DateField::Year, &Value::Null).unwrap().is_null());
    }

    #[test]
    fn test_aggregates_skip_nulls() {
        let values = vec![Value::Int(1), Value::Null, Value::Int(3), Value::Int(3)];
        assert_eq!(aggregate(AggregateFunc::Count, values.clone(), false).unwrap(), Value::Int(3));
        assert_eq!(aggregate(AggregateFunc::Count, values.clone(), true).unwrap(), Value::Int(2));
        assert_eq!(aggregate(AggregateFunc::Sum, values.clone(), false).unwrap(), Value::Int(7));
        assert_eq!(aggregate(AggregateFunc::Sum, values.clone(), true).unwrap(), Value::Int(4));
        assert_eq!(aggregate(AggregateFunc::Max, values.clone(), false).unwrap(), Value::Int(3));
        assert_eq!(aggregate(AggregateFunc::Avg, vec![Value::Int(1), Value::Int(2)], false).unwrap(), Value::Float(1.5));
    }

    #[test]
    fn test_aggregates_on_empty_input() {
        assert_eq!(aggregate(AggregateFunc::Count, vec![], false).unwrap(), Value::Int(0));
        assert!(aggregate(AggregateFunc::Sum, vec![Value::Null], false).unwrap().is_null());
        assert!(aggregate(AggregateFunc::Min, vec![], false).unwrap().is_null());
    }

    #[test]
    fn test_sum_rejects_text() {
        let err = aggregate(AggregateFunc::Sum, vec![Value::text("a")], false).unwrap_err();
        assert!(matches!(err, Error::DataType(_)));
        assert_eq!(
            aggregate(AggregateFunc::Max, vec![Value::text("a"), Value::text("b")], false).unwrap(),
            Value::text("b")
        );
    }
}
