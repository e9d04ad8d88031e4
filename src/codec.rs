//! Binary-safe encoding of values, AST nodes and whole databases.
//!
//! Everything is first turned into an [Encoded] tree whose variants carry a
//! `type_marker`, then written as CBOR. AST nodes become `ast_object` records
//! (class name plus attributes) and come back through closed per-family
//! registries, so the file never names code to run.

use std::collections::{BTreeMap, HashMap};

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use crate::ast::{
    AggregateFunc, ColumnRef, ComparisonOp, Cte, DateField, Expr, LogicalOp, OrderByClause,
    ScalarFunc, Select, SelectItem, SortDirection, TableRef, WhenClause,
};
use crate::data_type::DataType;
use crate::database::{Database, VIEWS_KEY};
use crate::error::{Error, Result};
use crate::table::{ColumnDef, Constraint, Schema, Table};
use crate::value::{ArithmeticOp, Value};

const AST_MODULE: &str = "quartz::ast";
const TYPE_MODULE: &str = "quartz::data_type";

const ISO_DATE: &str = "%Y-%m-%d";
const ISO_TIME: &str = "%H:%M:%S%.f";
const ISO_DATETIME: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Intermediate form of anything that gets persisted.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type_marker", content = "payload", rename_all = "snake_case")]
pub enum Encoded {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Seq(Vec<Encoded>),
    Map(BTreeMap<String, Encoded>),
    TypeReference {
        name: String,
        origin: String,
    },
    #[serde(rename = "datetime_obj")]
    DateTime {
        subkind: String,
        iso8601: String,
    },
    AstObject {
        class_name: String,
        origin_module: String,
        attribute_names: Vec<String>,
        attribute_map: BTreeMap<String, Encoded>,
    },
    StringFallback {
        value: String,
    },
}

impl Encoded {
    fn marker(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::Seq(_) => "seq",
            Self::Map(_) => "map",
            Self::TypeReference { .. } => "type_reference",
            Self::DateTime { .. } => "datetime_obj",
            Self::AstObject { .. } => "ast_object",
            Self::StringFallback { .. } => "string_fallback",
        }
    }

    /// Builds an `ast_object` keeping the attribute order.
    fn object(class_name: &str, attributes: Vec<(&str, Encoded)>) -> Self {
        let attribute_names = attributes.iter().map(|(n, _)| n.to_string()).collect();
        let attribute_map = attributes
            .into_iter()
            .map(|(n, v)| (n.to_string(), v))
            .collect();
        Self::AstObject {
            class_name: class_name.to_string(),
            origin_module: AST_MODULE.to_string(),
            attribute_names,
            attribute_map,
        }
    }

    fn fallback(value: impl ToString) -> Self {
        Self::StringFallback {
            value: value.to_string(),
        }
    }
}

fn mismatch(expected: &str, found: &Encoded) -> Error {
    Error::Storage(format!(
        "expected {expected}, found {} record",
        found.marker()
    ))
}

pub trait Encode {
    fn serialize(&self) -> Encoded;
}

pub trait Decode: Sized {
    fn deserialize(encoded: Encoded) -> Result<Self>;
}

/// Writes an encoded tree as CBOR.
pub fn to_bytes(encoded: &Encoded) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    ciborium::into_writer(encoded, &mut bytes)?;
    Ok(bytes)
}

pub fn from_bytes(bytes: &[u8]) -> Result<Encoded> {
    Ok(ciborium::from_reader(bytes)?)
}

// --- primitives and containers ---

impl Encode for Encoded {
    fn serialize(&self) -> Encoded {
        self.clone()
    }
}

impl Decode for Encoded {
    fn deserialize(encoded: Encoded) -> Result<Self> {
        Ok(encoded)
    }
}

impl Encode for bool {
    fn serialize(&self) -> Encoded {
        Encoded::Bool(*self)
    }
}

impl Decode for bool {
    fn deserialize(encoded: Encoded) -> Result<Self> {
        match encoded {
            Encoded::Bool(b) => Ok(b),
            other => Err(mismatch("bool", &other)),
        }
    }
}

impl Encode for i64 {
    fn serialize(&self) -> Encoded {
        Encoded::Int(*self)
    }
}

impl Decode for i64 {
    fn deserialize(encoded: Encoded) -> Result<Self> {
        match encoded {
            Encoded::Int(i) => Ok(i),
            other => Err(mismatch("int", &other)),
        }
    }
}

impl Encode for usize {
    fn serialize(&self) -> Encoded {
        Encoded::Int(i64::try_from(*self).unwrap_or(i64::MAX))
    }
}

impl Decode for usize {
    fn deserialize(encoded: Encoded) -> Result<Self> {
        let i = i64::deserialize(encoded)?;
        usize::try_from(i).map_err(|_| Error::Storage(format!("{i} is not a valid count")))
    }
}

impl Encode for f64 {
    fn serialize(&self) -> Encoded {
        Encoded::Float(*self)
    }
}

impl Decode for f64 {
    fn deserialize(encoded: Encoded) -> Result<Self> {
        match encoded {
            Encoded::Float(f) => Ok(f),
            Encoded::Int(i) => Ok(i as f64),
            other => Err(mismatch("float", &other)),
        }
    }
}

impl Encode for String {
    fn serialize(&self) -> Encoded {
        Encoded::Str(self.clone())
    }
}

impl Decode for String {
    fn deserialize(encoded: Encoded) -> Result<Self> {
        match encoded {
            Encoded::Str(s) => Ok(s),
            other => Err(mismatch("str", &other)),
        }
    }
}

impl<T: Encode> Encode for Option<T> {
    fn serialize(&self) -> Encoded {
        match self {
            Some(inner) => inner.serialize(),
            None => Encoded::Null,
        }
    }
}

impl<T: Decode> Decode for Option<T> {
    fn deserialize(encoded: Encoded) -> Result<Self> {
        match encoded {
            Encoded::Null => Ok(None),
            other => T::deserialize(other).map(Some),
        }
    }
}

impl<T: Encode> Encode for Vec<T> {
    fn serialize(&self) -> Encoded {
        Encoded::Seq(self.iter().map(Encode::serialize).collect())
    }
}

impl<T: Decode> Decode for Vec<T> {
    fn deserialize(encoded: Encoded) -> Result<Self> {
        match encoded {
            Encoded::Seq(items) => items.into_iter().map(T::deserialize).collect(),
            other => Err(mismatch("seq", &other)),
        }
    }
}

impl<T: Encode> Encode for Box<T> {
    fn serialize(&self) -> Encoded {
        (**self).serialize()
    }
}

impl<T: Decode> Decode for Box<T> {
    fn deserialize(encoded: Encoded) -> Result<Self> {
        T::deserialize(encoded).map(Box::new)
    }
}

impl<T: Encode> Encode for BTreeMap<String, T> {
    fn serialize(&self) -> Encoded {
        Encoded::Map(
            self.iter()
                .map(|(k, v)| (k.clone(), v.serialize()))
                .collect(),
        )
    }
}

impl<T: Decode> Decode for BTreeMap<String, T> {
    fn deserialize(encoded: Encoded) -> Result<Self> {
        match encoded {
            Encoded::Map(entries) => entries
                .into_iter()
                .map(|(k, v)| Ok((k, T::deserialize(v)?)))
                .collect(),
            other => Err(mismatch("map", &other)),
        }
    }
}

// --- dates, types and values ---

fn datetime(subkind: &str, iso8601: String) -> Encoded {
    Encoded::DateTime {
        subkind: subkind.to_string(),
        iso8601,
    }
}

fn decode_datetime(encoded: Encoded, want: &str) -> Result<String> {
    match encoded {
        Encoded::DateTime { subkind, iso8601 } if subkind == want => Ok(iso8601),
        other => Err(mismatch(want, &other)),
    }
}

fn bad_datetime(iso8601: &str) -> Error {
    Error::Storage(format!("invalid ISO 8601 value {iso8601}"))
}

impl Encode for NaiveDate {
    fn serialize(&self) -> Encoded {
        datetime("date", self.format(ISO_DATE).to_string())
    }
}

impl Decode for NaiveDate {
    fn deserialize(encoded: Encoded) -> Result<Self> {
        let iso = decode_datetime(encoded, "date")?;
        NaiveDate::parse_from_str(&iso, ISO_DATE).map_err(|_| bad_datetime(&iso))
    }
}

impl Encode for NaiveTime {
    fn serialize(&self) -> Encoded {
        datetime("time", self.format(ISO_TIME).to_string())
    }
}

impl Decode for NaiveTime {
    fn deserialize(encoded: Encoded) -> Result<Self> {
        let iso = decode_datetime(encoded, "time")?;
        NaiveTime::parse_from_str(&iso, ISO_TIME).map_err(|_| bad_datetime(&iso))
    }
}

impl Encode for NaiveDateTime {
    fn serialize(&self) -> Encoded {
        datetime("datetime", self.format(ISO_DATETIME).to_string())
    }
}

impl Decode for NaiveDateTime {
    fn deserialize(encoded: Encoded) -> Result<Self> {
        let iso = decode_datetime(encoded, "datetime")?;
        NaiveDateTime::parse_from_str(&iso, ISO_DATETIME).map_err(|_| bad_datetime(&iso))
    }
}

impl Encode for DataType {
    fn serialize(&self) -> Encoded {
        Encoded::TypeReference {
            name: self.name().to_string(),
            origin: TYPE_MODULE.to_string(),
        }
    }
}

impl Decode for DataType {
    fn deserialize(encoded: Encoded) -> Result<Self> {
        match encoded {
            Encoded::TypeReference { name, .. } => DataType::from_keyword(&name)
                .ok_or_else(|| Error::Storage(format!("unknown type reference {name}"))),
            other => Err(mismatch("type_reference", &other)),
        }
    }
}

impl Encode for Value {
    fn serialize(&self) -> Encoded {
        match self {
            Value::Null => Encoded::Null,
            Value::Int(i) => Encoded::Int(*i),
            Value::Float(f) => Encoded::Float(*f),
            Value::Bool(b) => Encoded::Bool(*b),
            Value::Text(s) => Encoded::Str(s.to_string()),
            Value::Char(c) => Encoded::fallback(c),
            Value::Date(d) => d.serialize(),
            Value::Time(t) => t.serialize(),
            Value::Timestamp(ts) => ts.serialize(),
        }
    }
}

impl Decode for Value {
    fn deserialize(encoded: Encoded) -> Result<Self> {
        match encoded {
            Encoded::Null => Ok(Value::Null),
            Encoded::Int(i) => Ok(Value::Int(i)),
            Encoded::Float(f) => Ok(Value::Float(f)),
            Encoded::Bool(b) => Ok(Value::Bool(b)),
            Encoded::Str(s) => Ok(Value::text(s)),
            Encoded::StringFallback { value } => {
                let mut chars = value.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Ok(Value::Char(c)),
                    _ => Ok(Value::text(value)),
                }
            }
            Encoded::DateTime { subkind, iso8601 } => {
                let parsed = match subkind.as_str() {
                    "date" => NaiveDate::parse_from_str(&iso8601, ISO_DATE).map(Value::Date),
                    "time" => NaiveTime::parse_from_str(&iso8601, ISO_TIME).map(Value::Time),
                    "datetime" => {
                        NaiveDateTime::parse_from_str(&iso8601, ISO_DATETIME).map(Value::Timestamp)
                    }
                    other => {
                        return Err(Error::Storage(format!("unknown datetime subkind {other}")));
                    }
                };
                parsed.map_err(|_| bad_datetime(&iso8601))
            }
            other => Err(mismatch("scalar value", &other)),
        }
    }
}

/// Operator-like enums travel as their SQL spelling.
macro_rules! fallback_codec {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Encode for $ty {
                fn serialize(&self) -> Encoded {
                    Encoded::fallback(self)
                }
            }

            impl Decode for $ty {
                fn deserialize(encoded: Encoded) -> Result<Self> {
                    match encoded {
                        Encoded::StringFallback { value } => value.parse::<$ty>().map_err(|_| {
                            Error::Storage(format!(
                                "{value:?} is not a valid {}",
                                stringify!($ty)
                            ))
                        }),
                        other => Err(mismatch("string_fallback", &other)),
                    }
                }
            }
        )*
    };
}

fallback_codec!(
    ArithmeticOp,
    ComparisonOp,
    LogicalOp,
    AggregateFunc,
    ScalarFunc,
    DateField,
    SortDirection,
    Constraint,
);

// --- AST objects ---

/// Attributes of an `ast_object` being rebuilt.
pub struct Fields {
    class_name: String,
    attributes: BTreeMap<String, Encoded>,
}

impl Fields {
    /// Removes and decodes one attribute.
    ///
    /// # Errors
    /// A missing attribute or a mistyped value is a [Error::Storage].
    pub fn take<T: Decode>(&mut self, name: &str) -> Result<T> {
        let value = self.attributes.remove(name).ok_or_else(|| {
            Error::Storage(format!("{} is missing attribute {name}", self.class_name))
        })?;
        T::deserialize(value)
    }
}

type Constructor<T> = fn(&mut Fields) -> Result<T>;

/// Looks the class up in `registry` and rebuilds it from its attributes.
fn rebuild<T>(encoded: Encoded, family: &str, registry: &[(&str, Constructor<T>)]) -> Result<T> {
    let (class_name, attribute_map) = match encoded {
        Encoded::AstObject {
            class_name,
            attribute_map,
            ..
        } => (class_name, attribute_map),
        other => return Err(mismatch(family, &other)),
    };
    let (_, construct) = registry
        .iter()
        .find(|(name, _)| *name == class_name)
        .ok_or_else(|| Error::Storage(format!("unknown {family} class {class_name}")))?;
    construct(&mut Fields {
        class_name,
        attributes: attribute_map,
    })
}

impl Encode for Expr {
    fn serialize(&self) -> Encoded {
        match self {
            Expr::Column(c) => Encoded::object(
                "ColumnRef",
                vec![("table", c.table.serialize()), ("name", c.name.serialize())],
            ),
            Expr::Literal(v) => Encoded::object("Literal", vec![("value", v.serialize())]),
            Expr::Binary { left, op, right } => Encoded::object(
                "BinaryOperation",
                vec![
                    ("left", left.serialize()),
                    ("op", op.serialize()),
                    ("right", right.serialize()),
                ],
            ),
            Expr::Negate(e) => Encoded::object("Negation", vec![("expr", e.serialize())]),
            Expr::Comparison { left, op, right } => Encoded::object(
                "Comparison",
                vec![
                    ("left", left.serialize()),
                    ("op", op.serialize()),
                    ("right", right.serialize()),
                ],
            ),
            Expr::Logical { left, op, right } => Encoded::object(
                "LogicalCondition",
                vec![
                    ("left", left.serialize()),
                    ("op", op.serialize()),
                    ("right", right.serialize()),
                ],
            ),
            Expr::Not(e) => Encoded::object("NotCondition", vec![("expr", e.serialize())]),
            Expr::Aggregate {
                func,
                arg,
                distinct,
            } => Encoded::object(
                "AggregateFunction",
                vec![
                    ("func", func.serialize()),
                    ("arg", arg.serialize()),
                    ("distinct", distinct.serialize()),
                ],
            ),
            Expr::Function { func, args } => Encoded::object(
                "ScalarFunction",
                vec![("func", func.serialize()), ("args", args.serialize())],
            ),
            Expr::Case {
                operand,
                branches,
                else_result,
            } => Encoded::object(
                "CaseExpression",
                vec![
                    ("operand", operand.serialize()),
                    ("branches", branches.serialize()),
                    ("else_result", else_result.serialize()),
                ],
            ),
            Expr::Cast { expr, data_type } => Encoded::object(
                "CastExpression",
                vec![("expr", expr.serialize()), ("data_type", data_type.serialize())],
            ),
            Expr::Extract { field, expr } => Encoded::object(
                "ExtractExpression",
                vec![("field", field.serialize()), ("expr", expr.serialize())],
            ),
            Expr::Coalesce(args) => {
                Encoded::object("CoalesceExpression", vec![("args", args.serialize())])
            }
            Expr::NullIf { left, right } => Encoded::object(
                "NullIfExpression",
                vec![("left", left.serialize()), ("right", right.serialize())],
            ),
            Expr::Concat(args) => {
                Encoded::object("ConcatExpression", vec![("args", args.serialize())])
            }
            Expr::Replace { expr, from, to } => Encoded::object(
                "ReplaceExpression",
                vec![
                    ("expr", expr.serialize()),
                    ("from", from.serialize()),
                    ("to", to.serialize()),
                ],
            ),
            Expr::Between {
                expr,
                low,
                high,
                negated,
            } => Encoded::object(
                "BetweenExpression",
                vec![
                    ("expr", expr.serialize()),
                    ("low", low.serialize()),
                    ("high", high.serialize()),
                    ("negated", negated.serialize()),
                ],
            ),
            Expr::Like {
                expr,
                pattern,
                negated,
            } => Encoded::object(
                "LikeExpression",
                vec![
                    ("expr", expr.serialize()),
                    ("pattern", pattern.serialize()),
                    ("negated", negated.serialize()),
                ],
            ),
            Expr::InList {
                expr,
                list,
                negated,
            } => Encoded::object(
                "InExpression",
                vec![
                    ("expr", expr.serialize()),
                    ("list", list.serialize()),
                    ("negated", negated.serialize()),
                ],
            ),
            Expr::IsNull { expr, negated } => Encoded::object(
                "NullCheck",
                vec![("expr", expr.serialize()), ("negated", negated.serialize())],
            ),
        }
    }
}

const EXPR_CLASSES: &[(&str, Constructor<Expr>)] = &[
    ("ColumnRef", |f: &mut Fields| {
        Ok(Expr::Column(ColumnRef {
            table: f.take("table")?,
            name: f.take("name")?,
        }))
    }),
    ("Literal", |f: &mut Fields| Ok(Expr::Literal(f.take("value")?))),
    ("BinaryOperation", |f: &mut Fields| {
        Ok(Expr::Binary {
            left: f.take("left")?,
            op: f.take("op")?,
            right: f.take("right")?,
        })
    }),
    ("Negation", |f: &mut Fields| Ok(Expr::Negate(f.take("expr")?))),
    ("Comparison", |f: &mut Fields| {
        Ok(Expr::Comparison {
            left: f.take("left")?,
            op: f.take("op")?,
            right: f.take("right")?,
        })
    }),
    ("LogicalCondition", |f: &mut Fields| {
        Ok(Expr::Logical {
            left: f.take("left")?,
            op: f.take("op")?,
            right: f.take("right")?,
        })
    }),
    ("NotCondition", |f: &mut Fields| Ok(Expr::Not(f.take("expr")?))),
    ("AggregateFunction", |f: &mut Fields| {
        Ok(Expr::Aggregate {
            func: f.take("func")?,
            arg: f.take("arg")?,
            distinct: f.take("distinct")?,
        })
    }),
    ("ScalarFunction", |f: &mut Fields| {
        Ok(Expr::Function {
            func: f.take("func")?,
            args: f.take("args")?,
        })
    }),
    ("CaseExpression", |f: &mut Fields| {
        Ok(Expr::Case {
            operand: f.take("operand")?,
            branches: f.take("branches")?,
            else_result: f.take("else_result")?,
        })
    }),
    ("CastExpression", |f: &mut Fields| {
        Ok(Expr::Cast {
            expr: f.take("expr")?,
            data_type: f.take("data_type")?,
        })
    }),
    ("ExtractExpression", |f: &mut Fields| {
        Ok(Expr::Extract {
            field: f.take("field")?,
            expr: f.take("expr")?,
        })
    }),
    ("CoalesceExpression", |f: &mut Fields| Ok(Expr::Coalesce(f.take("args")?))),
    ("NullIfExpression", |f: &mut Fields| {
        Ok(Expr::NullIf {
            left: f.take("left")?,
            right: f.take("right")?,
        })
    }),
    ("ConcatExpression", |f: &mut Fields| Ok(Expr::Concat(f.take("args")?))),
    ("ReplaceExpression", |f: &mut Fields| {
        Ok(Expr::Replace {
            expr: f.take("expr")?,
            from: f.take("from")?,
            to: f.take("to")?,
        })
    }),
    ("BetweenExpression", |f: &mut Fields| {
        Ok(Expr::Between {
            expr: f.take("expr")?,
            low: f.take("low")?,
            high: f.take("high")?,
            negated: f.take("negated")?,
        })
    }),
    ("LikeExpression", |f: &mut Fields| {
        Ok(Expr::Like {
            expr: f.take("expr")?,
            pattern: f.take("pattern")?,
            negated: f.take("negated")?,
        })
    }),
    ("InExpression", |f: &mut Fields| {
        Ok(Expr::InList {
            expr: f.take("expr")?,
            list: f.take("list")?,
            negated: f.take("negated")?,
        })
    }),
    ("NullCheck", |f: &mut Fields| {
        Ok(Expr::IsNull {
            expr: f.take("expr")?,
            negated: f.take("negated")?,
        })
    }),
];

impl Decode for Expr {
    fn deserialize(encoded: Encoded) -> Result<Self> {
        rebuild(encoded, "expression", EXPR_CLASSES)
    }
}

impl Encode for WhenClause {
    fn serialize(&self) -> Encoded {
        Encoded::object(
            "WhenClause",
            vec![
                ("condition", self.condition.serialize()),
                ("result", self.result.serialize()),
            ],
        )
    }
}

const WHEN_CLASSES: &[(&str, Constructor<WhenClause>)] = &[("WhenClause", |f: &mut Fields| {
    Ok(WhenClause {
        condition: f.take("condition")?,
        result: f.take("result")?,
    })
})];

impl Decode for WhenClause {
    fn deserialize(encoded: Encoded) -> Result<Self> {
        rebuild(encoded, "when clause", WHEN_CLASSES)
    }
}

impl Encode for Select {
    fn serialize(&self) -> Encoded {
        Encoded::object(
            "SelectQuery",
            vec![
                ("ctes", self.ctes.serialize()),
                ("distinct", self.distinct.serialize()),
                ("columns", self.columns.serialize()),
                ("from", self.from.serialize()),
                ("where_clause", self.where_clause.serialize()),
                ("group_by", self.group_by.serialize()),
                ("having", self.having.serialize()),
                ("order_by", self.order_by.serialize()),
                ("limit", self.limit.serialize()),
                ("offset", self.offset.serialize()),
            ],
        )
    }
}

const SELECT_CLASSES: &[(&str, Constructor<Select>)] = &[("SelectQuery", |f: &mut Fields| {
    Ok(Select {
        ctes: f.take("ctes")?,
        distinct: f.take("distinct")?,
        columns: f.take("columns")?,
        from: f.take("from")?,
        where_clause: f.take("where_clause")?,
        group_by: f.take("group_by")?,
        having: f.take("having")?,
        order_by: f.take("order_by")?,
        limit: f.take("limit")?,
        offset: f.take("offset")?,
    })
})];

impl Decode for Select {
    fn deserialize(encoded: Encoded) -> Result<Self> {
        rebuild(encoded, "query", SELECT_CLASSES)
    }
}

impl Encode for SelectItem {
    fn serialize(&self) -> Encoded {
        match self {
            SelectItem::Wildcard => Encoded::object("Wildcard", Vec::new()),
            SelectItem::QualifiedWildcard(table) => {
                Encoded::object("QualifiedWildcard", vec![("table", table.serialize())])
            }
            SelectItem::Expr { expr, alias } => Encoded::object(
                "SelectColumn",
                vec![("expr", expr.serialize()), ("alias", alias.serialize())],
            ),
        }
    }
}

const SELECT_ITEM_CLASSES: &[(&str, Constructor<SelectItem>)] = &[
    ("Wildcard", |_: &mut Fields| Ok(SelectItem::Wildcard)),
    ("QualifiedWildcard", |f: &mut Fields| {
        Ok(SelectItem::QualifiedWildcard(f.take("table")?))
    }),
    ("SelectColumn", |f: &mut Fields| {
        Ok(SelectItem::Expr {
            expr: f.take("expr")?,
            alias: f.take("alias")?,
        })
    }),
];

impl Decode for SelectItem {
    fn deserialize(encoded: Encoded) -> Result<Self> {
        rebuild(encoded, "projection", SELECT_ITEM_CLASSES)
    }
}

impl Encode for TableRef {
    fn serialize(&self) -> Encoded {
        match self {
            TableRef::Named { name, alias } => Encoded::object(
                "TableReference",
                vec![("name", name.serialize()), ("alias", alias.serialize())],
            ),
            TableRef::Subquery { query, alias } => Encoded::object(
                "SubqueryReference",
                vec![("query", query.serialize()), ("alias", alias.serialize())],
            ),
        }
    }
}

const TABLE_REF_CLASSES: &[(&str, Constructor<TableRef>)] = &[
    ("TableReference", |f: &mut Fields| {
        Ok(TableRef::Named {
            name: f.take("name")?,
            alias: f.take("alias")?,
        })
    }),
    ("SubqueryReference", |f: &mut Fields| {
        Ok(TableRef::Subquery {
            query: f.take("query")?,
            alias: f.take("alias")?,
        })
    }),
];

impl Decode for TableRef {
    fn deserialize(encoded: Encoded) -> Result<Self> {
        rebuild(encoded, "source", TABLE_REF_CLASSES)
    }
}

impl Encode for OrderByClause {
    fn serialize(&self) -> Encoded {
        Encoded::object(
            "OrderByClause",
            vec![
                ("expr", self.expr.serialize()),
                ("direction", self.direction.serialize()),
            ],
        )
    }
}

const ORDER_BY_CLASSES: &[(&str, Constructor<OrderByClause>)] = &[("OrderByClause", |f: &mut Fields| {
    Ok(OrderByClause {
        expr: f.take("expr")?,
        direction: f.take("direction")?,
    })
})];

impl Decode for OrderByClause {
    fn deserialize(encoded: Encoded) -> Result<Self> {
        rebuild(encoded, "ordering", ORDER_BY_CLASSES)
    }
}

impl Encode for Cte {
    fn serialize(&self) -> Encoded {
        Encoded::object(
            "CommonTableExpression",
            vec![
                ("name", self.name.serialize()),
                ("query", self.query.serialize()),
            ],
        )
    }
}

const CTE_CLASSES: &[(&str, Constructor<Cte>)] = &[("CommonTableExpression", |f: &mut Fields| {
    Ok(Cte {
        name: f.take("name")?,
        query: f.take("query")?,
    })
})];

impl Decode for Cte {
    fn deserialize(encoded: Encoded) -> Result<Self> {
        rebuild(encoded, "common table expression", CTE_CLASSES)
    }
}

// --- tables and databases ---

fn section(entries: &mut BTreeMap<String, Encoded>, table: &str, key: &str) -> Result<Encoded> {
    entries
        .remove(key)
        .ok_or_else(|| Error::Storage(format!("table {table} has no {key} section")))
}

/// A table record: `schema` (ordered `[name, type]` pairs), `defaults`,
/// `auto` (SERIAL counters), `constraints`, `restrictions` (CHECKs) and
/// `rows`.
impl Encode for Table {
    fn serialize(&self) -> Encoded {
        let columns = &self.schema.columns;
        let schema = columns
            .iter()
            .map(|c| Encoded::Seq(vec![c.name.serialize(), c.data_type.serialize()]))
            .collect();
        let defaults: BTreeMap<String, Expr> = columns
            .iter()
            .filter_map(|c| Some((c.name.clone(), c.default.clone()?)))
            .collect();
        let restrictions: BTreeMap<String, Expr> = columns
            .iter()
            .filter_map(|c| Some((c.name.clone(), c.check.clone()?)))
            .collect();
        let constraints: BTreeMap<String, Vec<Constraint>> = columns
            .iter()
            .filter(|c| !c.constraints.is_empty())
            .map(|c| (c.name.clone(), c.constraints.clone()))
            .collect();
        let auto: BTreeMap<String, i64> = self
            .sequences()
            .map(|(name, seq)| (name.clone(), seq.peek()))
            .collect();

        let mut record = BTreeMap::new();
        record.insert("schema".to_string(), Encoded::Seq(schema));
        record.insert("defaults".to_string(), defaults.serialize());
        record.insert("auto".to_string(), auto.serialize());
        record.insert("constraints".to_string(), constraints.serialize());
        record.insert("restrictions".to_string(), restrictions.serialize());
        record.insert("rows".to_string(), self.rows().serialize());
        Encoded::Map(record)
    }
}

/// Rebuilds a table. Row values are re-parsed through their column types and
/// SERIAL counters are recomputed from the stored rows.
pub fn decode_table(name: &str, encoded: Encoded) -> Result<Table> {
    let mut entries = match encoded {
        Encoded::Map(entries) => entries,
        other => return Err(mismatch("table map", &other)),
    };
    let schema: Vec<Vec<Encoded>> = Vec::deserialize(section(&mut entries, name, "schema")?)?;
    let mut defaults: BTreeMap<String, Expr> =
        BTreeMap::deserialize(section(&mut entries, name, "defaults")?)?;
    let mut restrictions: BTreeMap<String, Expr> =
        BTreeMap::deserialize(section(&mut entries, name, "restrictions")?)?;
    let mut constraints: BTreeMap<String, Vec<Constraint>> =
        BTreeMap::deserialize(section(&mut entries, name, "constraints")?)?;
    let auto: BTreeMap<String, i64> = BTreeMap::deserialize(section(&mut entries, name, "auto")?)?;
    let rows: Vec<Vec<Value>> = Vec::deserialize(section(&mut entries, name, "rows")?)?;

    let columns = schema
        .into_iter()
        .map(|pair| {
            let [column, data_type]: [Encoded; 2] = pair
                .try_into()
                .map_err(|_| Error::Storage(format!("malformed schema entry in table {name}")))?;
            let column = String::deserialize(column)?;
            Ok(ColumnDef {
                data_type: DataType::deserialize(data_type)?,
                default: defaults.remove(&column),
                constraints: constraints.remove(&column).unwrap_or_default(),
                check: restrictions.remove(&column),
                name: column,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let mut table = Table::new(name.to_string(), Schema::new(columns));
    for row in rows {
        if row.len() != table.schema.len() {
            return Err(Error::Storage(format!(
                "row of {} values does not match the {} columns of {name}",
                row.len(),
                table.schema.len()
            )));
        }
        let values = row
            .iter()
            .zip(&table.schema.columns)
            .map(|(value, def)| def.data_type.parse(value))
            .collect::<Result<Vec<_>>>()?;
        table.insert(values)?;
    }
    let persisted: HashMap<String, i64> = auto.into_iter().collect();
    table.restore_sequences(&persisted);
    Ok(table)
}

/// A database record: one entry per table plus the views under `__views__`.
impl Encode for Database {
    fn serialize(&self) -> Encoded {
        let mut record: BTreeMap<String, Encoded> = self
            .tables()
            .map(|t| (t.name.clone(), t.serialize()))
            .collect();
        let views: BTreeMap<String, Encoded> = self
            .views()
            .map(|(name, query)| (name.clone(), query.serialize()))
            .collect();
        record.insert(VIEWS_KEY.to_string(), Encoded::Map(views));
        Encoded::Map(record)
    }
}

impl Decode for Database {
    fn deserialize(encoded: Encoded) -> Result<Self> {
        let mut entries = match encoded {
            Encoded::Map(entries) => entries,
            other => return Err(mismatch("database map", &other)),
        };
        let views: BTreeMap<String, Select> = match entries.remove(VIEWS_KEY) {
            Some(views) => BTreeMap::deserialize(views)?,
            None => BTreeMap::new(),
        };
        let mut db = Database::new();
        for (name, table) in entries {
            db.insert_table(decode_table(&name, table)?);
        }
        for (name, query) in views {
            db.set_view(name, query);
        }
        Ok(db)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Statement;
    use crate::parser::parse_statement;

    fn query(sql: &str) -> Select {
        match parse_statement(sql).unwrap() {
            Statement::Select(select) => *select,
            other => panic!("expected a query, got {other:?}"),
        }
    }

    fn through_bytes<T: Encode + Decode>(value: &T) -> T {
        let bytes = to_bytes(&value.serialize()).unwrap();
        T::deserialize(from_bytes(&bytes).unwrap()).unwrap()
    }

    #[test]
    fn test_markers() {
        let date = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        assert_eq!(
            Value::Date(date).serialize(),
            Encoded::DateTime {
                subkind: "date".into(),
                iso8601: "2024-02-29".into()
            }
        );
        assert!(matches!(
            DataType::Varchar.serialize(),
            Encoded::TypeReference { ref name, .. } if name == "VARCHAR"
        ));
        assert_eq!(ComparisonOp::GtEq.serialize(), Encoded::fallback(">="));
        assert!(matches!(
            Expr::column("a").serialize(),
            Encoded::AstObject { ref class_name, .. } if class_name == "ColumnRef"
        ));
    }

    #[test]
    fn test_view_query_survives_bytes() {
        let select = query(
            "WITH recent AS (SELECT * FROM orders WHERE day >= '2024-01-01')
             SELECT DISTINCT r.item, COUNT(*) AS n, SUM(qty * 2) AS doubled,
                    CASE WHEN SUM(qty) > 10 THEN 'bulk' ELSE 'small' END AS size,
                    UPPER(TRIM(r.item)), EXTRACT(YEAR FROM r.day), CAST(r.qty AS FLOAT)
             FROM recent r, (SELECT code FROM items) i
             WHERE r.item = i.code AND r.qty BETWEEN 1 AND 9 AND r.note NOT LIKE '%x%'
                   AND r.tag IN ('a', 'b') AND r.gone IS NOT NULL
             GROUP BY r.item HAVING COUNT(*) > 1
             ORDER BY n DESC, r.item LIMIT 5 OFFSET 2",
        );
        assert_eq!(through_bytes(&select), select);
    }

    #[test]
    fn test_values_survive_bytes() {
        let values = vec![
            Value::Null,
            Value::Int(-7),
            Value::Float(2.5),
            Value::Bool(false),
            Value::Char('q'),
            Value::text("quartz"),
            DataType::Time.parse(&Value::text("23:59:01")).unwrap(),
            DataType::Timestamp
                .parse(&Value::text("2024-05-06 07:08:09"))
                .unwrap(),
        ];
        assert_eq!(through_bytes(&values), values);
    }

    #[test]
    fn test_unknown_class_is_a_storage_error() {
        let forged = Encoded::object("DropEverything", Vec::new());
        assert!(matches!(Expr::deserialize(forged), Err(Error::Storage(_))));

        let missing = Encoded::object("Negation", Vec::new());
        assert!(matches!(Expr::deserialize(missing), Err(Error::Storage(_))));

        assert!(matches!(
            ComparisonOp::deserialize(Encoded::fallback("<=>")),
            Err(Error::Storage(_))
        ));
    }

    #[test]
    fn test_database_round_trip() {
        let mut db = Database::new();
        db.execute_script(
            "CREATE TABLE items (
                id SERIAL PRIMARY KEY,
                code CHAR NOT NULL,
                price FLOAT DEFAULT 1.5 CHECK (price > 0),
                added DATE
             );
             INSERT INTO items (code, added) VALUES ('a', '2024-01-02'), ('b', NULL);
             INSERT INTO items (id, code) VALUES (10, 'c');
             CREATE VIEW cheap AS SELECT code FROM items WHERE price < 2;",
        )
        .unwrap();

        let restored = through_bytes(&db);
        let items = restored.get_table("items").unwrap();
        let original = db.get_table("items").unwrap();
        assert_eq!(items.schema, original.schema);
        assert_eq!(items.rows(), original.rows());
        assert_eq!(items.sequence("id").unwrap().peek(), 11);
        assert_eq!(restored.view("cheap"), db.view("cheap"));
        assert_eq!(restored.query("SELECT * FROM cheap").unwrap().rows.len(), 3);
    }

    #[test]
    fn test_stale_counter_is_recomputed() {
        let mut db = Database::new();
        db.execute("CREATE TABLE t (id SERIAL)").unwrap();
        db.execute("INSERT INTO t VALUES (5)").unwrap();
        let Encoded::Map(mut record) = db.serialize() else {
            panic!("database encodes as a map");
        };
        let Some(Encoded::Map(table)) = record.get_mut("t") else {
            panic!("table record missing");
        };
        table.insert("auto".into(), BTreeMap::from([("id".to_string(), 1i64)]).serialize());

        let restored = Database::deserialize(Encoded::Map(record)).unwrap();
        assert_eq!(restored.get_table("t").unwrap().sequence("id").unwrap().peek(), 6);
    }
}
