//! Expression evaluation against rows and groups.

use crate::ast::{ColumnRef, ComparisonOp, Expr, LogicalOp};
use crate::data_type::DataType;
use crate::error::{Error, Result};
use crate::functions;
use crate::table::Schema;
use crate::value::Value;

/// One column of an intermediate relation.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    /// Table name or alias the column can be qualified with.
    pub qualifier: Option<String>,
    pub name: String,
    /// `None` when the type is unknown, e.g. an all-NULL derived column.
    pub data_type: Option<DataType>,
}

/// Column layout of the rows flowing through a query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowSchema {
    pub fields: Vec<Field>,
}

impl RowSchema {
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    pub fn from_table(schema: &Schema, qualifier: &str) -> Self {
        let fields = schema
            .columns
            .iter()
            .map(|c| Field {
                qualifier: Some(qualifier.to_string()),
                name: c.name.clone(),
                data_type: Some(c.data_type),
            })
            .collect();
        Self { fields }
    }

    /// Appends the fields of `other`, as for a cross product.
    pub fn join(mut self, other: RowSchema) -> Self {
        self.fields.extend(other.fields);
        self
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Index of the field a reference points to.
    ///
    /// # Errors
    /// [Error::ColumnNotFound] when nothing matches, [Error::AmbiguousColumn]
    /// when an unqualified name matches several sources.
    pub fn resolve(&self, column: &ColumnRef) -> Result<usize> {
        let mut matches = self.fields.iter().enumerate().filter(|(_, f)| {
            f.name == column.name
                && column
                    .table
                    .as_ref()
                    .is_none_or(|t| f.qualifier.as_ref() == Some(t))
        });
        match (matches.next(), matches.next()) {
            (Some((idx, _)), None) => Ok(idx),
            (None, _) => Err(Error::ColumnNotFound(column.to_string())),
            (Some(_), Some(_)) => Err(Error::AmbiguousColumn(column.to_string())),
        }
    }

    pub fn type_of(&self, column: &ColumnRef) -> Option<DataType> {
        self.resolve(column)
            .ok()
            .and_then(|idx| self.fields[idx].data_type)
    }
}

/// What an expression is evaluated against.
#[derive(Debug, Clone, Copy)]
pub enum Scope<'a> {
    /// No columns, e.g. INSERT values and defaults.
    Empty,
    Row {
        schema: &'a RowSchema,
        row: &'a [Value],
    },
    /// The rows of one group; plain columns read the first row.
    Group {
        schema: &'a RowSchema,
        rows: &'a [&'a [Value]],
    },
}

impl Scope<'_> {
    fn schema(&self) -> Option<&RowSchema> {
        match self {
            Scope::Empty => None,
            Scope::Row { schema, .. } | Scope::Group { schema, .. } => Some(*schema),
        }
    }

    fn column(&self, column: &ColumnRef) -> Result<Value> {
        match self {
            Scope::Empty => Err(Error::ColumnNotFound(column.to_string())),
            Scope::Row { schema, row } => Ok(row[schema.resolve(column)?].clone()),
            Scope::Group { schema, rows } => {
                let idx = schema.resolve(column)?;
                Ok(rows.first().map(|r| r[idx].clone()).unwrap_or(Value::Null))
            }
        }
    }

    fn type_of(&self, expr: &Expr) -> Option<DataType> {
        match expr {
            Expr::Column(c) => self.schema()?.type_of(c),
            _ => None,
        }
    }
}

pub trait Evaluate {
    fn evaluate(&self, scope: &Scope<'_>) -> Result<Value>;

    /// Whether the expression is true. `NULL` counts as not true.
    fn holds(&self, scope: &Scope<'_>) -> Result<bool> {
        Ok(self.evaluate(scope)?.truth()? == Some(true))
    }
}

impl Evaluate for Expr {
    fn evaluate(&self, scope: &Scope<'_>) -> Result<Value> {
        match self {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Column(column) => scope.column(column),
            Expr::Binary { left, op, right } => left
                .evaluate(scope)?
                .arithmetic(*op, &right.evaluate(scope)?),
            Expr::Negate(inner) => inner.evaluate(scope)?.negate(),
            Expr::Comparison { left, op, right } => {
                let (l, r) = coerced_pair(left, right, scope)?;
                compare(&l, *op, &r)
            }
            Expr::Logical { left, op, right } => logical(left, *op, right, scope),
            Expr::Not(inner) => Ok(match inner.evaluate(scope)?.truth()? {
                Some(b) => Value::Bool(!b),
                None => Value::Null,
            }),
            Expr::Aggregate {
                func,
                arg,
                distinct,
            } => {
                let Scope::Group { schema, rows } = scope else {
                    return Err(Error::InvalidOperation(format!(
                        "aggregate {self} is not allowed here"
                    )));
                };
                let Some(arg) = arg else {
                    return Ok(Value::Int(rows.len() as i64));
                };
                let values = rows
                    .iter()
                    .map(|row| arg.evaluate(&Scope::Row { schema, row }))
                    .collect::<Result<Vec<_>>>()?;
                functions::aggregate(*func, values, *distinct)
            }
            Expr::Function { func, args } => {
                let values = evaluate_all(args, scope)?;
                functions::call_scalar(*func, &values)
            }
            Expr::Case {
                operand,
                branches,
                else_result,
            } => {
                let operand = operand.as_ref().map(|o| o.evaluate(scope)).transpose()?;
                for branch in branches {
                    let taken = match &operand {
                        Some(value) => {
                            value.sql_eq(&branch.condition.evaluate(scope)?)? == Some(true)
                        }
                        None => branch.condition.holds(scope)?,
                    };
                    if taken {
                        return branch.result.evaluate(scope);
                    }
                }
                match else_result {
                    Some(e) => e.evaluate(scope),
                    None => Ok(Value::Null),
                }
            }
            Expr::Cast { expr, data_type } => data_type.parse(&expr.evaluate(scope)?),
            Expr::Extract { field, expr } => functions::extract(*field, &expr.evaluate(scope)?),
            Expr::Coalesce(args) => {
                for arg in args {
                    let value = arg.evaluate(scope)?;
                    if !value.is_null() {
                        return Ok(value);
                    }
                }
                Ok(Value::Null)
            }
            Expr::NullIf { left, right } => {
                let (l, r) = coerced_pair(left, right, scope)?;
                if l.sql_eq(&r)? == Some(true) {
                    Ok(Value::Null)
                } else {
                    Ok(l)
                }
            }
            Expr::Concat(args) => {
                let joined: String = evaluate_all(args, scope)?
                    .iter()
                    .filter(|v| !v.is_null())
                    .map(|v| v.to_string())
                    .collect();
                Ok(Value::text(joined))
            }
            Expr::Replace { expr, from, to } => {
                let values = [expr.evaluate(scope)?, from.evaluate(scope)?, to.evaluate(scope)?];
                if values.iter().any(Value::is_null) {
                    return Ok(Value::Null);
                }
                let [text, from, to] = values.map(|v| v.to_string());
                Ok(Value::text(text.replace(&from, &to)))
            }
            Expr::Between {
                expr,
                low,
                high,
                negated,
            } => {
                let value = expr.evaluate(scope)?;
                let low = coerce_to(scope.type_of(expr), low, scope)?;
                let high = coerce_to(scope.type_of(expr), high, scope)?;
                let above = compare(&value, ComparisonOp::GtEq, &low)?;
                let below = compare(&value, ComparisonOp::LtEq, &high)?;
                let inside = and(above.truth()?, below.truth()?);
                Ok(negate_if(inside, *negated))
            }
            Expr::Like {
                expr,
                pattern,
                negated,
            } => {
                let value = expr.evaluate(scope)?;
                let pattern = pattern.evaluate(scope)?;
                if value.is_null() || pattern.is_null() {
                    return Ok(Value::Null);
                }
                let matched = functions::like_match(&value.to_string(), &pattern.to_string())?;
                Ok(Value::Bool(matched != *negated))
            }
            Expr::InList {
                expr,
                list,
                negated,
            } => {
                let value = expr.evaluate(scope)?;
                if value.is_null() {
                    return Ok(Value::Null);
                }
                let target = scope.type_of(expr);
                let mut saw_null = false;
                for item in list {
                    let candidate = coerce_to(target, item, scope)?;
                    match value.sql_eq(&candidate)? {
                        Some(true) => return Ok(Value::Bool(!*negated)),
                        Some(false) => {}
                        None => saw_null = true,
                    }
                }
                let found = if saw_null { None } else { Some(false) };
                Ok(negate_if(found, *negated))
            }
            Expr::IsNull { expr, negated } => {
                Ok(Value::Bool(expr.evaluate(scope)?.is_null() != *negated))
            }
        }
    }
}

fn evaluate_all(args: &[Expr], scope: &Scope<'_>) -> Result<Vec<Value>> {
    args.iter().map(|a| a.evaluate(scope)).collect()
}

/// Evaluates `expr`; literals are converted to `target` so that
/// `age = '30'` compares as integers and `day > '2024-01-01'` as dates.
fn coerce_to(target: Option<DataType>, expr: &Expr, scope: &Scope<'_>) -> Result<Value> {
    let value = expr.evaluate(scope)?;
    let (Some(target), Expr::Literal(_)) = (target, expr) else {
        return Ok(value);
    };
    match value {
        Value::Null => Ok(value),
        // numbers already compare across INT and FLOAT
        Value::Int(_) | Value::Float(_) if target.is_numeric() => Ok(value),
        _ => target.parse(&value),
    }
}

fn coerced_pair(left: &Expr, right: &Expr, scope: &Scope<'_>) -> Result<(Value, Value)> {
    let l = coerce_to(scope.type_of(right), left, scope)?;
    let r = coerce_to(scope.type_of(left), right, scope)?;
    Ok((l, r))
}

fn compare(left: &Value, op: ComparisonOp, right: &Value) -> Result<Value> {
    if left.is_null() || right.is_null() {
        return Ok(Value::Null);
    }
    let result = match op {
        ComparisonOp::Eq => left.sql_eq(right)?,
        ComparisonOp::NotEq => left.sql_eq(right)?.map(|eq| !eq),
        _ => {
            let ord = left.sql_cmp(right).ok_or_else(|| {
                Error::DataType(format!(
                    "cannot compare {} with {}",
                    left.type_name(),
                    right.type_name()
                ))
            })?;
            Some(match op {
                ComparisonOp::Lt => ord.is_lt(),
                ComparisonOp::LtEq => ord.is_le(),
                ComparisonOp::Gt => ord.is_gt(),
                _ => ord.is_ge(),
            })
        }
    };
    Ok(result.map(Value::Bool).unwrap_or(Value::Null))
}

fn and(left: Option<bool>, right: Option<bool>) -> Option<bool> {
    match (left, right) {
        (Some(false), _) | (_, Some(false)) => Some(false),
        (Some(true), Some(true)) => Some(true),
        _ => None,
    }
}

fn or(left: Option<bool>, right: Option<bool>) -> Option<bool> {
    match (left, right) {
        (Some(true), _) | (_, Some(true)) => Some(true),
        (Some(false), Some(false)) => Some(false),
        _ => None,
    }
}

fn negate_if(value: Option<bool>, negated: bool) -> Value {
    match value {
        Some(b) => Value::Bool(b != negated),
        None => Value::Null,
    }
}

/// Three-valued AND / OR with short-circuit on the left operand.
fn logical(left: &Expr, op: LogicalOp, right: &Expr, scope: &Scope<'_>) -> Result<Value> {
    let l = left.evaluate(scope)?.truth()?;
    let result = match (op, l) {
        (LogicalOp::And, Some(false)) => Some(false),
        (LogicalOp::Or, Some(true)) => Some(true),
        (LogicalOp::And, _) => and(l, right.evaluate(scope)?.truth()?),
        (LogicalOp::Or, _) => or(l, right.evaluate(scope)?.truth()?),
    };
    Ok(negate_if(result, false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_statement;
    use crate::ast::{SelectItem, Statement};
    use crate::table::ColumnDef;

    fn parse_expr(sql: &str) -> Expr {
        let Statement::Select(select) = parse_statement(&format!("SELECT {sql}")).unwrap() else {
            panic!("expected SELECT");
        };
        match select.columns.into_iter().next() {
            Some(SelectItem::Expr { expr, .. }) => expr,
            other => panic!("unexpected projection {other:?}"),
        }
    }

    fn people() -> RowSchema {
        let schema = Schema::new(vec![
            ColumnDef::new("name", DataType::Varchar),
            ColumnDef::new("age", DataType::Int),
            ColumnDef::new("born", DataType::Date),
        ]);
        RowSchema::from_table(&schema, "p")
    }

    fn eval_row(sql: &str, row: &[Value]) -> Result<Value> {
        let schema = people();
        parse_expr(sql).evaluate(&Scope::Row { schema: &schema, row })
    }

    fn alice() -> Vec<Value> {
        vec![
            Value::text("Alice"),
            Value::Int(30),
            DataType::Date.parse(&Value::text("1994-05-01")).unwrap(),
        ]
    }

    #[test]
    fn test_literal_arithmetic() {
        let value = parse_expr("2 + 3 * 4").evaluate(&Scope::Empty).unwrap();
        assert_eq!(value, Value::Int(14));
        assert!(parse_expr("1 / 0").evaluate(&Scope::Empty).is_err());
    }

    #[test]
    fn test_literals_coerce_to_column_type() {
        let row = alice();
        assert_eq!(eval_row("age = '30'", &row).unwrap(), Value::Bool(true));
        assert_eq!(eval_row("born > '1990-01-01'", &row).unwrap(), Value::Bool(true));
        assert_eq!(eval_row("age > 29.5", &row).unwrap(), Value::Bool(true));
        assert!(eval_row("age = 'thirty'", &row).is_err());
    }

    #[test]
    fn test_string_equality_ignores_case() {
        let row = alice();
        assert_eq!(eval_row("name = 'ALICE'", &row).unwrap(), Value::Bool(true));
        assert_eq!(eval_row("name != 'alice'", &row).unwrap(), Value::Bool(false));
        assert_eq!(eval_row("name LIKE 'al%'", &row).unwrap(), Value::Bool(false));
    }

    #[test]
    fn test_three_valued_logic() {
        let row = vec![Value::text("Bob"), Value::Null, Value::Null];
        assert_eq!(eval_row("age > 1", &row).unwrap(), Value::Null);
        assert_eq!(eval_row("age > 1 AND name = 'x'", &row).unwrap(), Value::Bool(false));
        assert_eq!(eval_row("age > 1 OR name = 'bob'", &row).unwrap(), Value::Bool(true));
        assert_eq!(eval_row("NOT age > 1", &row).unwrap(), Value::Null);
        assert_eq!(eval_row("age IS NULL", &row).unwrap(), Value::Bool(true));
        assert_eq!(eval_row("age IN (1, 2)", &row).unwrap(), Value::Null);
        assert_eq!(eval_row("name IN ('x', NULL)", &row).unwrap(), Value::Null);
        assert_eq!(eval_row("name IN ('x', 'BOB')", &row).unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_between_and_case() {
        let row = alice();
        assert_eq!(eval_row("age BETWEEN 18 AND 30", &row).unwrap(), Value::Bool(true));
        assert_eq!(eval_row("age NOT BETWEEN 18 AND 30", &row).unwrap(), Value::Bool(false));
        assert_eq!(
            eval_row("CASE WHEN age < 18 THEN 'minor' ELSE 'adult' END", &row).unwrap(),
            Value::text("adult")
        );
        assert_eq!(
            eval_row("CASE age WHEN 30 THEN 'thirty' END", &row).unwrap(),
            Value::text("thirty")
        );
    }

    #[test]
    fn test_null_helpers() {
        let row = vec![Value::Null, Value::Int(0), Value::Null];
        assert_eq!(eval_row("COALESCE(name, 'n/a')", &row).unwrap(), Value::text("n/a"));
        assert_eq!(eval_row("NULLIF(age, 0)", &row).unwrap(), Value::Null);
        assert_eq!(
            eval_row("CONCAT('a', name, 'b')", &row).unwrap(),
            Value::text("ab")
        );
        assert_eq!(eval_row("REPLACE(name, 'a', 'b')", &row).unwrap(), Value::Null);
    }

    #[test]
    fn test_qualified_and_unknown_columns() {
        let row = alice();
        assert_eq!(eval_row("p.age", &row).unwrap(), Value::Int(30));
        assert!(matches!(eval_row("q.age", &row), Err(Error::ColumnNotFound(_))));
        assert!(matches!(eval_row("salary", &row), Err(Error::ColumnNotFound(_))));
    }

    #[test]
    fn test_ambiguous_column() {
        let schema = people().join(people());
        let row: Vec<Value> = alice().into_iter().chain(alice()).collect();
        let err = parse_expr("age")
            .evaluate(&Scope::Row { schema: &schema, row: &row })
            .unwrap_err();
        assert!(matches!(err, Error::AmbiguousColumn(_)));
    }

    #[test]
    fn test_aggregates_need_a_group() {
        let schema = people();
        let a = alice();
        let b = vec![Value::text("Bob"), Value::Int(40), Value::Null];
        let rows: Vec<&[Value]> = vec![a.as_slice(), b.as_slice()];
        let group = Scope::Group { schema: &schema, rows: &rows };

        assert_eq!(parse_expr("SUM(age)").evaluate(&group).unwrap(), Value::Int(70));
        assert_eq!(parse_expr("COUNT(born)").evaluate(&group).unwrap(), Value::Int(1));
        assert_eq!(parse_expr("COUNT(*)").evaluate(&group).unwrap(), Value::Int(2));
        assert_eq!(parse_expr("MAX(age) - MIN(age)").evaluate(&group).unwrap(), Value::Int(10));
        assert!(eval_row("SUM(age)", &a).is_err());
    }

    #[test]
    fn test_cast_and_extract() {
        let row = alice();
        assert_eq!(eval_row("CAST(age AS VARCHAR)", &row).unwrap(), Value::text("30"));
        assert_eq!(eval_row("EXTRACT(YEAR FROM born)", &row).unwrap(), Value::Int(1994));
        assert!(eval_row("CAST(name AS INT)", &row).is_err());
    }
}
