use std::fmt;
use std::str::FromStr;

use crate::data_type::DataType;
use crate::error::Error;
use crate::table::ColumnDef;
use crate::value::Value;

pub use crate::value::ArithmeticOp;

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Select(Box<Select>),
    Insert(Insert),
    Update(Update),
    Delete(Delete),
    CreateDatabase(String),
    CreateTable(CreateTable),
    CreateTableAs(CreateTableAs),
    CreateView(CreateView),
    RefreshMaterializedView(String),
    Drop(Drop),
    AlterTable(AlterTable),
    Truncate(String),
    Use(String),
    Call(Call),
}

impl Statement {
    /// Whether executing the statement can change stored state.
    pub fn is_mutating(&self) -> bool {
        !matches!(self, Self::Select(_) | Self::Call(_))
    }
}

// --- Queries ---

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Select {
    pub ctes: Vec<Cte>,
    pub distinct: bool,
    pub columns: Vec<SelectItem>,
    /// Comma separated sources, combined as a cross product.
    pub from: Vec<TableRef>,
    pub where_clause: Option<Expr>,
    pub group_by: Vec<Expr>,
    pub having: Option<Expr>,
    pub order_by: Vec<OrderByClause>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl Select {
    /// Names of stored tables and views the query reads, CTE names excluded.
    pub fn referenced_tables(&self) -> Vec<String> {
        let mut names = Vec::new();
        self.collect_tables(&mut Vec::new(), &mut names);
        names
    }

    fn collect_tables(&self, scope: &mut Vec<String>, out: &mut Vec<String>) {
        let depth = scope.len();
        for cte in &self.ctes {
            cte.query.collect_tables(scope, out);
            scope.push(cte.name.clone());
        }
        for source in &self.from {
            match source {
                TableRef::Named { name, .. } => {
                    if !scope.contains(name) && !out.contains(name) {
                        out.push(name.clone());
                    }
                }
                TableRef::Subquery { query, .. } => query.collect_tables(scope, out),
            }
        }
        scope.truncate(depth);
    }

    /// Whether any projected column or the HAVING clause aggregates.
    pub fn has_aggregates(&self) -> bool {
        self.columns.iter().any(|item| match item {
            SelectItem::Expr { expr, .. } => expr.contains_aggregate(),
            _ => false,
        }) || self.having.as_ref().is_some_and(Expr::contains_aggregate)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Cte {
    pub name: String,
    pub query: Box<Select>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SelectItem {
    /// `*`
    Wildcard,
    /// `t.*`
    QualifiedWildcard(String),
    Expr { expr: Expr, alias: Option<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum TableRef {
    Named { name: String, alias: Option<String> },
    Subquery { query: Box<Select>, alias: Option<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderByClause {
    pub expr: Expr,
    pub direction: SortDirection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

// --- Data manipulation ---

#[derive(Debug, Clone, PartialEq)]
pub struct Insert {
    pub table: String,
    pub groups: Vec<ValuesGroup>,
    pub on_conflict: Option<OnConflict>,
    pub returning: Vec<SelectItem>,
}

/// One `[(columns)] VALUES (...), (...)` block of an INSERT.
#[derive(Debug, Clone, PartialEq)]
pub struct ValuesGroup {
    pub columns: Option<Vec<String>>,
    pub rows: Vec<Vec<Expr>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OnConflict {
    /// Empty when no target list was given.
    pub target: Vec<String>,
    pub action: ConflictAction,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConflictAction {
    DoNothing,
    DoUpdate(Vec<Assignment>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub column: String,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    pub table: String,
    pub assignments: Vec<Assignment>,
    pub where_clause: Option<Expr>,
    pub returning: Vec<SelectItem>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Delete {
    pub table: String,
    pub where_clause: Option<Expr>,
    pub returning: Vec<SelectItem>,
}

// --- Definitions ---

#[derive(Debug, Clone, PartialEq)]
pub struct CreateTable {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    pub if_not_exists: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateTableAs {
    pub name: String,
    pub query: Box<Select>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateView {
    pub name: String,
    pub query: Box<Select>,
    pub or_replace: bool,
    pub materialized: bool,
    /// `WITH NO DATA` leaves a materialized view empty until refreshed.
    pub with_data: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Drop {
    pub kind: DropKind,
    pub name: String,
    pub if_exists: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropKind {
    Database,
    Table,
    View,
    MaterializedView,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlterTable {
    pub table: String,
    pub action: AlterAction,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AlterAction {
    AddColumn(ColumnDef),
    DropColumn(String),
    RenameTable(String),
    RenameColumn { from: String, to: String },
}

/// `CALL procedure(args)`
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub procedure: String,
    pub args: Vec<Expr>,
}

// --- Expressions ---

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnRef {
    pub table: Option<String>,
    pub name: String,
}

impl ColumnRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            table: None,
            name: name.into(),
        }
    }

    pub fn qualified(table: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            table: Some(table.into()),
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Column(ColumnRef),
    Literal(Value),
    Binary {
        left: Box<Expr>,
        op: ArithmeticOp,
        right: Box<Expr>,
    },
    Negate(Box<Expr>),
    Comparison {
        left: Box<Expr>,
        op: ComparisonOp,
        right: Box<Expr>,
    },
    Logical {
        left: Box<Expr>,
        op: LogicalOp,
        right: Box<Expr>,
    },
    Not(Box<Expr>),
    /// `arg` is `None` for `COUNT(*)`.
    Aggregate {
        func: AggregateFunc,
        arg: Option<Box<Expr>>,
        distinct: bool,
    },
    Function {
        func: ScalarFunc,
        args: Vec<Expr>,
    },
    /// Searched CASE when `operand` is `None`, simple CASE otherwise.
    Case {
        operand: Option<Box<Expr>>,
        branches: Vec<WhenClause>,
        else_result: Option<Box<Expr>>,
    },
    Cast {
        expr: Box<Expr>,
        data_type: DataType,
    },
    Extract {
        field: DateField,
        expr: Box<Expr>,
    },
    Coalesce(Vec<Expr>),
    NullIf {
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Concat(Vec<Expr>),
    Replace {
        expr: Box<Expr>,
        from: Box<Expr>,
        to: Box<Expr>,
    },
    Between {
        expr: Box<Expr>,
        low: Box<Expr>,
        high: Box<Expr>,
        negated: bool,
    },
    Like {
        expr: Box<Expr>,
        pattern: Box<Expr>,
        negated: bool,
    },
    InList {
        expr: Box<Expr>,
        list: Vec<Expr>,
        negated: bool,
    },
    IsNull {
        expr: Box<Expr>,
        negated: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct WhenClause {
    pub condition: Expr,
    pub result: Expr,
}

impl Expr {
    pub fn column(name: impl Into<String>) -> Self {
        Self::Column(ColumnRef::new(name))
    }

    pub fn literal(value: Value) -> Self {
        Self::Literal(value)
    }

    /// Direct sub-expressions, in source order.
    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Self::Column(_) | Self::Literal(_) => vec![],
            Self::Binary { left, right, .. }
            | Self::Comparison { left, right, .. }
            | Self::Logical { left, right, .. }
            | Self::NullIf { left, right } => vec![&**left, &**right],
            Self::Negate(e) | Self::Not(e) => vec![&**e],
            Self::Aggregate { arg, .. } => arg.iter().map(|a| a.as_ref()).collect(),
            Self::Function { args, .. } | Self::Coalesce(args) | Self::Concat(args) => {
                args.iter().collect()
            }
            Self::Case {
                operand,
                branches,
                else_result,
            } => {
                let mut out: Vec<&Expr> = operand.iter().map(|o| o.as_ref()).collect();
                for branch in branches {
                    out.push(&branch.condition);
                    out.push(&branch.result);
                }
                out.extend(else_result.iter().map(|e| e.as_ref()));
                out
            }
            Self::Cast { expr, .. } | Self::Extract { expr, .. } | Self::IsNull { expr, .. } => {
                vec![&**expr]
            }
            Self::Replace { expr, from, to } => vec![&**expr, &**from, &**to],
            Self::Between {
                expr, low, high, ..
            } => vec![&**expr, &**low, &**high],
            Self::Like { expr, pattern, .. } => vec![&**expr, &**pattern],
            Self::InList { expr, list, .. } => {
                let mut out = vec![&**expr];
                out.extend(list.iter());
                out
            }
        }
    }

    pub fn contains_aggregate(&self) -> bool {
        matches!(self, Self::Aggregate { .. }) || self.children().iter().any(|c| c.contains_aggregate())
    }

    /// Every column reference in the tree.
    pub fn column_refs(&self) -> Vec<&ColumnRef> {
        let mut refs = Vec::new();
        self.collect_refs(&mut refs);
        refs
    }

    fn collect_refs<'a>(&'a self, out: &mut Vec<&'a ColumnRef>) {
        if let Self::Column(c) = self {
            out.push(c);
        }
        for child in self.children() {
            child.collect_refs(out);
        }
    }

    /// Rewrites the tree bottom-up, letting `f` replace any node.
    pub fn transform(&self, f: &dyn Fn(&Expr) -> Option<Expr>) -> Expr {
        if let Some(replaced) = f(self) {
            return replaced;
        }
        let t = |e: &Expr| Box::new(e.transform(f));
        let all = |v: &[Expr]| v.iter().map(|e| e.transform(f)).collect::<Vec<_>>();
        match self {
            Self::Column(_) | Self::Literal(_) => self.clone(),
            Self::Binary { left, op, right } => Self::Binary {
                left: t(left),
                op: *op,
                right: t(right),
            },
            Self::Negate(e) => Self::Negate(t(e)),
            Self::Comparison { left, op, right } => Self::Comparison {
                left: t(left),
                op: *op,
                right: t(right),
            },
            Self::Logical { left, op, right } => Self::Logical {
                left: t(left),
                op: *op,
                right: t(right),
            },
            Self::Not(e) => Self::Not(t(e)),
            Self::Aggregate {
                func,
                arg,
                distinct,
            } => Self::Aggregate {
                func: *func,
                arg: arg.as_ref().map(|a| t(a)),
                distinct: *distinct,
            },
            Self::Function { func, args } => Self::Function {
                func: *func,
                args: all(args),
            },
            Self::Case {
                operand,
                branches,
                else_result,
            } => Self::Case {
                operand: operand.as_ref().map(|o| t(o)),
                branches: branches
                    .iter()
                    .map(|b| WhenClause {
                        condition: b.condition.transform(f),
                        result: b.result.transform(f),
                    })
                    .collect(),
                else_result: else_result.as_ref().map(|e| t(e)),
            },
            Self::Cast { expr, data_type } => Self::Cast {
                expr: t(expr),
                data_type: *data_type,
            },
            Self::Extract { field, expr } => Self::Extract {
                field: *field,
                expr: t(expr),
            },
            Self::Coalesce(args) => Self::Coalesce(all(args)),
            Self::NullIf { left, right } => Self::NullIf {
                left: t(left),
                right: t(right),
            },
            Self::Concat(args) => Self::Concat(all(args)),
            Self::Replace { expr, from, to } => Self::Replace {
                expr: t(expr),
                from: t(from),
                to: t(to),
            },
            Self::Between {
                expr,
                low,
                high,
                negated,
            } => Self::Between {
                expr: t(expr),
                low: t(low),
                high: t(high),
                negated: *negated,
            },
            Self::Like {
                expr,
                pattern,
                negated,
            } => Self::Like {
                expr: t(expr),
                pattern: t(pattern),
                negated: *negated,
            },
            Self::InList {
                expr,
                list,
                negated,
            } => Self::InList {
                expr: t(expr),
                list: all(list),
                negated: *negated,
            },
            Self::IsNull { expr, negated } => Self::IsNull {
                expr: t(expr),
                negated: *negated,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunc {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarFunc {
    Upper,
    Lower,
    Length,
    Trim,
    Ltrim,
    Rtrim,
    Substring,
    Abs,
    Round,
    Ceil,
    Floor,
    Sqrt,
    Power,
    Mod,
    Now,
    CurrentDate,
    CurrentTime,
    CurrentTimestamp,
}

impl ScalarFunc {
    /// Accepted argument counts, inclusive.
    pub fn arity(&self) -> (usize, usize) {
        match self {
            Self::Upper
            | Self::Lower
            | Self::Length
            | Self::Trim
            | Self::Ltrim
            | Self::Rtrim
            | Self::Abs
            | Self::Ceil
            | Self::Floor
            | Self::Sqrt => (1, 1),
            Self::Substring => (2, 3),
            Self::Round => (1, 2),
            Self::Power | Self::Mod => (2, 2),
            Self::Now | Self::CurrentDate | Self::CurrentTime | Self::CurrentTimestamp => (0, 0),
        }
    }

    /// Functions that can be written without parentheses.
    pub fn is_niladic_keyword(&self) -> bool {
        matches!(
            self,
            Self::CurrentDate | Self::CurrentTime | Self::CurrentTimestamp
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateField {
    Year,
    Month,
    Day,
    Hour,
    Minute,
    Second,
}

/// Declares the SQL spelling of unit-like enums, in both directions.
macro_rules! sql_names {
    ($ty:ident { $($variant:ident => $name:literal $(| $alias:literal)*),+ $(,)? }) => {
        impl $ty {
            pub fn sql_name(&self) -> &'static str {
                match self {
                    $(Self::$variant => $name,)+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.sql_name())
            }
        }

        impl FromStr for $ty {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Error> {
                match s.to_ascii_uppercase().as_str() {
                    $($name $(| $alias)* => Ok(Self::$variant),)+
                    _ => Err(Error::syntax(
                        format!("unknown {} '{s}'", stringify!($ty)),
                        None,
                    )),
                }
            }
        }
    };
}

sql_names!(ComparisonOp {
    Eq => "=",
    NotEq => "!=" | "<>",
    Lt => "<",
    LtEq => "<=",
    Gt => ">",
    GtEq => ">=",
});

sql_names!(LogicalOp {
    And => "AND",
    Or => "OR",
});

sql_names!(AggregateFunc {
    Count => "COUNT",
    Sum => "SUM",
    Avg => "AVG",
    Min => "MIN",
    Max => "MAX",
});

sql_names!(ScalarFunc {
    Upper => "UPPER",
    Lower => "LOWER",
    Length => "LENGTH" | "LEN",
    Trim => "TRIM",
    Ltrim => "LTRIM",
    Rtrim => "RTRIM",
    Substring => "SUBSTRING" | "SUBSTR",
    Abs => "ABS",
    Round => "ROUND",
    Ceil => "CEIL" | "CEILING",
    Floor => "FLOOR",
    Sqrt => "SQRT",
    Power => "POWER" | "POW",
    Mod => "MOD",
    Now => "NOW",
    CurrentDate => "CURRENT_DATE",
    CurrentTime => "CURRENT_TIME",
    CurrentTimestamp => "CURRENT_TIMESTAMP",
});

sql_names!(DateField {
    Year => "YEAR",
    Month => "MONTH",
    Day => "DAY",
    Hour => "HOUR",
    Minute => "MINUTE",
    Second => "SECOND",
});

sql_names!(SortDirection {
    Asc => "ASC",
    Desc => "DESC",
});

fn join(exprs: &[Expr]) -> String {
    exprs
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn not_kw(negated: bool) -> &'static str {
    if negated { "NOT " } else { "" }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.table {
            Some(table) => write!(f, "{table}.{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// SQL rendering, used to name unaliased result columns.
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Column(c) => write!(f, "{c}"),
            Self::Literal(Value::Text(s)) => write!(f, "'{}'", s.replace('\'', "''")),
            Self::Literal(Value::Char(c)) => write!(f, "'{c}'"),
            Self::Literal(v) => write!(f, "{v}"),
            Self::Binary { left, op, right } => write!(f, "{left} {op} {right}"),
            Self::Negate(e) => write!(f, "-{e}"),
            Self::Comparison { left, op, right } => write!(f, "{left} {op} {right}"),
            Self::Logical { left, op, right } => write!(f, "{left} {op} {right}"),
            Self::Not(e) => write!(f, "NOT {e}"),
            Self::Aggregate {
                func,
                arg,
                distinct,
            } => {
                let distinct = if *distinct { "DISTINCT " } else { "" };
                match arg {
                    Some(arg) => write!(f, "{func}({distinct}{arg})"),
                    None => write!(f, "{func}(*)"),
                }
            }
            Self::Function { func, args } => write!(f, "{func}({})", join(args)),
            Self::Case {
                operand,
                branches,
                else_result,
            } => {
                write!(f, "CASE")?;
                if let Some(operand) = operand {
                    write!(f, " {operand}")?;
                }
                for branch in branches {
                    write!(f, " WHEN {} THEN {}", branch.condition, branch.result)?;
                }
                if let Some(else_result) = else_result {
                    write!(f, " ELSE {else_result}")?;
                }
                write!(f, " END")
            }
            Self::Cast { expr, data_type } => write!(f, "CAST({expr} AS {data_type})"),
            Self::Extract { field, expr } => write!(f, "EXTRACT({field} FROM {expr})"),
            Self::Coalesce(args) => write!(f, "COALESCE({})", join(args)),
            Self::NullIf { left, right } => write!(f, "NULLIF({left}, {right})"),
            Self::Concat(args) => write!(f, "CONCAT({})", join(args)),
            Self::Replace { expr, from, to } => write!(f, "REPLACE({expr}, {from}, {to})"),
            Self::Between {
                expr,
                low,
                high,
                negated,
            } => write!(f, "{expr} {}BETWEEN {low} AND {high}", not_kw(*negated)),
            Self::Like {
                expr,
                pattern,
                negated,
            } => write!(f, "{expr} {}LIKE {pattern}", not_kw(*negated)),
            Self::InList {
                expr,
                list,
                negated,
            } => write!(f, "{expr} {}IN ({})", not_kw(*negated), join(list)),
            Self::IsNull { expr, negated } => write!(f, "{expr} IS {}NULL", not_kw(*negated)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sum(col: &str) -> Expr {
        Expr::Aggregate {
            func: AggregateFunc::Sum,
            arg: Some(Box::new(Expr::column(col))),
            distinct: false,
        }
    }

    #[test]
    fn test_contains_aggregate() {
        let nested = Expr::Binary {
            left: Box::new(sum("salary")),
            op: ArithmeticOp::Div,
            right: Box::new(Expr::literal(Value::Int(2))),
        };
        assert!(nested.contains_aggregate());
        assert!(!Expr::column("salary").contains_aggregate());
    }

    #[test]
    fn test_column_refs() {
        let expr = Expr::Comparison {
            left: Box::new(Expr::Column(ColumnRef::qualified("u", "age"))),
            op: ComparisonOp::Gt,
            right: Box::new(Expr::column("limit_age")),
        };
        let names: Vec<String> = expr.column_refs().iter().map(|c| c.to_string()).collect();
        assert_eq!(names, vec!["u.age", "limit_age"]);
    }

    #[test]
    fn test_display_names_result_columns() {
        let count = Expr::Aggregate {
            func: AggregateFunc::Count,
            arg: None,
            distinct: false,
        };
        assert_eq!(count.to_string(), "COUNT(*)");
        assert_eq!(sum("salary").to_string(), "SUM(salary)");
        let upper = Expr::Function {
            func: ScalarFunc::Upper,
            args: vec![Expr::literal(Value::text("it's"))],
        };
        assert_eq!(upper.to_string(), "UPPER('it''s')");
    }

    #[test]
    fn test_transform_replaces_nodes() {
        let expr = Expr::Binary {
            left: Box::new(Expr::column("total")),
            op: ArithmeticOp::Add,
            right: Box::new(Expr::literal(Value::Int(1))),
        };
        let rewritten = expr.transform(&|e| match e {
            Expr::Column(c) if c.name == "total" => Some(sum("amount")),
            _ => None,
        });
        assert_eq!(rewritten.to_string(), "SUM(amount) + 1");
    }

    #[test]
    fn test_referenced_tables_skip_ctes() {
        let inner = Select {
            from: vec![TableRef::Named {
                name: "orders".into(),
                alias: None,
            }],
            ..Default::default()
        };
        let query = Select {
            ctes: vec![Cte {
                name: "recent".into(),
                query: Box::new(inner),
            }],
            from: vec![
                TableRef::Named {
                    name: "recent".into(),
                    alias: None,
                },
                TableRef::Named {
                    name: "users".into(),
                    alias: Some("u".into()),
                },
            ],
            ..Default::default()
        };
        assert_eq!(query.referenced_tables(), vec!["orders", "users"]);
    }

    #[test]
    fn test_names_round_trip() {
        assert_eq!("substr".parse::<ScalarFunc>().unwrap(), ScalarFunc::Substring);
        assert_eq!("<>".parse::<ComparisonOp>().unwrap(), ComparisonOp::NotEq);
        assert_eq!(AggregateFunc::Avg.to_string(), "AVG");
        assert!("median".parse::<AggregateFunc>().is_err());
    }

    #[test]
    fn test_is_mutating() {
        assert!(!Statement::Select(Box::default()).is_mutating());
        assert!(Statement::Truncate("t".into()).is_mutating());
    }
}
