//! SELECT pipeline: sources, WHERE, grouping, HAVING, projection, DISTINCT,
//! ORDER BY, OFFSET and LIMIT.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use crate::ast::{ColumnRef, Expr, OrderByClause, Select, SelectItem, SortDirection, TableRef};
use crate::database::Database;
use crate::error::{Error, Result};
use crate::eval::{Evaluate, RowSchema, Scope};
use crate::table::Table;
use crate::value::Value;

use super::QueryResult;
use super::ddl::materialize;

/// Views may reference views, but not without bound.
const MAX_VIEW_DEPTH: usize = 32;

pub(crate) fn run(select: &Select, db: &Database) -> Result<QueryResult> {
    Context::new(db, 0).select(select)
}

/// An intermediate relation: a row layout plus its rows.
struct Relation {
    schema: RowSchema,
    rows: Vec<Vec<Value>>,
}

impl Relation {
    fn from_table(table: &Table, qualifier: &str) -> Self {
        Self {
            schema: RowSchema::from_table(&table.schema, qualifier),
            rows: table.rows(),
        }
    }

    /// Cross product, left rows varying slowest.
    fn cross(self, right: Relation) -> Relation {
        let mut rows = Vec::with_capacity(self.rows.len() * right.rows.len());
        for left in &self.rows {
            for r in &right.rows {
                rows.push(left.iter().chain(r).cloned().collect());
            }
        }
        Relation {
            schema: self.schema.join(right.schema),
            rows,
        }
    }
}

/// One output row with the values it sorts by.
struct Produced {
    row: Vec<Value>,
    keys: Vec<Value>,
}

/// Where an ORDER BY term takes its value from.
enum SortKey {
    Output(usize),
    Computed(Expr),
}

struct Context<'a> {
    db: &'a Database,
    /// CTEs visible to the current query, innermost last.
    ctes: Vec<(String, Table)>,
    depth: usize,
}

impl<'a> Context<'a> {
    fn new(db: &'a Database, depth: usize) -> Self {
        Self {
            db,
            ctes: Vec::new(),
            depth,
        }
    }

    fn select(&mut self, select: &Select) -> Result<QueryResult> {
        let base = self.ctes.len();
        let result = self
            .bind_ctes(select)
            .and_then(|()| self.select_body(select));
        self.ctes.truncate(base);
        result
    }

    fn bind_ctes(&mut self, select: &Select) -> Result<()> {
        for cte in &select.ctes {
            let result = self.select(&cte.query)?;
            let table = materialize(&cte.name, result, true)?;
            self.ctes.push((cte.name.clone(), table));
        }
        Ok(())
    }

    fn select_body(&mut self, select: &Select) -> Result<QueryResult> {
        if select.from.is_empty() {
            return constant_select(select);
        }

        let mut relation: Option<Relation> = None;
        for source in &select.from {
            let next = self.source(source)?;
            relation = Some(match relation {
                Some(left) => left.cross(next),
                None => next,
            });
        }
        let Some(relation) = relation else {
            return constant_select(select);
        };
        let multi_source = select.from.len() > 1;

        let projection = expand_items(&select.columns, &relation.schema, multi_source)?;
        let group_by: Vec<Expr> = select
            .group_by
            .iter()
            .map(|e| resolve_aliases(e, &projection, &relation.schema))
            .collect();
        let having = select
            .having
            .as_ref()
            .map(|e| resolve_aliases(e, &projection, &relation.schema));

        let schema = &relation.schema;
        validate_refs(select.where_clause.iter(), schema)?;
        validate_refs(projection.iter().map(|(_, e)| e), schema)?;
        validate_refs(group_by.iter(), schema)?;
        validate_refs(having.iter(), schema)?;
        if select
            .where_clause
            .as_ref()
            .is_some_and(Expr::contains_aggregate)
        {
            return Err(Error::InvalidOperation(
                "aggregate functions are not allowed in WHERE".into(),
            ));
        }

        let mut rows = Vec::with_capacity(relation.rows.len());
        for row in relation.rows {
            let keep = match &select.where_clause {
                Some(cond) => cond.holds(&Scope::Row { schema, row: &row })?,
                None => true,
            };
            if keep {
                rows.push(row);
            }
        }

        let aggregated = !group_by.is_empty()
            || projection.iter().any(|(_, e)| e.contains_aggregate())
            || having.as_ref().is_some_and(Expr::contains_aggregate);
        if having.is_some() && !aggregated {
            return Err(Error::InvalidOperation(
                "HAVING requires GROUP BY or an aggregate function".into(),
            ));
        }

        let sort_keys = sort_keys(&select.order_by, &projection, schema, aggregated, &group_by)?;
        let mut produced = if aggregated {
            if group_by.is_empty() {
                for expr in projection.iter().map(|(_, e)| e).chain(having.iter()) {
                    ensure_aggregated(expr)?;
                }
            }
            grouped_rows(&rows, schema, &group_by, having.as_ref(), &projection, &sort_keys)?
        } else {
            rows.iter()
                .map(|row| {
                    let scope = Scope::Row { schema, row };
                    produce(&scope, &projection, &sort_keys)
                })
                .collect::<Result<Vec<_>>>()?
        };

        if select.distinct {
            let mut seen = HashSet::new();
            produced.retain(|p| seen.insert(p.row.clone()));
        }

        if !select.order_by.is_empty() {
            sort(&mut produced, &select.order_by);
        }

        let rows = produced
            .into_iter()
            .skip(select.offset.unwrap_or(0))
            .take(select.limit.unwrap_or(usize::MAX))
            .map(|p| p.row)
            .collect();
        let columns = projection.into_iter().map(|(name, _)| name).collect();
        Ok(QueryResult::new(columns, rows))
    }

    /// Resolves a FROM entry: CTE, table, view, then subquery.
    fn source(&mut self, source: &TableRef) -> Result<Relation> {
        match source {
            TableRef::Named { name, alias } => {
                let qualifier = alias.as_deref().unwrap_or(name);
                if let Some((_, table)) = self.ctes.iter().rev().find(|(n, _)| n == name) {
                    return Ok(Relation::from_table(table, qualifier));
                }
                if let Some(table) = self.db.get_table(name) {
                    return Ok(Relation::from_table(table, qualifier));
                }
                if let Some(view) = self.db.view(name) {
                    if self.depth >= MAX_VIEW_DEPTH {
                        return Err(Error::InvalidOperation(format!(
                            "view {name} nests more than {MAX_VIEW_DEPTH} levels deep"
                        )));
                    }
                    let result = Context::new(self.db, self.depth + 1).select(view)?;
                    let table = materialize(name, result, true)?;
                    return Ok(Relation::from_table(&table, qualifier));
                }
                Err(Error::TableNotFound(name.clone()))
            }
            TableRef::Subquery { query, alias } => {
                let qualifier = alias.as_deref().unwrap_or("subquery");
                let result = self.select(query)?;
                let table = materialize(qualifier, result, true)?;
                Ok(Relation::from_table(&table, qualifier))
            }
        }
    }
}

/// `SELECT 1 + 1` and friends: one row computed without a source.
fn constant_select(select: &Select) -> Result<QueryResult> {
    let mut columns = Vec::with_capacity(select.columns.len());
    let mut row = Vec::with_capacity(select.columns.len());
    for item in &select.columns {
        let SelectItem::Expr { expr, alias } = item else {
            return Err(Error::InvalidOperation(
                "SELECT * requires a FROM clause".into(),
            ));
        };
        columns.push(alias.clone().unwrap_or_else(|| expr.to_string()));
        row.push(expr.evaluate(&Scope::Empty)?);
    }
    let keep = match &select.where_clause {
        Some(cond) => cond.holds(&Scope::Empty)?,
        None => true,
    };
    let rows = if keep { vec![row] } else { Vec::new() };
    let rows = rows
        .into_iter()
        .skip(select.offset.unwrap_or(0))
        .take(select.limit.unwrap_or(usize::MAX))
        .collect();
    Ok(QueryResult::new(columns, rows))
}

/// Expands `*` and `t.*` into named column expressions.
///
/// With several sources, expanded names are qualified (`users.id`) so the
/// output stays unambiguous.
pub(super) fn expand_items(
    items: &[SelectItem],
    schema: &RowSchema,
    qualify: bool,
) -> Result<Vec<(String, Expr)>> {
    let column = |field: &crate::eval::Field| {
        let reference = match &field.qualifier {
            Some(q) => ColumnRef::qualified(q, &field.name),
            None => ColumnRef::new(&field.name),
        };
        let name = if qualify {
            reference.to_string()
        } else {
            field.name.clone()
        };
        (name, Expr::Column(reference))
    };

    let mut out = Vec::new();
    for item in items {
        match item {
            SelectItem::Wildcard => out.extend(schema.fields.iter().map(column)),
            SelectItem::QualifiedWildcard(qualifier) => {
                let before = out.len();
                out.extend(
                    schema
                        .fields
                        .iter()
                        .filter(|f| f.qualifier.as_deref() == Some(qualifier))
                        .map(column),
                );
                if out.len() == before {
                    return Err(Error::TableNotFound(qualifier.clone()));
                }
            }
            SelectItem::Expr { expr, alias } => {
                let name = alias.clone().unwrap_or_else(|| expr.to_string());
                out.push((name, expr.clone()));
            }
        }
    }
    Ok(out)
}

/// Replaces bare names that are projection aliases, unless a source column
/// of that name exists.
fn resolve_aliases(expr: &Expr, projection: &[(String, Expr)], schema: &RowSchema) -> Expr {
    expr.transform(&|e| match e {
        Expr::Column(c) if c.table.is_none() && schema.resolve(c).is_err() => projection
            .iter()
            .find(|(name, _)| name == &c.name)
            .map(|(_, aliased)| aliased.clone()),
        _ => None,
    })
}

fn validate_refs<'e>(exprs: impl Iterator<Item = &'e Expr>, schema: &RowSchema) -> Result<()> {
    for expr in exprs {
        for column in expr.column_refs() {
            schema.resolve(column)?;
        }
    }
    Ok(())
}

/// Whether `expr` is computable from a group: aggregates, GROUP BY terms,
/// and expressions built only from those. Columns match a GROUP BY column
/// when both resolve to the same field.
fn is_grouped(expr: &Expr, group_by: &[Expr], schema: &RowSchema) -> bool {
    if group_by.contains(expr) {
        return true;
    }
    match expr {
        Expr::Aggregate { .. } | Expr::Literal(_) => true,
        Expr::Column(c) => schema.resolve(c).is_ok_and(|idx| {
            group_by.iter().any(|g| {
                matches!(g, Expr::Column(gc) if schema.resolve(gc).is_ok_and(|g_idx| g_idx == idx))
            })
        }),
        other => other
            .children()
            .into_iter()
            .all(|c| is_grouped(c, group_by, schema)),
    }
}

/// Without GROUP BY, an aggregate query cannot also read plain columns.
fn ensure_aggregated(expr: &Expr) -> Result<()> {
    match expr {
        Expr::Aggregate { .. } | Expr::Literal(_) => Ok(()),
        Expr::Column(_) => Err(Error::InvalidOperation(format!(
            "{expr} mixes aggregate and plain columns without GROUP BY"
        ))),
        other => other.children().into_iter().try_for_each(ensure_aggregated),
    }
}

fn sort_keys(
    order_by: &[OrderByClause],
    projection: &[(String, Expr)],
    schema: &RowSchema,
    aggregated: bool,
    group_by: &[Expr],
) -> Result<Vec<SortKey>> {
    order_by
        .iter()
        .map(|clause| {
            let expr = &clause.expr;
            if let Expr::Column(c) = expr {
                if c.table.is_none() {
                    if let Some(idx) = projection.iter().position(|(name, _)| name == &c.name) {
                        return Ok(SortKey::Output(idx));
                    }
                }
            }
            if let Some(idx) = projection.iter().position(|(_, e)| e == expr) {
                return Ok(SortKey::Output(idx));
            }
            validate_refs(std::iter::once(expr), schema)?;
            if aggregated && !is_grouped(expr, group_by, schema) {
                return Err(Error::InvalidOperation(format!(
                    "ORDER BY {expr} must appear in the SELECT list or GROUP BY"
                )));
            }
            Ok(SortKey::Computed(expr.clone()))
        })
        .collect()
}

fn produce(scope: &Scope<'_>, projection: &[(String, Expr)], keys: &[SortKey]) -> Result<Produced> {
    let row = projection
        .iter()
        .map(|(_, e)| e.evaluate(scope))
        .collect::<Result<Vec<_>>>()?;
    let keys = keys
        .iter()
        .map(|key| match key {
            SortKey::Output(idx) => Ok(row[*idx].clone()),
            SortKey::Computed(expr) => expr.evaluate(scope),
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Produced { row, keys })
}

/// Buckets rows by their GROUP BY values in first-seen order. Without GROUP
/// BY every row lands in one group, which exists even when there are no rows.
fn grouped_rows(
    rows: &[Vec<Value>],
    schema: &RowSchema,
    group_by: &[Expr],
    having: Option<&Expr>,
    projection: &[(String, Expr)],
    keys: &[SortKey],
) -> Result<Vec<Produced>> {
    let mut buckets: Vec<Vec<&[Value]>> = Vec::new();
    if group_by.is_empty() {
        buckets.push(rows.iter().map(Vec::as_slice).collect());
    } else {
        let mut index: HashMap<Vec<Value>, usize> = HashMap::new();
        for row in rows {
            let scope = Scope::Row { schema, row };
            let key = group_by
                .iter()
                .map(|e| e.evaluate(&scope))
                .collect::<Result<Vec<_>>>()?;
            let slot = *index.entry(key).or_insert_with(|| {
                buckets.push(Vec::new());
                buckets.len() - 1
            });
            buckets[slot].push(row);
        }
    }

    let mut out = Vec::with_capacity(buckets.len());
    for bucket in &buckets {
        let scope = Scope::Group {
            schema,
            rows: bucket,
        };
        if let Some(having) = having {
            if !having.holds(&scope)? {
                continue;
            }
        }
        out.push(produce(&scope, projection, keys)?);
    }
    Ok(out)
}

/// Stable multi-key sort: later keys only break ties of earlier ones.
fn sort(produced: &mut [Produced], order_by: &[OrderByClause]) {
    produced.sort_by(|a, b| {
        for (i, clause) in order_by.iter().enumerate() {
            let ord = a.keys[i].cmp(&b.keys[i]);
            let ord = match clause.direction {
                SortDirection::Asc => ord,
                SortDirection::Desc => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
}
