//! INSERT, UPDATE and DELETE.
//!
//! Rows are committed one at a time: when a multi-row INSERT fails halfway,
//! the rows before the failure stay in the table.

use std::collections::HashMap;

use tracing::debug;

use crate::ast::{
    Assignment, ColumnRef, ConflictAction, Delete, Expr, Insert, OnConflict, SelectItem, Update,
};
use crate::database::Database;
use crate::error::{Error, Result};
use crate::eval::{Evaluate, Field, RowSchema, Scope};
use crate::table::Table;
use crate::value::Value;

use super::select::expand_items;
use super::{Outcome, QueryResult};

/// Qualifier of the proposed row inside `ON CONFLICT DO UPDATE`.
const EXCLUDED: &str = "excluded";

fn writable_table<'a>(db: &'a mut Database, name: &str) -> Result<&'a mut Table> {
    if db.is_materialized_backing(name) {
        return Err(Error::ViewLinkage(format!(
            "{name} backs a materialized view; use REFRESH MATERIALIZED VIEW {name}"
        )));
    }
    db.get_table_mut(name)
        .ok_or_else(|| Error::TableNotFound(name.to_string()))
}

/// Converts an evaluated value to the column type and enforces NOT NULL.
fn column_value(table: &Table, idx: usize, value: Value) -> Result<Value> {
    let def = &table.schema.columns[idx];
    let value = def.data_type.parse(&value)?;
    if value.is_null() && def.is_required() {
        return Err(Error::ConstraintViolation(format!(
            "column {}.{} cannot be NULL",
            table.name, def.name
        )));
    }
    Ok(value)
}

/// Runs the CHECK restrictions of every column against a full row.
/// A restriction evaluating to `NULL` passes.
fn check_restrictions(table: &Table, schema: &RowSchema, row: &[Value]) -> Result<()> {
    let scope = Scope::Row { schema, row };
    for def in &table.schema.columns {
        if let Some(check) = &def.check {
            if check.evaluate(&scope)?.truth()? == Some(false) {
                return Err(Error::ConstraintViolation(format!(
                    "CHECK ({check}) failed for column {}.{}",
                    table.name, def.name
                )));
            }
        }
    }
    Ok(())
}

fn unique_violation(table: &Table, col_idx: usize, value: &Value) -> Error {
    Error::ConstraintViolation(format!(
        "duplicate value {value} for unique column {}.{}",
        table.name, table.schema.columns[col_idx].name
    ))
}

fn returning(
    items: &[SelectItem],
    schema: &RowSchema,
    rows: &[Vec<Value>],
) -> Result<QueryResult> {
    let projection = expand_items(items, schema, false)?;
    for (_, expr) in &projection {
        for column in expr.column_refs() {
            schema.resolve(column)?;
        }
    }
    let rows = rows
        .iter()
        .map(|row| {
            let scope = Scope::Row { schema, row };
            projection
                .iter()
                .map(|(_, e)| e.evaluate(&scope))
                .collect::<Result<Vec<_>>>()
        })
        .collect::<Result<Vec<_>>>()?;
    let columns = projection.into_iter().map(|(name, _)| name).collect();
    Ok(QueryResult::new(columns, rows))
}

fn finish(
    items: &[SelectItem],
    schema: &RowSchema,
    rows: &[Vec<Value>],
    message: String,
    affected: usize,
) -> Result<Outcome> {
    if items.is_empty() {
        Ok(Outcome::effect(message, affected))
    } else {
        Ok(Outcome::Rows(returning(items, schema, rows)?))
    }
}

/// Resolves assignment targets to column positions.
fn assignment_targets(table: &Table, assignments: &[Assignment]) -> Result<Vec<usize>> {
    assignments
        .iter()
        .map(|a| {
            table
                .schema
                .index_of(&a.column)
                .ok_or_else(|| Error::ColumnNotFound(format!("{}.{}", table.name, a.column)))
        })
        .collect()
}

/// Checks an ON CONFLICT target against the table's unique columns.
fn conflict_target(table: &Table, on_conflict: &OnConflict) -> Result<Vec<usize>> {
    on_conflict
        .target
        .iter()
        .map(|name| {
            let idx = table.schema.index_of(name).ok_or_else(|| {
                Error::ConflictResolution(format!(
                    "conflict target {name} is not a column of {}",
                    table.name
                ))
            })?;
            if !table.schema.columns[idx].is_unique() {
                return Err(Error::ConflictResolution(format!(
                    "conflict target {name} is neither PRIMARY KEY nor UNIQUE"
                )));
            }
            Ok(idx)
        })
        .collect()
}

pub(super) fn insert(insert: &Insert, db: &mut Database) -> Result<Outcome> {
    let table = writable_table(db, &insert.table)?;
    let schema = RowSchema::from_table(&table.schema, &table.name);

    let target = match &insert.on_conflict {
        Some(on_conflict) => {
            if let ConflictAction::DoUpdate(assignments) = &on_conflict.action {
                assignment_targets(table, assignments)?;
            }
            conflict_target(table, on_conflict)?
        }
        None => Vec::new(),
    };

    let mut inserted = 0;
    let mut updated = 0;
    let mut returned = Vec::new();

    for group in &insert.groups {
        let positions: Vec<usize> = match &group.columns {
            None => (0..table.schema.len()).collect(),
            Some(names) => {
                let mut positions = Vec::with_capacity(names.len());
                for name in names {
                    let idx = table.schema.index_of(name).ok_or_else(|| {
                        Error::ColumnNotFound(format!("{}.{name}", table.name))
                    })?;
                    if positions.contains(&idx) {
                        return Err(Error::InvalidOperation(format!(
                            "column {name} is listed twice"
                        )));
                    }
                    positions.push(idx);
                }
                positions
            }
        };

        for exprs in &group.rows {
            if exprs.len() != positions.len() {
                return Err(Error::InvalidOperation(format!(
                    "INSERT into {} expects {} values, got {}",
                    table.name,
                    positions.len(),
                    exprs.len()
                )));
            }
            let candidate = build_row(table, &positions, exprs)?;
            check_restrictions(table, &schema, &candidate)?;

            let Some((col_idx, existing)) = table.unique_conflict(&candidate, None) else {
                table.insert(candidate.clone())?;
                inserted += 1;
                returned.push(candidate);
                continue;
            };
            let Some(on_conflict) = &insert.on_conflict else {
                return Err(unique_violation(table, col_idx, &candidate[col_idx]));
            };
            if !target.is_empty() && !target.contains(&col_idx) {
                return Err(unique_violation(table, col_idx, &candidate[col_idx]));
            }
            match &on_conflict.action {
                ConflictAction::DoNothing => {
                    debug!(table = %table.name, "insert skipped by ON CONFLICT DO NOTHING");
                }
                ConflictAction::DoUpdate(assignments) => {
                    let row = upsert(table, &schema, existing, assignments, &candidate)?;
                    updated += 1;
                    returned.push(row);
                }
            }
        }
    }

    debug!(table = %insert.table, inserted, updated, "insert finished");
    let message = if updated > 0 {
        format!("{inserted} row(s) inserted, {updated} row(s) updated")
    } else {
        format!("{inserted} row(s) inserted")
    };
    finish(
        &insert.returning,
        &schema,
        &returned,
        message,
        inserted + updated,
    )
}

/// Builds a full row in schema order from the supplied expressions.
///
/// Missing columns take the next SERIAL value, the DEFAULT expression, or
/// `NULL`, in that order. SERIAL counters only move when the row is stored.
fn build_row(table: &Table, positions: &[usize], exprs: &[Expr]) -> Result<Vec<Value>> {
    let mut supplied: HashMap<usize, &Expr> = positions.iter().copied().zip(exprs).collect();
    let mut row = Vec::with_capacity(table.schema.len());
    for (idx, def) in table.schema.columns.iter().enumerate() {
        let value = match supplied.remove(&idx) {
            Some(expr) => expr.evaluate(&Scope::Empty)?,
            None => Value::Null,
        };
        let value = match (&value, def.is_serial(), &def.default) {
            (Value::Null, true, _) => {
                Value::Int(table.sequence(&def.name).map(|s| s.peek()).unwrap_or(1))
            }
            (Value::Null, false, Some(default)) if !positions.contains(&idx) => {
                default.evaluate(&Scope::Empty)?
            }
            _ => value,
        };
        row.push(column_value(table, idx, value)?);
    }
    Ok(row)
}

/// Applies `DO UPDATE SET` to the conflicting row. `excluded.col` reads the
/// row that was proposed for insertion, bare names read the stored row.
fn upsert(
    table: &mut Table,
    schema: &RowSchema,
    row_idx: usize,
    assignments: &[Assignment],
    proposed: &[Value],
) -> Result<Vec<Value>> {
    let current = table
        .get_row(row_idx)
        .ok_or_else(|| Error::InvalidOperation(format!("row {row_idx} vanished")))?;
    let excluded = RowSchema::new(
        schema
            .fields
            .iter()
            .map(|f| Field {
                qualifier: Some(EXCLUDED.to_string()),
                ..f.clone()
            })
            .collect(),
    );
    let combined = schema.clone().join(excluded);
    let both: Vec<Value> = current.iter().chain(proposed).cloned().collect();
    let scope = Scope::Row {
        schema: &combined,
        row: &both,
    };

    let targets = assignment_targets(table, assignments)?;
    let mut updated = current.clone();
    for (assignment, idx) in assignments.iter().zip(targets) {
        let expr = qualify_bare(&assignment.value, &table.name);
        let value = expr.evaluate(&scope)?;
        updated[idx] = column_value(table, idx, value)?;
    }
    commit_update(table, schema, row_idx, updated)
}

/// Pins bare column names to `table` so they don't clash with `excluded`.
fn qualify_bare(expr: &Expr, table: &str) -> Expr {
    expr.transform(&|e| match e {
        Expr::Column(c) if c.table.is_none() => {
            Some(Expr::Column(ColumnRef::qualified(table, &c.name)))
        }
        _ => None,
    })
}

fn commit_update(
    table: &mut Table,
    schema: &RowSchema,
    row_idx: usize,
    row: Vec<Value>,
) -> Result<Vec<Value>> {
    check_restrictions(table, schema, &row)?;
    if let Some((col_idx, _)) = table.unique_conflict(&row, Some(row_idx)) {
        return Err(unique_violation(table, col_idx, &row[col_idx]));
    }
    table.replace_row(row_idx, row.clone())?;
    Ok(row)
}

/// Indices of rows satisfying `condition`, all rows when it is absent.
fn matching_rows(
    table: &Table,
    schema: &RowSchema,
    condition: Option<&Expr>,
) -> Result<Vec<(usize, Vec<Value>)>> {
    if let Some(condition) = condition {
        for column in condition.column_refs() {
            schema.resolve(column)?;
        }
    }
    let mut out = Vec::new();
    for (idx, row) in table.rows().into_iter().enumerate() {
        let keep = match condition {
            Some(cond) => cond.holds(&Scope::Row { schema, row: &row })?,
            None => true,
        };
        if keep {
            out.push((idx, row));
        }
    }
    Ok(out)
}

pub(super) fn update(update: &Update, db: &mut Database) -> Result<Outcome> {
    let table = writable_table(db, &update.table)?;
    let schema = RowSchema::from_table(&table.schema, &table.name);
    let targets = assignment_targets(table, &update.assignments)?;
    for assignment in &update.assignments {
        for column in assignment.value.column_refs() {
            schema.resolve(column)?;
        }
    }

    let matches = matching_rows(table, &schema, update.where_clause.as_ref())?;
    let mut returned = Vec::with_capacity(matches.len());
    for (row_idx, current) in matches {
        let scope = Scope::Row {
            schema: &schema,
            row: &current,
        };
        let mut row = current.clone();
        for (assignment, idx) in update.assignments.iter().zip(&targets) {
            let value = assignment.value.evaluate(&scope)?;
            row[*idx] = column_value(table, *idx, value)?;
        }
        returned.push(commit_update(table, &schema, row_idx, row)?);
    }

    let affected = returned.len();
    debug!(table = %update.table, affected, "update finished");
    finish(
        &update.returning,
        &schema,
        &returned,
        format!("{affected} row(s) updated"),
        affected,
    )
}

pub(super) fn delete(delete: &Delete, db: &mut Database) -> Result<Outcome> {
    let Some(condition) = &delete.where_clause else {
        return Err(Error::InvalidOperation(format!(
            "DELETE without WHERE is not allowed, use TRUNCATE TABLE {} instead",
            delete.table
        )));
    };
    let table = writable_table(db, &delete.table)?;
    let schema = RowSchema::from_table(&table.schema, &table.name);
    let matches = matching_rows(table, &schema, Some(condition))?;

    // highest index first so earlier removals don't shift pending ones
    for (row_idx, _) in matches.iter().rev() {
        table.delete_row(*row_idx)?;
    }

    let affected = matches.len();
    debug!(table = %delete.table, affected, "delete finished");
    let removed: Vec<Vec<Value>> = matches.into_iter().map(|(_, row)| row).collect();
    finish(
        &delete.returning,
        &schema,
        &removed,
        format!("{affected} row(s) deleted"),
        affected,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users() -> Database {
        let mut db = Database::new();
        db.execute(
            "CREATE TABLE users (
                id SERIAL PRIMARY KEY,
                email VARCHAR UNIQUE,
                name VARCHAR NOT NULL,
                age INT CHECK (age >= 0),
                visits INT DEFAULT 0
            )",
        )
        .unwrap();
        db
    }

    fn count(db: &Database, table: &str) -> usize {
        db.get_table(table).unwrap().row_count
    }

    // ─────────────────────────────────────────────
    // Test 1 : INSERT row construction
    // ─────────────────────────────────────────────

    #[test]
    fn test_auto_increment_end_to_end() {
        let mut db = Database::new();
        db.execute("CREATE TABLE users (id AUTO_INT, name VARCHAR, age INT);")
            .unwrap();
        db.execute("INSERT INTO users (name, age) VALUES ('Bob', 30);")
            .unwrap();
        let result = db.query("SELECT * FROM users;").unwrap();
        assert_eq!(
            result.rows,
            vec![vec![Value::Int(1), Value::text("Bob"), Value::Int(30)]]
        );
    }

    #[test]
    fn test_defaults_and_column_order() {
        let mut db = users();
        db.execute("INSERT INTO users (age, name) VALUES (20, 'Ann'), (31, 'Ben')")
            .unwrap();
        let result = db.query("SELECT id, name, age, visits FROM users").unwrap();
        assert_eq!(
            result.rows[1],
            vec![Value::Int(2), Value::text("Ben"), Value::Int(31), Value::Int(0)]
        );
    }

    #[test]
    fn test_values_are_parsed_through_column_types() {
        let mut db = users();
        db.execute("INSERT INTO users (name, age) VALUES ('Ann', '42')")
            .unwrap();
        assert_eq!(
            db.query("SELECT age FROM users").unwrap().rows[0][0],
            Value::Int(42)
        );
        let err = db
            .execute("INSERT INTO users (name, age) VALUES ('Ann', 'old')")
            .unwrap_err();
        assert!(matches!(err, Error::DataType(_)));
    }

    #[test]
    fn test_insert_shape_errors() {
        let mut db = users();
        let err = db.execute("INSERT INTO users (name) VALUES ('a', 1)").unwrap_err();
        assert!(matches!(err, Error::InvalidOperation(_)));
        let err = db.execute("INSERT INTO users (nope) VALUES (1)").unwrap_err();
        assert!(matches!(err, Error::ColumnNotFound(_)));
        let err = db.execute("INSERT INTO ghosts VALUES (1)").unwrap_err();
        assert!(matches!(err, Error::TableNotFound(_)));
    }

    // ─────────────────────────────────────────────
    // Test 2 : constraints
    // ─────────────────────────────────────────────

    #[test]
    fn test_not_null_and_check() {
        let mut db = users();
        let err = db.execute("INSERT INTO users (age) VALUES (3)").unwrap_err();
        assert!(matches!(err, Error::ConstraintViolation(_)));
        let err = db
            .execute("INSERT INTO users (name, age) VALUES ('x', -1)")
            .unwrap_err();
        assert!(matches!(err, Error::ConstraintViolation(_)));
        // NULL passes a CHECK
        db.execute("INSERT INTO users (name) VALUES ('x')").unwrap();
        assert_eq!(count(&db, "users"), 1);
    }

    #[test]
    fn test_unique_violation_leaves_table_unchanged() {
        let mut db = users();
        db.execute("INSERT INTO users (email, name) VALUES ('a@x', 'A')")
            .unwrap();
        let err = db
            .execute("INSERT INTO users (email, name) VALUES ('a@x', 'B')")
            .unwrap_err();
        assert!(matches!(err, Error::ConstraintViolation(_)));
        assert_eq!(count(&db, "users"), 1);

        // failed rows don't consume SERIAL values
        db.execute("INSERT INTO users (email, name) VALUES ('b@x', 'B')")
            .unwrap();
        let ids = db.query("SELECT id FROM users").unwrap();
        assert_eq!(ids.rows, vec![vec![Value::Int(1)], vec![Value::Int(2)]]);
    }

    #[test]
    fn test_multi_row_insert_commits_rows_before_a_failure() {
        let mut db = users();
        let err = db
            .execute("INSERT INTO users (email, name) VALUES ('a@x', 'A'), ('a@x', 'B'), ('c@x', 'C')")
            .unwrap_err();
        assert!(matches!(err, Error::ConstraintViolation(_)));
        assert_eq!(count(&db, "users"), 1);
    }

    #[test]
    fn test_explicit_serial_value_moves_counter() {
        let mut db = users();
        db.execute("INSERT INTO users (id, name) VALUES (10, 'A')").unwrap();
        db.execute("INSERT INTO users (name) VALUES ('B')").unwrap();
        let ids = db.query("SELECT id FROM users ORDER BY id").unwrap();
        assert_eq!(ids.rows, vec![vec![Value::Int(10)], vec![Value::Int(11)]]);
    }

    #[test]
    fn test_failed_insert_does_not_consume_serial() {
        let mut db = Database::new();
        db.execute("CREATE TABLE tags (id SERIAL PRIMARY KEY, label VARCHAR NOT NULL)")
            .unwrap();
        db.execute("INSERT INTO tags (label) VALUES ('a')").unwrap();
        assert!(db.execute("INSERT INTO tags (label) VALUES (NULL)").is_err());
        db.execute("INSERT INTO tags (label) VALUES ('b')").unwrap();
        let ids = db.query("SELECT id FROM tags ORDER BY id").unwrap();
        assert_eq!(ids.rows, vec![vec![Value::Int(1)], vec![Value::Int(2)]]);
    }

    // ─────────────────────────────────────────────
    // Test 3 : ON CONFLICT
    // ─────────────────────────────────────────────

    #[test]
    fn test_on_conflict_do_nothing() {
        let mut db = users();
        db.execute("INSERT INTO users (email, name) VALUES ('a@x', 'A')")
            .unwrap();
        let outcome = db
            .execute("INSERT INTO users (email, name) VALUES ('a@x', 'B'), ('b@x', 'C') ON CONFLICT (email) DO NOTHING")
            .unwrap();
        assert_eq!(outcome.affected(), 1);
        assert_eq!(count(&db, "users"), 2);
    }

    #[test]
    fn test_on_conflict_do_update_with_excluded() {
        let mut db = users();
        db.execute("INSERT INTO users (email, name, visits) VALUES ('a@x', 'A', 1)")
            .unwrap();
        let outcome = db
            .execute(
                "INSERT INTO users (email, name, visits) VALUES ('a@x', 'Renamed', 5)
                 ON CONFLICT (email) DO UPDATE SET visits = visits + excluded.visits, name = excluded.name
                 RETURNING id, name, visits",
            )
            .unwrap();
        let rows = outcome.into_rows().unwrap();
        assert_eq!(
            rows.rows,
            vec![vec![Value::Int(1), Value::text("Renamed"), Value::Int(6)]]
        );
        assert_eq!(count(&db, "users"), 1);
    }

    #[test]
    fn test_conflict_target_must_be_unique() {
        let mut db = users();
        let err = db
            .execute("INSERT INTO users (name) VALUES ('A') ON CONFLICT (name) DO NOTHING")
            .unwrap_err();
        assert!(matches!(err, Error::ConflictResolution(_)));
        let err = db
            .execute("INSERT INTO users (name) VALUES ('A') ON CONFLICT (ghost) DO NOTHING")
            .unwrap_err();
        assert!(matches!(err, Error::ConflictResolution(_)));
    }

    // ─────────────────────────────────────────────
    // Test 4 : UPDATE and DELETE
    // ─────────────────────────────────────────────

    #[test]
    fn test_update_with_returning() {
        let mut db = users();
        db.execute("INSERT INTO users (name, age) VALUES ('A', 10), ('B', 20), ('C', 30)")
            .unwrap();
        let result = db
            .execute("UPDATE users SET age = age + 1 WHERE age >= 20 RETURNING name, age")
            .unwrap()
            .into_rows()
            .unwrap();
        assert_eq!(result.columns, vec!["name", "age"]);
        assert_eq!(
            result.rows,
            vec![
                vec![Value::text("B"), Value::Int(21)],
                vec![Value::text("C"), Value::Int(31)],
            ]
        );
    }

    #[test]
    fn test_update_respects_constraints() {
        let mut db = users();
        db.execute("INSERT INTO users (email, name) VALUES ('a@x', 'A'), ('b@x', 'B')")
            .unwrap();
        let err = db
            .execute("UPDATE users SET email = 'a@x' WHERE name = 'B'")
            .unwrap_err();
        assert!(matches!(err, Error::ConstraintViolation(_)));
        let err = db.execute("UPDATE users SET name = NULL WHERE id = 1").unwrap_err();
        assert!(matches!(err, Error::ConstraintViolation(_)));
        // a row may keep its own unique value
        db.execute("UPDATE users SET email = 'a@x' WHERE name = 'A'").unwrap();
    }

    #[test]
    fn test_delete_requires_where() {
        let mut db = users();
        db.execute("INSERT INTO users (name) VALUES ('A')").unwrap();
        let err = db.execute("DELETE FROM users;").unwrap_err();
        assert!(matches!(err, Error::InvalidOperation(ref m) if m.contains("TRUNCATE TABLE")));
        assert_eq!(count(&db, "users"), 1);
    }

    #[test]
    fn test_delete_with_returning() {
        let mut db = users();
        db.execute("INSERT INTO users (name, age) VALUES ('A', 10), ('B', 20), ('C', 30), ('D', 40)")
            .unwrap();
        let result = db
            .execute("DELETE FROM users WHERE age = 20 OR age = 40 RETURNING name")
            .unwrap()
            .into_rows()
            .unwrap();
        assert_eq!(result.rows, vec![vec![Value::text("B")], vec![Value::text("D")]]);
        let left = db.query("SELECT name FROM users").unwrap();
        assert_eq!(left.rows, vec![vec![Value::text("A")], vec![Value::text("C")]]);
    }
}
