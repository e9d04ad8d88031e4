//! Definitions: tables, views, materialized views, ALTER, TRUNCATE and the
//! built-in procedures.

use std::collections::HashSet;

use tracing::debug;

use crate::ast::{AlterAction, AlterTable, Call, CreateTable, CreateTableAs, CreateView, Drop, DropKind};
use crate::data_type::DataType;
use crate::database::{Database, MATERIALIZED_SUFFIX, VIEWS_KEY};
use crate::error::{Error, Result};
use crate::eval::{Evaluate, RowSchema, Scope};
use crate::table::{ColumnDef, Constraint, Schema, Table};
use crate::value::Value;

use super::{Outcome, QueryResult, call_args, expect_args, select};

/// Builds a table from a query result, inferring one type per column.
///
/// The first non-NULL value of a column decides its type, text becoming
/// `VARCHAR`. A column mixing integers and floats becomes `FLOAT`, and an
/// all-NULL column defaults to `VARCHAR`.
///
/// # Errors
/// Fails on duplicate output names, on values that don't fit the inferred
/// type, and on an empty result unless `allow_empty` is set.
pub fn materialize(name: &str, result: QueryResult, allow_empty: bool) -> Result<Table> {
    let mut seen = HashSet::new();
    if let Some(dup) = result.columns.iter().find(|c| !seen.insert(c.as_str())) {
        return Err(Error::InvalidOperation(format!(
            "column {dup} appears more than once in the result for {name}, add an alias"
        )));
    }
    if result.rows.is_empty() && !allow_empty {
        return Err(Error::InvalidOperation(format!(
            "cannot infer a schema for {name} from an empty result"
        )));
    }

    let columns = result
        .columns
        .iter()
        .enumerate()
        .map(|(idx, column)| {
            let mut values = result.rows.iter().map(|row| &row[idx]);
            let inferred = match values.find_map(Value::data_type) {
                None | Some(DataType::Text) => DataType::Varchar,
                Some(DataType::Int)
                    if result.rows.iter().any(|row| matches!(row[idx], Value::Float(_))) =>
                {
                    DataType::Float
                }
                Some(other) => other,
            };
            debug!(relation = name, column = %column, data_type = %inferred, "inferred column type");
            ColumnDef::new(column.clone(), inferred)
        })
        .collect();

    let mut table = Table::new(name.to_string(), Schema::new(columns));
    for row in result.rows {
        let values = row
            .iter()
            .zip(&table.schema.columns)
            .map(|(value, def)| def.data_type.parse(value))
            .collect::<Result<Vec<_>>>()?;
        table.insert(values)?;
    }
    Ok(table)
}

fn reserved(name: &str) -> Result<()> {
    if name == VIEWS_KEY || name.ends_with(MATERIALIZED_SUFFIX) {
        return Err(Error::InvalidOperation(format!("{name} is a reserved name")));
    }
    Ok(())
}

fn ensure_name_free(db: &Database, name: &str) -> Result<()> {
    if db.get_table(name).is_some() {
        return Err(Error::TableAlreadyExists(name.to_string()));
    }
    if db.view(name).is_some() {
        return Err(Error::ViewAlreadyExists(name.to_string()));
    }
    Ok(())
}

pub(super) fn create_table(create: &CreateTable, db: &mut Database) -> Result<Outcome> {
    reserved(&create.name)?;
    if create.if_not_exists && (db.get_table(&create.name).is_some() || db.view(&create.name).is_some()) {
        return Ok(Outcome::effect(
            format!("table {} already exists, skipped", create.name),
            0,
        ));
    }
    ensure_name_free(db, &create.name)?;

    let mut names = HashSet::new();
    for column in &create.columns {
        if !names.insert(column.name.as_str()) {
            return Err(Error::InvalidOperation(format!(
                "column {} is defined twice in {}",
                column.name, create.name
            )));
        }
    }
    if create
        .columns
        .iter()
        .filter(|c| c.has(Constraint::PrimaryKey))
        .count()
        > 1
    {
        return Err(Error::InvalidOperation(format!(
            "table {} declares more than one PRIMARY KEY",
            create.name
        )));
    }

    let schema = Schema::new(create.columns.clone());
    let row_schema = RowSchema::from_table(&schema, &create.name);
    for column in &create.columns {
        if let Some(check) = &column.check {
            for reference in check.column_refs() {
                row_schema.resolve(reference)?;
            }
        }
        if let Some(default) = &column.default {
            column.data_type.parse(&default.evaluate(&Scope::Empty)?)?;
        }
    }

    db.create_table(create.name.clone(), schema)?;
    Ok(Outcome::effect(format!("table {} created", create.name), 0))
}

pub(super) fn create_table_as(create: &CreateTableAs, db: &mut Database) -> Result<Outcome> {
    reserved(&create.name)?;
    ensure_name_free(db, &create.name)?;
    let result = select::run(&create.query, db)?;
    let table = materialize(&create.name, result, false)?;
    let affected = table.row_count;
    db.insert_table(table);
    Ok(Outcome::effect(
        format!("table {} created with {affected} row(s)", create.name),
        affected,
    ))
}

pub(super) fn create_view(create: &CreateView, db: &mut Database) -> Result<Outcome> {
    reserved(&create.name)?;
    let name = &create.name;

    if create.materialized {
        let replaced = db.is_materialized_backing(name);
        if replaced {
            if !create.or_replace {
                return Err(Error::ViewAlreadyExists(name.clone()));
            }
        } else {
            ensure_name_free(db, name)?;
        }
        let result = select::run(&create.query, db)?;
        let mut table = materialize(name, result, false)?;
        if !create.with_data {
            table.truncate();
        }
        let affected = table.row_count;
        db.insert_table(table);
        db.set_view(Database::materialized_key(name), (*create.query).clone());
        let verb = if replaced { "replaced" } else { "created" };
        debug!(view = %name, rows = affected, "materialized view {verb}");
        return Ok(Outcome::effect(
            format!("materialized view {name} {verb}"),
            affected,
        ));
    }

    if db.get_table(name).is_some() {
        return Err(Error::TableAlreadyExists(name.clone()));
    }
    let replaced = db.view(name).is_some();
    if replaced && !create.or_replace {
        return Err(Error::ViewAlreadyExists(name.clone()));
    }
    db.set_view(name.clone(), (*create.query).clone());
    let verb = if replaced { "replaced" } else { "created" };
    Ok(Outcome::effect(format!("view {name} {verb}"), 0))
}

/// Re-runs the stored query of a materialized view and replaces its rows.
pub(super) fn refresh_materialized_view(name: &str, db: &mut Database) -> Result<Outcome> {
    let query = db
        .view(&Database::materialized_key(name))
        .cloned()
        .ok_or_else(|| Error::ViewNotFound(name.to_string()))?;
    let result = select::run(&query, db)?;

    let affected = if result.rows.is_empty() {
        let table = db
            .get_table_mut(name)
            .ok_or_else(|| Error::ViewLinkage(format!("materialized view {name} lost its table")))?;
        table.truncate();
        0
    } else {
        let table = materialize(name, result, false)?;
        let rows = table.row_count;
        db.insert_table(table);
        rows
    };
    debug!(view = name, rows = affected, "materialized view refreshed");
    Ok(Outcome::effect(
        format!("materialized view {name} refreshed"),
        affected,
    ))
}

pub(super) fn drop(drop: &Drop, db: &mut Database) -> Result<Outcome> {
    let name = &drop.name;
    let found = match drop.kind {
        DropKind::Database => {
            return Err(Error::InvalidOperation(
                "DROP DATABASE requires a database manager".into(),
            ));
        }
        DropKind::Table => {
            if db.is_materialized_backing(name) {
                return Err(Error::ViewLinkage(format!(
                    "{name} is a materialized view, use DROP MATERIALIZED VIEW {name}"
                )));
            }
            db.drop_table(name).is_ok()
        }
        DropKind::View => {
            if name.ends_with(MATERIALIZED_SUFFIX) {
                return Err(Error::ViewLinkage(format!(
                    "{name} is internal to a materialized view"
                )));
            }
            if db.is_materialized_backing(name) {
                return Err(Error::ViewLinkage(format!(
                    "{name} is a materialized view, use DROP MATERIALIZED VIEW {name}"
                )));
            }
            db.drop_view(name).is_some()
        }
        DropKind::MaterializedView => {
            let found = db.drop_view(&Database::materialized_key(name)).is_some();
            if found {
                db.drop_table(name)?;
            }
            found
        }
    };

    let kind = match drop.kind {
        DropKind::Table => "table",
        DropKind::View => "view",
        _ => "materialized view",
    };
    match (found, drop.if_exists) {
        (true, _) => Ok(Outcome::effect(format!("{kind} {name} dropped"), 0)),
        (false, true) => Ok(Outcome::effect(
            format!("{kind} {name} does not exist, skipped"),
            0,
        )),
        (false, false) if drop.kind == DropKind::Table => Err(Error::TableNotFound(name.clone())),
        (false, false) => Err(Error::ViewNotFound(name.clone())),
    }
}

pub(super) fn alter_table(alter: &AlterTable, db: &mut Database) -> Result<Outcome> {
    let name = &alter.table;
    if db.is_materialized_backing(name) {
        return Err(Error::ViewLinkage(format!(
            "{name} backs a materialized view and cannot be altered"
        )));
    }
    if db.get_table(name).is_none() {
        return Err(Error::TableNotFound(name.clone()));
    }

    match &alter.action {
        AlterAction::RenameTable(new_name) => {
            reserved(new_name)?;
            ensure_name_free(db, new_name)?;
            let mut table = db.drop_table(name)?;
            table.name = new_name.clone();
            db.insert_table(table);
            Ok(Outcome::effect(format!("table {name} renamed to {new_name}"), 0))
        }
        AlterAction::AddColumn(def) => {
            let table = db
                .get_table_mut(name)
                .ok_or_else(|| Error::TableNotFound(name.clone()))?;
            add_column(table, def)?;
            Ok(Outcome::effect(format!("column {} added to {name}", def.name), 0))
        }
        AlterAction::DropColumn(column) => {
            let table = db
                .get_table_mut(name)
                .ok_or_else(|| Error::TableNotFound(name.clone()))?;
            if table.schema.len() == 1 && table.schema.index_of(column).is_some() {
                return Err(Error::InvalidOperation(format!(
                    "cannot drop {column}, the last column of {name}"
                )));
            }
            table.drop_column(column)?;
            Ok(Outcome::effect(format!("column {column} dropped from {name}"), 0))
        }
        AlterAction::RenameColumn { from, to } => {
            let table = db
                .get_table_mut(name)
                .ok_or_else(|| Error::TableNotFound(name.clone()))?;
            if table.schema.index_of(to).is_some() {
                return Err(Error::InvalidOperation(format!(
                    "column {to} already exists in {name}"
                )));
            }
            table.rename_column(from, to)?;
            Ok(Outcome::effect(format!("column {from} renamed to {to}"), 0))
        }
    }
}

/// Appends a column, filling existing rows from its SERIAL counter, its
/// DEFAULT, or `NULL`.
fn add_column(table: &mut Table, def: &ColumnDef) -> Result<()> {
    if table.schema.index_of(&def.name).is_some() {
        return Err(Error::InvalidOperation(format!(
            "column {} already exists in {}",
            def.name, table.name
        )));
    }
    let rows = table.row_count;
    let fill: Vec<Value> = if def.is_serial() {
        (1..=rows as i64).map(Value::Int).collect()
    } else {
        let value = match &def.default {
            Some(default) => def.data_type.parse(&default.evaluate(&Scope::Empty)?)?,
            None => Value::Null,
        };
        vec![value; rows]
    };
    if rows > 0 && def.is_required() && fill.iter().any(Value::is_null) {
        return Err(Error::ConstraintViolation(format!(
            "column {} is NOT NULL but {} has rows and no default",
            def.name, table.name
        )));
    }
    if rows > 1 && def.is_unique() && !def.is_serial() && !fill[0].is_null() {
        return Err(Error::ConstraintViolation(format!(
            "unique column {} would repeat its default across {rows} rows",
            def.name
        )));
    }
    table.add_column(def.clone(), fill)
}

/// Empties a table in place. Tables feeding a view are refused.
pub(super) fn truncate(name: &str, db: &mut Database) -> Result<Outcome> {
    if db.is_materialized_backing(name) {
        return Err(Error::ViewLinkage(format!(
            "{name} backs a materialized view, use REFRESH MATERIALIZED VIEW"
        )));
    }
    if let Some(view) = db.views_reading(name).first() {
        return Err(Error::ViewLinkage(format!(
            "{name} is read by view {view}, drop the view first"
        )));
    }
    let table = db
        .get_table_mut(name)
        .ok_or_else(|| Error::TableNotFound(name.to_string()))?;
    let affected = table.row_count;
    table.truncate();
    Ok(Outcome::effect(format!("table {name} truncated"), affected))
}

/// Built-in procedures: `list_tables()`, `list_views()`, `describe('t')`.
pub(super) fn call(call: &Call, db: &mut Database) -> Result<Outcome> {
    let procedure = call.procedure.to_ascii_lowercase();
    let result = match procedure.as_str() {
        "list_tables" => {
            expect_args(call, 0)?;
            let rows = db
                .list_tables()
                .into_iter()
                .filter(|t| !db.is_materialized_backing(t))
                .map(|t| vec![Value::text(t)])
                .collect();
            QueryResult::new(vec!["table_name".into()], rows)
        }
        "list_views" => {
            expect_args(call, 0)?;
            let rows = db
                .list_views()
                .into_iter()
                .map(|(view, materialized)| vec![Value::text(view), Value::Bool(materialized)])
                .collect();
            QueryResult::new(vec!["view_name".into(), "materialized".into()], rows)
        }
        "describe" => {
            expect_args(call, 1)?;
            let args = call_args(call)?;
            let name = args[0].to_string();
            let table = db
                .get_table(&name)
                .ok_or_else(|| Error::TableNotFound(name.clone()))?;
            describe(table)
        }
        "list_databases" => {
            return Err(Error::InvalidOperation(
                "list_databases requires a database manager".into(),
            ));
        }
        _ => {
            return Err(Error::InvalidOperation(format!(
                "unknown procedure {}",
                call.procedure
            )));
        }
    };
    Ok(Outcome::Rows(result))
}

fn describe(table: &Table) -> QueryResult {
    let columns = vec![
        "column_name".to_string(),
        "data_type".to_string(),
        "constraints".to_string(),
        "default".to_string(),
    ];
    let rows = table
        .schema
        .columns
        .iter()
        .map(|def| {
            let constraints = def
                .constraints
                .iter()
                .map(|c| c.to_string())
                .chain(def.check.as_ref().map(|c| format!("CHECK ({c})")))
                .collect::<Vec<_>>()
                .join(", ");
            vec![
                Value::text(&def.name),
                Value::text(def.data_type.name()),
                if constraints.is_empty() {
                    Value::Null
                } else {
                    Value::text(constraints)
                },
                def.default
                    .as_ref()
                    .map(|d| Value::text(d.to_string()))
                    .unwrap_or(Value::Null),
            ]
        })
        .collect();
    QueryResult::new(columns, rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shop() -> Database {
        let mut db = Database::new();
        db.execute_script(
            "CREATE TABLE orders (id SERIAL PRIMARY KEY, item VARCHAR, qty INT, price FLOAT);
             INSERT INTO orders (item, qty, price) VALUES
                ('pen', 3, 1.5), ('ink', 1, 7.25), ('pen', 2, 1.5);",
        )
        .unwrap();
        db
    }

    // ─────────────────────────────────────────────
    // Test 1 : schema inference
    // ─────────────────────────────────────────────

    #[test]
    fn test_materialize_infers_types() {
        let result = QueryResult::new(
            vec!["a".into(), "b".into(), "c".into(), "d".into()],
            vec![
                vec![Value::Int(1), Value::Null, Value::text("x"), Value::Null],
                vec![Value::Float(2.5), Value::Bool(true), Value::text("y"), Value::Null],
            ],
        );
        let table = materialize("t", result, false).unwrap();
        let types: Vec<DataType> = table.schema.columns.iter().map(|c| c.data_type).collect();
        assert_eq!(
            types,
            vec![DataType::Float, DataType::Bool, DataType::Varchar, DataType::Varchar]
        );
        assert_eq!(table.get_row(0).unwrap()[0], Value::Float(1.0));
    }

    #[test]
    fn test_materialize_rejects_empty_and_duplicates() {
        let empty = QueryResult::new(vec!["a".into()], Vec::new());
        assert!(materialize("t", empty.clone(), false).is_err());
        assert!(materialize("t", empty, true).is_ok());

        let dup = QueryResult::new(vec!["a".into(), "a".into()], vec![vec![Value::Int(1), Value::Int(2)]]);
        assert!(matches!(materialize("t", dup, true), Err(Error::InvalidOperation(_))));
    }

    // ─────────────────────────────────────────────
    // Test 2 : tables
    // ─────────────────────────────────────────────

    #[test]
    fn test_create_table_checks() {
        let mut db = shop();
        assert!(matches!(
            db.execute("CREATE TABLE orders (a INT)"),
            Err(Error::TableAlreadyExists(_))
        ));
        db.execute("CREATE TABLE IF NOT EXISTS orders (a INT)").unwrap();
        assert!(db.execute("CREATE TABLE t (a INT, a INT)").is_err());
        assert!(db.execute("CREATE TABLE t (a INT PRIMARY KEY, b INT PRIMARY KEY)").is_err());
        assert!(matches!(
            db.execute("CREATE TABLE t (a INT CHECK (b > 0))"),
            Err(Error::ColumnNotFound(_))
        ));
        assert!(matches!(
            db.execute("CREATE TABLE t (a INT DEFAULT 'x')"),
            Err(Error::DataType(_))
        ));
    }

    #[test]
    fn test_create_table_as() {
        let mut db = shop();
        db.execute("CREATE TABLE pens AS SELECT id, qty * price AS total FROM orders WHERE item = 'pen'")
            .unwrap();
        let table = db.get_table("pens").unwrap();
        assert_eq!(table.schema.names(), vec!["id", "total"]);
        assert_eq!(table.schema.columns[1].data_type, DataType::Float);
        assert_eq!(table.row_count, 2);

        let err = db
            .execute("CREATE TABLE nothing AS SELECT id FROM orders WHERE qty > 100")
            .unwrap_err();
        assert!(matches!(err, Error::InvalidOperation(_)));
    }

    #[test]
    fn test_alter_table() {
        let mut db = shop();
        db.execute("ALTER TABLE orders ADD COLUMN status VARCHAR DEFAULT 'open'")
            .unwrap();
        db.execute("ALTER TABLE orders RENAME COLUMN qty TO quantity").unwrap();
        db.execute("ALTER TABLE orders DROP COLUMN price").unwrap();
        db.execute("ALTER TABLE orders RENAME TO purchases").unwrap();

        let result = db.query("SELECT * FROM purchases WHERE id = 2").unwrap();
        assert_eq!(result.columns, vec!["id", "item", "quantity", "status"]);
        assert_eq!(result.rows[0][3], Value::text("open"));
        assert!(db.get_table("orders").is_none());

        let err = db
            .execute("ALTER TABLE purchases ADD COLUMN code INT NOT NULL")
            .unwrap_err();
        assert!(matches!(err, Error::ConstraintViolation(_)));
    }

    #[test]
    fn test_truncate_keeps_serial_position() {
        let mut db = shop();
        let outcome = db.execute("TRUNCATE TABLE orders").unwrap();
        assert_eq!(outcome.affected(), 3);
        db.execute("INSERT INTO orders (item) VALUES ('cap')").unwrap();
        assert_eq!(db.query("SELECT id FROM orders").unwrap().rows[0][0], Value::Int(4));
    }

    // ─────────────────────────────────────────────
    // Test 3 : views
    // ─────────────────────────────────────────────

    #[test]
    fn test_plain_view_is_evaluated_lazily() {
        let mut db = shop();
        db.execute("CREATE VIEW pens AS SELECT id, qty FROM orders WHERE item = 'pen'")
            .unwrap();
        assert_eq!(db.query("SELECT * FROM pens").unwrap().rows.len(), 2);
        db.execute("INSERT INTO orders (item, qty) VALUES ('pen', 9)").unwrap();
        assert_eq!(db.query("SELECT SUM(qty) FROM pens").unwrap().rows[0][0], Value::Int(14));

        assert!(matches!(
            db.execute("CREATE VIEW pens AS SELECT id FROM orders"),
            Err(Error::ViewAlreadyExists(_))
        ));
        let outcome = db
            .execute("CREATE OR REPLACE VIEW pens AS SELECT id FROM orders")
            .unwrap();
        assert_eq!(outcome, Outcome::effect("view pens replaced", 0));
        assert_eq!(db.query("SELECT * FROM pens").unwrap().rows.len(), 4);
        let outcome = db
            .execute("CREATE OR REPLACE VIEW big AS SELECT id FROM orders WHERE qty > 2")
            .unwrap();
        assert_eq!(outcome, Outcome::effect("view big created", 0));

        assert!(matches!(db.execute("TRUNCATE TABLE orders"), Err(Error::ViewLinkage(_))));
        db.execute("DROP VIEW pens").unwrap();
        assert!(matches!(db.execute("DROP VIEW pens"), Err(Error::ViewNotFound(_))));
        db.execute("DROP VIEW IF EXISTS pens").unwrap();
    }

    #[test]
    fn test_materialized_view_lifecycle() {
        let mut db = shop();
        db.execute("CREATE MATERIALIZED VIEW totals AS SELECT item, SUM(qty) AS qty FROM orders GROUP BY item")
            .unwrap();
        let result = db.query("SELECT qty FROM totals WHERE item = 'pen'").unwrap();
        assert_eq!(result.rows[0][0], Value::Int(5));

        db.execute("INSERT INTO orders (item, qty) VALUES ('pen', 10)").unwrap();
        assert_eq!(db.query("SELECT qty FROM totals WHERE item = 'pen'").unwrap().rows[0][0], Value::Int(5));
        db.execute("REFRESH MATERIALIZED VIEW totals").unwrap();
        assert_eq!(db.query("SELECT qty FROM totals WHERE item = 'pen'").unwrap().rows[0][0], Value::Int(15));

        assert!(matches!(db.execute("DROP TABLE totals"), Err(Error::ViewLinkage(_))));
        assert!(matches!(db.execute("DROP VIEW totals"), Err(Error::ViewLinkage(_))));
        assert!(matches!(
            db.execute("INSERT INTO totals VALUES ('x', 1)"),
            Err(Error::ViewLinkage(_))
        ));
        assert!(matches!(db.execute("TRUNCATE TABLE totals"), Err(Error::ViewLinkage(_))));

        db.execute("DROP MATERIALIZED VIEW totals").unwrap();
        assert!(db.get_table("totals").is_none());
        assert!(db.view("totals._mt_view").is_none());
    }

    #[test]
    fn test_materialized_view_with_no_data() {
        let mut db = shop();
        db.execute("CREATE MATERIALIZED VIEW snapshot AS SELECT item FROM orders WITH NO DATA")
            .unwrap();
        assert!(db.query("SELECT * FROM snapshot").unwrap().rows.is_empty());
        db.execute("REFRESH MATERIALIZED VIEW snapshot").unwrap();
        assert_eq!(db.query("SELECT * FROM snapshot").unwrap().rows.len(), 3);
    }

    #[test]
    fn test_reserved_names() {
        let mut db = shop();
        assert!(db.execute("CREATE TABLE __views__ (a INT)").is_err());
    }

    // ─────────────────────────────────────────────
    // Test 4 : procedures
    // ─────────────────────────────────────────────

    #[test]
    fn test_procedures() {
        let mut db = shop();
        db.execute("CREATE VIEW v AS SELECT item FROM orders").unwrap();
        db.execute("CREATE MATERIALIZED VIEW m AS SELECT item FROM orders").unwrap();

        let tables = db.execute("CALL list_tables()").unwrap().into_rows().unwrap();
        assert_eq!(tables.rows, vec![vec![Value::text("orders")]]);

        let views = db.execute("CALL list_views()").unwrap().into_rows().unwrap();
        assert_eq!(
            views.rows,
            vec![
                vec![Value::text("m"), Value::Bool(true)],
                vec![Value::text("v"), Value::Bool(false)],
            ]
        );

        let described = db.execute("CALL describe('orders')").unwrap().into_rows().unwrap();
        assert_eq!(described.rows.len(), 4);
        assert_eq!(described.rows[0][1], Value::text("SERIAL"));
        assert_eq!(described.rows[0][2], Value::text("PRIMARY KEY"));

        assert!(db.execute("CALL nope()").is_err());
    }
}
