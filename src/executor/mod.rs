//! Statement execution.
//!
//! [execute] is the single dispatch point. Statements that only touch the
//! active database go through [execute_in], which also serves a standalone
//! [Database].

pub mod ddl;
mod dml;
mod select;

use crate::ast::{Call, DropKind, Expr, Statement};
use crate::database::Database;
use crate::error::{Error, Result};
use crate::eval::{Evaluate, Scope};
use crate::manager::DatabaseManager;
use crate::value::Value;
use tracing::debug;

pub(crate) use select::run as run_select;

/// Rows produced by a query, in projection order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    /// Output column names, aliases included.
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl QueryResult {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self { columns, rows }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Values of one output column, `None` when the name is unknown.
    pub fn column(&self, name: &str) -> Option<Vec<&Value>> {
        let idx = self.columns.iter().position(|c| c == name)?;
        Some(self.rows.iter().map(|row| &row[idx]).collect())
    }
}

/// What running a statement produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// SELECT, RETURNING and CALL results.
    Rows(QueryResult),
    /// Confirmation for statements that only change state.
    Effect { message: String, affected: usize },
}

impl Outcome {
    pub(crate) fn effect(message: impl Into<String>, affected: usize) -> Self {
        Self::Effect {
            message: message.into(),
            affected,
        }
    }

    pub fn rows(&self) -> Option<&QueryResult> {
        match self {
            Self::Rows(result) => Some(result),
            Self::Effect { .. } => None,
        }
    }

    pub fn into_rows(self) -> Option<QueryResult> {
        match self {
            Self::Rows(result) => Some(result),
            Self::Effect { .. } => None,
        }
    }

    /// Rows touched by the statement, or rows returned for queries.
    pub fn affected(&self) -> usize {
        match self {
            Self::Rows(result) => result.rows.len(),
            Self::Effect { affected, .. } => *affected,
        }
    }
}

/// Runs a statement against the manager's active database.
///
/// Database-level statements (CREATE/DROP DATABASE, USE, `CALL
/// list_databases()`) are handled here, everything else is delegated to
/// [execute_in].
pub fn execute(statement: &Statement, manager: &mut DatabaseManager) -> Result<Outcome> {
    match statement {
        Statement::CreateDatabase(name) => {
            manager.create_database(name)?;
            Ok(Outcome::effect(format!("database {name} created"), 0))
        }
        Statement::Use(name) => {
            manager.use_database(name)?;
            Ok(Outcome::effect(format!("using database {name}"), 0))
        }
        Statement::Drop(drop) if drop.kind == DropKind::Database => {
            if drop.if_exists && !manager.database_exists(&drop.name) {
                return Ok(Outcome::effect(
                    format!("database {} does not exist, skipped", drop.name),
                    0,
                ));
            }
            manager.drop_database(&drop.name)?;
            Ok(Outcome::effect(format!("database {} dropped", drop.name), 0))
        }
        Statement::Call(call) if call.procedure.eq_ignore_ascii_case("list_databases") => {
            expect_args(call, 0)?;
            let rows = manager
                .list_databases()
                .into_iter()
                .map(|name| vec![Value::text(name)])
                .collect();
            Ok(Outcome::Rows(QueryResult::new(vec!["database".into()], rows)))
        }
        _ => execute_in(statement, manager.database_mut()),
    }
}

/// Runs a statement against a single database.
///
/// # Errors
/// Database-level statements fail with [Error::InvalidOperation] since they
/// need a [DatabaseManager].
pub fn execute_in(statement: &Statement, db: &mut Database) -> Result<Outcome> {
    debug!(kind = statement_kind(statement), "executing statement");
    let outcome = match statement {
        Statement::Select(select) => Outcome::Rows(select::run(select, db)?),
        Statement::Insert(insert) => dml::insert(insert, db)?,
        Statement::Update(update) => dml::update(update, db)?,
        Statement::Delete(delete) => dml::delete(delete, db)?,
        Statement::CreateTable(create) => ddl::create_table(create, db)?,
        Statement::CreateTableAs(create) => ddl::create_table_as(create, db)?,
        Statement::CreateView(create) => ddl::create_view(create, db)?,
        Statement::RefreshMaterializedView(name) => ddl::refresh_materialized_view(name, db)?,
        Statement::Drop(drop) => ddl::drop(drop, db)?,
        Statement::AlterTable(alter) => ddl::alter_table(alter, db)?,
        Statement::Truncate(name) => ddl::truncate(name, db)?,
        Statement::Call(call) => ddl::call(call, db)?,
        Statement::CreateDatabase(_) | Statement::Use(_) => {
            return Err(Error::InvalidOperation(format!(
                "{} requires a database manager",
                statement_kind(statement)
            )));
        }
    };
    debug!(affected = outcome.affected(), "statement finished");
    Ok(outcome)
}

fn statement_kind(statement: &Statement) -> &'static str {
    match statement {
        Statement::Select(_) => "SELECT",
        Statement::Insert(_) => "INSERT",
        Statement::Update(_) => "UPDATE",
        Statement::Delete(_) => "DELETE",
        Statement::CreateDatabase(_) => "CREATE DATABASE",
        Statement::CreateTable(_) => "CREATE TABLE",
        Statement::CreateTableAs(_) => "CREATE TABLE AS",
        Statement::CreateView(_) => "CREATE VIEW",
        Statement::RefreshMaterializedView(_) => "REFRESH MATERIALIZED VIEW",
        Statement::Drop(drop) => match drop.kind {
            DropKind::Database => "DROP DATABASE",
            DropKind::Table => "DROP TABLE",
            DropKind::View => "DROP VIEW",
            DropKind::MaterializedView => "DROP MATERIALIZED VIEW",
        },
        Statement::AlterTable(_) => "ALTER TABLE",
        Statement::Truncate(_) => "TRUNCATE",
        Statement::Use(_) => "USE",
        Statement::Call(_) => "CALL",
    }
}

/// Evaluates procedure arguments, which may not reference columns.
pub(crate) fn call_args(call: &Call) -> Result<Vec<Value>> {
    call.args
        .iter()
        .map(|arg: &Expr| arg.evaluate(&Scope::Empty))
        .collect()
}

pub(crate) fn expect_args(call: &Call, count: usize) -> Result<()> {
    if call.args.len() != count {
        return Err(Error::InvalidOperation(format!(
            "procedure {} takes {count} argument(s), got {}",
            call.procedure,
            call.args.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_statement;

    fn run(db: &mut Database, sql: &str) -> Result<Outcome> {
        execute_in(&parse_statement(sql)?, db)
    }

    #[test]
    fn test_database_statements_need_a_manager() {
        let mut db = Database::new();
        assert!(matches!(
            run(&mut db, "CREATE DATABASE shop;"),
            Err(Error::InvalidOperation(_))
        ));
        assert!(matches!(run(&mut db, "USE shop;"), Err(Error::InvalidOperation(_))));
        assert!(matches!(
            run(&mut db, "CALL list_databases();"),
            Err(Error::InvalidOperation(_))
        ));
    }

    #[test]
    fn test_outcome_shapes() {
        let mut db = Database::new();
        let created = run(&mut db, "CREATE TABLE t (a INT);").unwrap();
        assert!(created.rows().is_none());

        let inserted = run(&mut db, "INSERT INTO t VALUES (1), (2);").unwrap();
        assert_eq!(inserted.affected(), 2);

        let selected = run(&mut db, "SELECT a FROM t;").unwrap().into_rows().unwrap();
        assert_eq!(selected.columns, vec!["a"]);
        assert_eq!(
            selected.column("a").unwrap(),
            vec![&Value::Int(1), &Value::Int(2)]
        );
    }
}
