use std::collections::HashMap;

use crate::{
    ast::{Select, Statement},
    error::{Error, Result},
    executor::{self, Outcome, QueryResult},
    parser::{parse_script, parse_statement},
    table::{Schema, Table},
};

/// Suffix of the view entry that links a materialized view to its table.
pub const MATERIALIZED_SUFFIX: &str = "._mt_view";

/// Reserved key holding the views inside a persisted database.
pub const VIEWS_KEY: &str = "__views__";

/// An in-memory database: tables plus view definitions.
///
/// A plain view is stored as its unevaluated query. A materialized view owns a
/// backing table under its own name and a view entry `<name>._mt_view` holding
/// the query used by `REFRESH`.
#[derive(Debug, Clone, Default)]
pub struct Database {
    /// A map of table names to their respective [Table] structures.
    tables: HashMap<String, Table>,
    views: HashMap<String, Select>,
}

impl Database {
    /// Creates a new, empty database instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new table in the database.
    ///
    /// # Errors
    /// Returns [Error::TableAlreadyExists] if the name is taken.
    pub fn create_table(&mut self, name: String, schema: Schema) -> Result<()> {
        if self.tables.contains_key(&name) {
            return Err(Error::TableAlreadyExists(name));
        }
        let table = Table::new(name.clone(), schema);
        self.tables.insert(name, table);
        Ok(())
    }

    /// Stores a fully built table, replacing any table of the same name.
    pub fn insert_table(&mut self, table: Table) {
        self.tables.insert(table.name.clone(), table);
    }

    /// Removes a table from the database by its name.
    ///
    /// # Errors
    /// Returns [Error::TableNotFound] if the table does not exist.
    pub fn drop_table(&mut self, name: &str) -> Result<Table> {
        self.tables
            .remove(name)
            .ok_or_else(|| Error::TableNotFound(name.to_string()))
    }

    pub fn get_table(&self, name: &str) -> Option<&Table> {
        self.tables.get(name)
    }

    pub fn get_table_mut(&mut self, name: &str) -> Option<&mut Table> {
        self.tables.get_mut(name)
    }

    /// Table names, sorted.
    pub fn list_tables(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tables.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.values()
    }

    pub fn view(&self, name: &str) -> Option<&Select> {
        self.views.get(name)
    }

    pub fn set_view(&mut self, name: String, query: Select) {
        self.views.insert(name, query);
    }

    pub fn drop_view(&mut self, name: &str) -> Option<Select> {
        self.views.remove(name)
    }

    /// Raw view entries, materialized links included.
    pub fn views(&self) -> impl Iterator<Item = (&String, &Select)> {
        self.views.iter()
    }

    /// User-facing view names with whether each one is materialized, sorted.
    pub fn list_views(&self) -> Vec<(String, bool)> {
        let mut views: Vec<(String, bool)> = self
            .views
            .keys()
            .map(|key| match key.strip_suffix(MATERIALIZED_SUFFIX) {
                Some(name) => (name.to_string(), true),
                None => (key.clone(), false),
            })
            .collect();
        views.sort();
        views
    }

    pub fn materialized_key(name: &str) -> String {
        format!("{name}{MATERIALIZED_SUFFIX}")
    }

    /// Whether `name` is the backing table of a materialized view.
    pub fn is_materialized_backing(&self, name: &str) -> bool {
        self.views.contains_key(&Self::materialized_key(name))
    }

    /// Views whose query reads `table`, sorted.
    pub fn views_reading(&self, table: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .views
            .iter()
            .filter(|(_, query)| query.referenced_tables().iter().any(|t| t == table))
            .map(|(key, _)| {
                key.strip_suffix(MATERIALIZED_SUFFIX)
                    .unwrap_or(key)
                    .to_string()
            })
            .collect();
        names.sort();
        names
    }

    /// Runs one SQL statement.
    ///
    /// Statements that need a manager (CREATE DATABASE, USE, ...) are
    /// rejected, see [crate::DatabaseManager::execute].
    ///
    /// # Errors
    /// Returns an error if tokenization, parsing, or execution fails.
    ///
    /// # Example
    /// ```
    /// use quartz::{Database, Value};
    /// let mut db = Database::new();
    /// db.execute("CREATE TABLE users (id INT)").unwrap();
    /// db.execute("INSERT INTO users VALUES (1)").unwrap();
    /// db.execute("DELETE FROM users WHERE id > 12").unwrap();
    ///
    /// let result = db.query("SELECT * FROM users").unwrap();
    /// assert_eq!(result.rows[0][0], Value::Int(1));
    /// ```
    pub fn execute(&mut self, sql: &str) -> Result<Outcome> {
        let statement = parse_statement(sql)?;
        executor::execute_in(&statement, self)
    }

    /// Runs a `;`-separated script, stopping at the first failing statement.
    pub fn execute_script(&mut self, sql: &str) -> Result<Vec<Outcome>> {
        parse_script(sql)?
            .iter()
            .map(|statement| executor::execute_in(statement, self))
            .collect()
    }

    /// Runs a `SELECT` and returns its rows.
    ///
    /// # Example
    ///
    /// ```
    /// use quartz::{Database, Value};
    ///
    /// let mut db = Database::new();
    /// db.execute("CREATE TABLE products (name TEXT, price INT)").unwrap();
    /// db.execute("INSERT INTO products VALUES ('Laptop', 1200)").unwrap();
    /// db.execute("INSERT INTO products VALUES ('Mouse', 25)").unwrap();
    ///
    /// let result = db.query("SELECT name FROM products ORDER BY price").unwrap();
    ///
    /// assert_eq!(result.columns, vec!["name"]);
    /// assert_eq!(result.rows[0][0], Value::text("Mouse"));
    /// assert_eq!(result.rows[1][0], Value::text("Laptop"));
    /// ```
    ///
    /// # Errors
    /// Fails when the statement is not a query, or when it references
    /// unknown tables or columns.
    pub fn query(&self, sql: &str) -> Result<QueryResult> {
        match parse_statement(sql)? {
            Statement::Select(select) => executor::run_select(&select, self),
            other => Err(Error::InvalidOperation(format!(
                "query only runs SELECT, use execute for {other:?}"
            ))),
        }
    }
}
